use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::types::{
    CashBoxId, ClientId, CreditId, CreditStatus, PaymentClassification, PaymentId, UserId,
};

/// all events emitted by the engine; the notification boundary consumes
/// these after the owning transaction commits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // credit lifecycle
    CreditCreated {
        credit_id: CreditId,
        client_id: ClientId,
        principal: Money,
        total_amount: Money,
    },
    CreditApproved {
        credit_id: CreditId,
        approved_by: UserId,
        scheduled_delivery_date: NaiveDate,
        timestamp: DateTime<Utc>,
    },
    CreditRejected {
        credit_id: CreditId,
        rejected_by: UserId,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    CreditDelivered {
        credit_id: CreditId,
        delivered_by: UserId,
        start_date: NaiveDate,
        end_date: NaiveDate,
        timestamp: DateTime<Utc>,
    },
    DeliveryRescheduled {
        credit_id: CreditId,
        new_date: NaiveDate,
        actor: UserId,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    CreditCompleted {
        credit_id: CreditId,
        total_paid: Money,
        timestamp: DateTime<Utc>,
    },
    CreditCancelled {
        credit_id: CreditId,
        actor: UserId,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    CreditDefaulted {
        credit_id: CreditId,
        remaining_balance: Money,
        timestamp: DateTime<Utc>,
    },
    StatusChanged {
        credit_id: CreditId,
        old_status: CreditStatus,
        new_status: CreditStatus,
        timestamp: DateTime<Utc>,
    },

    // payment ledger
    PaymentRecorded {
        payment_id: PaymentId,
        credit_id: CreditId,
        amount: Money,
        classification: PaymentClassification,
        new_balance: Money,
        timestamp: DateTime<Utc>,
    },
    PaymentEdited {
        payment_id: PaymentId,
        credit_id: CreditId,
        balance_delta: Money,
        timestamp: DateTime<Utc>,
    },
    PaymentReversed {
        payment_id: PaymentId,
        credit_id: CreditId,
        amount_restored: Money,
        timestamp: DateTime<Utc>,
    },
    InstallmentCompleted {
        credit_id: CreditId,
        installment_number: u32,
        paid_installments: u32,
    },

    // client risk
    CategoryChanged {
        client_id: ClientId,
        old_code: String,
        new_code: String,
        overdue_count: u32,
    },

    // cash box
    CashBoxOpened {
        box_id: CashBoxId,
        collector: UserId,
        date: NaiveDate,
        initial_amount: Money,
        has_pending_previous_boxes: bool,
    },
    CashBoxClosed {
        box_id: CashBoxId,
        expected_final: Money,
        declared_final: Money,
        auto: bool,
        timestamp: DateTime<Utc>,
    },
    DiscrepancyDetected {
        box_id: CashBoxId,
        difference: Money,
        timestamp: DateTime<Utc>,
    },
    CashBoxReconciled {
        box_id: CashBoxId,
        actor: UserId,
        timestamp: DateTime<Utc>,
    },
}

/// event store for collecting events during operations
#[derive(Debug, Default)]
pub struct EventStore {
    events: Vec<Event>,
}

impl EventStore {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

/// notification boundary: called after a successful state change, failures
/// are swallowed and must never roll back the financial transaction
pub trait NotificationSink {
    fn notify(&mut self, event: &Event);
}

/// default sink that drops everything
#[derive(Debug, Default)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn notify(&mut self, _event: &Event) {}
}
