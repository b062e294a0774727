use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::Money;

/// unique identifier for a credit
pub type CreditId = Uuid;
/// unique identifier for a payment
pub type PaymentId = Uuid;
/// unique identifier for a cash box
pub type CashBoxId = Uuid;
/// identifier for a client in the external directory
pub type ClientId = Uuid;
/// identifier for a user (collector, manager) in the external directory
pub type UserId = Uuid;

/// repayment cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Periodicity {
    Daily,
    Weekly,
    Biweekly,
    Monthly,
}

impl Periodicity {
    /// length of one period in days, None for calendar-month advances
    pub fn days(&self) -> Option<i64> {
        match self {
            Periodicity::Daily => Some(1),
            Periodicity::Weekly => Some(7),
            Periodicity::Biweekly => Some(14),
            Periodicity::Monthly => None,
        }
    }
}

/// credit status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreditStatus {
    /// created, waiting for a manager decision
    PendingApproval,
    /// approved, waiting for physical handoff to the client
    WaitingDelivery,
    /// delivered, repayment schedule running
    Active,
    /// balance reached zero
    Completed,
    /// written off as unrecoverable
    Defaulted,
    /// cancelled before completion
    Cancelled,
    /// turned down at approval or delivery stage
    Rejected,
}

impl CreditStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CreditStatus::Completed
                | CreditStatus::Defaulted
                | CreditStatus::Cancelled
                | CreditStatus::Rejected
        )
    }
}

/// payment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
    Partial,
}

impl PaymentStatus {
    /// whether a payment in this status counts toward balances and
    /// installment totals
    pub fn is_effective(&self) -> bool {
        !matches!(self, PaymentStatus::Cancelled | PaymentStatus::Failed)
    }
}

/// payment method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    Cash,
    Transfer,
    Card,
    Other,
}

/// cash box status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CashBoxStatus {
    Open,
    Closed,
    Reconciled,
}

/// classification of a payment against the outstanding schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentClassification {
    /// below one installment; shortfall to complete it
    Partial { shortfall: Money },
    /// covers one or more whole installments
    Regular { installments_covered: u32 },
    /// clears the credit; excess is reported, never silently absorbed
    FullPayment { excess: Money },
}

/// live status of a schedule entry once payments are reconciled against it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstallmentStatus {
    Pending,
    Partial,
    Paid,
    Overdue,
}

/// one installment of the live schedule, reconciled against payments; a
/// derived projection, never persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallmentProjection {
    pub number: u32,
    pub due_date: chrono::NaiveDate,
    pub amount: Money,
    pub paid_amount: Money,
    pub status: InstallmentStatus,
}

/// outcome of applying a payment to a credit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentApplication {
    pub classification: PaymentClassification,
    pub balance_delta: Money,
    pub installment_completed: bool,
}
