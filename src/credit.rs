use chrono::{DateTime, Duration, NaiveDate, Utc};
use hourglass_rs::SafeTimeProvider;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::{AttentionConfig, DeliveryConfig, ScheduleConfig};
use crate::decimal::{Money, Rate};
use crate::errors::{LedgerError, Result};
use crate::schedule;
use crate::types::{CashBoxId, ClientId, CreditId, CreditStatus, Periodicity, UserId};

/// a loan, from approval through repayment
///
/// Monetary derivations (`total_amount`, `installment_amount`, initial
/// `balance`) are fixed in the constructor and never silently recomputed;
/// the payment ledger is the only mutator of the running counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credit {
    pub id: CreditId,
    pub client_id: ClientId,
    pub created_by: UserId,

    // fixed financial terms
    pub principal: Money,
    pub interest_rate: Rate,
    pub total_amount: Money,
    pub installment_amount: Money,
    pub periodicity: Periodicity,
    pub total_installments: u32,

    // running counters, owned by the payment ledger
    pub balance: Money,
    pub total_paid: Money,
    pub paid_installments: u32,

    pub status: CreditStatus,
    pub created_at: DateTime<Utc>,

    // approval
    pub approved_by: Option<UserId>,
    pub approved_at: Option<DateTime<Utc>>,
    pub scheduled_delivery_date: Option<NaiveDate>,

    // rejection
    pub rejected_by: Option<UserId>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,

    // cancellation
    pub cancelled_by: Option<UserId>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,

    // delivery; notes are an append-only audit trail
    pub delivered_by: Option<UserId>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub delivery_notes: Vec<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub funding_cash_box: Option<CashBoxId>,

    /// optimistic-lock token, bumped on every mutation
    pub version: u64,
}

impl Credit {
    /// create a credit in pending approval
    pub fn new(
        id: CreditId,
        client_id: ClientId,
        created_by: UserId,
        principal: Money,
        interest_rate: Rate,
        periodicity: Periodicity,
        total_installments: u32,
        clock: &SafeTimeProvider,
    ) -> Result<Self> {
        if !principal.is_positive() {
            return Err(LedgerError::Validation {
                message: format!("principal must be positive, got {principal}"),
            });
        }
        if interest_rate.as_decimal().is_sign_negative() {
            return Err(LedgerError::Validation {
                message: format!("interest rate must not be negative, got {interest_rate}"),
            });
        }
        if total_installments == 0 {
            return Err(LedgerError::Validation {
                message: "total installments must be at least 1".to_string(),
            });
        }

        let total_amount = principal + principal.percentage(interest_rate.as_percentage());
        let installment_amount = total_amount / Decimal::from(total_installments);

        Ok(Self {
            id,
            client_id,
            created_by,
            principal,
            interest_rate,
            total_amount,
            installment_amount,
            periodicity,
            total_installments,
            balance: total_amount,
            total_paid: Money::ZERO,
            paid_installments: 0,
            status: CreditStatus::PendingApproval,
            created_at: clock.now(),
            approved_by: None,
            approved_at: None,
            scheduled_delivery_date: None,
            rejected_by: None,
            rejected_at: None,
            rejection_reason: None,
            cancelled_by: None,
            cancelled_at: None,
            cancellation_reason: None,
            delivered_by: None,
            delivered_at: None,
            delivery_notes: Vec::new(),
            start_date: None,
            end_date: None,
            funding_cash_box: None,
            version: 0,
        })
    }

    /// approve for delivery on a scheduled date
    pub fn approve_for_delivery(
        &mut self,
        approver: UserId,
        scheduled_date: NaiveDate,
        notes: Option<String>,
        clock: &SafeTimeProvider,
    ) -> Result<()> {
        if self.status != CreditStatus::PendingApproval {
            return Err(self.illegal("approve_for_delivery"));
        }
        if scheduled_date < clock.now().date_naive() {
            return Err(LedgerError::InvalidDate {
                message: format!("scheduled delivery {scheduled_date} is in the past"),
            });
        }

        self.status = CreditStatus::WaitingDelivery;
        self.approved_by = Some(approver);
        self.approved_at = Some(clock.now());
        self.scheduled_delivery_date = Some(scheduled_date);
        if let Some(notes) = notes {
            self.delivery_notes.push(notes);
        }
        self.version += 1;
        Ok(())
    }

    /// reject a credit awaiting approval or delivery
    pub fn reject(
        &mut self,
        rejecter: UserId,
        reason: &str,
        clock: &SafeTimeProvider,
    ) -> Result<()> {
        if !matches!(
            self.status,
            CreditStatus::PendingApproval | CreditStatus::WaitingDelivery
        ) {
            return Err(self.illegal("reject"));
        }
        if reason.trim().is_empty() {
            return Err(LedgerError::Validation {
                message: "rejection requires a reason".to_string(),
            });
        }

        self.status = CreditStatus::Rejected;
        self.rejected_by = Some(rejecter);
        self.rejected_at = Some(clock.now());
        self.rejection_reason = Some(reason.to_string());
        self.version += 1;
        Ok(())
    }

    /// hand the cash to the client and activate the repayment schedule.
    ///
    /// The only place the schedule's date bounds are fixed: delivery
    /// timestamp is now, start date is tomorrow, end date is the last due
    /// date of the schedule walk.
    pub fn deliver_to_client(
        &mut self,
        deliverer: UserId,
        notes: Option<String>,
        schedule_config: &ScheduleConfig,
        clock: &SafeTimeProvider,
    ) -> Result<()> {
        if self.status != CreditStatus::WaitingDelivery {
            return Err(self.illegal("deliver_to_client"));
        }

        let now = clock.now();
        let delivery_date = now.date_naive();

        self.delivered_by = Some(deliverer);
        self.delivered_at = Some(now);
        self.start_date = Some(delivery_date + Duration::days(1));
        self.end_date = Some(schedule::calculate_end_date(
            delivery_date,
            self.total_installments,
            self.periodicity,
            schedule_config.rest_day,
            schedule_config.default_span_days,
        ));
        if let Some(notes) = notes {
            self.delivery_notes.push(notes);
        }
        self.status = CreditStatus::Active;
        self.version += 1;
        Ok(())
    }

    /// move the scheduled delivery date, keeping the audit trail
    pub fn reschedule_delivery(
        &mut self,
        new_date: NaiveDate,
        actor: UserId,
        reason: &str,
        clock: &SafeTimeProvider,
    ) -> Result<()> {
        if self.status != CreditStatus::WaitingDelivery {
            return Err(self.illegal("reschedule_delivery"));
        }
        if new_date < clock.now().date_naive() {
            return Err(LedgerError::InvalidDate {
                message: format!("delivery date {new_date} is in the past"),
            });
        }

        let previous = self.scheduled_delivery_date;
        self.scheduled_delivery_date = Some(new_date);
        self.delivery_notes.push(format!(
            "[{}] rescheduled from {} to {} by {}: {}",
            clock.now().format("%Y-%m-%d %H:%M"),
            previous.map_or_else(|| "unset".to_string(), |d| d.to_string()),
            new_date,
            actor,
            reason,
        ));
        self.version += 1;
        Ok(())
    }

    /// cancel a non-terminal credit
    pub fn cancel(&mut self, actor: UserId, reason: &str, clock: &SafeTimeProvider) -> Result<()> {
        if self.status.is_terminal() {
            return Err(self.illegal("cancel"));
        }
        if reason.trim().is_empty() {
            return Err(LedgerError::Validation {
                message: "cancellation requires a reason".to_string(),
            });
        }

        self.status = CreditStatus::Cancelled;
        self.cancelled_by = Some(actor);
        self.cancelled_at = Some(clock.now());
        self.cancellation_reason = Some(reason.to_string());
        self.version += 1;
        Ok(())
    }

    /// write off an active credit
    pub fn mark_defaulted(&mut self, _clock: &SafeTimeProvider) -> Result<()> {
        if self.status != CreditStatus::Active {
            return Err(self.illegal("mark_defaulted"));
        }
        self.status = CreditStatus::Defaulted;
        self.version += 1;
        Ok(())
    }

    /// called by the ledger when the balance reaches zero
    pub(crate) fn mark_completed(&mut self) {
        if self.status == CreditStatus::Active {
            self.status = CreditStatus::Completed;
        }
    }

    /// payment reversal is the one sanctioned way back out of completion
    pub(crate) fn reopen_if_reversed(&mut self) {
        if self.status == CreditStatus::Completed && self.balance.is_positive() {
            self.status = CreditStatus::Active;
        }
    }

    fn illegal(&self, operation: &'static str) -> LedgerError {
        LedgerError::IllegalTransition {
            operation,
            current: self.status,
        }
    }

    // ---- delivery timing queries ----

    pub fn is_ready_for_delivery(&self, today: NaiveDate) -> bool {
        self.status == CreditStatus::WaitingDelivery
            && self
                .scheduled_delivery_date
                .is_some_and(|scheduled| today >= scheduled)
    }

    pub fn is_overdue_for_delivery(&self, today: NaiveDate, delivery: &DeliveryConfig) -> bool {
        self.status == CreditStatus::WaitingDelivery
            && self
                .scheduled_delivery_date
                .is_some_and(|scheduled| today > scheduled + Duration::days(delivery.grace_days))
    }

    pub fn days_until_delivery(&self, today: NaiveDate) -> Option<i64> {
        self.scheduled_delivery_date
            .map(|scheduled| (scheduled - today).num_days().max(0))
    }

    pub fn days_overdue_for_delivery(&self, today: NaiveDate) -> Option<i64> {
        self.scheduled_delivery_date
            .map(|scheduled| (today - scheduled).num_days().max(0))
    }

    // ---- repayment progress queries ----

    /// installments the schedule expects to be paid by `today`
    pub fn expected_installments(&self, today: NaiveDate, rest_day: chrono::Weekday) -> u32 {
        match self.delivered_at {
            Some(delivered) => schedule::installments_due_by(
                self.total_installments,
                self.periodicity,
                delivered.date_naive(),
                rest_day,
                today,
            ),
            None => 0,
        }
    }

    pub fn overdue_installments(&self, today: NaiveDate, rest_day: chrono::Weekday) -> u32 {
        self.expected_installments(today, rest_day)
            .saturating_sub(self.paid_installments)
    }

    pub fn overdue_amount(&self, today: NaiveDate, rest_day: chrono::Weekday) -> Money {
        self.installment_amount * Decimal::from(self.overdue_installments(today, rest_day))
    }

    pub fn is_overdue(&self, today: NaiveDate, rest_day: chrono::Weekday) -> bool {
        self.status == CreditStatus::Active && self.overdue_installments(today, rest_day) > 0
    }

    /// whether a collector or manager should look at this credit; the
    /// boolean is authoritative, notification policy lives at the boundary
    pub fn requires_attention(
        &self,
        today: NaiveDate,
        attention: &AttentionConfig,
        rest_day: chrono::Weekday,
    ) -> bool {
        if self.status == CreditStatus::Defaulted {
            return true;
        }
        if self.status != CreditStatus::Active {
            return false;
        }
        if self.is_overdue(today, rest_day) {
            return true;
        }
        if let Some(end) = self.end_date {
            if today > end {
                return true;
            }
            if today + Duration::days(attention.end_window_days) >= end {
                return true;
            }
        }
        if let Some(start) = self.start_date {
            let stale_threshold = self
                .total_amount
                .percentage(attention.stale_balance_ratio.as_percentage());
            if (today - start).num_days() >= attention.stale_days && self.balance > stale_threshold
            {
                return true;
            }
        }
        false
    }
}
