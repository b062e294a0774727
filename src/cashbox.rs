use chrono::{DateTime, NaiveDate, Utc};
use hourglass_rs::SafeTimeProvider;
use serde::{Deserialize, Serialize};

use crate::config::CashBoxConfig;
use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::types::{CashBoxId, CashBoxStatus, UserId};

/// a collector's daily cash ledger, one per (collector, date)
///
/// `final == initial + collected − lent` is expected, not enforced: a
/// discrepancy at close time is a reportable fact, never a rejected write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashBalance {
    pub id: CashBoxId,
    pub collector: UserId,
    pub date: NaiveDate,
    pub initial_amount: Money,
    pub collected_amount: Money,
    pub lent_amount: Money,
    pub final_amount: Option<Money>,
    pub status: CashBoxStatus,
    pub auto_closed_at: Option<DateTime<Utc>>,
    pub manually_closed_at: Option<DateTime<Utc>>,
    pub closed_by: Option<UserId>,
    pub reconciled_at: Option<DateTime<Utc>>,
    pub closing_notes: Option<String>,
    pub requires_reconciliation: bool,
    pub has_pending_previous_boxes: bool,
    /// dates of prior boxes still open or flagged; their discrepancies are
    /// never rolled into this day's numbers
    pub pending_previous_dates: Vec<NaiveDate>,
    /// optimistic-lock token, bumped on every mutation
    pub version: u64,
}

/// outcome of a close operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseOutcome {
    pub expected_final: Money,
    pub declared_final: Money,
    /// declared minus expected
    pub discrepancy: Money,
    pub requires_reconciliation: bool,
}

impl CashBalance {
    pub fn new(
        id: CashBoxId,
        collector: UserId,
        date: NaiveDate,
        initial_amount: Money,
        pending_previous_dates: Vec<NaiveDate>,
    ) -> Self {
        Self {
            id,
            collector,
            date,
            initial_amount,
            collected_amount: Money::ZERO,
            lent_amount: Money::ZERO,
            final_amount: None,
            status: CashBoxStatus::Open,
            auto_closed_at: None,
            manually_closed_at: None,
            closed_by: None,
            reconciled_at: None,
            closing_notes: None,
            requires_reconciliation: false,
            has_pending_previous_boxes: !pending_previous_dates.is_empty(),
            pending_previous_dates,
            version: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == CashBoxStatus::Open
    }

    /// what the box should hold at close time
    pub fn expected_final(&self) -> Money {
        self.initial_amount + self.collected_amount - self.lent_amount
    }

    /// a completed payment came in for this collector/day
    pub fn record_collection(&mut self, amount: Money) {
        self.collected_amount += amount;
        self.flag_if_closed();
        self.version += 1;
    }

    /// a payment edit or deletion changed what was collected
    pub fn adjust_collection(&mut self, delta: Money) {
        self.collected_amount = (self.collected_amount + delta).max(Money::ZERO);
        self.flag_if_closed();
        self.version += 1;
    }

    /// cash left the box to fund a credit delivery
    pub fn record_delivery(&mut self, amount: Money) {
        self.lent_amount += amount;
        self.flag_if_closed();
        self.version += 1;
    }

    /// a mutation after close invalidates the recorded final amount; the
    /// box is flagged for a manager instead of rejecting the cash movement
    fn flag_if_closed(&mut self) {
        if !self.is_open() {
            self.requires_reconciliation = true;
        }
    }

    /// replace both totals with freshly aggregated values
    pub fn set_totals(&mut self, collected: Money, lent: Money) {
        self.collected_amount = collected;
        self.lent_amount = lent;
        self.version += 1;
    }

    /// manual close by a responsible user; `declared_final` defaults to the
    /// expected amount when the collector declares nothing
    pub fn close_manual(
        &mut self,
        actor: UserId,
        declared_final: Option<Money>,
        notes: Option<String>,
        config: &CashBoxConfig,
        clock: &SafeTimeProvider,
    ) -> Result<CloseOutcome> {
        if !self.is_open() {
            return Err(LedgerError::Validation {
                message: format!("cash box {} is already {:?}", self.id, self.status),
            });
        }

        let outcome = self.settle(declared_final, config);
        self.manually_closed_at = Some(clock.now());
        self.closed_by = Some(actor);
        self.closing_notes = notes;
        self.version += 1;
        Ok(outcome)
    }

    /// end-of-day sweep close; closing an already-closed box is a no-op
    pub fn close_auto(
        &mut self,
        config: &CashBoxConfig,
        clock: &SafeTimeProvider,
    ) -> Option<CloseOutcome> {
        if !self.is_open() {
            return None;
        }

        let outcome = self.settle(None, config);
        self.auto_closed_at = Some(clock.now());
        self.version += 1;
        Some(outcome)
    }

    fn settle(&mut self, declared_final: Option<Money>, config: &CashBoxConfig) -> CloseOutcome {
        let expected = self.expected_final();
        let declared = declared_final.unwrap_or(expected);
        let discrepancy = declared - expected;

        self.final_amount = Some(declared);
        self.status = CashBoxStatus::Closed;
        if discrepancy.abs() > config.discrepancy_tolerance || self.has_pending_previous_boxes {
            self.requires_reconciliation = true;
        }

        CloseOutcome {
            expected_final: expected,
            declared_final: declared,
            discrepancy,
            requires_reconciliation: self.requires_reconciliation,
        }
    }

    /// a manager resolved the flagged box; a reconciled box that was
    /// flagged again by a late mutation may be reconciled once more
    pub fn mark_reconciled(&mut self, actor: UserId, clock: &SafeTimeProvider) -> Result<()> {
        let flagged_again =
            self.status == CashBoxStatus::Reconciled && self.requires_reconciliation;
        if self.status != CashBoxStatus::Closed && !flagged_again {
            return Err(LedgerError::Validation {
                message: format!("cash box {} is {:?}, not closed", self.id, self.status),
            });
        }

        self.status = CashBoxStatus::Reconciled;
        self.requires_reconciliation = false;
        self.closed_by = Some(actor);
        self.reconciled_at = Some(clock.now());
        self.version += 1;
        Ok(())
    }
}
