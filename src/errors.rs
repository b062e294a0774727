use chrono::NaiveDate;
use thiserror::Error;

use crate::decimal::Money;
use crate::types::{CashBoxId, ClientId, CreditId, CreditStatus, PaymentId};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("validation failed: {message}")]
    Validation {
        message: String,
    },

    #[error("invalid payment amount: {amount}")]
    InvalidPaymentAmount {
        amount: Money,
    },

    #[error("{operation} not allowed: credit is {current:?}")]
    IllegalTransition {
        operation: &'static str,
        current: CreditStatus,
    },

    #[error("client not eligible for new credit: {reason}")]
    Eligibility {
        reason: String,
    },

    #[error("concurrent modification: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        expected: u64,
        actual: u64,
    },

    #[error("cash box already exists for collector {collector} on {date}")]
    DuplicateCashBox {
        collector: crate::types::UserId,
        date: NaiveDate,
    },

    #[error("credit not found: {id}")]
    CreditNotFound {
        id: CreditId,
    },

    #[error("payment not found: {id}")]
    PaymentNotFound {
        id: PaymentId,
    },

    #[error("cash box not found: {id}")]
    CashBoxNotFound {
        id: CashBoxId,
    },

    #[error("client not found: {id}")]
    ClientNotFound {
        id: ClientId,
    },

    #[error("no category matches {overdue_count} overdue installments")]
    NoMatchingCategory {
        overdue_count: u32,
    },

    #[error("invalid date: {message}")]
    InvalidDate {
        message: String,
    },
}

impl LedgerError {
    /// conflicts are safe to retry after re-reading state
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::ConcurrencyConflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
