use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::credit::Credit;
use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::types::{
    CashBoxId, CreditId, PaymentApplication, PaymentClassification, PaymentId, PaymentMethod,
    PaymentStatus, UserId,
};

/// a single collection transaction
///
/// `applied_amount` is the portion that reduced the credit's balance when
/// the payment was applied; it differs from `amount` only on overpayment,
/// where the excess is reported to the caller instead of driving the
/// balance negative. Reversal restores exactly the applied portion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub credit_id: CreditId,
    pub amount: Money,
    pub applied_amount: Money,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub installment_number: Option<u32>,
    pub collected_by: UserId,
    pub cash_box: Option<CashBoxId>,
    pub timestamp: DateTime<Utc>,
}

impl Payment {
    /// portion counting against the credit balance
    pub fn balance_effect(&self) -> Money {
        if self.status.is_effective() {
            self.applied_amount
        } else {
            Money::ZERO
        }
    }

    /// portion counting toward total paid
    pub fn paid_effect(&self) -> Money {
        if self.status == PaymentStatus::Completed {
            self.applied_amount
        } else {
            Money::ZERO
        }
    }
}

/// classify an incoming amount against the outstanding balance and the
/// regular installment amount
pub fn classify_payment(
    balance: Money,
    installment_amount: Money,
    amount: Money,
) -> PaymentClassification {
    if amount > balance {
        PaymentClassification::FullPayment {
            excess: amount - balance,
        }
    } else if amount >= installment_amount {
        PaymentClassification::Regular {
            installments_covered: amount.whole_units_of(installment_amount),
        }
    } else {
        PaymentClassification::Partial {
            shortfall: installment_amount - amount,
        }
    }
}

/// apply a newly created payment to its credit.
///
/// `others_installment_total` is the sum of balance effects of every other
/// non-cancelled/non-failed payment already credited against the same
/// installment number; the caller computes it inside the same transaction.
pub fn apply_create(
    credit: &mut Credit,
    payment: &mut Payment,
    others_installment_total: Money,
) -> Result<PaymentApplication> {
    if !payment.amount.is_positive() {
        return Err(LedgerError::InvalidPaymentAmount {
            amount: payment.amount,
        });
    }

    let classification = classify_payment(credit.balance, credit.installment_amount, payment.amount);
    debug!(credit = %credit.id, amount = %payment.amount, ?classification, "payment classified");

    payment.applied_amount = payment.amount.min(credit.balance);
    let effect = payment.balance_effect();

    credit.balance -= effect;
    credit.total_paid += payment.paid_effect();

    let mut installment_completed = payment.installment_number.is_some()
        && crossed_up(
            others_installment_total,
            others_installment_total + effect,
            credit.installment_amount,
        );
    if installment_completed {
        if credit.paid_installments < credit.total_installments {
            credit.paid_installments += 1;
        } else {
            // counter already at the cap: nothing completed
            installment_completed = false;
        }
    }

    if credit.balance.is_zero() {
        credit.mark_completed();
    }
    credit.version += 1;

    Ok(PaymentApplication {
        classification,
        balance_delta: effect,
        installment_completed,
    })
}

/// re-apply only the delta after a payment's amount or status changed
pub fn apply_update(
    credit: &mut Credit,
    payment: &mut Payment,
    new_amount: Option<Money>,
    new_status: Option<PaymentStatus>,
    others_installment_total: Money,
) -> Result<Money> {
    let amount = new_amount.unwrap_or(payment.amount);
    let status = new_status.unwrap_or(payment.status);
    if !amount.is_positive() {
        return Err(LedgerError::InvalidPaymentAmount { amount });
    }
    if amount == payment.amount && status == payment.status {
        return Ok(Money::ZERO);
    }

    let old_balance_effect = payment.balance_effect();
    let old_paid_effect = payment.paid_effect();

    payment.amount = amount;
    payment.status = status;
    // reapply against the balance as it stood before this payment
    let balance_before = credit.balance + old_balance_effect;
    payment.applied_amount = amount.min(balance_before);

    let new_balance_effect = payment.balance_effect();
    let delta = new_balance_effect - old_balance_effect;

    credit.balance = balance_before - new_balance_effect;
    credit.total_paid += payment.paid_effect() - old_paid_effect;

    if payment.installment_number.is_some() {
        adjust_installment_counter(
            credit,
            others_installment_total + old_balance_effect,
            others_installment_total + new_balance_effect,
        );
    }

    if credit.balance.is_zero() {
        credit.mark_completed();
    } else {
        credit.reopen_if_reversed();
    }
    credit.version += 1;

    Ok(delta)
}

/// symmetrically undo a payment's contribution before it is removed
pub fn apply_delete(
    credit: &mut Credit,
    payment: &Payment,
    others_installment_total: Money,
) -> Money {
    let effect = payment.balance_effect();

    credit.balance += effect;
    credit.total_paid -= payment.paid_effect();

    if payment.installment_number.is_some() {
        adjust_installment_counter(
            credit,
            others_installment_total + effect,
            others_installment_total,
        );
    }

    credit.reopen_if_reversed();
    credit.version += 1;
    effect
}

/// recompute the paid-installment count from the payments themselves.
///
/// This is the explicit consistency-check/repair path; it must always agree
/// with the persisted counter the ledger maintains incrementally.
pub fn recount_paid_installments(
    installment_amount: Money,
    total_installments: u32,
    payments: &[&Payment],
) -> u32 {
    if !installment_amount.is_positive() {
        return 0;
    }
    let mut count = 0;
    for number in 1..=total_installments {
        let total: Money = payments
            .iter()
            .filter(|p| p.installment_number == Some(number))
            .map(|p| p.balance_effect())
            .fold(Money::ZERO, |acc, x| acc + x);
        if total >= installment_amount {
            count += 1;
        }
    }
    count
}

/// recompute the balance from the payments themselves
pub fn recompute_balance(total_amount: Money, payments: &[&Payment]) -> Money {
    let applied: Money = payments
        .iter()
        .map(|p| p.balance_effect())
        .fold(Money::ZERO, |acc, x| acc + x);
    (total_amount - applied).max(Money::ZERO)
}

fn crossed_up(before: Money, after: Money, threshold: Money) -> bool {
    threshold.is_positive() && before < threshold && after >= threshold
}

fn adjust_installment_counter(credit: &mut Credit, before: Money, after: Money) {
    let threshold = credit.installment_amount;
    if crossed_up(before, after, threshold) {
        if credit.paid_installments < credit.total_installments {
            credit.paid_installments += 1;
        }
    } else if crossed_up(after, before, threshold) && credit.paid_installments > 0 {
        credit.paid_installments -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScheduleConfig;
    use crate::decimal::Rate;
    use crate::types::Periodicity;
    use chrono::{NaiveDate, TimeZone, Weekday};
    use hourglass_rs::{SafeTimeProvider, TimeSource};
    use uuid::Uuid;

    fn active_credit(clock: &SafeTimeProvider) -> Credit {
        let mut credit = Credit::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            Money::from_major(1_000),
            Rate::from_percentage(20),
            Periodicity::Weekly,
            12,
            clock,
        )
        .unwrap();
        credit
            .approve_for_delivery(
                Uuid::new_v4(),
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                None,
                clock,
            )
            .unwrap();
        credit
            .deliver_to_client(
                Uuid::new_v4(),
                None,
                &ScheduleConfig {
                    rest_day: Weekday::Sun,
                    default_span_days: 30,
                },
                clock,
            )
            .unwrap();
        credit
    }

    fn payment(credit: &Credit, amount: i64, installment: Option<u32>) -> Payment {
        Payment {
            id: Uuid::new_v4(),
            credit_id: credit.id,
            amount: Money::from_major(amount),
            applied_amount: Money::ZERO,
            method: PaymentMethod::Cash,
            status: PaymentStatus::Completed,
            installment_number: installment,
            collected_by: Uuid::new_v4(),
            cash_box: None,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 9, 0, 0).unwrap(),
        }
    }

    fn clock() -> SafeTimeProvider {
        SafeTimeProvider::new(TimeSource::Test(
            Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap(),
        ))
    }

    #[test]
    fn test_classification_multiple_installments() {
        let c = classify_payment(
            Money::from_major(300),
            Money::from_major(100),
            Money::from_major(250),
        );
        assert_eq!(
            c,
            PaymentClassification::Regular {
                installments_covered: 2
            }
        );
    }

    #[test]
    fn test_classification_full_payment_with_excess() {
        let c = classify_payment(
            Money::from_major(50),
            Money::from_major(100),
            Money::from_major(80),
        );
        assert_eq!(
            c,
            PaymentClassification::FullPayment {
                excess: Money::from_major(30)
            }
        );
    }

    #[test]
    fn test_classification_partial_shortfall() {
        let c = classify_payment(
            Money::from_major(300),
            Money::from_major(100),
            Money::from_major(40),
        );
        assert_eq!(
            c,
            PaymentClassification::Partial {
                shortfall: Money::from_major(60)
            }
        );
    }

    #[test]
    fn test_create_updates_counters() {
        let clock = clock();
        let mut credit = active_credit(&clock);
        let mut p = payment(&credit, 100, Some(1));

        let application = apply_create(&mut credit, &mut p, Money::ZERO).unwrap();

        assert_eq!(credit.balance, Money::from_major(1_100));
        assert_eq!(credit.total_paid, Money::from_major(100));
        assert_eq!(credit.paid_installments, 1);
        assert!(application.installment_completed);
        assert_eq!(application.balance_delta, Money::from_major(100));
    }

    #[test]
    fn test_partial_payments_complete_installment_once() {
        let clock = clock();
        let mut credit = active_credit(&clock);

        let mut first = payment(&credit, 60, Some(1));
        let a = apply_create(&mut credit, &mut first, Money::ZERO).unwrap();
        assert!(!a.installment_completed);
        assert_eq!(credit.paid_installments, 0);

        let mut second = payment(&credit, 60, Some(1));
        let a = apply_create(&mut credit, &mut second, first.balance_effect()).unwrap();
        assert!(a.installment_completed);
        assert_eq!(credit.paid_installments, 1);

        // a third payment on the same installment must not double count
        let mut third = payment(&credit, 20, Some(1));
        let others = first.balance_effect() + second.balance_effect();
        let a = apply_create(&mut credit, &mut third, others).unwrap();
        assert!(!a.installment_completed);
        assert_eq!(credit.paid_installments, 1);
    }

    #[test]
    fn test_capped_counter_reports_no_completion() {
        let clock = clock();
        let mut credit = active_credit(&clock);
        credit.paid_installments = credit.total_installments;

        let mut p = payment(&credit, 100, Some(1));
        let application = apply_create(&mut credit, &mut p, Money::ZERO).unwrap();

        assert!(!application.installment_completed);
        assert_eq!(credit.paid_installments, credit.total_installments);
    }

    #[test]
    fn test_overpayment_clamps_balance_at_zero() {
        let clock = clock();
        let mut credit = active_credit(&clock);
        credit.balance = Money::from_major(50);
        credit.total_paid = Money::from_major(1_150);

        let mut p = payment(&credit, 80, None);
        let application = apply_create(&mut credit, &mut p, Money::ZERO).unwrap();

        assert_eq!(credit.balance, Money::ZERO);
        assert_eq!(p.applied_amount, Money::from_major(50));
        assert_eq!(
            application.classification,
            PaymentClassification::FullPayment {
                excess: Money::from_major(30)
            }
        );
        assert_eq!(credit.status, crate::types::CreditStatus::Completed);
    }

    #[test]
    fn test_create_then_delete_round_trip() {
        let clock = clock();
        let mut credit = active_credit(&clock);
        let balance_before = credit.balance;
        let paid_before = credit.total_paid;
        let installments_before = credit.paid_installments;

        let mut p = payment(&credit, 100, Some(1));
        apply_create(&mut credit, &mut p, Money::ZERO).unwrap();
        apply_delete(&mut credit, &p, Money::ZERO);

        assert_eq!(credit.balance, balance_before);
        assert_eq!(credit.total_paid, paid_before);
        assert_eq!(credit.paid_installments, installments_before);
    }

    #[test]
    fn test_full_payment_then_delete_reopens() {
        let clock = clock();
        let mut credit = active_credit(&clock);
        credit.balance = Money::from_major(100);
        credit.total_paid = Money::from_major(1_100);

        let mut p = payment(&credit, 100, None);
        apply_create(&mut credit, &mut p, Money::ZERO).unwrap();
        assert_eq!(credit.status, crate::types::CreditStatus::Completed);

        apply_delete(&mut credit, &p, Money::ZERO);
        assert_eq!(credit.balance, Money::from_major(100));
        assert_eq!(credit.status, crate::types::CreditStatus::Active);
    }

    #[test]
    fn test_update_amount_applies_delta_only() {
        let clock = clock();
        let mut credit = active_credit(&clock);

        let mut p = payment(&credit, 100, Some(1));
        apply_create(&mut credit, &mut p, Money::ZERO).unwrap();
        assert_eq!(credit.paid_installments, 1);

        // shrink the payment below the installment amount
        apply_update(
            &mut credit,
            &mut p,
            Some(Money::from_major(40)),
            None,
            Money::ZERO,
        )
        .unwrap();

        assert_eq!(credit.balance, Money::from_major(1_160));
        assert_eq!(credit.total_paid, Money::from_major(40));
        assert_eq!(credit.paid_installments, 0);

        // grow it back
        apply_update(
            &mut credit,
            &mut p,
            Some(Money::from_major(120)),
            None,
            Money::ZERO,
        )
        .unwrap();
        assert_eq!(credit.balance, Money::from_major(1_080));
        assert_eq!(credit.paid_installments, 1);
    }

    #[test]
    fn test_update_status_transitions_total_paid() {
        let clock = clock();
        let mut credit = active_credit(&clock);

        let mut p = payment(&credit, 100, None);
        apply_create(&mut credit, &mut p, Money::ZERO).unwrap();
        assert_eq!(credit.total_paid, Money::from_major(100));

        // completed -> cancelled restores balance and total paid
        apply_update(
            &mut credit,
            &mut p,
            None,
            Some(PaymentStatus::Cancelled),
            Money::ZERO,
        )
        .unwrap();
        assert_eq!(credit.balance, Money::from_major(1_200));
        assert_eq!(credit.total_paid, Money::ZERO);

        // cancelled -> completed applies it again
        apply_update(
            &mut credit,
            &mut p,
            None,
            Some(PaymentStatus::Completed),
            Money::ZERO,
        )
        .unwrap();
        assert_eq!(credit.balance, Money::from_major(1_100));
        assert_eq!(credit.total_paid, Money::from_major(100));
    }

    #[test]
    fn test_noop_update() {
        let clock = clock();
        let mut credit = active_credit(&clock);
        let mut p = payment(&credit, 100, None);
        apply_create(&mut credit, &mut p, Money::ZERO).unwrap();
        let version = credit.version;

        let delta = apply_update(&mut credit, &mut p, None, None, Money::ZERO).unwrap();
        assert_eq!(delta, Money::ZERO);
        assert_eq!(credit.version, version);
    }

    #[test]
    fn test_replay_invariant() {
        // balance == total_amount - sum of effective amounts, whatever the
        // interleaving of edits
        let clock = clock();
        let mut credit = active_credit(&clock);

        let mut p1 = payment(&credit, 100, Some(1));
        apply_create(&mut credit, &mut p1, Money::ZERO).unwrap();
        let mut p2 = payment(&credit, 300, Some(2));
        apply_create(&mut credit, &mut p2, Money::ZERO).unwrap();
        apply_update(
            &mut credit,
            &mut p2,
            Some(Money::from_major(150)),
            None,
            Money::ZERO,
        )
        .unwrap();
        apply_delete(&mut credit, &p1, Money::ZERO);

        let expected = credit.total_amount - p2.balance_effect();
        assert_eq!(credit.balance, expected);
        assert_eq!(recompute_balance(credit.total_amount, &[&p2]), expected);
    }

    #[test]
    fn test_recount_agrees_with_counter() {
        let clock = clock();
        let mut credit = active_credit(&clock);

        let mut p1 = payment(&credit, 120, Some(1));
        apply_create(&mut credit, &mut p1, Money::ZERO).unwrap();
        let mut p2 = payment(&credit, 60, Some(2));
        apply_create(&mut credit, &mut p2, Money::ZERO).unwrap();
        let mut p3 = payment(&credit, 60, Some(2));
        apply_create(&mut credit, &mut p3, p2.balance_effect()).unwrap();

        let recounted = recount_paid_installments(
            credit.installment_amount,
            credit.total_installments,
            &[&p1, &p2, &p3],
        );
        assert_eq!(recounted, credit.paid_installments);
        assert_eq!(recounted, 2);
    }

    #[test]
    fn test_rejects_non_positive_amounts() {
        let clock = clock();
        let mut credit = active_credit(&clock);
        let mut p = payment(&credit, 0, None);
        assert!(matches!(
            apply_create(&mut credit, &mut p, Money::ZERO),
            Err(LedgerError::InvalidPaymentAmount { .. })
        ));
    }
}
