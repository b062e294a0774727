use chrono::{Datelike, Duration, Months, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::types::Periodicity;

/// one entry of a generated repayment schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub number: u32,
    pub due_date: NaiveDate,
    pub amount: Money,
}

/// generate the ordered repayment schedule for a credit.
///
/// The walk starts the day after delivery: installment 1 lands on the next
/// business day, and each later installment adds one period to the previous
/// due date, snapping one day forward if the result falls on the rest day.
/// Pure and idempotent: identical inputs always yield identical output.
pub fn generate_schedule(
    installment_amount: Money,
    total_installments: u32,
    periodicity: Periodicity,
    delivery_date: NaiveDate,
    rest_day: Weekday,
) -> Vec<ScheduleEntry> {
    due_dates(total_installments, periodicity, delivery_date, rest_day)
        .into_iter()
        .enumerate()
        .map(|(i, due_date)| ScheduleEntry {
            number: i as u32 + 1,
            due_date,
            amount: installment_amount,
        })
        .collect()
}

/// last due date of the schedule walk; the persisted end date must always
/// equal `generate_schedule(..)[n-1].due_date`, so this shares the walk
/// instead of using a closed-form formula.
///
/// A zero installment count falls back to a fixed span from delivery.
pub fn calculate_end_date(
    delivery_date: NaiveDate,
    total_installments: u32,
    periodicity: Periodicity,
    rest_day: Weekday,
    default_span_days: i64,
) -> NaiveDate {
    due_dates(total_installments, periodicity, delivery_date, rest_day)
        .last()
        .copied()
        .unwrap_or(delivery_date + Duration::days(default_span_days))
}

/// number of installments whose due date is on or before `as_of`
pub fn installments_due_by(
    total_installments: u32,
    periodicity: Periodicity,
    delivery_date: NaiveDate,
    rest_day: Weekday,
    as_of: NaiveDate,
) -> u32 {
    due_dates(total_installments, periodicity, delivery_date, rest_day)
        .into_iter()
        .filter(|d| *d <= as_of)
        .count() as u32
}

/// the schedule walk itself
fn due_dates(
    total_installments: u32,
    periodicity: Periodicity,
    delivery_date: NaiveDate,
    rest_day: Weekday,
) -> Vec<NaiveDate> {
    let mut dates = Vec::with_capacity(total_installments as usize);
    if total_installments == 0 {
        return dates;
    }

    // installment 1: first business day after delivery
    let mut due = delivery_date + Duration::days(1);
    while due.weekday() == rest_day {
        due += Duration::days(1);
    }
    dates.push(due);

    for _ in 1..total_installments {
        due = advance_period(due, periodicity);
        if due.weekday() == rest_day {
            due += Duration::days(1);
        }
        dates.push(due);
    }

    dates
}

fn advance_period(from: NaiveDate, periodicity: Periodicity) -> NaiveDate {
    match periodicity.days() {
        Some(days) => from + Duration::days(days),
        // monthly advances by calendar month, clamping at month ends
        None => from
            .checked_add_months(Months::new(1))
            .unwrap_or(from + Duration::days(30)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_no_due_date_on_rest_day() {
        let delivery = date(2024, 1, 1);
        for periodicity in [
            Periodicity::Daily,
            Periodicity::Weekly,
            Periodicity::Biweekly,
            Periodicity::Monthly,
        ] {
            let schedule = generate_schedule(
                Money::from_major(100),
                30,
                periodicity,
                delivery,
                Weekday::Sun,
            );
            assert_eq!(schedule.len(), 30);
            for entry in &schedule {
                assert_ne!(entry.due_date.weekday(), Weekday::Sun, "{periodicity:?}");
            }
        }
    }

    #[test]
    fn test_weekly_from_monday_delivery() {
        // delivered Monday: first due is Tuesday, the next business day
        let delivery = date(2024, 1, 1);
        let schedule = generate_schedule(
            Money::from_major(120),
            10,
            Periodicity::Weekly,
            delivery,
            Weekday::Sun,
        );

        assert_eq!(schedule[0].due_date, date(2024, 1, 2));
        assert_eq!(schedule[0].due_date.weekday(), Weekday::Tue);
        assert_eq!(schedule[9].due_date, date(2024, 3, 5));
        assert_eq!(schedule[9].number, 10);
    }

    #[test]
    fn test_daily_skips_rest_day() {
        // delivered Friday: Saturday, then Sunday snaps to Monday
        let delivery = date(2024, 1, 5);
        let schedule = generate_schedule(
            Money::from_major(10),
            4,
            Periodicity::Daily,
            delivery,
            Weekday::Sun,
        );

        let dues: Vec<NaiveDate> = schedule.iter().map(|e| e.due_date).collect();
        assert_eq!(
            dues,
            vec![
                date(2024, 1, 6),  // Sat
                date(2024, 1, 8),  // Sun snapped to Mon
                date(2024, 1, 9),  // Tue
                date(2024, 1, 10), // Wed
            ]
        );
    }

    #[test]
    fn test_first_due_snaps_past_rest_day() {
        // delivered Saturday: day after is the rest day itself
        let delivery = date(2024, 1, 6);
        let schedule = generate_schedule(
            Money::from_major(50),
            1,
            Periodicity::Weekly,
            delivery,
            Weekday::Sun,
        );
        assert_eq!(schedule[0].due_date, date(2024, 1, 8)); // Monday
    }

    #[test]
    fn test_monthly_advances_calendar_month() {
        let delivery = date(2024, 1, 30);
        let schedule = generate_schedule(
            Money::from_major(400),
            3,
            Periodicity::Monthly,
            delivery,
            Weekday::Sun,
        );

        assert_eq!(schedule[0].due_date, date(2024, 1, 31));
        // Feb 31 clamps to Feb 29 (leap year)
        assert_eq!(schedule[1].due_date, date(2024, 2, 29));
        assert_eq!(schedule[2].due_date, date(2024, 3, 29));
    }

    #[test]
    fn test_end_date_matches_last_due_date() {
        let delivery = date(2024, 3, 14);
        for periodicity in [
            Periodicity::Daily,
            Periodicity::Weekly,
            Periodicity::Biweekly,
            Periodicity::Monthly,
        ] {
            for n in [1u32, 5, 12, 40] {
                let schedule = generate_schedule(
                    Money::from_major(75),
                    n,
                    periodicity,
                    delivery,
                    Weekday::Sun,
                );
                let end = calculate_end_date(delivery, n, periodicity, Weekday::Sun, 30);
                assert_eq!(end, schedule.last().unwrap().due_date);
            }
        }
    }

    #[test]
    fn test_zero_installments_falls_back_to_default_span() {
        let delivery = date(2024, 1, 1);
        let end = calculate_end_date(delivery, 0, Periodicity::Daily, Weekday::Sun, 30);
        assert_eq!(end, date(2024, 1, 31));
        assert!(generate_schedule(
            Money::from_major(10),
            0,
            Periodicity::Daily,
            delivery,
            Weekday::Sun
        )
        .is_empty());
    }

    #[test]
    fn test_idempotent() {
        let delivery = date(2024, 6, 3);
        let a = generate_schedule(
            Money::from_major(90),
            15,
            Periodicity::Biweekly,
            delivery,
            Weekday::Sun,
        );
        let b = generate_schedule(
            Money::from_major(90),
            15,
            Periodicity::Biweekly,
            delivery,
            Weekday::Sun,
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_installments_due_by() {
        let delivery = date(2024, 1, 1);
        // weekly dues: Jan 2, 9, 16, 23 ...
        assert_eq!(
            installments_due_by(10, Periodicity::Weekly, delivery, Weekday::Sun, date(2024, 1, 1)),
            0
        );
        assert_eq!(
            installments_due_by(10, Periodicity::Weekly, delivery, Weekday::Sun, date(2024, 1, 2)),
            1
        );
        assert_eq!(
            installments_due_by(10, Periodicity::Weekly, delivery, Weekday::Sun, date(2024, 1, 20)),
            3
        );
        assert_eq!(
            installments_due_by(10, Periodicity::Weekly, delivery, Weekday::Sun, date(2025, 1, 1)),
            10
        );
    }
}
