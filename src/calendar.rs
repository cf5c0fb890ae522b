//! Calendar-period arithmetic.
//!
//! Period boundaries are always resolved by calendar rule, never by fixed
//! day-count offsets, so month and quarter edges (including year rollover
//! and leap years) come out correct.

use chrono::{Datelike, Duration, NaiveDate};

use crate::types::PeriodType;

/// Invariant: month is already normalized to 1..=12 and the day exists in
/// that month, so construction cannot fail for any input we produce.
fn ymd(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("normalized calendar date")
}

/// First day of the month containing `date`
pub fn month_start(date: NaiveDate) -> NaiveDate {
    ymd(date.year(), date.month(), 1)
}

/// Last day of the month containing `date`
pub fn last_day_of_month(date: NaiveDate) -> NaiveDate {
    let (year, month) = add_months(date.year(), date.month(), 1);
    ymd(year, month, 1) - Duration::days(1)
}

/// Step a (year, month) pair by `delta` months, normalizing across year
/// boundaries in either direction
pub fn add_months(year: i32, month: u32, delta: i32) -> (i32, u32) {
    let total = year as i64 * 12 + (month as i64 - 1) + delta as i64;
    let year = total.div_euclid(12) as i32;
    let month = (total.rem_euclid(12) + 1) as u32;
    (year, month)
}

/// First day of the month `delta` months away from the month containing
/// `date`
pub fn month_start_plus(date: NaiveDate, delta: i32) -> NaiveDate {
    let (year, month) = add_months(date.year(), date.month(), delta);
    ymd(year, month, 1)
}

/// First month of the quarter containing `month`
fn quarter_first_month(month: u32) -> u32 {
    ((month - 1) / 3) * 3 + 1
}

/// Calendar-correct last day of the granule starting at `start`
pub fn period_end(period_type: PeriodType, start: NaiveDate) -> NaiveDate {
    match period_type {
        PeriodType::Daily => start,
        PeriodType::Weekly => start + Duration::days(6),
        PeriodType::Monthly => last_day_of_month(start),
        PeriodType::Quarterly => {
            let final_month = quarter_first_month(start.month()) + 2;
            last_day_of_month(ymd(start.year(), final_month, 1))
        }
    }
}

/// Start of the granule containing `date`.
///
/// Weeks start on Monday (ISO convention).
pub fn period_start_containing(period_type: PeriodType, date: NaiveDate) -> NaiveDate {
    match period_type {
        PeriodType::Daily => date,
        PeriodType::Weekly => {
            date - Duration::days(date.weekday().num_days_from_monday() as i64)
        }
        PeriodType::Monthly => month_start(date),
        PeriodType::Quarterly => ymd(date.year(), quarter_first_month(date.month()), 1),
    }
}

/// Start of the immediately preceding same-granularity period
pub fn previous_period_start(period_type: PeriodType, start: NaiveDate) -> NaiveDate {
    match period_type {
        PeriodType::Daily => start - Duration::days(1),
        PeriodType::Weekly => start - Duration::days(7),
        PeriodType::Monthly => month_start_plus(start, -1),
        PeriodType::Quarterly => month_start_plus(start, -3),
    }
}
