use chrono::NaiveTime;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::money::round2;
use crate::model::attendance::AttendanceDay;

/// Hours credited for a present day that has no explicit figure.
pub const DEFAULT_DAY_HOURS: Decimal = dec!(8.0);

/// Hours a single day contributes. Absent days contribute nothing.
pub fn day_hours(present: bool, hours_worked: Option<Decimal>) -> Decimal {
    if !present {
        return Decimal::ZERO;
    }
    match hours_worked {
        Some(h) if h.is_sign_negative() => Decimal::ZERO,
        Some(h) => h,
        None => DEFAULT_DAY_HOURS,
    }
}

pub fn total_hours<'a, I>(days: I) -> Decimal
where
    I: IntoIterator<Item = &'a AttendanceDay>,
{
    days.into_iter()
        .map(|d| day_hours(d.present, d.hours_worked))
        .sum()
}

/// Elapsed hours between clock-in and clock-out, 0 when clock-out precedes clock-in.
pub fn hours_between(clock_in: NaiveTime, clock_out: NaiveTime) -> Decimal {
    let seconds = (clock_out - clock_in).num_seconds();
    if seconds <= 0 {
        return Decimal::ZERO;
    }
    round2(Decimal::from(seconds) / dec!(3600))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day(n: u32, present: bool, hours: Option<Decimal>) -> AttendanceDay {
        AttendanceDay {
            id: n as u64,
            attendance_id: 1,
            date: NaiveDate::from_ymd_opt(2026, 3, n).unwrap(),
            present,
            hours_worked: hours,
            clock_in: None,
            clock_out: None,
        }
    }

    #[test]
    fn present_days_default_to_eight_hours() {
        let days: Vec<_> = (1..=5).map(|n| day(n, true, None)).chain([day(6, false, None)]).collect();
        assert_eq!(total_hours(&days), dec!(40.0));
    }

    #[test]
    fn absent_days_never_contribute() {
        let days = vec![day(1, false, Some(dec!(9.50))), day(2, true, Some(dec!(4.25)))];
        assert_eq!(total_hours(&days), dec!(4.25));
    }

    #[test]
    fn explicit_zero_hours_stays_zero() {
        assert_eq!(day_hours(true, Some(Decimal::ZERO)), Decimal::ZERO);
    }

    #[test]
    fn empty_list_is_zero() {
        assert_eq!(total_hours(&Vec::<AttendanceDay>::new()), Decimal::ZERO);
    }

    #[test]
    fn hours_between_rounds_to_cents() {
        let start = NaiveTime::from_hms_opt(8, 0, 0).unwrap();
        let end = NaiveTime::from_hms_opt(16, 20, 0).unwrap();
        assert_eq!(hours_between(start, end), dec!(8.33));
        assert_eq!(hours_between(end, start), Decimal::ZERO);
    }
}
