//! Tests for ISO-week arithmetic and the period grid.

use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use timetable_engine::calendar::{IsoWeek, PeriodWindow, SchoolCalendar};
use timetable_engine::error::TimetableError;

fn time(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

#[test]
fn iso_week_of_new_year_belongs_to_previous_year() {
    // 2027-01-01 is a Friday in ISO week 2026-W53.
    let week = IsoWeek::from_date(NaiveDate::from_ymd_opt(2027, 1, 1).unwrap());
    assert_eq!(week, IsoWeek::new(2026, 53).unwrap());
    assert_eq!(week.monday(), NaiveDate::from_ymd_opt(2026, 12, 28).unwrap());
}

#[test]
fn nonexistent_week_is_rejected() {
    // 2025 has 52 ISO weeks.
    assert!(matches!(
        IsoWeek::new(2025, 53),
        Err(TimetableError::Validation(_))
    ));
    assert!(IsoWeek::new(2026, 0).is_err());
}

#[test]
fn school_days_span_monday_to_friday() {
    let week = IsoWeek::new(2026, 10).unwrap();
    let range = week.school_days();
    assert_eq!(range.start, NaiveDate::from_ymd_opt(2026, 3, 2).unwrap());
    assert_eq!(range.end, NaiveDate::from_ymd_opt(2026, 3, 6).unwrap());
    assert_eq!(week.date_of(3).unwrap(), NaiveDate::from_ymd_opt(2026, 3, 4).unwrap());
    assert!(week.date_of(6).is_err());
    assert_eq!(week.to_string(), "2026-W10");
}

#[test]
fn default_grid_has_ten_periods_with_long_breaks() {
    let calendar = SchoolCalendar::default();
    assert_eq!(calendar.periods.len(), 10);
    assert_eq!(calendar.window(1).unwrap().start, time(8, 0));
    assert_eq!(calendar.window(3).unwrap().start, time(9, 55));
    assert_eq!(calendar.period_at(time(9, 40)), None);
    assert_eq!(calendar.period_at(time(10, 39)), Some(3));
    assert_eq!(calendar.period_at(time(10, 40)), None, "end is exclusive");
}

#[test]
fn calendar_loads_from_json() {
    let json = r#"{
        "timezone": "Europe/Vienna",
        "periods": [
            {"number": 2, "start": "08:55:00", "end": "09:45:00"},
            {"number": 1, "start": "08:00:00", "end": "08:50:00"}
        ]
    }"#;

    let calendar = SchoolCalendar::from_json(json).unwrap();

    assert_eq!(calendar.timezone, chrono_tz::Europe::Vienna);
    assert_eq!(calendar.periods[0].number, 1, "periods are sorted");
    assert!(!calendar.has_period(3));
}

#[test]
fn unknown_timezone_is_a_config_error() {
    let json = r#"{"timezone": "Mars/Olympus", "periods": []}"#;
    assert!(matches!(
        SchoolCalendar::from_json(json),
        Err(TimetableError::Config(_))
    ));
}

#[test]
fn overlapping_windows_are_rejected() {
    let periods = vec![
        PeriodWindow { number: 1, start: time(8, 0), end: time(9, 0) },
        PeriodWindow { number: 2, start: time(8, 30), end: time(9, 30) },
    ];
    assert!(matches!(
        SchoolCalendar::new(chrono_tz::Europe::Berlin, periods),
        Err(TimetableError::Config(_))
    ));
}

#[test]
fn duplicate_and_out_of_range_numbers_are_rejected() {
    let dup = vec![
        PeriodWindow { number: 1, start: time(8, 0), end: time(8, 45) },
        PeriodWindow { number: 1, start: time(9, 0), end: time(9, 45) },
    ];
    assert!(SchoolCalendar::new(chrono_tz::UTC, dup).is_err());

    let eleventh = vec![PeriodWindow { number: 11, start: time(8, 0), end: time(8, 45) }];
    assert!(SchoolCalendar::new(chrono_tz::UTC, eleventh).is_err());

    let inverted = vec![PeriodWindow { number: 1, start: time(9, 0), end: time(8, 0) }];
    assert!(SchoolCalendar::new(chrono_tz::UTC, inverted).is_err());
}

#[test]
fn coordinates_use_school_timezone() {
    let calendar = SchoolCalendar::default();
    // 23:30 UTC Sunday is 00:30 Monday in Berlin: a school day, but no period.
    let late = Utc.with_ymd_and_hms(2026, 3, 1, 23, 30, 0).unwrap();
    assert!(calendar.coordinates_at(late).is_none());

    // 07:05 UTC Monday is 08:05 in Berlin: period 1.
    let morning = Utc.with_ymd_and_hms(2026, 3, 2, 7, 5, 0).unwrap();
    let c = calendar.coordinates_at(morning).unwrap();
    assert_eq!((c.day_of_week, c.period), (1, 1));
    assert_eq!(c.date, NaiveDate::from_ymd_opt(2026, 3, 2).unwrap());
}
