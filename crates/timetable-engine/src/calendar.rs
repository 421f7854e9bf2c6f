//! ISO-week arithmetic and the school's period time grid.
//!
//! The period grid maps each period number to a local wall-clock window in the
//! school's timezone. It is the only configuration the engine reads; it is
//! loaded from JSON or built with [`SchoolCalendar::default`].

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TimetableError};
use crate::model::{day_of_week, validate_day, FIRST_PERIOD, LAST_PERIOD, SCHOOL_DAYS};

/// An ISO-8601 week: `(year, week)`, weeks starting on Monday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IsoWeek {
    pub year: i32,
    pub week: u32,
}

impl IsoWeek {
    /// # Errors
    /// Returns `TimetableError::Validation` when the year has no such week
    /// (e.g. week 53 of a 52-week year).
    pub fn new(year: i32, week: u32) -> Result<Self> {
        NaiveDate::from_isoywd_opt(year, week, Weekday::Mon)
            .map(|_| Self { year, week })
            .ok_or_else(|| {
                TimetableError::Validation(format!("{} has no ISO week {}", year, week))
            })
    }

    /// The ISO week a calendar date belongs to.
    pub fn from_date(date: NaiveDate) -> Self {
        let iso = date.iso_week();
        Self {
            year: iso.year(),
            week: iso.week(),
        }
    }

    pub fn monday(&self) -> NaiveDate {
        // Constructed through `new` or `from_date`, so the week exists.
        NaiveDate::from_isoywd_opt(self.year, self.week, Weekday::Mon)
            .unwrap_or(NaiveDate::MIN)
    }

    /// Calendar date of a school day (1 = Monday) in this week.
    pub fn date_of(&self, day_of_week: u8) -> Result<NaiveDate> {
        validate_day(day_of_week)?;
        Ok(self.monday() + Duration::days(i64::from(day_of_week) - 1))
    }

    /// Monday through Friday of this week.
    pub fn school_days(&self) -> DateRange {
        let monday = self.monday();
        DateRange {
            start: monday,
            end: monday + Duration::days(i64::from(SCHOOL_DAYS) - 1),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        IsoWeek::from_date(date) == *self
    }
}

impl fmt::Display for IsoWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-W{:02}", self.year, self.week)
    }
}

/// Inclusive range of calendar dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// The local wall-clock window of one period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodWindow {
    pub number: u8,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl PeriodWindow {
    /// Start inclusive, end exclusive.
    pub fn contains(&self, time: NaiveTime) -> bool {
        self.start <= time && time < self.end
    }
}

/// Timezone and period grid of one school.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchoolCalendar {
    pub timezone: Tz,
    pub periods: Vec<PeriodWindow>,
}

impl Default for SchoolCalendar {
    /// Europe/Berlin, ten 45-minute periods from 08:00 with a 20-minute break
    /// after the second and fourth period and 5 minutes between the others.
    fn default() -> Self {
        let mut periods = Vec::with_capacity(LAST_PERIOD as usize);
        let mut start = NaiveTime::from_hms_opt(8, 0, 0).unwrap_or(NaiveTime::MIN);
        for number in FIRST_PERIOD..=LAST_PERIOD {
            let end = start + Duration::minutes(45);
            periods.push(PeriodWindow { number, start, end });
            let gap = if number == 2 || number == 4 { 20 } else { 5 };
            start = end + Duration::minutes(gap);
        }
        Self {
            timezone: chrono_tz::Europe::Berlin,
            periods,
        }
    }
}

impl SchoolCalendar {
    /// Build a calendar and check its grid.
    ///
    /// # Errors
    /// Returns `TimetableError::Config` when the grid is invalid.
    pub fn new(timezone: Tz, mut periods: Vec<PeriodWindow>) -> Result<Self> {
        periods.sort_by_key(|p| p.number);
        let calendar = Self { timezone, periods };
        calendar.validate()?;
        Ok(calendar)
    }

    /// Parse a calendar from its JSON form:
    ///
    /// ```json
    /// {"timezone": "Europe/Berlin",
    ///  "periods": [{"number": 1, "start": "08:00:00", "end": "08:45:00"}]}
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: SchoolCalendar = serde_json::from_str(json)
            .map_err(|e| TimetableError::Config(format!("invalid calendar JSON: {}", e)))?;
        Self::new(raw.timezone, raw.periods)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            TimetableError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    fn validate(&self) -> Result<()> {
        if self.periods.is_empty() {
            return Err(TimetableError::Config("no periods defined".to_string()));
        }
        for window in &self.periods {
            if !(FIRST_PERIOD..=LAST_PERIOD).contains(&window.number) {
                return Err(TimetableError::Config(format!(
                    "period number {} outside {}..={}",
                    window.number, FIRST_PERIOD, LAST_PERIOD
                )));
            }
            if window.start >= window.end {
                return Err(TimetableError::Config(format!(
                    "period {} ends before it starts",
                    window.number
                )));
            }
        }
        for pair in self.periods.windows(2) {
            if pair[0].number == pair[1].number {
                return Err(TimetableError::Config(format!(
                    "period {} defined twice",
                    pair[0].number
                )));
            }
            if pair[1].start < pair[0].end {
                return Err(TimetableError::Config(format!(
                    "period {} overlaps period {}",
                    pair[1].number, pair[0].number
                )));
            }
        }
        Ok(())
    }

    pub fn window(&self, period: u8) -> Option<&PeriodWindow> {
        self.periods.iter().find(|p| p.number == period)
    }

    pub fn has_period(&self, period: u8) -> bool {
        self.window(period).is_some()
    }

    /// The period whose window contains a local time, if any.
    pub fn period_at(&self, time: NaiveTime) -> Option<u8> {
        self.periods.iter().find(|p| p.contains(time)).map(|p| p.number)
    }

    /// The school-local calendar date of an instant.
    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.timezone).date_naive()
    }

    /// Convert an instant into school-local (week, day, period) coordinates.
    ///
    /// Returns `None` on weekends and outside every period window.
    pub fn coordinates_at(&self, instant: DateTime<Utc>) -> Option<SlotCoordinates> {
        let local = instant.with_timezone(&self.timezone);
        let date = local.date_naive();
        let day = day_of_week(date);
        if day > SCHOOL_DAYS {
            return None;
        }
        let period = self.period_at(local.time())?;
        Some(SlotCoordinates {
            week: IsoWeek::from_date(date),
            date,
            day_of_week: day,
            period,
        })
    }
}

/// A (week, day, period) position in school-local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotCoordinates {
    pub week: IsoWeek,
    pub date: NaiveDate,
    pub day_of_week: u8,
    pub period: u8,
}
