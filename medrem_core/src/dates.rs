//! Date and time helpers.
//!
//! Everything here works on local wall-clock values (`NaiveDate`,
//! `NaiveDateTime`); the only time zone the engine knows about is the local
//! day boundary.

use crate::{Error, Result};
use chrono::{Datelike, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

/// Source of "now" for everything that depends on the current time
pub trait Clock {
    fn now(&self) -> NaiveDateTime;

    fn today(&self) -> NaiveDate {
        self.now().date()
    }
}

/// Local system wall clock
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Settable clock for tests and replays.
///
/// Clones share the same instant, so a test can keep a handle and move time
/// forward while a tracker owns the other copy.
#[derive(Clone, Debug)]
pub struct FixedClock {
    now: Arc<Mutex<NaiveDateTime>>,
}

impl FixedClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *guard += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A time of day with minute precision, written `HH:MM`
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DoseTime(NaiveTime);

impl DoseTime {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(Self)
    }

    pub fn as_naive(&self) -> NaiveTime {
        self.0
    }

    /// Minutes since midnight
    pub fn minute_of_day(&self) -> i64 {
        i64::from(self.0.hour()) * 60 + i64::from(self.0.minute())
    }
}

impl FromStr for DoseTime {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let (h, m) = trimmed
            .split_once(':')
            .ok_or_else(|| Error::validation(format!("invalid time '{}', expected HH:MM", s)))?;
        let digits = |part: &str| part.len() == 2 && part.bytes().all(|b| b.is_ascii_digit());
        if !digits(h) || !digits(m) {
            return Err(Error::validation(format!(
                "invalid time '{}', expected HH:MM",
                s
            )));
        }
        let hour: u32 = h
            .parse()
            .map_err(|_| Error::validation(format!("invalid hour in '{}'", s)))?;
        let minute: u32 = m
            .parse()
            .map_err(|_| Error::validation(format!("invalid minute in '{}'", s)))?;
        Self::new(hour, minute)
            .ok_or_else(|| Error::validation(format!("time out of range: '{}'", s)))
    }
}

impl fmt::Display for DoseTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%H:%M"))
    }
}

impl Serialize for DoseTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DoseTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Parse a `YYYY-MM-DD` calendar date
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| Error::validation(format!("invalid date '{}', expected YYYY-MM-DD", s)))
}

pub fn add_days(date: NaiveDate, days: i64) -> NaiveDate {
    date + Duration::days(days)
}

/// Absolute difference between two times of day, in minutes
pub fn minutes_between(a: DoseTime, b: DoseTime) -> i64 {
    (a.minute_of_day() - b.minute_of_day()).abs()
}

/// Signed minutes from `from` to `to` (negative when `to` is earlier)
pub fn minutes_from(from: NaiveDateTime, to: NaiveDateTime) -> i64 {
    (to - from).num_minutes()
}

/// The wall-clock instant a dose is due
pub fn scheduled_at(date: NaiveDate, time: DoseTime) -> NaiveDateTime {
    date.and_time(time.as_naive())
}

pub fn day_of_week(date: NaiveDate) -> &'static str {
    match date.weekday() {
        Weekday::Sun => "Sunday",
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
    }
}

/// The Sunday-first week containing `today`, shifted by `offset` weeks
pub fn week_dates(today: NaiveDate, offset: i64) -> [NaiveDate; 7] {
    let back = i64::from(today.weekday().num_days_from_sunday());
    let start = add_days(today, -back + offset * 7);
    std::array::from_fn(|i| add_days(start, i as i64))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    #[test]
    fn test_dose_time_parse_and_display() {
        let t: DoseTime = "08:05".parse().unwrap();
        assert_eq!(t.to_string(), "08:05");
        assert_eq!(t.minute_of_day(), 485);

        assert!("8:05".parse::<DoseTime>().is_err());
        assert!("24:00".parse::<DoseTime>().is_err());
        assert!("12:60".parse::<DoseTime>().is_err());
        assert!("noon".parse::<DoseTime>().is_err());
    }

    #[test]
    fn test_dose_time_serde_as_string() {
        let t: DoseTime = "20:00".parse().unwrap();
        let json = serde_json::to_string(&t).unwrap();
        assert_eq!(json, "\"20:00\"");
        let back: DoseTime = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn test_minutes_between_is_absolute() {
        let a: DoseTime = "08:00".parse().unwrap();
        let b: DoseTime = "09:30".parse().unwrap();
        assert_eq!(minutes_between(a, b), 90);
        assert_eq!(minutes_between(b, a), 90);

        let from = scheduled_at(date("2024-01-01"), b);
        let to = scheduled_at(date("2024-01-01"), a);
        assert_eq!(minutes_from(from, to), -90);
    }

    #[test]
    fn test_add_days_crosses_month_and_year() {
        assert_eq!(add_days(date("2024-01-31"), 1), date("2024-02-01"));
        assert_eq!(add_days(date("2024-12-31"), 1), date("2025-01-01"));
        assert_eq!(add_days(date("2024-03-01"), -1), date("2024-02-29"));
    }

    #[test]
    fn test_week_dates_sunday_first() {
        // 2024-01-03 is a Wednesday
        let week = week_dates(date("2024-01-03"), 0);
        assert_eq!(week[0], date("2023-12-31"));
        assert_eq!(day_of_week(week[0]), "Sunday");
        assert_eq!(week[6], date("2024-01-06"));

        let prev = week_dates(date("2024-01-03"), -1);
        assert_eq!(prev[0], date("2023-12-24"));
    }

    #[test]
    fn test_fixed_clock_shared_between_clones() {
        let clock = FixedClock::new(date("2024-01-01").and_hms_opt(8, 0, 0).unwrap());
        let handle = clock.clone();
        handle.advance(Duration::minutes(90));
        assert_eq!(clock.now(), date("2024-01-01").and_hms_opt(9, 30, 0).unwrap());
        assert_eq!(clock.today(), date("2024-01-01"));
    }
}
