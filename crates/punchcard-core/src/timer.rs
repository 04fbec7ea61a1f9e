//! Wall-clock time of day and injectable clock sources.
//!
//! A [`Timer`] is a time of day parsed from `"HH:MM:SS"`, stored as seconds
//! since midnight. Durations between two timers are reported as [`Elapsed`].

use chrono::{Local, NaiveDate, NaiveTime, Timelike};
use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Display format for calendar dates ("2024/01/31").
pub const DATE_FORMAT: &str = "%Y/%m/%d";

const SECONDS_PER_HOUR: u32 = 3600;
const SECONDS_PER_MINUTE: u32 = 60;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("expected HH:MM:SS, got {0:?}")]
    SegmentCount(String),
    #[error("non-numeric component {component:?} in {input:?}")]
    NotNumeric { input: String, component: String },
    #[error("{field} out of range in {input:?}")]
    OutOfRange { input: String, field: &'static str },
    #[error("expected YYYY/MM/DD, got {0:?}")]
    Date(String),
}

/// A time of day with one-second resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timer {
    seconds: u32,
}

impl Timer {
    fn checked(input: &str, hours: u32, minutes: u32, seconds: u32) -> Result<Self, ParseError> {
        let out_of_range = |field| ParseError::OutOfRange {
            input: input.to_string(),
            field,
        };
        if hours > 23 {
            return Err(out_of_range("hours"));
        }
        if minutes > 59 {
            return Err(out_of_range("minutes"));
        }
        if seconds > 59 {
            return Err(out_of_range("seconds"));
        }
        Ok(Self {
            seconds: hours * SECONDS_PER_HOUR + minutes * SECONDS_PER_MINUTE + seconds,
        })
    }

    pub fn to_seconds(&self) -> u32 {
        self.seconds
    }

    /// Absolute distance between two times of day, independent of operand order.
    pub fn difference(&self, other: &Timer) -> Elapsed {
        Elapsed(self.seconds.abs_diff(other.seconds))
    }
}

impl FromStr for Timer {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 3 {
            return Err(ParseError::SegmentCount(s.to_string()));
        }

        let mut values = [0u32; 3];
        for (slot, part) in values.iter_mut().zip(&parts) {
            // u32::from_str would accept a leading '+'
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ParseError::NotNumeric {
                    input: s.to_string(),
                    component: part.to_string(),
                });
            }
            *slot = part.parse().map_err(|_| ParseError::OutOfRange {
                input: s.to_string(),
                field: "component",
            })?;
        }

        Self::checked(s, values[0], values[1], values[2])
    }
}

impl fmt::Display for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_hms(f, self.seconds)
    }
}

impl From<NaiveTime> for Timer {
    fn from(t: NaiveTime) -> Self {
        // Leap seconds collapse onto :59.
        Self {
            seconds: t.num_seconds_from_midnight().min(86_399),
        }
    }
}

impl Serialize for Timer {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Timer {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A non-negative span of time, displayed as "HH:MM:SS".
///
/// Hours are zero-padded to two digits and widen past 99 hours
/// ("100:00:00"). Differences between two [`Timer`]s never exceed 23:59:59.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Elapsed(pub u32);

impl fmt::Display for Elapsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_hms(f, self.0)
    }
}

impl Serialize for Elapsed {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

fn write_hms(f: &mut fmt::Formatter<'_>, total: u32) -> fmt::Result {
    let hours = total / SECONDS_PER_HOUR;
    let minutes = (total % SECONDS_PER_HOUR) / SECONDS_PER_MINUTE;
    let seconds = total % SECONDS_PER_MINUTE;
    write!(f, "{hours:02}:{minutes:02}:{seconds:02}")
}

/// Parse a "YYYY/MM/DD" date.
pub fn parse_date(s: &str) -> Result<NaiveDate, ParseError> {
    NaiveDate::parse_from_str(s, DATE_FORMAT).map_err(|_| ParseError::Date(s.to_string()))
}

/// Source of the current local date and time of day.
pub trait ClockSource: Send + Sync {
    fn now(&self) -> (NaiveDate, Timer);
}

/// Reads the local system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    fn now(&self) -> (NaiveDate, Timer) {
        let now = Local::now();
        (now.date_naive(), Timer::from(now.time()))
    }
}

/// A clock that only moves when told to. Used for replays and tests.
#[derive(Debug)]
pub struct ManualClock {
    current: Mutex<(NaiveDate, Timer)>,
}

impl ManualClock {
    pub fn new(date: NaiveDate, time: Timer) -> Self {
        Self {
            current: Mutex::new((date, time)),
        }
    }

    pub fn set(&self, date: NaiveDate, time: Timer) {
        *self.current.lock() = (date, time);
    }
}

impl ClockSource for ManualClock {
    fn now(&self) -> (NaiveDate, Timer) {
        *self.current.lock()
    }
}
