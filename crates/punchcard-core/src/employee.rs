//! Per-employee attendance ledger.

use crate::report::ReportRow;
use crate::timer::Timer;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Punch state for a single calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DayRecord {
    /// Day opened, no clock-in yet.
    AwaitingIn,
    /// Clocked in, waiting for a clock-out.
    AwaitingOut { on_work: Timer },
    /// Both punches present.
    Complete { on_work: Timer, off_work: Timer },
}

impl DayRecord {
    pub fn on_work(&self) -> Option<Timer> {
        match *self {
            DayRecord::AwaitingIn => None,
            DayRecord::AwaitingOut { on_work } | DayRecord::Complete { on_work, .. } => {
                Some(on_work)
            }
        }
    }

    pub fn off_work(&self) -> Option<Timer> {
        match *self {
            DayRecord::Complete { off_work, .. } => Some(off_work),
            _ => None,
        }
    }
}

/// What to do with punches after a day already has both timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatPunchPolicy {
    /// Move the clock-out to the latest sighting.
    #[default]
    Overwrite,
    /// Keep the first clock-out.
    Ignore,
}

impl std::str::FromStr for RepeatPunchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "overwrite" => Ok(Self::Overwrite),
            "ignore" => Ok(Self::Ignore),
            other => Err(format!("unknown repeat punch policy: {other}")),
        }
    }
}

/// Effect of a punch on the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PunchKind {
    ClockIn,
    ClockOut,
    /// Day already complete and the policy kept it unchanged.
    Ignored,
}

#[derive(Debug, Clone)]
pub struct Employee {
    name: String,
    days: BTreeMap<NaiveDate, DayRecord>,
}

impl Employee {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            days: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn day(&self, date: NaiveDate) -> Option<&DayRecord> {
        self.days.get(&date)
    }

    /// Recorded days in date order.
    pub fn days(&self) -> impl Iterator<Item = (&NaiveDate, &DayRecord)> {
        self.days.iter()
    }

    /// Apply one punch for `today` at `now`.
    pub fn record_punch(
        &mut self,
        now: Timer,
        today: NaiveDate,
        policy: RepeatPunchPolicy,
    ) -> PunchKind {
        let day = self.days.entry(today).or_insert(DayRecord::AwaitingIn);

        let (next, kind) = match *day {
            DayRecord::AwaitingIn => (DayRecord::AwaitingOut { on_work: now }, PunchKind::ClockIn),
            DayRecord::AwaitingOut { on_work } => (
                DayRecord::Complete {
                    on_work,
                    off_work: now,
                },
                PunchKind::ClockOut,
            ),
            DayRecord::Complete { on_work, .. } => match policy {
                RepeatPunchPolicy::Overwrite => (
                    DayRecord::Complete {
                        on_work,
                        off_work: now,
                    },
                    PunchKind::ClockOut,
                ),
                RepeatPunchPolicy::Ignore => (*day, PunchKind::Ignored),
            },
        };

        *day = next;
        kind
    }

    /// One report row per recorded day.
    pub fn to_report_rows(&self) -> Vec<ReportRow> {
        self.days
            .iter()
            .map(|(date, record)| {
                let on_work = record.on_work();
                let off_work = record.off_work();
                ReportRow {
                    name: self.name.clone(),
                    date: *date,
                    on_work,
                    off_work,
                    working_hours: on_work.zip(off_work).map(|(on, off)| off.difference(&on)),
                }
            })
            .collect()
    }
}
