//! Offline replay of recorded detections.
//!
//! Each line of the input is one detection:
//! `{"date":"2024/01/01","time":"09:00:00","label":"alice_1"}`.
//! A `null` label stands for an unrecognized face.

use crate::engine::punch_detections;
use anyhow::{Context, Result};
use punchcard_core::timer::parse_date;
use punchcard_core::{BoundingBox, Detection, Identity, ManualClock, SharedRegistry, Timer};
use serde::Deserialize;
use std::io::BufRead;

#[derive(Debug, Deserialize)]
struct ReplayEvent {
    date: String,
    time: Timer,
    label: Option<String>,
    #[serde(default)]
    bbox: Option<BoundingBox>,
}

/// Outcome of a replay run.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub events: usize,
    pub punches: usize,
}

/// Feed every event from `input` through the registry in order.
pub fn replay<R: BufRead>(input: R, registry: &SharedRegistry) -> Result<ReplayStats> {
    let mut clock: Option<ManualClock> = None;
    let mut stats = ReplayStats::default();

    for (idx, line) in input.lines().enumerate() {
        let line = line.context("reading replay input")?;
        if line.trim().is_empty() {
            continue;
        }
        let lineno = idx + 1;

        let event: ReplayEvent =
            serde_json::from_str(&line).with_context(|| format!("line {lineno}: invalid event"))?;
        let date = parse_date(&event.date).with_context(|| format!("line {lineno}"))?;

        let clock = clock.get_or_insert_with(|| ManualClock::new(date, event.time));
        clock.set(date, event.time);

        let detection = Detection {
            identity: event.label.map_or(Identity::Unknown, Identity::Known),
            bbox: event.bbox.unwrap_or(BoundingBox {
                x: 0.0,
                y: 0.0,
                width: 0.0,
                height: 0.0,
                confidence: 1.0,
            }),
        };

        stats.events += 1;
        stats.punches += punch_detections(registry, &*clock, &[detection]);
    }

    tracing::info!(events = stats.events, punches = stats.punches, "replay finished");
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use punchcard_core::AttendanceRegistry;
    use std::io::Cursor;

    fn registry(names: &[&str]) -> SharedRegistry {
        let mut reg = AttendanceRegistry::default();
        for name in names {
            reg.add_employee(name);
        }
        reg.into_shared()
    }

    #[test]
    fn test_replay_multi_day() {
        let input = r#"
{"date":"2024/01/01","time":"09:00:00","label":"alice_1"}
{"date":"2024/01/01","time":"09:05:00","label":null}
{"date":"2024/01/01","time":"17:00:00","label":"alice_2"}
{"date":"2024/01/03","time":"08:55:00","label":"bob"}
{"date":"2024/01/03","time":"09:00:00","label":"eve"}
"#;
        let reg = registry(&["alice", "bob"]);
        let stats = replay(Cursor::new(input), &reg).unwrap();
        assert_eq!(stats, ReplayStats { events: 5, punches: 3 });

        let rows = reg.lock().generate_report();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].working_hours.map(|e| e.to_string()), Some("08:00:00".into()));
        assert_eq!(rows[1].name, "bob");
        assert_eq!(
            punchcard_core::report::report_file_stem(&rows).unwrap(),
            "20240101-20240103"
        );
    }

    #[test]
    fn test_replay_rejects_bad_time() {
        let input = r#"{"date":"2024/01/01","time":"9am","label":"alice"}"#;
        let err = replay(Cursor::new(input), &registry(&["alice"])).unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn test_replay_rejects_bad_date() {
        let input = r#"{"date":"01-01-2024","time":"09:00:00","label":"alice"}"#;
        assert!(replay(Cursor::new(input), &registry(&["alice"])).is_err());
    }
}
