//! Console feedback for accepted punches.

use chrono::NaiveDate;
use punchcard_core::{AttendanceRegistry, PunchEvent, SharedRegistry};
use std::fmt::Write as _;
use std::io::Write;
use tokio::sync::mpsc;

const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";
const BELL: &str = "\x07";

/// Today's punch status for every employee, one line each.
pub fn render_status(registry: &AttendanceRegistry, today: NaiveDate) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:<16} {:<10} {:<10} {:<10}", "name", "on_work", "off_work", "hours");

    for employee in registry.employees() {
        let day = employee.day(today);
        let on = day.and_then(|d| d.on_work());
        let off = day.and_then(|d| d.off_work());
        let hours = on.zip(off).map(|(a, b)| b.difference(&a).to_string());

        let cell = |v: Option<String>| v.unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "{:<16} {:<10} {:<10} {:<10}",
            employee.name(),
            cell(on.map(|t| t.to_string())),
            cell(off.map(|t| t.to_string())),
            cell(hours),
        );
    }
    out
}

/// Consume punch events until every sender is gone, writing feedback to `out`.
///
/// The registry lock is only taken on the blocking pool, never on a runtime
/// worker. Returns `out` once the channel closes.
pub async fn run_status_board<W: Write + Send + 'static>(
    mut events: mpsc::UnboundedReceiver<PunchEvent>,
    registry: SharedRegistry,
    sound: bool,
    redraw: bool,
    mut out: W,
) -> W {
    while let Some(event) = events.recv().await {
        tracing::info!(
            employee = %event.employee,
            time = %event.time,
            kind = ?event.kind,
            "time recorded"
        );

        let mut text = String::new();
        if sound {
            text.push_str(BELL);
        }
        if redraw {
            let registry = registry.clone();
            let today = event.date;
            match tokio::task::spawn_blocking(move || render_status(&registry.lock(), today)).await {
                Ok(table) => {
                    text.push_str(CLEAR_SCREEN);
                    text.push_str(&table);
                }
                Err(e) => tracing::warn!(error = %e, "status render failed"),
            }
        }
        if !text.is_empty() {
            let _ = out.write_all(text.as_bytes());
            let _ = out.flush();
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use punchcard_core::{ChannelNotifier, PunchKind, PunchNotifier};

    fn d() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    #[test]
    fn test_render_status() {
        let mut reg = AttendanceRegistry::default();
        reg.add_employee("alice");
        reg.add_employee("bob");
        reg.record_punch("alice", "09:00:00".parse().unwrap(), d());
        reg.record_punch("alice", "17:00:00".parse().unwrap(), d());

        let text = render_status(&reg, d());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("alice"));
        assert!(lines[1].contains("09:00:00"));
        assert!(lines[1].contains("08:00:00"));
        assert!(lines[2].starts_with("bob"));
        assert!(lines[2].contains('-'));
    }

    #[tokio::test]
    async fn test_status_board_drains_and_exits() {
        let (notifier, rx) = ChannelNotifier::new();
        let mut reg = AttendanceRegistry::default();
        reg.add_employee("alice");
        let kind = reg.record_punch("alice", "09:00:00".parse().unwrap(), d());

        notifier.notify(&PunchEvent {
            employee: "alice".into(),
            date: d(),
            time: "09:00:00".parse().unwrap(),
            kind: kind.unwrap(),
        });

        let board = tokio::spawn(run_status_board(rx, reg.into_shared(), false, false, Vec::new()));
        drop(notifier);
        assert!(board.await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_status_board_redraws_table() {
        let (notifier, rx) = ChannelNotifier::new();
        let mut reg = AttendanceRegistry::default();
        reg.add_employee("alice");
        reg.record_punch("alice", "09:00:00".parse().unwrap(), d());

        notifier.notify(&PunchEvent {
            employee: "alice".into(),
            date: d(),
            time: "09:00:00".parse().unwrap(),
            kind: PunchKind::ClockIn,
        });
        drop(notifier);

        let out = run_status_board(rx, reg.into_shared(), true, true, Vec::new()).await;
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with(BELL));
        assert!(text.contains(CLEAR_SCREEN));
        assert!(text.contains("09:00:00"));
    }
}
