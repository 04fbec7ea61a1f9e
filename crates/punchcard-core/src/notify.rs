//! Punch notifications.
//!
//! The registry dispatches a [`PunchEvent`] after every accepted punch.
//! Notifiers must return immediately; anything slow (sound, redraws)
//! belongs on the receiving end of a [`ChannelNotifier`].

use crate::employee::PunchKind;
use crate::timer::Timer;
use chrono::NaiveDate;
use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PunchEvent {
    pub employee: String,
    pub date: NaiveDate,
    pub time: Timer,
    pub kind: PunchKind,
}

pub trait PunchNotifier: Send + Sync {
    fn notify(&self, event: &PunchEvent);
}

/// Emits a tracing event per punch.
pub struct LogNotifier;

impl PunchNotifier for LogNotifier {
    fn notify(&self, event: &PunchEvent) {
        tracing::info!(
            employee = %event.employee,
            date = %event.date,
            time = %event.time,
            kind = ?event.kind,
            "punch recorded"
        );
    }
}

/// Forwards events to an async consumer without blocking.
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<PunchEvent>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PunchEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl PunchNotifier for ChannelNotifier {
    fn notify(&self, event: &PunchEvent) {
        if self.tx.send(event.clone()).is_err() {
            tracing::debug!(employee = %event.employee, "punch listener gone; event dropped");
        }
    }
}
