//! punchcard-core — Attendance ledger and face gallery matching.
//!
//! Tracks per-employee clock-in / clock-out punches driven by face
//! recognition events, and flattens them into an exportable report.

pub mod employee;
pub mod enroll;
pub mod gallery;
pub mod notify;
pub mod recognition;
pub mod registry;
pub mod report;
pub mod timer;

pub use employee::{DayRecord, Employee, PunchKind, RepeatPunchPolicy};
pub use gallery::{Embedding, Gallery, KnownFace};
pub use notify::{ChannelNotifier, PunchEvent, PunchNotifier};
pub use recognition::{BoundingBox, Detection, Identity, RecognitionAdapter};
pub use registry::{normalize_key, AttendanceRegistry, SharedRegistry};
pub use report::{ReportError, ReportRow};
pub use timer::{ClockSource, Elapsed, ManualClock, ParseError, SystemClock, Timer};
