use anyhow::{anyhow, Context, Result};
use parking_lot::{Condvar, Mutex};
use punchcard_core::{ClockSource, Detection, RecognitionAdapter, ReportError, SharedRegistry};
use punchcard_hw::{Camera, CameraError, Frame};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::Notify;

/// Single-frame mailbox between capture and recognition.
///
/// The producer overwrites any frame the consumer has not picked up yet,
/// so recognition always works on the newest frame.
#[derive(Default)]
pub struct FrameSlot {
    frame: Mutex<Option<Frame>>,
    ready: Condvar,
    closed: AtomicBool,
}

impl FrameSlot {
    /// Store a frame. Returns true if an unconsumed frame was replaced.
    pub fn put(&self, frame: Frame) -> bool {
        let replaced = self.frame.lock().replace(frame).is_some();
        self.ready.notify_one();
        replaced
    }

    /// Block until a frame is available or the slot is closed.
    pub fn take(&self) -> Option<Frame> {
        let mut guard = self.frame.lock();
        loop {
            if let Some(frame) = guard.take() {
                return Some(frame);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            self.ready.wait(&mut guard);
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        // Take the lock so a consumer between its checks and wait() sees the flag.
        let _guard = self.frame.lock();
        self.ready.notify_all();
    }
}

/// Record a punch for every known face among `detections`.
///
/// Returns the number of punches accepted by the registry.
pub fn punch_detections(
    registry: &SharedRegistry,
    clock: &dyn ClockSource,
    detections: &[Detection],
) -> usize {
    if detections.is_empty() {
        return 0;
    }

    let (today, now) = clock.now();
    let mut registry = registry.lock();
    let mut accepted = 0;

    for detection in detections {
        let Some(label) = detection.identity.label() else {
            tracing::debug!(bbox = ?detection.bbox, "unknown face");
            continue;
        };
        if !registry.is_known_employee(label) {
            tracing::debug!(label, "recognized label has no employee");
            continue;
        }
        if registry.record_punch(label, now, today).is_some() {
            accepted += 1;
        }
    }

    accepted
}

/// Anything that pushes frames until told to stop.
pub trait FrameSource: Send + 'static {
    /// Deliver frames to `on_frame` until `stop` is set or capture fails.
    /// Returns the number of frames delivered.
    fn capture(&mut self, stop: &AtomicBool, on_frame: &mut dyn FnMut(Frame)) -> Result<u64, CameraError>;
}

/// V4L2 camera as a frame source, skipping `warmup_frames` after stream start.
pub struct CameraSource {
    pub camera: Camera,
    pub warmup_frames: usize,
}

impl FrameSource for CameraSource {
    fn capture(&mut self, stop: &AtomicBool, on_frame: &mut dyn FnMut(Frame)) -> Result<u64, CameraError> {
        self.camera.stream(stop, self.warmup_frames, on_frame)
    }
}

fn halt(stop: &AtomicBool, slot: &FrameSlot) {
    stop.store(true, Ordering::Relaxed);
    slot.close();
}

/// Running capture + recognition threads.
pub struct Session {
    stop: Arc<AtomicBool>,
    slot: Arc<FrameSlot>,
    capture_done: Arc<Notify>,
    capture: JoinHandle<Result<u64, CameraError>>,
    recognition: JoinHandle<u64>,
}

impl Session {
    /// Start capturing from `source` and recognizing with `adapter`.
    pub fn start<S, A>(
        mut source: S,
        mut adapter: A,
        registry: SharedRegistry,
        clock: Arc<dyn ClockSource>,
    ) -> Result<Self>
    where
        S: FrameSource,
        A: RecognitionAdapter + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let slot = Arc::new(FrameSlot::default());
        let capture_done = Arc::new(Notify::new());

        let recognition = {
            let slot = slot.clone();
            std::thread::Builder::new()
                .name("punchcard-recognition".into())
                .spawn(move || {
                    tracing::info!("recognition thread started");
                    let mut punches = 0u64;
                    while let Some(frame) = slot.take() {
                        match adapter.detect(&frame.data, frame.width, frame.height) {
                            Ok(detections) => {
                                punches += punch_detections(&registry, clock.as_ref(), &detections) as u64;
                            }
                            Err(e) => {
                                tracing::warn!(seq = frame.sequence, error = %e, "recognition failed");
                            }
                        }
                    }
                    tracing::info!(punches, "recognition thread exiting");
                    punches
                })?
        };

        let spawned = {
            let stop = stop.clone();
            let slot = slot.clone();
            let capture_done = capture_done.clone();
            std::thread::Builder::new()
                .name("punchcard-capture".into())
                .spawn(move || {
                    let mut dropped = 0u64;
                    let result = source.capture(&stop, &mut |frame: Frame| {
                        if slot.put(frame) {
                            dropped += 1;
                        }
                    });
                    tracing::debug!(dropped, "stale frames replaced");
                    if let Err(e) = &result {
                        tracing::error!(error = %e, "capture stopped");
                    }
                    // Wake the consumer even if capture failed.
                    slot.close();
                    capture_done.notify_one();
                    result
                })
        };
        let capture = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                halt(&stop, &slot);
                return Err(e.into());
            }
        };

        Ok(Self {
            stop,
            slot,
            capture_done,
            capture,
            recognition,
        })
    }

    /// Signalled once the capture thread has returned, for any reason.
    pub fn capture_finished(&self) -> Arc<Notify> {
        self.capture_done.clone()
    }

    /// Signal both threads and wait for them.
    ///
    /// Both threads are joined before any capture error is returned, so
    /// every frame already handed to recognition is punched.
    pub fn stop(self) -> Result<u64> {
        halt(&self.stop, &self.slot);

        let captured = self
            .capture
            .join()
            .map_err(|_| anyhow!("capture thread panicked"));
        let punches = self
            .recognition
            .join()
            .map_err(|_| anyhow!("recognition thread panicked"))?;
        let captured = captured?.context("capture failed")?;

        tracing::info!(captured, punches, "session stopped");
        Ok(punches)
    }
}

/// Write the session report, logging instead of failing when nothing was recorded.
pub fn export(registry: &SharedRegistry, dir: &Path) -> Option<PathBuf> {
    match registry.lock().export_report(dir) {
        Ok(path) => {
            println!("report written to {}", path.display());
            Some(path)
        }
        Err(ReportError::Empty) => {
            tracing::warn!("no punches recorded; report not written");
            None
        }
        Err(e) => {
            tracing::error!(error = %e, "report export failed");
            None
        }
    }
}

/// Run `session` until `shutdown` resolves or capture ends by itself, then
/// stop it and export the report.
///
/// The report is exported before any stop error is returned.
pub async fn finish_session(
    session: Session,
    shutdown: impl Future<Output = ()>,
    registry: &SharedRegistry,
    report_dir: &Path,
) -> Result<u64> {
    let capture_done = session.capture_finished();
    tokio::select! {
        () = shutdown => tracing::info!("stopping session"),
        () = capture_done.notified() => tracing::warn!("capture ended; stopping session"),
    }

    let stopped = tokio::task::spawn_blocking(move || session.stop()).await;
    export(registry, report_dir);
    Ok(stopped??)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use punchcard_core::recognition::RecognitionError;
    use punchcard_core::{AttendanceRegistry, BoundingBox, Identity, ManualClock, PunchKind};
    use std::time::Duration;

    /// Hands over its frames, then fails as an unplugged camera would.
    struct FailingSource {
        frames: Vec<Frame>,
    }

    impl FrameSource for FailingSource {
        fn capture(&mut self, _stop: &AtomicBool, on_frame: &mut dyn FnMut(Frame)) -> Result<u64, CameraError> {
            for frame in self.frames.drain(..) {
                on_frame(frame);
            }
            Err(CameraError::CaptureFailed("device unplugged".into()))
        }
    }

    /// Streams frames until stopped.
    struct LoopSource;

    impl FrameSource for LoopSource {
        fn capture(&mut self, stop: &AtomicBool, on_frame: &mut dyn FnMut(Frame)) -> Result<u64, CameraError> {
            let mut seq = 0u32;
            while !stop.load(Ordering::Relaxed) {
                on_frame(frame(seq));
                seq += 1;
                std::thread::sleep(Duration::from_millis(1));
            }
            Ok(seq as u64)
        }
    }

    /// Sees the same faces in every frame.
    struct FixedAdapter(Vec<Detection>);

    impl RecognitionAdapter for FixedAdapter {
        fn detect(&mut self, _frame: &[u8], _width: u32, _height: u32) -> Result<Vec<Detection>, RecognitionError> {
            Ok(self.0.clone())
        }
    }

    fn alice_registry() -> SharedRegistry {
        let mut reg = AttendanceRegistry::default();
        reg.add_employee("alice");
        reg.into_shared()
    }

    fn scratch() -> PathBuf {
        std::env::temp_dir().join(format!("punchcard-engine-{}", uuid::Uuid::new_v4()))
    }

    fn frame(seq: u32) -> Frame {
        Frame {
            data: vec![0; 4],
            width: 2,
            height: 2,
            sequence: seq,
            captured_at: std::time::Instant::now(),
        }
    }

    fn det(identity: Identity) -> Detection {
        Detection {
            identity,
            bbox: BoundingBox { x: 0.0, y: 0.0, width: 1.0, height: 1.0, confidence: 1.0 },
        }
    }

    fn clock(time: &str) -> ManualClock {
        ManualClock::new(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), time.parse().unwrap())
    }

    #[test]
    fn test_slot_keeps_newest_frame() {
        let slot = FrameSlot::default();
        assert!(!slot.put(frame(1)));
        assert!(slot.put(frame(2)));
        assert_eq!(slot.take().unwrap().sequence, 2);
    }

    #[test]
    fn test_slot_close_releases_consumer() {
        let slot = Arc::new(FrameSlot::default());
        let consumer = {
            let slot = slot.clone();
            std::thread::spawn(move || slot.take().is_none())
        };
        std::thread::sleep(std::time::Duration::from_millis(20));
        slot.close();
        assert!(consumer.join().unwrap());
    }

    #[test]
    fn test_slot_drains_before_closing() {
        let slot = FrameSlot::default();
        slot.put(frame(7));
        slot.close();
        assert_eq!(slot.take().unwrap().sequence, 7);
        assert!(slot.take().is_none());
    }

    #[test]
    fn test_punch_detections_known_and_unknown() {
        let registry = {
            let mut reg = AttendanceRegistry::default();
            reg.add_employee("alice_1");
            reg.into_shared()
        };
        let detections = vec![
            det(Identity::Known("alice_2".into())),
            det(Identity::Unknown),
            det(Identity::Known("mallory_1".into())),
        ];

        let accepted = punch_detections(&registry, &clock("09:00:00"), &detections);
        assert_eq!(accepted, 1);

        let rows = registry.lock().generate_report();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "alice");
        assert_eq!(rows[0].on_work.map(|t| t.to_string()), Some("09:00:00".into()));
    }

    #[test]
    fn test_punch_detections_uses_clock() {
        let registry = {
            let mut reg = AttendanceRegistry::default();
            reg.add_employee("bob");
            reg.into_shared()
        };
        let clock = clock("08:00:00");
        punch_detections(&registry, &clock, &[det(Identity::Known("bob".into()))]);
        clock.set(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), "16:30:00".parse().unwrap());
        punch_detections(&registry, &clock, &[det(Identity::Known("bob".into()))]);

        let reg = registry.lock();
        let day = reg.employee("bob").unwrap().day(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()).copied();
        assert_eq!(day.and_then(|d| d.off_work()).map(|t| t.to_string()), Some("16:30:00".into()));
        drop(reg);

        let kind = registry
            .lock()
            .record_punch("bob", "17:00:00".parse().unwrap(), NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(kind, Some(PunchKind::ClockOut));
    }

    #[test]
    fn test_punch_detections_empty() {
        let registry = AttendanceRegistry::default().into_shared();
        assert_eq!(punch_detections(&registry, &clock("09:00:00"), &[]), 0);
    }

    #[tokio::test]
    async fn test_capture_failure_still_exports_report() {
        let registry = alice_registry();
        let session = Session::start(
            FailingSource { frames: vec![frame(1)] },
            FixedAdapter(vec![det(Identity::Known("alice_1".into()))]),
            registry.clone(),
            Arc::new(clock("09:00:00")),
        )
        .unwrap();

        let dir = scratch();
        // Never resolves: only the capture failure can end the session.
        let result = finish_session(session, std::future::pending(), &registry, &dir).await;

        let err = result.unwrap_err();
        assert!(format!("{err:#}").contains("device unplugged"));
        let report = std::fs::read_to_string(dir.join("20240101.csv")).unwrap();
        assert!(report.contains("alice,2024/01/01,09:00:00"));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_stops_running_session() {
        let registry = alice_registry();
        let session = Session::start(
            LoopSource,
            FixedAdapter(vec![det(Identity::Known("alice".into()))]),
            registry.clone(),
            Arc::new(clock("09:00:00")),
        )
        .unwrap();

        let dir = scratch();
        let shutdown = tokio::time::sleep(Duration::from_millis(30));
        let punches = finish_session(session, shutdown, &registry, &dir).await.unwrap();

        let rows = registry.lock().generate_report();
        if punches > 0 {
            assert!(dir.join("20240101.csv").exists());
            assert_eq!(rows.len(), 1);
            std::fs::remove_dir_all(&dir).unwrap();
        } else {
            assert!(rows.is_empty());
        }
    }

    #[test]
    fn test_stop_joins_recognition_before_reporting_capture_error() {
        let registry = alice_registry();
        let session = Session::start(
            FailingSource { frames: vec![frame(3)] },
            FixedAdapter(vec![det(Identity::Known("alice".into()))]),
            registry.clone(),
            Arc::new(clock("10:15:00")),
        )
        .unwrap();

        assert!(session.stop().is_err());
        let reg = registry.lock();
        let day = reg.employee("alice").unwrap().day(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()).copied();
        assert_eq!(day.and_then(|d| d.on_work()).map(|t| t.to_string()), Some("10:15:00".into()));
    }

    #[test]
    fn test_halt_releases_both_threads() {
        let stop = Arc::new(AtomicBool::new(false));
        let slot = Arc::new(FrameSlot::default());

        let consumer = {
            let slot = slot.clone();
            std::thread::spawn(move || while slot.take().is_some() {})
        };
        let producer = {
            let stop = stop.clone();
            let slot = slot.clone();
            std::thread::spawn(move || LoopSource.capture(&stop, &mut |f: Frame| {
                slot.put(f);
            }))
        };

        std::thread::sleep(Duration::from_millis(10));
        halt(&stop, &slot);
        assert!(producer.join().unwrap().is_ok());
        consumer.join().unwrap();
    }
}
