//! punchcard-hw — Webcam capture for attendance sessions.
//!
//! Provides V4L2-based camera access and conversion of raw buffers to
//! the 8-bit grayscale frames the recognizer consumes.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::{Frame, FrameError};
