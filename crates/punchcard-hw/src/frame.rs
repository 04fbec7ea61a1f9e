//! Frame type and buffer conversion — YUYV, MJPEG, dark-frame detection.

use image::ImageFormat;

/// A captured grayscale camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sequence: u32,
    pub captured_at: std::time::Instant,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("MJPEG decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("decoded frame is {actual_w}x{actual_h}, negotiated {width}x{height}")]
    SizeMismatch {
        width: u32,
        height: u32,
        actual_w: u32,
        actual_h: u32,
    },
}

/// Convert packed YUYV (4:2:2) to grayscale by extracting the Y channel.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

/// Take the first `width * height` bytes of a GREY buffer.
pub fn grey_to_grayscale(grey: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height) as usize;
    if grey.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: grey.len(),
        });
    }
    Ok(grey[..expected].to_vec())
}

/// Decode one MJPEG frame (a plain JPEG) to grayscale.
pub fn mjpeg_to_grayscale(jpeg: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let gray = image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg)?.to_luma8();
    if gray.dimensions() != (width, height) {
        return Err(FrameError::SizeMismatch {
            width,
            height,
            actual_w: gray.width(),
            actual_h: gray.height(),
        });
    }
    Ok(gray.into_raw())
}

/// True if more than `threshold_pct` of pixels are below 32.
///
/// Webcams emit black frames while auto-exposure settles.
pub fn is_dark_frame(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark_count = gray.iter().filter(|&&p| p < 32).count();
    (dark_count as f32 / gray.len() as f32) > threshold_pct
}
