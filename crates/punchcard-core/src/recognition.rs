//! Recognition adapter seam.
//!
//! Face localisation and encoding are delegated to a [`FaceEncoder`]; the
//! [`GalleryRecognizer`] turns its output into labelled [`Detection`]s by
//! matching each encoding against the enrolled [`Gallery`].

use crate::gallery::{Embedding, Gallery};
use image::imageops::{self, FilterType};
use image::GrayImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fraction of the full frame the encoder sees.
pub const DEFAULT_FRAME_SCALE: f32 = 0.25;

#[derive(Error, Debug)]
pub enum RecognitionError {
    #[error("frame buffer too short: expected {expected} bytes, got {actual}")]
    BadFrame { expected: usize, actual: usize },
    #[error("encoder failed: {0}")]
    Encoder(String),
}

/// Axis-aligned face region in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    #[serde(default = "full_confidence")]
    pub confidence: f32,
}

fn full_confidence() -> f32 {
    1.0
}

impl BoundingBox {
    /// Map a box from a resized frame back to the original coordinates.
    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            x: self.x * factor,
            y: self.y * factor,
            width: self.width * factor,
            height: self.height * factor,
            confidence: self.confidence,
        }
    }
}

/// Who a detected face belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Identity {
    /// Raw gallery label, not yet normalized ("alice_2").
    Known(String),
    Unknown,
}

impl Identity {
    pub fn label(&self) -> Option<&str> {
        match self {
            Identity::Known(label) => Some(label),
            Identity::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub identity: Identity,
    pub bbox: BoundingBox,
}

/// Per-frame recognition. Frames are 8-bit grayscale, row-major.
pub trait RecognitionAdapter {
    fn detect(&mut self, frame: &[u8], width: u32, height: u32)
        -> Result<Vec<Detection>, RecognitionError>;
}

/// A located and encoded face, before identification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodedFace {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

/// Locates faces and computes their encodings.
pub trait FaceEncoder {
    fn encode_faces(&mut self, frame: &[u8], width: u32, height: u32)
        -> Result<Vec<EncodedFace>, RecognitionError>;
}

/// Recognition adapter backed by a face encoder and an enrolled gallery.
pub struct GalleryRecognizer<E> {
    encoder: E,
    gallery: Gallery,
    frame_scale: f32,
    tolerance: f32,
}

impl<E: FaceEncoder> GalleryRecognizer<E> {
    pub fn new(encoder: E, gallery: Gallery, frame_scale: f32, tolerance: f32) -> Self {
        Self {
            encoder,
            gallery,
            frame_scale: frame_scale.clamp(0.01, 1.0),
            tolerance,
        }
    }
}

impl<E: FaceEncoder> RecognitionAdapter for GalleryRecognizer<E> {
    fn detect(&mut self, frame: &[u8], width: u32, height: u32)
        -> Result<Vec<Detection>, RecognitionError> {
        let small = downscale(frame, width, height, self.frame_scale)?;
        let faces = self
            .encoder
            .encode_faces(small.as_raw(), small.width(), small.height())?;

        // Undo the downscale using the actual resized width.
        let restore = width as f32 / small.width().max(1) as f32;

        Ok(faces
            .into_iter()
            .map(|face| Detection {
                identity: self.gallery.best_match(&face.embedding, self.tolerance),
                bbox: face.bbox.scaled(restore),
            })
            .collect())
    }
}

/// Resize a grayscale frame by `scale`, never below 1x1.
pub fn downscale(frame: &[u8], width: u32, height: u32, scale: f32) -> Result<GrayImage, RecognitionError> {
    let expected = (width as usize) * (height as usize);
    if frame.len() < expected {
        return Err(RecognitionError::BadFrame {
            expected,
            actual: frame.len(),
        });
    }

    let img = GrayImage::from_raw(width, height, frame[..expected].to_vec()).ok_or(
        RecognitionError::BadFrame {
            expected,
            actual: frame.len(),
        },
    )?;

    if scale >= 1.0 {
        return Ok(img);
    }

    let new_w = ((width as f32 * scale).round() as u32).max(1);
    let new_h = ((height as f32 * scale).round() as u32).max(1);
    Ok(imageops::resize(&img, new_w, new_h, FilterType::Triangle))
}
