//! Enrolled reference faces and nearest-neighbour matching.

use crate::recognition::Identity;
use serde::{Deserialize, Serialize};

/// Default maximum Euclidean distance for a positive match.
pub const DEFAULT_MATCH_TOLERANCE: f32 = 0.6;

/// Face encoding vector (128-dimensional for dlib-style encoders).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// `None` when the vectors are empty or of different lengths,
    /// since such encodings come from different encoders.
    pub fn euclidean_distance(&self, other: &Embedding) -> Option<f32> {
        if self.values.is_empty() || self.values.len() != other.values.len() {
            return None;
        }
        let sum: f32 = self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum();
        Some(sum.sqrt())
    }
}

/// An enrolled reference face. `label` is the raw image stem ("alice_2").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnownFace {
    pub label: String,
    pub embedding: Embedding,
}

/// Reference encodings loaded at startup.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    faces: Vec<KnownFace>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, label: impl Into<String>, embedding: Embedding) {
        self.faces.push(KnownFace {
            label: label.into(),
            embedding,
        });
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    pub fn faces(&self) -> &[KnownFace] {
        &self.faces
    }

    /// Encoding length of the enrolled faces, if any are enrolled.
    pub fn dimension(&self) -> Option<usize> {
        self.faces.first().map(|face| face.embedding.dimension())
    }

    /// Nearest reference face if it lies within `tolerance`, else `Unknown`.
    pub fn best_match(&self, probe: &Embedding, tolerance: f32) -> Identity {
        let best = self
            .faces
            .iter()
            .filter_map(|face| Some((face, probe.euclidean_distance(&face.embedding)?)))
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        match best {
            Some((face, distance)) if distance <= tolerance => {
                tracing::trace!(label = %face.label, distance, "gallery match");
                Identity::Known(face.label.clone())
            }
            _ => Identity::Unknown,
        }
    }
}
