//! Enrollment from a folder of reference images.
//!
//! Each image file stem is a label ("alice_2.jpg" → "alice_2"). Encodings are
//! cached as `{cache_dir}/{stem}.json` so later sessions skip the encoder.

use crate::gallery::{Embedding, Gallery};
use crate::recognition::{FaceEncoder, RecognitionError};
use crate::registry::AttendanceRegistry;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Recognised reference image extensions (lowercase).
pub const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("images folder not readable: {path}: {source}")]
    ImagesDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write encoding cache {path}: {source}")]
    CacheWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("recognition: {0}")]
    Recognition(#[from] RecognitionError),
}

/// Outcome of one enrollment pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EnrollSummary {
    pub from_cache: usize,
    pub encoded: usize,
    /// Labels whose image could not be decoded or contained no face.
    pub skipped: Vec<String>,
}

/// Reference images in `dir`, sorted by file name.
pub fn reference_images(dir: &Path) -> Result<Vec<PathBuf>, EnrollError> {
    let entries = std::fs::read_dir(dir).map_err(|source| EnrollError::ImagesDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut images: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        })
        .collect();
    images.sort();

    tracing::info!(dir = %dir.display(), count = images.len(), "reference images found");
    Ok(images)
}

fn cache_path(cache_dir: &Path, label: &str) -> PathBuf {
    cache_dir.join(format!("{label}.json"))
}

/// True when `embedding` is non-empty and, once the gallery has faces,
/// of the same length as them.
fn fits_gallery(embedding: &Embedding, dimension: Option<usize>) -> bool {
    embedding.dimension() > 0 && dimension.map_or(true, |d| d == embedding.dimension())
}

fn load_cached(path: &Path, dimension: Option<usize>) -> Option<Embedding> {
    let text = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str::<Embedding>(&text) {
        Ok(embedding) if fits_gallery(&embedding, dimension) => Some(embedding),
        Ok(embedding) => {
            tracing::warn!(
                path = %path.display(),
                cached = embedding.dimension(),
                expected = ?dimension,
                "stale encoding cache; re-encoding"
            );
            None
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "corrupt encoding cache; re-encoding");
            None
        }
    }
}

fn store_cached(path: &Path, embedding: &Embedding) -> Result<(), EnrollError> {
    let io_err = |source| EnrollError::CacheWrite {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let json = serde_json::to_string(embedding).map_err(|e| io_err(e.into()))?;
    std::fs::write(path, json).map_err(io_err)
}

/// Encode the most confident face in an image file.
fn encode_image<E: FaceEncoder>(path: &Path, encoder: &mut E) -> Result<Option<Embedding>, RecognitionError> {
    let img = match image::open(path) {
        Ok(img) => img.to_luma8(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "cannot decode reference image");
            return Ok(None);
        }
    };

    let faces = encoder.encode_faces(img.as_raw(), img.width(), img.height())?;
    Ok(faces
        .into_iter()
        .max_by(|a, b| {
            a.bbox
                .confidence
                .partial_cmp(&b.bbox.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|face| face.embedding))
}

/// Load every reference image into `gallery` and register its employee.
///
/// Several images of one person ("alice_1", "alice_2") all land in the
/// gallery but register a single employee, without resetting history.
pub fn enroll_folder<E: FaceEncoder>(
    images_dir: &Path,
    cache_dir: &Path,
    encoder: &mut E,
    gallery: &mut Gallery,
    registry: &mut AttendanceRegistry,
) -> Result<EnrollSummary, EnrollError> {
    let mut summary = EnrollSummary::default();

    for path in reference_images(images_dir)? {
        let Some(label) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
            continue;
        };

        let cached = cache_path(cache_dir, &label);
        let embedding = match load_cached(&cached, gallery.dimension()) {
            Some(embedding) => {
                summary.from_cache += 1;
                embedding
            }
            None => match encode_image(&path, encoder)? {
                Some(embedding) if !fits_gallery(&embedding, gallery.dimension()) => {
                    tracing::warn!(
                        label,
                        length = embedding.dimension(),
                        expected = ?gallery.dimension(),
                        "encoding length does not match the gallery; skipped"
                    );
                    summary.skipped.push(label);
                    continue;
                }
                Some(embedding) => {
                    store_cached(&cached, &embedding)?;
                    summary.encoded += 1;
                    embedding
                }
                None => {
                    tracing::warn!(label, "no face in reference image; skipped");
                    summary.skipped.push(label);
                    continue;
                }
            },
        };

        tracing::info!(label, "adding to system");
        gallery.push(label.as_str(), embedding);
        registry.add_employee_if_absent(&label);
    }

    tracing::info!(
        faces = gallery.len(),
        employees = registry.len(),
        from_cache = summary.from_cache,
        encoded = summary.encoded,
        skipped = summary.skipped.len(),
        "encoding images loaded"
    );
    Ok(summary)
}
