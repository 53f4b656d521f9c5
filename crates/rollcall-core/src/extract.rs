//! External capability boundaries: face location and embedding extraction.
//!
//! The detection/embedding models themselves live outside the core; these
//! traits are the seams they plug into. The quality gate uses
//! [`FaceLocator`] to find the primary face crop, and the enrollment
//! processor uses [`FeatureExtractor`] to turn an accepted photo into a
//! reference vector.

use crate::types::Embedding;
use thiserror::Error;

/// Axis-aligned face region in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("no face found in photo")]
    NoFaceFound,
    #[error("extractor failure: {0}")]
    Failed(String),
}

/// Locates the primary (largest) face in a grayscale image.
///
/// Returns `None` when no face is present. Implementations must be
/// deterministic for identical input bytes.
pub trait FaceLocator {
    fn locate(&self, luma: &[u8], width: u32, height: u32) -> Option<FaceRegion>;
}

/// Extracts a fixed-length face embedding from encoded photo bytes.
///
/// Output vectors are expected to be L2-normalized.
pub trait FeatureExtractor {
    fn extract(&self, photo: &[u8]) -> Result<Embedding, ExtractError>;
}
