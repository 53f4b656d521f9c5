//! rollcall-core — embedding similarity, ranked recognition matching,
//! and the photo quality gate.
//!
//! Pure CPU-bound logic: no I/O, no async. The face detector and the
//! embedding model are external capabilities consumed through the
//! [`extract::FaceLocator`] and [`extract::FeatureExtractor`] traits.

pub mod extract;
pub mod matcher;
pub mod quality;
pub mod types;

pub use extract::{ExtractError, FaceLocator, FaceRegion, FeatureExtractor};
pub use matcher::{match_query, Candidate, MatchOutcome};
pub use quality::{QualityConfig, QualityGate, QualityMetrics, QualityReport};
pub use types::Embedding;
