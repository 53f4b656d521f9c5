//! rollcall-enroll — the pending-enrollment review workflow.
//!
//! Drives a public submission from Draft through Pending to a terminal
//! Approved or Rejected. Intake gates what gets staged; the processor
//! turns an accepted submission into exactly one identity with its
//! reference embeddings, or rolls it back to Pending for retry.

mod error;
pub mod intake;
pub mod photo;
pub mod processor;

pub use error::EnrollError;
pub use intake::{submit, IntakeConfig, IntakeOutcome, Submission};
pub use photo::{FsPhotoStore, MemoryPhotoStore, PhotoError, PhotoStore};
pub use processor::{accept, reject, AcceptOutcome, ProcessorConfig};
