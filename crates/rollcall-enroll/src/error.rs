use crate::photo::PhotoError;
use rollcall_core::quality::QualityError;
use rollcall_store::StoreError;
use rollcall_sync::SyncError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrollError {
    /// Submission or photo validation failed. Surfaced synchronously with
    /// the specific reasons; never silently ignored.
    #[error("validation failed: {}", reasons.join("; "))]
    Validation { reasons: Vec<String> },

    /// Lost the `Pending -> Processing` race or the enrollment is already
    /// terminal. Not retried automatically — retry would risk a second
    /// identity.
    #[error("enrollment already processed")]
    AlreadyProcessed,

    #[error("enrollment not found: {0}")]
    NotFound(String),

    /// Processing could not complete; the enrollment is back in Pending
    /// and will be retried on the next accept.
    #[error("processing incomplete (attempt {attempt} of {budget}): {reason}")]
    ProcessingIncomplete {
        attempt: u32,
        budget: u32,
        reason: String,
    },

    /// Processing failed past the retry budget; the enrollment was
    /// rejected and its staged photos purged.
    #[error("retry budget exhausted after {attempts} attempts, enrollment rejected")]
    RetryBudgetExhausted { attempts: u32 },

    #[error(transparent)]
    Photo(#[from] PhotoError),
    #[error(transparent)]
    Quality(#[from] QualityError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Sync(#[from] SyncError),
}
