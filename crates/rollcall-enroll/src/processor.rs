//! Owner review: accept / reject, and the Processing pipeline.
//!
//! `Pending -> Processing` is a single conditional status update, so two
//! simultaneous accepts produce exactly one winner. Processing runs the
//! authoritative quality gate on every staged photo, extracts embeddings,
//! relocates photos into the new identity's namespace, and commits the
//! identity through the sync engine. A failure anywhere rolls the
//! enrollment back to Pending (never an Approved record with zero
//! embeddings) until the retry budget escalates it to Rejected.

use crate::error::EnrollError;
use crate::photo::{PhotoStore, STAGING_NAMESPACE};
use chrono::Utc;
use rollcall_core::{FaceLocator, FeatureExtractor, QualityGate, QualityReport};
use rollcall_store::{
    EmbeddingRecord, Entity, EnrollmentStatus, Identity, Membership, PendingEnrollment,
};
use rollcall_sync::{RemoteStore, SyncEngine};
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Failed Processing attempts tolerated before the enrollment is
    /// rejected outright.
    pub retry_budget: u32,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self { retry_budget: 3 }
    }
}

/// Result of a successful accept.
#[derive(Debug)]
pub struct AcceptOutcome {
    pub identity_id: String,
    pub embeddings_created: usize,
    /// Authoritative reports for the staged photos that could be read and
    /// decoded, in staged order. An unreadable or undecodable photo is
    /// purged without a report.
    pub reports: Vec<QualityReport>,
}

/// Why one Processing attempt did not commit. Internal: callers see
/// [`EnrollError::ProcessingIncomplete`] or
/// [`EnrollError::RetryBudgetExhausted`].
#[derive(Error, Debug)]
enum ProcessFailure {
    #[error("no staged photo passed the authoritative quality gate")]
    NoQualifyingPhotos,
    #[error("photo relocation failed: {0}")]
    Relocate(crate::photo::PhotoError),
    #[error("commit failed: {0}")]
    Commit(rollcall_sync::SyncError),
}

/// Owner accepts a pending enrollment.
///
/// Exactly one concurrent caller enters Processing; the rest get
/// [`EnrollError::AlreadyProcessed`]. On success the enrollment is
/// Approved with exactly one identity and one embedding per qualifying
/// photo.
pub async fn accept<L, X, P, R>(
    gate: &QualityGate<L>,
    extractor: &X,
    photos: &P,
    sync: &SyncEngine<R>,
    config: &ProcessorConfig,
    enrollment_id: &str,
) -> Result<AcceptOutcome, EnrollError>
where
    L: FaceLocator,
    X: FeatureExtractor,
    P: PhotoStore,
    R: RemoteStore,
{
    let store = sync.store();
    let enrollment = store
        .get_enrollment(enrollment_id)?
        .ok_or_else(|| EnrollError::NotFound(enrollment_id.to_string()))?;

    if !store.try_begin_processing(enrollment_id)? {
        tracing::info!(enrollment_id, "accept lost the processing race");
        return Err(EnrollError::AlreadyProcessed);
    }

    match process(gate, extractor, photos, sync, &enrollment).await {
        Ok(outcome) => {
            store.finish_enrollment(enrollment_id, EnrollmentStatus::Approved, Utc::now())?;
            tracing::info!(
                enrollment_id,
                identity_id = %outcome.identity_id,
                embeddings = outcome.embeddings_created,
                "enrollment approved"
            );
            Ok(outcome)
        }
        Err(failure) => {
            let attempt = store.revert_to_pending(enrollment_id)?;
            tracing::warn!(enrollment_id, attempt, error = %failure, "processing attempt failed");

            if attempt >= config.retry_budget {
                if store.reject_pending(enrollment_id, Utc::now())? {
                    purge_photos(photos, &enrollment.staged_photo_refs);
                }
                tracing::warn!(enrollment_id, attempts = attempt, "retry budget exhausted, rejected");
                return Err(EnrollError::RetryBudgetExhausted { attempts: attempt });
            }

            Err(EnrollError::ProcessingIncomplete {
                attempt,
                budget: config.retry_budget,
                reason: failure.to_string(),
            })
        }
    }
}

/// One Processing attempt. Mutations happen only after every staged photo
/// has been evaluated and extracted, and are unwound on failure so the
/// enrollment stays retryable.
async fn process<L, X, P, R>(
    gate: &QualityGate<L>,
    extractor: &X,
    photos: &P,
    sync: &SyncEngine<R>,
    enrollment: &PendingEnrollment,
) -> Result<AcceptOutcome, ProcessFailure>
where
    L: FaceLocator,
    X: FeatureExtractor,
    P: PhotoStore,
    R: RemoteStore,
{
    let mut reports = Vec::with_capacity(enrollment.staged_photo_refs.len());
    let mut qualifying: Vec<(&str, rollcall_core::Embedding, u8)> = Vec::new();
    let mut failed_refs: Vec<&str> = Vec::new();

    for photo_ref in &enrollment.staged_photo_refs {
        let bytes = match photos.load(photo_ref) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(photo_ref, error = %err, "staged photo unreadable, skipping");
                failed_refs.push(photo_ref);
                continue;
            }
        };

        let report = match gate.evaluate(&bytes) {
            Ok(report) => report,
            Err(err) => {
                tracing::warn!(photo_ref, error = %err, "staged photo undecodable, skipping");
                failed_refs.push(photo_ref);
                continue;
            }
        };

        let passed = report.passed;
        reports.push(report);
        if !passed {
            failed_refs.push(photo_ref);
            continue;
        }

        match extractor.extract(&bytes) {
            Ok(embedding) => {
                let score = reports.last().map(|r| r.score).unwrap_or(0);
                qualifying.push((photo_ref, embedding, score));
            }
            Err(err) => {
                tracing::warn!(photo_ref, error = %err, "embedding extraction failed, skipping photo");
                failed_refs.push(photo_ref);
            }
        }
    }

    if qualifying.is_empty() {
        return Err(ProcessFailure::NoQualifyingPhotos);
    }

    let mut identity = Identity::new(enrollment.profile.display_name.clone());
    identity.contact = enrollment.profile.contact.clone();
    identity.notes = enrollment.profile.notes.clone();
    let namespace = format!("people/{}", identity.id);

    // Relocate qualifying photos into the identity namespace. Unwind on
    // partial failure so the staged set is intact for the next attempt.
    let mut moved: Vec<(String, rollcall_core::Embedding, u8)> = Vec::new();
    for (photo_ref, embedding, score) in qualifying {
        match photos.relocate(photo_ref, &namespace) {
            Ok(new_ref) => moved.push((new_ref, embedding, score)),
            Err(err) => {
                unstage(photos, moved.iter().map(|(r, _, _)| r.as_str()));
                return Err(ProcessFailure::Relocate(err));
            }
        }
    }

    identity.photo_refs = moved.iter().map(|(r, _, _)| r.clone()).collect();

    // Identity first, then its embeddings, then the membership. The
    // queue preserves this order for the remote store too.
    if let Err(err) = sync.write(&Entity::Identity(identity.clone())).await {
        unstage(photos, moved.iter().map(|(r, _, _)| r.as_str()));
        return Err(ProcessFailure::Commit(err));
    }

    for (photo_ref, embedding, score) in &moved {
        let record = EmbeddingRecord::new(&identity.id, embedding.clone(), photo_ref, *score);
        if let Err(err) = sync.write(&Entity::Embedding(record)).await {
            rollback_identity(sync, &identity.id).await;
            unstage(photos, moved.iter().map(|(r, _, _)| r.as_str()));
            return Err(ProcessFailure::Commit(err));
        }
    }

    if let Some(group_id) = &enrollment.target_group_id {
        let membership = Membership::new(group_id, &identity.id);
        if let Err(err) = sync.write(&Entity::Membership(membership)).await {
            rollback_identity(sync, &identity.id).await;
            unstage(photos, moved.iter().map(|(r, _, _)| r.as_str()));
            return Err(ProcessFailure::Commit(err));
        }
    }

    // Committed. Remaining staged photos did not qualify; purge them.
    purge_photos(photos, failed_refs);

    Ok(AcceptOutcome {
        identity_id: identity.id,
        embeddings_created: moved.len(),
        reports,
    })
}

/// Owner rejects an enrollment: directly from Pending, or out of a
/// Processing attempt. Purges the staged photos; no identity is created.
pub async fn reject<P, R>(
    photos: &P,
    sync: &SyncEngine<R>,
    enrollment_id: &str,
) -> Result<(), EnrollError>
where
    P: PhotoStore,
    R: RemoteStore,
{
    let store = sync.store();
    let enrollment = store
        .get_enrollment(enrollment_id)?
        .ok_or_else(|| EnrollError::NotFound(enrollment_id.to_string()))?;

    let rejected = match enrollment.status {
        EnrollmentStatus::Pending => store.reject_pending(enrollment_id, Utc::now())?,
        EnrollmentStatus::Processing => store
            .finish_enrollment(enrollment_id, EnrollmentStatus::Rejected, Utc::now())
            .is_ok(),
        EnrollmentStatus::Approved | EnrollmentStatus::Rejected => false,
    };

    if !rejected {
        return Err(EnrollError::AlreadyProcessed);
    }

    purge_photos(photos, &enrollment.staged_photo_refs);
    tracing::info!(enrollment_id, "enrollment rejected");
    Ok(())
}

/// Best-effort purge; a leaked staged blob is logged, not fatal.
fn purge_photos<'a, P: PhotoStore>(
    photos: &P,
    refs: impl IntoIterator<Item = impl AsRef<str> + 'a>,
) {
    for photo_ref in refs {
        let photo_ref = photo_ref.as_ref();
        if let Err(err) = photos.delete(photo_ref) {
            tracing::warn!(photo_ref, error = %err, "failed to purge staged photo");
        }
    }
}

/// Move already-relocated photos back to staging after a failed attempt.
fn unstage<'a, P: PhotoStore>(photos: &P, moved: impl Iterator<Item = &'a str>) {
    for photo_ref in moved {
        if let Err(err) = photos.relocate(photo_ref, STAGING_NAMESPACE) {
            tracing::warn!(photo_ref, error = %err, "failed to return photo to staging");
        }
    }
}

/// Delete a half-committed identity (cascades to its embeddings).
async fn rollback_identity<R: RemoteStore>(sync: &SyncEngine<R>, identity_id: &str) {
    if let Err(err) = sync
        .delete(rollcall_store::EntityKind::Identity, identity_id)
        .await
    {
        tracing::error!(identity_id, error = %err, "failed to roll back identity");
    }
}
