//! Submission intake: Draft -> Pending.
//!
//! The only transition a non-owner actor can trigger. Possession of the
//! enrollment link stands in for authentication, so the caller-supplied
//! owner and group ids are trusted as provided; everything else is
//! validated here. The quality pass at this stage is advisory — it gates
//! what gets staged for review, while the authoritative pass happens at
//! processing time.

use crate::error::EnrollError;
use crate::photo::PhotoStore;
use rollcall_core::{FaceLocator, QualityGate, QualityReport};
use rollcall_store::{CacheStore, EnrollmentProfile, PendingEnrollment};

#[derive(Debug, Clone)]
pub struct IntakeConfig {
    /// Minimum number of independently passing photos before a submission
    /// is eligible for review.
    pub min_passing_photos: usize,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            min_passing_photos: 4,
        }
    }
}

/// A client-side draft: nothing here has been persisted yet.
#[derive(Debug, Clone)]
pub struct Submission {
    pub owner_id: String,
    pub target_group_id: Option<String>,
    pub profile: EnrollmentProfile,
    /// Encoded photo bytes, evaluated independently.
    pub photos: Vec<Vec<u8>>,
}

/// A persisted Pending enrollment plus the per-photo quality reports in
/// submission order, so the submitter sees why any photo was left out.
#[derive(Debug)]
pub struct IntakeOutcome {
    pub enrollment: PendingEnrollment,
    pub reports: Vec<QualityReport>,
}

/// Validate a draft and persist it as a Pending enrollment.
///
/// Only passing photos are staged. Fails with
/// [`EnrollError::Validation`] when required fields are missing or fewer
/// than the configured minimum of photos pass the gate; nothing is
/// persisted in that case.
pub fn submit<L: FaceLocator, P: PhotoStore>(
    gate: &QualityGate<L>,
    photos: &P,
    cache: &CacheStore,
    config: &IntakeConfig,
    submission: Submission,
) -> Result<IntakeOutcome, EnrollError> {
    let mut reasons = Vec::new();
    if submission.profile.display_name.trim().is_empty() {
        reasons.push("display name is required".to_string());
    }
    if submission.owner_id.trim().is_empty() {
        reasons.push("enrollment target owner is missing".to_string());
    }
    if !reasons.is_empty() {
        return Err(EnrollError::Validation { reasons });
    }

    let reports: Vec<QualityReport> = submission
        .photos
        .iter()
        .map(|bytes| gate.evaluate(bytes))
        .collect::<Result<_, _>>()?;

    let passing: Vec<usize> = reports
        .iter()
        .enumerate()
        .filter(|(_, r)| r.passed)
        .map(|(i, _)| i)
        .collect();

    if passing.len() < config.min_passing_photos {
        let mut reasons = vec![format!(
            "need {} passing photos, got {} of {}",
            config.min_passing_photos,
            passing.len(),
            reports.len()
        )];
        for (i, report) in reports.iter().enumerate() {
            if !report.passed {
                reasons.push(format!("photo {}: {}", i + 1, report.reasons.join(", ")));
            }
        }
        return Err(EnrollError::Validation { reasons });
    }

    // Stage the passing photos; roll back on partial failure so no
    // orphaned blobs survive a failed submission.
    let mut staged = Vec::with_capacity(passing.len());
    for &i in &passing {
        match photos.stage(&submission.photos[i]) {
            Ok(photo_ref) => staged.push(photo_ref),
            Err(err) => {
                for photo_ref in &staged {
                    if let Err(purge_err) = photos.delete(photo_ref) {
                        tracing::warn!(photo_ref, error = %purge_err, "staging rollback failed");
                    }
                }
                return Err(err.into());
            }
        }
    }

    let enrollment = PendingEnrollment::new(
        submission.owner_id,
        submission.target_group_id,
        submission.profile,
        staged,
    );
    cache.insert_enrollment(&enrollment)?;

    tracing::info!(
        enrollment_id = %enrollment.id,
        owner_id = %enrollment.owner_id,
        staged = enrollment.staged_photo_refs.len(),
        submitted = reports.len(),
        "submission accepted for review"
    );

    Ok(IntakeOutcome {
        enrollment,
        reports,
    })
}
