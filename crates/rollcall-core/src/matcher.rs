//! Ranked recognition matcher.
//!
//! Compares a live query embedding against a warmed, in-memory candidate
//! set and returns the best identity or [`MatchOutcome::NoMatch`]. Never
//! touches the network or disk — warming the candidate set is the sync
//! engine's job, done once per session, not per frame.

use crate::types::Embedding;

/// One candidate owner and their reference embeddings.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub owner_id: String,
    pub embeddings: Vec<Embedding>,
}

/// Result of matching a query embedding against a candidate set.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Match { owner_id: String, score: f32 },
    NoMatch,
}

impl MatchOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchOutcome::Match { .. })
    }
}

/// Match `query` against `candidates`.
///
/// Each owner's representative score is the maximum cosine similarity over
/// all of that owner's embeddings — an owner is close if *any* reference
/// photo is close. The top owner wins only if their score reaches
/// `threshold` and beats the second-best distinct owner by at least
/// `margin`; an ambiguous top-two is a [`MatchOutcome::NoMatch`].
pub fn match_query(
    query: &Embedding,
    candidates: &[Candidate],
    threshold: f32,
    margin: f32,
) -> MatchOutcome {
    let mut best: Option<(&str, f32)> = None;
    let mut second_score = f32::NEG_INFINITY;

    for candidate in candidates {
        let mut owner_best = f32::NEG_INFINITY;
        for embedding in &candidate.embeddings {
            let sim = query.similarity(embedding);
            if sim > owner_best {
                owner_best = sim;
            }
        }
        if owner_best == f32::NEG_INFINITY {
            // Owner with no embeddings contributes nothing.
            continue;
        }

        match best {
            None => best = Some((&candidate.owner_id, owner_best)),
            Some((_, top)) if owner_best > top => {
                second_score = top;
                best = Some((&candidate.owner_id, owner_best));
            }
            Some(_) => {
                if owner_best > second_score {
                    second_score = owner_best;
                }
            }
        }
    }

    let Some((owner_id, score)) = best else {
        return MatchOutcome::NoMatch;
    };

    if score < threshold {
        tracing::trace!(owner_id, score, threshold, "below threshold");
        return MatchOutcome::NoMatch;
    }

    if second_score > f32::NEG_INFINITY && (score - second_score) < margin {
        tracing::debug!(
            owner_id,
            score,
            second_score,
            margin,
            "ambiguous match rejected"
        );
        return MatchOutcome::NoMatch;
    }

    MatchOutcome::Match {
        owner_id: owner_id.to_string(),
        score,
    }
}
