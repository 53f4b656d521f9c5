//! Domain entities mirrored in the local cache.
//!
//! All cloud-owned records (identities, embeddings, groups, memberships)
//! plus the pending-enrollment review records and the sync queue entry.
//! Ids are strings: new records get v4 UUIDs, but rows imported from older
//! installs may carry arbitrary ids and are treated as local-only legacy
//! data by the sync engine.

use chrono::{DateTime, Utc};
use rollcall_core::Embedding;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A roster member. Created only via a completed enrollment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Ordered opaque photo storage references.
    #[serde(default)]
    pub photo_refs: Vec<String>,
}

impl Identity {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            display_name: display_name.into(),
            contact: None,
            notes: None,
            photo_refs: Vec::new(),
        }
    }
}

/// One reference embedding for an identity. Immutable once created:
/// a bad embedding is deleted and replaced, never updated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub id: String,
    pub owner_id: String,
    pub embedding: Embedding,
    pub source_photo_ref: String,
    pub quality_score: u8,
    pub created_at: DateTime<Utc>,
}

impl EmbeddingRecord {
    pub fn new(
        owner_id: impl Into<String>,
        embedding: Embedding,
        source_photo_ref: impl Into<String>,
        quality_score: u8,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.into(),
            embedding,
            source_photo_ref: source_photo_ref.into(),
            quality_score,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guide_id: Option<String>,
}

/// Membership of a person in a group. Carries its own id so it can be
/// addressed by the generic remote upsert/delete contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    pub id: String,
    pub group_id: String,
    pub person_id: String,
}

impl Membership {
    pub fn new(group_id: impl Into<String>, person_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            group_id: group_id.into(),
            person_id: person_id.into(),
        }
    }
}

/// Profile fields captured at submission time. `display_name` is the only
/// required field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentProfile {
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Review lifecycle of a submission. Draft never persists; terminal
/// states have no outgoing transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrollmentStatus {
    Pending,
    Processing,
    Approved,
    Rejected,
}

impl EnrollmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentStatus::Pending => "pending",
            EnrollmentStatus::Processing => "processing",
            EnrollmentStatus::Approved => "approved",
            EnrollmentStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(EnrollmentStatus::Pending),
            "processing" => Some(EnrollmentStatus::Processing),
            "approved" => Some(EnrollmentStatus::Approved),
            "rejected" => Some(EnrollmentStatus::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EnrollmentStatus::Approved | EnrollmentStatus::Rejected)
    }
}

/// An unreviewed public submission awaiting owner action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingEnrollment {
    pub id: String,
    /// The roster owner who will receive the identity.
    pub owner_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_group_id: Option<String>,
    pub profile: EnrollmentProfile,
    /// Photos parked in the staging namespace, not yet attributed to
    /// any identity.
    pub staged_photo_refs: Vec<String>,
    pub status: EnrollmentStatus,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
}

impl PendingEnrollment {
    pub fn new(
        owner_id: impl Into<String>,
        target_group_id: Option<String>,
        profile: EnrollmentProfile,
        staged_photo_refs: Vec<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.into(),
            target_group_id,
            profile,
            staged_photo_refs,
            status: EnrollmentStatus::Pending,
            retry_count: 0,
            created_at: Utc::now(),
            processed_at: None,
        }
    }
}

/// Cloud-owned entity kinds the sync engine moves back and forth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Identity,
    Embedding,
    Group,
    Membership,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Identity => "identity",
            EntityKind::Embedding => "embedding",
            EntityKind::Group => "group",
            EntityKind::Membership => "membership",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "identity" => Some(EntityKind::Identity),
            "embedding" => Some(EntityKind::Embedding),
            "group" => Some(EntityKind::Group),
            "membership" => Some(EntityKind::Membership),
            _ => None,
        }
    }
}

/// A cloud-owned entity with its payload, as moved by the sync engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Identity(Identity),
    Embedding(EmbeddingRecord),
    Group(Group),
    Membership(Membership),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Identity(_) => EntityKind::Identity,
            Entity::Embedding(_) => EntityKind::Embedding,
            Entity::Group(_) => EntityKind::Group,
            Entity::Membership(_) => EntityKind::Membership,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Entity::Identity(e) => &e.id,
            Entity::Embedding(e) => &e.id,
            Entity::Group(e) => &e.id,
            Entity::Membership(e) => &e.id,
        }
    }

    /// Wire payload for the remote store.
    pub fn payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            Entity::Identity(e) => serde_json::to_value(e),
            Entity::Embedding(e) => serde_json::to_value(e),
            Entity::Group(e) => serde_json::to_value(e),
            Entity::Membership(e) => serde_json::to_value(e),
        }
    }

    /// Rebuild an entity from a remote payload.
    pub fn from_payload(
        kind: EntityKind,
        payload: serde_json::Value,
    ) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            EntityKind::Identity => Entity::Identity(serde_json::from_value(payload)?),
            EntityKind::Embedding => Entity::Embedding(serde_json::from_value(payload)?),
            EntityKind::Group => Entity::Group(serde_json::from_value(payload)?),
            EntityKind::Membership => Entity::Membership(serde_json::from_value(payload)?),
        })
    }

    /// Whether this entity's id may be pushed to the remote store.
    /// The remote schema requires UUID primary keys; anything else is
    /// local-only legacy data.
    pub fn has_uuid_id(&self) -> bool {
        Uuid::parse_str(self.id()).is_ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOp {
    Upsert,
    Delete,
}

impl ChangeOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOp::Upsert => "upsert",
            ChangeOp::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "upsert" => Some(ChangeOp::Upsert),
            "delete" => Some(ChangeOp::Delete),
            _ => None,
        }
    }
}

/// One queued local mutation awaiting push. At most one change exists per
/// `(entity_type, entity_id)`; a newer mutation replaces an older one.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingChange {
    pub entity_type: EntityKind,
    pub entity_id: String,
    pub op: ChangeOp,
    /// Full entity payload for upserts; `None` for deletes.
    pub payload: Option<serde_json::Value>,
    pub enqueued_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            EnrollmentStatus::Pending,
            EnrollmentStatus::Processing,
            EnrollmentStatus::Approved,
            EnrollmentStatus::Rejected,
        ] {
            assert_eq!(EnrollmentStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(EnrollmentStatus::parse("draft"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!EnrollmentStatus::Pending.is_terminal());
        assert!(!EnrollmentStatus::Processing.is_terminal());
        assert!(EnrollmentStatus::Approved.is_terminal());
        assert!(EnrollmentStatus::Rejected.is_terminal());
    }

    #[test]
    fn test_entity_payload_roundtrip() {
        let identity = Identity::new("Dana");
        let entity = Entity::Identity(identity.clone());
        let payload = entity.payload().unwrap();
        let back = Entity::from_payload(EntityKind::Identity, payload).unwrap();
        assert_eq!(back, entity);
    }

    #[test]
    fn test_uuid_id_detection() {
        let fresh = Entity::Identity(Identity::new("Dana"));
        assert!(fresh.has_uuid_id());

        let mut legacy = Identity::new("Old Import");
        legacy.id = "person_42".into();
        assert!(!Entity::Identity(legacy).has_uuid_id());
    }
}
