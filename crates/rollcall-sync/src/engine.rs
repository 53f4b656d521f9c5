//! The sync engine.
//!
//! Local-first writes with a durable push queue, pull with dirty-skip,
//! and the push-before-pull ordering rule. Entities whose ids are not
//! valid UUIDs are local-only legacy data: cached and readable, never
//! pushed, never overwritten by a pull.

use crate::remote::{RemoteError, RemoteStore, SyncScope};
use chrono::Utc;
use rollcall_core::Candidate;
use rollcall_store::{CacheStore, ChangeOp, Entity, EntityKind, PendingChange, StoreError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("sync payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error(transparent)]
    Transient(#[from] RemoteError),
}

/// Outcome of one push pass.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FlushReport {
    pub pushed: usize,
    pub remaining: usize,
}

/// Outcome of one pull pass.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PullReport {
    pub applied: usize,
    /// Entities kept local because a queued/unpushed change is ahead of
    /// the remote copy.
    pub skipped_dirty: usize,
}

/// Reconciles the local cache with the remote store. Owns the only write
/// path for cloud-owned entities.
pub struct SyncEngine<R: RemoteStore> {
    store: Arc<CacheStore>,
    remote: R,
    online: AtomicBool,
}

impl<R: RemoteStore> SyncEngine<R> {
    pub fn new(store: Arc<CacheStore>, remote: R, online: bool) -> Self {
        Self {
            store,
            remote,
            online: AtomicBool::new(online),
        }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Update connectivity. Returns true on an offline→online transition,
    /// the caller's cue to run [`sync_session`](Self::sync_session).
    pub fn set_online(&self, online: bool) -> bool {
        let was = self.online.swap(online, Ordering::SeqCst);
        !was && online
    }

    /// Write an entity: cache first (optimistically clean), then remote
    /// if reachable, otherwise queue the change and mark the row dirty.
    pub async fn write(&self, entity: &Entity) -> Result<(), SyncError> {
        self.store.upsert_entity(entity, false)?;

        if !entity.has_uuid_id() {
            // Legacy id: the remote schema requires UUID keys, so this row
            // stays cache-only rather than corrupting remote state.
            tracing::debug!(id = entity.id(), "non-UUID id, keeping cache-only");
            return Ok(());
        }

        let payload = entity.payload()?;
        if self.is_online() {
            match self
                .remote
                .upsert(entity.kind(), entity.id(), &payload)
                .await
            {
                Ok(()) => {
                    self.store.mark_clean(entity.kind(), entity.id())?;
                    return Ok(());
                }
                Err(err) => {
                    tracing::warn!(
                        kind = entity.kind().as_str(),
                        id = entity.id(),
                        error = %err,
                        "remote push failed, queuing change"
                    );
                }
            }
        }

        self.store.enqueue_change(&PendingChange {
            entity_type: entity.kind(),
            entity_id: entity.id().to_string(),
            op: ChangeOp::Upsert,
            payload: Some(payload),
            enqueued_at: Utc::now(),
        })?;
        self.store.set_dirty(entity.kind(), entity.id(), true)?;
        Ok(())
    }

    /// Delete an entity locally (with cascades) and propagate the delete,
    /// including every cascaded child row, so the remote never keeps an
    /// orphan embedding or membership for a removed identity or group.
    pub async fn delete(&self, kind: EntityKind, id: &str) -> Result<(), SyncError> {
        // Enumerate children before the local cascade wipes them.
        let mut children: Vec<(EntityKind, String)> = Vec::new();
        match kind {
            EntityKind::Identity => {
                for record in self.store.embeddings_by_owner(id)? {
                    children.push((EntityKind::Embedding, record.id));
                }
                for membership in self.store.memberships_for_person(id)? {
                    children.push((EntityKind::Membership, membership.id));
                }
            }
            EntityKind::Group => {
                for membership in self.store.memberships_for_group(id)? {
                    children.push((EntityKind::Membership, membership.id));
                }
            }
            EntityKind::Embedding | EntityKind::Membership => {}
        }

        self.store.delete_entity(kind, id)?;

        // Children first, parent last, mirroring the dependency order the
        // flush pass preserves.
        for (child_kind, child_id) in children {
            self.propagate_delete(child_kind, &child_id).await?;
        }
        self.propagate_delete(kind, id).await
    }

    async fn propagate_delete(&self, kind: EntityKind, id: &str) -> Result<(), SyncError> {
        if Uuid::parse_str(id).is_err() {
            // Never existed remotely; drop any queued change just in case.
            self.store.remove_change(kind, id)?;
            return Ok(());
        }

        if self.is_online() {
            match self.remote.delete(kind, id).await {
                Ok(()) => {
                    self.store.remove_change(kind, id)?;
                    return Ok(());
                }
                Err(err) => {
                    tracing::warn!(kind = kind.as_str(), id, error = %err, "remote delete failed, queuing");
                }
            }
        }

        self.store.enqueue_change(&PendingChange {
            entity_type: kind,
            entity_id: id.to_string(),
            op: ChangeOp::Delete,
            payload: None,
            enqueued_at: Utc::now(),
        })?;
        Ok(())
    }

    /// Push queued changes in enqueue order. Stops at the first failure so
    /// dependent changes (an identity before its embeddings) are never
    /// applied out of order; the remainder is retried on the next trigger.
    pub async fn flush_queue(&self) -> Result<FlushReport, SyncError> {
        let changes = self.store.queued_changes()?;
        let total = changes.len();
        let mut pushed = 0usize;

        for change in changes {
            let result = match (&change.op, &change.payload) {
                (ChangeOp::Upsert, Some(payload)) => {
                    self.remote
                        .upsert(change.entity_type, &change.entity_id, payload)
                        .await
                }
                (ChangeOp::Upsert, None) => {
                    // Queued upsert without a payload is unrecoverable;
                    // drop it rather than wedging the queue.
                    tracing::error!(
                        kind = change.entity_type.as_str(),
                        id = %change.entity_id,
                        "queued upsert has no payload, dropping"
                    );
                    self.store
                        .remove_change(change.entity_type, &change.entity_id)?;
                    continue;
                }
                (ChangeOp::Delete, _) => {
                    self.remote
                        .delete(change.entity_type, &change.entity_id)
                        .await
                }
            };

            match result {
                Ok(()) => {
                    self.store
                        .remove_change(change.entity_type, &change.entity_id)?;
                    if change.op == ChangeOp::Upsert {
                        self.store.mark_clean(change.entity_type, &change.entity_id)?;
                    }
                    pushed += 1;
                }
                Err(err) => {
                    tracing::warn!(
                        kind = change.entity_type.as_str(),
                        id = %change.entity_id,
                        pushed,
                        error = %err,
                        "push failed, stopping flush pass"
                    );
                    break;
                }
            }
        }

        let report = FlushReport {
            pushed,
            remaining: total - pushed,
        };
        tracing::info!(pushed = report.pushed, remaining = report.remaining, "flush pass done");
        Ok(report)
    }

    /// Pull authoritative state for a scope. Rows with unpushed local
    /// changes are kept as-is; everything else is overwritten. Run only
    /// after [`flush_queue`](Self::flush_queue).
    pub async fn pull(&self, scope: &SyncScope) -> Result<PullReport, SyncError> {
        let fetched = self.remote.list_by_scope(scope).await?;
        let mut report = PullReport::default();

        for remote_entity in fetched {
            let entity = match Entity::from_payload(remote_entity.kind, remote_entity.payload) {
                Ok(entity) => entity,
                Err(err) => {
                    tracing::warn!(
                        kind = remote_entity.kind.as_str(),
                        id = %remote_entity.id,
                        error = %err,
                        "malformed remote payload, skipping"
                    );
                    continue;
                }
            };

            if !entity.has_uuid_id() {
                // Legacy ids are cache-only; whatever the remote claims
                // about one never lands locally.
                tracing::warn!(id = entity.id(), "remote sent a non-UUID id, skipping");
                continue;
            }

            if let Some(state) = self.store.sync_state(entity.kind(), entity.id())? {
                if state.dirty {
                    report.skipped_dirty += 1;
                    continue;
                }
            }

            self.store.apply_remote(&entity)?;
            report.applied += 1;
        }

        tracing::info!(
            applied = report.applied,
            skipped_dirty = report.skipped_dirty,
            "pull done"
        );
        Ok(report)
    }

    /// One full reconciliation pass: push, then pull. The ordering is the
    /// core correctness rule — a queued local edit must land remotely
    /// before the remote copy is read back.
    pub async fn sync_session(&self, scope: &SyncScope) -> Result<(FlushReport, PullReport), SyncError> {
        let flush = self.flush_queue().await?;
        let pull = self.pull(scope).await?;
        Ok((flush, pull))
    }

    /// Load a group's reference embeddings into memory for the matcher.
    /// Pure cache read: call after `sync_session` at session start.
    pub fn warm_group(&self, group_id: &str) -> Result<Vec<Candidate>, SyncError> {
        let members = self.store.memberships_for_group(group_id)?;
        let owner_ids: Vec<String> = members.into_iter().map(|m| m.person_id).collect();
        let by_owner = self.store.embeddings_by_owners(&owner_ids)?;

        let candidates = owner_ids
            .into_iter()
            .filter_map(|owner_id| {
                let records = by_owner.get(&owner_id)?;
                Some(Candidate {
                    owner_id: owner_id.clone(),
                    embeddings: records.iter().map(|r| r.embedding.clone()).collect(),
                })
            })
            .collect::<Vec<_>>();

        tracing::info!(group_id, owners = candidates.len(), "gallery warmed");
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RemoteEntity;
    use rollcall_core::Embedding;
    use rollcall_store::{EmbeddingRecord, Group, Identity, Membership};
    use serde_json::Value;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    /// In-memory remote with scriptable failures.
    #[derive(Default)]
    struct MemoryRemote {
        entities: Mutex<HashMap<(EntityKind, String), Value>>,
        fail_ids: Mutex<HashSet<String>>,
    }

    impl MemoryRemote {
        fn insert(&self, kind: EntityKind, id: &str, payload: Value) {
            self.entities
                .lock()
                .unwrap()
                .insert((kind, id.to_string()), payload);
        }

        fn get(&self, kind: EntityKind, id: &str) -> Option<Value> {
            self.entities
                .lock()
                .unwrap()
                .get(&(kind, id.to_string()))
                .cloned()
        }

        fn fail_on(&self, id: &str) {
            self.fail_ids.lock().unwrap().insert(id.to_string());
        }

        fn clear_failures(&self) {
            self.fail_ids.lock().unwrap().clear();
        }

        fn ids(&self) -> Vec<String> {
            self.entities
                .lock()
                .unwrap()
                .keys()
                .map(|(_, id)| id.clone())
                .collect()
        }

        fn check(&self, id: &str) -> Result<(), RemoteError> {
            if self.fail_ids.lock().unwrap().contains(id) {
                Err(RemoteError::Unavailable("scripted failure".into()))
            } else {
                Ok(())
            }
        }
    }

    impl RemoteStore for &MemoryRemote {
        async fn upsert(
            &self,
            kind: EntityKind,
            id: &str,
            payload: &Value,
        ) -> Result<(), RemoteError> {
            self.check(id)?;
            self.insert(kind, id, payload.clone());
            Ok(())
        }

        async fn delete(&self, kind: EntityKind, id: &str) -> Result<(), RemoteError> {
            self.check(id)?;
            self.entities.lock().unwrap().remove(&(kind, id.to_string()));
            Ok(())
        }

        async fn list_by_scope(&self, _scope: &SyncScope) -> Result<Vec<RemoteEntity>, RemoteError> {
            Ok(self
                .entities
                .lock()
                .unwrap()
                .iter()
                .map(|((kind, id), payload)| RemoteEntity {
                    kind: *kind,
                    id: id.clone(),
                    payload: payload.clone(),
                })
                .collect())
        }
    }

    fn engine(remote: &MemoryRemote, online: bool) -> SyncEngine<&MemoryRemote> {
        let store = Arc::new(CacheStore::open_in_memory().unwrap());
        SyncEngine::new(store, remote, online)
    }

    fn scope() -> SyncScope {
        SyncScope::Owner("owner".into())
    }

    #[tokio::test]
    async fn test_online_write_reaches_remote_and_stays_clean() {
        let remote = MemoryRemote::default();
        let engine = engine(&remote, true);
        let identity = Identity::new("Dana");

        engine.write(&Entity::Identity(identity.clone())).await.unwrap();

        assert!(remote.get(EntityKind::Identity, &identity.id).is_some());
        assert_eq!(engine.store().queue_len().unwrap(), 0);
        let state = engine
            .store()
            .sync_state(EntityKind::Identity, &identity.id)
            .unwrap()
            .unwrap();
        assert!(!state.dirty);
        assert!(state.last_synced_at.is_some());
    }

    #[tokio::test]
    async fn test_offline_write_queues_and_marks_dirty() {
        let remote = MemoryRemote::default();
        let engine = engine(&remote, false);
        let identity = Identity::new("Dana");

        engine.write(&Entity::Identity(identity.clone())).await.unwrap();

        // Cached and readable immediately.
        assert!(engine.store().get_identity(&identity.id).unwrap().is_some());
        // Not on the remote, but queued and dirty.
        assert!(remote.get(EntityKind::Identity, &identity.id).is_none());
        assert_eq!(engine.store().queue_len().unwrap(), 1);
        assert!(engine
            .store()
            .sync_state(EntityKind::Identity, &identity.id)
            .unwrap()
            .unwrap()
            .dirty);
    }

    #[tokio::test]
    async fn test_push_failure_falls_back_to_queue() {
        let remote = MemoryRemote::default();
        let engine = engine(&remote, true);
        let identity = Identity::new("Dana");
        remote.fail_on(&identity.id);

        engine.write(&Entity::Identity(identity.clone())).await.unwrap();

        assert_eq!(engine.store().queue_len().unwrap(), 1);
        assert!(engine
            .store()
            .sync_state(EntityKind::Identity, &identity.id)
            .unwrap()
            .unwrap()
            .dirty);
    }

    #[tokio::test]
    async fn test_offline_then_online_round_trip() {
        // Scenario: write offline, come online, flush then pull. The
        // stale remote copy must not clobber the newer local write.
        let remote = MemoryRemote::default();
        let engine = engine(&remote, false);

        let mut identity = Identity::new("Dana");
        remote.insert(
            EntityKind::Identity,
            &identity.id,
            serde_json::json!({ "id": identity.id, "display_name": "Stale Name" }),
        );

        identity.display_name = "Dana Updated".into();
        engine.write(&Entity::Identity(identity.clone())).await.unwrap();

        assert!(engine.set_online(true));
        let (flush, pull) = engine.sync_session(&scope()).await.unwrap();
        assert_eq!(flush.pushed, 1);
        assert_eq!(flush.remaining, 0);
        assert_eq!(pull.applied, 1);

        // Remote now holds the local edit, and the cache kept it too.
        let pushed = remote.get(EntityKind::Identity, &identity.id).unwrap();
        assert_eq!(pushed["display_name"], "Dana Updated");
        assert_eq!(
            engine.store().get_identity(&identity.id).unwrap().unwrap().display_name,
            "Dana Updated"
        );
        assert_eq!(engine.store().queue_len().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pull_skips_dirty_rows() {
        let remote = MemoryRemote::default();
        let engine = engine(&remote, false);

        let identity = Identity::new("Local Edit");
        engine.write(&Entity::Identity(identity.clone())).await.unwrap();
        remote.insert(
            EntityKind::Identity,
            &identity.id,
            serde_json::json!({ "id": identity.id, "display_name": "Remote Version" }),
        );

        // Pull without flushing first (simulates a failed push pass).
        engine.set_online(true);
        let pull = engine.pull(&scope()).await.unwrap();

        assert_eq!(pull.applied, 0);
        assert_eq!(pull.skipped_dirty, 1);
        assert_eq!(
            engine.store().get_identity(&identity.id).unwrap().unwrap().display_name,
            "Local Edit"
        );
    }

    #[tokio::test]
    async fn test_pull_overwrites_clean_rows() {
        let remote = MemoryRemote::default();
        let engine = engine(&remote, true);

        let identity = Identity::new("Old Name");
        engine.write(&Entity::Identity(identity.clone())).await.unwrap();
        remote.insert(
            EntityKind::Identity,
            &identity.id,
            serde_json::json!({ "id": identity.id, "display_name": "Renamed Elsewhere" }),
        );

        let pull = engine.pull(&scope()).await.unwrap();
        assert_eq!(pull.applied, 1);
        assert_eq!(
            engine.store().get_identity(&identity.id).unwrap().unwrap().display_name,
            "Renamed Elsewhere"
        );
    }

    #[tokio::test]
    async fn test_flush_stops_at_first_failure_preserving_order() {
        let remote = MemoryRemote::default();
        let engine = engine(&remote, false);

        let first = Identity::new("First");
        let second = Identity::new("Second");
        engine.write(&Entity::Identity(first.clone())).await.unwrap();
        engine.write(&Entity::Identity(second.clone())).await.unwrap();

        remote.fail_on(&first.id);
        engine.set_online(true);
        let report = engine.flush_queue().await.unwrap();

        assert_eq!(report.pushed, 0);
        assert_eq!(report.remaining, 2);
        assert!(remote.ids().is_empty());

        // Next trigger succeeds and drains in order.
        remote.clear_failures();
        let report = engine.flush_queue().await.unwrap();
        assert_eq!(report.pushed, 2);
        assert_eq!(engine.store().queue_len().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_non_uuid_id_never_pushed() {
        let remote = MemoryRemote::default();
        let engine = engine(&remote, true);

        let mut legacy = Identity::new("Imported");
        legacy.id = "legacy_007".into();
        engine.write(&Entity::Identity(legacy.clone())).await.unwrap();

        // Cached but never queued, never sent.
        assert!(engine.store().get_identity("legacy_007").unwrap().is_some());
        assert_eq!(engine.store().queue_len().unwrap(), 0);
        assert!(remote.ids().is_empty());

        let report = engine.flush_queue().await.unwrap();
        assert_eq!(report.pushed, 0);
        assert!(remote.ids().is_empty());
    }

    #[tokio::test]
    async fn test_pull_never_touches_legacy_rows() {
        let remote = MemoryRemote::default();
        let engine = engine(&remote, true);

        let mut legacy = Identity::new("Imported");
        legacy.id = "legacy_007".into();
        engine.write(&Entity::Identity(legacy.clone())).await.unwrap();
        remote.insert(
            EntityKind::Identity,
            "legacy_007",
            serde_json::json!({ "id": "legacy_007", "display_name": "Remote Claim" }),
        );

        let pull = engine.pull(&scope()).await.unwrap();
        assert_eq!(pull.applied, 0);
        assert_eq!(
            engine.store().get_identity("legacy_007").unwrap().unwrap().display_name,
            "Imported"
        );
    }

    #[tokio::test]
    async fn test_delete_propagates_and_cascades() {
        let remote = MemoryRemote::default();
        let engine = engine(&remote, true);

        let group = Group {
            id: uuid::Uuid::new_v4().to_string(),
            name: "Tuesday".into(),
            guide_id: None,
        };
        let identity = Identity::new("Dana");
        engine.write(&Entity::Identity(identity.clone())).await.unwrap();
        engine.write(&Entity::Group(group.clone())).await.unwrap();
        let record = EmbeddingRecord::new(&identity.id, Embedding::new(vec![1.0, 0.0]), "p", 80);
        engine.write(&Entity::Embedding(record.clone())).await.unwrap();
        let membership = Membership::new(&group.id, &identity.id);
        engine.write(&Entity::Membership(membership.clone())).await.unwrap();

        engine.delete(EntityKind::Identity, &identity.id).await.unwrap();

        assert!(engine.store().get_identity(&identity.id).unwrap().is_none());
        assert!(engine.store().embeddings_by_owner(&identity.id).unwrap().is_empty());
        // The remote loses the cascaded rows too, not just the identity.
        assert!(remote.get(EntityKind::Identity, &identity.id).is_none());
        assert!(remote.get(EntityKind::Embedding, &record.id).is_none());
        assert!(remote.get(EntityKind::Membership, &membership.id).is_none());
        assert_eq!(engine.store().queue_len().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_offline_delete_supersedes_queued_child_upserts() {
        // Write offline so the identity and its embedding sit in the queue
        // as upserts, then delete the identity before anything is pushed.
        // The flush must not resurrect either row on the remote.
        let remote = MemoryRemote::default();
        let engine = engine(&remote, false);

        let identity = Identity::new("Dana");
        engine.write(&Entity::Identity(identity.clone())).await.unwrap();
        let record = EmbeddingRecord::new(&identity.id, Embedding::new(vec![1.0, 0.0]), "p", 80);
        engine.write(&Entity::Embedding(record.clone())).await.unwrap();
        assert_eq!(engine.store().queue_len().unwrap(), 2);

        engine.delete(EntityKind::Identity, &identity.id).await.unwrap();

        let queued = engine.store().queued_changes().unwrap();
        assert_eq!(queued.len(), 2);
        assert!(queued.iter().all(|c| c.op == ChangeOp::Delete));

        engine.set_online(true);
        engine.flush_queue().await.unwrap();
        assert!(remote.ids().is_empty());
        assert_eq!(engine.store().queue_len().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_offline_delete_queues() {
        let remote = MemoryRemote::default();
        let engine = engine(&remote, true);
        let identity = Identity::new("Dana");
        engine.write(&Entity::Identity(identity.clone())).await.unwrap();

        engine.set_online(false);
        engine.delete(EntityKind::Identity, &identity.id).await.unwrap();
        assert_eq!(engine.store().queue_len().unwrap(), 1);

        engine.set_online(true);
        engine.flush_queue().await.unwrap();
        assert!(remote.get(EntityKind::Identity, &identity.id).is_none());
        assert_eq!(engine.store().queue_len().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_set_online_reports_transition() {
        let remote = MemoryRemote::default();
        let engine = engine(&remote, false);
        assert!(engine.set_online(true));
        assert!(!engine.set_online(true));
        assert!(!engine.set_online(false));
        assert!(engine.set_online(true));
    }

    #[tokio::test]
    async fn test_warm_group_builds_gallery() {
        let remote = MemoryRemote::default();
        let engine = engine(&remote, true);

        let group = Group {
            id: uuid::Uuid::new_v4().to_string(),
            name: "Tuesday".into(),
            guide_id: None,
        };
        let alice = Identity::new("Alice");
        let bob = Identity::new("Bob");
        let carol = Identity::new("Carol"); // not a member

        for identity in [&alice, &bob, &carol] {
            engine.write(&Entity::Identity((*identity).clone())).await.unwrap();
        }
        engine.write(&Entity::Group(group.clone())).await.unwrap();
        for member in [&alice, &bob] {
            engine
                .write(&Entity::Membership(Membership::new(&group.id, &member.id)))
                .await
                .unwrap();
        }
        for (owner, v) in [(&alice, vec![1.0, 0.0]), (&bob, vec![0.0, 1.0])] {
            engine
                .write(&Entity::Embedding(EmbeddingRecord::new(
                    &owner.id,
                    Embedding::new(v),
                    "p",
                    85,
                )))
                .await
                .unwrap();
        }
        engine
            .write(&Entity::Embedding(EmbeddingRecord::new(
                &carol.id,
                Embedding::new(vec![0.5, 0.5]),
                "p",
                85,
            )))
            .await
            .unwrap();

        let gallery = engine.warm_group(&group.id).unwrap();
        assert_eq!(gallery.len(), 2);
        let owners: Vec<&str> = gallery.iter().map(|c| c.owner_id.as_str()).collect();
        assert!(owners.contains(&alice.id.as_str()));
        assert!(owners.contains(&bob.id.as_str()));
        assert!(!owners.contains(&carol.id.as_str()));
    }
}
