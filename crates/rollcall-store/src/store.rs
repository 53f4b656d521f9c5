//! SQLite-backed cache store.
//!
//! Single-writer discipline: only the sync engine (and the enrollment
//! processor acting through it) mutates cloud-owned rows; readers get
//! plain snapshots. The store itself is synchronous — callers that need
//! async serialize access through the daemon's worker thread.

use crate::codec::{blob_to_embedding, embedding_to_blob};
use crate::entity::{
    ChangeOp, EmbeddingRecord, Entity, EntityKind, EnrollmentStatus, Group, Identity, Membership,
    PendingChange, PendingEnrollment,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("corrupt row in {table}: {detail}")]
    Corrupt {
        table: &'static str,
        detail: String,
    },
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
}

/// Sync metadata for one cached row.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncState {
    pub dirty: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS identities (
    id             TEXT PRIMARY KEY,
    display_name   TEXT NOT NULL,
    contact        TEXT,
    notes          TEXT,
    photo_refs     TEXT NOT NULL DEFAULT '[]',
    dirty          INTEGER NOT NULL DEFAULT 0,
    last_synced_at TEXT,
    local_rev      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS embeddings (
    id               TEXT PRIMARY KEY,
    owner_id         TEXT NOT NULL,
    vector           BLOB NOT NULL,
    source_photo_ref TEXT NOT NULL,
    quality_score    INTEGER NOT NULL,
    created_at       TEXT NOT NULL,
    dirty            INTEGER NOT NULL DEFAULT 0,
    last_synced_at   TEXT,
    local_rev        TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_embeddings_owner ON embeddings(owner_id);

CREATE TABLE IF NOT EXISTS groups (
    id             TEXT PRIMARY KEY,
    name           TEXT NOT NULL,
    guide_id       TEXT,
    dirty          INTEGER NOT NULL DEFAULT 0,
    last_synced_at TEXT,
    local_rev      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS memberships (
    id             TEXT PRIMARY KEY,
    group_id       TEXT NOT NULL,
    person_id      TEXT NOT NULL,
    dirty          INTEGER NOT NULL DEFAULT 0,
    last_synced_at TEXT,
    local_rev      TEXT NOT NULL,
    UNIQUE (group_id, person_id)
);

CREATE TABLE IF NOT EXISTS pending_enrollments (
    id                TEXT PRIMARY KEY,
    owner_id          TEXT NOT NULL,
    target_group_id   TEXT,
    profile           TEXT NOT NULL,
    staged_photo_refs TEXT NOT NULL DEFAULT '[]',
    status            TEXT NOT NULL,
    retry_count       INTEGER NOT NULL DEFAULT 0,
    created_at        TEXT NOT NULL,
    processed_at      TEXT
);
CREATE INDEX IF NOT EXISTS idx_pending_owner ON pending_enrollments(owner_id);

CREATE TABLE IF NOT EXISTS pending_changes (
    entity_type TEXT NOT NULL,
    entity_id   TEXT NOT NULL,
    op          TEXT NOT NULL,
    payload     TEXT,
    enqueued_at TEXT NOT NULL,
    PRIMARY KEY (entity_type, entity_id)
);
";

/// The local cache. Cheap to share behind an `Arc`.
pub struct CacheStore {
    conn: Mutex<Connection>,
}

impl CacheStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(SCHEMA)?;
        tracing::info!(path = %path.display(), "cache store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("cache store lock poisoned")
    }

    // --- cloud-owned entities -------------------------------------------

    /// Upsert an entity into the cache. `dirty` marks whether the row is
    /// ahead of the remote store. `last_synced_at` is preserved unless a
    /// value is supplied.
    pub fn upsert_entity(&self, entity: &Entity, dirty: bool) -> Result<(), StoreError> {
        self.upsert_inner(entity, dirty, None)
    }

    /// Overwrite a cache row with the authoritative remote version.
    /// Clears `dirty` and stamps `last_synced_at`. The dirty-skip decision
    /// belongs to the sync engine, not here.
    pub fn apply_remote(&self, entity: &Entity) -> Result<(), StoreError> {
        self.upsert_inner(entity, false, Some(Utc::now()))
    }

    fn upsert_inner(
        &self,
        entity: &Entity,
        dirty: bool,
        synced_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let conn = self.conn();
        let rev = Uuid::new_v4().to_string();
        let dirty = dirty as i64;
        let synced = synced_at.map(|t| t.to_rfc3339());

        match entity {
            Entity::Identity(e) => {
                let photo_refs = serde_json::to_string(&e.photo_refs)?;
                conn.execute(
                    "INSERT INTO identities
                         (id, display_name, contact, notes, photo_refs, dirty, last_synced_at, local_rev)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                     ON CONFLICT(id) DO UPDATE SET
                         display_name = excluded.display_name,
                         contact = excluded.contact,
                         notes = excluded.notes,
                         photo_refs = excluded.photo_refs,
                         dirty = excluded.dirty,
                         last_synced_at = COALESCE(excluded.last_synced_at, identities.last_synced_at),
                         local_rev = excluded.local_rev",
                    params![e.id, e.display_name, e.contact, e.notes, photo_refs, dirty, synced, rev],
                )?;
            }
            Entity::Embedding(e) => {
                conn.execute(
                    "INSERT INTO embeddings
                         (id, owner_id, vector, source_photo_ref, quality_score, created_at,
                          dirty, last_synced_at, local_rev)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                     ON CONFLICT(id) DO UPDATE SET
                         owner_id = excluded.owner_id,
                         vector = excluded.vector,
                         source_photo_ref = excluded.source_photo_ref,
                         quality_score = excluded.quality_score,
                         created_at = excluded.created_at,
                         dirty = excluded.dirty,
                         last_synced_at = COALESCE(excluded.last_synced_at, embeddings.last_synced_at),
                         local_rev = excluded.local_rev",
                    params![
                        e.id,
                        e.owner_id,
                        embedding_to_blob(&e.embedding),
                        e.source_photo_ref,
                        e.quality_score,
                        e.created_at.to_rfc3339(),
                        dirty,
                        synced,
                        rev
                    ],
                )?;
            }
            Entity::Group(e) => {
                conn.execute(
                    "INSERT INTO groups (id, name, guide_id, dirty, last_synced_at, local_rev)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(id) DO UPDATE SET
                         name = excluded.name,
                         guide_id = excluded.guide_id,
                         dirty = excluded.dirty,
                         last_synced_at = COALESCE(excluded.last_synced_at, groups.last_synced_at),
                         local_rev = excluded.local_rev",
                    params![e.id, e.name, e.guide_id, dirty, synced, rev],
                )?;
            }
            Entity::Membership(e) => {
                conn.execute(
                    "INSERT INTO memberships
                         (id, group_id, person_id, dirty, last_synced_at, local_rev)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(id) DO UPDATE SET
                         group_id = excluded.group_id,
                         person_id = excluded.person_id,
                         dirty = excluded.dirty,
                         last_synced_at = COALESCE(excluded.last_synced_at, memberships.last_synced_at),
                         local_rev = excluded.local_rev",
                    params![e.id, e.group_id, e.person_id, dirty, synced, rev],
                )?;
            }
        }
        Ok(())
    }

    pub fn set_dirty(&self, kind: EntityKind, id: &str, dirty: bool) -> Result<(), StoreError> {
        let sql = format!(
            "UPDATE {} SET dirty = ?1 WHERE id = ?2",
            table_for(kind)
        );
        self.conn().execute(&sql, params![dirty as i64, id])?;
        Ok(())
    }

    /// Mark a row as in sync with the remote store.
    pub fn mark_clean(&self, kind: EntityKind, id: &str) -> Result<(), StoreError> {
        let sql = format!(
            "UPDATE {} SET dirty = 0, last_synced_at = ?1 WHERE id = ?2",
            table_for(kind)
        );
        self.conn().execute(&sql, params![Utc::now().to_rfc3339(), id])?;
        Ok(())
    }

    pub fn sync_state(&self, kind: EntityKind, id: &str) -> Result<Option<SyncState>, StoreError> {
        let sql = format!(
            "SELECT dirty, last_synced_at FROM {} WHERE id = ?1",
            table_for(kind)
        );
        let row: Option<(i64, Option<String>)> = self
            .conn()
            .query_row(&sql, params![id], |r| Ok((r.get(0)?, r.get(1)?)))
            .optional()?;
        match row {
            None => Ok(None),
            Some((dirty, synced)) => Ok(Some(SyncState {
                dirty: dirty != 0,
                last_synced_at: synced
                    .map(|s| parse_ts(&s, "sync metadata"))
                    .transpose()?,
            })),
        }
    }

    /// Delete an entity. Identity deletes cascade to embeddings and
    /// memberships; group deletes cascade to memberships.
    pub fn delete_entity(&self, kind: EntityKind, id: &str) -> Result<(), StoreError> {
        let conn = self.conn();
        match kind {
            EntityKind::Identity => {
                conn.execute("DELETE FROM embeddings WHERE owner_id = ?1", params![id])?;
                conn.execute("DELETE FROM memberships WHERE person_id = ?1", params![id])?;
                conn.execute("DELETE FROM identities WHERE id = ?1", params![id])?;
            }
            EntityKind::Embedding => {
                conn.execute("DELETE FROM embeddings WHERE id = ?1", params![id])?;
            }
            EntityKind::Group => {
                conn.execute("DELETE FROM memberships WHERE group_id = ?1", params![id])?;
                conn.execute("DELETE FROM groups WHERE id = ?1", params![id])?;
            }
            EntityKind::Membership => {
                conn.execute("DELETE FROM memberships WHERE id = ?1", params![id])?;
            }
        }
        Ok(())
    }

    // --- reads ----------------------------------------------------------

    pub fn get_identity(&self, id: &str) -> Result<Option<Identity>, StoreError> {
        let row: Option<(String, String, Option<String>, Option<String>, String)> = self
            .conn()
            .query_row(
                "SELECT id, display_name, contact, notes, photo_refs
                 FROM identities WHERE id = ?1",
                params![id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
            )
            .optional()?;
        row.map(identity_from_parts).transpose()
    }

    pub fn list_identities(&self) -> Result<Vec<Identity>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, display_name, contact, notes, photo_refs
             FROM identities ORDER BY display_name",
        )?;
        let rows = stmt
            .query_map([], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(identity_from_parts).collect()
    }

    pub fn get_group(&self, id: &str) -> Result<Option<Group>, StoreError> {
        Ok(self
            .conn()
            .query_row(
                "SELECT id, name, guide_id FROM groups WHERE id = ?1",
                params![id],
                |r| {
                    Ok(Group {
                        id: r.get(0)?,
                        name: r.get(1)?,
                        guide_id: r.get(2)?,
                    })
                },
            )
            .optional()?)
    }

    pub fn list_groups(&self) -> Result<Vec<Group>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id, name, guide_id FROM groups ORDER BY name")?;
        let rows = stmt
            .query_map([], |r| {
                Ok(Group {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    guide_id: r.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn memberships_for_group(&self, group_id: &str) -> Result<Vec<Membership>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, group_id, person_id FROM memberships WHERE group_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![group_id], |r| {
                Ok(Membership {
                    id: r.get(0)?,
                    group_id: r.get(1)?,
                    person_id: r.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn memberships_for_person(&self, person_id: &str) -> Result<Vec<Membership>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, group_id, person_id FROM memberships WHERE person_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![person_id], |r| {
                Ok(Membership {
                    id: r.get(0)?,
                    group_id: r.get(1)?,
                    person_id: r.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // --- embedding store (append-only) ----------------------------------

    /// Append a new embedding. Embeddings are never updated in place; a
    /// duplicate id is a bug and surfaces as a constraint error.
    pub fn put_embedding(&self, record: &EmbeddingRecord, dirty: bool) -> Result<(), StoreError> {
        let rev = Uuid::new_v4().to_string();
        self.conn().execute(
            "INSERT INTO embeddings
                 (id, owner_id, vector, source_photo_ref, quality_score, created_at,
                  dirty, last_synced_at, local_rev)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, ?8)",
            params![
                record.id,
                record.owner_id,
                embedding_to_blob(&record.embedding),
                record.source_photo_ref,
                record.quality_score,
                record.created_at.to_rfc3339(),
                dirty as i64,
                rev
            ],
        )?;
        Ok(())
    }

    pub fn embeddings_by_owner(&self, owner_id: &str) -> Result<Vec<EmbeddingRecord>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, owner_id, vector, source_photo_ref, quality_score, created_at
             FROM embeddings WHERE owner_id = ?1 ORDER BY created_at",
        )?;
        let rows = stmt
            .query_map(params![owner_id], embedding_parts)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(embedding_from_parts).collect()
    }

    /// Batch form used to warm a group's matcher gallery before a session.
    pub fn embeddings_by_owners(
        &self,
        owner_ids: &[String],
    ) -> Result<HashMap<String, Vec<EmbeddingRecord>>, StoreError> {
        let mut out: HashMap<String, Vec<EmbeddingRecord>> = HashMap::new();
        if owner_ids.is_empty() {
            return Ok(out);
        }

        let conn = self.conn();
        let placeholders = vec!["?"; owner_ids.len()].join(",");
        let sql = format!(
            "SELECT id, owner_id, vector, source_photo_ref, quality_score, created_at
             FROM embeddings WHERE owner_id IN ({placeholders}) ORDER BY created_at"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(owner_ids), embedding_parts)?
            .collect::<Result<Vec<_>, _>>()?;
        for parts in rows {
            let record = embedding_from_parts(parts)?;
            out.entry(record.owner_id.clone()).or_default().push(record);
        }
        Ok(out)
    }

    // --- pending enrollments --------------------------------------------

    pub fn insert_enrollment(&self, e: &PendingEnrollment) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO pending_enrollments
                 (id, owner_id, target_group_id, profile, staged_photo_refs, status,
                  retry_count, created_at, processed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                e.id,
                e.owner_id,
                e.target_group_id,
                serde_json::to_string(&e.profile)?,
                serde_json::to_string(&e.staged_photo_refs)?,
                e.status.as_str(),
                e.retry_count,
                e.created_at.to_rfc3339(),
                e.processed_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    pub fn get_enrollment(&self, id: &str) -> Result<Option<PendingEnrollment>, StoreError> {
        let row = self
            .conn()
            .query_row(
                "SELECT id, owner_id, target_group_id, profile, staged_photo_refs, status,
                        retry_count, created_at, processed_at
                 FROM pending_enrollments WHERE id = ?1",
                params![id],
                enrollment_parts,
            )
            .optional()?;
        row.map(enrollment_from_parts).transpose()
    }

    pub fn list_enrollments_by_owner(
        &self,
        owner_id: &str,
        status: Option<EnrollmentStatus>,
    ) -> Result<Vec<PendingEnrollment>, StoreError> {
        let conn = self.conn();
        let rows = match status {
            Some(status) => {
                let mut stmt = conn.prepare(
                    "SELECT id, owner_id, target_group_id, profile, staged_photo_refs, status,
                            retry_count, created_at, processed_at
                     FROM pending_enrollments
                     WHERE owner_id = ?1 AND status = ?2 ORDER BY created_at",
                )?;
                let rows = stmt
                    .query_map(params![owner_id, status.as_str()], enrollment_parts)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT id, owner_id, target_group_id, profile, staged_photo_refs, status,
                            retry_count, created_at, processed_at
                     FROM pending_enrollments WHERE owner_id = ?1 ORDER BY created_at",
                )?;
                let rows = stmt
                    .query_map(params![owner_id], enrollment_parts)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };
        rows.into_iter().map(enrollment_from_parts).collect()
    }

    /// Atomic `Pending -> Processing` transition. Exactly one caller wins
    /// a race; everyone else sees `false`. The conditional UPDATE is the
    /// only mutual exclusion the state machine needs.
    pub fn try_begin_processing(&self, id: &str) -> Result<bool, StoreError> {
        let changed = self.conn().execute(
            "UPDATE pending_enrollments SET status = 'processing'
             WHERE id = ?1 AND status = 'pending'",
            params![id],
        )?;
        Ok(changed == 1)
    }

    /// Finalize a Processing enrollment into a terminal state.
    pub fn finish_enrollment(
        &self,
        id: &str,
        status: EnrollmentStatus,
        processed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        debug_assert!(status.is_terminal());
        let changed = self.conn().execute(
            "UPDATE pending_enrollments
             SET status = ?1, processed_at = ?2, staged_photo_refs = '[]'
             WHERE id = ?3 AND status = 'processing'",
            params![status.as_str(), processed_at.to_rfc3339(), id],
        )?;
        if changed != 1 {
            return Err(StoreError::NotFound {
                kind: "processing enrollment",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Reject directly from Pending (owner action, no processing).
    pub fn reject_pending(&self, id: &str, processed_at: DateTime<Utc>) -> Result<bool, StoreError> {
        let changed = self.conn().execute(
            "UPDATE pending_enrollments
             SET status = 'rejected', processed_at = ?1, staged_photo_refs = '[]'
             WHERE id = ?2 AND status = 'pending'",
            params![processed_at.to_rfc3339(), id],
        )?;
        Ok(changed == 1)
    }

    /// Roll a failed Processing attempt back to Pending and bump the
    /// retry count. Returns the new count.
    pub fn revert_to_pending(&self, id: &str) -> Result<u32, StoreError> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE pending_enrollments
             SET status = 'pending', retry_count = retry_count + 1
             WHERE id = ?1 AND status = 'processing'",
            params![id],
        )?;
        if changed != 1 {
            return Err(StoreError::NotFound {
                kind: "processing enrollment",
                id: id.to_string(),
            });
        }
        let count = conn.query_row(
            "SELECT retry_count FROM pending_enrollments WHERE id = ?1",
            params![id],
            |r| r.get::<_, u32>(0),
        )?;
        Ok(count)
    }

    pub fn update_staged_refs(&self, id: &str, refs: &[String]) -> Result<(), StoreError> {
        self.conn().execute(
            "UPDATE pending_enrollments SET staged_photo_refs = ?1 WHERE id = ?2",
            params![serde_json::to_string(refs)?, id],
        )?;
        Ok(())
    }

    // --- sync queue -----------------------------------------------------

    /// Queue a change for push. Replaces any queued change for the same
    /// `(entity_type, entity_id)` — last local write wins within the queue.
    pub fn enqueue_change(&self, change: &PendingChange) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT OR REPLACE INTO pending_changes
                 (entity_type, entity_id, op, payload, enqueued_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                change.entity_type.as_str(),
                change.entity_id,
                change.op.as_str(),
                change
                    .payload
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                change.enqueued_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Queued changes in enqueue order.
    pub fn queued_changes(&self) -> Result<Vec<PendingChange>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT entity_type, entity_id, op, payload, enqueued_at
             FROM pending_changes ORDER BY enqueued_at, rowid",
        )?;
        let rows = stmt
            .query_map([], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, Option<String>>(3)?,
                    r.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(kind, id, op, payload, enqueued)| {
                Ok(PendingChange {
                    entity_type: EntityKind::parse(&kind).ok_or_else(|| StoreError::Corrupt {
                        table: "pending_changes",
                        detail: format!("unknown entity type {kind:?}"),
                    })?,
                    entity_id: id,
                    op: ChangeOp::parse(&op).ok_or_else(|| StoreError::Corrupt {
                        table: "pending_changes",
                        detail: format!("unknown op {op:?}"),
                    })?,
                    payload: payload.map(|p| serde_json::from_str(&p)).transpose()?,
                    enqueued_at: parse_ts(&enqueued, "pending_changes")?,
                })
            })
            .collect()
    }

    pub fn remove_change(&self, kind: EntityKind, id: &str) -> Result<(), StoreError> {
        self.conn().execute(
            "DELETE FROM pending_changes WHERE entity_type = ?1 AND entity_id = ?2",
            params![kind.as_str(), id],
        )?;
        Ok(())
    }

    pub fn queue_len(&self) -> Result<usize, StoreError> {
        let n: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM pending_changes", [], |r| r.get(0))?;
        Ok(n as usize)
    }
}

fn table_for(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Identity => "identities",
        EntityKind::Embedding => "embeddings",
        EntityKind::Group => "groups",
        EntityKind::Membership => "memberships",
    }
}

fn parse_ts(s: &str, table: &'static str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            table,
            detail: format!("bad timestamp {s:?}: {e}"),
        })
}

fn identity_from_parts(
    (id, display_name, contact, notes, photo_refs): (
        String,
        String,
        Option<String>,
        Option<String>,
        String,
    ),
) -> Result<Identity, StoreError> {
    Ok(Identity {
        id,
        display_name,
        contact,
        notes,
        photo_refs: serde_json::from_str(&photo_refs)?,
    })
}

type EmbeddingParts = (String, String, Vec<u8>, String, u8, String);

fn embedding_parts(r: &rusqlite::Row<'_>) -> rusqlite::Result<EmbeddingParts> {
    Ok((
        r.get(0)?,
        r.get(1)?,
        r.get(2)?,
        r.get(3)?,
        r.get(4)?,
        r.get(5)?,
    ))
}

fn embedding_from_parts(
    (id, owner_id, blob, source_photo_ref, quality_score, created_at): EmbeddingParts,
) -> Result<EmbeddingRecord, StoreError> {
    let embedding = blob_to_embedding(&blob).ok_or_else(|| StoreError::Corrupt {
        table: "embeddings",
        detail: format!("vector blob of {} bytes is not packed f32", blob.len()),
    })?;
    Ok(EmbeddingRecord {
        id,
        owner_id,
        embedding,
        source_photo_ref,
        quality_score,
        created_at: parse_ts(&created_at, "embeddings")?,
    })
}

type EnrollmentParts = (
    String,
    String,
    Option<String>,
    String,
    String,
    String,
    u32,
    String,
    Option<String>,
);

fn enrollment_parts(r: &rusqlite::Row<'_>) -> rusqlite::Result<EnrollmentParts> {
    Ok((
        r.get(0)?,
        r.get(1)?,
        r.get(2)?,
        r.get(3)?,
        r.get(4)?,
        r.get(5)?,
        r.get(6)?,
        r.get(7)?,
        r.get(8)?,
    ))
}

fn enrollment_from_parts(
    (id, owner_id, target_group_id, profile, staged, status, retry_count, created_at, processed_at):
        EnrollmentParts,
) -> Result<PendingEnrollment, StoreError> {
    Ok(PendingEnrollment {
        id: id.clone(),
        owner_id,
        target_group_id,
        profile: serde_json::from_str(&profile)?,
        staged_photo_refs: serde_json::from_str(&staged)?,
        status: EnrollmentStatus::parse(&status).ok_or_else(|| StoreError::Corrupt {
            table: "pending_enrollments",
            detail: format!("unknown status {status:?} for {id}"),
        })?,
        retry_count,
        created_at: parse_ts(&created_at, "pending_enrollments")?,
        processed_at: processed_at
            .map(|t| parse_ts(&t, "pending_enrollments"))
            .transpose()?,
    })
}
