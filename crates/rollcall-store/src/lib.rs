//! rollcall-store — the local cache.
//!
//! A read-optimized SQLite mirror of the remote store, plus the pending
//! enrollment records and the queue of not-yet-pushed local changes. The
//! remote store is authoritative; every row here carries sync metadata
//! (`dirty`, `last_synced_at`, `local_rev`) so the sync engine can tell
//! which local rows are ahead of the remote.

pub mod codec;
pub mod entity;
mod store;

pub use entity::{
    ChangeOp, EmbeddingRecord, Entity, EntityKind, EnrollmentProfile, EnrollmentStatus, Group,
    Identity, Membership, PendingChange, PendingEnrollment,
};
pub use store::{CacheStore, StoreError, SyncState};
