//! Remote store used until a backend transport is wired in.
//!
//! Every push fails as transient, so local writes queue durably and
//! survive until a real backend client replaces this.

use rollcall_store::EntityKind;
use rollcall_sync::{RemoteEntity, RemoteError, RemoteStore, SyncScope};
use serde_json::Value;

pub struct OfflineRemote;

impl RemoteStore for OfflineRemote {
    async fn upsert(&self, _kind: EntityKind, _id: &str, _payload: &Value) -> Result<(), RemoteError> {
        Err(RemoteError::Unavailable("no remote backend configured".into()))
    }

    async fn delete(&self, _kind: EntityKind, _id: &str) -> Result<(), RemoteError> {
        Err(RemoteError::Unavailable("no remote backend configured".into()))
    }

    async fn list_by_scope(&self, _scope: &SyncScope) -> Result<Vec<RemoteEntity>, RemoteError> {
        Err(RemoteError::Unavailable("no remote backend configured".into()))
    }
}
