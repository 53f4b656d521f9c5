//! Remote store boundary.
//!
//! The networked source of truth, seen through a generic entity contract.
//! Transport is out of scope here; the daemon injects a concrete client
//! and tests inject in-memory fakes.

use rollcall_store::EntityKind;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RemoteError {
    /// Network down, timeout, or any condition worth retrying later.
    #[error("remote unavailable: {0}")]
    Unavailable(String),
    /// The remote refused the payload. Also recovered by re-queuing:
    /// surfaced to users only as a "not yet synced" indicator.
    #[error("remote rejected {kind}/{id}: {detail}")]
    Rejected {
        kind: &'static str,
        id: String,
        detail: String,
    },
}

/// What slice of remote state a pull fetches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncScope {
    /// Everything owned by the active user.
    Owner(String),
    /// One group's members and their embeddings (session start).
    Group(String),
}

/// One entity as fetched from the remote store.
#[derive(Debug, Clone)]
pub struct RemoteEntity {
    pub kind: EntityKind,
    pub id: String,
    pub payload: Value,
}

/// The authoritative networked store. The sync engine is the only core
/// component that talks to it.
pub trait RemoteStore {
    fn upsert(
        &self,
        kind: EntityKind,
        id: &str,
        payload: &Value,
    ) -> impl std::future::Future<Output = Result<(), RemoteError>> + Send;

    fn delete(
        &self,
        kind: EntityKind,
        id: &str,
    ) -> impl std::future::Future<Output = Result<(), RemoteError>> + Send;

    fn list_by_scope(
        &self,
        scope: &SyncScope,
    ) -> impl std::future::Future<Output = Result<Vec<RemoteEntity>, RemoteError>> + Send;
}
