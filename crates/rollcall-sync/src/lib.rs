//! rollcall-sync — reconciles the local cache with the remote store.
//!
//! All mutation of cloud-owned entities funnels through
//! [`SyncEngine::write`] / [`SyncEngine::delete`], which decide between
//! cache, remote, and queue. Push always completes before pull so a local
//! edit is never clobbered by a stale remote read that predates it.

pub mod engine;
pub mod remote;

pub use engine::{FlushReport, PullReport, SyncEngine, SyncError};
pub use remote::{RemoteEntity, RemoteError, RemoteStore, SyncScope};
