//! Session worker thread.
//!
//! All sync triggers live on one dedicated thread, reached through an
//! mpsc request channel with oneshot replies. Starting a session runs
//! push-then-pull (when online) and warms the group's match gallery,
//! which the worker publishes on a watch channel. Recognition reads the
//! latest published snapshot directly on the caller's thread, so a
//! stalled remote call can never delay a match.

use rollcall_core::{match_query, Candidate, Embedding, MatchOutcome};
use rollcall_store::StoreError;
use rollcall_sync::{FlushReport, PullReport, RemoteStore, SyncEngine, SyncError, SyncScope};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("no active session")]
    NoActiveSession,
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("session worker exited")]
    ChannelClosed,
}

/// Matching parameters applied to every recognition in a session.
#[derive(Debug, Clone, Copy)]
pub struct MatchParams {
    pub threshold: f32,
    pub margin: f32,
}

/// Result of starting a session.
#[derive(Debug)]
pub struct SessionReady {
    pub group_id: String,
    /// Owners with at least one reference embedding in the gallery.
    pub owners: usize,
    pub flush: FlushReport,
    pub pull: PullReport,
}

/// The active session's warmed gallery, published by the worker.
#[derive(Clone)]
struct SessionSnapshot {
    group_id: String,
    gallery: Arc<Vec<Candidate>>,
}

enum WorkerRequest {
    StartSession {
        group_id: String,
        reply: oneshot::Sender<Result<SessionReady, WorkerError>>,
    },
    SetOnline {
        online: bool,
        reply: oneshot::Sender<Result<bool, WorkerError>>,
    },
    QueueDepth {
        reply: oneshot::Sender<Result<usize, WorkerError>>,
    },
}

/// Clone-safe handle to the session worker thread.
#[derive(Clone)]
pub struct WorkerHandle {
    tx: mpsc::Sender<WorkerRequest>,
    gallery: watch::Receiver<Option<SessionSnapshot>>,
    params: MatchParams,
}

impl WorkerHandle {
    /// Sync (when online) and warm the group's gallery, making it the
    /// active session.
    pub async fn start_session(&self, group_id: String) -> Result<SessionReady, WorkerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(WorkerRequest::StartSession {
                group_id,
                reply: reply_tx,
            })
            .await
            .map_err(|_| WorkerError::ChannelClosed)?;
        reply_rx.await.map_err(|_| WorkerError::ChannelClosed)?
    }

    /// Compare a query embedding against the active session's gallery.
    /// Reads the latest snapshot the worker published; never waits on the
    /// worker thread or the remote.
    pub fn recognize(&self, embedding: &Embedding) -> Result<MatchOutcome, WorkerError> {
        let snapshot = self
            .gallery
            .borrow()
            .clone()
            .ok_or(WorkerError::NoActiveSession)?;
        Ok(match_query(
            embedding,
            &snapshot.gallery,
            self.params.threshold,
            self.params.margin,
        ))
    }

    /// Update connectivity. An offline-to-online transition triggers a
    /// sync pass (and a gallery refresh if a session is active); returns
    /// whether that transition happened.
    pub async fn set_online(&self, online: bool) -> Result<bool, WorkerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(WorkerRequest::SetOnline {
                online,
                reply: reply_tx,
            })
            .await
            .map_err(|_| WorkerError::ChannelClosed)?;
        reply_rx.await.map_err(|_| WorkerError::ChannelClosed)?
    }

    /// Number of local changes still waiting to be pushed.
    pub async fn queue_depth(&self) -> Result<usize, WorkerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(WorkerRequest::QueueDepth { reply: reply_tx })
            .await
            .map_err(|_| WorkerError::ChannelClosed)?;
        reply_rx.await.map_err(|_| WorkerError::ChannelClosed)?
    }
}

/// Spawn the session worker on a dedicated OS thread.
///
/// The thread owns the sync engine and the active session; async remote
/// calls run on a private current-thread runtime.
pub fn spawn_worker<R>(engine: SyncEngine<R>, params: MatchParams) -> WorkerHandle
where
    R: RemoteStore + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<WorkerRequest>(8);
    let (gallery_tx, gallery_rx) = watch::channel::<Option<SessionSnapshot>>(None);

    std::thread::Builder::new()
        .name("rollcall-session".into())
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread().build() {
                Ok(rt) => rt,
                Err(err) => {
                    tracing::error!(error = %err, "failed to build session worker runtime");
                    return;
                }
            };

            tracing::info!("session worker started");

            while let Some(req) = rx.blocking_recv() {
                match req {
                    WorkerRequest::StartSession { group_id, reply } => {
                        let result = start_session(&rt, &engine, &gallery_tx, group_id);
                        let _ = reply.send(result);
                    }
                    WorkerRequest::SetOnline { online, reply } => {
                        let result = set_online(&rt, &engine, &gallery_tx, online);
                        let _ = reply.send(result);
                    }
                    WorkerRequest::QueueDepth { reply } => {
                        let result = engine.store().queue_len().map_err(WorkerError::from);
                        let _ = reply.send(result);
                    }
                }
            }

            tracing::info!("session worker exiting");
        })
        .expect("failed to spawn session worker");

    WorkerHandle {
        tx,
        gallery: gallery_rx,
        params,
    }
}

fn start_session<R: RemoteStore>(
    rt: &tokio::runtime::Runtime,
    engine: &SyncEngine<R>,
    gallery_tx: &watch::Sender<Option<SessionSnapshot>>,
    group_id: String,
) -> Result<SessionReady, WorkerError> {
    let (flush, pull) = if engine.is_online() {
        let scope = SyncScope::Group(group_id.clone());
        rt.block_on(engine.sync_session(&scope))?
    } else {
        (FlushReport::default(), PullReport::default())
    };

    let gallery = engine.warm_group(&group_id)?;
    let ready = SessionReady {
        group_id: group_id.clone(),
        owners: gallery.len(),
        flush,
        pull,
    };

    tracing::info!(group_id, owners = ready.owners, "session started");
    let _ = gallery_tx.send(Some(SessionSnapshot {
        group_id,
        gallery: Arc::new(gallery),
    }));
    Ok(ready)
}

fn set_online<R: RemoteStore>(
    rt: &tokio::runtime::Runtime,
    engine: &SyncEngine<R>,
    gallery_tx: &watch::Sender<Option<SessionSnapshot>>,
    online: bool,
) -> Result<bool, WorkerError> {
    let transitioned = engine.set_online(online);
    if !transitioned {
        return Ok(false);
    }

    // The published gallery stays live while the resync runs; recognition
    // keeps serving the old snapshot until the new one lands.
    let active = gallery_tx.borrow().as_ref().map(|s| s.group_id.clone());
    match active {
        Some(group_id) => {
            let scope = SyncScope::Group(group_id.clone());
            rt.block_on(engine.sync_session(&scope))?;
            let gallery = engine.warm_group(&group_id)?;
            tracing::info!(%group_id, "came online, session resynced");
            let _ = gallery_tx.send(Some(SessionSnapshot {
                group_id,
                gallery: Arc::new(gallery),
            }));
        }
        None => {
            rt.block_on(engine.flush_queue())?;
            tracing::info!("came online, queue flushed");
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::Embedding;
    use rollcall_store::{
        CacheStore, EmbeddingRecord, Entity, EntityKind, Group, Identity, Membership,
    };
    use rollcall_sync::{RemoteEntity, RemoteError};
    use serde_json::Value;
    use std::sync::Arc;
    use uuid::Uuid;

    struct OkRemote;

    impl RemoteStore for OkRemote {
        async fn upsert(&self, _kind: EntityKind, _id: &str, _payload: &Value) -> Result<(), RemoteError> {
            Ok(())
        }

        async fn delete(&self, _kind: EntityKind, _id: &str) -> Result<(), RemoteError> {
            Ok(())
        }

        async fn list_by_scope(&self, _scope: &SyncScope) -> Result<Vec<RemoteEntity>, RemoteError> {
            Ok(Vec::new())
        }
    }

    fn params() -> MatchParams {
        MatchParams {
            threshold: 0.42,
            margin: 0.05,
        }
    }

    /// Seed a group with two members and one embedding each, returning
    /// (store, group_id, alice_id).
    fn seeded_store() -> (Arc<CacheStore>, String, String) {
        let store = Arc::new(CacheStore::open_in_memory().unwrap());
        let group = Group {
            id: Uuid::new_v4().to_string(),
            name: "Tuesday".into(),
            guide_id: None,
        };
        let alice = Identity::new("Alice");
        let bob = Identity::new("Bob");

        store.upsert_entity(&Entity::Group(group.clone()), false).unwrap();
        for identity in [&alice, &bob] {
            store
                .upsert_entity(&Entity::Identity((*identity).clone()), false)
                .unwrap();
            store
                .upsert_entity(
                    &Entity::Membership(Membership::new(&group.id, &identity.id)),
                    false,
                )
                .unwrap();
        }
        for (owner, v) in [(&alice, vec![1.0, 0.0]), (&bob, vec![0.0, 1.0])] {
            store
                .upsert_entity(
                    &Entity::Embedding(EmbeddingRecord::new(&owner.id, Embedding::new(v), "p", 90)),
                    false,
                )
                .unwrap();
        }

        (store, group.id, alice.id)
    }

    #[tokio::test]
    async fn test_start_session_warms_gallery_offline() {
        let (store, group_id, _) = seeded_store();
        let worker = spawn_worker(SyncEngine::new(store, OkRemote, false), params());

        let ready = worker.start_session(group_id.clone()).await.unwrap();
        assert_eq!(ready.group_id, group_id);
        assert_eq!(ready.owners, 2);
        // Offline start skips the sync pass entirely.
        assert_eq!(ready.flush, FlushReport::default());
        assert_eq!(ready.pull, PullReport::default());
    }

    #[tokio::test]
    async fn test_recognize_against_warm_gallery() {
        let (store, group_id, alice_id) = seeded_store();
        let worker = spawn_worker(SyncEngine::new(store, OkRemote, false), params());
        worker.start_session(group_id).await.unwrap();

        let outcome = worker.recognize(&Embedding::new(vec![1.0, 0.0])).unwrap();
        match outcome {
            MatchOutcome::Match { owner_id, score } => {
                assert_eq!(owner_id, alice_id);
                assert!(score > 0.99);
            }
            MatchOutcome::NoMatch => panic!("expected a match"),
        }

        let outcome = worker.recognize(&Embedding::new(vec![-1.0, 0.0])).unwrap();
        assert_eq!(outcome, MatchOutcome::NoMatch);
    }

    #[tokio::test]
    async fn test_recognize_without_session_fails() {
        let (store, _, _) = seeded_store();
        let worker = spawn_worker(SyncEngine::new(store, OkRemote, false), params());

        let result = worker.recognize(&Embedding::new(vec![1.0, 0.0]));
        assert!(matches!(result, Err(WorkerError::NoActiveSession)));
    }

    /// Remote whose pull parks until the test releases it, signalling on
    /// entry so the test knows the worker thread is held inside the sync.
    struct GatedRemote {
        entered: std::sync::Mutex<std::sync::mpsc::Sender<()>>,
        release: std::sync::Mutex<std::sync::mpsc::Receiver<()>>,
    }

    impl RemoteStore for GatedRemote {
        async fn upsert(&self, _kind: EntityKind, _id: &str, _payload: &Value) -> Result<(), RemoteError> {
            Ok(())
        }

        async fn delete(&self, _kind: EntityKind, _id: &str) -> Result<(), RemoteError> {
            Ok(())
        }

        async fn list_by_scope(&self, _scope: &SyncScope) -> Result<Vec<RemoteEntity>, RemoteError> {
            self.entered.lock().unwrap().send(()).ok();
            self.release.lock().unwrap().recv().ok();
            Ok(Vec::new())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_recognize_serves_snapshot_while_sync_is_stalled() {
        let (store, group_id, alice_id) = seeded_store();
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel();
        let remote = GatedRemote {
            entered: std::sync::Mutex::new(entered_tx),
            release: std::sync::Mutex::new(release_rx),
        };
        let worker = spawn_worker(SyncEngine::new(store, remote, false), params());
        worker.start_session(group_id).await.unwrap();

        // Bring the engine online; the worker thread parks inside the pull.
        let transition = {
            let worker = worker.clone();
            tokio::spawn(async move { worker.set_online(true).await })
        };
        entered_rx.recv().unwrap();

        // Recognition still answers from the published gallery.
        let outcome = worker.recognize(&Embedding::new(vec![1.0, 0.0])).unwrap();
        match outcome {
            MatchOutcome::Match { owner_id, .. } => assert_eq!(owner_id, alice_id),
            MatchOutcome::NoMatch => panic!("expected a match"),
        }

        release_tx.send(()).unwrap();
        assert!(transition.await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn test_online_transition_flushes_queue() {
        let store = Arc::new(CacheStore::open_in_memory().unwrap());
        let engine = SyncEngine::new(store.clone(), OkRemote, false);

        // Queue an offline write, then bring the worker online.
        engine
            .write(&Entity::Identity(Identity::new("Dana")))
            .await
            .unwrap();
        assert_eq!(store.queue_len().unwrap(), 1);

        let worker = spawn_worker(engine, params());
        assert_eq!(worker.queue_depth().await.unwrap(), 1);

        assert!(worker.set_online(true).await.unwrap());
        assert_eq!(worker.queue_depth().await.unwrap(), 0);
        // Repeating is a no-op.
        assert!(!worker.set_online(true).await.unwrap());
    }
}
