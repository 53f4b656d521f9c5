use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use rollcall_store::{CacheStore, EnrollmentStatus, EntityKind};
use rollcall_sync::{RemoteEntity, RemoteError, RemoteStore, SyncEngine, SyncScope};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall local cache inspection")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List people in the local cache
    People,
    /// List enrollment submissions for an owner
    Pending {
        /// Owner whose submissions to list
        #[arg(short, long)]
        owner: String,
        /// Filter by status (pending, processing, approved, rejected)
        #[arg(short, long)]
        status: Option<String>,
    },
    /// Show local changes waiting to be pushed
    Queue,
    /// Remove a person from the roster (queues the remote delete)
    Remove {
        /// Person ID to remove
        id: String,
    },
}

/// The CLI never talks to the backend itself; deletes queue locally and
/// the daemon pushes them on its next sync pass.
struct NoRemote;

impl RemoteStore for NoRemote {
    async fn upsert(&self, _kind: EntityKind, _id: &str, _payload: &Value) -> Result<(), RemoteError> {
        Err(RemoteError::Unavailable("cli is offline-only".into()))
    }

    async fn delete(&self, _kind: EntityKind, _id: &str) -> Result<(), RemoteError> {
        Err(RemoteError::Unavailable("cli is offline-only".into()))
    }

    async fn list_by_scope(&self, _scope: &SyncScope) -> Result<Vec<RemoteEntity>, RemoteError> {
        Err(RemoteError::Unavailable("cli is offline-only".into()))
    }
}

fn db_path() -> PathBuf {
    std::env::var("ROLLCALL_DB_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            std::env::var("XDG_DATA_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                    PathBuf::from(home).join(".local/share")
                })
                .join("rollcall/cache.db")
        })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let store = Arc::new(CacheStore::open(&db_path())?);

    match cli.command {
        Commands::People => {
            let identities = store.list_identities()?;
            if identities.is_empty() {
                println!("no people in the local cache");
            }
            for identity in identities {
                let embeddings = store.embeddings_by_owner(&identity.id)?.len();
                println!(
                    "{}  {}  ({} embedding{})",
                    identity.id,
                    identity.display_name,
                    embeddings,
                    if embeddings == 1 { "" } else { "s" }
                );
            }
        }
        Commands::Pending { owner, status } => {
            let status = status
                .map(|s| {
                    EnrollmentStatus::parse(&s).ok_or_else(|| anyhow!("unknown status: {s}"))
                })
                .transpose()?;
            for enrollment in store.list_enrollments_by_owner(&owner, status)? {
                println!(
                    "{}  {:<10}  {}  {} photo(s)  retries {}",
                    enrollment.id,
                    enrollment.status.as_str(),
                    enrollment.profile.display_name,
                    enrollment.staged_photo_refs.len(),
                    enrollment.retry_count
                );
            }
        }
        Commands::Queue => {
            let changes = store.queued_changes()?;
            if changes.is_empty() {
                println!("queue empty");
            } else {
                for change in &changes {
                    println!(
                        "{:<6}  {:<10}  {}  {}",
                        change.op.as_str(),
                        change.entity_type.as_str(),
                        change.entity_id,
                        change.enqueued_at.to_rfc3339()
                    );
                }
                println!("{} change(s) queued", changes.len());
            }
        }
        Commands::Remove { id } => {
            let engine = SyncEngine::new(store, NoRemote, false);
            engine.delete(EntityKind::Identity, &id).await?;
            println!("removed {id}; delete queued for the next sync");
        }
    }

    Ok(())
}
