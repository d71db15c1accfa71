// src/services/persistence.rs
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info};

use crate::error::Result;
use crate::models::UserState;
use crate::services::registry::UserRegistry;

/// Whole-registry snapshots on disk.
///
/// A save serialises every user into one JSON array, writes it to a fresh
/// temp file and renames that over the state file, so readers only ever see
/// a complete old file or a complete new one.
pub struct PersistenceManager {
    state_file: PathBuf,
    tmp_dir: PathBuf,
    // Held across snapshot + rename so an older snapshot never lands last.
    save_lock: Mutex<()>,
}

impl PersistenceManager {
    pub fn new(state_file: impl Into<PathBuf>, tmp_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_file: state_file.into(),
            tmp_dir: tmp_dir.into(),
            save_lock: Mutex::new(()),
        }
    }

    pub fn state_file(&self) -> &Path {
        &self.state_file
    }

    /// Missing file means first run and yields an empty registry; a file
    /// that cannot be parsed is an error.
    pub fn load(&self) -> Result<UserRegistry> {
        let users = load_users(&self.state_file)?;
        Ok(UserRegistry::from_users(users))
    }

    pub async fn save(&self, registry: &UserRegistry) -> Result<usize> {
        let _guard = self.save_lock.lock().await;

        let users = registry.snapshot_all().await;
        let count = users.len();
        let state_file = self.state_file.clone();
        let tmp_dir = self.tmp_dir.clone();

        tokio::task::spawn_blocking(move || save_users(&users, &state_file, &tmp_dir)).await??;

        debug!(users = count, path = %self.state_file.display(), "state saved");
        Ok(count)
    }
}

/// Saves in the background so ingestion never waits on the disk.
///
/// Requests only bump a generation counter; the writer task wakes, saves
/// whatever the registry holds at that moment and reports the generation it
/// covered. Requests arriving during a save collapse into one follow-up save.
pub struct StateSaver {
    requested: watch::Sender<u64>,
    completed: watch::Receiver<u64>,
}

impl StateSaver {
    pub fn spawn(persistence: Arc<PersistenceManager>, registry: Arc<UserRegistry>) -> Self {
        let (requested, mut pending) = watch::channel(0u64);
        let (done, completed) = watch::channel(0u64);

        tokio::spawn(async move {
            while pending.changed().await.is_ok() {
                let generation = *pending.borrow_and_update();
                if let Err(e) = persistence.save(&registry).await {
                    error!(
                        path = %persistence.state_file().display(),
                        "failed to update state file: {}", e
                    );
                }
                let _ = done.send(generation);
            }
            debug!("state saver stopped");
        });

        Self {
            requested,
            completed,
        }
    }

    /// Marks the registry dirty. Never waits.
    pub fn request(&self) {
        self.requested.send_modify(|generation| *generation += 1);
    }

    /// Waits until every request made so far has been attempted.
    pub async fn flush(&self) {
        let target = *self.requested.borrow();
        let mut completed = self.completed.clone();
        let _ = completed.wait_for(|generation| *generation >= target).await;
    }
}

pub fn load_users(path: &Path) -> Result<Vec<UserState>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!(path = %path.display(), "state file not found, starting empty");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    let users: Vec<UserState> = serde_json::from_slice(&bytes)?;
    info!(path = %path.display(), users = users.len(), "state file loaded");
    Ok(users)
}

/// Writes `users` to `destination` through a temp file created in `tmp_dir`.
/// The temp file is removed on every failure path.
pub fn save_users(users: &[UserState], destination: &Path, tmp_dir: &Path) -> Result<()> {
    let json = serde_json::to_vec(users)?;

    let mut tmp = NamedTempFile::new_in(tmp_dir)?;
    tmp.write_all(&json)?;
    tmp.as_file().sync_all()?;
    tmp.persist(destination).map_err(|e| e.error)?;

    Ok(())
}
