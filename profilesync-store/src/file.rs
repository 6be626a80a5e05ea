//! Directory-backed profile store.
//!
//! Each profile lives in `<dir>/<id>.json`. Writes go through a temporary
//! file and a rename so a crash never leaves a half-written profile behind.
//! The directory may sit on a synced drive; call [`FileProfileStore::refresh`]
//! to pick up changes made by other processes.

use crate::error::{StoreError, StoreResult};
use crate::publisher::SnapshotPublisher;
use crate::{ProfileStore, SnapshotStream};
use async_trait::async_trait;
use profilesync_types::{Profile, ProfileId, Snapshot};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const EXTENSION: &str = "json";

/// A profile store persisted as one JSON file per profile.
pub struct FileProfileStore {
    name: String,
    dir: PathBuf,
    publisher: SnapshotPublisher,
    /// Serializes writers so each published snapshot reflects disk order.
    write_lock: Mutex<()>,
}

impl FileProfileStore {
    /// Opens (creating if needed) the store rooted at `dir`.
    pub async fn open(name: impl Into<String>, dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let name = name.into();
        let dir = dir.into();

        if !fs::try_exists(&dir).await? {
            fs::create_dir_all(&dir).await?;
            info!("Created profile directory: {:?}", dir);
        }

        let initial = scan(&dir).await?;
        info!("[{}] opened {:?} with {} profiles", name, dir, initial.len());

        Ok(Self {
            name,
            dir,
            publisher: SnapshotPublisher::new(initial),
            write_lock: Mutex::new(()),
        })
    }

    /// Root directory of the store.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Rescans the directory and publishes a snapshot if anything changed.
    ///
    /// Returns true if a new snapshot was published.
    pub async fn refresh(&self) -> StoreResult<bool> {
        let _guard = self.write_lock.lock().await;
        let scanned = scan(&self.dir).await?;
        if scanned == self.publisher.current() {
            return Ok(false);
        }
        debug!("[{}] directory changed on disk, republishing", self.name);
        self.publisher.publish(scanned);
        Ok(true)
    }

    /// Deletes the files of `ids` in order and publishes what was removed,
    /// also when a later deletion fails. Caller holds the write lock.
    async fn remove_files(&self, ids: &[ProfileId]) -> StoreResult<()> {
        let mut removed = Vec::with_capacity(ids.len());
        let mut failure = None;
        for id in ids {
            match fs::remove_file(self.path_for(id)).await {
                Ok(()) => removed.push(*id),
                Err(e) if e.kind() == ErrorKind::NotFound => removed.push(*id),
                Err(e) => {
                    warn!("[{}] unable to remove {}: {}", self.name, id, e);
                    failure = Some(e);
                    break;
                }
            }
        }

        if !removed.is_empty() {
            let next = self.publisher.current().without(&removed);
            self.publisher.publish(next);
        }
        match failure {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    fn path_for(&self, id: &ProfileId) -> PathBuf {
        self.dir.join(format!("{id}.{EXTENSION}"))
    }
}

#[async_trait]
impl ProfileStore for FileProfileStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_all(&self) -> StoreResult<Snapshot> {
        scan(&self.dir).await
    }

    fn snapshots(&self) -> SnapshotStream {
        self.publisher.subscribe()
    }

    async fn save(&self, profile: &Profile) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let bytes = profile.to_json()?;
        let path = self.path_for(&profile.id);
        let tmp = self.dir.join(format!(".{}.{EXTENSION}.tmp", profile.id));

        fs::write(&tmp, &bytes).await?;
        fs::rename(&tmp, &path).await?;
        debug!("[{}] wrote {:?}", self.name, path);

        let next = self.publisher.current().with(profile.clone());
        self.publisher.publish(next);
        Ok(())
    }

    async fn remove(&self, ids: &[ProfileId]) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        self.remove_files(ids).await?;
        debug!("[{}] removed {:?}", self.name, ids);
        Ok(())
    }

    async fn remove_all(&self) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let ids: Vec<ProfileId> = scan(&self.dir).await?.ids().copied().collect();
        self.remove_files(&ids).await?;
        info!("[{}] removed all {} profiles", self.name, ids.len());

        self.publisher.publish(Snapshot::empty());
        Ok(())
    }
}

/// Reads every `*.json` profile in `dir`. Unreadable files are skipped.
async fn scan(dir: &Path) -> StoreResult<Snapshot> {
    let mut profiles = Vec::new();
    let mut read_dir = fs::read_dir(dir)
        .await
        .map_err(|e| StoreError::Unavailable(format!("failed to read {dir:?}: {e}")))?;

    while let Some(entry) = read_dir.next_entry().await? {
        let path = entry.path();

        // Skip directories, hidden and temp files
        if entry.file_type().await?.is_dir()
            || path
                .file_name()
                .map(|n| n.to_string_lossy().starts_with('.'))
                .unwrap_or(true)
            || path.extension().and_then(|e| e.to_str()) != Some(EXTENSION)
        {
            continue;
        }

        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to read profile file {:?}: {}", path, e);
                continue;
            }
        };
        match Profile::from_json(&bytes) {
            Ok(profile) => profiles.push(profile),
            Err(e) => warn!("Skipping malformed profile file {:?}: {}", path, e),
        }
    }

    Ok(Snapshot::from_profiles(profiles))
}
