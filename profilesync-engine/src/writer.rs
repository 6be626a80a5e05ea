//! Write path shared by explicit saves and remote imports.

use crate::error::SyncResult;
use crate::events::{ChangeNotifier, ProfileEvent};
use profilesync_store::ProfileStore;
use profilesync_types::{Profile, ProfileId, Snapshot};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// The replicas a manager writes to, plus its event channel.
///
/// Local writes are remembered until a local snapshot containing them is
/// acknowledged, so comparisons never run against a cache that lags behind
/// this writer's own saves.
#[derive(Clone)]
pub struct ProfileWriter {
    local: Arc<dyn ProfileStore>,
    remote: Option<Arc<dyn ProfileStore>>,
    backup: Option<Arc<dyn ProfileStore>>,
    notifier: ChangeNotifier,
    unacknowledged: Arc<Mutex<HashMap<ProfileId, Profile>>>,
}

impl ProfileWriter {
    /// Creates a writer over the local store only.
    pub fn new(local: Arc<dyn ProfileStore>, notifier: ChangeNotifier) -> Self {
        Self {
            local,
            remote: None,
            backup: None,
            notifier,
            unacknowledged: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Adds the remote (shared) store.
    #[must_use]
    pub fn with_remote(mut self, remote: Arc<dyn ProfileStore>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Adds the write-only backup store.
    #[must_use]
    pub fn with_backup(mut self, backup: Arc<dyn ProfileStore>) -> Self {
        self.backup = Some(backup);
        self
    }

    /// The local store.
    pub fn local(&self) -> &Arc<dyn ProfileStore> {
        &self.local
    }

    /// The remote store, if configured.
    pub fn remote(&self) -> Option<&Arc<dyn ProfileStore>> {
        self.remote.as_ref()
    }

    /// The event channel.
    pub fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }

    /// Writes `profile` to the local store unless it equals the latest known
    /// local copy: this writer's own unacknowledged write, else `cached`.
    ///
    /// On a write, mirrors to the backup store in the background and emits
    /// `Saved`. Returns whether the local store was written.
    pub async fn persist_local(&self, profile: &Profile, cached: Option<&Profile>) -> SyncResult<bool> {
        let pending = self.pending().get(&profile.id).cloned();
        let latest = pending.as_ref().or(cached);
        if latest == Some(profile) {
            info!("Profile {} not modified, not saving", profile.id);
            return Ok(false);
        }

        // Recorded before the write so a snapshot published by the save can
        // acknowledge it.
        let previous = self.pending().insert(profile.id, profile.clone());
        if let Err(e) = self.local.save(profile).await {
            let mut pending = self.pending();
            match previous {
                Some(previous) => pending.insert(profile.id, previous),
                None => pending.remove(&profile.id),
            };
            return Err(e.into());
        }

        if let Some(backup) = &self.backup {
            let backup = backup.clone();
            let profile = profile.clone();
            tokio::spawn(async move {
                if let Err(e) = backup.save(&profile).await {
                    warn!("Unable to back up profile {} to {}: {}", profile.id, backup.name(), e);
                }
            });
        }

        self.notifier.emit(ProfileEvent::Saved(profile.clone()));
        Ok(true)
    }

    /// Removes profiles from the local store and forgets any unacknowledged
    /// writes of them.
    pub async fn remove_local(&self, ids: &[ProfileId]) -> SyncResult<()> {
        self.local.remove(ids).await?;
        let mut pending = self.pending();
        for id in ids {
            pending.remove(id);
        }
        Ok(())
    }

    /// Drops remembered writes that `snapshot` already reflects.
    pub fn acknowledge(&self, snapshot: &Snapshot) {
        let mut pending = self.pending();
        pending.retain(|id, written| snapshot.get(id) != Some(&*written));
        if !pending.is_empty() {
            debug!("{} local writes not yet reflected in snapshot", pending.len());
        }
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, HashMap<ProfileId, Profile>> {
        self.unacknowledged
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
