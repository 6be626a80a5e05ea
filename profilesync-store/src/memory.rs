//! In-memory profile store.
//!
//! Besides serving as a lightweight local store, it doubles as the test
//! double for remote and backup replicas: writes are counted, and saves or
//! removals can be made to fail or to take a while.

use crate::error::{StoreError, StoreResult};
use crate::publisher::SnapshotPublisher;
use crate::{ProfileStore, SnapshotStream};
use async_trait::async_trait;
use profilesync_types::{Profile, ProfileId, Snapshot};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Default)]
struct Faults {
    failing_saves: HashSet<ProfileId>,
    fail_all_saves: bool,
    fail_removes: bool,
    save_delay: Option<Duration>,
}

/// A profile store held entirely in memory.
pub struct MemoryProfileStore {
    name: String,
    publisher: SnapshotPublisher,
    write_lock: Mutex<()>,
    faults: Mutex<Faults>,
    save_calls: AtomicUsize,
    remove_calls: AtomicUsize,
}

impl MemoryProfileStore {
    /// Creates an empty store.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_profiles(name, Vec::new())
    }

    /// Creates a store seeded with `profiles`.
    pub fn with_profiles(name: impl Into<String>, profiles: impl IntoIterator<Item = Profile>) -> Self {
        Self {
            name: name.into(),
            publisher: SnapshotPublisher::new(Snapshot::from_profiles(profiles)),
            write_lock: Mutex::new(()),
            faults: Mutex::new(Faults::default()),
            save_calls: AtomicUsize::new(0),
            remove_calls: AtomicUsize::new(0),
        }
    }

    /// Returns the current contents without going through the async API.
    pub fn snapshot(&self) -> Snapshot {
        self.publisher.current()
    }

    /// Returns the stored copy of a profile.
    pub fn get(&self, id: &ProfileId) -> Option<Profile> {
        self.publisher.current().get(id).cloned()
    }

    /// Replaces the whole contents, as if another replica had written them.
    ///
    /// Does not count as a save and ignores injected faults.
    pub fn replace_all(&self, profiles: impl IntoIterator<Item = Profile>) {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.publisher.publish(Snapshot::from_profiles(profiles));
    }

    /// Number of `save` invocations so far, failed ones included.
    pub fn save_calls(&self) -> usize {
        self.save_calls.load(Ordering::SeqCst)
    }

    /// Number of `remove` and `remove_all` invocations so far.
    pub fn remove_calls(&self) -> usize {
        self.remove_calls.load(Ordering::SeqCst)
    }

    /// Makes every future save of `id` fail.
    pub fn fail_saves_for(&self, id: ProfileId) {
        self.faults().failing_saves.insert(id);
    }

    /// Makes every future save fail (or succeed again).
    pub fn set_fail_all_saves(&self, fail: bool) {
        self.faults().fail_all_saves = fail;
    }

    /// Makes every future removal fail (or succeed again).
    pub fn set_fail_removes(&self, fail: bool) {
        self.faults().fail_removes = fail;
    }

    /// Delays every future save by `delay` before it is applied.
    pub fn set_save_delay(&self, delay: Option<Duration>) {
        self.faults().save_delay = delay;
    }

    /// Clears all injected faults.
    pub fn clear_faults(&self) {
        *self.faults() = Faults::default();
    }

    fn faults(&self) -> std::sync::MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply(&self, update: impl FnOnce(&Snapshot) -> Snapshot) {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let next = update(&self.publisher.current());
        self.publisher.publish(next);
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_all(&self) -> StoreResult<Snapshot> {
        Ok(self.publisher.current())
    }

    fn snapshots(&self) -> SnapshotStream {
        self.publisher.subscribe()
    }

    async fn save(&self, profile: &Profile) -> StoreResult<()> {
        self.save_calls.fetch_add(1, Ordering::SeqCst);

        let delay = self.faults().save_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let should_fail = {
            let faults = self.faults();
            faults.fail_all_saves || faults.failing_saves.contains(&profile.id)
        };
        if should_fail {
            return Err(StoreError::Unavailable(format!(
                "{}: save of {} rejected",
                self.name, profile.id
            )));
        }

        debug!("[{}] save {}", self.name, profile.id);
        self.apply(|current| current.with(profile.clone()));
        Ok(())
    }

    async fn remove(&self, ids: &[ProfileId]) -> StoreResult<()> {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        if self.faults().fail_removes {
            return Err(StoreError::Unavailable(format!("{}: remove rejected", self.name)));
        }

        debug!("[{}] remove {:?}", self.name, ids);
        self.apply(|current| current.without(ids));
        Ok(())
    }

    async fn remove_all(&self) -> StoreResult<()> {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        if self.faults().fail_removes {
            return Err(StoreError::Unavailable(format!(
                "{}: remove all rejected",
                self.name
            )));
        }

        debug!("[{}] remove all", self.name);
        self.apply(|_| Snapshot::empty());
        Ok(())
    }
}
