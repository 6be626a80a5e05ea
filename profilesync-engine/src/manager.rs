//! Profile manager: the public face of the engine.
//!
//! A [`ProfileManager`] owns one background actor task. The actor is the only
//! writer of the [`ProfileSet`]. It consumes the local and remote snapshot
//! streams, debounces search queries, and starts a reconciliation pass for
//! every remote snapshot. After each change it publishes an immutable copy of
//! the set, so reads never wait on the actor.
//!
//! Explicit operations (`save`, `remove`, `duplicate`, ...) run in the
//! caller's task against the published copy and write straight to the stores.
//! Their effects come back to the actor through the local snapshot stream;
//! until then the writer remembers them, so repeated saves stay idempotent.

use crate::config::ManagerConfig;
use crate::error::{SyncError, SyncResult};
use crate::events::{ChangeNotifier, ProfileEvent};
use crate::policy::{AllowAllPolicy, InclusionPolicy};
use crate::profile_set::{ProfileSet, ProfileView};
use crate::reconcile::{EngineConfig, ProfileSetWatch, ReconciliationEngine};
use crate::writer::ProfileWriter;
use futures::StreamExt;
use profilesync_store::{ProfileStore, SnapshotStream};
use profilesync_types::{Feature, Profile, ProfileId, ProfilePreview, Snapshot};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Commands handled by the actor.
#[derive(Debug)]
enum ManagerCommand {
    Search(String),
    ReloadRequiredFeatures,
    Shutdown,
}

/// Builds and starts a [`ProfileManager`].
pub struct ProfileManagerBuilder {
    local: Arc<dyn ProfileStore>,
    remote: Option<Arc<dyn ProfileStore>>,
    backup: Option<Arc<dyn ProfileStore>>,
    policy: Arc<dyn InclusionPolicy>,
    config: ManagerConfig,
    notifier: Option<ChangeNotifier>,
}

impl ProfileManagerBuilder {
    /// Adds a remote (shared) store.
    #[must_use]
    pub fn remote(mut self, remote: Arc<dyn ProfileStore>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Adds a write-only backup store.
    #[must_use]
    pub fn backup(mut self, backup: Arc<dyn ProfileStore>) -> Self {
        self.backup = Some(backup);
        self
    }

    /// Sets the inclusion policy. Defaults to [`AllowAllPolicy`].
    #[must_use]
    pub fn policy(mut self, policy: Arc<dyn InclusionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the configuration.
    #[must_use]
    pub fn config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Uses an existing notifier, so callers can subscribe before the first
    /// event is emitted. `config.event_capacity` is ignored then.
    #[must_use]
    pub fn notifier(mut self, notifier: ChangeNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Subscribes to the stores and spawns the actor.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(self) -> ProfileManager {
        let Self {
            local,
            remote,
            backup,
            policy,
            config,
            notifier,
        } = self;

        if config.mirrors_remote_repository && remote.is_none() {
            warn!("Mirroring enabled without a remote store, ignoring");
        }

        let notifier = notifier.unwrap_or_else(|| ChangeNotifier::new(config.event_capacity));
        let mut writer = ProfileWriter::new(local.clone(), notifier.clone());
        if let Some(remote) = &remote {
            writer = writer.with_remote(remote.clone());
        }
        if let Some(backup) = backup {
            writer = writer.with_backup(backup);
        }

        let set = ProfileSet::new(policy.clone(), remote.is_some());
        let (state_tx, state_rx) = watch::channel(Arc::new(set.clone()));
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let engine = ReconciliationEngine::new(
            EngineConfig {
                mirrors_remote_repository: config.mirrors_remote_repository,
                settle_delay: config.settle_delay(),
            },
            writer.clone(),
            policy,
            state_rx.clone(),
        );

        let actor = Actor {
            set,
            state_tx,
            commands: command_rx,
            local_stream: Some(local.snapshots()),
            remote_stream: remote.as_ref().map(|r| r.snapshots()),
            writer: writer.clone(),
            engine,
            debounce: config.search_debounce(),
            pending_query: None,
            deferred_remote: None,
        };
        info!("Starting profile manager");
        let task = tokio::spawn(actor.run());

        ProfileManager {
            writer,
            state: state_rx,
            commands: command_tx,
            task: Mutex::new(Some(task)),
        }
    }
}

/// Manages the local profile set and keeps it reconciled with a remote store.
pub struct ProfileManager {
    writer: ProfileWriter,
    state: ProfileSetWatch,
    commands: mpsc::UnboundedSender<ManagerCommand>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ProfileManager {
    /// Starts building a manager over `local`.
    pub fn builder(local: Arc<dyn ProfileStore>) -> ProfileManagerBuilder {
        ProfileManagerBuilder {
            local,
            remote: None,
            backup: None,
            policy: Arc::new(AllowAllPolicy),
            config: ManagerConfig::default(),
            notifier: None,
        }
    }

    // ── Observation ──────────────────────────────────────────────

    /// Latest published state.
    pub fn state(&self) -> Arc<ProfileSet> {
        self.state.borrow().clone()
    }

    /// Watches state changes.
    pub fn watch_state(&self) -> ProfileSetWatch {
        self.state.clone()
    }

    /// Subscribes to set-level events.
    pub fn subscribe(&self) -> broadcast::Receiver<ProfileEvent> {
        self.writer.notifier().subscribe()
    }

    /// Waits until `condition` holds for the published state.
    pub async fn wait_until<F>(&self, mut condition: F) -> SyncResult<Arc<ProfileSet>>
    where
        F: FnMut(&ProfileSet) -> bool,
    {
        let mut rx = self.state.clone();
        let state = rx
            .wait_for(|state| condition(state.as_ref()))
            .await
            .map_err(|_| SyncError::Shutdown)?;
        Ok(state.clone())
    }

    /// Waits for the initial local (and remote) snapshots.
    pub async fn wait_until_ready(&self) -> SyncResult<()> {
        self.wait_until(ProfileSet::is_ready).await.map(|_| ())
    }

    /// See [`ProfileSet::is_ready`].
    pub fn is_ready(&self) -> bool {
        self.state.borrow().is_ready()
    }

    /// Looks up a local profile.
    pub fn profile(&self, id: &ProfileId) -> Option<Profile> {
        self.state.borrow().profile(id).cloned()
    }

    /// The current filtered view.
    pub fn view(&self) -> ProfileView {
        self.state.borrow().view().clone()
    }

    /// See [`ProfileSet::has_profiles`].
    pub fn has_profiles(&self) -> bool {
        self.state.borrow().has_profiles()
    }

    /// See [`ProfileSet::is_searching`].
    pub fn is_searching(&self) -> bool {
        self.state.borrow().is_searching()
    }

    /// See [`ProfileSet::previews`].
    pub fn previews(&self) -> Vec<ProfilePreview> {
        self.state.borrow().previews()
    }

    /// See [`ProfileSet::required_features`].
    pub fn required_features(&self, id: &ProfileId) -> Option<BTreeSet<Feature>> {
        self.state.borrow().required_features(id).cloned()
    }

    /// See [`ProfileSet::is_remotely_shared`].
    pub fn is_remotely_shared(&self, id: &ProfileId) -> bool {
        self.state.borrow().is_remotely_shared(id)
    }

    /// See [`ProfileSet::is_available_for_tv`].
    pub fn is_available_for_tv(&self, id: &ProfileId) -> bool {
        self.state.borrow().is_available_for_tv(id)
    }

    /// See [`ProfileSet::first_unique_name`].
    pub fn first_unique_name(&self, name: &str) -> String {
        self.state.borrow().first_unique_name(name)
    }

    /// Requests a new search query. Applied once no other query arrives
    /// within the debounce window.
    pub fn search(&self, query: impl Into<String>) -> SyncResult<()> {
        self.send(ManagerCommand::Search(query.into()))
    }

    /// Asks the actor to recompute required features.
    pub fn reload_required_features(&self) -> SyncResult<()> {
        self.send(ManagerCommand::ReloadRequiredFeatures)
    }

    // ── Edit ─────────────────────────────────────────────────────

    /// Saves a profile.
    ///
    /// With `is_local`, the profile is treated as a local edit and gets a
    /// fresh fingerprint. An unchanged profile is not written and emits
    /// nothing. `remotely_shared` toggles sharing: `Some(true)` pushes to the
    /// remote store, `Some(false)` removes it there, `None` keeps a shared
    /// profile in sync after a local edit.
    pub async fn save(
        &self,
        profile: Profile,
        is_local: bool,
        remotely_shared: Option<bool>,
    ) -> SyncResult<()> {
        let profile = if is_local { profile.restamped() } else { profile };
        info!("Save profile {}...", profile.id);

        let (cached, was_shared) = {
            let state = self.state.borrow();
            (
                state.profile(&profile.id).cloned(),
                state.is_remotely_shared(&profile.id),
            )
        };
        if let Err(e) = self.writer.persist_local(&profile, cached.as_ref()).await {
            error!("Unable to save profile {}: {}", profile.id, e);
            return Err(e);
        }

        if let Some(remote) = self.writer.remote() {
            let enable_sharing =
                remotely_shared == Some(true) || (remotely_shared.is_none() && is_local && was_shared);
            let disable_sharing = remotely_shared == Some(false);

            let result = if enable_sharing {
                info!("Enable remote sharing of profile {}...", profile.id);
                remote.save(&profile).await
            } else if disable_sharing {
                info!("Disable remote sharing of profile {}...", profile.id);
                remote.remove(&[profile.id]).await
            } else {
                Ok(())
            };
            if let Err(e) = result {
                error!("Unable to save/remove remote profile {}: {}", profile.id, e);
                return Err(e.into());
            }
        }

        info!("Finished saving profile {}", profile.id);
        Ok(())
    }

    /// Removes profiles locally, then best-effort from the remote store.
    pub async fn remove(&self, ids: &[ProfileId]) -> SyncResult<()> {
        info!("Remove profiles {:?}...", ids);
        if let Err(e) = self.writer.remove_local(ids).await {
            error!("Unable to remove profiles {:?}: {}", ids, e);
            return Err(e);
        }
        if let Some(remote) = self.writer.remote()
            && let Err(e) = remote.remove(ids).await
        {
            warn!("Unable to remove remote profiles {:?}: {}", ids, e);
        }
        self.writer
            .notifier()
            .emit(ProfileEvent::Removed(ids.to_vec()));
        Ok(())
    }

    /// Saves a copy of a profile under a fresh id and a unique name.
    ///
    /// Returns the new id, or `None` if `id` is unknown.
    pub async fn duplicate(&self, id: &ProfileId) -> SyncResult<Option<ProfileId>> {
        let copy = {
            let state = self.state.borrow();
            let Some(profile) = state.profile(id) else {
                return Ok(None);
            };
            profile.duplicated(state.first_unique_name(&profile.name))
        };
        info!("Duplicate profile {} -> [{}, {}]...", id, copy.id, copy.name);

        let new_id = copy.id;
        self.save(copy, false, None).await?;
        Ok(Some(new_id))
    }

    /// Creates (without saving) a blank profile with a unique name.
    pub fn new_profile(&self, name: &str) -> Profile {
        Profile::new(self.first_unique_name(name))
    }

    /// Removes every profile from the remote store.
    pub async fn erase_remotely_shared(&self) -> SyncResult<()> {
        info!("Erase remotely shared profiles...");
        if let Some(remote) = self.writer.remote() {
            remote.remove_all().await?;
        }
        Ok(())
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Stops the actor and cancels any running reconciliation.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(ManagerCommand::Shutdown);
        if let Some(task) = self.task.lock().await.take()
            && let Err(e) = task.await
        {
            warn!("Profile manager task ended abnormally: {}", e);
        }
    }

    fn send(&self, command: ManagerCommand) -> SyncResult<()> {
        self.commands
            .send(command)
            .map_err(|_| SyncError::ChannelClosed)
    }
}

// ── Actor ────────────────────────────────────────────────────────

struct Actor {
    set: ProfileSet,
    state_tx: watch::Sender<Arc<ProfileSet>>,
    commands: mpsc::UnboundedReceiver<ManagerCommand>,
    local_stream: Option<SnapshotStream>,
    remote_stream: Option<SnapshotStream>,
    writer: ProfileWriter,
    engine: ReconciliationEngine,
    debounce: Duration,
    pending_query: Option<(String, Instant)>,
    /// Remote snapshot that arrived before the first local one.
    deferred_remote: Option<Snapshot>,
}

impl Actor {
    async fn run(mut self) {
        loop {
            let deadline = self.pending_query.as_ref().map(|(_, at)| *at);

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(ManagerCommand::Search(query)) => {
                        debug!("Search '{}' pending", query);
                        self.pending_query = Some((query, Instant::now() + self.debounce));
                    }
                    Some(ManagerCommand::ReloadRequiredFeatures) => {
                        self.set.reload_required_features();
                        self.publish();
                    }
                    Some(ManagerCommand::Shutdown) | None => break,
                },
                snapshot = next_snapshot(&mut self.local_stream) => match snapshot {
                    Some(snapshot) => self.on_local(snapshot),
                    None => {
                        warn!("Local store stopped publishing snapshots");
                        self.local_stream = None;
                    }
                },
                snapshot = next_snapshot(&mut self.remote_stream) => match snapshot {
                    Some(snapshot) => self.on_remote(snapshot),
                    None => {
                        warn!("Remote store stopped publishing snapshots");
                        self.remote_stream = None;
                    }
                },
                () = sleep_until(deadline), if deadline.is_some() => {
                    if let Some((query, _)) = self.pending_query.take() {
                        self.set.set_query(query);
                        self.publish();
                    }
                }
            }
        }

        info!("Stopping profile manager");
        self.engine.shutdown().await;
    }

    fn on_local(&mut self, snapshot: Snapshot) {
        self.writer.acknowledge(&snapshot);
        let excluded = self.set.apply_local(&snapshot);
        self.publish();

        if !excluded.is_empty() {
            info!("Delete excluded profiles from repository: {:?}", excluded);
            let writer = self.writer.clone();
            tokio::spawn(async move {
                if let Err(e) = writer.remove_local(&excluded).await {
                    warn!("Unable to delete excluded profiles {:?}: {}", excluded, e);
                }
            });
        }

        if let Some(remote) = self.deferred_remote.take() {
            self.engine.reconcile(remote);
        }
    }

    fn on_remote(&mut self, snapshot: Snapshot) {
        self.set.apply_remote(&snapshot);
        self.publish();
        // Passes compare against the local replica, so wait until it is loaded.
        if self.set.is_local_loaded() {
            self.engine.reconcile(snapshot);
        } else {
            debug!("Defer remote import until local profiles are loaded");
            self.deferred_remote = Some(snapshot);
        }
    }

    fn publish(&self) {
        self.state_tx.send_replace(Arc::new(self.set.clone()));
    }
}

async fn next_snapshot(stream: &mut Option<SnapshotStream>) -> Option<Snapshot> {
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
