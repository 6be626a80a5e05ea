//! Reconciliation of the local replica against remote snapshots.
//!
//! Each remote snapshot starts a pass. A pass decides, per remote profile,
//! whether to skip it (same fingerprint locally), import it verbatim, or
//! schedule it for local deletion (excluded by policy). Local profiles missing
//! from the remote snapshot are deleted too when mirroring is enabled.
//!
//! Passes never overlap. Starting a pass cancels the running one and waits
//! for it to unwind before announcing itself or touching the local store. Cancellation is checked
//! between profiles. Imports already applied stay applied, and a cancelled
//! pass never applies its deletion batch.

use crate::events::ProfileEvent;
use crate::profile_set::ProfileSet;
use crate::policy::InclusionPolicy;
use crate::writer::ProfileWriter;
use profilesync_types::{ProfileId, Snapshot};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Receiver for the latest published profile set.
pub type ProfileSetWatch = watch::Receiver<Arc<ProfileSet>>;

/// How a pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PassStatus {
    /// Every remote profile was considered and deletions were applied.
    #[default]
    Completed,
    /// A newer pass (or shutdown) cancelled this one.
    Cancelled,
}

/// What a single pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub status: PassStatus,
    /// Remote profiles written to the local store.
    pub imported: Vec<ProfileId>,
    /// Remote profiles already present with the same fingerprint.
    pub skipped: Vec<ProfileId>,
    /// Profiles removed from the local store.
    pub deleted: Vec<ProfileId>,
    /// Remote profiles whose import failed; retried on the next snapshot.
    pub failed: Vec<ProfileId>,
}

impl PassReport {
    /// True if the pass ran to the end.
    pub fn is_completed(&self) -> bool {
        self.status == PassStatus::Completed
    }
}

/// Awaitable completion of one pass.
#[derive(Debug, Clone)]
pub struct ReconcileHandle {
    done: watch::Receiver<Option<PassReport>>,
}

impl ReconcileHandle {
    /// Waits for the pass to finish. Returns `None` if the task was aborted.
    pub async fn wait(mut self) -> Option<PassReport> {
        match self.done.wait_for(Option::is_some).await {
            Ok(report) => report.clone(),
            Err(_) => None,
        }
    }
}

/// Options fixed for the engine's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Propagate remote deletions to the local store.
    pub mirrors_remote_repository: bool,
    /// Pause after a completed pass.
    pub settle_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mirrors_remote_repository: false,
            settle_delay: Duration::from_millis(100),
        }
    }
}

struct PassContext {
    config: EngineConfig,
    writer: ProfileWriter,
    policy: Arc<dyn InclusionPolicy>,
    cache: ProfileSetWatch,
}

struct InFlight {
    token: CancellationToken,
    task: JoinHandle<PassReport>,
}

/// Runs reconciliation passes one at a time.
pub struct ReconciliationEngine {
    ctx: Arc<PassContext>,
    in_flight: Option<InFlight>,
}

impl ReconciliationEngine {
    /// Creates an engine writing through `writer` and reading local state from `cache`.
    pub fn new(
        config: EngineConfig,
        writer: ProfileWriter,
        policy: Arc<dyn InclusionPolicy>,
        cache: ProfileSetWatch,
    ) -> Self {
        Self {
            ctx: Arc::new(PassContext {
                config,
                writer,
                policy,
                cache,
            }),
            in_flight: None,
        }
    }

    /// Returns true if a pass is still running.
    pub fn is_running(&self) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|f| !f.task.is_finished())
    }

    /// Starts a pass for `remote`, superseding any running pass.
    ///
    /// Returns immediately; the pass runs on its own task.
    pub fn reconcile(&mut self, remote: Snapshot) -> ReconcileHandle {
        let previous = self.in_flight.take();
        let token = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(None);

        let ctx = self.ctx.clone();
        let pass_token = token.clone();
        let task = tokio::spawn(async move {
            if let Some(previous) = previous {
                info!("Cancel ongoing remote import...");
                previous.token.cancel();
                if let Err(e) = previous.task.await {
                    warn!("Previous remote import ended abnormally: {}", e);
                }
            }

            // Emitted only once the previous pass has stopped, so start/stop
            // pairs never overlap.
            let notifier = ctx.writer.notifier().clone();
            notifier.emit(ProfileEvent::RemoteImportStarted);

            let report = run_pass(&ctx, &remote, &pass_token).await;
            notifier.emit(ProfileEvent::RemoteImportStopped);

            if report.is_completed() {
                tokio::select! {
                    () = tokio::time::sleep(ctx.config.settle_delay) => {}
                    () = pass_token.cancelled() => {}
                }
            }

            let _ = done_tx.send(Some(report.clone()));
            report
        });

        self.in_flight = Some(InFlight { token, task });
        ReconcileHandle { done: done_rx }
    }

    /// Cancels the running pass, if any, and waits for it to unwind.
    pub async fn shutdown(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.token.cancel();
            if let Err(e) = in_flight.task.await {
                warn!("Remote import ended abnormally during shutdown: {}", e);
            }
        }
    }
}

async fn run_pass(ctx: &PassContext, remote: &Snapshot, token: &CancellationToken) -> PassReport {
    let mut report = PassReport::default();
    let remote_ids: Vec<&ProfileId> = remote.ids().collect();
    info!("Start importing remote profiles: {:?}", remote_ids);

    let mut to_delete: Vec<ProfileId> = Vec::new();

    let gone: Vec<ProfileId> = {
        let cache = ctx.cache.borrow();
        cache
            .all_profiles()
            .ids()
            .filter(|id| !remote.contains(id))
            .copied()
            .collect()
    };
    if !gone.is_empty() {
        let mirrors = ctx.config.mirrors_remote_repository;
        info!(
            "Will {} local profiles not present in remote repository: {:?}",
            if mirrors { "delete" } else { "retain" },
            gone
        );
        if mirrors {
            to_delete.extend(gone);
        }
    }

    for remote_profile in remote.profiles() {
        if token.is_cancelled() {
            info!("Cancelled import of remote profiles: {:?}", remote_ids);
            report.status = PassStatus::Cancelled;
            return report;
        }

        let id = remote_profile.id;
        if !ctx.policy.is_included(remote_profile) {
            info!("Will delete non-included remote profile {}", id);
            to_delete.push(id);
            continue;
        }

        // Fresh read per profile: the cache may have moved since the pass began.
        let cached = ctx.cache.borrow().profile(&id).cloned();
        if cached
            .as_ref()
            .is_some_and(|local| local.is_equivalent(remote_profile))
        {
            debug!("Skip re-importing local profile {}", id);
            report.skipped.push(id);
            continue;
        }

        info!("Import remote profile {}...", id);
        match ctx.writer.persist_local(remote_profile, cached.as_ref()).await {
            Ok(true) => report.imported.push(id),
            Ok(false) => report.skipped.push(id),
            Err(e) => {
                warn!("Unable to import remote profile {}: {}", id, e);
                report.failed.push(id);
            }
        }
    }

    if token.is_cancelled() {
        info!("Cancelled before deleting stale profiles: {:?}", to_delete);
        report.status = PassStatus::Cancelled;
        return report;
    }

    let mut seen = HashSet::new();
    to_delete.retain(|id| seen.insert(*id));

    info!("Finished importing remote profiles, delete stale profiles: {:?}", to_delete);
    if !to_delete.is_empty() {
        match ctx.writer.remove_local(&to_delete).await {
            Ok(()) => {
                ctx.writer
                    .notifier()
                    .emit(ProfileEvent::Removed(to_delete.clone()));
                report.deleted = to_delete;
            }
            Err(e) => error!("Unable to delete stale profiles: {}", e),
        }
    }

    report
}
