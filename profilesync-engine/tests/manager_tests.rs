use async_trait::async_trait;
use futures::StreamExt;
use pretty_assertions::assert_eq;
use profilesync_engine::{
    InclusionPolicy, ManagerConfig, ProfileEvent, ProfileManager, ProfileSet, SyncError,
    TvOnlyPolicy,
};
use profilesync_store::{MemoryProfileStore, ProfileStore, SnapshotStream, StoreResult};
use profilesync_types::{Feature, Profile, ProfileId, Snapshot};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn store(name: &str, profiles: Vec<Profile>) -> Arc<MemoryProfileStore> {
    Arc::new(MemoryProfileStore::with_profiles(name, profiles))
}

fn stamped(name: &str) -> Profile {
    Profile::new(name).restamped()
}

fn tv_profile(name: &str) -> Profile {
    let mut profile = stamped(name);
    profile.attributes.is_available_for_tv = Some(true);
    profile
}

async fn eventually<F>(manager: &ProfileManager, condition: F) -> Arc<ProfileSet>
where
    F: FnMut(&ProfileSet) -> bool,
{
    timeout(WAIT, manager.wait_until(condition))
        .await
        .expect("timed out waiting for manager state")
        .expect("manager stopped")
}

async fn store_eventually(store: &MemoryProfileStore, condition: impl Fn(&Snapshot) -> bool) {
    let mut snapshots = store.snapshots();
    timeout(WAIT, async {
        while let Some(snapshot) = snapshots.next().await {
            if condition(&snapshot) {
                return;
            }
        }
        panic!("store stopped publishing");
    })
    .await
    .expect("timed out waiting for store contents");
}

async fn next_matching(
    rx: &mut broadcast::Receiver<ProfileEvent>,
    mut matches: impl FnMut(&ProfileEvent) -> bool,
) -> ProfileEvent {
    timeout(WAIT, async {
        loop {
            let event = rx.recv().await.expect("event channel closed");
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// A remote store that never delivers a snapshot.
struct SilentStore;

#[async_trait]
impl ProfileStore for SilentStore {
    fn name(&self) -> &str {
        "silent"
    }

    async fn fetch_all(&self) -> StoreResult<Snapshot> {
        Ok(Snapshot::empty())
    }

    fn snapshots(&self) -> SnapshotStream {
        futures::stream::pending().boxed()
    }

    async fn save(&self, _profile: &Profile) -> StoreResult<()> {
        Ok(())
    }

    async fn remove(&self, _ids: &[ProfileId]) -> StoreResult<()> {
        Ok(())
    }

    async fn remove_all(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Requires DNS for profiles whose name starts with "dns".
struct DnsGatedPolicy;

impl InclusionPolicy for DnsGatedPolicy {
    fn required_features(&self, profile: &Profile) -> BTreeSet<Feature> {
        if profile.name.starts_with("dns") {
            BTreeSet::from([Feature::Dns])
        } else {
            BTreeSet::new()
        }
    }
}

// ── Readiness ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn ready_once_local_snapshot_arrives() {
    init_tracing();
    let a = stamped("a");
    let manager = ProfileManager::builder(store("local", vec![a.clone()])).start();

    timeout(WAIT, manager.wait_until_ready()).await.unwrap().unwrap();
    assert!(manager.is_ready());
    assert_eq!(manager.profile(&a.id), Some(a));
    assert!(manager.has_profiles());
}

#[tokio::test(start_paused = true)]
async fn not_ready_until_remote_delivers() {
    init_tracing();
    let manager = ProfileManager::builder(store("local", vec![stamped("a")]))
        .remote(Arc::new(SilentStore))
        .start();

    eventually(&manager, ProfileSet::has_profiles).await;
    assert!(!manager.is_ready());
    assert!(
        timeout(Duration::from_millis(500), manager.wait_until_ready())
            .await
            .is_err()
    );
}

// ── Search ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn search_applies_only_settled_query() {
    init_tracing();
    let local = store(
        "local",
        vec![stamped("Alpha"), stamped("Beta"), stamped("alphabet")],
    );
    let manager = ProfileManager::builder(local).start();
    manager.wait_until_ready().await.unwrap();

    manager.search("a").unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    manager.search("be").unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    // The first query was superseded before its window elapsed.
    assert_eq!(manager.view().query, "");
    assert!(!manager.is_searching());

    let state = eventually(&manager, |s| s.view().query == "be").await;
    assert_eq!(state.view().names(), vec!["alphabet", "Beta"]);
    assert!(manager.is_searching());
}

#[tokio::test(start_paused = true)]
async fn clearing_search_restores_full_view() {
    init_tracing();
    let manager = ProfileManager::builder(store("local", vec![stamped("Alpha"), stamped("Beta")])).start();
    manager.wait_until_ready().await.unwrap();

    manager.search("alp").unwrap();
    eventually(&manager, |s| s.view().query == "alp").await;
    assert_eq!(manager.view().names(), vec!["Alpha"]);

    manager.search("").unwrap();
    let state = eventually(&manager, |s| !s.is_searching()).await;
    assert_eq!(state.view().names(), vec!["Alpha", "Beta"]);
}

#[tokio::test(start_paused = true)]
async fn custom_debounce_is_honoured() {
    init_tracing();
    let config = ManagerConfig {
        search_debounce_ms: 1_000,
        ..ManagerConfig::default()
    };
    let manager = ProfileManager::builder(store("local", vec![stamped("Alpha")]))
        .config(config)
        .start();
    manager.wait_until_ready().await.unwrap();

    manager.search("zzz").unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(manager.view().query, "");

    eventually(&manager, |s| s.view().query == "zzz").await;
    assert!(!manager.has_profiles());
}

// ── Save ─────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn local_save_restamps_and_notifies() {
    init_tracing();
    let local = store("local", vec![]);
    let manager = ProfileManager::builder(local.clone()).start();
    let mut events = manager.subscribe();
    manager.wait_until_ready().await.unwrap();

    let profile = Profile::new("Home");
    manager.save(profile.clone(), true, None).await.unwrap();

    let stored = local.get(&profile.id).unwrap();
    assert!(stored.fingerprint().is_some());
    assert!(stored.attributes.last_update.is_some());

    let event = next_matching(&mut events, |e| matches!(e, ProfileEvent::Saved(_))).await;
    assert_eq!(event, ProfileEvent::Saved(stored.clone()));

    let state = eventually(&manager, |s| s.profile(&profile.id).is_some()).await;
    assert_eq!(state.view().names(), vec!["Home"]);
}

#[tokio::test(start_paused = true)]
async fn unchanged_save_is_a_no_op() {
    init_tracing();
    let profile = stamped("Home");
    let local = store("local", vec![profile.clone()]);
    let manager = ProfileManager::builder(local.clone()).start();
    let mut events = manager.subscribe();
    eventually(&manager, |s| s.profile(&profile.id).is_some()).await;

    manager.save(profile.clone(), false, None).await.unwrap();

    assert_eq!(local.save_calls(), 0);
    assert!(events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn repeated_save_writes_once() {
    init_tracing();
    let local = store("local", vec![]);
    let manager = ProfileManager::builder(local.clone()).start();
    manager.wait_until_ready().await.unwrap();
    let mut events = manager.subscribe();

    let profile = stamped("Home");
    manager.save(profile.clone(), false, None).await.unwrap();
    manager.save(profile.clone(), false, None).await.unwrap();

    assert_eq!(local.save_calls(), 1);
    let mut saved = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, ProfileEvent::Saved(_)) {
            saved += 1;
        }
    }
    assert_eq!(saved, 1);
}

#[tokio::test(start_paused = true)]
async fn save_after_remove_writes_again() {
    init_tracing();
    let local = store("local", vec![]);
    let manager = ProfileManager::builder(local.clone()).start();
    manager.wait_until_ready().await.unwrap();

    let profile = stamped("Home");
    manager.save(profile.clone(), false, None).await.unwrap();
    manager.remove(&[profile.id]).await.unwrap();
    eventually(&manager, |s| s.profile(&profile.id).is_none()).await;

    manager.save(profile.clone(), false, None).await.unwrap();
    assert_eq!(local.save_calls(), 2);
    assert_eq!(local.get(&profile.id), Some(profile));
}

#[tokio::test(start_paused = true)]
async fn save_failure_is_returned() {
    init_tracing();
    let local = store("local", vec![]);
    local.set_fail_all_saves(true);
    let manager = ProfileManager::builder(local.clone()).start();
    manager.wait_until_ready().await.unwrap();

    let err = manager.save(Profile::new("Home"), true, None).await.unwrap_err();
    assert!(matches!(err, SyncError::Store(_)));
    assert!(local.snapshot().is_empty());
}

#[tokio::test(start_paused = true)]
async fn save_mirrors_to_backup() {
    init_tracing();
    let backup = store("backup", vec![]);
    let manager = ProfileManager::builder(store("local", vec![]))
        .backup(backup.clone())
        .start();
    manager.wait_until_ready().await.unwrap();

    let profile = Profile::new("Home");
    manager.save(profile.clone(), true, None).await.unwrap();

    store_eventually(&backup, |s| s.contains(&profile.id)).await;
}

#[tokio::test(start_paused = true)]
async fn backup_failure_does_not_fail_save() {
    init_tracing();
    let local = store("local", vec![]);
    let backup = store("backup", vec![]);
    backup.set_fail_all_saves(true);
    let manager = ProfileManager::builder(local.clone())
        .backup(backup.clone())
        .start();
    manager.wait_until_ready().await.unwrap();

    let profile = Profile::new("Home");
    manager.save(profile.clone(), true, None).await.unwrap();

    assert!(local.get(&profile.id).is_some());
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(backup.get(&profile.id).is_none());
}

// ── Sharing ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn enabling_sharing_pushes_to_remote() {
    init_tracing();
    let local = store("local", vec![]);
    let remote = store("remote", vec![]);
    let manager = ProfileManager::builder(local.clone())
        .remote(remote.clone())
        .start();
    manager.wait_until_ready().await.unwrap();

    let profile = Profile::new("Shared");
    manager.save(profile.clone(), true, Some(true)).await.unwrap();

    let pushed = remote.get(&profile.id).unwrap();
    assert_eq!(Some(pushed.fingerprint()), local.get(&profile.id).map(|p| p.fingerprint()));
    eventually(&manager, |s| s.is_remotely_shared(&profile.id)).await;
}

#[tokio::test(start_paused = true)]
async fn disabling_sharing_removes_from_remote_only() {
    init_tracing();
    let profile = stamped("Shared");
    let local = store("local", vec![profile.clone()]);
    let remote = store("remote", vec![profile.clone()]);
    let manager = ProfileManager::builder(local.clone())
        .remote(remote.clone())
        .start();
    eventually(&manager, |s| s.is_ready() && s.is_remotely_shared(&profile.id)).await;

    manager.save(profile.clone(), true, Some(false)).await.unwrap();

    assert!(remote.get(&profile.id).is_none());
    assert!(local.get(&profile.id).is_some());
    eventually(&manager, |s| !s.is_remotely_shared(&profile.id)).await;
    assert!(manager.profile(&profile.id).is_some());
}

#[tokio::test(start_paused = true)]
async fn local_edit_of_shared_profile_updates_remote() {
    init_tracing();
    let profile = stamped("Before");
    let remote = store("remote", vec![profile.clone()]);
    let manager = ProfileManager::builder(store("local", vec![profile.clone()]))
        .remote(remote.clone())
        .start();
    eventually(&manager, |s| s.is_ready() && s.is_remotely_shared(&profile.id)).await;

    let mut edited = profile.clone();
    edited.name = "After".into();
    manager.save(edited, true, None).await.unwrap();

    let pushed = remote.get(&profile.id).unwrap();
    assert_eq!(pushed.name, "After");
    assert_ne!(pushed.fingerprint(), profile.fingerprint());
}

#[tokio::test(start_paused = true)]
async fn local_edit_of_private_profile_stays_local() {
    init_tracing();
    let profile = stamped("Private");
    let remote = store("remote", vec![]);
    let manager = ProfileManager::builder(store("local", vec![profile.clone()]))
        .remote(remote.clone())
        .start();
    eventually(&manager, |s| s.is_ready() && s.profile(&profile.id).is_some()).await;

    let mut edited = profile.clone();
    edited.name = "Renamed".into();
    manager.save(edited, true, None).await.unwrap();

    assert_eq!(remote.save_calls(), 0);
    assert!(remote.snapshot().is_empty());
}

#[tokio::test(start_paused = true)]
async fn remote_failure_on_share_is_returned() {
    init_tracing();
    let local = store("local", vec![]);
    let remote = store("remote", vec![]);
    remote.set_fail_all_saves(true);
    let manager = ProfileManager::builder(local.clone())
        .remote(remote)
        .start();
    manager.wait_until_ready().await.unwrap();

    let profile = Profile::new("Shared");
    let err = manager.save(profile.clone(), true, Some(true)).await.unwrap_err();

    assert!(matches!(err, SyncError::Store(_)));
    assert!(local.get(&profile.id).is_some());
}

#[tokio::test(start_paused = true)]
async fn erase_remotely_shared_empties_remote() {
    init_tracing();
    let a = stamped("a");
    let b = stamped("b");
    let local = store("local", vec![a.clone(), b.clone()]);
    let remote = store("remote", vec![a.clone(), b.clone()]);
    let manager = ProfileManager::builder(local.clone())
        .remote(remote.clone())
        .start();
    manager.wait_until_ready().await.unwrap();

    manager.erase_remotely_shared().await.unwrap();

    assert!(remote.snapshot().is_empty());
    eventually(&manager, |s| s.remote_profiles().is_empty()).await;
    assert_eq!(local.snapshot().len(), 2);
}

// ── Remove and duplicate ─────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn remove_deletes_locally_and_remotely() {
    init_tracing();
    let profile = stamped("Doomed");
    let local = store("local", vec![profile.clone()]);
    let remote = store("remote", vec![profile.clone()]);
    let manager = ProfileManager::builder(local.clone())
        .remote(remote.clone())
        .start();
    let mut events = manager.subscribe();
    manager.wait_until_ready().await.unwrap();

    manager.remove(&[profile.id]).await.unwrap();

    assert!(local.get(&profile.id).is_none());
    assert!(remote.get(&profile.id).is_none());
    let event = next_matching(&mut events, |e| matches!(e, ProfileEvent::Removed(_))).await;
    assert_eq!(event, ProfileEvent::Removed(vec![profile.id]));
    eventually(&manager, |s| s.profile(&profile.id).is_none()).await;
}

#[tokio::test(start_paused = true)]
async fn remove_tolerates_remote_failure() {
    init_tracing();
    let profile = stamped("Doomed");
    let local = store("local", vec![profile.clone()]);
    let remote = store("remote", vec![profile.clone()]);
    remote.set_fail_removes(true);
    let manager = ProfileManager::builder(local.clone())
        .remote(remote.clone())
        .start();
    manager.wait_until_ready().await.unwrap();

    manager.remove(&[profile.id]).await.unwrap();
    assert!(local.get(&profile.id).is_none());
}

#[tokio::test(start_paused = true)]
async fn remove_fails_when_local_fails() {
    init_tracing();
    let profile = stamped("Stuck");
    let local = store("local", vec![profile.clone()]);
    local.set_fail_removes(true);
    let manager = ProfileManager::builder(local.clone()).start();
    manager.wait_until_ready().await.unwrap();

    let err = manager.remove(&[profile.id]).await.unwrap_err();
    assert!(matches!(err, SyncError::Store(_)));
    assert!(local.get(&profile.id).is_some());
}

#[tokio::test(start_paused = true)]
async fn duplicates_get_increasing_suffixes() {
    init_tracing();
    let original = stamped("example");
    let local = store("local", vec![original.clone()]);
    let manager = ProfileManager::builder(local.clone()).start();
    manager.wait_until_ready().await.unwrap();

    let mut names = Vec::new();
    for _ in 0..3 {
        let id = manager.duplicate(&original.id).await.unwrap().unwrap();
        let state = eventually(&manager, |s| s.profile(&id).is_some()).await;
        let copy = state.profile(&id).unwrap();
        assert_eq!(copy.content, original.content);
        names.push(copy.name.clone());
    }

    assert_eq!(names, vec!["example.1", "example.2", "example.3"]);
    assert_eq!(local.snapshot().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn duplicate_of_unknown_profile_is_none() {
    init_tracing();
    let manager = ProfileManager::builder(store("local", vec![])).start();
    manager.wait_until_ready().await.unwrap();

    assert_eq!(manager.duplicate(&ProfileId::new()).await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn new_profile_gets_unique_name() {
    init_tracing();
    let manager = ProfileManager::builder(store("local", vec![stamped("New profile")])).start();
    manager.wait_until_ready().await.unwrap();

    let profile = manager.new_profile("New profile");
    assert_eq!(profile.name, "New profile.1");
    assert!(manager.profile(&profile.id).is_none());
}

// ── Remote reconciliation ────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn remote_profiles_are_imported() {
    init_tracing();
    let shared = stamped("From another device");
    let local = store("local", vec![]);
    let manager = ProfileManager::builder(local.clone())
        .remote(store("remote", vec![shared.clone()]))
        .start();
    let mut events = manager.subscribe();

    store_eventually(&local, |s| s.contains(&shared.id)).await;
    next_matching(&mut events, |e| *e == ProfileEvent::RemoteImportStopped).await;

    let state = eventually(&manager, |s| s.profile(&shared.id).is_some()).await;
    assert!(state.is_remotely_shared(&shared.id));
    assert_eq!(local.get(&shared.id), Some(shared));
}

#[tokio::test(start_paused = true)]
async fn later_remote_changes_are_imported() {
    init_tracing();
    let local = store("local", vec![]);
    let remote = store("remote", vec![]);
    let manager = ProfileManager::builder(local.clone())
        .remote(remote.clone())
        .start();
    manager.wait_until_ready().await.unwrap();

    let arriving = stamped("Arriving");
    remote.replace_all([arriving.clone()]);

    store_eventually(&local, |s| s.contains(&arriving.id)).await;
}

#[tokio::test(start_paused = true)]
async fn mirroring_removes_profiles_deleted_remotely() {
    init_tracing();
    let kept = stamped("kept");
    let gone = stamped("gone");
    let local = store("local", vec![kept.clone(), gone.clone()]);
    let config = ManagerConfig {
        mirrors_remote_repository: true,
        ..ManagerConfig::default()
    };
    let manager = ProfileManager::builder(local.clone())
        .remote(store("remote", vec![kept.clone()]))
        .config(config)
        .start();

    store_eventually(&local, |s| !s.contains(&gone.id)).await;
    eventually(&manager, |s| s.profile(&gone.id).is_none()).await;
    assert!(local.get(&kept.id).is_some());
}

#[tokio::test(start_paused = true)]
async fn without_mirroring_local_profiles_are_kept() {
    init_tracing();
    let kept = stamped("kept");
    let local_only = stamped("local only");
    let local = store("local", vec![kept.clone(), local_only.clone()]);
    let manager = ProfileManager::builder(local.clone())
        .remote(store("remote", vec![kept.clone()]))
        .start();
    let mut events = manager.subscribe();

    next_matching(&mut events, |e| *e == ProfileEvent::RemoteImportStopped).await;
    assert!(local.get(&local_only.id).is_some());
    assert!(!manager.is_remotely_shared(&local_only.id));
}

// ── Policy ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn excluded_local_profiles_are_purged() {
    init_tracing();
    let tv = tv_profile("Living room");
    let laptop = stamped("Laptop");
    let local = store("local", vec![tv.clone(), laptop.clone()]);
    let manager = ProfileManager::builder(local.clone())
        .policy(Arc::new(TvOnlyPolicy))
        .start();

    let state = eventually(&manager, ProfileSet::is_ready).await;
    assert_eq!(state.view().names(), vec!["Living room"]);
    assert!(manager.is_available_for_tv(&tv.id));

    store_eventually(&local, |s| !s.contains(&laptop.id)).await;
    assert!(local.get(&tv.id).is_some());
}

#[tokio::test(start_paused = true)]
async fn excluded_remote_profiles_are_not_imported() {
    init_tracing();
    let tv = tv_profile("Living room");
    let laptop = stamped("Laptop");
    let local = store("local", vec![]);
    let manager = ProfileManager::builder(local.clone())
        .remote(store("remote", vec![tv.clone(), laptop.clone()]))
        .policy(Arc::new(TvOnlyPolicy))
        .start();
    let mut events = manager.subscribe();

    next_matching(&mut events, |e| *e == ProfileEvent::RemoteImportStopped).await;

    assert!(local.get(&tv.id).is_some());
    assert!(local.get(&laptop.id).is_none());
    assert!(manager.profile(&laptop.id).is_none());
}

#[tokio::test(start_paused = true)]
async fn required_features_come_from_policy() {
    init_tracing();
    let gated = stamped("dns profile");
    let free = stamped("plain");
    let manager = ProfileManager::builder(store("local", vec![gated.clone(), free.clone()]))
        .policy(Arc::new(DnsGatedPolicy))
        .start();
    manager.wait_until_ready().await.unwrap();

    assert_eq!(
        manager.required_features(&gated.id),
        Some(BTreeSet::from([Feature::Dns]))
    );
    assert_eq!(manager.required_features(&free.id), None);

    manager.reload_required_features().unwrap();
    eventually(&manager, |s| s.required_features(&gated.id).is_some()).await;
}

// ── Lifecycle ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn commands_fail_after_shutdown() {
    init_tracing();
    let manager = ProfileManager::builder(store("local", vec![])).start();
    manager.wait_until_ready().await.unwrap();

    manager.shutdown().await;

    assert!(matches!(manager.search("x"), Err(SyncError::ChannelClosed)));
    assert!(matches!(
        manager.wait_until(|s| s.view().query == "never").await,
        Err(SyncError::Shutdown)
    ));
    // Second shutdown is harmless.
    manager.shutdown().await;
}
