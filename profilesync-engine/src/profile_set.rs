//! In-memory profile set state.
//!
//! `ProfileSet` holds the included local profiles plus everything derived from
//! them: the filtered, sorted view and the per-profile required features. It
//! also remembers the ids of the latest remote snapshot and which initial
//! snapshots are still outstanding.
//!
//! The set is mutated by exactly one owner (the manager's actor task), which
//! publishes an immutable copy after every change.

use crate::policy::InclusionPolicy;
use profilesync_types::{Feature, Profile, ProfileId, ProfilePreview, Snapshot};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// The filtered, sorted list consumers display.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileView {
    /// The query this view was computed for. Empty means unfiltered.
    pub query: String,
    /// Matching profiles sorted by case-insensitive name.
    pub profiles: Vec<Profile>,
}

impl ProfileView {
    /// Names of the profiles in view order.
    pub fn names(&self) -> Vec<&str> {
        self.profiles.iter().map(|p| p.name.as_str()).collect()
    }
}

/// The manager's profile state.
#[derive(Clone)]
pub struct ProfileSet {
    policy: Arc<dyn InclusionPolicy>,
    all_profiles: Snapshot,
    remote: Snapshot,
    required_features: HashMap<ProfileId, BTreeSet<Feature>>,
    view: ProfileView,
    waiting_local: bool,
    waiting_remote: bool,
}

impl ProfileSet {
    /// Creates an empty set. With `expects_remote`, readiness also waits for
    /// the first remote snapshot.
    pub fn new(policy: Arc<dyn InclusionPolicy>, expects_remote: bool) -> Self {
        Self {
            policy,
            all_profiles: Snapshot::empty(),
            remote: Snapshot::empty(),
            required_features: HashMap::new(),
            view: ProfileView::default(),
            waiting_local: true,
            waiting_remote: expects_remote,
        }
    }

    // ── Mutations ────────────────────────────────────────────────

    /// Replaces the local profiles with `snapshot`, dropping profiles the
    /// policy excludes. Returns the excluded ids so the caller can purge them.
    pub fn apply_local(&mut self, snapshot: &Snapshot) -> Vec<ProfileId> {
        debug!("Reload local profiles: {:?}", snapshot.ids().collect::<Vec<_>>());

        let mut excluded = Vec::new();
        let mut included = HashMap::with_capacity(snapshot.len());
        for (id, profile) in snapshot {
            if self.policy.is_included(profile) {
                included.insert(*id, profile.clone());
            } else {
                excluded.push(*id);
            }
        }
        self.all_profiles = included.into();
        self.waiting_local = false;

        info!(
            "Local profiles after exclusions: {} ({} excluded)",
            self.all_profiles.len(),
            excluded.len()
        );
        self.recompute();
        excluded
    }

    /// Records the latest remote snapshot.
    pub fn apply_remote(&mut self, snapshot: &Snapshot) {
        debug!("Reload remote profiles: {:?}", snapshot.ids().collect::<Vec<_>>());
        self.remote = snapshot.clone();
        self.waiting_remote = false;
    }

    /// Applies a settled search query and refilters the view.
    pub fn set_query(&mut self, query: impl Into<String>) {
        self.view = self.filtered(query.into());
    }

    /// Recomputes required features, for policies whose answers changed.
    pub fn reload_required_features(&mut self) {
        self.required_features = self
            .all_profiles
            .iter()
            .filter_map(|(id, profile)| {
                let missing = self.policy.required_features(profile);
                (!missing.is_empty()).then_some((*id, missing))
            })
            .collect();
        debug!("Required features: {:?}", self.required_features);
    }

    fn recompute(&mut self) {
        let query = std::mem::take(&mut self.view.query);
        self.view = self.filtered(query);
        self.reload_required_features();
    }

    fn filtered(&self, query: String) -> ProfileView {
        let needle = query.to_lowercase();
        let mut profiles: Vec<Profile> = self
            .all_profiles
            .profiles()
            .filter(|p| needle.is_empty() || p.name.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        profiles.sort_by_cached_key(|p| p.name.to_lowercase());

        info!("Filter profiles with '{}' ({} results)", query, profiles.len());
        ProfileView { query, profiles }
    }

    // ── Queries ──────────────────────────────────────────────────

    /// True once the local (and, if configured, remote) store delivered its
    /// first snapshot.
    pub fn is_ready(&self) -> bool {
        !self.waiting_local && !self.waiting_remote
    }

    /// True once the local store delivered its first snapshot.
    pub fn is_local_loaded(&self) -> bool {
        !self.waiting_local
    }

    /// All included local profiles.
    pub fn all_profiles(&self) -> &Snapshot {
        &self.all_profiles
    }

    /// The latest remote snapshot.
    pub fn remote_profiles(&self) -> &Snapshot {
        &self.remote
    }

    /// Looks up a local profile.
    pub fn profile(&self, id: &ProfileId) -> Option<&Profile> {
        self.all_profiles.get(id)
    }

    /// The current filtered view.
    pub fn view(&self) -> &ProfileView {
        &self.view
    }

    /// True if the view is non-empty.
    pub fn has_profiles(&self) -> bool {
        !self.view.profiles.is_empty()
    }

    /// True while a non-empty query is applied.
    pub fn is_searching(&self) -> bool {
        !self.view.query.is_empty()
    }

    /// Previews of the view, in view order.
    pub fn previews(&self) -> Vec<ProfilePreview> {
        self.view
            .profiles
            .iter()
            .map(|p| self.policy.preview(p))
            .collect()
    }

    /// Missing features of a profile, or `None` if it is fully eligible.
    pub fn required_features(&self, id: &ProfileId) -> Option<&BTreeSet<Feature>> {
        self.required_features.get(id)
    }

    /// True if the profile is part of the latest remote snapshot.
    pub fn is_remotely_shared(&self, id: &ProfileId) -> bool {
        self.remote.contains(id)
    }

    /// True if the local profile is flagged for TV devices.
    pub fn is_available_for_tv(&self, id: &ProfileId) -> bool {
        self.profile(id)
            .and_then(|p| p.attributes.is_available_for_tv)
            .unwrap_or(false)
    }

    /// Returns `name`, or `name.1`, `name.2`, ... whichever is the first not
    /// already used by a local profile. Comparison is exact.
    pub fn first_unique_name(&self, name: &str) -> String {
        let taken: HashSet<&str> = self.all_profiles.profiles().map(|p| p.name.as_str()).collect();
        if !taken.contains(name) {
            return name.to_string();
        }
        (1u64..)
            .map(|index| format!("{name}.{index}"))
            .find(|candidate| !taken.contains(candidate.as_str()))
            .unwrap_or_else(|| name.to_string())
    }
}

impl fmt::Debug for ProfileSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProfileSet")
            .field("profiles", &self.all_profiles.len())
            .field("remote", &self.remote.len())
            .field("query", &self.view.query)
            .field("visible", &self.view.profiles.len())
            .field("ready", &self.is_ready())
            .finish()
    }
}
