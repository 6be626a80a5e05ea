//! Immutable, atomically delivered view of a whole profile set.

use crate::{Profile, ProfileId};
use std::collections::HashMap;
use std::collections::hash_map;
use std::sync::Arc;

/// An immutable `{id → profile}` map produced by a store.
///
/// Cloning is cheap; the map is shared behind an `Arc`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    profiles: Arc<HashMap<ProfileId, Profile>>,
}

impl Snapshot {
    /// Creates an empty snapshot.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a snapshot from a list of profiles. Later duplicates win.
    pub fn from_profiles(profiles: impl IntoIterator<Item = Profile>) -> Self {
        profiles.into_iter().map(|p| (p.id, p)).collect::<HashMap<_, _>>().into()
    }

    /// Returns the profile with the given id.
    #[must_use]
    pub fn get(&self, id: &ProfileId) -> Option<&Profile> {
        self.profiles.get(id)
    }

    /// Returns true if the snapshot holds a profile with this id.
    #[must_use]
    pub fn contains(&self, id: &ProfileId) -> bool {
        self.profiles.contains_key(id)
    }

    /// Number of profiles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// Returns true if the snapshot holds no profiles.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Iterates over profile ids in unspecified order.
    pub fn ids(&self) -> hash_map::Keys<'_, ProfileId, Profile> {
        self.profiles.keys()
    }

    /// Iterates over profiles in unspecified order.
    pub fn profiles(&self) -> hash_map::Values<'_, ProfileId, Profile> {
        self.profiles.values()
    }

    /// Iterates over `(id, profile)` pairs in unspecified order.
    pub fn iter(&self) -> hash_map::Iter<'_, ProfileId, Profile> {
        self.profiles.iter()
    }

    /// Returns the underlying map.
    #[must_use]
    pub fn as_map(&self) -> &HashMap<ProfileId, Profile> {
        &self.profiles
    }

    /// Returns a copy of this snapshot with `profile` inserted or replaced.
    #[must_use]
    pub fn with(&self, profile: Profile) -> Self {
        let mut map = (*self.profiles).clone();
        map.insert(profile.id, profile);
        map.into()
    }

    /// Returns a copy of this snapshot without the given ids.
    #[must_use]
    pub fn without(&self, ids: &[ProfileId]) -> Self {
        let mut map = (*self.profiles).clone();
        for id in ids {
            map.remove(id);
        }
        map.into()
    }
}

impl From<HashMap<ProfileId, Profile>> for Snapshot {
    fn from(profiles: HashMap<ProfileId, Profile>) -> Self {
        Self {
            profiles: Arc::new(profiles),
        }
    }
}

impl FromIterator<Profile> for Snapshot {
    fn from_iter<I: IntoIterator<Item = Profile>>(iter: I) -> Self {
        Self::from_profiles(iter)
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = (&'a ProfileId, &'a Profile);
    type IntoIter = hash_map::Iter<'a, ProfileId, Profile>;

    fn into_iter(self) -> Self::IntoIter {
        self.profiles.iter()
    }
}
