//! Inclusion policies.
//!
//! A policy decides which profiles this device manages at all, which app
//! features each profile still needs, and how a profile is previewed.
//! Policies are total: they never fail.

use profilesync_types::{Feature, Profile, ProfilePreview};
use std::collections::BTreeSet;

/// Filters and annotates the profiles the engine manages.
pub trait InclusionPolicy: Send + Sync {
    /// Whether this device should hold the profile at all.
    fn is_included(&self, _profile: &Profile) -> bool {
        true
    }

    /// Features the profile needs that are currently not available.
    ///
    /// An empty set means the profile is fully eligible.
    fn required_features(&self, _profile: &Profile) -> BTreeSet<Feature> {
        BTreeSet::new()
    }

    /// List-row preview of the profile.
    fn preview(&self, profile: &Profile) -> ProfilePreview {
        ProfilePreview::from(profile)
    }
}

/// Includes every profile and requires nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllPolicy;

impl InclusionPolicy for AllowAllPolicy {}

/// Only manages profiles flagged as available on TV devices.
#[derive(Debug, Clone, Copy, Default)]
pub struct TvOnlyPolicy;

impl InclusionPolicy for TvOnlyPolicy {
    fn is_included(&self, profile: &Profile) -> bool {
        profile.attributes.is_available_for_tv == Some(true)
    }
}
