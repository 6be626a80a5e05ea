//! The profile record shared between replicas.
//!
//! A profile is an immutable value: every edit produces a new `Profile`.
//! Only [`Profile::restamped`] mints a new fingerprint, which is what marks
//! the result as a local edit. Re-imports carry the source's attributes
//! forward untouched.

use crate::{Fingerprint, ProfileId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sync-relevant attributes stamped onto a profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileAttributes {
    /// When the profile was last edited locally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<DateTime<Utc>>,
    /// Content fingerprint of the last local edit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<Fingerprint>,
    /// Whether the profile is offered on TV devices.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_available_for_tv: Option<bool>,
}

/// Opaque tunnel configuration payload.
///
/// The engine never looks inside; it only compares and copies it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileContent(serde_json::Value);

impl ProfileContent {
    /// Wraps an already-encoded payload.
    #[must_use]
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// Returns the encoded payload.
    #[must_use]
    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    /// Returns true if there is no payload at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_null()
    }
}

impl From<serde_json::Value> for ProfileContent {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

/// A VPN connection profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Stable identifier across replicas.
    pub id: ProfileId,
    /// User-visible name. Not required to be unique.
    pub name: String,
    /// Sync attributes.
    #[serde(default)]
    pub attributes: ProfileAttributes,
    /// Opaque tunnel configuration.
    #[serde(default)]
    pub content: ProfileContent,
}

impl Profile {
    /// Creates an empty profile with a random id and no attributes.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(ProfileId::new(), name)
    }

    /// Creates an empty profile with the given id.
    pub fn with_id(id: ProfileId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            attributes: ProfileAttributes::default(),
            content: ProfileContent::default(),
        }
    }

    /// Replaces the content payload.
    #[must_use]
    pub fn with_content(mut self, content: impl Into<ProfileContent>) -> Self {
        self.content = content.into();
        self
    }

    /// Sets the fingerprint without touching `last_update`.
    #[must_use]
    pub fn with_fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.attributes.fingerprint = Some(fingerprint);
        self
    }

    /// Marks this profile as a fresh local edit: new fingerprint, `last_update = now`.
    #[must_use]
    pub fn restamped(mut self) -> Self {
        self.attributes.fingerprint = Some(Fingerprint::new());
        self.attributes.last_update = Some(Utc::now());
        self
    }

    /// Copies this profile under a new id and name. Attributes and content are kept.
    #[must_use]
    pub fn duplicated(&self, name: impl Into<String>) -> Self {
        Self {
            id: ProfileId::new(),
            name: name.into(),
            attributes: self.attributes.clone(),
            content: self.content.clone(),
        }
    }

    /// Returns the fingerprint, if one was ever minted.
    #[must_use]
    pub fn fingerprint(&self) -> Option<Fingerprint> {
        self.attributes.fingerprint
    }

    /// Returns true if both profiles share an id and a known, equal fingerprint.
    #[must_use]
    pub fn is_equivalent(&self, other: &Self) -> bool {
        self.id == other.id
            && matches!(
                (self.fingerprint(), other.fingerprint()),
                (Some(a), Some(b)) if a == b
            )
    }

    /// Serializes the profile to JSON bytes.
    pub fn to_json(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Parses a profile from JSON bytes.
    pub fn from_json(bytes: &[u8]) -> crate::Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
