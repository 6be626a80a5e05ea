//! App features a profile may depend on, and the list-row preview.

use crate::{Profile, ProfileId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A gated app capability that a profile might require to be usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    AppleTv,
    Dns,
    HttpProxy,
    InteractiveLogin,
    OnDemand,
    Providers,
    Routing,
    Sharing,
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AppleTv => "apple_tv",
            Self::Dns => "dns",
            Self::HttpProxy => "http_proxy",
            Self::InteractiveLogin => "interactive_login",
            Self::OnDemand => "on_demand",
            Self::Providers => "providers",
            Self::Routing => "routing",
            Self::Sharing => "sharing",
        };
        f.write_str(name)
    }
}

/// Lightweight projection of a profile for list rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilePreview {
    pub id: ProfileId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
}

impl ProfilePreview {
    /// Creates a preview with an explicit subtitle.
    pub fn new(profile: &Profile, subtitle: Option<String>) -> Self {
        Self {
            id: profile.id,
            name: profile.name.clone(),
            subtitle,
        }
    }
}

impl From<&Profile> for ProfilePreview {
    fn from(profile: &Profile) -> Self {
        Self::new(profile, None)
    }
}
