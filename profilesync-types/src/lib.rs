//! Core type definitions for profilesync.
//!
//! This crate defines the value types shared by every replica of a user's
//! VPN profile collection:
//! - Profile and fingerprint identifiers (UUID v4)
//! - The `Profile` record with its sync attributes and opaque content
//! - Immutable `Snapshot`s of a whole profile set
//! - Feature flags and list previews consumed by inclusion policies
//!
//! Protocol-specific content (OpenVPN, WireGuard) is never inspected here.

mod feature;
mod ids;
mod profile;
mod snapshot;

pub use feature::{Feature, ProfilePreview};
pub use ids::{Fingerprint, ProfileId};
pub use profile::{Profile, ProfileAttributes, ProfileContent};
pub use snapshot::Snapshot;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),
}
