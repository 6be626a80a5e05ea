//! Profile sync engine.
//!
//! Keeps a device's local set of VPN profiles in step with an optional remote
//! (shared) store and an optional write-only backup store:
//!
//! - [`ProfileManager`]: owns the in-memory [`ProfileSet`], applies store
//!   snapshots, debounces search, and exposes save/remove/duplicate.
//! - [`ReconciliationEngine`]: imports remote snapshots into the local store,
//!   one pass at a time, the latest snapshot winning.
//! - [`InclusionPolicy`]: decides which profiles a device manages.
//! - [`ProfileEvent`]: set-level change notifications.

mod config;
mod error;
mod events;
mod manager;
mod policy;
mod profile_set;
mod reconcile;
mod writer;

pub use config::ManagerConfig;
pub use error::{SyncError, SyncResult};
pub use events::{ChangeNotifier, ProfileEvent};
pub use manager::{ProfileManager, ProfileManagerBuilder};
pub use policy::{AllowAllPolicy, InclusionPolicy, TvOnlyPolicy};
pub use profile_set::{ProfileSet, ProfileView};
pub use reconcile::{
    EngineConfig, PassReport, PassStatus, ProfileSetWatch, ReconcileHandle, ReconciliationEngine,
};
pub use writer::ProfileWriter;
