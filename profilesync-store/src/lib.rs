//! Profile store layer for profilesync.
//!
//! A store is one replica of the profile set: the local authoritative copy, a
//! remote shared copy, or a write-only backup mirror. Every store can be
//! queried for its full contents and observed as a stream of full snapshots.
//!
//! # Implementations
//!
//! - [`MemoryProfileStore`]: process-local store with fault injection hooks,
//!   used for previews, tests and as a default local store
//! - [`FileProfileStore`]: one JSON file per profile inside a directory, which
//!   may live on a synced drive

mod error;
mod file;
mod memory;
mod publisher;

pub use error::{StoreError, StoreResult};
pub use file::FileProfileStore;
pub use memory::MemoryProfileStore;
pub use publisher::SnapshotPublisher;

use async_trait::async_trait;
use futures::stream::BoxStream;
use profilesync_types::{Profile, ProfileId, Snapshot};

/// Stream of full snapshots. The first item is the store's current contents.
pub type SnapshotStream = BoxStream<'static, Snapshot>;

/// Abstract profile store interface.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &str;

    /// Reads the full current contents.
    async fn fetch_all(&self) -> StoreResult<Snapshot>;

    /// Observes the store. Yields the current contents first, then a full
    /// snapshot after every change.
    fn snapshots(&self) -> SnapshotStream;

    /// Inserts or replaces a profile.
    async fn save(&self, profile: &Profile) -> StoreResult<()>;

    /// Removes the given profiles. Unknown ids are ignored.
    async fn remove(&self, ids: &[ProfileId]) -> StoreResult<()>;

    /// Removes every profile.
    async fn remove_all(&self) -> StoreResult<()>;
}
