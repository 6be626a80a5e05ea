//! Broadcast helper shared by store implementations.

use crate::SnapshotStream;
use futures::StreamExt;
use futures::stream;
use profilesync_types::Snapshot;
use std::sync::{PoisonError, RwLock};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

/// Default number of snapshots buffered per subscriber.
pub const DEFAULT_CAPACITY: usize = 32;

/// Holds a store's current snapshot and fans out every replacement.
pub struct SnapshotPublisher {
    current: RwLock<Snapshot>,
    tx: broadcast::Sender<Snapshot>,
}

impl SnapshotPublisher {
    /// Creates a publisher seeded with `initial`.
    pub fn new(initial: Snapshot) -> Self {
        Self::with_capacity(initial, DEFAULT_CAPACITY)
    }

    /// Creates a publisher with a custom per-subscriber buffer.
    pub fn with_capacity(initial: Snapshot, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            current: RwLock::new(initial),
            tx,
        }
    }

    /// Returns the latest published snapshot.
    pub fn current(&self) -> Snapshot {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replaces the current snapshot and notifies subscribers.
    pub fn publish(&self, snapshot: Snapshot) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = snapshot.clone();
        // No subscribers is fine.
        let _ = self.tx.send(snapshot);
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Subscribes to snapshots, starting with the current one.
    pub fn subscribe(&self) -> SnapshotStream {
        // Subscribe before reading so no publish is missed in between.
        let rx = self.tx.subscribe();
        let initial = self.current();

        let updates = stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(snapshot) => return Some((snapshot, rx)),
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("Snapshot subscriber lagged, skipped {} snapshots", skipped);
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        });

        stream::once(async move { initial }).chain(updates).boxed()
    }
}

impl Default for SnapshotPublisher {
    fn default() -> Self {
        Self::new(Snapshot::empty())
    }
}
