//! Set-level change notifications.

use profilesync_types::{Profile, ProfileId};
use tokio::sync::broadcast;
use tracing::debug;

/// A discrete change to the managed profile set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileEvent {
    /// A profile was written to the local store.
    Saved(Profile),
    /// Profiles were removed from the local store.
    Removed(Vec<ProfileId>),
    /// A reconciliation pass against a remote snapshot started.
    ///
    /// Always followed by its `RemoteImportStopped` before the next pass
    /// starts.
    RemoteImportStarted,
    /// A reconciliation pass finished or was cancelled.
    RemoteImportStopped,
}

/// Broadcasts [`ProfileEvent`]s to any number of subscribers.
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    tx: broadcast::Sender<ProfileEvent>,
}

impl ChangeNotifier {
    /// Creates a notifier buffering `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribes to events emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ProfileEvent> {
        self.tx.subscribe()
    }

    /// Emits an event. Having no subscribers is not an error.
    pub fn emit(&self, event: ProfileEvent) {
        debug!("Emit {:?}", EventKind(&event));
        let _ = self.tx.send(event);
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new(64)
    }
}

/// Logs events without dumping whole profiles.
struct EventKind<'a>(&'a ProfileEvent);

impl std::fmt::Debug for EventKind<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            ProfileEvent::Saved(p) => write!(f, "Saved({})", p.id),
            ProfileEvent::Removed(ids) => write!(f, "Removed({ids:?})"),
            ProfileEvent::RemoteImportStarted => f.write_str("RemoteImportStarted"),
            ProfileEvent::RemoteImportStopped => f.write_str("RemoteImportStopped"),
        }
    }
}
