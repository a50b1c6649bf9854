//! Snapshot subscriptions.
//!
//! [`SnapshotHub`] is the subscriber registry a store backend publishes into.
//! Every subscription gets its own unbounded channel and delivery task, so a
//! callback is never invoked concurrently with itself and a slow subscriber
//! does not hold up the others.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::Snapshot;
use crate::error::{Error, Result};

/// Callback invoked with each full snapshot.
pub type SnapshotCallback = Box<dyn FnMut(Snapshot) + Send + 'static>;

type Detach = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// Identifier of one registered subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Handle returned by a subscription; tears it down on demand or on drop.
///
/// The underlying detach runs at most once. Further calls to
/// [`unsubscribe`](Self::unsubscribe) succeed without touching the store.
pub struct SubscriptionHandle {
    id: SubscriptionId,
    detach: Mutex<Option<Detach>>,
}

impl SubscriptionHandle {
    /// Create a handle that runs `detach` the first time it is released.
    #[must_use]
    pub fn new(id: SubscriptionId, detach: impl FnOnce() -> Result<()> + Send + 'static) -> Self {
        Self {
            id,
            detach: Mutex::new(Some(Box::new(detach))),
        }
    }

    /// The subscription identifier.
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Whether the subscription is still attached.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.detach
            .lock()
            .map(|detach| detach.is_some())
            .unwrap_or(false)
    }

    /// Detach the subscription from the store.
    ///
    /// # Errors
    ///
    /// Returns an error only if the first, real detach fails.
    pub fn unsubscribe(&self) -> Result<()> {
        let detach = self
            .detach
            .lock()
            .map_err(|_| Error::internal("subscription handle lock poisoned"))?
            .take();

        match detach {
            Some(detach) => {
                debug!(subscription = %self.id, "Unsubscribing");
                detach()
            }
            None => {
                trace!(subscription = %self.id, "Already unsubscribed");
                Ok(())
            }
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        let detach = match self.detach.get_mut() {
            Ok(detach) => detach.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(detach) = detach {
            if let Err(e) = detach() {
                warn!(subscription = %self.id, error = %e, "Failed to detach subscription on drop");
            }
        }
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

#[derive(Debug, Default)]
struct HubState {
    next_id: u64,
    subscribers: BTreeMap<SubscriptionId, mpsc::UnboundedSender<Snapshot>>,
    last_digest: Option<String>,
}

/// Registry of live snapshot subscribers.
///
/// Cloning the hub yields another handle to the same registry.
#[derive(Debug, Clone, Default)]
pub struct SnapshotHub {
    state: Arc<Mutex<HubState>>,
}

impl SnapshotHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HubState>> {
        self.state
            .lock()
            .map_err(|_| Error::internal("snapshot hub lock poisoned"))
    }

    /// Register a callback and deliver `initial` to it first.
    ///
    /// Must be called from within a tokio runtime; the delivery task is
    /// spawned onto it.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry lock is poisoned.
    pub fn attach(
        &self,
        initial: Snapshot,
        mut on_change: SnapshotCallback,
    ) -> Result<SubscriptionHandle> {
        let (tx, mut rx) = mpsc::unbounded_channel();

        let id = {
            let mut state = self.lock()?;
            let id = SubscriptionId(state.next_id);
            state.next_id += 1;
            // `initial` is the freshest read of the collection. Anyone attached
            // earlier who has not seen it yet gets it too, and change
            // detection restarts from it.
            let digest = initial.digest();
            if state.last_digest.as_deref() != Some(digest.as_str()) {
                for behind in state.subscribers.values() {
                    let _ = behind.send(initial.clone());
                }
                state.last_digest = Some(digest);
            }
            // The receiver is still in scope, so this cannot fail.
            let _ = tx.send(initial);
            state.subscribers.insert(id, tx);
            id
        };

        tokio::spawn(async move {
            while let Some(snapshot) = rx.recv().await {
                on_change(snapshot);
            }
            trace!(subscription = %id, "Delivery task finished");
        });

        debug!(subscription = %id, "Subscriber attached");
        let registry = Arc::downgrade(&self.state);
        Ok(SubscriptionHandle::new(id, move || detach(&registry, id)))
    }

    /// Push a snapshot to every subscriber.
    ///
    /// Returns the number of subscribers that received it.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry lock is poisoned.
    pub fn publish(&self, snapshot: &Snapshot) -> Result<usize> {
        let mut state = self.lock()?;
        state.last_digest = Some(snapshot.digest());
        state
            .subscribers
            .retain(|id, tx| match tx.send(snapshot.clone()) {
                Ok(()) => true,
                Err(_) => {
                    warn!(subscription = %id, "Dropping subscriber with closed channel");
                    false
                }
            });
        trace!(
            subscribers = state.subscribers.len(),
            records = snapshot.len(),
            "Published snapshot"
        );
        Ok(state.subscribers.len())
    }

    /// Publish only if the snapshot differs from the last one published.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry lock is poisoned.
    pub fn publish_if_changed(&self, snapshot: &Snapshot) -> Result<bool> {
        let digest = snapshot.digest();
        if self.lock()?.last_digest.as_deref() == Some(digest.as_str()) {
            return Ok(false);
        }
        self.publish(snapshot)?;
        Ok(true)
    }

    /// Number of attached subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.lock().map(|state| state.subscribers.len()).unwrap_or(0)
    }
}

fn detach(registry: &Weak<Mutex<HubState>>, id: SubscriptionId) -> Result<()> {
    // The store is already gone; there is nothing left to detach from.
    let Some(state) = registry.upgrade() else {
        return Ok(());
    };
    let mut state = state
        .lock()
        .map_err(|_| Error::internal("snapshot hub lock poisoned"))?;
    if state.subscribers.remove(&id).is_some() {
        debug!(subscription = %id, "Subscriber detached");
        Ok(())
    } else {
        Err(Error::internal(format!("subscription {id} is not attached")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use chrono::{TimeZone, Utc};

    use crate::record::{Observation, Position, RecordId};

    fn snapshot_of(ids: &[&str]) -> Snapshot {
        let time = Utc.with_ymd_and_hms(2026, 1, 25, 9, 0, 0).unwrap();
        Snapshot::new(
            ids.iter()
                .map(|id| {
                    (
                        RecordId::new(*id),
                        Observation::at(Position::new(1.0, 2.0), time, "test"),
                    )
                })
                .collect(),
        )
    }

    fn channel_callback() -> (SnapshotCallback, mpsc::UnboundedReceiver<Snapshot>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let callback: SnapshotCallback = Box::new(move |snapshot| {
            let _ = tx.send(snapshot);
        });
        (callback, rx)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<Snapshot>) -> Snapshot {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for snapshot")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_attach_delivers_initial_snapshot() {
        let hub = SnapshotHub::new();
        let (callback, mut rx) = channel_callback();

        let _handle = hub.attach(snapshot_of(&["r1"]), callback).unwrap();

        let first = next(&mut rx).await;
        assert!(first.contains(&RecordId::new("r1")));
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let hub = SnapshotHub::new();
        let (cb1, mut rx1) = channel_callback();
        let (cb2, mut rx2) = channel_callback();
        let _h1 = hub.attach(Snapshot::default(), cb1).unwrap();
        let _h2 = hub.attach(Snapshot::default(), cb2).unwrap();
        next(&mut rx1).await;
        next(&mut rx2).await;

        let delivered = hub.publish(&snapshot_of(&["r1", "r2"])).unwrap();
        assert_eq!(delivered, 2);
        assert_eq!(next(&mut rx1).await.len(), 2);
        assert_eq!(next(&mut rx2).await.len(), 2);
    }

    #[tokio::test]
    async fn test_delivery_order_is_preserved() {
        let hub = SnapshotHub::new();
        let (callback, mut rx) = channel_callback();
        let _handle = hub.attach(Snapshot::default(), callback).unwrap();

        hub.publish(&snapshot_of(&["r1"])).unwrap();
        hub.publish(&snapshot_of(&["r1", "r2"])).unwrap();
        hub.publish(&snapshot_of(&["r2"])).unwrap();

        assert_eq!(next(&mut rx).await.len(), 0);
        assert_eq!(next(&mut rx).await.len(), 1);
        assert_eq!(next(&mut rx).await.len(), 2);
        let last = next(&mut rx).await;
        assert!(last.contains(&RecordId::new("r2")));
        assert!(!last.contains(&RecordId::new("r1")));
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let hub = SnapshotHub::new();
        let (callback, _rx) = channel_callback();
        let handle = hub.attach(Snapshot::default(), callback).unwrap();

        assert!(handle.is_active());
        assert!(handle.unsubscribe().is_ok());
        assert!(!handle.is_active());
        assert!(handle.unsubscribe().is_ok());
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribed_callback_receives_nothing_more() {
        let hub = SnapshotHub::new();
        let (callback, mut rx) = channel_callback();
        let handle = hub.attach(Snapshot::default(), callback).unwrap();
        next(&mut rx).await;

        handle.unsubscribe().unwrap();
        assert_eq!(hub.publish(&snapshot_of(&["r1"])).unwrap(), 0);

        // The sender side was dropped with the registry entry.
        let closed = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        assert!(closed.is_none());
    }

    #[tokio::test]
    async fn test_drop_detaches() {
        let hub = SnapshotHub::new();
        let (callback, _rx) = channel_callback();
        let handle = hub.attach(Snapshot::default(), callback).unwrap();
        assert_eq!(hub.subscriber_count(), 1);

        drop(handle);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_after_hub_dropped() {
        let hub = SnapshotHub::new();
        let (callback, _rx) = channel_callback();
        let handle = hub.attach(Snapshot::default(), callback).unwrap();

        drop(hub);
        assert!(handle.unsubscribe().is_ok());
    }

    #[test]
    fn test_detach_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handle = SubscriptionHandle::new(SubscriptionId(7), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        handle.unsubscribe().unwrap();
        handle.unsubscribe().unwrap();
        drop(handle);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_publish_if_changed_skips_identical() {
        let hub = SnapshotHub::new();
        let (callback, mut rx) = channel_callback();
        let _handle = hub.attach(snapshot_of(&["r1"]), callback).unwrap();
        next(&mut rx).await;

        assert!(!hub.publish_if_changed(&snapshot_of(&["r1"])).unwrap());
        assert!(hub.publish_if_changed(&snapshot_of(&["r1", "r2"])).unwrap());
        assert_eq!(next(&mut rx).await.len(), 2);
    }

    #[tokio::test]
    async fn test_attach_resets_change_detection() {
        let hub = SnapshotHub::new();
        let (first, mut rx1) = channel_callback();
        let handle = hub.attach(snapshot_of(&["r1"]), first).unwrap();
        next(&mut rx1).await;
        handle.unsubscribe().unwrap();

        // The collection was emptied while nobody was listening.
        let (second, mut rx2) = channel_callback();
        let _handle = hub.attach(Snapshot::default(), second).unwrap();
        assert!(next(&mut rx2).await.is_empty());

        // Going back to the earlier contents is a change for this subscriber.
        assert!(hub.publish_if_changed(&snapshot_of(&["r1"])).unwrap());
        assert_eq!(next(&mut rx2).await.len(), 1);
    }

    #[tokio::test]
    async fn test_attach_catches_up_existing_subscribers() {
        let hub = SnapshotHub::new();
        let (early, mut rx_early) = channel_callback();
        let _early = hub.attach(Snapshot::default(), early).unwrap();
        assert!(next(&mut rx_early).await.is_empty());

        // A later subscriber reads newer contents than the early one has seen.
        let (late, mut rx_late) = channel_callback();
        let _late = hub.attach(snapshot_of(&["r1"]), late).unwrap();
        assert_eq!(next(&mut rx_late).await.len(), 1);
        assert_eq!(next(&mut rx_early).await.len(), 1);

        assert!(!hub.publish_if_changed(&snapshot_of(&["r1"])).unwrap());
    }

    #[tokio::test]
    async fn test_attach_with_same_contents_sends_nothing_extra() {
        let hub = SnapshotHub::new();
        let (early, mut rx_early) = channel_callback();
        let _early = hub.attach(snapshot_of(&["r1"]), early).unwrap();
        next(&mut rx_early).await;

        let (late, _rx_late) = channel_callback();
        let _late = hub.attach(snapshot_of(&["r1"]), late).unwrap();

        hub.publish(&snapshot_of(&["r1", "r2"])).unwrap();
        assert_eq!(next(&mut rx_early).await.len(), 2);
    }

    #[test]
    fn test_subscription_id_display() {
        assert_eq!(SubscriptionId(3).to_string(), "sub-3");
    }
}
