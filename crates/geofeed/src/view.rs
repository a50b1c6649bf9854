//! Live view of a record collection.
//!
//! A [`LiveView`] subscribes to a [`RecordStore`] and rebuilds its
//! materialized list from every snapshot it receives. There is no
//! incremental patching: each snapshot fully replaces the previous view.
//! Removal goes through a confirmation gate and the view only changes once
//! the store pushes the resulting snapshot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::gate::{Confirm, Decision};
use crate::record::{Record, RecordId};
use crate::store::{RecordStore, Snapshot, SnapshotCallback, SubscriptionHandle};

/// Prompt shown before a record is deleted.
pub const REMOVAL_PROMPT: &str = "Permanently delete this record?";

/// Display order of the materialized view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewOrdering {
    /// Store iteration order, reversed. Usually newest first, but only as
    /// far as the store's key order follows append time.
    #[default]
    StoreReversed,
    /// Sorted by capture time, newest first.
    TimeDescending,
}

/// What the view currently shows.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(tag = "state", content = "records", rename_all = "snake_case")]
pub enum ViewState {
    /// Subscribed, first snapshot not yet received.
    #[default]
    Connecting,
    /// At least one record is present.
    Synced(Vec<Record>),
    /// The collection is empty or does not exist.
    Empty,
}

impl ViewState {
    /// Build the view state for a snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: Snapshot, ordering: ViewOrdering) -> Self {
        if snapshot.is_empty() {
            return Self::Empty;
        }
        Self::Synced(materialize(snapshot, ordering))
    }

    /// Records currently shown, empty unless synced.
    #[must_use]
    pub fn records(&self) -> &[Record] {
        match self {
            Self::Synced(records) => records,
            Self::Connecting | Self::Empty => &[],
        }
    }

    /// Whether the first snapshot is still outstanding.
    #[must_use]
    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting)
    }

    /// Whether the view holds no records after syncing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

/// Turn a snapshot into display-ordered records.
#[must_use]
pub fn materialize(snapshot: Snapshot, ordering: ViewOrdering) -> Vec<Record> {
    let mut records = snapshot.into_records();
    match ordering {
        ViewOrdering::StoreReversed => records.reverse(),
        ViewOrdering::TimeDescending => records.sort_by(|a, b| b.time.cmp(&a.time)),
    }
    records
}

/// A confirmed-or-not request to delete one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovalRequest {
    id: RecordId,
}

impl RemovalRequest {
    /// Create a request for `id`.
    #[must_use]
    pub fn new(id: RecordId) -> Self {
        Self { id }
    }

    /// The record to delete.
    #[must_use]
    pub fn id(&self) -> &RecordId {
        &self.id
    }

    /// Ask the gate whether to go ahead.
    #[must_use]
    pub fn confirm(&self, gate: &dyn Confirm) -> Decision {
        let decision = gate.confirm(REMOVAL_PROMPT);
        debug!(id = %self.id, ?decision, "Removal confirmation answered");
        decision
    }

    /// Delete the record.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::StoreRemove`] if the store refused, including
    /// when the record no longer exists.
    pub async fn execute(&self, store: &dyn RecordStore) -> Result<()> {
        store
            .remove(&self.id)
            .await
            .map_err(|e| e.into_store_remove(self.id.as_str()))
    }
}

/// Subscribes to a store and keeps a materialized, ordered view.
#[derive(Debug)]
pub struct LiveView {
    ordering: ViewOrdering,
    state: Arc<watch::Sender<ViewState>>,
    generation: Arc<AtomicU64>,
    subscription: Option<SubscriptionHandle>,
}

impl LiveView {
    /// Create an inactive view in the `Connecting` state.
    #[must_use]
    pub fn new(ordering: ViewOrdering) -> Self {
        let (state, _) = watch::channel(ViewState::Connecting);
        Self {
            ordering,
            state: Arc::new(state),
            generation: Arc::new(AtomicU64::new(0)),
            subscription: None,
        }
    }

    /// The ordering applied to every snapshot.
    #[must_use]
    pub fn ordering(&self) -> ViewOrdering {
        self.ordering
    }

    /// Subscribe to `store`. Any previous subscription is released first and
    /// the view goes back to `Connecting` until the first snapshot arrives.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the subscription; the view is
    /// then left inactive.
    pub async fn activate(&mut self, store: &dyn RecordStore) -> Result<()> {
        self.deactivate();
        self.state.send_replace(ViewState::Connecting);

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let current = Arc::clone(&self.generation);
        let state = Arc::clone(&self.state);
        let ordering = self.ordering;

        let on_change: SnapshotCallback = Box::new(move |snapshot| {
            // Snapshots still queued for an older subscription are stale.
            if current.load(Ordering::SeqCst) != generation {
                return;
            }
            state.send_replace(ViewState::from_snapshot(snapshot, ordering));
        });

        let handle = store.subscribe(on_change).await?;
        info!(
            subscription = %handle.id(),
            collection = store.collection(),
            "Live view activated"
        );
        self.subscription = Some(handle);
        Ok(())
    }

    /// Release the subscription. Calling it on an inactive view does nothing.
    pub fn deactivate(&mut self) {
        let Some(handle) = self.subscription.take() else {
            return;
        };
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = handle.unsubscribe() {
            warn!(subscription = %handle.id(), error = %e, "Failed to unsubscribe live view");
        } else {
            debug!(subscription = %handle.id(), "Live view deactivated");
        }
    }

    /// Whether the view currently holds a subscription.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.subscription.is_some()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ViewState {
        self.state.borrow().clone()
    }

    /// Records currently shown.
    #[must_use]
    pub fn records(&self) -> Vec<Record> {
        self.state.borrow().records().to_vec()
    }

    /// Observe state changes.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<ViewState> {
        self.state.subscribe()
    }

    /// Ask `gate` for confirmation, then delete `id` from `store`.
    ///
    /// The view is not touched here; it changes when the store pushes the
    /// snapshot without the record.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::StoreRemove`] if the confirmed removal failed.
    pub async fn request_removal(
        &self,
        store: &dyn RecordStore,
        id: &RecordId,
        gate: &dyn Confirm,
    ) -> Result<Decision> {
        let request = RemovalRequest::new(id.clone());
        let decision = request.confirm(gate);
        if !decision.is_proceed() {
            debug!(id = %id, "Removal aborted");
            return Ok(decision);
        }

        if let Err(e) = request.execute(store).await {
            warn!(id = %id, error = %e, "Removal failed");
            return Err(e);
        }
        Ok(decision)
    }
}

impl Default for LiveView {
    fn default() -> Self {
        Self::new(ViewOrdering::default())
    }
}

impl Drop for LiveView {
    fn drop(&mut self) {
        self.deactivate();
    }
}
