//! Record store contract for geofeed.
//!
//! The store owns durability, identifier assignment and ordering. The rest of
//! the crate only talks to it through [`RecordStore`]: append an observation,
//! subscribe to whole-collection snapshots, remove by id. There is no query
//! API; the subscription is the only read path.

pub mod migrations;
pub mod schema;
pub mod sqlite;
pub mod subscription;
pub mod watcher;

use serde::Serialize;

use crate::error::Result;
use crate::record::{Observation, Record, RecordId};

pub use sqlite::SqliteStore;
pub use subscription::{SnapshotCallback, SnapshotHub, SubscriptionHandle, SubscriptionId};
pub use watcher::ExternalChangeWatcher;

/// Default logical namespace for records.
pub const DEFAULT_COLLECTION: &str = "tracked_users";

/// The full contents of a collection at one point in time.
///
/// Entries are kept in the store's iteration order, which for the bundled
/// backend is append order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    entries: Vec<(RecordId, Observation)>,
}

impl Snapshot {
    /// Create a snapshot from entries in store iteration order.
    #[must_use]
    pub fn new(entries: Vec<(RecordId, Observation)>) -> Self {
        Self { entries }
    }

    /// Number of records in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the snapshot is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in store iteration order.
    #[must_use]
    pub fn entries(&self) -> &[(RecordId, Observation)] {
        &self.entries
    }

    /// Identifiers in store iteration order.
    pub fn ids(&self) -> impl Iterator<Item = &RecordId> {
        self.entries.iter().map(|(id, _)| id)
    }

    /// Check whether a record with the given id is present.
    #[must_use]
    pub fn contains(&self, id: &RecordId) -> bool {
        self.ids().any(|candidate| candidate == id)
    }

    /// Tag every entry with its identifier, keeping store order.
    #[must_use]
    pub fn into_records(self) -> Vec<Record> {
        self.entries
            .into_iter()
            .map(|(id, observation)| observation.into_record(id))
            .collect()
    }

    /// BLAKE3 fingerprint of the snapshot contents, order included.
    #[must_use]
    pub fn digest(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for (id, observation) in &self.entries {
            hasher.update(id.as_str().as_bytes());
            hasher.update(&[0]);
            hasher.update(&observation.lat.to_le_bytes());
            hasher.update(&observation.lng.to_le_bytes());
            hasher.update(observation.time.to_rfc3339().as_bytes());
            hasher.update(&[0]);
            hasher.update(observation.device_info.as_bytes());
            hasher.update(&[0xff]);
        }
        hasher.finalize().to_hex().to_string()
    }
}

/// The minimal contract geofeed needs from a record store backend.
///
/// Implementations are expected to be constructed once per process and shared
/// (typically as `Arc<dyn RecordStore>`) between producers and live views.
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    /// The logical namespace all operations are scoped to.
    fn collection(&self) -> &str;

    /// Append an observation and return its newly assigned identifier.
    ///
    /// The append is atomic: subscribers never see a partial record.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::StoreWrite`] if the record could not be persisted.
    async fn append(&self, observation: Observation) -> Result<RecordId>;

    /// Register a callback that receives the full snapshot now and after
    /// every change to the collection.
    ///
    /// Invocations for one subscription never overlap.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscription could not be registered.
    async fn subscribe(&self, on_change: SnapshotCallback) -> Result<SubscriptionHandle>;

    /// Remove a record by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::StoreRemove`] if the record does not exist or the
    /// deletion was rejected.
    async fn remove(&self, id: &RecordId) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Position;
    use chrono::{TimeZone, Utc};

    fn entry(id: &str, lat: f64) -> (RecordId, Observation) {
        let time = Utc.with_ymd_and_hms(2026, 1, 25, 9, 0, 0).unwrap();
        (
            RecordId::new(id),
            Observation::at(Position::new(lat, 74.0), time, "iPhone"),
        )
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = Snapshot::default();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.len(), 0);
        assert!(snapshot.into_records().is_empty());
    }

    #[test]
    fn test_into_records_keeps_store_order() {
        let snapshot = Snapshot::new(vec![entry("r1", 1.0), entry("r2", 2.0), entry("r3", 3.0)]);
        let ids: Vec<String> = snapshot
            .into_records()
            .into_iter()
            .map(|r| r.id.to_string())
            .collect();
        assert_eq!(ids, vec!["r1", "r2", "r3"]);
    }

    #[test]
    fn test_contains() {
        let snapshot = Snapshot::new(vec![entry("r1", 1.0)]);
        assert!(snapshot.contains(&RecordId::new("r1")));
        assert!(!snapshot.contains(&RecordId::new("r2")));
    }

    #[test]
    fn test_digest_is_stable() {
        let a = Snapshot::new(vec![entry("r1", 1.0), entry("r2", 2.0)]);
        let b = Snapshot::new(vec![entry("r1", 1.0), entry("r2", 2.0)]);
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn test_digest_tracks_content_and_order() {
        let base = Snapshot::new(vec![entry("r1", 1.0), entry("r2", 2.0)]);
        let moved = Snapshot::new(vec![entry("r1", 1.5), entry("r2", 2.0)]);
        let swapped = Snapshot::new(vec![entry("r2", 2.0), entry("r1", 1.0)]);

        assert_ne!(base.digest(), moved.digest());
        assert_ne!(base.digest(), swapped.digest());
        assert_ne!(base.digest(), Snapshot::default().digest());
    }
}
