//! The append path.
//!
//! A [`Producer`] takes one position fix from a [`Locator`], stamps it with
//! the current instant and the host identity, and appends it to the record
//! store. Every failure is returned to the caller as its own error kind and
//! nothing is retried.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::gate::Confirm;
use crate::record::{Observation, Position, Record};
use crate::store::RecordStore;

/// Default bound on waiting for a position fix.
pub const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on waiting for the store to accept an append.
pub const DEFAULT_APPEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors reported by a host location source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocationError {
    /// The host has no location capability.
    #[error("this host does not offer a location service")]
    Unsupported,

    /// The user declined to share their location.
    #[error("location permission is required")]
    PermissionDenied,

    /// The capability exists but no fix could be obtained.
    #[error("{0}")]
    PositionUnavailable(String),
}

impl From<LocationError> for Error {
    fn from(err: LocationError) -> Self {
        match err {
            LocationError::Unsupported => Self::capability_unavailable(err.to_string()),
            LocationError::PermissionDenied => Self::permission_denied(err.to_string()),
            LocationError::PositionUnavailable(message) => Self::PositionUnavailable { message },
        }
    }
}

/// A host location source producing a single fix per call.
#[async_trait::async_trait]
pub trait Locator: Send + Sync {
    /// Whether the host offers a location capability at all.
    fn is_available(&self) -> bool {
        true
    }

    /// Obtain one position fix.
    ///
    /// # Errors
    ///
    /// Returns a [`LocationError`] describing why no fix was produced.
    async fn locate(&self) -> std::result::Result<Position, LocationError>;
}

/// Locator reporting coordinates fixed at startup.
///
/// With no coordinates configured the host is treated as having no location
/// capability.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StaticLocator {
    position: Option<Position>,
}

impl StaticLocator {
    /// Create a locator for the given position, if any.
    #[must_use]
    pub fn new(position: Option<Position>) -> Self {
        Self { position }
    }

    /// A locator for a host without any location capability.
    #[must_use]
    pub fn unavailable() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Locator for StaticLocator {
    fn is_available(&self) -> bool {
        self.position.is_some()
    }

    async fn locate(&self) -> std::result::Result<Position, LocationError> {
        self.position.ok_or(LocationError::Unsupported)
    }
}

/// How location permission is decided.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionPolicy {
    /// Always allowed.
    Granted,
    /// Always refused.
    Denied,
    /// Ask through a confirmation gate on every capture.
    #[default]
    Prompt,
}

/// Locator wrapper enforcing a permission policy before a fix is taken.
pub struct ConsentLocator<L> {
    inner: L,
    policy: PermissionPolicy,
    gate: Arc<dyn Confirm>,
}

impl<L: Locator> ConsentLocator<L> {
    /// Wrap `inner`, consulting `gate` when the policy is [`PermissionPolicy::Prompt`].
    pub fn new(inner: L, policy: PermissionPolicy, gate: Arc<dyn Confirm>) -> Self {
        Self {
            inner,
            policy,
            gate,
        }
    }
}

impl<L: std::fmt::Debug> std::fmt::Debug for ConsentLocator<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsentLocator")
            .field("inner", &self.inner)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl<L: Locator> Locator for ConsentLocator<L> {
    fn is_available(&self) -> bool {
        self.inner.is_available()
    }

    async fn locate(&self) -> std::result::Result<Position, LocationError> {
        // No point asking for permission to use something that isn't there.
        if !self.inner.is_available() {
            return Err(LocationError::Unsupported);
        }

        let allowed = match self.policy {
            PermissionPolicy::Granted => true,
            PermissionPolicy::Denied => false,
            PermissionPolicy::Prompt => self
                .gate
                .confirm("Allow geofeed to read this device's location?")
                .is_proceed(),
        };
        if !allowed {
            return Err(LocationError::PermissionDenied);
        }

        self.inner.locate().await
    }
}

/// Self-reported identity string of this host.
#[must_use]
pub fn host_identity() -> String {
    format!(
        "geofeed/{} ({}; {})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

/// Captures one observation and appends it to the store.
pub struct Producer {
    store: Arc<dyn RecordStore>,
    locator: Arc<dyn Locator>,
    device_info: String,
    capture_timeout: Duration,
    append_timeout: Duration,
}

impl Producer {
    /// Create a producer with default timeouts.
    pub fn new(
        store: Arc<dyn RecordStore>,
        locator: Arc<dyn Locator>,
        device_info: impl Into<String>,
    ) -> Self {
        Self {
            store,
            locator,
            device_info: device_info.into(),
            capture_timeout: DEFAULT_CAPTURE_TIMEOUT,
            append_timeout: DEFAULT_APPEND_TIMEOUT,
        }
    }

    /// Create a producer using the timeouts and identity from configuration.
    pub fn from_config(
        config: &Config,
        store: Arc<dyn RecordStore>,
        locator: Arc<dyn Locator>,
    ) -> Self {
        Self::new(store, locator, config.device_info())
            .with_timeouts(config.capture_timeout(), config.append_timeout())
    }

    /// Override the capture and append timeouts.
    #[must_use]
    pub fn with_timeouts(mut self, capture: Duration, append: Duration) -> Self {
        self.capture_timeout = capture;
        self.append_timeout = append;
        self
    }

    /// The identity string stamped on every observation.
    #[must_use]
    pub fn device_info(&self) -> &str {
        &self.device_info
    }

    /// Run one capture-and-append cycle.
    ///
    /// Returns the record as persisted, with its store-assigned id. Completes
    /// whether or not anything is subscribed to the collection.
    ///
    /// # Errors
    ///
    /// - [`Error::CapabilityUnavailable`] if the host has no location capability
    /// - [`Error::PermissionDenied`] if location access was refused
    /// - [`Error::PositionUnavailable`] if no fix could be obtained
    /// - [`Error::StoreWrite`] if the append failed
    /// - [`Error::Timeout`] if either step did not finish in time
    pub async fn capture(&self) -> Result<Record> {
        let result = self.try_capture().await;
        if let Err(e) = &result {
            warn!(error = %e, "Capture failed");
        }
        result
    }

    async fn try_capture(&self) -> Result<Record> {
        let position = tokio::time::timeout(self.capture_timeout, self.locator.locate())
            .await
            .map_err(|_| Error::timeout("location capture"))??;
        debug!(lat = position.lat, lng = position.lng, "Position captured");

        let observation = Observation::new(position, self.device_info.clone());
        let collection = self.store.collection();

        let id = tokio::time::timeout(self.append_timeout, self.store.append(observation.clone()))
            .await
            .map_err(|_| Error::timeout("record append"))?
            .map_err(|e| e.into_store_write(collection))?;

        info!(id = %id, collection, "Record appended");
        Ok(observation.into_record(id))
    }
}

impl std::fmt::Debug for Producer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("collection", &self.store.collection())
            .field("device_info", &self.device_info)
            .field("capture_timeout", &self.capture_timeout)
            .field("append_timeout", &self.append_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::{Decision, FixedDecision};
    use crate::record::RecordId;
    use crate::store::{SnapshotCallback, SqliteStore, SubscriptionHandle};

    /// Store whose backend is unreachable.
    struct OfflineStore;

    #[async_trait::async_trait]
    impl RecordStore for OfflineStore {
        fn collection(&self) -> &str {
            "tracked_users"
        }

        async fn append(&self, _observation: Observation) -> Result<RecordId> {
            Err(Error::internal("connection refused"))
        }

        async fn subscribe(&self, _on_change: SnapshotCallback) -> Result<SubscriptionHandle> {
            Err(Error::internal("connection refused"))
        }

        async fn remove(&self, id: &RecordId) -> Result<()> {
            Err(Error::store_remove(id.as_str(), "connection refused"))
        }
    }

    /// Store that never answers an append.
    struct StalledStore;

    #[async_trait::async_trait]
    impl RecordStore for StalledStore {
        fn collection(&self) -> &str {
            "tracked_users"
        }

        async fn append(&self, _observation: Observation) -> Result<RecordId> {
            std::future::pending().await
        }

        async fn subscribe(&self, _on_change: SnapshotCallback) -> Result<SubscriptionHandle> {
            std::future::pending().await
        }

        async fn remove(&self, _id: &RecordId) -> Result<()> {
            std::future::pending().await
        }
    }

    struct StalledLocator;

    #[async_trait::async_trait]
    impl Locator for StalledLocator {
        async fn locate(&self) -> std::result::Result<Position, LocationError> {
            std::future::pending().await
        }
    }

    struct NoFixLocator;

    #[async_trait::async_trait]
    impl Locator for NoFixLocator {
        async fn locate(&self) -> std::result::Result<Position, LocationError> {
            Err(LocationError::PositionUnavailable(
                "no satellites in view".to_string(),
            ))
        }
    }

    fn lahore() -> Position {
        Position::new(31.5204, 74.3587)
    }

    fn memory_store() -> Arc<dyn RecordStore> {
        Arc::new(SqliteStore::open_in_memory("tracked_users").unwrap())
    }

    fn consent(policy: PermissionPolicy, decision: Decision) -> Arc<dyn Locator> {
        Arc::new(ConsentLocator::new(
            StaticLocator::new(Some(lahore())),
            policy,
            Arc::new(FixedDecision(decision)),
        ))
    }

    #[tokio::test]
    async fn test_capture_appends_record() {
        let producer = Producer::new(
            memory_store(),
            Arc::new(StaticLocator::new(Some(lahore()))),
            "iPhone",
        );

        let record = producer.capture().await.unwrap();
        assert_eq!(record.id.as_str(), "r1");
        assert_eq!(record.position(), lahore());
        assert_eq!(record.device_info, "iPhone");
    }

    #[tokio::test]
    async fn test_capture_without_capability() {
        let producer = Producer::new(
            memory_store(),
            Arc::new(StaticLocator::unavailable()),
            "iPhone",
        );

        let err = producer.capture().await.unwrap_err();
        assert!(err.is_capability_unavailable());
    }

    #[tokio::test]
    async fn test_consent_checks_capability_before_prompting() {
        let locator = ConsentLocator::new(
            StaticLocator::unavailable(),
            PermissionPolicy::Prompt,
            Arc::new(FixedDecision(Decision::Proceed)),
        );
        assert!(!locator.is_available());
        assert_eq!(locator.locate().await, Err(LocationError::Unsupported));
    }

    #[tokio::test]
    async fn test_capture_permission_denied_by_policy() {
        let producer = Producer::new(
            memory_store(),
            consent(PermissionPolicy::Denied, Decision::Proceed),
            "iPhone",
        );

        let err = producer.capture().await.unwrap_err();
        assert!(err.is_permission_denied());
    }

    #[tokio::test]
    async fn test_capture_permission_denied_at_prompt() {
        let producer = Producer::new(
            memory_store(),
            consent(PermissionPolicy::Prompt, Decision::Abort),
            "iPhone",
        );

        let err = producer.capture().await.unwrap_err();
        assert!(err.is_permission_denied());
    }

    #[tokio::test]
    async fn test_capture_permission_granted_at_prompt() {
        let producer = Producer::new(
            memory_store(),
            consent(PermissionPolicy::Prompt, Decision::Proceed),
            "iPhone",
        );

        assert!(producer.capture().await.is_ok());
    }

    #[tokio::test]
    async fn test_capture_position_unavailable() {
        let producer = Producer::new(memory_store(), Arc::new(NoFixLocator), "iPhone");

        let err = producer.capture().await.unwrap_err();
        assert!(matches!(err, Error::PositionUnavailable { .. }));
        assert!(err.to_string().contains("no satellites"));
    }

    #[tokio::test]
    async fn test_capture_store_failure() {
        let producer = Producer::new(
            Arc::new(OfflineStore),
            Arc::new(StaticLocator::new(Some(lahore()))),
            "iPhone",
        );

        let err = producer.capture().await.unwrap_err();
        assert!(err.is_store_write_failure());
        assert!(err.to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_capture_times_out_waiting_for_location() {
        let producer = Producer::new(memory_store(), Arc::new(StalledLocator), "iPhone")
            .with_timeouts(Duration::from_millis(20), Duration::from_secs(1));

        let err = producer.capture().await.unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().contains("location capture"));
    }

    #[tokio::test]
    async fn test_capture_times_out_waiting_for_store() {
        let producer = Producer::new(
            Arc::new(StalledStore),
            Arc::new(StaticLocator::new(Some(lahore()))),
            "iPhone",
        )
        .with_timeouts(Duration::from_secs(1), Duration::from_millis(20));

        let err = producer.capture().await.unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().contains("record append"));
    }

    #[tokio::test]
    async fn test_failure_does_not_affect_other_producers() {
        let store = memory_store();
        let broken = Producer::new(
            Arc::clone(&store),
            Arc::new(StaticLocator::unavailable()),
            "a",
        );
        let working = Producer::new(
            Arc::clone(&store),
            Arc::new(StaticLocator::new(Some(lahore()))),
            "b",
        );

        assert!(broken.capture().await.is_err());
        assert!(working.capture().await.is_ok());
    }

    #[test]
    fn test_location_error_conversion() {
        assert!(Error::from(LocationError::Unsupported).is_capability_unavailable());
        assert!(Error::from(LocationError::PermissionDenied).is_permission_denied());
        assert!(matches!(
            Error::from(LocationError::PositionUnavailable("x".to_string())),
            Error::PositionUnavailable { .. }
        ));
    }

    #[test]
    fn test_host_identity() {
        let identity = host_identity();
        assert!(identity.starts_with("geofeed/"));
        assert!(identity.contains(std::env::consts::OS));
    }

    #[test]
    fn test_permission_policy_serde() {
        let policy: PermissionPolicy = serde_json::from_str("\"denied\"").unwrap();
        assert_eq!(policy, PermissionPolicy::Denied);
        assert_eq!(PermissionPolicy::default(), PermissionPolicy::Prompt);
    }

    #[test]
    fn test_producer_debug() {
        let producer = Producer::new(
            memory_store(),
            Arc::new(StaticLocator::unavailable()),
            "Mac",
        );
        let debug = format!("{producer:?}");
        assert!(debug.contains("Producer"));
        assert!(debug.contains("Mac"));
    }
}
