//! `SQLite`-backed record store.
//!
//! One database file can be shared by any number of processes: producers
//! append to it, live views subscribe to it. Writes made through this
//! instance are published to subscribers immediately; writes made by other
//! processes are picked up by an [`ExternalChangeWatcher`].

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::{debug, info, warn};

use super::migrations;
use super::subscription::{SnapshotCallback, SnapshotHub, SubscriptionHandle};
use super::watcher::ExternalChangeWatcher;
use super::{RecordStore, Snapshot};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::record::{Observation, RecordId};

/// Prefix of every identifier handed out by this store.
const ID_PREFIX: char = 'r';

/// Record store backed by a `SQLite` database file.
///
/// Construct one instance per process and share it; clones refer to the same
/// connection and subscriber registry.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    inner: Arc<Inner>,
}

#[derive(Debug)]
pub(crate) struct Inner {
    path: PathBuf,
    collection: String,
    conn: Mutex<Connection>,
    hub: SnapshotHub,
}

impl SqliteStore {
    /// Open or create a store at the given path, scoped to `collection`.
    ///
    /// Creates the parent directories and database file if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>, collection: impl Into<String>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening record store at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        // WAL lets live views read while producers in other processes write.
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.busy_timeout(Duration::from_secs(5))?;

        migrations::initialize_schema(&conn)?;

        let collection = collection.into();
        info!(
            collection = %collection,
            "Record store opened at {}",
            path.display()
        );
        Ok(Self::from_connection(path, collection, conn))
    }

    /// Open the store described by the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::open(config.database_path(), config.store.collection.clone())
    }

    /// Create an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory(collection: impl Into<String>) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        migrations::initialize_schema(&conn)?;

        Ok(Self::from_connection(
            PathBuf::from(":memory:"),
            collection.into(),
            conn,
        ))
    }

    fn from_connection(path: PathBuf, collection: String, conn: Connection) -> Self {
        Self {
            inner: Arc::new(Inner {
                path,
                collection,
                conn: Mutex::new(conn),
                hub: SnapshotHub::new(),
            }),
        }
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Number of live subscriptions on this instance.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.hub.subscriber_count()
    }

    /// Start polling for writes made by other processes.
    ///
    /// Subscribers are only notified when the collection actually changed.
    /// The watcher stops when dropped or when the store is dropped.
    #[must_use]
    pub fn watch_external(&self, interval: Duration) -> ExternalChangeWatcher {
        ExternalChangeWatcher::spawn(Arc::downgrade(&self.inner), interval)
    }
}

impl Inner {
    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::internal("record store connection lock poisoned"))
    }

    fn read_snapshot(&self, conn: &Connection) -> Result<Snapshot> {
        let mut stmt = conn.prepare_cached(
            r"
            SELECT seq, lat, lng, time, device_info
            FROM records WHERE collection = ?1
            ORDER BY seq ASC
            ",
        )?;

        let entries = stmt
            .query_map([&self.collection], row_to_entry)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Snapshot::new(entries))
    }

    /// Publish the current snapshot while the caller holds the connection.
    ///
    /// The write has already committed, so a failure here is only logged.
    fn publish_locked(&self, conn: &Connection) {
        if self.hub.subscriber_count() == 0 {
            return;
        }
        match self.read_snapshot(conn) {
            Ok(snapshot) => {
                if let Err(e) = self.hub.publish(&snapshot) {
                    warn!(error = %e, "Failed to publish snapshot");
                }
            }
            Err(e) => warn!(error = %e, "Failed to read snapshot after write"),
        }
    }

    /// Check for commits by other connections and republish if the
    /// collection changed.
    pub(crate) fn poll_external(&self, last_version: &mut Option<i64>) -> Result<bool> {
        let conn = self.lock()?;
        let version: i64 = conn.query_row("PRAGMA data_version", [], |row| row.get(0))?;
        if *last_version == Some(version) {
            return Ok(false);
        }
        *last_version = Some(version);

        if self.hub.subscriber_count() == 0 {
            return Ok(false);
        }
        let snapshot = self.read_snapshot(&conn)?;
        let published = self.hub.publish_if_changed(&snapshot)?;
        if published {
            debug!(
                collection = %self.collection,
                records = snapshot.len(),
                "Published external change"
            );
        }
        Ok(published)
    }
}

impl Inner {
    fn append(&self, observation: &Observation) -> Result<RecordId> {
        let conn = self.lock()?;

        conn.execute(
            r"
            INSERT INTO records (collection, lat, lng, time, device_info)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
            params![
                self.collection,
                observation.lat,
                observation.lng,
                observation.time.to_rfc3339(),
                observation.device_info,
            ],
        )
        .map_err(|e| Error::store_write(&self.collection, e.to_string()))?;

        let id = record_id(conn.last_insert_rowid());
        debug!(id = %id, collection = %self.collection, "Appended record");

        self.publish_locked(&conn);
        Ok(id)
    }

    fn subscribe(&self, on_change: SnapshotCallback) -> Result<SubscriptionHandle> {
        // Holding the connection keeps writes out until the subscriber is
        // registered, so its first snapshot is exactly the current contents.
        let conn = self.lock()?;
        let snapshot = self.read_snapshot(&conn)?;
        let records = snapshot.len();
        let handle = self.hub.attach(snapshot, on_change)?;

        debug!(
            subscription = %handle.id(),
            collection = %self.collection,
            records,
            "Subscribed"
        );
        Ok(handle)
    }

    fn remove(&self, id: &RecordId) -> Result<()> {
        let seq = parse_record_id(id)
            .ok_or_else(|| Error::store_remove(id.as_str(), "record not found"))?;

        let conn = self.lock()?;
        let affected = conn
            .execute(
                "DELETE FROM records WHERE collection = ?1 AND seq = ?2",
                params![self.collection, seq],
            )
            .map_err(|e| Error::store_remove(id.as_str(), e.to_string()))?;

        if affected == 0 {
            return Err(Error::store_remove(id.as_str(), "record not found"));
        }

        info!(id = %id, collection = %self.collection, "Removed record");
        self.publish_locked(&conn);
        Ok(())
    }
}

impl SqliteStore {
    /// Run a database operation on the blocking thread pool.
    async fn run_blocking<T, F>(&self, operation: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Inner) -> Result<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || operation(&inner))
            .await
            .map_err(|e| Error::internal(format!("record store task failed: {e}")))?
    }
}

#[async_trait::async_trait]
impl RecordStore for SqliteStore {
    fn collection(&self) -> &str {
        &self.inner.collection
    }

    async fn append(&self, observation: Observation) -> Result<RecordId> {
        self.run_blocking(move |inner| inner.append(&observation))
            .await
            .map_err(|e| e.into_store_write(&self.inner.collection))
    }

    async fn subscribe(&self, on_change: SnapshotCallback) -> Result<SubscriptionHandle> {
        self.run_blocking(move |inner| inner.subscribe(on_change))
            .await
            .map_err(|e| Error::Subscribe {
                collection: self.inner.collection.clone(),
                message: e.to_string(),
            })
    }

    async fn remove(&self, id: &RecordId) -> Result<()> {
        let owned = id.clone();
        self.run_blocking(move |inner| inner.remove(&owned))
            .await
            .map_err(|e| e.into_store_remove(id.as_str()))
    }
}

fn record_id(seq: i64) -> RecordId {
    RecordId::new(format!("{ID_PREFIX}{seq}"))
}

fn parse_record_id(id: &RecordId) -> Option<i64> {
    id.as_str()
        .strip_prefix(ID_PREFIX)
        .and_then(|seq| seq.parse().ok())
}

fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<(RecordId, Observation)> {
    let seq: i64 = row.get(0)?;
    let lat: f64 = row.get(1)?;
    let lng: f64 = row.get(2)?;
    let time_str: String = row.get(3)?;
    let device_info: String = row.get(4)?;

    let time = DateTime::parse_from_rfc3339(&time_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok((
        record_id(seq),
        Observation {
            lat,
            lng,
            time,
            device_info,
        },
    ))
}
