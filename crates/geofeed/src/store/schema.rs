//! `SQLite` schema definitions for geofeed.
//!
//! This module contains the SQL statements for creating and managing
//! the database schema.

/// SQL statement to create the records table.
///
/// `AUTOINCREMENT` keeps sequence numbers monotonic across deletions, so an
/// identifier is never handed out twice.
pub const CREATE_RECORDS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS records (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    collection TEXT NOT NULL,
    lat REAL NOT NULL,
    lng REAL NOT NULL,
    time TEXT NOT NULL,
    device_info TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
)
";

/// SQL statement to create an index for collection-scoped snapshots.
pub const CREATE_COLLECTION_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_records_collection ON records(collection, seq)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_RECORDS_TABLE,
    CREATE_COLLECTION_INDEX,
    CREATE_METADATA_TABLE,
];
