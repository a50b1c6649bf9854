//! Core record types for geofeed.
//!
//! This module defines the data structures for a single location observation,
//! both before the store has assigned it an identifier ([`Observation`]) and
//! after ([`Record`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque record identifier assigned by the store at append time.
///
/// The core never parses or generates identifiers; only the store does.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Wrap a store-assigned identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for RecordId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A pair of coordinates as reported by the host.
///
/// No bounds validation is performed; the captured value is trusted as-is.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
}

impl Position {
    /// Create a new position.
    #[must_use]
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// One observation that has not been assigned an identifier yet.
///
/// This is the payload handed to the store's `append`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
    /// When the observation was captured.
    pub time: DateTime<Utc>,
    /// Free-form description of the capturing agent.
    pub device_info: String,
}

impl Observation {
    /// Create an observation stamped with the current instant.
    #[must_use]
    pub fn new(position: Position, device_info: impl Into<String>) -> Self {
        Self::at(position, Utc::now(), device_info)
    }

    /// Create an observation with an explicit capture instant.
    #[must_use]
    pub fn at(position: Position, time: DateTime<Utc>, device_info: impl Into<String>) -> Self {
        Self {
            lat: position.lat,
            lng: position.lng,
            time,
            device_info: device_info.into(),
        }
    }

    /// The observation's coordinates.
    #[must_use]
    pub fn position(&self) -> Position {
        Position::new(self.lat, self.lng)
    }

    /// Tag this observation with its store-assigned identifier.
    #[must_use]
    pub fn into_record(self, id: RecordId) -> Record {
        Record {
            id,
            lat: self.lat,
            lng: self.lng,
            time: self.time,
            device_info: self.device_info,
        }
    }
}

/// A persisted observation together with its identifier.
///
/// Records are immutable once appended; the only lifecycle transition after
/// creation is removal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Store-assigned identifier.
    pub id: RecordId,
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
    /// When the observation was captured.
    pub time: DateTime<Utc>,
    /// Free-form description of the capturing agent.
    pub device_info: String,
}

impl Record {
    /// The record's coordinates.
    #[must_use]
    pub fn position(&self) -> Position {
        Position::new(self.lat, self.lng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_id_display() {
        let id = RecordId::new("r42");
        assert_eq!(id.to_string(), "r42");
        assert_eq!(id.as_str(), "r42");
    }

    #[test]
    fn test_observation_new_sets_time() {
        let before = Utc::now();
        let observation = Observation::new(Position::new(31.5204, 74.3587), "iPhone");
        let after = Utc::now();

        assert!(observation.time >= before && observation.time <= after);
        assert_eq!(observation.device_info, "iPhone");
        assert_eq!(observation.position(), Position::new(31.5204, 74.3587));
    }

    #[test]
    fn test_observation_into_record() {
        let time = Utc::now();
        let record = Observation::at(Position::new(1.5, -2.5), time, "Android")
            .into_record(RecordId::new("r1"));

        assert_eq!(record.id, RecordId::new("r1"));
        assert_eq!(record.lat, 1.5);
        assert_eq!(record.lng, -2.5);
        assert_eq!(record.time, time);
        assert_eq!(record.device_info, "Android");
    }

    #[test]
    fn test_coordinates_not_validated() {
        let observation = Observation::new(Position::new(512.0, -999.0), "");
        assert_eq!(observation.lat, 512.0);
        assert_eq!(observation.lng, -999.0);
    }

    #[test]
    fn test_record_serializes_flat() {
        let record = Observation::new(Position::new(10.0, 20.0), "Mac")
            .into_record(RecordId::new("r3"));

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["id"], "r3");
        assert_eq!(value["lat"], 10.0);
        assert_eq!(value["device_info"], "Mac");
        assert!(value["time"].is_string());
    }
}
