//! Single-record map focus.
//!
//! Holds at most one focused position. Focusing again re-centers the same
//! focus instead of opening another one.

use serde::Serialize;

use crate::record::{Position, Record};

/// Zoom level used when no other is configured.
pub const DEFAULT_ZOOM: u8 = 15;

/// OpenStreetMap tile URL template for map renderers.
pub const TILE_URL_TEMPLATE: &str = "https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png";

/// Attribution required when displaying the tiles.
pub const TILE_ATTRIBUTION: &str = "© OpenStreetMap contributors";

/// The one place the map is centered on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Focus {
    /// Map center.
    pub center: Position,
    /// Zoom level.
    pub zoom: u8,
}

impl Focus {
    /// Link to the position in an external maps application.
    #[must_use]
    pub fn deep_link(&self) -> String {
        format!(
            "https://www.google.com/maps?q={},{}",
            self.center.lat, self.center.lng
        )
    }

    /// Center formatted with six decimals.
    #[must_use]
    pub fn coords_label(&self) -> String {
        format!("{:.6}, {:.6}", self.center.lat, self.center.lng)
    }
}

/// Map focus holder.
#[derive(Debug, Clone, PartialEq)]
pub struct MapFocus {
    zoom: u8,
    current: Option<Focus>,
}

impl MapFocus {
    /// Create an unfocused map that zooms to `zoom` when focusing.
    #[must_use]
    pub fn new(zoom: u8) -> Self {
        Self {
            zoom,
            current: None,
        }
    }

    /// Center the map on `(lat, lng)`, replacing any existing focus.
    pub fn focus(&mut self, lat: f64, lng: f64) -> Focus {
        let focus = Focus {
            center: Position::new(lat, lng),
            zoom: self.zoom,
        };
        self.current = Some(focus);
        focus
    }

    /// Center the map on a record.
    pub fn focus_record(&mut self, record: &Record) -> Focus {
        self.focus(record.lat, record.lng)
    }

    /// Clear the focus.
    pub fn close(&mut self) {
        self.current = None;
    }

    /// The current focus, if any.
    #[must_use]
    pub fn current(&self) -> Option<&Focus> {
        self.current.as_ref()
    }

    /// The zoom applied on focus.
    #[must_use]
    pub fn zoom(&self) -> u8 {
        self.zoom
    }
}

impl Default for MapFocus {
    fn default() -> Self {
        Self::new(DEFAULT_ZOOM)
    }
}

/// Record coordinates formatted for a table cell, four decimals.
#[must_use]
pub fn table_coords(record: &Record) -> String {
    format!("{:.4}, {:.4}", record.lat, record.lng)
}
