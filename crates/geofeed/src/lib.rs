//! `geofeed` - A live-synchronized feed of shared location records
//!
//! Producers capture the device's position and append it to a shared record
//! store. Live views subscribe to the store, receive the whole collection on
//! every change, and keep an ordered, materialized list that operators can
//! inspect, focus on a map, or prune with confirmed removals.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod config;
pub mod error;
pub mod focus;
pub mod gate;
pub mod logging;
pub mod producer;
pub mod record;
pub mod store;
pub mod view;

pub use config::Config;
pub use error::{Error, Result};
pub use focus::MapFocus;
pub use gate::{Confirm, Decision};
pub use logging::init_logging;
pub use producer::{Locator, Producer};
pub use record::{Observation, Position, Record, RecordId};
pub use store::{RecordStore, Snapshot, SqliteStore, SubscriptionHandle};
pub use view::{LiveView, ViewOrdering, ViewState};
