//! Detection of writes made by other processes.
//!
//! `SQLite` has no cross-process change notification, so the watcher polls
//! `PRAGMA data_version` and republishes the collection when it moved.

use std::sync::Weak;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

use super::sqlite::Inner;

/// Background task that forwards external commits to subscribers.
///
/// Stops when dropped, when [`stop`](Self::stop) is called, or once the
/// store it watches has been dropped.
#[derive(Debug)]
pub struct ExternalChangeWatcher {
    interval: Duration,
    task: JoinHandle<()>,
}

impl ExternalChangeWatcher {
    pub(crate) fn spawn(store: Weak<Inner>, interval: Duration) -> Self {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last_version = None;

            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    debug!("Record store dropped, external watcher exiting");
                    break;
                };
                match store.poll_external(&mut last_version) {
                    Ok(true) => trace!("External change forwarded"),
                    Ok(false) => {}
                    Err(e) => warn!(error = %e, "External change poll failed"),
                }
            }
        });

        debug!(interval_ms = interval.as_millis(), "External change watcher started");
        Self { interval, task }
    }

    /// The polling interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Check whether the watcher task is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop polling. Safe to call more than once.
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for ExternalChangeWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}
