//! Background Expiry Reaper
//!
//! Reads already hide expired keys, but a key that is never read again would
//! otherwise stay in memory forever. The reaper is a Tokio task that wakes on
//! a fixed period and evicts every key whose expiry has passed.
//!
//! Each tick visits only the keys that carry an expiry (O(volatile keys)).
//! That is fine for small keyspaces; a timer wheel or a heap ordered by
//! expiry would be needed to scale past that.

use crate::storage::StorageEngine;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace};

/// Default period between sweeps.
pub const DEFAULT_REAPER_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration for the reaper.
#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// Time between sweeps (default: 100ms)
    pub interval: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_REAPER_INTERVAL,
        }
    }
}

/// A handle to the running reaper.
///
/// Dropping the handle stops the background task.
#[derive(Debug)]
pub struct Reaper {
    shutdown_tx: watch::Sender<bool>,
}

impl Reaper {
    /// Spawns the reaper onto the current Tokio runtime.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use emberkv::storage::{StorageEngine, Reaper, ReaperConfig};
    /// use std::sync::Arc;
    ///
    /// let engine = Arc::new(StorageEngine::new());
    /// let reaper = Reaper::start(engine, ReaperConfig::default());
    ///
    /// // Dropping the handle stops the task
    /// drop(reaper);
    /// ```
    pub fn start(engine: Arc<StorageEngine>, config: ReaperConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(interval_ms = config.interval.as_millis(), "Expiry reaper started");
        tokio::spawn(reaper_loop(engine, config, shutdown_rx));

        Self { shutdown_tx }
    }

    /// Signals the background task to exit after its current tick.
    ///
    /// Only the first call has an effect and returns `true`; later calls,
    /// including the one made on drop, return `false`.
    pub fn stop(&self) -> bool {
        let stopped = self
            .shutdown_tx
            .send_if_modified(|stopped| !std::mem::replace(stopped, true));
        if stopped {
            info!("Expiry reaper stopped");
        }
        stopped
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn reaper_loop(
    engine: Arc<StorageEngine>,
    config: ReaperConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let start = tokio::time::Instant::now() + config.interval;
    let mut ticker = tokio::time::interval_at(start, config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry reaper received shutdown signal");
                    return;
                }
            }
        }

        let expired = engine.cleanup_expired(Instant::now());

        if expired > 0 {
            debug!(
                expired = expired,
                keys_remaining = engine.len(),
                "Expired keys reaped"
            );
        } else {
            trace!("Reaper tick, nothing expired");
        }
    }
}

/// Starts the reaper with the default 100ms period.
pub fn start_reaper(engine: Arc<StorageEngine>) -> Reaper {
    Reaper::start(engine, ReaperConfig::default())
}
