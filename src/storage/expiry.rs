//! Active expiry.
//!
//! Reads only catch expired keys that somebody asks for. Keys that are never
//! touched again are removed here, by a single task per store:
//!
//! - it deletes everything already past its deadline, then sleeps until the
//!   earliest remaining one;
//! - `Db::expiry_changed` wakes it when a write schedules an earlier deadline;
//! - every `sweep_interval` it samples volatile keys and, past the
//!   configured threshold, removes a bounded batch in deadline order.

use crate::storage::Db;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, trace};

/// Tuning for the sampling sweep.
#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    /// Interval between sampling sweeps (default: 100ms)
    pub sweep_interval: Duration,

    /// Volatile keys inspected per sampling sweep (default: 20)
    pub sample_size: usize,

    /// Expired keys to observe before a lazy batch cleanup runs (default: 10)
    pub lazy_threshold: usize,

    /// Maximum keys removed by one lazy batch cleanup (default: 100)
    pub lazy_batch_limit: usize,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_millis(100),
            sample_size: 20,
            lazy_threshold: 10,
            lazy_batch_limit: 100,
        }
    }
}

/// Owns the sweeper task. Dropping it stops the task.
#[derive(Debug)]
pub struct ExpirySweeper {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ExpirySweeper {
    /// Starts the expiry sweeper for `db` as a background task.
    ///
    /// The sweeper uses the [`ExpiryConfig`] the store was created with and
    /// stops when the returned handle is dropped.
    ///
    /// # Example
    ///
    /// ```
    /// use redkite::storage::{Db, ExpirySweeper};
    ///
    /// # #[tokio::main]
    /// # async fn main() {
    /// let db = Db::new();
    /// let sweeper = ExpirySweeper::start(db.clone());
    ///
    /// sweeper.stop();
    /// # }
    /// ```
    pub fn start(db: Db) -> Self {
        info!(interval = ?db.config().sweep_interval, "Expiry sweeper running");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(sweeper_loop(db, shutdown_rx));

        Self {
            shutdown_tx,
            handle,
        }
    }

    /// Signals the task to exit. Calling it again is a no-op.
    pub fn stop(&self) {
        if self.handle.is_finished() {
            return;
        }
        let _ = self.shutdown_tx.send(true);
        self.handle.abort();
        info!("Expiry sweeper stopped");
    }

    /// Returns true while the sweeper task is alive.
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweeper_loop(db: Db, mut shutdown_rx: watch::Receiver<bool>) {
    let mut ticker = time::interval_at(
        Instant::now() + db.config().sweep_interval,
        db.config().sweep_interval,
    );
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let (purged, next_deadline) = db.purge_expired();
        if purged > 0 {
            debug!(
                expired = purged,
                keys_remaining = db.len(),
                "Expired keys cleaned up"
            );
        }

        tokio::select! {
            _ = sleep_until_deadline(next_deadline) => {}
            _ = ticker.tick() => {
                let removed = db.sample_sweep();
                if removed > 0 {
                    debug!(expired = removed, "Sampling sweep removed expired keys");
                } else {
                    trace!("Sampling sweep found nothing to remove");
                }
            }
            _ = db.expiry_changed() => {
                trace!("Earlier expiry scheduled, re-arming timer");
            }
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry sweeper exiting");
                    return;
                }
            }
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(when) => time::sleep_until(when).await,
        None => std::future::pending().await,
    }
}
