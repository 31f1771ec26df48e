//! Periodic purge driver.
//!
//! The engine has no timer of its own; the surrounding process owns a
//! `PurgeScheduler` that calls [`Cache::purge`] on an interval.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::engine::Cache;
use crate::Error;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Background task running [`Cache::purge`] every `interval`.
///
/// The first sweep happens one full interval after spawning. Dropping the
/// scheduler aborts the task; [`PurgeScheduler::shutdown`] stops it cleanly.
#[derive(Debug)]
pub struct PurgeScheduler {
    stop: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
    interval: Duration,
}

impl PurgeScheduler {
    /// Start purging `cache` every `interval` on the current tokio runtime.
    ///
    /// A zero interval is raised to one millisecond.
    pub fn spawn(cache: Cache, interval: Duration) -> Self {
        let interval = interval.max(MIN_INTERVAL);
        let (stop, mut stopped) = watch::channel(false);

        tracing::info!(interval_secs = interval.as_secs_f64(), "purge scheduler started");

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match cache.purge().await {
                            Ok(count) => tracing::info!(count, "purged inactive records"),
                            Err(e) => tracing::error!(error = %e, "scheduled purge failed"),
                        }
                    }
                    _ = stopped.changed() => break,
                }
            }

            tracing::debug!("purge scheduler stopped");
        });

        Self { stop, handle: Some(handle), interval }
    }

    /// Start a scheduler using the cache's configured purge interval.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the interval is not a valid Duration.
    pub fn for_cache(cache: Cache) -> Result<Self, Error> {
        let interval = cache.config().purge_interval()?;
        Ok(Self::spawn(cache, interval))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Stop the scheduler and wait for an in-flight sweep to finish.
    pub async fn shutdown(mut self) {
        let _ = self.stop.send(true);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "purge scheduler task failed");
            }
        }
    }
}

impl Drop for PurgeScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
