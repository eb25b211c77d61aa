//! Background reclamation of expired entries.
//!
//! The loop is a plain tokio task bound to two stop signals: the owner's
//! shutdown receiver and the reclaimer's own stop channel. Either one firing,
//! or its sender being dropped, ends the loop. A sweep already in progress
//! finishes first; no store access happens after the task has returned.

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use metrics::{counter, histogram};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use super::store::{KeyedStore, SweepStats};

/// Handle to a running reclamation loop.
pub struct Reclaimer {
    stop: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Reclaimer {
    /// Spawn the loop. The first sweep happens one `interval` after start.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        name: Arc<str>,
        store: Arc<dyn KeyedStore>,
        interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run(name, store, interval, shutdown, stop_rx));
        Self {
            stop,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Whether the loop is still running.
    pub fn is_running(&self) -> bool {
        self.handle_slot("is_running")
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the loop and wait for it to exit.
    pub async fn shutdown(&self) {
        let _ = self.stop.send(true);
        let handle = self.handle_slot("shutdown").take();
        if let Some(handle) = handle
            && let Err(err) = handle.await
        {
            warn!(error = %err, "reclamation task ended abnormally");
        }
    }
}

impl Reclaimer {
    fn handle_slot(&self, op: &'static str) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.handle.lock().unwrap_or_else(|poisoned| {
            warn!(op, result = "poisoned_recovered", "recovered reclaimer handle lock");
            poisoned.into_inner()
        })
    }
}

impl Drop for Reclaimer {
    fn drop(&mut self) {
        let _ = self.stop.send(true);
    }
}

async fn run(
    name: Arc<str>,
    store: Arc<dyn KeyedStore>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // Skip the first immediate tick

    loop {
        tokio::select! {
            biased;
            _ = stopped(&mut shutdown) => break,
            _ = stopped(&mut stop) => break,
            _ = ticker.tick() => {
                sweep_once(&name, store.as_ref()).await;
            }
        }
    }

    debug!(cache = %name, "reclamation loop stopped");
}

/// Resolves once the flag is set or its sender is gone.
async fn stopped(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

/// Run a single reclamation pass, logging and recording the outcome.
pub async fn sweep_once(name: &str, store: &dyn KeyedStore) -> Option<SweepStats> {
    let started_at = Instant::now();
    match store.sweep_expired().await {
        Ok(stats) => {
            let elapsed_ms = started_at.elapsed().as_secs_f64() * 1000.0;
            histogram!("simplecache_sweep_ms").record(elapsed_ms);
            counter!("simplecache_sweep_removed_total").increment(stats.removed as u64);
            if stats.removed > 0 {
                info!(
                    cache = name,
                    scanned = stats.scanned,
                    removed = stats.removed,
                    bytes_reclaimed = stats.bytes_reclaimed,
                    elapsed_ms,
                    "reclaimed expired cache entries"
                );
            } else {
                debug!(cache = name, scanned = stats.scanned, "cache sweep found nothing to reclaim");
            }
            Some(stats)
        }
        Err(err) => {
            counter!("simplecache_store_error_total", "op" => "sweep").increment(1);
            warn!(cache = name, op = "sweep_expired", error = %err, "cache sweep failed");
            None
        }
    }
}
