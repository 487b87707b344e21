use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;

use crate::horde::Horde;
use crate::store::Store;

/// Spawns the snapshot writer and the stale-prompt reaper as long-lived
/// tasks, coordinated by a shutdown broadcast rather than one task per prompt.
pub struct BackgroundManager {
    horde: Arc<Horde>,
    store: Arc<Store>,
    snapshot_interval: Duration,
    reap_interval: Duration,
}

impl BackgroundManager {
    pub fn new(horde: Arc<Horde>, store: Arc<Store>, snapshot_interval_secs: u64, reap_interval_secs: u64) -> Self {
        Self {
            horde,
            store,
            snapshot_interval: Duration::from_secs(snapshot_interval_secs.max(1)),
            reap_interval: Duration::from_secs(reap_interval_secs.max(1)),
        }
    }

    /// Spawns both jobs, each selecting over its own tick and the shared
    /// shutdown signal so `Ctrl+C`/`SIGTERM` drains both cleanly.
    pub fn spawn(&self, shutdown_tx: &broadcast::Sender<()>) -> Vec<tokio::task::JoinHandle<()>> {
        vec![
            tokio::spawn(snapshot_writer(
                self.horde.clone(),
                self.store.clone(),
                self.snapshot_interval,
                shutdown_tx.subscribe(),
            )),
            tokio::spawn(prompt_reaper(self.horde.clone(), self.reap_interval, shutdown_tx.subscribe())),
        ]
    }
}

async fn snapshot_writer(horde: Arc<Horde>, store: Arc<Store>, interval: Duration, mut shutdown_rx: broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = store.snapshot(&horde).await {
                    tracing::error!(error = %e, "Snapshot write failed");
                }
            }
            _ = shutdown_rx.recv() => {
                tracing::info!("Snapshot writer shutting down");
                break;
            }
        }
    }
}

async fn prompt_reaper(horde: Arc<Horde>, interval: Duration, mut shutdown_rx: broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let reaped = horde.reap_stale_prompts(Utc::now()).await;
                if reaped > 0 {
                    tracing::info!(reaped, "Reaped stale prompts");
                }
            }
            _ = shutdown_rx.recv() => {
                tracing::info!("Prompt reaper shutting down");
                break;
            }
        }
    }
}
