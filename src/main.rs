use std::sync::Arc;

use horde_scheduler::background::BackgroundManager;
use horde_scheduler::config::Config;
use horde_scheduler::horde::{Horde, SchedulerConfig};
use horde_scheduler::logging::{init_tracing, LogConfig};
use horde_scheduler::oracle::{HttpOracle, ModelSizeOracle, StubOracle};
use horde_scheduler::store::Store;
use tokio::sync::broadcast;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let config = Config::from_env();
    let scheduler_config = SchedulerConfig {
        stale_prompt_secs: config.stale_prompt_secs,
        stale_worker_secs: config.stale_worker_secs,
        uptime_reward_threshold_secs: config.uptime_reward_threshold_secs,
        max_gens_per_wp: config.max_gens_per_wp,
    };

    init_tracing(&LogConfig {
        log_level: config.log_level.clone(),
        enable_file_logs: config.enable_file_logs,
        log_dir: config.log_dir.clone(),
    });
    tracing::info!("Starting horde-scheduler");

    let store = Arc::new(Store::new(&config.db_dir));
    let now = chrono::Utc::now();

    if config.to_tokens {
        tracing::info!("Running one-shot chars->tokens conversion");
        let state = store
            .load(now, true)
            .await
            .expect("Failed to load state for conversion");
        let oracle: Arc<dyn ModelSizeOracle> = Arc::new(StubOracle::new(config.oracle.stub_multiplier));
        let horde = Arc::new(Horde::new(state, oracle, scheduler_config));
        store.snapshot(&horde).await.expect("Failed to write converted snapshot");
        tracing::info!("Conversion complete, exiting");
        return;
    }

    let state = store.load(now, false).await.expect("Failed to load persisted state");

    let oracle: Arc<dyn ModelSizeOracle> = match &config.oracle.base_url {
        Some(base_url) => Arc::new(HttpOracle::new(base_url.clone(), config.oracle.timeout_secs)),
        None => Arc::new(StubOracle::new(config.oracle.stub_multiplier)),
    };
    let horde = Arc::new(Horde::new(state, oracle, scheduler_config));

    let (shutdown_tx, _) = broadcast::channel::<()>(8);

    let background = BackgroundManager::new(
        horde.clone(),
        store.clone(),
        config.snapshot_interval_secs,
        config.reap_interval_secs,
    );
    let handles = background.spawn(&shutdown_tx);

    shutdown_signal().await;
    tracing::info!("Shutdown signal received");
    let _ = shutdown_tx.send(());

    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Background task panicked");
        }
    }

    tracing::info!("Flushing store before exit");
    if let Err(e) = store.snapshot(&horde).await {
        tracing::error!(error = %e, "Failed to flush store before exit");
    }
    tracing::info!("Shutdown complete");
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = sigterm.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
