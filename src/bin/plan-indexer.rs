// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Long-running indexer: tails the plan change stream and applies it to the
//! search index.
//!
//! ```text
//! plan-indexer [config.toml]
//! RUST_LOG=plan_sync_engine=debug plan-indexer /etc/plan-sync.toml
//! ```

use std::sync::Arc;

use anyhow::Context;
use plan_sync_engine::feed::redis_stream::StreamSettings;
use plan_sync_engine::{Dispatcher, ElasticIndex, JoinSchema, PlanSyncConfig, RedisStreamFeed};
use tokio::sync::watch;
use tracing::{info, warn};

fn load_config() -> anyhow::Result<PlanSyncConfig> {
    match std::env::args().nth(1) {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config file {}", path))?;
            PlanSyncConfig::from_toml_str(&text).with_context(|| format!("parsing config file {}", path))
        }
        None => Ok(PlanSyncConfig::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = load_config()?;
    info!(
        redis = %config.redis_url,
        index_url = %config.index_url,
        index = %config.index_name,
        stream = %config.stream_key,
        consumer = %config.consumer_name,
        "Starting plan indexer"
    );

    let index = ElasticIndex::from_config(&config).context("building search index client")?;
    let feed = RedisStreamFeed::connect(&config.redis_url, StreamSettings::from_config(&config))
        .await
        .context("connecting to change stream")?;

    let dispatcher = Arc::new(
        Dispatcher::new(Arc::new(index), JoinSchema::plan()).with_concurrency(config.worker_concurrency),
    );

    // Eager bootstrap so a misconfigured index shows up at startup
    if let Err(e) = dispatcher.bootstrap().await {
        warn!(error = %e, "Index bootstrap failed, will retry on first event");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for Ctrl-C, running until killed");
                // Dropping the sender would read as a shutdown
                std::future::pending::<()>().await;
                drop(shutdown_tx);
            }
        }
    });

    dispatcher.run(Arc::new(feed), shutdown_rx).await;
    Ok(())
}
