//! Gamma-exposure analytics service entry point

use anyhow::Result;
use gex_engine::cache::{InMemorySink, SnapshotSink};
use gex_engine::config::EngineConfig;
use gex_engine::http::{AppState, build_router};
use gex_engine::Engine;
use services_common::Ts;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const MARKET_HISTORY_CAPACITY: usize = 24 * 3600;
const ESCAPE_TICK_INTERVAL_SECS: u64 = 1;
const SNAPSHOT_INTERVAL_SECS: u64 = 60;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "gex_engine=info,tower_http=info".to_string()))
        .init();

    let config = EngineConfig::default();
    info!(underlying = %config.underlying, "starting gamma-exposure analytics engine");

    let engine = Arc::new(Engine::new(config));
    let history = Arc::new(InMemorySink::new(MARKET_HISTORY_CAPACITY));

    {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(ESCAPE_TICK_INTERVAL_SECS));
            loop {
                ticker.tick().await;
                engine.run_escape_tick(Ts::now()).await;
            }
        });
    }

    {
        let engine = Arc::clone(&engine);
        let history = Arc::clone(&history);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(SNAPSHOT_INTERVAL_SECS));
            loop {
                ticker.tick().await;
                let snapshot = engine.compose_snapshot(Ts::now()).await;
                if let Err(err) = history.write(snapshot).await {
                    warn!(%err, "market snapshot dispatch failed");
                }
            }
        });
    }

    let app_state = AppState { engine, history };
    let app = build_router(app_state);

    let addr = std::env::var("GEX_LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    info!(%addr, "gamma-exposure engine listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
