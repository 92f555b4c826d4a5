//! Crash Engine Server
//!
//! Runs the round engine behind a WebSocket endpoint until Ctrl-C.

use std::sync::Arc;
use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crash_engine::{
    VERSION,
    engine::config::{EngineConfig, FairnessMode},
    network::{AuthConfig, CrashServer, ServerConfig},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Crash Engine Server v{}", VERSION);

    let engine = EngineConfig::from_env().context("invalid engine configuration")?;
    let server_config = ServerConfig::from_env().context("invalid server configuration")?;
    let auth = AuthConfig::from_env();

    info!(
        "Rounds: {:?} betting, {:?} cooldown, {:?} ticks, house edge {:.2}%",
        engine.waiting_duration,
        engine.cooldown_duration,
        engine.tick_period,
        engine.house_edge * 100.0
    );
    if let FairnessMode::Seeded(seed) = engine.fairness {
        warn!("Seeded crash points (seed {}); rounds are predictable", seed);
    }
    if auth.guest_mode() {
        warn!("No auth keys configured; accepting guest tokens");
    }

    let server = Arc::new(CrashServer::new(server_config, engine, auth));

    let signal_server = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received");
            signal_server.shutdown();
        }
    });

    server.run().await.context("server failed")?;

    info!("Server stopped");
    Ok(())
}
