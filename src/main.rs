use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

mod api;
mod config;
mod engine;
mod error;
mod models;
mod notify;
mod probe;
mod query;
mod registry;
mod stats;
mod telemetry;

use crate::api::AppState;
use crate::config::MonitorConfig;
use crate::engine::Monitor;
use crate::probe::HttpProber;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.json".into());
    let config = MonitorConfig::load(&config_path);
    let log_level = config.as_ref().map(|c| c.log_level.as_str()).unwrap_or("info");
    telemetry::init(log_level);
    let config = config?;

    let providers = registry::build(&config.providers);
    let prober = Arc::new(HttpProber::new(config.probe_timeout()));
    let monitor = Arc::new(Monitor::new(providers, prober));

    let app_state = AppState::new(Arc::clone(&monitor), config.interval, config.mode);
    app_state.forward_updates();

    if config.autostart {
        monitor.start(config.interval, config.mode).await;
    }

    let api_port = config.api_port;
    let server = tokio::spawn(async move {
        if let Err(e) = api::start_server(api_port, app_state).await {
            error!("Dashboard server failed: {:#}", e);
        }
    });

    signal::ctrl_c().await?;
    info!("Shutdown signal received. Stopping latency monitor...");
    monitor.shutdown().await;
    server.abort();

    Ok(())
}
