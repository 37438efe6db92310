// src/main.rs

//! The main entry point for the Steward monitor.

use anyhow::{Result, anyhow};
use std::env;
use std::sync::Arc;
use steward::config::MonitorConfig;
use steward::core::listener::run_listener;
use steward::core::tasks::health_check::{HealthCheckWorker, TcpHealthProbe};
use steward::core::Monitor;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::{filter::EnvFilter, prelude::*, reload};

#[tokio::main]
async fn main() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("Steward version {VERSION}");
        return Ok(());
    }

    // The configuration path can be provided via a --config flag; otherwise
    // it defaults to "steward.toml". Running without a config file at the
    // default path is fine: every tunable has a default.
    let explicit_config = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());
    let config_path = explicit_config.unwrap_or("steward.toml");

    let mut config = match MonitorConfig::from_file(config_path) {
        Ok(config) => config,
        Err(_) if explicit_config.is_none() && !std::path::Path::new(config_path).exists() => {
            MonitorConfig::default()
        }
        Err(e) => {
            eprintln!("Failed to load configuration from \"{config_path}\": {e}");
            std::process::exit(1);
        }
    };

    // Override the listener port if provided on the command line.
    if let Some(port_index) = args.iter().position(|arg| arg == "--port") {
        match args.get(port_index + 1).map(|s| s.parse::<u16>()) {
            Some(Ok(port)) => config.port = port,
            _ => {
                eprintln!("--port requires a valid port number");
                std::process::exit(1);
            }
        }
    }

    // Setup logging with reloading capabilities. The initial log level
    // comes from the env var or the config file.
    let initial_log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    let (filter, reload_handle) = reload::Layer::new(EnvFilter::new(initial_log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_ansi(true),
        )
        .init();
    let _reload_handle = Arc::new(reload_handle);

    info!("Steward monitor {VERSION} starting");

    if let Err(e) = run_monitor(config).await {
        error!("Monitor runtime error: {}", e);
        return Err(e);
    }
    Ok(())
}

/// Builds the monitor and supervises its long-lived tasks.
async fn run_monitor(config: MonitorConfig) -> Result<()> {
    let monitor = Monitor::new(config).map_err(|e| anyhow!(e.to_string()))?;
    info!("monitor run id: {}", monitor.run_id);

    let mut tasks: JoinSet<Result<()>> = JoinSet::new();

    let listener_monitor = monitor.clone();
    tasks.spawn(async move { run_listener(listener_monitor).await });

    let worker = HealthCheckWorker::new(monitor.clone(), Arc::new(TcpHealthProbe));
    tasks.spawn(async move {
        worker.run().await;
        Err(anyhow!("health-check worker exited unexpectedly"))
    });

    // In normal operation this loop never exits; any task ending is a
    // monitor-level failure.
    while let Some(res) = tasks.join_next().await {
        match res {
            Ok(Ok(())) => {
                warn!("a monitor task completed unexpectedly without an error");
            }
            Ok(Err(e)) => {
                error!("a monitor task failed: {}", e);
            }
            Err(e) => {
                error!("a monitor task panicked: {}", e);
            }
        }
    }

    Err(anyhow!("all monitor tasks have terminated, shutting down"))
}
