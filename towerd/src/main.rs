//! Cooling tower supervisor daemon
//!
//! Runs the control loop for the tower fan and the redundant pump pair on a
//! shared Modbus RTU bus, and serves a REST API for status and manual control.
//!
//! Startup order: configuration, bus transport, drive registry, sensor
//! intake, status poller, control loop, then the HTTP server. On SIGINT or
//! SIGTERM the server drains, the control loop stops its outputs, and every
//! drive is sent a stop command.

mod api;
mod config;
mod hardware;
mod sensors;
mod shutdown;
mod supervisor;

use anyhow::{Context, Result};
use api::AppState;
use clap::Parser;
use config::RuntimeConfig;
use cooltower_core::config::resolve_config_path;
use cooltower_hardware::DriveRegistry;
use hardware::connection;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use supervisor::Supervisor;
use tokio::signal;
use tracing::{error, info, warn};

/// Cooling tower supervisor
#[derive(Parser, Debug)]
#[command(name = "towerd")]
#[command(version, about = "Cooling tower fan and pump supervisor", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server bind address (defaults to the configured hostname)
    #[arg(short, long)]
    bind: Option<String>,

    /// Server port
    #[arg(short, long)]
    port: Option<u16>,

    /// Serial device path (e.g., /dev/ttyUSB0), overriding the config file
    #[arg(long)]
    device: Option<String>,

    /// Run against a simulated bus with a modelled basin and header
    #[arg(long)]
    mock: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_tracing(args.verbose);

    info!("Cooling tower supervisor starting...");

    // Step 1: Configuration
    let config_path = resolve_config_path(args.config);
    info!("Configuration file: {}", config_path.display());

    let mut runtime_config = RuntimeConfig::load(&config_path).await?;
    runtime_config.apply_overrides(args.device, args.port);
    runtime_config.validate()?;
    info!(
        "Configuration validated successfully: {}",
        runtime_config.path().display()
    );

    let runtime_config = Arc::new(runtime_config);
    let cfg = runtime_config.static_config();

    // Step 2: Bus and drives
    let (transport, sim) = connection::open_transport(cfg, args.mock)?;
    let registry = Arc::new(
        DriveRegistry::from_config(transport, cfg)
            .await
            .context("Failed to initialize drive registry")?,
    );
    info!(
        "Drive registry initialized: {}",
        registry.names().await.join(", ")
    );
    connection::test_connection(&registry).await;

    // Step 3: Sensor intake
    let (sensor_tx, sensor_rx) = sensors::channel();
    let _mock_feed = match &sim {
        Some(sim) => {
            let drive_id = |name: &str| cfg.drive(name).map(|d| d.device_id);
            let pump_ids = [&cfg.failover.primary, &cfg.failover.backup]
                .into_iter()
                .filter_map(|name| drive_id(name))
                .collect();
            match drive_id(&cfg.fan.drive) {
                Some(fan_id) => {
                    info!("Mock sensor feed enabled");
                    Some(sensors::spawn_mock_feed(
                        sensor_tx.clone(),
                        sim.clone(),
                        fan_id,
                        pump_ids,
                        Duration::from_millis(cfg.polling.control_interval_ms),
                    ))
                }
                None => {
                    warn!("Fan drive '{}' not configured; no mock sensors", cfg.fan.drive);
                    None
                }
            }
        }
        None => {
            info!("Waiting for sensor readings on POST /api/v0/sensors");
            None
        }
    };

    // Step 4: Background status polling and the control loop
    let (drive_status, _poller) = supervisor::spawn_status_poller(
        registry.clone(),
        Duration::from_secs(cfg.polling.status_interval_secs),
    );
    let (control, control_task) = Supervisor::spawn(&runtime_config, &registry, sensor_rx)
        .await
        .context("Failed to start control loop")?;

    // Step 5: HTTP server
    let bind_addr = format!(
        "{}:{}",
        args.bind.as_deref().unwrap_or(&cfg.server.hostname),
        cfg.server.port
    );

    let app_state = AppState::new(
        runtime_config.clone(),
        registry.clone(),
        control.clone(),
        sensor_tx,
        drive_status,
        args.mock,
    );
    let app = api::create_router(app_state);

    info!("Starting server on {}", bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;

    info!("Cooling tower API listening on {}", bind_addr);
    info!("Server ready!");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown::stop_tower(&runtime_config, &control, &registry).await;
    if let Err(e) = control_task.await {
        error!("Control loop ended abnormally: {}", e);
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully...");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        },
    }
}

/// Initialize tracing subscriber for logging
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
