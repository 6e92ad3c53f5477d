//! camrelay: relay browser camera frames into a virtual webcam

use std::path::PathBuf;
use std::sync::Arc;

use camrelay::output::V4l2LoopbackBackend;
use camrelay::server::RelayServer;
use camrelay::{utils, Config, SessionController};
use color_eyre::{eyre::WrapErr, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("camrelay=debug")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("camrelay launching...");

    // Load configuration
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref()).wrap_err("Failed to load configuration")?;

    match &config.camera.device {
        Some(path) => info!("Using virtual camera device: {}", path.display()),
        None => {
            let found = utils::detect_loopback_devices();
            if found.is_empty() {
                warn!("No v4l2loopback device found yet, camera start will fail until one is loaded");
            }
        }
    }

    let backend = Arc::new(V4l2LoopbackBackend::new(config.camera.device.clone()));
    let (notice_tx, notice_rx) = flume::bounded(config.pipeline.event_buffer.max(1));
    let controller =
        Arc::new(SessionController::new(backend, &config.pipeline).with_notices(notice_tx));

    let server = RelayServer::new(&config, Arc::clone(&controller))?;
    server.relay_notices(notice_rx);

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down..."),
    }

    let stopper = Arc::clone(&controller);
    tokio::task::spawn_blocking(move || stopper.stop()).await??;

    info!("camrelay shutting down");
    Ok(())
}
