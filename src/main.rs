//! camview - RTSP camera preview with on-demand snapshots

use std::sync::Arc;
use std::time::Duration;

use camview::display::DisplayPump;
use camview::session::SessionController;
use camview::Config;
use color_eyre::{eyre::eyre, Result};
use tracing::info;

fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter("camview=debug")
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("camview starting");

    // Load configuration
    let config = Config::load()?;
    camview::CONFIG.store(Arc::new(config.clone()));

    // First CLI argument overrides the configured stream address
    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| config.stream.url.clone());
    let endpoint = config.stream.endpoint_for(&url)?;
    info!("stream endpoint: {endpoint}");

    let controller = SessionController::new(config.retry.policy(), config.stream.stop_grace());
    controller.start(endpoint.clone())?;

    // Initialize SDL2 and run the display pump on the main thread
    let sdl_context = sdl2::init().map_err(|e| eyre!(e))?;
    let mut pump = DisplayPump::new(
        &sdl_context,
        config.display.width,
        config.display.height,
        Duration::from_millis(config.display.tick_ms),
    )?;
    pump.run(
        &sdl_context,
        &controller,
        endpoint,
        &config.snapshot.dir,
        config.snapshot.format,
    )?;

    controller.stop();
    info!("camview shutting down");
    Ok(())
}
