use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;

use config::{Bus, DaemonConfig};
use dbus_interface::{RollcallService, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = DaemonConfig::from_env().context("loading configuration")?;
    tracing::info!(
        gallery = %config.store.gallery_path.display(),
        attendance = %config.store.attendance_dir.display(),
        samples = %config.store.samples_dir.display(),
        threshold = config.store.engine.threshold,
        vector_dim = config.store.engine.vector_dim,
        metric = %config.store.engine.metric,
        "configuration loaded"
    );

    // Fail fast: a corrupt gallery must stop startup rather than make every face unknown.
    let engine = engine::Engine::open(&config.store).context("opening stores")?;
    let handle = engine::spawn_engine(engine, config.queue_depth)?;

    let builder = match config.bus {
        Bus::Session => zbus::connection::Builder::session()?,
        Bus::System => zbus::connection::Builder::system()?,
    };
    let _connection = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, RollcallService::new(handle))?
        .build()
        .await
        .context("registering on D-Bus")?;

    tracing::info!(bus = ?config.bus, name = BUS_NAME, "rollcalld ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}
