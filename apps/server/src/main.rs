//! Hosting shell for the hub core: builds the service graph, starts the
//! monitors and waits for shutdown.

mod config;
mod context;

use hearth_core::integrations::IntegrationGateway;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::ServerConfig;
use crate::context::ServiceContext;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env()?;
    info!(
        "Starting hearth server (database: {}, timezone: {})",
        config.database_url, config.timezone
    );
    if config.suppress_authentication {
        info!("Authentication suppression requested; the core ignores it");
    }

    let context = ServiceContext::build(&config)?;

    // Pick up persisted settings so enabled integrations come up without a
    // manual settings round-trip.
    for gateway in context.integration_registry.all() {
        gateway.notify_settings_changed().await;
    }

    context.weather_service.ensure_initialized().await;
    context.start_monitors(&config)?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested, stopping monitors");
    context.monitor_manager.shutdown();

    Ok(())
}
