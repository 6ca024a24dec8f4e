pub mod config;
pub mod error;
pub mod handlers;
pub mod health;
pub mod middleware;
pub mod observability;
pub mod router;
pub mod server;
pub mod services;

pub use config::{AppConfig, Cli, load_config};
pub use error::AppError;
pub use router::{ApiRequest, ApiResponse, RequestRouter};

use anyhow::Result;
use std::panic;

/// Main server entry point for library usage
pub async fn run_server(cli: Cli) -> Result<()> {
    let app_config = config::load_config(&cli)?;

    let telemetry = observability::init_observability(&app_config)?;
    ::tracing::info!("Observability initialized");

    // Handler panics are caught per request by the router; this only covers the rest
    panic::set_hook(Box::new(|panic_info| {
        ::tracing::error!(panic = %panic_info, "Panic occurred");
    }));

    ::tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = ?app_config.environment,
        "{} starting up",
        app_config.service.name
    );

    server::start_server(app_config, telemetry).await
}
