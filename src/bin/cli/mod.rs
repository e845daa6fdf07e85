pub mod args;
pub mod config;

use std::sync::Arc;

use iridium_stomp_server::{ServerHandler, StompServer};

use args::Cli;
use config::FileConfig;

/// Exit codes for different error conditions
pub mod exit_codes {
    /// Clean shutdown
    pub const SUCCESS: u8 = 0;
    /// Could not bind or accept (e.g., address in use)
    pub const NETWORK_ERROR: u8 = 1;
    /// Unreadable or invalid configuration
    pub const CONFIG_ERROR: u8 = 2;
}

/// Install the fmt subscriber. `RUST_LOG` wins over `default_level`.
pub fn init_logging(default_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Load configuration, bind, and serve until ctrl-c.
pub async fn run(cli: &Cli) -> Result<(), (String, u8)> {
    let file = match &cli.config {
        Some(path) => FileConfig::load(path).map_err(|e| (e, exit_codes::CONFIG_ERROR))?,
        None => FileConfig::default(),
    };

    let mut options = file.server.clone();
    if let Some(host) = &cli.host {
        options.host = host.clone();
    }
    if let Some(port) = cli.port {
        options.port = port;
    }
    if cli.secured {
        options.secured = true;
    }
    if options.secured && file.users.is_empty() {
        tracing::warn!("secured mode without users: every CONNECT will be rejected");
    }

    let handler = ServerHandler::new(options)
        .with_auth_provider(Arc::new(file.credentials()));
    let server = StompServer::bind_configured(Arc::new(handler))
        .await
        .map_err(|e| (format!("Failed to bind: {}", e), exit_codes::NETWORK_ERROR))?;

    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("interrupt received");
                shutdown.cancel();
            }
            Err(e) => tracing::warn!(error = %e, "cannot listen for ctrl-c"),
        }
    });

    server
        .run()
        .await
        .map_err(|e| (format!("Server error: {}", e), exit_codes::NETWORK_ERROR))
}
