//! Request governor gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!                         ┌──────────────────────────────────────────────┐
//!                         │               REQUEST GOVERNOR               │
//!                         │                                              │
//!   Client Request        │  ┌─────────┐   ┌──────────┐   ┌───────────┐  │
//!   ──────────────────────┼─▶│  http   │──▶│  abuse   │──▶│   rate    │  │
//!                         │  │ server  │   │ tracker  │   │  limiter  │  │
//!                         │  └─────────┘   └──────────┘   └─────┬─────┘  │
//!                         │                                     ▼        │
//!                         │                               ┌───────────┐  │
//!   Client Response       │  ┌─────────┐   ┌──────────┐   │ response  │  │
//!   ◀─────────────────────┼──│ headers │◀──│ upstream │◀──│   cache   │  │
//!                         │  └─────────┘   │  proxy   │   └───────────┘  │
//!                         │                └────┬─────┘                  │
//!                         │                     ▼                        │
//!                         │               performance records            │
//!                         │                                              │
//!                         │  admin API · sweepers · metrics · shutdown   │
//!                         └──────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use request_governor::config::{load_config, GovernorConfig};
use request_governor::lifecycle::{spawn_signal_handler, Shutdown};
use request_governor::observability::{logging, metrics};
use request_governor::HttpServer;

#[derive(Parser)]
#[command(name = "request-governor")]
#[command(about = "Rate limiting, abuse blocking and response caching in front of an HTTP service", long_about = None)]
struct Args {
    /// Path to a TOML config file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GovernorConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "request-governor starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        upstream = %config.upstream.address,
        roles = config.rate_limit.roles.len(),
        cache_routes = config.cache.routes.len(),
        admin_enabled = config.admin.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());

    HttpServer::new(config).run(listener, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
