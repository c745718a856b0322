//! MWS server
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────────────┐
//!                      │                        MWS SERVER                         │
//!                      │                                                           │
//!   Client Request     │  ┌─────────┐   ┌──────────┐   ┌──────────┐   ┌────────┐  │
//!   ───────────────────┼─▶│   net   │──▶│   http   │──▶│ security │──▶│routing │  │
//!   HTTP/1.1 or h2c    │  │listener │   │ streamer │   │auth gate │   │matcher │  │
//!                      │  └─────────┘   └──────────┘   └──────────┘   └───┬────┘  │
//!                      │                                                  │       │
//!                      │                                                  ▼       │
//!   Client Response    │  ┌──────────┐   ┌──────────────────────────────────────┐ │
//!   ◀──────────────────┼──│ streamer │◀──│ handler chain (root → leaf, routes/) │ │
//!                      │  └──────────┘   └──────────────────────────────────────┘ │
//!                      │                                                           │
//!                      │  config · observability · lifecycle                      │
//!                      └──────────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use mws_server::config::{load_config, ServerConfig};
use mws_server::http::HttpServer;
use mws_server::lifecycle::{build_application, signals, Shutdown};
use mws_server::net::Listener;
use mws_server::observability::{logging, metrics};
use mws_server::routes::UnavailableProtocol;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "mws-server", version, about = "Multi-wiki web server")]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(short, long)]
    bind: Option<SocketAddr>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind.to_string();
    }

    logging::init_logging(&config.observability.log_level);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(config))
}

async fn run(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("mws-server v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        max_body_size = config.security.max_body_size,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let app = build_application(&config, Arc::new(UnavailableProtocol))?;

    let addr: SocketAddr = config.listener.bind_address.parse()?;
    let listener = Listener::bind(addr, config.listener.max_connections).await?;

    let shutdown = Shutdown::new();
    tokio::spawn(signals::shutdown_on_signal(shutdown.clone()));

    HttpServer::new(app.router).run(listener, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
