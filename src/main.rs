//! Whiteboard router server.
//!
//! Loads the configuration, registers the declared contexts and handlers,
//! and serves requests through the whiteboard until a stop signal arrives.
//!
//! # Architecture Overview
//!
//! ```text
//!   config.toml ──▶ loader/validation ──▶ Provisioner ──▶ Whiteboard
//!        │                                     ▲           │  (contexts, servlets,
//!        └── watcher (notify) ── reloads ──────┘           │   filters, error pages,
//!                                                          │   aliases)
//!   Client ──▶ axum (request id, trace, timeout) ──────────┤
//!                 │                                        ▼
//!                 ├── /admin/* ──▶ runtime DTO       RoutingSnapshot (ArcSwap)
//!                 └── fallback ──▶ dispatch → filter chain → error pages
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use whiteboard_router::config::{load_config, ConfigWatcher, WhiteboardConfig};
use whiteboard_router::lifecycle::{spawn_signal_handler, Shutdown};
use whiteboard_router::observability::{init_logging, init_metrics};
use whiteboard_router::provision::Provisioner;
use whiteboard_router::{HttpServer, Whiteboard};

#[derive(Parser)]
#[command(name = "whiteboard-router")]
#[command(about = "HTTP whiteboard routing server", long_about = None)]
struct Args {
    /// TOML configuration file; built-in defaults when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Reload handler tables when the configuration file changes.
    #[arg(long)]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => WhiteboardConfig::default(),
    };

    init_logging(&config.logging)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "whiteboard-router starting");
    tracing::info!(
        bind_address = %config.server.bind_address,
        shadow_policy = ?config.registry.shadow_policy,
        contexts = config.contexts.len(),
        servlets = config.servlets.len(),
        filters = config.filters.len(),
        "Configuration loaded"
    );

    if config.metrics.enabled {
        match config.metrics.address.parse() {
            Ok(addr) => init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.metrics.address,
                "Failed to parse metrics address"
            ),
        }
    }

    let whiteboard = Arc::new(Whiteboard::new(config.registry.shadow_policy));
    let provisioner = Arc::new(Provisioner::new(whiteboard.clone()));
    let report = provisioner.apply(&config);
    if !report.rejected.is_empty() {
        tracing::warn!(rejected = report.rejected.len(), "Some configured entries were rejected");
    }

    let shutdown = Shutdown::new();
    spawn_signal_handler(&shutdown);

    // Kept alive for the lifetime of the server
    let _watcher = match (&args.config, args.watch) {
        (Some(path), true) => {
            let (watcher, mut updates) = ConfigWatcher::new(path);
            let provisioner = provisioner.clone();
            let mut stop = shutdown.subscribe();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        Some(config) = updates.recv() => {
                            provisioner.apply(&config);
                        }
                        _ = stop.recv() => break,
                        else => break,
                    }
                }
            });
            Some(watcher.run()?)
        }
        _ => None,
    };

    let listener = TcpListener::bind(&config.server.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server = HttpServer::new(whiteboard.clone(), &config);
    server.run(listener, &shutdown).await?;

    whiteboard.shutdown()?;
    tracing::info!("Shutdown complete");
    Ok(())
}
