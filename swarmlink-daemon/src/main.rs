//! Long-running swarmlink node process (system specification §6), grounded
//! on `nyx_daemon::main`'s shape: parse a config path, build the long-lived
//! subsystems once, spawn the chunk-serving listener and the HTTP control
//! surface as background tasks, then block until shutdown is requested.

mod config;
mod content;
mod coordination;
mod http;
mod metrics;

use anyhow::{Context, Result};
use clap::Parser;
use config::{load_daemon_settings, DaemonSettings};
use content::DirectoryContentSource;
use coordination::AnyCoordinationStore;
use http::router;
use metrics::MetricsCollector;
use std::{path::PathBuf, sync::Arc};
use swarmlink_core::{config::ConfigWatcher, PeerIdentity};
use swarmlink_discovery::local_multicast::{DEFAULT_GROUP, DEFAULT_PORT};
use swarmlink_discovery::{CoordBackend, DhtBackend, DiscoveryBackend, LocalMulticastBackend, PexBackend};
use swarmlink_scheduler::{ChokeController, ChokeMode};
use swarmlink_sdk::{serve, Node};
use swarmlink_signal::InMemoryContentDirectory;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Long-running swarmlink node: discovery, NAT traversal, and an HTTP control surface")]
struct Cli {
    /// Path to a TOML file with the shared transfer config plus a `[daemon]` table.
    #[arg(long, default_value = "swarmlink.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let config_watcher = ConfigWatcher::start(&cli.config).with_context(|| format!("loading {}", cli.config.display()))?;
    let config = config_watcher.current();
    let settings: DaemonSettings = load_daemon_settings(&cli.config).unwrap_or_default();

    let self_id = settings.peer_id.clone().map(PeerIdentity::new).unwrap_or_else(PeerIdentity::generate);
    info!(%self_id, bind_addr = %settings.bind_addr, http_addr = %settings.http_addr, "starting swarmlink-daemon");

    let store = Arc::new(AnyCoordinationStore::from_settings(settings.coordinator_url.as_deref()));
    let directory = Arc::new(InMemoryContentDirectory::new());

    let mut backends: Vec<Arc<dyn DiscoveryBackend>> = Vec::new();
    if config.enable_dht {
        backends.push(Arc::new(DhtBackend::new(self_id.clone(), settings.bind_addr.port(), config.shard.shard_prefixes.clone())));
    }
    if config.enable_pex {
        backends.push(Arc::new(PexBackend::new()));
    }
    if config.enable_local {
        match LocalMulticastBackend::bind(self_id.clone(), DEFAULT_GROUP, DEFAULT_PORT).await {
            Ok(backend) => backends.push(Arc::new(backend)),
            Err(e) => warn!(error = %e, "failed to bind local multicast discovery, continuing without it"),
        }
    }
    if config.enable_coord {
        backends.push(Arc::new(CoordBackend::new(directory, self_id.clone(), settings.bind_addr.to_string())));
    }

    std::fs::create_dir_all(&settings.content_dir).with_context(|| format!("creating {}", settings.content_dir.display()))?;

    let node = Arc::new(Node::new(self_id.clone(), config.clone(), store, settings.bind_addr, backends));
    node.start().await;

    let mut choke = ChokeController::with_defaults(ChokeMode::Normal);
    choke.start();
    let choke = Arc::new(choke);

    let metrics = Arc::new(MetricsCollector::new());
    let content = DirectoryContentSource::with_metrics(metrics.clone());

    let serve_content = content.clone();
    let serve_choke = choke.clone();
    let serve_addr = settings.bind_addr;
    tokio::spawn(async move {
        if let Err(e) = serve(serve_addr, serve_content, serve_choke).await {
            warn!(error = %e, "content serving listener exited");
        }
    });

    let app_state = http::AppState::new(node.clone(), content, metrics);
    let app = router(app_state);
    let listener = tokio::net::TcpListener::bind(settings.http_addr).await.with_context(|| format!("binding {}", settings.http_addr))?;
    info!(http_addr = %settings.http_addr, "http control surface listening");

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!(error = %e, "http control surface exited");
        }
    });

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutting down");
    server.abort();
    node.stop().await;

    Ok(())
}
