//! Daemon-specific settings layered on top of [`swarmlink_core::config::Config`]
//! (system specification §6). The shared `Config` type describes transfer
//! behavior that both a library embedder and this daemon care about; the
//! daemon additionally needs a peer identity, bind addresses, a content
//! directory, and an optional coordinator URL, none of which belong on the
//! shared type. This mirrors the teacher's split between `nyx-core`'s
//! `Config` and `nyx-daemon`'s own `DaemonConfig` wrapper: one `[daemon]`
//! table alongside the fields `Config::from_toml_str` already knows how to
//! parse, with serde ignoring the table it doesn't recognize and vice versa.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{net::SocketAddr, path::PathBuf};

fn default_bind_addr() -> SocketAddr {
    "0.0.0.0:9910".parse().unwrap()
}

fn default_http_addr() -> SocketAddr {
    "127.0.0.1:9911".parse().unwrap()
}

fn default_content_dir() -> PathBuf {
    PathBuf::from("./content")
}

#[derive(Debug, Clone, Deserialize)]
pub struct DaemonSettings {
    /// Stable identity to advertise; a random one is generated if omitted.
    #[serde(default)]
    pub peer_id: Option<String>,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
    #[serde(default = "default_content_dir")]
    pub content_dir: PathBuf,
    /// Base URL of an `HttpCoordinationStore`-compatible coordinator. When
    /// absent, the daemon falls back to an in-process `InMemoryCoordinationStore`,
    /// which only lets this node relay/rendezvous with peers it runs itself
    /// (tests, single-host demos).
    #[serde(default)]
    pub coordinator_url: Option<String>,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            peer_id: None,
            bind_addr: default_bind_addr(),
            http_addr: default_http_addr(),
            content_dir: default_content_dir(),
            coordinator_url: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DaemonSettingsFile {
    #[serde(default)]
    daemon: DaemonSettings,
}

/// Reads the `[daemon]` table out of the same TOML file
/// `swarmlink_core::config::Config::load` reads the rest of; unknown tables
/// (the transfer-tuning fields `Config` owns) are simply ignored by serde.
pub fn load_daemon_settings(path: &std::path::Path) -> Result<DaemonSettings> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let file: DaemonSettingsFile = toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    Ok(file.daemon)
}
