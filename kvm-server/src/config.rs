//! Server configuration: TOML file with a load-or-scaffold default,
//! following `CLI/src/config.rs`'s convention of writing a commented
//! template and asking the operator to rerun.

use anyhow::{anyhow, Context, Result};
use kvm_core::protocol::ScreenPosition;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const TEMPLATE: &str = r#"# kvm-server configuration

bind_addr = "0.0.0.0:7533"
screen_width = 1920
screen_height = 1080

# One entry per neighbor whitelisted to connect.
[[peers]]
address = "192.168.1.50"
screen_position = "left"

# [[peers]]
# address = "192.168.1.51"
# screen_position = "right"

[tuning]
max_chunk_size = 61440
heartbeat_interval_secs = 5
max_delay_tolerance_ms = 100
parallel_processors = 2

# Uncomment to require TLS for every peer.
# [tls]
# certfile = "/etc/kvm-server/cert.pem"
# keyfile = "/etc/kvm-server/key.pem"
"#;

#[derive(Debug, Deserialize)]
pub struct PeerEntry {
    pub address: IpAddr,
    pub screen_position: String,
}

#[derive(Debug, Deserialize)]
pub struct TlsEntry {
    pub certfile: String,
    pub keyfile: String,
}

fn default_heartbeat_secs() -> u64 {
    5
}
fn default_max_chunk_size() -> usize {
    60 * 1024
}
fn default_max_delay_ms() -> u64 {
    100
}
fn default_parallel_processors() -> usize {
    2
}

#[derive(Debug, Deserialize)]
pub struct TuningEntry {
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_tolerance_ms: u64,
    #[serde(default = "default_parallel_processors")]
    pub parallel_processors: usize,
}

impl Default for TuningEntry {
    fn default() -> Self {
        Self {
            max_chunk_size: default_max_chunk_size(),
            heartbeat_interval_secs: default_heartbeat_secs(),
            max_delay_tolerance_ms: default_max_delay_ms(),
            parallel_processors: default_parallel_processors(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RawConfig {
    pub bind_addr: String,
    pub screen_width: u32,
    pub screen_height: u32,
    pub peers: Vec<PeerEntry>,
    #[serde(default)]
    pub tuning: TuningEntry,
    pub tls: Option<TlsEntry>,
}

/// Parsed, validated configuration ready for the server binary to act on.
pub struct Config {
    pub bind_addr: std::net::SocketAddr,
    pub screen_width: u32,
    pub screen_height: u32,
    pub whitelist: HashMap<IpAddr, ScreenPosition>,
    pub max_chunk_size: usize,
    pub heartbeat_interval: Duration,
    pub max_delay_tolerance: Duration,
    pub parallel_processors: usize,
    pub tls: Option<TlsEntry>,
}

impl Config {
    /// Load `config.toml` from the current working directory, scaffolding
    /// a commented template on first run (mirrors `CLI/src/config.rs`).
    pub fn load() -> Result<Self> {
        let path = std::env::current_dir()?.join("config.toml");
        if !path.exists() {
            std::fs::write(&path, TEMPLATE).context("failed to write default config")?;
            return Err(anyhow!("default config created at {path:?}; edit the peer whitelist and rerun"));
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).with_context(|| format!("failed to read {path:?}"))?;
        let raw: RawConfig = toml::from_str(&content).context("failed to parse config.toml")?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self> {
        let bind_addr = raw.bind_addr.parse().with_context(|| format!("invalid bind_addr {:?}", raw.bind_addr))?;

        let mut whitelist = HashMap::with_capacity(raw.peers.len());
        for peer in raw.peers {
            let position = ScreenPosition::from_str(&peer.screen_position)
                .map_err(|e| anyhow!("peer {}: {e}", peer.address))?;
            if whitelist.insert(peer.address, position).is_some() {
                return Err(anyhow!("duplicate whitelist entry for {}", peer.address));
            }
        }
        if whitelist.is_empty() {
            return Err(anyhow!("config.toml must whitelist at least one peer"));
        }

        Ok(Self {
            bind_addr,
            screen_width: raw.screen_width,
            screen_height: raw.screen_height,
            whitelist,
            max_chunk_size: raw.tuning.max_chunk_size,
            heartbeat_interval: Duration::from_secs(raw.tuning.heartbeat_interval_secs),
            max_delay_tolerance: Duration::from_millis(raw.tuning.max_delay_tolerance_ms),
            parallel_processors: raw.tuning.parallel_processors,
            tls: raw.tls,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let raw: RawConfig = toml::from_str(
            r#"
            bind_addr = "0.0.0.0:7533"
            screen_width = 1920
            screen_height = 1080
            [[peers]]
            address = "10.0.0.2"
            screen_position = "left"
            "#,
        )
        .unwrap();
        let config = Config::from_raw(raw).unwrap();
        assert_eq!(config.parallel_processors, 2);
        assert_eq!(config.whitelist.get(&"10.0.0.2".parse().unwrap()), Some(&ScreenPosition::Left));
    }

    #[test]
    fn rejects_duplicate_addresses() {
        let raw: RawConfig = toml::from_str(
            r#"
            bind_addr = "0.0.0.0:7533"
            screen_width = 1920
            screen_height = 1080
            [[peers]]
            address = "10.0.0.2"
            screen_position = "left"
            [[peers]]
            address = "10.0.0.2"
            screen_position = "right"
            "#,
        )
        .unwrap();
        assert!(Config::from_raw(raw).is_err());
    }

    #[test]
    fn rejects_unknown_screen_position() {
        let raw: RawConfig = toml::from_str(
            r#"
            bind_addr = "0.0.0.0:7533"
            screen_width = 1920
            screen_height = 1080
            [[peers]]
            address = "10.0.0.2"
            screen_position = "north"
            "#,
        )
        .unwrap();
        assert!(Config::from_raw(raw).is_err());
    }
}
