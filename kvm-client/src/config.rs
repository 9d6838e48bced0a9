//! Client configuration: TOML file with a load-or-scaffold default,
//! mirroring `kvm-server`'s convention (itself grounded on
//! `CLI/src/config.rs`).

use anyhow::{anyhow, Context, Result};
use kvm_core::protocol::{ScreenPosition, StreamType};
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const TEMPLATE: &str = r#"# kvm-client configuration

server_addr = "192.168.1.10:7533"
screen_position = "left"
client_name = "left-desk"
screen_width = 1920
screen_height = 1080

# Substreams to request in addition to the command channel.
# Valid values: "mouse", "keyboard", "clipboard", "file"
additional_streams = ["mouse", "keyboard", "clipboard"]

wait_secs = 3
auto_reconnect = true
# max_errors = 5

[tuning]
max_chunk_size = 61440
heartbeat_interval_secs = 5
max_delay_tolerance_ms = 100
parallel_processors = 2

# Uncomment to require TLS when dialing the server.
# [tls]
# certfile = "/etc/kvm-client/ca.pem"
# insecure = false
"#;

#[derive(Debug, Deserialize)]
pub struct TlsEntry {
    /// CA certificate to trust in addition to the system/webpki roots.
    pub certfile: Option<String>,
    /// Skip server certificate verification entirely. Never default this
    /// on; it exists for lab setups without a real CA (spec.md §6 TLS).
    #[serde(default)]
    pub insecure: bool,
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

fn default_wait_secs() -> u64 {
    3
}
fn default_auto_reconnect() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct RawConfig {
    pub server_addr: String,
    pub screen_position: String,
    pub client_name: Option<String>,
    pub screen_width: u32,
    pub screen_height: u32,
    #[serde(default)]
    pub additional_streams: Vec<String>,
    #[serde(default = "default_wait_secs")]
    pub wait_secs: u64,
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,
    pub max_errors: Option<u32>,
    #[serde(default)]
    pub tuning: TuningEntry,
    pub tls: Option<TlsEntry>,
}

pub struct Config {
    pub server_addr: std::net::SocketAddr,
    pub screen_position: ScreenPosition,
    pub client_name: Option<String>,
    pub screen_width: u32,
    pub screen_height: u32,
    pub additional_streams: Vec<StreamType>,
    pub wait: Duration,
    pub auto_reconnect: bool,
    pub max_errors: Option<u32>,
    pub max_chunk_size: usize,
    pub heartbeat_interval: Duration,
    pub max_delay_tolerance: Duration,
    pub parallel_processors: usize,
    pub tls: Option<TlsEntry>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = std::env::current_dir()?.join("config.toml");
        if !path.exists() {
            std::fs::write(&path, TEMPLATE).context("failed to write default config")?;
            return Err(anyhow!("default config created at {path:?}; edit server_addr/screen_position and rerun"));
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).with_context(|| format!("failed to read {path:?}"))?;
        let raw: RawConfig = toml::from_str(&content).context("failed to parse config.toml")?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self> {
        let server_addr = raw.server_addr.parse().with_context(|| format!("invalid server_addr {:?}", raw.server_addr))?;
        let screen_position = ScreenPosition::from_str(&raw.screen_position).map_err(|e| anyhow!(e))?;

        let additional_streams = raw
            .additional_streams
            .iter()
            .map(|s| parse_stream_type(s))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            server_addr,
            screen_position,
            client_name: raw.client_name,
            screen_width: raw.screen_width,
            screen_height: raw.screen_height,
            additional_streams,
            wait: Duration::from_secs(raw.wait_secs),
            auto_reconnect: raw.auto_reconnect,
            max_errors: raw.max_errors,
            max_chunk_size: raw.tuning.max_chunk_size,
            heartbeat_interval: Duration::from_secs(raw.tuning.heartbeat_interval_secs),
            max_delay_tolerance: Duration::from_millis(raw.tuning.max_delay_tolerance_ms),
            parallel_processors: raw.tuning.parallel_processors,
            tls: raw.tls,
        })
    }
}

fn parse_stream_type(s: &str) -> Result<StreamType> {
    match s {
        "mouse" => Ok(StreamType::Mouse),
        "keyboard" => Ok(StreamType::Keyboard),
        "clipboard" => Ok(StreamType::Clipboard),
        "file" => Ok(StreamType::File),
        other => Err(anyhow!("unknown additional_streams entry {other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let raw: RawConfig = toml::from_str(
            r#"
            server_addr = "10.0.0.1:7533"
            screen_position = "left"
            screen_width = 1920
            screen_height = 1080
            additional_streams = ["mouse", "keyboard"]
            "#,
        )
        .unwrap();
        let config = Config::from_raw(raw).unwrap();
        assert_eq!(config.screen_position, ScreenPosition::Left);
        assert_eq!(config.additional_streams, vec![StreamType::Mouse, StreamType::Keyboard]);
        assert!(config.auto_reconnect);
    }

    #[test]
    fn rejects_unknown_stream_name() {
        let raw: RawConfig = toml::from_str(
            r#"
            server_addr = "10.0.0.1:7533"
            screen_position = "left"
            screen_width = 1920
            screen_height = 1080
            additional_streams = ["joystick"]
            "#,
        )
        .unwrap();
        assert!(Config::from_raw(raw).is_err());
    }
}
