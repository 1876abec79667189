//! Configuration for the uMeshFw CLI node.
//!
//! Loaded from TOML (default location under the user's config directory),
//! with every field defaulted so a bare `umeshfw run` works against the
//! loopback/UDP test MAC without a config file at all.

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Top-level uMeshFw node configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Local identity configuration.
    pub node: NodeConfig,
    /// UDP test-MAC transport configuration.
    pub network: NetworkConfig,
    /// Protocol tick cadences.
    #[serde(default)]
    pub cadence: CadenceConfig,
    /// Table capacities (§5 resource policy: fixed, never grown).
    #[serde(default)]
    pub capacity: CapacityConfig,
    /// File-transfer backend configuration.
    #[serde(default)]
    pub files: FilesConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where peer-initiated file transfers read/write from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesConfig {
    /// Directory files are served from and saved into.
    #[serde(default = "default_share_dir")]
    pub share_dir: PathBuf,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            share_dir: default_share_dir(),
        }
    }
}

fn default_share_dir() -> PathBuf {
    PathBuf::from(".")
}

/// Local node identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Path to the 32-byte X25519 identity secret key, hex-encoded.
    #[serde(default = "default_identity_file")]
    pub identity_file: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            identity_file: default_identity_file(),
        }
    }
}

/// UDP transport standing in for the real radio MAC (§6, §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Local UDP socket address to bind.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    /// Peer addresses this node's broadcast domain reaches. Every outbound
    /// frame, broadcast or unicast, is sent to each of these; the frame's
    /// own TID addressing (§4.4) does the rest, the way a shared radio
    /// channel would.
    #[serde(default)]
    pub peers: Vec<SocketAddr>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            peers: Vec::new(),
        }
    }
}

/// Tick cadences for each protocol's `step()`, in milliseconds (§4.3, §4.6,
/// §4.8, C11). Defaults match the values the protocol crates were designed
/// against; changing them is safe but untested outside those defaults.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CadenceConfig {
    /// Discovery task step cadence.
    #[serde(default = "default_discovery_ms")]
    pub discovery_ms: u32,
    /// Key manager step cadence.
    #[serde(default = "default_keymgr_ms")]
    pub keymgr_ms: u32,
    /// File-transfer table step cadence.
    #[serde(default = "default_files_ms")]
    pub files_ms: u32,
    /// Status broadcaster step cadence (the broadcaster throttles itself
    /// further to its own 5 s interval; this is just how often `step` is
    /// called).
    #[serde(default = "default_status_ms")]
    pub status_ms: u32,
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            discovery_ms: default_discovery_ms(),
            keymgr_ms: default_keymgr_ms(),
            files_ms: default_files_ms(),
            status_ms: default_status_ms(),
        }
    }
}

/// Fixed table sizes for the session tables this node owns.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CapacityConfig {
    /// Neighbour table slots.
    #[serde(default = "default_neighbour_capacity")]
    pub neighbours: usize,
    /// Key-manager session slots.
    #[serde(default = "default_keymgr_capacity")]
    pub key_sessions: usize,
    /// File-transfer session slots.
    #[serde(default = "default_file_capacity")]
    pub file_sessions: usize,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            neighbours: default_neighbour_capacity(),
            key_sessions: default_keymgr_capacity(),
            file_sessions: default_file_capacity(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing-subscriber` env-filter directive, e.g. `"info"` or
    /// `"umesh_keymgr=debug,info"`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_identity_file() -> PathBuf {
    config_dir().join("identity.hex")
}

fn default_listen_addr() -> SocketAddr {
    "0.0.0.0:7420".parse().expect("valid default socket address")
}

fn default_discovery_ms() -> u32 {
    umesh_discovery::discovery::STEP_INTERVAL_MS
}

fn default_keymgr_ms() -> u32 {
    umesh_keymgr::session::STEP_INTERVAL_MS
}

fn default_files_ms() -> u32 {
    umesh_files::session::STEP_INTERVAL_MS
}

fn default_status_ms() -> u32 {
    umesh_core::status::STEP_INTERVAL_MS
}

fn default_neighbour_capacity() -> usize {
    16
}

fn default_keymgr_capacity() -> usize {
    8
}

fn default_file_capacity() -> usize {
    4
}

fn default_log_level() -> String {
    "info".to_string()
}

/// The directory config/identity files live under by default
/// (`$XDG_CONFIG_HOME/umeshfw`, falling back to the platform default).
fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("umeshfw")
}

impl Config {
    /// Default config file path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        config_dir().join("config.toml")
    }

    /// Load from `path`, or fall back to defaults if the file doesn't exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Write this config to `path`, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self)?;
        fs::write(path, text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let cfg = Config::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.network.listen_addr, cfg.network.listen_addr);
        assert_eq!(parsed.cadence.discovery_ms, cfg.cadence.discovery_ms);
    }

    #[test]
    fn load_missing_file_falls_back_to_defaults() {
        let cfg = Config::load(Path::new("/nonexistent/umeshfw-config.toml")).unwrap();
        assert_eq!(cfg.capacity.neighbours, default_neighbour_capacity());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut cfg = Config::default();
        cfg.network.peers.push("127.0.0.1:9000".parse().unwrap());
        cfg.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.network.peers, cfg.network.peers);
    }
}
