//! Load config from file and environment.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use ttt_core::settings::{
    DEFAULT_ANNOUNCE_INTERVAL, DEFAULT_CLIENT_PORT, DEFAULT_MAX_DATAGRAM_SIZE, DEFAULT_TICK_INTERVAL,
};
use ttt_core::{InfoHash, Settings, TunnelSettings};

/// Host configuration. File: ~/.config/ttt/config.toml or /etc/ttt/config.toml.
/// Env overrides: TTT_TICK_INTERVAL_MS, TTT_ANNOUNCE_INTERVAL, TTT_CLIENT_HOST, TTT_CLIENT_PORT,
/// TTT_LOG_LEVEL.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Scheduler cadence in milliseconds (default 5).
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Fallback log filter when RUST_LOG is unset (default "info").
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Torrents owned by the local client, seeded into the directory at startup.
    #[serde(default)]
    pub torrents: Vec<InfoHash>,
    #[serde(default)]
    pub announce: AnnounceConfig,
    #[serde(default)]
    pub tunnel: TunnelConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnnounceConfig {
    /// Seconds between two announces to the same peer (default 30).
    #[serde(default = "default_announce_interval_secs")]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TunnelConfig {
    #[serde(default = "default_port_range_start")]
    pub port_range_start: u16,
    /// Exclusive.
    #[serde(default = "default_port_range_end")]
    pub port_range_end: u16,
    #[serde(default = "default_bind_host")]
    pub bind_host: String,
    #[serde(default = "default_client_host")]
    pub client_host: String,
    #[serde(default = "default_client_port")]
    pub client_port: u16,
    #[serde(default = "default_max_datagram_size")]
    pub max_datagram_size: usize,
    #[serde(default = "default_accept_unreliable")]
    pub accept_unreliable: bool,
}

fn default_tick_interval_ms() -> u64 {
    DEFAULT_TICK_INTERVAL.as_millis() as u64
}
fn default_log_level() -> String {
    "info".into()
}
fn default_announce_interval_secs() -> u64 {
    DEFAULT_ANNOUNCE_INTERVAL.as_secs()
}
fn default_port_range_start() -> u16 {
    20000
}
fn default_port_range_end() -> u16 {
    60000
}
fn default_bind_host() -> String {
    "0.0.0.0".into()
}
fn default_client_host() -> String {
    "localhost".into()
}
fn default_client_port() -> u16 {
    DEFAULT_CLIENT_PORT
}
fn default_max_datagram_size() -> usize {
    DEFAULT_MAX_DATAGRAM_SIZE
}
fn default_accept_unreliable() -> bool {
    false
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            log_level: default_log_level(),
            torrents: Vec::new(),
            announce: AnnounceConfig::default(),
            tunnel: TunnelConfig::default(),
        }
    }
}

impl Default for AnnounceConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_announce_interval_secs(),
        }
    }
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            port_range_start: default_port_range_start(),
            port_range_end: default_port_range_end(),
            bind_host: default_bind_host(),
            client_host: default_client_host(),
            client_port: default_client_port(),
            max_datagram_size: default_max_datagram_size(),
            accept_unreliable: default_accept_unreliable(),
        }
    }
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&s)
    }

    /// Apply overrides from `lookup` (the process environment in [`load`]).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(s) = lookup("TTT_TICK_INTERVAL_MS") {
            self.tick_interval_ms = parse_env("TTT_TICK_INTERVAL_MS", &s)?;
        }
        if let Some(s) = lookup("TTT_ANNOUNCE_INTERVAL") {
            self.announce.interval_secs = parse_env("TTT_ANNOUNCE_INTERVAL", &s)?;
        }
        if let Some(s) = lookup("TTT_CLIENT_HOST") {
            self.tunnel.client_host = s;
        }
        if let Some(s) = lookup("TTT_CLIENT_PORT") {
            self.tunnel.client_port = parse_env("TTT_CLIENT_PORT", &s)?;
        }
        if let Some(s) = lookup("TTT_LOG_LEVEL") {
            self.log_level = s;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("tick_interval_ms must be > 0".into()));
        }
        if self.announce.interval_secs == 0 {
            return Err(ConfigError::Invalid("announce.interval_secs must be > 0".into()));
        }
        if self.tunnel.port_range_start >= self.tunnel.port_range_end {
            return Err(ConfigError::Invalid(format!(
                "empty tunnel port range {}..{}",
                self.tunnel.port_range_start, self.tunnel.port_range_end
            )));
        }
        if self.tunnel.max_datagram_size == 0 {
            return Err(ConfigError::Invalid("tunnel.max_datagram_size must be > 0".into()));
        }
        Ok(())
    }

    /// Settings the registry is built from.
    pub fn core(&self) -> Result<Settings, ConfigError> {
        self.validate()?;
        let bind_ip: IpAddr = self.tunnel.bind_host.parse().map_err(|_| {
            ConfigError::Invalid(format!("tunnel.bind_host {:?} is not an IP address", self.tunnel.bind_host))
        })?;
        Ok(Settings {
            tick_interval: Duration::from_millis(self.tick_interval_ms),
            announce_interval: Duration::from_secs(self.announce.interval_secs),
            tunnel: TunnelSettings {
                port_range: self.tunnel.port_range_start..self.tunnel.port_range_end,
                bind_ip,
                client_host: self.tunnel.client_host.clone(),
                client_port: self.tunnel.client_port,
                max_datagram_size: self.tunnel.max_datagram_size,
                accept_unreliable: self.tunnel.accept_unreliable,
            },
        })
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{name}={value:?} is not a valid number")))
}

/// Load config: merge default, then `path` or the first config file found, then env vars.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut c = match path {
        Some(p) => Config::load_from(p)?,
        None => match config_paths().into_iter().find(|p| p.exists()) {
            Some(p) => Config::load_from(&p)?,
            None => Config::default(),
        },
    };
    c.apply_env(|k| std::env::var(k).ok())?;
    c.validate()?;
    Ok(c)
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/ttt/config.toml"));
    }
    out.push(PathBuf::from("/etc/ttt/config.toml"));
    out
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
