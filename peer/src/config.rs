//! Configuration management for the peer runtime.

use std::env;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default port of the embedded peer server.
pub const DEFAULT_PORT: u16 = 8787;

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Interface the peer server binds
    pub host: IpAddr,
    /// Peer server port from `PEER_PORT`, also the default discovery port
    pub port: Option<u16>,
    /// Fixed bearer token; generated and persisted when unset
    pub token: Option<String>,
    /// SQLite connection URL
    pub database_url: String,
    /// Device settings file
    pub settings_path: PathBuf,
    pub monitor_interval: Duration,
    /// Port scanned during LAN discovery
    pub discovery_port: u16,
    /// Whether this device serves its store to peers
    pub serve: bool,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let host = lookup("HOST")
            .unwrap_or_else(|| "0.0.0.0".to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("HOST"))?;

        let port = lookup("PEER_PORT")
            .map(|value| value.trim().parse().map_err(|_| ConfigError::Invalid("PEER_PORT")))
            .transpose()?;
        let token = lookup("PEER_TOKEN").filter(|t| !t.trim().is_empty());

        let database_url =
            lookup("DATABASE_URL").unwrap_or_else(|| "sqlite://tether.db".to_string());
        let settings_path = lookup("SETTINGS_PATH")
            .unwrap_or_else(|| "tether-settings.json".to_string())
            .into();

        let monitor_interval = Duration::from_secs(parse_or(&lookup, "MONITOR_INTERVAL_SECS", 30)?);
        if monitor_interval.is_zero() {
            return Err(ConfigError::Invalid("MONITOR_INTERVAL_SECS"));
        }

        let discovery_port =
            parse_or(&lookup, "DISCOVERY_PORT", port.unwrap_or(DEFAULT_PORT))?;

        let serve = match lookup("PEER_SERVE").as_deref().map(str::trim) {
            None | Some("") => true,
            Some("1" | "true" | "yes" | "on") => true,
            Some("0" | "false" | "no" | "off") => false,
            Some(_) => return Err(ConfigError::Invalid("PEER_SERVE")),
        };

        Ok(Self {
            host,
            port,
            token,
            database_url,
            settings_path,
            monitor_interval,
            discovery_port,
            serve,
        })
    }

    /// Port to serve on: `PEER_PORT`, else the port saved by the last run,
    /// else [`DEFAULT_PORT`].
    pub fn server_port(&self, saved: Option<u16>) -> u16 {
        self.port.or(saved).unwrap_or(DEFAULT_PORT)
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        None => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid {0} value")]
    Invalid(&'static str),
}
