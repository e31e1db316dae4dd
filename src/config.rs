//! Hub configuration loaded from environment variables

use crate::error::HubError;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Default port; the face service pushes match events to `:3001/api/push`
pub const DEFAULT_PORT: u16 = 3001;

#[derive(Debug, Clone, PartialEq)]
pub struct HubConfig {
    pub bind_addr: IpAddr,
    pub port: u16,
    /// Period of the liveness (ping) sweep
    pub heartbeat_interval: Duration,
    /// Period of the idle sweep
    pub idle_sweep_interval: Duration,
    /// Connections without application traffic for longer than this are evicted
    pub idle_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            heartbeat_interval: Duration::from_secs(30),
            idle_sweep_interval: Duration::from_secs(60),
            idle_timeout: Duration::from_secs(120),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparseable environment variable");
            None
        }
    }
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_secs)
}

impl HubConfig {
    /// Load config from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let config = Self {
            bind_addr: env_parse("HUB_BIND_ADDR").unwrap_or(defaults.bind_addr),
            port: env_parse("HUB_PORT").unwrap_or(defaults.port),
            heartbeat_interval: env_secs("HUB_HEARTBEAT_INTERVAL_SECS")
                .unwrap_or(defaults.heartbeat_interval),
            idle_sweep_interval: env_secs("HUB_IDLE_SWEEP_INTERVAL_SECS")
                .unwrap_or(defaults.idle_sweep_interval),
            idle_timeout: env_secs("HUB_IDLE_TIMEOUT_SECS").unwrap_or(defaults.idle_timeout),
        };

        tracing::info!(
            addr = %config.socket_addr(),
            heartbeat_secs = config.heartbeat_interval.as_secs(),
            idle_sweep_secs = config.idle_sweep_interval.as_secs(),
            idle_timeout_secs = config.idle_timeout.as_secs(),
            "Hub config loaded"
        );

        config
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    pub fn validate(&self) -> Result<(), HubError> {
        if self.heartbeat_interval.is_zero() {
            return Err(HubError::InvalidConfig(
                "heartbeat interval must be non-zero".to_string(),
            ));
        }
        if self.idle_sweep_interval.is_zero() {
            return Err(HubError::InvalidConfig(
                "idle sweep interval must be non-zero".to_string(),
            ));
        }
        if self.idle_timeout.is_zero() {
            return Err(HubError::InvalidConfig(
                "idle timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
