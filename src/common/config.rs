//! Configuration file handling

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use super::paths::config_path;
use super::Result;
use crate::control::Endpoint;

/// Main configuration structure
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Event listener settings
    #[serde(default)]
    pub listener: ListenerConfig,

    /// Control endpoint settings
    #[serde(default)]
    pub control: ControlConfig,

    /// Liveness monitor settings
    #[serde(default)]
    pub liveness: LivenessConfig,
}

/// Where the event ingestion server listens
#[derive(Debug, Deserialize, Clone)]
pub struct ListenerConfig {
    #[serde(default = "default_listener_host")]
    pub host: String,

    #[serde(default = "default_listener_port")]
    pub port: u16,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: default_listener_host(),
            port: default_listener_port(),
        }
    }
}

fn default_listener_host() -> String {
    "127.0.0.1".to_string()
}
fn default_listener_port() -> u16 {
    8910
}

/// Control endpoint defaults and timeouts
#[derive(Debug, Deserialize, Clone)]
pub struct ControlConfig {
    /// Host used until a breakpoint marker relocates the endpoint
    #[serde(default = "default_control_host")]
    pub host: String,

    /// Port used until a breakpoint marker relocates the endpoint
    #[serde(default = "default_control_port")]
    pub port: u16,

    /// Timeout for a single control command
    #[serde(default = "default_control_timeout")]
    pub timeout_secs: u64,

    /// Timeout for the best-effort resume sent on shutdown
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            host: default_control_host(),
            port: default_control_port(),
            timeout_secs: default_control_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

fn default_control_host() -> String {
    "localhost".to_string()
}
fn default_control_port() -> u16 {
    8911
}
fn default_control_timeout() -> u64 {
    10
}
fn default_shutdown_timeout() -> u64 {
    2
}

/// Liveness monitor configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LivenessConfig {
    /// Seconds between connected-client checks
    #[serde(default = "default_liveness_interval")]
    pub interval_secs: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_liveness_interval(),
        }
    }
}

fn default_liveness_interval() -> u64 {
    2
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        match config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| super::Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| super::Error::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot work with
    fn validate(&self) -> Result<()> {
        if self.liveness.interval_secs == 0 {
            return Err(super::Error::ConfigParse(
                "liveness.interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Address string the event listener binds to
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listener.host, self.listener.port)
    }

    /// Control endpoint used before any breakpoint handshake
    pub fn default_endpoint(&self) -> Endpoint {
        Endpoint::new(self.control.host.clone(), self.control.port)
    }

    pub fn control_timeout(&self) -> Duration {
        Duration::from_secs(self.control.timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.control.shutdown_timeout_secs)
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_secs(self.liveness.interval_secs)
    }
}
