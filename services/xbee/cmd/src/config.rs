//! Configuration handling for the XBee host.
//!
//! Settings come from a YAML file, then environment variables, then the
//! command line. A missing or unreadable file falls back to defaults.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};
use xbee_session::{CoordinatorConfig, DEFAULT_BAUD_RATE};

/// Host configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct XbeeConfig {
    /// Serial device the coordinator is attached to
    pub port: String,
    /// Serial bit rate
    pub baud_rate: u32,
    /// Retries per request/response exchange
    pub retries: u32,
    /// Bound on one wait for a reply (milliseconds)
    pub read_timeout_ms: u64,
    /// Discovery window (milliseconds); read from the radio when absent
    pub discovery_window_ms: Option<u64>,
    /// Stop a scan after this many devices
    pub max_devices: Option<usize>,
    /// Read versions of every discovered device
    pub query_versions: bool,
}

impl Default for XbeeConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            retries: 3,
            read_timeout_ms: 1000,
            discovery_window_ms: None,
            max_devices: None,
            query_versions: false,
        }
    }
}

impl XbeeConfig {
    /// Load configuration from file and environment variables.
    ///
    /// The result is not validated; command line flags may still replace
    /// values, so callers validate once everything is applied.
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let path = config_path.as_ref();
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => match serde_yaml::from_str::<XbeeConfig>(&content) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", path);
                    config
                }
                Err(e) => {
                    warn!("Failed to parse config file {:?}, using defaults: {}", path, e);
                    Self::default()
                }
            },
            Err(_) => {
                warn!("Config file {:?} not found, using defaults", path);
                Self::default()
            }
        };

        config.apply_environment_overrides();

        info!(
            "Final configuration: port={}, baud_rate={}, retries={}, read_timeout={}ms",
            config.port, config.baud_rate, config.retries, config.read_timeout_ms
        );
        Ok(config)
    }

    /// Apply environment variable overrides
    pub fn apply_environment_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("XBEE_PORT") {
            info!("Serial port overridden by environment: {}", port);
            self.port = port;
        }

        if let Some(baud_rate) = lookup("XBEE_BAUD_RATE") {
            if let Ok(baud_rate) = baud_rate.parse::<u32>() {
                self.baud_rate = baud_rate;
                info!("Baud rate overridden by environment: {}", baud_rate);
            }
        }

        if let Some(retries) = lookup("XBEE_RETRIES") {
            if let Ok(retries) = retries.parse::<u32>() {
                self.retries = retries;
                info!("Retries overridden by environment: {}", retries);
            }
        }

        if let Some(timeout) = lookup("XBEE_READ_TIMEOUT_MS") {
            if let Ok(timeout) = timeout.parse::<u64>() {
                self.read_timeout_ms = timeout;
                info!("Read timeout overridden by environment: {}ms", timeout);
            }
        }

        if let Some(window) = lookup("XBEE_DISCOVERY_WINDOW_MS") {
            if let Ok(window) = window.parse::<u64>() {
                self.discovery_window_ms = Some(window);
                info!("Discovery window overridden by environment: {}ms", window);
            }
        }
    }

    /// Reject settings the coordinator cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.port.trim().is_empty() {
            bail!("serial port must not be empty");
        }
        if self.baud_rate == 0 {
            bail!("baud rate must be positive");
        }
        if self.read_timeout_ms == 0 {
            bail!("read timeout must be positive");
        }
        Ok(())
    }

    /// Discovery window, if one is configured
    pub fn discovery_window(&self) -> Option<Duration> {
        self.discovery_window_ms.map(Duration::from_millis)
    }

    /// Coordinator settings; `discovery_window` is used when none is configured
    pub fn coordinator_config(&self, discovery_window: Duration) -> CoordinatorConfig {
        CoordinatorConfig {
            retries: self.retries,
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            discovery_window: self.discovery_window().unwrap_or(discovery_window),
            max_devices: self.max_devices,
            query_versions: self.query_versions,
        }
    }
}
