// src/config.rs

//! Manages server configuration: loading from TOML, defaults and validation.

use crate::core::protocol::codec::DEFAULT_MAX_FRAME_SIZE;
use crate::core::protocol::frame::MAX_SHORT_PAYLOAD;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use tracing::warn;

/// Configuration for the Prometheus metrics exporter.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MetricsConfig {
    /// If true, an HTTP server will be started to expose Prometheus metrics.
    #[serde(default)]
    pub enabled: bool,
    /// The port for the Prometheus metrics server.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

fn default_metrics_port() -> u16 {
    8991
}

/// A raw representation of the config file before validation.
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default = "default_max_clients")]
    max_clients: usize,
    #[serde(default = "default_max_frame_size")]
    max_frame_size: usize,
    #[serde(default)]
    metrics: MetricsConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8990
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_clients() -> usize {
    10_000
}
fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}

/// The fully resolved server configuration.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    /// Connections beyond this count are dropped at accept time.
    pub max_clients: usize,
    /// Largest inbound frame payload, in bytes.
    pub max_frame_size: usize,
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            max_clients: default_max_clients(),
            max_frame_size: default_max_frame_size(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        Self::from_toml_str(&contents).with_context(|| format!("Invalid config in '{path}'"))
    }

    /// Parses and validates configuration from TOML text. Missing keys take defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let raw_config: RawConfig =
            toml::from_str(contents).context("Failed to parse TOML configuration")?;

        let config = Config {
            host: raw_config.host,
            port: raw_config.port,
            log_level: raw_config.log_level,
            max_clients: raw_config.max_clients,
            max_frame_size: raw_config.max_frame_size,
            metrics: raw_config.metrics,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the resolved configuration to ensure logical consistency.
    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("port cannot be 0"));
        }
        if self.host.trim().is_empty() {
            return Err(anyhow!("host cannot be empty"));
        }
        if self.max_clients == 0 {
            return Err(anyhow!("max_clients cannot be 0"));
        }
        if self.max_frame_size < MAX_SHORT_PAYLOAD {
            return Err(anyhow!(
                "max_frame_size must be at least {MAX_SHORT_PAYLOAD} bytes"
            ));
        }
        if self.metrics.enabled && self.metrics.port == self.port {
            return Err(anyhow!(
                "metrics.port cannot be the same as the server port ({})",
                self.port
            ));
        }
        if self.max_frame_size > 256 * 1024 * 1024 {
            warn!(
                "max_frame_size of {} bytes is very large; every frame is buffered in memory.",
                self.max_frame_size
            );
        }
        Ok(())
    }
}
