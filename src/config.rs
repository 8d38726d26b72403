//! Service configuration.
//!
//! Loaded from a YAML file; every field has a default so a minimal file (or
//! an empty one) is enough to run locally.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level configuration for the devmon service.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Logging verbosity (debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Ingest API configuration.
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Prometheus health metrics server configuration.
    #[serde(default)]
    pub health: HealthConfig,
}

/// Ingest API configuration.
#[derive(Debug, Deserialize)]
pub struct IngestConfig {
    /// Listen address for the device-facing REST API.
    #[serde(default = "default_ingest_address")]
    pub address: String,

    /// Path to the JSON Schema every submission is validated against.
    #[serde(default = "default_schema_path")]
    pub schema_path: PathBuf,
}

/// Health metrics server configuration.
#[derive(Debug, Deserialize)]
pub struct HealthConfig {
    /// Listen address for /metrics and /healthz.
    #[serde(default = "default_health_addr")]
    pub addr: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_ingest_address() -> String {
    "0.0.0.0:50000".to_string()
}

fn default_schema_path() -> PathBuf {
    PathBuf::from("etc/measurement.schema.json")
}

fn default_health_addr() -> String {
    "127.0.0.1:9090".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            ingest: IngestConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            address: default_ingest_address(),
            schema_path: default_schema_path(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            addr: default_health_addr(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.ingest.address.is_empty() {
            bail!("ingest.address is required");
        }

        if self.ingest.schema_path.as_os_str().is_empty() {
            bail!("ingest.schema_path is required");
        }

        if self.health.addr.is_empty() {
            bail!("health.addr is required");
        }

        Ok(())
    }
}
