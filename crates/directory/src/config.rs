use anyhow::{Context, Result};
use config::{Config, File as ConfigFile};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const ENV_PREFIX: &str = "SHARENET_DIRECTORY";

/// Runtime settings for the directory service.
///
/// Resolved in order: built-in defaults, optional TOML file, `SHARENET_DIRECTORY_*`
/// environment variables, then command-line overrides applied by the binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    pub host: String,
    pub port: u16,
    pub sweep_interval_secs: u64,
    pub offline_threshold_secs: u64,
    pub stats_interval_secs: u64,
    pub observer_buffer: usize,
    pub search_limit: usize,
    pub log_level: String,
    pub log_format: String,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            sweep_interval_secs: 30,
            offline_threshold_secs: 300,
            stats_interval_secs: 10,
            observer_buffer: sharenet_notify::DEFAULT_OBSERVER_BUFFER,
            search_limit: sharenet_registry::DEFAULT_SEARCH_LIMIT,
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

impl DirectoryConfig {
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder().add_source(
            Config::try_from(&Self::default()).context("failed to seed configuration defaults")?,
        );

        if let Some(path) = config_path {
            if !path.exists() {
                anyhow::bail!(
                    "Configuration file {} not found (specified via --config)",
                    path.display()
                );
            }
            builder = builder.add_source(ConfigFile::from(path));
        }

        builder = builder.add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true));

        builder
            .build()?
            .try_deserialize()
            .context("invalid directory configuration")
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            anyhow::bail!("host must not be empty");
        }
        if self.port == 0 {
            anyhow::bail!("port must be greater than zero");
        }
        if self.sweep_interval_secs == 0 || self.stats_interval_secs == 0 {
            anyhow::bail!("sweep and stats intervals must be greater than zero");
        }
        if self.offline_threshold_secs == 0 {
            anyhow::bail!("offline_threshold_secs must be greater than zero");
        }
        if self.search_limit == 0 {
            anyhow::bail!("search_limit must be greater than zero");
        }
        if !matches!(self.log_format.as_str(), "pretty" | "json") {
            anyhow::bail!("log_format must be 'pretty' or 'json', got '{}'", self.log_format);
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn offline_threshold(&self) -> Duration {
        Duration::from_secs(self.offline_threshold_secs)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }
}
