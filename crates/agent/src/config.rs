use anyhow::{Context, Result};
use config::{Config, File as ConfigFile};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "SHARENET_AGENT";

/// Listening port read when `SHARENET_AGENT_PORT` is absent.
pub const LEGACY_PORT_VAR: &str = "PEER_PORT";

const MIB: u64 = 1024 * 1024;

/// Runtime settings for a peer agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub port: u16,
    /// Address other peers and the directory use to reach this agent.
    pub advertise_address: String,
    /// `host:port` of the directory service.
    pub directory_address: String,
    pub shared_directory: PathBuf,
    pub max_file_size: u64,
    pub heartbeat_interval_secs: u64,
    pub scan_interval_secs: u64,
    pub registration_retry_secs: u64,
    pub register_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub region: String,
    pub observer_buffer: usize,
    pub log_level: String,
    pub log_format: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            port: 9001,
            advertise_address: "127.0.0.1".to_string(),
            directory_address: "localhost:8080".to_string(),
            shared_directory: PathBuf::from("./shared_files"),
            max_file_size: 100 * MIB,
            heartbeat_interval_secs: 30,
            scan_interval_secs: 30,
            registration_retry_secs: 10,
            register_delay_ms: 100,
            request_timeout_secs: 10,
            region: sharenet_types::DEFAULT_REGION.to_string(),
            observer_buffer: sharenet_notify::DEFAULT_OBSERVER_BUFFER,
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

impl AgentConfig {
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

        let mut config: Self = builder
            .build()?
            .try_deserialize()
            .context("invalid agent configuration")?;

        if std::env::var(format!("{ENV_PREFIX}_PORT")).is_err() {
            if let Ok(raw) = std::env::var(LEGACY_PORT_VAR) {
                config.port = raw
                    .trim()
                    .parse()
                    .with_context(|| format!("{LEGACY_PORT_VAR}={raw} is not a valid port"))?;
            }
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("port must be greater than zero");
        }
        if self.advertise_address.trim().is_empty() {
            anyhow::bail!("advertise_address must not be empty");
        }
        if self.directory_address.trim().is_empty() {
            anyhow::bail!("directory_address must not be empty");
        }
        if self.shared_directory.as_os_str().is_empty() {
            anyhow::bail!("shared_directory must not be empty");
        }
        if self.max_file_size == 0 {
            anyhow::bail!("max_file_size must be greater than zero");
        }
        if self.heartbeat_interval_secs == 0
            || self.scan_interval_secs == 0
            || self.registration_retry_secs == 0
        {
            anyhow::bail!("heartbeat, scan and registration retry intervals must be greater than zero");
        }
        if !matches!(self.log_format.as_str(), "pretty" | "json") {
            anyhow::bail!("log_format must be 'pretty' or 'json', got '{}'", self.log_format);
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }

    /// `host:port` advertised to the directory as this agent's download endpoint.
    pub fn advertised_endpoint(&self) -> String {
        format!("{}:{}", self.advertise_address, self.port)
    }

    pub fn directory_url(&self) -> String {
        let address = self.directory_address.trim_end_matches('/');
        if address.starts_with("http://") || address.starts_with("https://") {
            address.to_string()
        } else {
            format!("http://{address}")
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn registration_retry(&self) -> Duration {
        Duration::from_secs(self.registration_retry_secs)
    }

    pub fn register_delay(&self) -> Duration {
        Duration::from_millis(self.register_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
