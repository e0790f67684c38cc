use anyhow::{bail, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::leads::DEFAULT_CLAIM_TIMEOUT_SECONDS;

/// Main configuration structure for lead dispatch
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LeadDispatchConfig {
    /// Claim window and agent roster settings
    pub distribution: DistributionConfig,
    /// Periodic sweep trigger settings
    pub sweeper: SweeperConfig,
    /// Persistence backend
    pub storage: StorageConfig,
    /// Logging and metrics
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DistributionConfig {
    /// How long an assigned agent has to claim a lead
    pub claim_timeout_seconds: u64,
    /// How long the active agent roster may be served from cache
    pub agent_cache_ttl_seconds: u64,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            claim_timeout_seconds: DEFAULT_CLAIM_TIMEOUT_SECONDS as u64,
            agent_cache_ttl_seconds: 15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SweeperConfig {
    /// Seconds between sweeps when running the built-in trigger
    pub interval_seconds: u64,
    /// Retry leads left in `new` on every tick
    pub retry_stranded: bool,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 60,
            retry_stranded: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    File,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// JSON state file for the file backend
    pub state_path: PathBuf,
    /// Database URL for the sqlite backend
    pub database_url: String,
    /// Maximum connections in pool
    pub max_connections: u32,
    /// Enable automatic migrations
    pub auto_migrate: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::File,
            state_path: PathBuf::from(".lead-dispatch/leads.json"),
            database_url: "sqlite://.lead-dispatch/leads.db".to_string(),
            max_connections: 10,
            auto_migrate: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level or tracing filter directive
    pub log_level: String,
    /// `json` or `compact`
    pub log_format: String,
    /// Log distribution counters when a long-running command exits
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "json".to_string(),
            metrics_enabled: true,
        }
    }
}

impl LeadDispatchConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration files (lead-dispatch.toml, .lead-dispatch-rc)
    /// 3. Environment variables (prefixed with LEAD_DISPATCH_, `__` between sections)
    pub fn load() -> Result<Self> {
        let mut builder = Config::builder();

        if Path::new("lead-dispatch.toml").exists() {
            builder = builder.add_source(File::with_name("lead-dispatch"));
        }

        if Path::new(".lead-dispatch-rc").exists() {
            builder = builder.add_source(
                File::with_name(".lead-dispatch-rc").format(config::FileFormat::Toml),
            );
        }

        builder = builder.add_source(
            Environment::with_prefix("LEAD_DISPATCH")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: LeadDispatchConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load a single TOML file on top of the defaults
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: LeadDispatchConfig = Config::builder()
            .add_source(File::from(path.as_ref()).format(config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.distribution.claim_timeout_seconds == 0 {
            bail!("distribution.claim_timeout_seconds must be greater than zero");
        }
        if self.sweeper.interval_seconds == 0 {
            bail!("sweeper.interval_seconds must be greater than zero");
        }
        Ok(())
    }

    pub fn claim_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.distribution.claim_timeout_seconds as i64)
    }

    pub fn agent_cache_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.distribution.agent_cache_ttl_seconds)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweeper.interval_seconds)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}
