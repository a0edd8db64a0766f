//! Application configuration

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use serde_with::serde_as;

use crate::errors::ImportError;
use crate::models::Topology;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub import: ImportConfig,
}

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout: Duration,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImportConfig {
    /// Directory holding the delimited track files
    pub source_dir: PathBuf,
    /// Rows per transaction
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Worker count per stage, available cores if unset
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub topology: Topology,
    /// Parse and validate the corpus without writing to Postgres
    #[serde(default)]
    pub dry_run: bool,
}

fn default_max_connections() -> u32 {
    10
}

fn default_acquire_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_page_size() -> usize {
    500
}

/// Number of available processor cores, at least one
pub fn available_workers() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(
                Environment::with_prefix("AISIMPORT")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), ImportError> {
        self.database.validate()?;
        self.import.validate()?;
        Ok(())
    }
}

impl DatabaseConfig {
    pub fn validate(&self) -> Result<(), ImportError> {
        if self.url.trim().is_empty() {
            return Err(ImportError::ConfigurationError {
                message: "Database url cannot be empty".to_string(),
            });
        }
        if self.max_connections == 0 {
            return Err(ImportError::ConfigurationError {
                message: "Max connections must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

impl ImportConfig {
    pub fn validate(&self) -> Result<(), ImportError> {
        if self.source_dir.as_os_str().is_empty() {
            return Err(ImportError::ConfigurationError {
                message: "Source directory cannot be empty".to_string(),
            });
        }
        if self.page_size == 0 {
            return Err(ImportError::ConfigurationError {
                message: "Page size must be greater than zero".to_string(),
            });
        }
        if self.workers == Some(0) {
            return Err(ImportError::ConfigurationError {
                message: "Worker count must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Configured worker count, or the number of available cores
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(available_workers)
    }
}
