use crate::driver::{CatchUpConfig, ExponentialBackoff, FixedBackoff, RetryPolicy};
use crate::ledger::factomd::FactomdConfig;
use crate::watcher::WatcherConfig;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryStrategy {
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    pub strategy: RetryStrategy,
    /// Fixed delay, or the first delay of an exponential backoff.
    pub delay_ms: u64,
    pub max_delay_ms: u64,
    /// Retry forever when unset.
    pub max_attempts: Option<u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            strategy: RetryStrategy::Fixed,
            delay_ms: 2_000,
            max_delay_ms: 60_000,
            max_attempts: None,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> Box<dyn RetryPolicy + Send> {
        let delay = Duration::from_millis(self.delay_ms);
        match self.strategy {
            RetryStrategy::Fixed => Box::new(FixedBackoff {
                delay,
                max_attempts: self.max_attempts,
            }),
            RetryStrategy::Exponential => Box::new(ExponentialBackoff {
                initial: delay,
                max_delay: Duration::from_millis(self.max_delay_ms),
                max_attempts: self.max_attempts,
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScraperConfig {
    pub factomd: FactomdConfig,
    pub catch_up: CatchUpConfig,
    pub retry: RetryConfig,
    pub watcher: WatcherConfig,
}

impl ScraperConfig {
    /// Reads a YAML file. JSON is accepted as well, being valid YAML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_yaml::from_reader(file)?)
    }
}
