use serde::Deserialize;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::settlement::SchedulerConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub run_address: String,
    /// Postgres URL; when unset the in-memory store is used
    #[serde(default)]
    pub database_uri: Option<String>,
    pub accrual_system_address: String,
    pub poll_interval_secs: u64,
    pub max_retries: u32,
    pub default_backoff_secs: u64,
    pub batch_size: usize,
    pub request_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> AppResult<Self> {
        Self::load(config::Environment::default())
    }

    fn load(env: config::Environment) -> AppResult<Self> {
        let config: Config = config::Config::builder()
            .set_default("run_address", "0.0.0.0:8080")?
            .set_default("accrual_system_address", "http://localhost:8081")?
            .set_default("poll_interval_secs", 10)?
            .set_default("max_retries", 3)?
            .set_default("default_backoff_secs", 10)?
            .set_default("batch_size", 100)?
            .set_default("request_timeout_secs", 10)?
            .add_source(env.try_parsing(true))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.max_retries == 0 {
            return Err(AppError::Config("MAX_RETRIES must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(AppError::Config("BATCH_SIZE must be at least 1".into()));
        }
        if self.accrual_system_address.trim().is_empty() {
            return Err(AppError::Config("ACCRUAL_SYSTEM_ADDRESS must not be empty".into()));
        }
        Ok(())
    }

    pub fn database_uri(&self) -> Option<&str> {
        self.database_uri
            .as_deref()
            .map(str::trim)
            .filter(|uri| !uri.is_empty())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            max_retries: self.max_retries,
            default_backoff: Duration::from_secs(self.default_backoff_secs),
            batch_size: self.batch_size,
        }
    }
}
