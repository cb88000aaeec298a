use crate::error::{EngineError, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_DATABASE_URL: &str = "sqlite:campus_poll.db";
pub const MEMORY_DATABASE_URL: &str = "memory";
pub const DEFAULT_MAX_OPTIONS: usize = 10;
pub const DEFAULT_TICK_SECONDS: u64 = 60;
pub const DEFAULT_CONFLICT_RETRIES: u32 = 5;
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Engine settings, read from the environment (and `.env` via dotenvy in the
/// binary).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub database_url: String,
    pub max_options: usize,
    pub tick_interval: Duration,
    pub conflict_retries: u32,
    pub max_connections: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            max_options: DEFAULT_MAX_OPTIONS,
            tick_interval: Duration::from_secs(DEFAULT_TICK_SECONDS),
            conflict_retries: DEFAULT_CONFLICT_RETRIES,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());
        let max_options = read_var("POLL_MAX_OPTIONS", DEFAULT_MAX_OPTIONS)?;
        let tick_seconds = read_var("SCHEDULER_TICK_SECONDS", DEFAULT_TICK_SECONDS)?;
        let conflict_retries = read_var("CONFLICT_RETRIES", DEFAULT_CONFLICT_RETRIES)?;
        let max_connections = read_var("DB_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?;

        let config = Self {
            database_url,
            max_options,
            tick_interval: Duration::from_secs(tick_seconds),
            conflict_retries,
            max_connections,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_options < 2 {
            return Err(EngineError::Config(format!(
                "POLL_MAX_OPTIONS must be at least 2, got {}",
                self.max_options
            )));
        }
        let secs = self.tick_interval.as_secs();
        if !(1..=60).contains(&secs) {
            return Err(EngineError::Config(format!(
                "SCHEDULER_TICK_SECONDS must be between 1 and 60, got {}",
                secs
            )));
        }
        if self.conflict_retries == 0 {
            return Err(EngineError::Config(
                "CONFLICT_RETRIES must be at least 1".to_string(),
            ));
        }
        if self.max_connections == 0 {
            return Err(EngineError::Config(
                "DB_MAX_CONNECTIONS must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn uses_memory_store(&self) -> bool {
        self.database_url == MEMORY_DATABASE_URL
    }
}

fn read_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| EngineError::Config(format!("{} has an invalid value: {:?}", name, raw))),
        Err(_) => Ok(default),
    }
}
