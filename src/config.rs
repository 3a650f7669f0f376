use std::env;
use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::Duration;

use crate::engine::pricing::PricingConfig;
use crate::engine::scheduler::SchedulerSettings;
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format {other:?}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub connection_buffer_size: usize,
    pub scheduler_interval_secs: u64,
    pub scheduler_lookahead_secs: i64,
    pub scheduler_grace_secs: i64,
    pub pricing: PricingConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let pricing = match env::var("PRICING_CONFIG_PATH") {
            Ok(path) if !path.trim().is_empty() => PricingConfig::from_json_file(path.trim())?,
            _ => PricingConfig::default(),
        };

        let config = Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format: parse_or_default("LOG_FORMAT", LogFormat::Compact)?,
            connection_buffer_size: parse_or_default("CONNECTION_BUFFER_SIZE", 64)?,
            scheduler_interval_secs: parse_or_default("SCHEDULER_INTERVAL_SECS", 30)?,
            scheduler_lookahead_secs: parse_or_default("SCHEDULER_LOOKAHEAD_SECS", 60)?,
            scheduler_grace_secs: parse_or_default("SCHEDULER_GRACE_SECS", 120)?,
            pricing,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            interval: StdDuration::from_secs(self.scheduler_interval_secs),
            lookahead: Duration::seconds(self.scheduler_lookahead_secs),
            grace: Duration::seconds(self.scheduler_grace_secs),
        }
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.connection_buffer_size == 0 {
            return Err(AppError::Internal("CONNECTION_BUFFER_SIZE must be > 0".to_string()));
        }
        if self.scheduler_interval_secs == 0 {
            return Err(AppError::Internal("SCHEDULER_INTERVAL_SECS must be > 0".to_string()));
        }
        if self.scheduler_lookahead_secs < 0 || self.scheduler_grace_secs < 0 {
            return Err(AppError::Internal("scheduler windows cannot be negative".to_string()));
        }
        self.pricing.validate()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Compact,
            connection_buffer_size: 64,
            scheduler_interval_secs: 30,
            scheduler_lookahead_secs: 60,
            scheduler_grace_secs: 120,
            pricing: PricingConfig::default(),
        }
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
