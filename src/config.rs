use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::AppError;

const DEV_TRACKING_SECRET: &str = "dev-tracking-secret";
const DEV_ACCESS_TOKEN_SECRET: &str = "dev-access-token-secret";

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub assignment_interval: Duration,
    pub assignment_batch_size: usize,
    pub sweep_interval: Duration,
    pub stale_after: Duration,
    pub location_timeout: Duration,
    pub tracking_secret: String,
    pub access_token_secret: String,
    pub tracking_base_url: String,
    /// Zero disables the simulation jitter on stored courier positions.
    pub location_jitter_m: f64,
    pub seed_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            assignment_interval: Duration::from_secs(20),
            assignment_batch_size: 50,
            sweep_interval: Duration::from_secs(60),
            stale_after: Duration::from_secs(180),
            location_timeout: Duration::from_millis(5_000),
            tracking_secret: DEV_TRACKING_SECRET.to_string(),
            access_token_secret: DEV_ACCESS_TOKEN_SECRET.to_string(),
            tracking_base_url: "http://localhost:3000/track".to_string(),
            location_jitter_m: 0.0,
            seed_file: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        let config = Self {
            http_port: parse_or_default("HTTP_PORT", defaults.http_port)?,
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            assignment_interval: Duration::from_secs(parse_or_default(
                "ASSIGNMENT_INTERVAL_SECS",
                defaults.assignment_interval.as_secs(),
            )?),
            assignment_batch_size: parse_or_default(
                "ASSIGNMENT_BATCH_SIZE",
                defaults.assignment_batch_size,
            )?,
            sweep_interval: Duration::from_secs(parse_or_default(
                "SWEEP_INTERVAL_SECS",
                defaults.sweep_interval.as_secs(),
            )?),
            stale_after: Duration::from_secs(parse_or_default(
                "STALE_AFTER_SECS",
                defaults.stale_after.as_secs(),
            )?),
            location_timeout: Duration::from_millis(parse_or_default(
                "LOCATION_TIMEOUT_MS",
                defaults.location_timeout.as_millis() as u64,
            )?),
            tracking_secret: env::var("TRACKING_SECRET").unwrap_or(defaults.tracking_secret),
            access_token_secret: env::var("ACCESS_TOKEN_SECRET")
                .unwrap_or(defaults.access_token_secret),
            tracking_base_url: env::var("TRACKING_BASE_URL")
                .unwrap_or(defaults.tracking_base_url),
            location_jitter_m: parse_or_default("LOCATION_JITTER_METERS", 0.0)?,
            seed_file: env::var("SEED_FILE").ok().map(PathBuf::from),
        };

        config.validate()?;
        Ok(config)
    }

    /// Scheduler periods must be non-zero; `tokio::time::interval` panics on zero.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.assignment_interval.is_zero() {
            return Err(AppError::Internal(
                "invalid ASSIGNMENT_INTERVAL_SECS: must be greater than zero".to_string(),
            ));
        }
        if self.sweep_interval.is_zero() {
            return Err(AppError::Internal(
                "invalid SWEEP_INTERVAL_SECS: must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn uses_dev_secrets(&self) -> bool {
        self.tracking_secret == DEV_TRACKING_SECRET
            || self.access_token_secret == DEV_ACCESS_TOKEN_SECRET
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
