use std::env;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub coordinator: CoordinatorSettings,
}

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub dispatch_queue_size: usize,
    pub event_buffer_size: usize,
    pub offer_timeout_secs: i64,
    pub expiry_sweep_interval_secs: u64,
    pub location_freshness_secs: i64,
    pub redispatch_delay_ms: u64,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            dispatch_queue_size: 1024,
            event_buffer_size: 256,
            offer_timeout_secs: 300,
            expiry_sweep_interval_secs: 15,
            location_freshness_secs: 120,
            redispatch_delay_ms: 250,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            coordinator: CoordinatorSettings {
                dispatch_queue_size: parse_or_default("DISPATCH_QUEUE_SIZE", 1024)?,
                event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 256)?,
                offer_timeout_secs: parse_or_default("OFFER_TIMEOUT_SECS", 300)?,
                expiry_sweep_interval_secs: parse_or_default("EXPIRY_SWEEP_INTERVAL_SECS", 15)?,
                location_freshness_secs: parse_or_default("LOCATION_FRESHNESS_SECS", 120)?,
                redispatch_delay_ms: parse_or_default("REDISPATCH_DELAY_MS", 250)?,
            },
        })
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
