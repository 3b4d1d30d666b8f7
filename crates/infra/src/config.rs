//! Environment configuration shared by both services.
//!
//! Invalid numeric values fall back to their defaults with a warning rather
//! than failing startup.

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use postbox_processor::{DEFAULT_EMBARGO_SKUS, DEFAULT_SUCCESS_PROBABILITY};

#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres DSN. When unset, the service runs on the in-memory stores.
    pub db_dsn: Option<String>,
    /// Broker URL. When unset, the service runs on the in-memory broker.
    pub broker_url: Option<String>,
    pub service_name: String,
    pub outbox_poll_interval: Duration,
    pub outbox_batch_size: u32,
    pub max_retries: u32,
    pub consumer_prefetch: u16,
    pub drain_timeout: Duration,
    pub embargo_skus: Vec<String>,
    pub processing_success_prob: f64,
}

impl Config {
    pub fn from_env(default_service_name: &str) -> Self {
        let service_name =
            std::env::var("SERVICE_NAME").unwrap_or_else(|_| default_service_name.to_string());

        Self {
            db_dsn: std::env::var("DB_DSN").ok().filter(|v| !v.is_empty()),
            broker_url: std::env::var("BROKER_URL").ok().filter(|v| !v.is_empty()),
            service_name,
            outbox_poll_interval: Duration::from_secs(env_parse("OUTBOX_POLL_INTERVAL", 5)),
            outbox_batch_size: env_parse("OUTBOX_BATCH_SIZE", 100),
            max_retries: env_parse("MAX_RETRIES", 3),
            consumer_prefetch: env_parse("CONSUMER_PREFETCH", 10),
            drain_timeout: Duration::from_secs(env_parse("SHUTDOWN_DRAIN_TIMEOUT", 30)),
            embargo_skus: embargo_from_env(),
            processing_success_prob: env_parse("PROCESSING_SUCCESS_PROB", DEFAULT_SUCCESS_PROBABILITY),
        }
    }
}

fn env_parse<T>(name: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(var = name, value = %raw, %default, "invalid value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn embargo_from_env() -> Vec<String> {
    match std::env::var("EMBARGO_SKUS") {
        Ok(raw) => parse_sku_list(&raw),
        Err(_) => DEFAULT_EMBARGO_SKUS.iter().map(|s| s.to_string()).collect(),
    }
}

fn parse_sku_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sku_list_parsing_trims_and_drops_empties() {
        assert_eq!(
            parse_sku_list(" pineapple_pizza, teapot ,,durian"),
            vec!["pineapple_pizza", "teapot", "durian"]
        );
        assert!(parse_sku_list("").is_empty());
    }

    #[test]
    fn defaults_apply_without_environment() {
        // Only asserts values no test environment overrides.
        let config = Config::from_env("order-service");
        assert_eq!(config.outbox_batch_size, 100);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.consumer_prefetch, 10);
        assert_eq!(config.outbox_poll_interval, Duration::from_secs(5));
        assert_eq!(config.drain_timeout, Duration::from_secs(30));
    }
}
