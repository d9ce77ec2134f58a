//! Process configuration loaded from environment variables.

use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use ledgerflow_core::Currency;

use crate::retry::RetryPolicy;

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
pub const DEFAULT_EXCHANGE: &str = "ledgerflow.events";
pub const DEFAULT_CURRENCY: &str = "COP";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{var}: expected a non-negative integer, got '{value}'")]
    InvalidNumber { var: &'static str, value: String },

    #[error("{var}: must be greater than zero")]
    Zero { var: &'static str },

    #[error("LEDGERFLOW_BUS: unknown bus kind '{0}' (expected 'memory' or 'redis')")]
    UnknownBus(String),

    #[error("LEDGERFLOW_CURRENCY: {0}")]
    InvalidCurrency(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BusKind {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub bus: BusKind,
    pub redis_url: String,
    pub exchange: String,
    pub currency: Currency,
    pub consumer_max_attempts: u32,
    pub retry_base: Duration,
    pub retry_max: Duration,
    pub connect_timeout: Duration,
    pub outbox_poll_interval: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build the configuration from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bus = match get("LEDGERFLOW_BUS").as_deref().map(str::to_lowercase).as_deref() {
            None | Some("memory") => BusKind::Memory,
            Some("redis") => BusKind::Redis,
            Some(other) => return Err(ConfigError::UnknownBus(other.to_string())),
        };

        let redis_url = get("REDIS_URL").unwrap_or_else(|| {
            if bus == BusKind::Redis {
                warn!("REDIS_URL not set; using local dev default {DEFAULT_REDIS_URL}");
            }
            DEFAULT_REDIS_URL.to_string()
        });
        if bus == BusKind::Memory {
            warn!("LEDGERFLOW_BUS=memory; events are not durable across restarts");
        }

        let currency_code = get("LEDGERFLOW_CURRENCY").unwrap_or_else(|| DEFAULT_CURRENCY.to_string());
        let currency = Currency::new(&currency_code).map_err(|e| ConfigError::InvalidCurrency(e.to_string()))?;

        let consumer_max_attempts = positive(&get, "LEDGERFLOW_CONSUMER_MAX_ATTEMPTS", 5)?;
        let retry_base = millis(&get, "LEDGERFLOW_RETRY_BASE_MS", 200)?;
        let retry_max = millis(&get, "LEDGERFLOW_RETRY_MAX_MS", 10_000)?;
        let connect_timeout = millis(&get, "LEDGERFLOW_CONNECT_TIMEOUT_MS", 5_000)?;
        let outbox_poll_interval = millis(&get, "LEDGERFLOW_OUTBOX_POLL_MS", 500)?;

        Ok(Self {
            bus,
            redis_url,
            exchange: get("LEDGERFLOW_EXCHANGE").unwrap_or_else(|| DEFAULT_EXCHANGE.to_string()),
            currency,
            consumer_max_attempts: consumer_max_attempts as u32,
            retry_base,
            retry_max: retry_max.max(retry_base),
            connect_timeout,
            outbox_poll_interval,
        })
    }

    /// Backoff policy for consumer workers and the outbox relay.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(self.consumer_max_attempts, self.retry_base, self.retry_max)
    }
}

fn number<G>(get: &G, var: &'static str, default: u64) -> Result<u64, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        None => Ok(default),
        Some(value) => value
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidNumber { var, value }),
    }
}

fn positive<G>(get: &G, var: &'static str, default: u64) -> Result<u64, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let value = number(get, var, default)?;
    if value == 0 {
        return Err(ConfigError::Zero { var });
    }
    // Attempts above u32::MAX are meaningless.
    Ok(value.min(u32::MAX as u64))
}

fn millis<G>(get: &G, var: &'static str, default: u64) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    positive(get, var, default).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|var| map.get(var).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = load(&[]).unwrap();
        assert_eq!(config.bus, BusKind::Memory);
        assert_eq!(config.redis_url, DEFAULT_REDIS_URL);
        assert_eq!(config.exchange, DEFAULT_EXCHANGE);
        assert_eq!(config.currency.code(), "COP");
        assert_eq!(config.consumer_max_attempts, 5);
        assert_eq!(config.retry_base, Duration::from_millis(200));
        assert_eq!(config.retry_max, Duration::from_secs(10));
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.outbox_poll_interval, Duration::from_millis(500));
        assert_eq!(config.retry_policy().max_attempts, 5);
    }

    #[test]
    fn overrides_are_honoured() {
        let config = load(&[
            ("LEDGERFLOW_BUS", "Redis"),
            ("REDIS_URL", "redis://broker:6379"),
            ("LEDGERFLOW_CURRENCY", "usd"),
            ("LEDGERFLOW_CONSUMER_MAX_ATTEMPTS", "3"),
            ("LEDGERFLOW_RETRY_BASE_MS", "50"),
        ])
        .unwrap();
        assert_eq!(config.bus, BusKind::Redis);
        assert_eq!(config.redis_url, "redis://broker:6379");
        assert_eq!(config.currency.code(), "USD");
        assert_eq!(config.consumer_max_attempts, 3);
        assert_eq!(config.retry_base, Duration::from_millis(50));
    }

    #[test]
    fn invalid_values_are_errors_not_defaults() {
        assert_eq!(
            load(&[("LEDGERFLOW_RETRY_BASE_MS", "soon")]).unwrap_err(),
            ConfigError::InvalidNumber {
                var: "LEDGERFLOW_RETRY_BASE_MS",
                value: "soon".to_string()
            }
        );
        assert!(matches!(
            load(&[("LEDGERFLOW_CONSUMER_MAX_ATTEMPTS", "0")]),
            Err(ConfigError::Zero { .. })
        ));
        assert!(matches!(load(&[("LEDGERFLOW_BUS", "kafka")]), Err(ConfigError::UnknownBus(_))));
        assert!(matches!(
            load(&[("LEDGERFLOW_CURRENCY", "PESOS")]),
            Err(ConfigError::InvalidCurrency(_))
        ));
    }
}
