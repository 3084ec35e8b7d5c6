//! Service configuration, read once from the environment and passed explicitly
//! into each component at construction.

use std::time::Duration;

use thiserror::Error;

use ledgerflow_observability::{LogFormat, LoggingConfig};

use crate::consumer::RetryPolicy;

pub const DEFAULT_RENDERER_BASE_URL: &str = "http://localhost:3000";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },
}

/// External HTML to PDF renderer.
#[derive(Debug, Clone, PartialEq)]
pub struct RendererConfig {
    pub base_url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    /// Postgres connection string; in-memory stores when absent.
    pub database_url: Option<String>,
    pub renderer: RendererConfig,
    /// Running statement jobs older than this are failed by the sweeper.
    pub statement_deadline: Duration,
    pub sweep_interval: Duration,
    pub relay_interval: Duration,
    pub consumer_retry: RetryPolicy,
    pub logging: LoggingConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            renderer: RendererConfig {
                base_url: DEFAULT_RENDERER_BASE_URL.to_string(),
                timeout: Duration::from_secs(30),
            },
            statement_deadline: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(30),
            relay_interval: Duration::from_millis(200),
            consumer_retry: RetryPolicy::exponential(
                5,
                Duration::from_millis(200),
                Duration::from_secs(30),
            ),
            logging: LoggingConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Read configuration from process environment variables.
    ///
    /// Loading a `.env` file is the binary's job.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup; unset keys take defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let retry_attempts = parse_or(&get, "CONSUMER_MAX_ATTEMPTS", 5u32)?;
        let retry_base = parse_or(&get, "CONSUMER_RETRY_BASE_MS", 200u64)?;

        let logging = LoggingConfig {
            level: get("LOG_LEVEL").unwrap_or(defaults.logging.level),
            format: match get("LOG_FORMAT") {
                Some(raw) => raw.parse::<LogFormat>().map_err(|_| ConfigError::Invalid {
                    key: "LOG_FORMAT",
                    value: raw,
                })?,
                None => defaults.logging.format,
            },
        };

        Ok(Self {
            database_url: get("DATABASE_URL"),
            renderer: RendererConfig {
                base_url: get("RENDERER_BASE_URL")
                    .map(|url| url.trim_end_matches('/').to_string())
                    .unwrap_or(defaults.renderer.base_url),
                timeout: Duration::from_secs(parse_or(&get, "RENDERER_TIMEOUT_SECS", 30)?),
            },
            statement_deadline: Duration::from_secs(positive_or(
                &get,
                "STATEMENT_DEADLINE_SECS",
                300,
            )?),
            sweep_interval: Duration::from_secs(positive_or(&get, "SWEEP_INTERVAL_SECS", 30)?),
            relay_interval: Duration::from_millis(positive_or(&get, "RELAY_INTERVAL_MS", 200)?),
            consumer_retry: RetryPolicy::exponential(
                retry_attempts,
                Duration::from_millis(retry_base),
                defaults.consumer_retry.max_delay,
            ),
            logging,
        })
    }
}

fn parse_or<G, T>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    G: Fn(&str) -> Option<String>,
    T: core::str::FromStr,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(default),
    }
}

/// Like [`parse_or`], but zero is rejected.
fn positive_or<G>(get: &G, key: &'static str, default: u64) -> Result<u64, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match parse_or(get, key, default)? {
        0 => Err(ConfigError::Invalid {
            key,
            value: "0".to_string(),
        }),
        value => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<ServiceConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServiceConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn empty_environment_yields_defaults() {
        assert_eq!(config(&[]).unwrap(), ServiceConfig::default());
    }

    #[test]
    fn values_override_defaults() {
        let config = config(&[
            ("DATABASE_URL", "postgres://localhost/ledger"),
            ("RENDERER_BASE_URL", "http://gotenberg:3000/"),
            ("RENDERER_TIMEOUT_SECS", "5"),
            ("STATEMENT_DEADLINE_SECS", "60"),
            ("CONSUMER_MAX_ATTEMPTS", "2"),
            ("LOG_FORMAT", "pretty"),
            ("LOG_LEVEL", "debug"),
        ])
        .unwrap();

        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/ledger"));
        assert_eq!(config.renderer.base_url, "http://gotenberg:3000");
        assert_eq!(config.renderer.timeout, Duration::from_secs(5));
        assert_eq!(config.statement_deadline, Duration::from_secs(60));
        assert_eq!(config.consumer_retry.max_attempts, 2);
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        assert_eq!(
            config(&[("RELAY_INTERVAL_MS", "soon")]).unwrap_err(),
            ConfigError::Invalid {
                key: "RELAY_INTERVAL_MS",
                value: "soon".to_string()
            }
        );
        assert!(config(&[("LOG_FORMAT", "xml")]).is_err());
    }

    #[test]
    fn zero_intervals_and_deadline_are_rejected() {
        for key in [
            "RELAY_INTERVAL_MS",
            "SWEEP_INTERVAL_SECS",
            "STATEMENT_DEADLINE_SECS",
        ] {
            assert_eq!(
                config(&[(key, "0")]).unwrap_err(),
                ConfigError::Invalid {
                    key,
                    value: "0".to_string()
                }
            );
        }
        assert_eq!(
            config(&[("RELAY_INTERVAL_MS", "1")]).unwrap().relay_interval,
            Duration::from_millis(1)
        );
    }
}
