//! Layer configuration.
//!
//! Every field has a serde default so embedders can supply partial TOML;
//! `Default` mirrors the serde defaults exactly.

use crate::retry::RetryOptions;
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_max_pending() -> usize {
    64
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_ms() -> u64 {
    200
}

fn default_retry_max_ms() -> u64 {
    5_000
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cooldown_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Backoff base; attempt N sleeps `min(base * 2^N, max_delay_ms)`.
    #[serde(default = "default_retry_base_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_retry_max_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_retry_base_ms(),
            max_delay_ms: default_retry_max_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive transport-level failures before the circuit opens.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessagingConfig {
    /// Reply deadline when the caller does not pass one.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Hard cap on simultaneous in-flight requests; excess sends fail fast.
    #[serde(default = "default_max_pending")]
    pub max_pending_requests: usize,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            max_pending_requests: default_max_pending(),
            retry: RetryConfig::default(),
            breaker: BreakerConfig::default(),
        }
    }
}

impl MessagingConfig {
    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.breaker.cooldown_ms)
    }

    /// Retry options derived from config, used when the caller passes none.
    pub fn retry_options(&self) -> RetryOptions {
        RetryOptions {
            max_retries: self.retry.max_retries,
            retry_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            timeout: self.default_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_empty_toml() {
        let parsed = MessagingConfig::from_toml_str("").unwrap();
        assert_eq!(parsed, MessagingConfig::default());
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let parsed = MessagingConfig::from_toml_str(
            r#"
            default_timeout_ms = 2500

            [breaker]
            failure_threshold = 2
            "#,
        )
        .unwrap();

        assert_eq!(parsed.default_timeout_ms, 2_500);
        assert_eq!(parsed.breaker.failure_threshold, 2);
        assert_eq!(parsed.breaker.cooldown_ms, default_cooldown_ms());
        assert_eq!(parsed.retry, RetryConfig::default());
        assert_eq!(parsed.max_pending_requests, default_max_pending());
    }

    #[test]
    fn retry_options_mirror_config() {
        let config = MessagingConfig::default();
        let options = config.retry_options();
        assert_eq!(options.max_retries, config.retry.max_retries);
        assert_eq!(options.timeout, config.default_timeout());
    }
}
