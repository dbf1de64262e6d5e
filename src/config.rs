//! Engine configuration loaded from an optional TOML file.
//!
//! Every key has a default, so an empty file (or no file at all) yields a
//! working configuration.

use crate::error::{LedgerError, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Currency assigned to newly opened wallets.
    pub currency: String,
    /// How many transactions a wallet view shows, newest first.
    pub recent_transactions_limit: usize,
    /// Disburse a cycle's pool inside the contribution that fills it.
    pub auto_payout: bool,
    /// Default `tracing` filter when `RUST_LOG` is unset.
    pub log_filter: String,
    pub retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            currency: "NGN".to_string(),
            recent_transactions_limit: 15,
            auto_payout: false,
            log_filter: "info".to_string(),
            retry: RetryConfig::default(),
        }
    }
}

/// Bounded exponential backoff for storage conflicts.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 2,
            max_delay_ms: 100,
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(retry.saturating_sub(1) as i32);
        let millis = (self.initial_delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        Duration::from_millis(millis as u64)
    }
}

impl EngineConfig {
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)
            .map_err(|e| LedgerError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            LedgerError::Config(format!(
                "Failed to read config file {}: {e}",
                path.as_ref().display()
            ))
        })?;
        Self::from_toml(&contents)
    }

    fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(LedgerError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.currency.trim().is_empty() {
            return Err(LedgerError::Config("currency must not be empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = EngineConfig::from_toml("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.currency, "NGN");
        assert!(!config.auto_payout);
    }

    #[test]
    fn test_partial_config() {
        let config = EngineConfig::from_toml(
            r#"
            currency = "GHS"
            auto_payout = true

            [retry]
            max_attempts = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.currency, "GHS");
        assert!(config.auto_payout);
        assert_eq!(config.retry.max_attempts, 8);
        assert_eq!(config.retry.initial_delay_ms, 2);
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let result = EngineConfig::from_toml("[retry]\nmax_attempts = 0");
        assert!(matches!(result, Err(LedgerError::Config(_))));
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let retry = RetryConfig::default();
        assert_eq!(retry.delay(1), Duration::from_millis(2));
        assert_eq!(retry.delay(2), Duration::from_millis(4));
        assert_eq!(retry.delay(3), Duration::from_millis(8));
        assert_eq!(retry.delay(20), Duration::from_millis(100));
    }
}
