// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Worker configuration loaded from environment variables.
//!
//! Every variable is optional. Retry and backoff values here are the
//! defaults used when no feature flag overrides them.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::heartbeat_monitor::HeartbeatMonitorConfig;
use crate::retry_state::{BackoffPolicy, RetryDefaults, RetryLimits};
use crate::scheduling::JitterConfig;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding `<workload_id>/output.json` documents
    pub data_dir: PathBuf,
    /// Wait between command status polls
    pub command_await_duration: Duration,
    /// Heartbeat interval and failure timeout
    pub heartbeat: HeartbeatMonitorConfig,
    /// Default retry limits and backoff
    pub retry: RetryDefaults,
    /// Schedule jitter buckets
    pub jitter: JitterConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// - `SLUICE_DATA_DIR` (default: `.data`)
    /// - `SLUICE_COMMAND_AWAIT_SECS` (default: 30)
    /// - `SLUICE_HEARTBEAT_INTERVAL_SECS` (default: 30)
    /// - `SLUICE_HEARTBEAT_TIMEOUT_SECS` (default: 600)
    /// - `SLUICE_BACKOFF_MIN_INTERVAL_SECS` (default: 10)
    /// - `SLUICE_BACKOFF_MAX_INTERVAL_SECS` (default: 1800)
    /// - `SLUICE_BACKOFF_BASE` (default: 3)
    /// - `SLUICE_RETRY_SUCCESSIVE_COMPLETE_FAILURE_LIMIT` (default: 5)
    /// - `SLUICE_RETRY_TOTAL_COMPLETE_FAILURE_LIMIT` (default: 10)
    /// - `SLUICE_RETRY_SUCCESSIVE_PARTIAL_FAILURE_LIMIT` (default: 1000)
    /// - `SLUICE_RETRY_TOTAL_PARTIAL_FAILURE_LIMIT` (default: 20)
    /// - `SLUICE_JITTER_NO_JITTER_CUTOFF_MINUTES` (default: 5)
    /// - `SLUICE_JITTER_{HIGH,MEDIUM,LOW}_FREQUENCY_THRESHOLD_MINUTES`
    ///   (defaults: 90, 150, 1500)
    /// - `SLUICE_JITTER_{HIGH,MEDIUM,LOW,VERY_LOW}_FREQUENCY_AMOUNT_MINUTES`
    ///   (defaults: 2, 5, 15, 25)
    pub fn from_env() -> Result<Self, ConfigError> {
        let data_dir =
            PathBuf::from(std::env::var("SLUICE_DATA_DIR").unwrap_or_else(|_| ".data".to_string()));

        let heartbeat = HeartbeatMonitorConfig {
            interval: Duration::from_secs(positive("SLUICE_HEARTBEAT_INTERVAL_SECS", 30)?),
            heartbeat_timeout: Duration::from_secs(positive("SLUICE_HEARTBEAT_TIMEOUT_SECS", 600)?),
        };

        let backoff = BackoffPolicy::new(
            Duration::from_secs(positive("SLUICE_BACKOFF_MIN_INTERVAL_SECS", 10)?),
            Duration::from_secs(positive("SLUICE_BACKOFF_MAX_INTERVAL_SECS", 1800)?),
            positive("SLUICE_BACKOFF_BASE", 3)?,
        );
        if backoff.max_interval < backoff.min_interval {
            return Err(ConfigError::Invalid(
                "SLUICE_BACKOFF_MAX_INTERVAL_SECS",
                "must not be below SLUICE_BACKOFF_MIN_INTERVAL_SECS",
            ));
        }

        let limits = RetryLimits {
            successive_complete_failures: positive(
                "SLUICE_RETRY_SUCCESSIVE_COMPLETE_FAILURE_LIMIT",
                5,
            )?,
            total_complete_failures: positive("SLUICE_RETRY_TOTAL_COMPLETE_FAILURE_LIMIT", 10)?,
            successive_partial_failures: positive(
                "SLUICE_RETRY_SUCCESSIVE_PARTIAL_FAILURE_LIMIT",
                1000,
            )?,
            total_partial_failures: positive("SLUICE_RETRY_TOTAL_PARTIAL_FAILURE_LIMIT", 20)?,
        };

        let jitter = JitterConfig {
            no_jitter_cutoff_minutes: number("SLUICE_JITTER_NO_JITTER_CUTOFF_MINUTES", 5)?,
            high_frequency_threshold_minutes: number(
                "SLUICE_JITTER_HIGH_FREQUENCY_THRESHOLD_MINUTES",
                90,
            )?,
            medium_frequency_threshold_minutes: number(
                "SLUICE_JITTER_MEDIUM_FREQUENCY_THRESHOLD_MINUTES",
                150,
            )?,
            low_frequency_threshold_minutes: number(
                "SLUICE_JITTER_LOW_FREQUENCY_THRESHOLD_MINUTES",
                1500,
            )?,
            high_frequency_jitter_amount_minutes: number(
                "SLUICE_JITTER_HIGH_FREQUENCY_AMOUNT_MINUTES",
                2,
            )?,
            medium_frequency_jitter_amount_minutes: number(
                "SLUICE_JITTER_MEDIUM_FREQUENCY_AMOUNT_MINUTES",
                5,
            )?,
            low_frequency_jitter_amount_minutes: number(
                "SLUICE_JITTER_LOW_FREQUENCY_AMOUNT_MINUTES",
                15,
            )?,
            very_low_frequency_jitter_amount_minutes: number(
                "SLUICE_JITTER_VERY_LOW_FREQUENCY_AMOUNT_MINUTES",
                25,
            )?,
        };

        Ok(Self {
            data_dir,
            command_await_duration: Duration::from_secs(positive("SLUICE_COMMAND_AWAIT_SECS", 30)?),
            heartbeat,
            retry: RetryDefaults { limits, backoff },
            jitter,
        })
    }
}

fn number<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(name, "must be a non-negative integer")),
        Err(_) => Ok(default),
    }
}

fn positive<T: FromStr + PartialEq + Default>(
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    let value = number(name, default)?;
    if value == T::default() {
        return Err(ConfigError::Invalid(name, "must be greater than zero"));
    }
    Ok(value)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Sets env vars for a test and restores them on drop
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self { vars: Vec::new() }
        }

        fn set(&mut self, key: &str, value: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn clear_all(&mut self) {
            let keys: Vec<String> = env::vars()
                .map(|(k, _)| k)
                .filter(|k| k.starts_with("SLUICE_"))
                .collect();
            for key in keys {
                let old = env::var(&key).ok();
                self.vars.push((key.clone(), old));
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe { env::remove_var(&key) };
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    #[test]
    fn test_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.clear_all();

        let config = Config::from_env().unwrap();
        assert_eq!(config.data_dir, PathBuf::from(".data"));
        assert_eq!(config.command_await_duration, Duration::from_secs(30));
        assert_eq!(config.heartbeat, HeartbeatMonitorConfig::default());
        assert_eq!(config.retry, RetryDefaults::default());
        assert_eq!(config.jitter, JitterConfig::default());
    }

    #[test]
    fn test_overrides() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.clear_all();
        guard.set("SLUICE_DATA_DIR", "/var/lib/sluice");
        guard.set("SLUICE_HEARTBEAT_TIMEOUT_SECS", "120");
        guard.set("SLUICE_BACKOFF_BASE", "2");
        guard.set("SLUICE_RETRY_TOTAL_PARTIAL_FAILURE_LIMIT", "7");
        guard.set("SLUICE_JITTER_NO_JITTER_CUTOFF_MINUTES", "0");

        let config = Config::from_env().unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/sluice"));
        assert_eq!(config.heartbeat.heartbeat_timeout, Duration::from_secs(120));
        assert_eq!(config.retry.backoff.base, 2);
        assert_eq!(config.retry.limits.total_partial_failures, 7);
        assert_eq!(config.jitter.no_jitter_cutoff_minutes, 0);
    }

    #[test]
    fn test_invalid_values() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.clear_all();

        guard.set("SLUICE_BACKOFF_BASE", "0");
        assert!(matches!(
            Config::from_env().unwrap_err(),
            ConfigError::Invalid("SLUICE_BACKOFF_BASE", _)
        ));

        guard.set("SLUICE_BACKOFF_BASE", "3");
        guard.set("SLUICE_BACKOFF_MIN_INTERVAL_SECS", "600");
        guard.set("SLUICE_BACKOFF_MAX_INTERVAL_SECS", "60");
        assert!(matches!(
            Config::from_env().unwrap_err(),
            ConfigError::Invalid("SLUICE_BACKOFF_MAX_INTERVAL_SECS", _)
        ));

        guard.set("SLUICE_BACKOFF_MAX_INTERVAL_SECS", "6000");
        guard.set("SLUICE_JITTER_LOW_FREQUENCY_AMOUNT_MINUTES", "-1");
        assert!(matches!(
            Config::from_env().unwrap_err(),
            ConfigError::Invalid("SLUICE_JITTER_LOW_FREQUENCY_AMOUNT_MINUTES", _)
        ));
    }
}
