// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::time::Duration;

use crate::workload_handlers::WorkloadDeadlineConfig;

/// Sluice Core configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL or SQLite connection URL
    pub database_url: String,
    /// How often the deadline monitor sweeps for expired workloads
    pub monitor_poll_interval: Duration,
    /// Seconds a pending workload may wait for a claim
    pub not_claimed_timeout_secs: u32,
    /// Seconds a claimed workload may take to start
    pub not_started_timeout_secs: u32,
    /// Seconds a running workload may go without a heartbeat
    pub heartbeat_timeout_secs: u32,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `SLUICE_DATABASE_URL`: PostgreSQL or SQLite connection string
    ///
    /// Optional (with defaults):
    /// - `SLUICE_MONITOR_POLL_INTERVAL_SECS`: deadline sweep interval (default: 30)
    /// - `SLUICE_WORKLOAD_NOT_CLAIMED_TIMEOUT_SECS` (default: 7200)
    /// - `SLUICE_WORKLOAD_NOT_STARTED_TIMEOUT_SECS` (default: 900)
    /// - `SLUICE_WORKLOAD_HEARTBEAT_TIMEOUT_SECS` (default: 600)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("SLUICE_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("SLUICE_DATABASE_URL"))?;

        let poll_secs = positive_secs("SLUICE_MONITOR_POLL_INTERVAL_SECS", 30)?;

        Ok(Self {
            database_url,
            monitor_poll_interval: Duration::from_secs(u64::from(poll_secs)),
            not_claimed_timeout_secs: positive_secs(
                "SLUICE_WORKLOAD_NOT_CLAIMED_TIMEOUT_SECS",
                7200,
            )?,
            not_started_timeout_secs: positive_secs(
                "SLUICE_WORKLOAD_NOT_STARTED_TIMEOUT_SECS",
                900,
            )?,
            heartbeat_timeout_secs: positive_secs("SLUICE_WORKLOAD_HEARTBEAT_TIMEOUT_SECS", 600)?,
        })
    }

    /// Deadlines for the workload handler.
    pub fn deadlines(&self) -> WorkloadDeadlineConfig {
        WorkloadDeadlineConfig {
            not_claimed_timeout: chrono::Duration::seconds(i64::from(
                self.not_claimed_timeout_secs,
            )),
            not_started_timeout: chrono::Duration::seconds(i64::from(
                self.not_started_timeout_secs,
            )),
            heartbeat_timeout: chrono::Duration::seconds(i64::from(self.heartbeat_timeout_secs)),
        }
    }
}

fn positive_secs(name: &'static str, default: u32) -> Result<u32, ConfigError> {
    let value: u32 = match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::Invalid(name, "must be a positive integer"))?,
        Err(_) => default,
    };
    if value == 0 {
        return Err(ConfigError::Invalid(name, "must be greater than zero"));
    }
    Ok(value)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

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

    const OPTIONAL_VARS: [&str; 4] = [
        "SLUICE_MONITOR_POLL_INTERVAL_SECS",
        "SLUICE_WORKLOAD_NOT_CLAIMED_TIMEOUT_SECS",
        "SLUICE_WORKLOAD_NOT_STARTED_TIMEOUT_SECS",
        "SLUICE_WORKLOAD_HEARTBEAT_TIMEOUT_SECS",
    ];

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

        fn remove(&mut self, key: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::remove_var(key) };
        }

        fn clear_optional(&mut self) {
            for key in OPTIONAL_VARS {
                self.remove(key);
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
    fn test_config_from_env_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.set("SLUICE_DATABASE_URL", "postgres://localhost/test");
        guard.clear_optional();

        let config = Config::from_env().unwrap();

        assert_eq!(config.database_url, "postgres://localhost/test");
        assert_eq!(config.monitor_poll_interval, Duration::from_secs(30));
        assert_eq!(config.deadlines(), WorkloadDeadlineConfig::default());
    }

    #[test]
    fn test_config_from_env_all_custom() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.set("SLUICE_DATABASE_URL", "sqlite:test.db");
        guard.set("SLUICE_MONITOR_POLL_INTERVAL_SECS", "5");
        guard.set("SLUICE_WORKLOAD_NOT_CLAIMED_TIMEOUT_SECS", "60");
        guard.set("SLUICE_WORKLOAD_NOT_STARTED_TIMEOUT_SECS", "120");
        guard.set("SLUICE_WORKLOAD_HEARTBEAT_TIMEOUT_SECS", "180");

        let config = Config::from_env().unwrap();
        let deadlines = config.deadlines();

        assert_eq!(config.monitor_poll_interval, Duration::from_secs(5));
        assert_eq!(deadlines.not_claimed_timeout, chrono::Duration::seconds(60));
        assert_eq!(deadlines.not_started_timeout, chrono::Duration::seconds(120));
        assert_eq!(deadlines.heartbeat_timeout, chrono::Duration::seconds(180));
    }

    #[test]
    fn test_config_missing_database_url() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.remove("SLUICE_DATABASE_URL");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("SLUICE_DATABASE_URL")));
        assert!(err.to_string().contains("SLUICE_DATABASE_URL"));
    }

    #[test]
    fn test_config_invalid_values() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.set("SLUICE_DATABASE_URL", "postgres://localhost/test");
        guard.clear_optional();

        guard.set("SLUICE_MONITOR_POLL_INTERVAL_SECS", "soon");
        assert!(matches!(
            Config::from_env().unwrap_err(),
            ConfigError::Invalid("SLUICE_MONITOR_POLL_INTERVAL_SECS", _)
        ));

        guard.set("SLUICE_MONITOR_POLL_INTERVAL_SECS", "0");
        assert!(matches!(
            Config::from_env().unwrap_err(),
            ConfigError::Invalid("SLUICE_MONITOR_POLL_INTERVAL_SECS", _)
        ));

        guard.set("SLUICE_MONITOR_POLL_INTERVAL_SECS", "10");
        guard.set("SLUICE_WORKLOAD_HEARTBEAT_TIMEOUT_SECS", "-5");
        assert!(matches!(
            Config::from_env().unwrap_err(),
            ConfigError::Invalid("SLUICE_WORKLOAD_HEARTBEAT_TIMEOUT_SECS", _)
        ));
    }

    #[test]
    fn test_config_error_display() {
        let missing = ConfigError::Missing("MY_VAR");
        assert_eq!(
            missing.to_string(),
            "missing required environment variable: MY_VAR"
        );

        let invalid = ConfigError::Invalid("MY_VAR", "must be a number");
        assert_eq!(
            invalid.to_string(),
            "invalid value for MY_VAR: must be a number"
        );
    }
}
