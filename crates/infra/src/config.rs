//! Runtime configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::event_log::DEFAULT_BATCH_SIZE;

pub const POLL_INTERVAL_VAR: &str = "DCBFLOW_POLL_INTERVAL_MS";
pub const BATCH_SIZE_VAR: &str = "DCBFLOW_BATCH_SIZE";
pub const MAX_CONFLICT_RETRIES_VAR: &str = "DCBFLOW_MAX_CONFLICT_RETRIES";
pub const DEPENDENCY_POLICY_VAR: &str = "DCBFLOW_AUTOMATION_DEPENDENCIES";
pub const DATABASE_URL_VAR: &str = "DATABASE_URL";
pub const DB_MAX_CONNECTIONS_VAR: &str = "DCBFLOW_DB_MAX_CONNECTIONS";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: '{value}' ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// What an automation does with an event its dependencies have not seen yet.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum DependencyPolicy {
    /// Hold the event until every dependency has applied its position.
    #[default]
    WaitForCatchUp,
    /// Process immediately against whatever the dependencies currently hold.
    Eventual,
}

impl FromStr for DependencyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wait" => Ok(DependencyPolicy::WaitForCatchUp),
            "eventual" => Ok(DependencyPolicy::Eventual),
            _ => Err("expected 'wait' or 'eventual'".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Delay between live polling cycles.
    pub poll_interval: Duration,
    /// Events fetched per query page.
    pub batch_size: usize,
    /// Extra attempts an automation gets when its command hits a conflict.
    pub max_conflict_retries: u32,
    pub dependency_policy: DependencyPolicy,
    /// Postgres backend when set, in-memory otherwise.
    pub database: Option<DatabaseConfig>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            batch_size: DEFAULT_BATCH_SIZE,
            max_conflict_retries: 3,
            dependency_policy: DependencyPolicy::default(),
            database: None,
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable lookup (unset = default).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let poll_ms: u64 = parse_var(&lookup, POLL_INTERVAL_VAR)?
            .unwrap_or(defaults.poll_interval.as_millis() as u64);
        if poll_ms == 0 {
            return Err(invalid(POLL_INTERVAL_VAR, "0", "must be positive"));
        }

        let batch_size: usize = parse_var(&lookup, BATCH_SIZE_VAR)?.unwrap_or(defaults.batch_size);
        if batch_size == 0 {
            return Err(invalid(BATCH_SIZE_VAR, "0", "must be positive"));
        }

        let max_conflict_retries: u32 = parse_var(&lookup, MAX_CONFLICT_RETRIES_VAR)?
            .unwrap_or(defaults.max_conflict_retries);

        let dependency_policy = match lookup(DEPENDENCY_POLICY_VAR) {
            Some(raw) => raw
                .parse()
                .map_err(|reason: String| invalid(DEPENDENCY_POLICY_VAR, &raw, &reason))?,
            None => defaults.dependency_policy,
        };

        let database = match lookup(DATABASE_URL_VAR).filter(|u| !u.trim().is_empty()) {
            Some(url) => {
                let max_connections: u32 = parse_var(&lookup, DB_MAX_CONNECTIONS_VAR)?.unwrap_or(5);
                if max_connections == 0 {
                    return Err(invalid(DB_MAX_CONNECTIONS_VAR, "0", "must be positive"));
                }
                Some(DatabaseConfig {
                    url,
                    max_connections,
                })
            }
            None => None,
        };

        Ok(Self {
            poll_interval: Duration::from_millis(poll_ms),
            batch_size,
            max_conflict_retries,
            dependency_policy,
            database,
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    pub fn with_dependency_policy(mut self, policy: DependencyPolicy) -> Self {
        self.dependency_policy = policy;
        self
    }
}

fn parse_var<F, T>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: core::fmt::Display,
{
    match lookup(var) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| invalid(var, &raw, &e.to_string())),
        None => Ok(None),
    }
}

fn invalid(var: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = RuntimeConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.poll_interval, Duration::from_millis(50));
        assert_eq!(config.dependency_policy, DependencyPolicy::WaitForCatchUp);
        assert!(config.database.is_none());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = RuntimeConfig::from_lookup(lookup(&[
            (POLL_INTERVAL_VAR, "10"),
            (BATCH_SIZE_VAR, "32"),
            (MAX_CONFLICT_RETRIES_VAR, "7"),
            (DEPENDENCY_POLICY_VAR, "Eventual"),
            (DATABASE_URL_VAR, "postgres://localhost/dcbflow"),
        ]))
        .unwrap();

        assert_eq!(config.poll_interval, Duration::from_millis(10));
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.max_conflict_retries, 7);
        assert_eq!(config.dependency_policy, DependencyPolicy::Eventual);
        assert_eq!(
            config.database,
            Some(DatabaseConfig {
                url: "postgres://localhost/dcbflow".to_string(),
                max_connections: 5
            })
        );
    }

    #[test]
    fn bad_values_name_the_variable() {
        let err = RuntimeConfig::from_lookup(lookup(&[(BATCH_SIZE_VAR, "lots")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var, .. } if var == BATCH_SIZE_VAR));

        let err = RuntimeConfig::from_lookup(lookup(&[(DEPENDENCY_POLICY_VAR, "sometimes")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var, .. } if var == DEPENDENCY_POLICY_VAR));

        assert!(RuntimeConfig::from_lookup(lookup(&[(POLL_INTERVAL_VAR, "0")])).is_err());
    }
}
