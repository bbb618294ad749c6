//! Runtime configuration.
//!
//! Defaults are usable as-is; `from_env` overrides individual values from
//! `STOCKLEDGER_*` variables and `from_json` loads a whole document.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockledger_inventory::{ExpiredBatchPolicy, ScopePolicy};

use crate::jobs::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid configuration document: {0}")]
    Document(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Longest a posting waits for a balance held by another posting.
    pub lock_timeout: Duration,
    /// Policy for tenants without one of their own.
    pub default_policy: ScopePolicy,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
            default_policy: ScopePolicy::default(),
        }
    }
}

impl LedgerConfig {
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_default_policy(mut self, policy: ScopePolicy) -> Self {
        self.default_policy = policy;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Applied to ledger postings that fail transiently.
    pub retry: RetryPolicy,
    pub suggestion_limit: usize,
    /// Require valid check digits on supplier tax ids.
    pub strict_tax_ids: bool,
    /// Location code receiving imports when the request names none.
    pub default_location: Option<String>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            suggestion_limit: 5,
            strict_tax_ids: false,
            default_location: None,
        }
    }
}

impl ImportConfig {
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_default_location(mut self, code: impl Into<String>) -> Self {
        self.default_location = Some(code.into());
        self
    }

    pub fn with_strict_tax_ids(mut self, strict: bool) -> Self {
        self.strict_tax_ids = strict;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub workers: usize,
    /// Thread name prefix, also used in logs.
    pub name: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            name: "import-worker".to_string(),
        }
    }
}

impl WorkerConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Postgres connection settings. Without a URL the in-memory stores are used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

impl DatabaseConfig {
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StockLedgerConfig {
    pub ledger: LedgerConfig,
    pub import: ImportConfig,
    pub workers: WorkerConfig,
    pub database: DatabaseConfig,
}

impl StockLedgerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_json(document: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(document)?)
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(ms) = parse::<u64, _>(&lookup, "STOCKLEDGER_LOCK_TIMEOUT_MS")? {
            config.ledger.lock_timeout = Duration::from_millis(ms);
        }
        if let Some(raw) = lookup("STOCKLEDGER_EXPIRED_BATCHES") {
            let policy = match raw.trim().to_ascii_lowercase().as_str() {
                "block" => ExpiredBatchPolicy::Block,
                "allow" => ExpiredBatchPolicy::Allow,
                _ => {
                    return Err(ConfigError::Invalid {
                        var: "STOCKLEDGER_EXPIRED_BATCHES",
                        value: raw,
                        reason: "expected `block` or `allow`".into(),
                    });
                }
            };
            config.ledger.default_policy = config.ledger.default_policy.with_expired_batches(policy);
        }
        if let Some(allow) = parse::<bool, _>(&lookup, "STOCKLEDGER_ALLOW_NEGATIVE")? {
            config.ledger.default_policy = config.ledger.default_policy.with_negative_stock(allow);
        }
        if let Some(attempts) = parse::<u32, _>(&lookup, "STOCKLEDGER_IMPORT_MAX_ATTEMPTS")? {
            config.import.retry.max_attempts = attempts;
        }
        if let Some(strict) = parse::<bool, _>(&lookup, "STOCKLEDGER_STRICT_TAX_IDS")? {
            config.import.strict_tax_ids = strict;
        }
        if let Some(code) = lookup("STOCKLEDGER_IMPORT_LOCATION").filter(|c| !c.trim().is_empty()) {
            config.import.default_location = Some(code.trim().to_string());
        }
        if let Some(workers) = parse::<usize, _>(&lookup, "STOCKLEDGER_IMPORT_WORKERS")? {
            if workers == 0 {
                return Err(ConfigError::Invalid {
                    var: "STOCKLEDGER_IMPORT_WORKERS",
                    value: workers.to_string(),
                    reason: "at least one worker is required".into(),
                });
            }
            config.workers.workers = workers;
        }
        if let Some(url) = lookup("STOCKLEDGER_DATABASE_URL").filter(|u| !u.trim().is_empty()) {
            config.database.url = Some(url.trim().to_string());
        }
        if let Some(max) = parse::<u32, _>(&lookup, "STOCKLEDGER_DATABASE_MAX_CONNECTIONS")? {
            if max == 0 {
                return Err(ConfigError::Invalid {
                    var: "STOCKLEDGER_DATABASE_MAX_CONNECTIONS",
                    value: max.to_string(),
                    reason: "at least one connection is required".into(),
                });
            }
            config.database.max_connections = max;
        }

        Ok(config)
    }
}

fn parse<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: core::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| ConfigError::Invalid {
            var,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| vars.get(k).cloned()
    }

    #[test]
    fn defaults_without_variables() {
        let config = StockLedgerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, StockLedgerConfig::default());
        assert_eq!(config.ledger.lock_timeout, Duration::from_secs(5));
        assert_eq!(config.import.retry.max_attempts, 3);
        assert_eq!(config.workers.workers, 4);
        assert_eq!(config.database.url, None);
    }

    #[test]
    fn variables_override_defaults() {
        let config = StockLedgerConfig::from_lookup(lookup(&[
            ("STOCKLEDGER_LOCK_TIMEOUT_MS", "250"),
            ("STOCKLEDGER_EXPIRED_BATCHES", "Allow"),
            ("STOCKLEDGER_ALLOW_NEGATIVE", "true"),
            ("STOCKLEDGER_IMPORT_MAX_ATTEMPTS", "0"),
            ("STOCKLEDGER_IMPORT_WORKERS", "2"),
            ("STOCKLEDGER_IMPORT_LOCATION", " dock "),
        ]))
        .unwrap();

        assert_eq!(config.ledger.lock_timeout, Duration::from_millis(250));
        assert_eq!(config.ledger.default_policy.expired_batches, ExpiredBatchPolicy::Allow);
        assert!(config.ledger.default_policy.allow_negative_stock);
        assert_eq!(config.import.retry.max_attempts, 0);
        assert_eq!(config.workers.workers, 2);
        assert_eq!(config.import.default_location.as_deref(), Some("dock"));
    }

    #[test]
    fn database_settings_come_from_the_environment() {
        let config = StockLedgerConfig::from_lookup(lookup(&[
            ("STOCKLEDGER_DATABASE_URL", "postgres://ledger@localhost/stock"),
            ("STOCKLEDGER_DATABASE_MAX_CONNECTIONS", "3"),
        ]))
        .unwrap();
        assert_eq!(config.database.url.as_deref(), Some("postgres://ledger@localhost/stock"));
        assert_eq!(config.database.max_connections, 3);

        let err = StockLedgerConfig::from_lookup(lookup(&[("STOCKLEDGER_DATABASE_MAX_CONNECTIONS", "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "STOCKLEDGER_DATABASE_MAX_CONNECTIONS", .. }));
    }

    #[test]
    fn bad_values_name_the_variable() {
        let err = StockLedgerConfig::from_lookup(lookup(&[("STOCKLEDGER_LOCK_TIMEOUT_MS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "STOCKLEDGER_LOCK_TIMEOUT_MS", .. }));

        let err = StockLedgerConfig::from_lookup(lookup(&[("STOCKLEDGER_IMPORT_WORKERS", "0")]))
            .unwrap_err();
        assert!(err.to_string().contains("STOCKLEDGER_IMPORT_WORKERS"));
    }

    #[test]
    fn json_document_fills_missing_sections_with_defaults() {
        let config = StockLedgerConfig::from_json(
            r#"{ "import": { "suggestion_limit": 3, "strict_tax_ids": true } }"#,
        )
        .unwrap();
        assert_eq!(config.import.suggestion_limit, 3);
        assert!(config.import.strict_tax_ids);
        assert_eq!(config.ledger, LedgerConfig::default());
    }
}
