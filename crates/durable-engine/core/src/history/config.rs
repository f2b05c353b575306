//! # History Configuration
//!
//! Namespace-scoped limits used when validating and normalizing start
//! requests. Loaded from TOML; durations use humantime syntax (`"10s"`).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{Error, ErrorKind, Result};

/// Default maximum length for namespace, workflow id, task queue and type names.
pub const DEFAULT_MAX_ID_LENGTH: usize = 1000;
/// Default input blob size above which a warning is logged.
pub const DEFAULT_BLOB_SIZE_LIMIT_WARN: usize = 512 * 1024;
/// Default input blob size at which the request is rejected.
pub const DEFAULT_BLOB_SIZE_LIMIT_ERROR: usize = 2 * 1024 * 1024;
/// Default memo size above which a warning is logged.
pub const DEFAULT_MEMO_SIZE_LIMIT_WARN: usize = 2 * 1024;
/// Default memo size at which the request is rejected.
pub const DEFAULT_MEMO_SIZE_LIMIT_ERROR: usize = 32 * 1024;
/// Task timeout used when the request leaves it unset.
pub const DEFAULT_WORKFLOW_TASK_TIMEOUT: Duration = Duration::from_secs(10);
/// Upper bound on any workflow task timeout.
pub const MAX_WORKFLOW_TASK_TIMEOUT: Duration = Duration::from_secs(120);

/// Per-namespace overrides. Unset fields fall back to [`HistoryConfig`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamespaceLimits {
    pub blob_size_limit_warn: Option<usize>,
    pub blob_size_limit_error: Option<usize>,
    pub memo_size_limit_warn: Option<usize>,
    pub memo_size_limit_error: Option<usize>,
    #[serde(with = "humantime_serde")]
    pub default_workflow_task_timeout: Option<Duration>,
}

/// Configuration for the execution-creation path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Maximum length of namespace, workflow id, task queue and workflow type names.
    pub max_id_length_limit: usize,
    pub blob_size_limit_warn: usize,
    pub blob_size_limit_error: usize,
    pub memo_size_limit_warn: usize,
    pub memo_size_limit_error: usize,
    #[serde(with = "humantime_serde")]
    pub default_workflow_task_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub max_workflow_task_timeout: Duration,
    /// Limits keyed by namespace name.
    pub namespace_overrides: HashMap<String, NamespaceLimits>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_id_length_limit: DEFAULT_MAX_ID_LENGTH,
            blob_size_limit_warn: DEFAULT_BLOB_SIZE_LIMIT_WARN,
            blob_size_limit_error: DEFAULT_BLOB_SIZE_LIMIT_ERROR,
            memo_size_limit_warn: DEFAULT_MEMO_SIZE_LIMIT_WARN,
            memo_size_limit_error: DEFAULT_MEMO_SIZE_LIMIT_ERROR,
            default_workflow_task_timeout: DEFAULT_WORKFLOW_TASK_TIMEOUT,
            max_workflow_task_timeout: MAX_WORKFLOW_TASK_TIMEOUT,
            namespace_overrides: HashMap::new(),
        }
    }
}

impl HistoryConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source).map_err(|e| {
            Error::from_source("invalid history configuration", ErrorKind::Configuration, e)
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations whose warn limits sit above their error limits.
    pub fn validate(&self) -> Result<()> {
        if self.blob_size_limit_warn > self.blob_size_limit_error {
            return Err(Error::configuration(
                "blob_size_limit_warn must not exceed blob_size_limit_error",
            ));
        }
        if self.memo_size_limit_warn > self.memo_size_limit_error {
            return Err(Error::configuration(
                "memo_size_limit_warn must not exceed memo_size_limit_error",
            ));
        }
        if self.max_workflow_task_timeout.is_zero() {
            return Err(Error::configuration("max_workflow_task_timeout must be positive"));
        }
        for (namespace, limits) in &self.namespace_overrides {
            let warn = limits.blob_size_limit_warn.unwrap_or(self.blob_size_limit_warn);
            let error = limits.blob_size_limit_error.unwrap_or(self.blob_size_limit_error);
            if warn > error {
                return Err(Error::configuration(format!(
                    "namespace {namespace}: blob warn limit exceeds error limit"
                )));
            }
            let warn = limits.memo_size_limit_warn.unwrap_or(self.memo_size_limit_warn);
            let error = limits.memo_size_limit_error.unwrap_or(self.memo_size_limit_error);
            if warn > error {
                return Err(Error::configuration(format!(
                    "namespace {namespace}: memo warn limit exceeds error limit"
                )));
            }
        }
        Ok(())
    }

    /// Set the maximum id length
    pub fn with_max_id_length(mut self, limit: usize) -> Self {
        self.max_id_length_limit = limit;
        self
    }

    /// Set blob size limits
    pub fn with_blob_size_limits(mut self, warn: usize, error: usize) -> Self {
        self.blob_size_limit_warn = warn;
        self.blob_size_limit_error = error;
        self
    }

    /// Set memo size limits
    pub fn with_memo_size_limits(mut self, warn: usize, error: usize) -> Self {
        self.memo_size_limit_warn = warn;
        self.memo_size_limit_error = error;
        self
    }

    /// Set the default workflow task timeout
    pub fn with_default_workflow_task_timeout(mut self, timeout: Duration) -> Self {
        self.default_workflow_task_timeout = timeout;
        self
    }

    /// Override limits for one namespace
    pub fn with_namespace_limits(mut self, namespace: impl Into<String>, limits: NamespaceLimits) -> Self {
        self.namespace_overrides.insert(namespace.into(), limits);
        self
    }

    fn limits(&self, namespace: &str) -> Option<&NamespaceLimits> {
        self.namespace_overrides.get(namespace)
    }

    pub fn blob_size_limit_warn(&self, namespace: &str) -> usize {
        self.limits(namespace)
            .and_then(|l| l.blob_size_limit_warn)
            .unwrap_or(self.blob_size_limit_warn)
    }

    pub fn blob_size_limit_error(&self, namespace: &str) -> usize {
        self.limits(namespace)
            .and_then(|l| l.blob_size_limit_error)
            .unwrap_or(self.blob_size_limit_error)
    }

    pub fn memo_size_limit_warn(&self, namespace: &str) -> usize {
        self.limits(namespace)
            .and_then(|l| l.memo_size_limit_warn)
            .unwrap_or(self.memo_size_limit_warn)
    }

    pub fn memo_size_limit_error(&self, namespace: &str) -> usize {
        self.limits(namespace)
            .and_then(|l| l.memo_size_limit_error)
            .unwrap_or(self.memo_size_limit_error)
    }

    pub fn default_workflow_task_timeout(&self, namespace: &str) -> Duration {
        self.limits(namespace)
            .and_then(|l| l.default_workflow_task_timeout)
            .unwrap_or(self.default_workflow_task_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HistoryConfig::default();
        assert_eq!(config.max_id_length_limit, 1000);
        assert_eq!(config.blob_size_limit_error, 2 * 1024 * 1024);
        assert_eq!(config.default_workflow_task_timeout, Duration::from_secs(10));
        assert_eq!(config.max_workflow_task_timeout, Duration::from_secs(120));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_with_namespace_override() {
        let config = HistoryConfig::from_toml_str(
            r#"
            max_id_length_limit = 64
            default_workflow_task_timeout = "15s"

            [namespace_overrides.orders]
            blob_size_limit_warn = 1024
            blob_size_limit_error = 4096
            default_workflow_task_timeout = "30s"
            "#,
        )
        .unwrap();

        assert_eq!(config.max_id_length_limit, 64);
        assert_eq!(config.default_workflow_task_timeout("billing"), Duration::from_secs(15));
        assert_eq!(config.default_workflow_task_timeout("orders"), Duration::from_secs(30));
        assert_eq!(config.blob_size_limit_error("orders"), 4096);
        assert_eq!(config.blob_size_limit_warn("orders"), 1024);
        assert_eq!(config.blob_size_limit_error("billing"), DEFAULT_BLOB_SIZE_LIMIT_ERROR);
    }

    #[test]
    fn test_warn_above_error_is_rejected() {
        let err = HistoryConfig::default()
            .with_memo_size_limits(100, 10)
            .validate()
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }

    #[test]
    fn test_namespace_override_warn_above_error_is_rejected() {
        let result = HistoryConfig::from_toml_str(
            r#"
            [namespace_overrides.orders]
            blob_size_limit_error = 1024
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_malformed_toml() {
        assert!(HistoryConfig::from_toml_str("max_id_length_limit = \"many\"").is_err());
    }
}
