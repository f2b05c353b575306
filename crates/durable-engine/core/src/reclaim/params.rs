//! Inputs and results of the reclamation workflows.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ApplicationError;
use crate::history::NamespaceId;

pub const DEFAULT_PAGE_SIZE: u32 = 1000;
pub const DEFAULT_DELETE_ACTIVITY_RPS: u32 = 100;

/// Tuning of the bulk deletion child workflow. Zero fields take defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeleteExecutionsConfig {
    /// Executions listed per page.
    pub page_size: u32,
    /// Deletions per second requested from the backend.
    pub delete_activity_rps: u32,
}

impl DeleteExecutionsConfig {
    pub fn apply_defaults(&mut self) {
        if self.page_size == 0 {
            self.page_size = DEFAULT_PAGE_SIZE;
        }
        if self.delete_activity_rps == 0 {
            self.delete_activity_rps = DEFAULT_DELETE_ACTIVITY_RPS;
        }
    }
}

/// Input of the bulk deletion child workflow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteExecutionsParams {
    pub namespace_id: NamespaceId,
    pub namespace: String,
    #[serde(default)]
    pub config: DeleteExecutionsConfig,
}

/// Output of the bulk deletion child workflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteExecutionsResult {
    pub success_count: u64,
    pub error_count: u64,
}

/// Input of the reclamation workflow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReclaimResourcesParams {
    #[serde(flatten)]
    pub delete_executions: DeleteExecutionsParams,
    /// Wait between execution deletion and namespace deletion. Zero skips it.
    #[serde(default, with = "humantime_serde")]
    pub namespace_delete_delay: Duration,
}

impl ReclaimResourcesParams {
    pub fn new(namespace_id: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            delete_executions: DeleteExecutionsParams {
                namespace_id: NamespaceId::new(namespace_id),
                namespace: namespace.into(),
                config: DeleteExecutionsConfig::default(),
            },
            namespace_delete_delay: Duration::ZERO,
        }
    }

    pub fn with_namespace_delete_delay(mut self, delay: Duration) -> Self {
        self.namespace_delete_delay = delay;
        self
    }

    pub fn with_config(mut self, config: DeleteExecutionsConfig) -> Self {
        self.delete_executions.config = config;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.delete_executions.namespace
    }

    pub fn namespace_id(&self) -> &NamespaceId {
        &self.delete_executions.namespace_id
    }

    /// Check required fields and fill config defaults.
    pub fn validate(&mut self) -> Result<(), ApplicationError> {
        if self.delete_executions.namespace_id.as_str().is_empty() {
            return Err(ApplicationError::non_retryable("namespace ID is required", ""));
        }
        if self.delete_executions.namespace.is_empty() {
            return Err(ApplicationError::non_retryable("namespace is required", ""));
        }
        self.delete_executions.config.apply_defaults();
        Ok(())
    }
}

/// Output of the reclamation workflow. Also returned with every failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReclaimResourcesResult {
    pub delete_success_count: u64,
    pub delete_error_count: u64,
    pub namespace_deleted: bool,
}
