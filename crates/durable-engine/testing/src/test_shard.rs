//! Configurable [`ShardContext`] for execution-creation tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use durable_engine_core::error::{Error, Result};
use durable_engine_core::history::{
    ClusterMetadata, ExecutionKey, ExecutionLockTable, HistoryBranch, HistoryConfig, LockMode,
    NamespaceId, ReleaseFn, ShardContext,
};
use durable_engine_core::port::MetricsHandler;

use crate::RecordingMetricsHandler;

/// Shard with a fixed clock, recorded metrics and injectable failures.
pub struct TestShard {
    id: u32,
    config: HistoryConfig,
    cluster_metadata: ClusterMetadata,
    metrics: Arc<RecordingMetricsHandler>,
    now: DateTime<Utc>,
    fail_history_branch: bool,
    locks: ExecutionLockTable,
}

impl TestShard {
    pub fn builder() -> TestShardBuilder {
        TestShardBuilder::default()
    }

    pub fn recorded_metrics(&self) -> &RecordingMetricsHandler {
        &self.metrics
    }

    pub fn lock_table(&self) -> &ExecutionLockTable {
        &self.locks
    }
}

impl Default for TestShard {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[async_trait]
impl ShardContext for TestShard {
    fn shard_id(&self) -> u32 {
        self.id
    }

    fn config(&self) -> &HistoryConfig {
        &self.config
    }

    fn cluster_metadata(&self) -> &ClusterMetadata {
        &self.cluster_metadata
    }

    fn metrics(&self) -> &dyn MetricsHandler {
        self.metrics.as_ref()
    }

    fn now(&self) -> DateTime<Utc> {
        self.now
    }

    fn new_history_branch(&self, _namespace_id: &NamespaceId, workflow_id: &str, run_id: &str) -> Result<HistoryBranch> {
        if self.fail_history_branch {
            return Err(Error::history(format!(
                "unable to create history branch for {workflow_id}/{run_id}"
            )));
        }
        Ok(HistoryBranch {
            tree_id: run_id.to_string(),
            branch_id: format!("{run_id}-branch"),
        })
    }

    async fn lock_execution(&self, key: &ExecutionKey, mode: LockMode) -> Result<ReleaseFn> {
        self.locks.acquire(key, mode).await
    }
}

/// Builder for [`TestShard`].
#[derive(Default)]
pub struct TestShardBuilder {
    id: u32,
    config: Option<HistoryConfig>,
    cluster_metadata: Option<ClusterMetadata>,
    metrics: Option<Arc<RecordingMetricsHandler>>,
    now: Option<DateTime<Utc>>,
    fail_history_branch: bool,
}

impl TestShardBuilder {
    pub fn id(mut self, id: u32) -> Self {
        self.id = id;
        self
    }

    pub fn config(mut self, config: HistoryConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn cluster_metadata(mut self, metadata: ClusterMetadata) -> Self {
        self.cluster_metadata = Some(metadata);
        self
    }

    /// Share a metrics recorder with the test.
    pub fn metrics(mut self, metrics: Arc<RecordingMetricsHandler>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn now(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    pub fn fail_history_branch(mut self) -> Self {
        self.fail_history_branch = true;
        self
    }

    pub fn build(self) -> TestShard {
        TestShard {
            id: self.id,
            config: self.config.unwrap_or_default(),
            cluster_metadata: self
                .cluster_metadata
                .unwrap_or_else(|| ClusterMetadata::single("active")),
            metrics: self.metrics.unwrap_or_default(),
            now: self.now.unwrap_or_else(Utc::now),
            fail_history_branch: self.fail_history_branch,
            locks: ExecutionLockTable::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock_and_branch_failure() {
        let now = Utc::now();
        let shard = TestShard::builder().id(7).now(now).fail_history_branch().build();

        assert_eq!(shard.shard_id(), 7);
        assert_eq!(shard.now(), now);
        assert!(shard
            .new_history_branch(&NamespaceId::new("ns-1"), "wf", "run")
            .is_err());
        assert_eq!(shard.cluster_metadata().current_cluster_name(), "active");
    }
}
