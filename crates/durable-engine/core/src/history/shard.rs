//! Shard context: the per-shard services execution creation depends on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use super::config::HistoryConfig;
use super::lease::{ExecutionLockTable, LockMode, ReleaseFn};
use super::mutable_state::{ExecutionKey, HistoryBranch};
use super::namespace::{ClusterMetadata, NamespaceId};
use crate::error::Result;
use crate::port::MetricsHandler;

/// Services a history shard exposes to the creation path.
#[async_trait]
pub trait ShardContext: Send + Sync {
    fn shard_id(&self) -> u32;

    fn config(&self) -> &HistoryConfig;

    fn cluster_metadata(&self) -> &ClusterMetadata;

    fn metrics(&self) -> &dyn MetricsHandler;

    /// The shard's clock.
    fn now(&self) -> DateTime<Utc>;

    /// Allocate a history branch for a new run.
    fn new_history_branch(&self, namespace_id: &NamespaceId, workflow_id: &str, run_id: &str) -> Result<HistoryBranch>;

    /// Lock one execution, returning the callback that unlocks it.
    async fn lock_execution(&self, key: &ExecutionKey, mode: LockMode) -> Result<ReleaseFn>;
}

/// Default shard backed by an in-process lock table.
pub struct Shard {
    id: u32,
    config: Arc<HistoryConfig>,
    cluster_metadata: Arc<ClusterMetadata>,
    metrics: Arc<dyn MetricsHandler>,
    locks: ExecutionLockTable,
}

impl Shard {
    pub fn new(
        id: u32,
        config: Arc<HistoryConfig>,
        cluster_metadata: Arc<ClusterMetadata>,
        metrics: Arc<dyn MetricsHandler>,
    ) -> Self {
        Self {
            id,
            config,
            cluster_metadata,
            metrics,
            locks: ExecutionLockTable::new(),
        }
    }

    pub fn lock_table(&self) -> &ExecutionLockTable {
        &self.locks
    }
}

impl std::fmt::Debug for Shard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shard")
            .field("id", &self.id)
            .field("current_cluster", &self.cluster_metadata.current_cluster_name())
            .finish()
    }
}

#[async_trait]
impl ShardContext for Shard {
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
        Utc::now()
    }

    fn new_history_branch(&self, _namespace_id: &NamespaceId, _workflow_id: &str, run_id: &str) -> Result<HistoryBranch> {
        Ok(HistoryBranch {
            tree_id: run_id.to_string(),
            branch_id: Uuid::new_v4().to_string(),
        })
    }

    async fn lock_execution(&self, key: &ExecutionKey, mode: LockMode) -> Result<ReleaseFn> {
        self.locks.acquire(key, mode).await
    }
}
