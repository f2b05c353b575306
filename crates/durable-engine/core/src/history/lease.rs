//! Execution leases.
//!
//! A [`WorkflowLease`] pairs a run's [`MutableState`] with the exclusive
//! right to mutate it. The right is released exactly once: explicitly via
//! [`WorkflowLease::release`], or on drop.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use super::mutable_state::{ExecutionKey, MutableState};
use super::shard::ShardContext;
use crate::error::{Error, Result};

/// How lock acquisition behaves when the execution is already locked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LockMode {
    /// Wait until the current holder releases.
    #[default]
    Block,
    /// Fail immediately.
    FailFast,
}

/// One-shot release callback handed out by the shard. Receives the error
/// the lease holder failed with, if any.
pub struct ReleaseFn(Box<dyn FnOnce(Option<&Error>) + Send>);

impl ReleaseFn {
    pub fn new(release: impl FnOnce(Option<&Error>) + Send + 'static) -> Self {
        Self(Box::new(release))
    }

    /// A release callback that does nothing.
    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    fn call(self, error: Option<&Error>) {
        (self.0)(error)
    }
}

impl std::fmt::Debug for ReleaseFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ReleaseFn")
    }
}

/// Per-shard table of execution locks. An entry lives only while some
/// caller holds or waits on it.
#[derive(Debug, Default)]
pub struct ExecutionLockTable {
    locks: Arc<DashMap<ExecutionKey, Arc<Mutex<()>>>>,
}

impl ExecutionLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock `key`, returning the callback that unlocks it.
    pub async fn acquire(&self, key: &ExecutionKey, mode: LockMode) -> Result<ReleaseFn> {
        let lock = self.locks.entry(key.clone()).or_default().clone();
        let guard: OwnedMutexGuard<()> = match mode {
            LockMode::Block => lock.lock_owned().await,
            LockMode::FailFast => lock.try_lock_owned().map_err(|_| {
                Error::lease("workflow execution is locked by another caller")
                    .with_context("workflow_id", key.workflow_id.clone())
                    .with_context("run_id", key.run_id.clone())
            })?,
        };
        let locks = Arc::clone(&self.locks);
        let key = key.clone();
        Ok(ReleaseFn::new(move |_| {
            drop(guard);
            locks.remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);
        }))
    }

    /// Whether `key` is currently held.
    pub fn is_locked(&self, key: &ExecutionKey) -> bool {
        self.locks
            .get(key)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }
}

/// Identity and logging scope of a leased execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    key: ExecutionKey,
    shard_id: u32,
}

impl ExecutionContext {
    pub fn new(key: ExecutionKey, shard_id: u32) -> Self {
        Self { key, shard_id }
    }

    pub fn key(&self) -> &ExecutionKey {
        &self.key
    }

    pub fn shard_id(&self) -> u32 {
        self.shard_id
    }
}

/// Exclusive handle on one run's mutable state.
#[derive(Debug)]
pub struct WorkflowLease {
    context: Arc<ExecutionContext>,
    mutable_state: MutableState,
    release_fn: Option<ReleaseFn>,
}

impl WorkflowLease {
    pub fn new(context: Arc<ExecutionContext>, release_fn: ReleaseFn, mutable_state: MutableState) -> Self {
        Self {
            context,
            mutable_state,
            release_fn: Some(release_fn),
        }
    }

    pub fn context(&self) -> &Arc<ExecutionContext> {
        &self.context
    }

    pub fn key(&self) -> &ExecutionKey {
        self.context.key()
    }

    pub fn mutable_state(&self) -> &MutableState {
        &self.mutable_state
    }

    pub fn mutable_state_mut(&mut self) -> &mut MutableState {
        &mut self.mutable_state
    }

    /// Release the lease, reporting the error the holder ended with.
    pub fn release(mut self, error: Option<&Error>) {
        if let Some(release) = self.release_fn.take() {
            release.call(error);
        }
    }
}

impl Drop for WorkflowLease {
    fn drop(&mut self) {
        if let Some(release) = self.release_fn.take() {
            debug!(execution = %self.context.key(), "releasing lease on drop");
            release.call(None);
        }
    }
}

/// Strategy for binding freshly created state to a lease.
#[async_trait]
pub trait LeaseBinder: Send + Sync {
    async fn bind(
        &self,
        existing: Option<WorkflowLease>,
        shard: &dyn ShardContext,
        mutable_state: MutableState,
    ) -> Result<WorkflowLease>;
}

/// Reuses a caller's lease for the same run, otherwise locks the run on the shard.
#[derive(Debug, Clone, Copy, Default)]
pub struct NewWorkflowLeaseBinder {
    mode: LockMode,
}

impl NewWorkflowLeaseBinder {
    pub fn new(mode: LockMode) -> Self {
        Self { mode }
    }
}

#[async_trait]
impl LeaseBinder for NewWorkflowLeaseBinder {
    async fn bind(
        &self,
        existing: Option<WorkflowLease>,
        shard: &dyn ShardContext,
        mutable_state: MutableState,
    ) -> Result<WorkflowLease> {
        new_workflow_lease_and_context(existing, shard, mutable_state, self.mode).await
    }
}

/// Bind `mutable_state` to a lease. An existing lease for the same run is
/// returned unchanged; one for a different run is rejected.
pub async fn new_workflow_lease_and_context(
    existing: Option<WorkflowLease>,
    shard: &dyn ShardContext,
    mutable_state: MutableState,
    mode: LockMode,
) -> Result<WorkflowLease> {
    if let Some(lease) = existing {
        if lease.key() != mutable_state.key() {
            return Err(Error::invalid_state("existing lease belongs to a different execution")
                .with_context("leased_run_id", lease.key().run_id.clone())
                .with_context("run_id", mutable_state.key().run_id.clone()));
        }
        return Ok(lease);
    }

    let key = mutable_state.key().clone();
    let release = shard.lock_execution(&key, mode).await?;
    let context = Arc::new(ExecutionContext::new(key, shard.shard_id()));
    Ok(WorkflowLease::new(context, release, mutable_state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::namespace::NamespaceId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key() -> ExecutionKey {
        ExecutionKey::new(NamespaceId::new("ns"), "wf", "run")
    }

    #[tokio::test]
    async fn test_fail_fast_while_locked() {
        let table = ExecutionLockTable::new();
        let release = table.acquire(&key(), LockMode::FailFast).await.unwrap();
        assert!(table.is_locked(&key()));

        let err = table.acquire(&key(), LockMode::FailFast).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Lease);

        release.call(None);
        assert!(!table.is_locked(&key()));
        assert!(table.acquire(&key(), LockMode::FailFast).await.is_ok());
    }

    #[tokio::test]
    async fn test_block_waits_for_release() {
        let table = Arc::new(ExecutionLockTable::new());
        let release = table.acquire(&key(), LockMode::Block).await.unwrap();

        let waiter = {
            let table = table.clone();
            tokio::spawn(async move { table.acquire(&key(), LockMode::Block).await.map(|_| ()) })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        release.call(None);
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_released_entries_are_removed() {
        let table = ExecutionLockTable::new();
        for run in 0..1000 {
            let key = ExecutionKey::new(NamespaceId::new("ns"), "wf", format!("run-{run}"));
            let release = table.acquire(&key, LockMode::FailFast).await.unwrap();
            release.call(None);
        }
        assert!(table.locks.is_empty());
    }

    #[tokio::test]
    async fn test_entry_kept_while_a_caller_waits() {
        let table = Arc::new(ExecutionLockTable::new());
        let release = table.acquire(&key(), LockMode::Block).await.unwrap();

        let waiter = {
            let table = table.clone();
            tokio::spawn(async move { table.acquire(&key(), LockMode::Block).await })
        };
        tokio::task::yield_now().await;

        release.call(None);
        assert_eq!(table.locks.len(), 1);

        let second = waiter.await.unwrap().unwrap();
        assert!(table.is_locked(&key()));
        second.call(None);
        assert!(table.locks.is_empty());
        assert!(!table.is_locked(&key()));
    }

    #[test]
    fn test_release_fn_runs_once_on_drop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let state = MutableState::new(
            crate::history::namespace::NamespaceEntry::local("ns", "orders"),
            "wf",
            "run",
            chrono::Utc::now(),
        );
        let lease = WorkflowLease::new(
            Arc::new(ExecutionContext::new(key(), 1)),
            ReleaseFn::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            state,
        );
        lease.release(None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
