//! [`NamespaceBackend`] double with scripted responses.
//!
//! Every operation pops its next scripted response; once the script runs
//! out it answers with a benign default (one empty page, zero executions,
//! success). All calls are recorded in order.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;

use durable_engine_core::error::ApplicationError;
use durable_engine_core::history::NamespaceId;
use durable_engine_core::reclaim::{
    DeleteExecutionsPageRequest, DeleteExecutionsPageResult, NamespaceBackend,
};

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    IsAdvancedVisibility { namespace: String },
    CountExecutions { namespace: String },
    DeleteExecutionsPage { next_page_token: Option<String> },
    EnsureNoExecutions { not_deleted_count: u64 },
    DeleteNamespace { namespace_id: NamespaceId, namespace: String },
}

#[derive(Default)]
struct Script {
    counts: VecDeque<Result<u64, ApplicationError>>,
    pages: VecDeque<Result<DeleteExecutionsPageResult, ApplicationError>>,
    ensures: VecDeque<Result<(), ApplicationError>>,
    deletes: VecDeque<Result<(), ApplicationError>>,
}

#[derive(Default)]
pub struct ScriptedNamespaceBackend {
    script: Mutex<Script>,
    calls: Mutex<Vec<BackendCall>>,
}

impl ScriptedNamespaceBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next execution count to report.
    pub fn push_count(&self, count: Result<u64, ApplicationError>) -> &Self {
        self.script.lock().counts.push_back(count);
        self
    }

    pub fn push_page(&self, page: Result<DeleteExecutionsPageResult, ApplicationError>) -> &Self {
        self.script.lock().pages.push_back(page);
        self
    }

    /// Script consecutive pages from `(success, error)` counts, chained
    /// with page tokens.
    pub fn push_pages(&self, pages: &[(u64, u64)]) -> &Self {
        let mut script = self.script.lock();
        for (index, (success_count, error_count)) in pages.iter().enumerate() {
            let next_page_token = (index + 1 < pages.len()).then(|| format!("page-{}", index + 1));
            script.pages.push_back(Ok(DeleteExecutionsPageResult {
                success_count: *success_count,
                error_count: *error_count,
                next_page_token,
            }));
        }
        self
    }

    pub fn push_ensure(&self, outcome: Result<(), ApplicationError>) -> &Self {
        self.script.lock().ensures.push_back(outcome);
        self
    }

    pub fn push_delete_namespace(&self, outcome: Result<(), ApplicationError>) -> &Self {
        self.script.lock().deletes.push_back(outcome);
        self
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().clone()
    }

    /// Number of recorded calls matching `filter`.
    pub fn call_count(&self, filter: impl Fn(&BackendCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|call| filter(call)).count()
    }

    pub fn delete_namespace_calls(&self) -> usize {
        self.call_count(|call| matches!(call, BackendCall::DeleteNamespace { .. }))
    }

    pub fn page_calls(&self) -> usize {
        self.call_count(|call| matches!(call, BackendCall::DeleteExecutionsPage { .. }))
    }

    fn record(&self, call: BackendCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl NamespaceBackend for ScriptedNamespaceBackend {
    async fn is_advanced_visibility(&self, namespace: &str) -> Result<bool, ApplicationError> {
        self.record(BackendCall::IsAdvancedVisibility {
            namespace: namespace.to_string(),
        });
        Ok(true)
    }

    async fn count_executions(
        &self,
        _namespace_id: &NamespaceId,
        namespace: &str,
    ) -> Result<u64, ApplicationError> {
        self.record(BackendCall::CountExecutions {
            namespace: namespace.to_string(),
        });
        self.script.lock().counts.pop_front().unwrap_or(Ok(0))
    }

    async fn delete_executions_page(
        &self,
        request: DeleteExecutionsPageRequest,
    ) -> Result<DeleteExecutionsPageResult, ApplicationError> {
        self.record(BackendCall::DeleteExecutionsPage {
            next_page_token: request.next_page_token,
        });
        self.script
            .lock()
            .pages
            .pop_front()
            .unwrap_or_else(|| Ok(DeleteExecutionsPageResult::default()))
    }

    async fn ensure_no_executions(
        &self,
        _namespace_id: &NamespaceId,
        _namespace: &str,
        not_deleted_count: u64,
    ) -> Result<(), ApplicationError> {
        self.record(BackendCall::EnsureNoExecutions { not_deleted_count });
        self.script.lock().ensures.pop_front().unwrap_or(Ok(()))
    }

    async fn delete_namespace(
        &self,
        namespace_id: &NamespaceId,
        namespace: &str,
    ) -> Result<(), ApplicationError> {
        self.record(BackendCall::DeleteNamespace {
            namespace_id: namespace_id.clone(),
            namespace: namespace.to_string(),
        });
        self.script.lock().deletes.pop_front().unwrap_or(Ok(()))
    }
}
