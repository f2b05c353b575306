//! Activities of the reclamation workflows.
//!
//! Each activity is a thin adapter over [`NamespaceBackend`], the port to
//! the visibility store and namespace registry.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::ApplicationError;
use crate::history::NamespaceId;
use crate::workflow::Activity;

/// Request for one page of bulk deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteExecutionsPageRequest {
    pub namespace_id: NamespaceId,
    pub namespace: String,
    pub page_size: u32,
    pub rps: u32,
    /// Absent for the first page.
    pub next_page_token: Option<String>,
}

/// Outcome of one page of bulk deletion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteExecutionsPageResult {
    pub success_count: u64,
    pub error_count: u64,
    /// Absent when this was the last page.
    pub next_page_token: Option<String>,
}

/// Visibility and namespace registry operations used by reclamation.
#[async_trait]
pub trait NamespaceBackend: Send + Sync {
    async fn is_advanced_visibility(&self, namespace: &str) -> Result<bool, ApplicationError>;

    async fn count_executions(
        &self,
        namespace_id: &NamespaceId,
        namespace: &str,
    ) -> Result<u64, ApplicationError>;

    async fn delete_executions_page(
        &self,
        request: DeleteExecutionsPageRequest,
    ) -> Result<DeleteExecutionsPageResult, ApplicationError>;

    /// Fails with one of the residual-execution error types while
    /// executions remain, with the remaining count as details.
    async fn ensure_no_executions(
        &self,
        namespace_id: &NamespaceId,
        namespace: &str,
        not_deleted_count: u64,
    ) -> Result<(), ApplicationError>;

    async fn delete_namespace(
        &self,
        namespace_id: &NamespaceId,
        namespace: &str,
    ) -> Result<(), ApplicationError>;
}

/// Namespace id and name, the input of most reclamation activities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceRef {
    pub namespace_id: NamespaceId,
    pub namespace: String,
}

impl NamespaceRef {
    pub fn new(namespace_id: &NamespaceId, namespace: &str) -> Self {
        Self {
            namespace_id: namespace_id.clone(),
            namespace: namespace.to_string(),
        }
    }
}

/// Input of [`EnsureNoExecutionsActivity`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnsureNoExecutionsInput {
    #[serde(flatten)]
    pub namespace: NamespaceRef,
    pub not_deleted_count: u64,
}

/// Legacy probe kept so histories that recorded it still replay.
#[derive(Clone)]
pub struct IsAdvancedVisibilityActivity(pub Arc<dyn NamespaceBackend>);

#[async_trait]
impl Activity for IsAdvancedVisibilityActivity {
    const TYPE_ID: &'static str = "IsAdvancedVisibilityActivity";

    type Input = String;
    type Output = bool;

    async fn execute(&self, namespace: String) -> Result<bool, ApplicationError> {
        self.0.is_advanced_visibility(&namespace).await
    }
}

#[derive(Clone)]
pub struct CountExecutionsActivity(pub Arc<dyn NamespaceBackend>);

#[async_trait]
impl Activity for CountExecutionsActivity {
    const TYPE_ID: &'static str = "CountExecutionsAdvVisibilityActivity";

    type Input = NamespaceRef;
    type Output = u64;

    async fn execute(&self, input: NamespaceRef) -> Result<u64, ApplicationError> {
        self.0
            .count_executions(&input.namespace_id, &input.namespace)
            .await
    }
}

#[derive(Clone)]
pub struct DeleteExecutionsPageActivity(pub Arc<dyn NamespaceBackend>);

#[async_trait]
impl Activity for DeleteExecutionsPageActivity {
    const TYPE_ID: &'static str = "DeleteExecutionsPageActivity";

    type Input = DeleteExecutionsPageRequest;
    type Output = DeleteExecutionsPageResult;

    async fn execute(
        &self,
        input: DeleteExecutionsPageRequest,
    ) -> Result<DeleteExecutionsPageResult, ApplicationError> {
        self.0.delete_executions_page(input).await
    }
}

#[derive(Clone)]
pub struct EnsureNoExecutionsActivity(pub Arc<dyn NamespaceBackend>);

#[async_trait]
impl Activity for EnsureNoExecutionsActivity {
    const TYPE_ID: &'static str = "EnsureNoExecutionsAdvVisibilityActivity";

    type Input = EnsureNoExecutionsInput;
    type Output = ();

    async fn execute(&self, input: EnsureNoExecutionsInput) -> Result<(), ApplicationError> {
        self.0
            .ensure_no_executions(
                &input.namespace.namespace_id,
                &input.namespace.namespace,
                input.not_deleted_count,
            )
            .await
    }
}

#[derive(Clone)]
pub struct DeleteNamespaceActivity(pub Arc<dyn NamespaceBackend>);

#[async_trait]
impl Activity for DeleteNamespaceActivity {
    const TYPE_ID: &'static str = "DeleteNamespaceActivity";

    type Input = NamespaceRef;
    type Output = ();

    async fn execute(&self, input: NamespaceRef) -> Result<(), ApplicationError> {
        self.0
            .delete_namespace(&input.namespace_id, &input.namespace)
            .await
    }
}
