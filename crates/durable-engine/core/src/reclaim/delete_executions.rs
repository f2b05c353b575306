//! Child workflow that deletes every execution of a namespace, page by page.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::error::ApplicationError;
use crate::reclaim::activities::{
    DeleteExecutionsPageActivity, DeleteExecutionsPageRequest, NamespaceBackend,
};
use crate::reclaim::{DeleteExecutionsParams, DeleteExecutionsResult};
use crate::workflow::{
    ActivityOptions, DurableWorkflow, RetryPolicy, WorkflowContext, WorkflowError,
    WORKFLOW_FAILED_ERROR_TYPE,
};

pub struct DeleteExecutionsWorkflow {
    backend: Arc<dyn NamespaceBackend>,
    page_options: ActivityOptions,
}

impl DeleteExecutionsWorkflow {
    pub fn new(backend: Arc<dyn NamespaceBackend>) -> Self {
        Self {
            backend,
            page_options: ActivityOptions::new(Duration::from_secs(60))
                .with_retry_policy(RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(10))),
        }
    }

    pub fn with_page_options(mut self, options: ActivityOptions) -> Self {
        self.page_options = options;
        self
    }
}

#[async_trait]
impl DurableWorkflow for DeleteExecutionsWorkflow {
    const TYPE_ID: &'static str = "temporal-sys-delete-executions-workflow";

    type Input = DeleteExecutionsParams;
    type Output = DeleteExecutionsResult;
    type Error = WorkflowError;

    async fn run(
        &self,
        ctx: &mut WorkflowContext,
        mut params: DeleteExecutionsParams,
    ) -> Result<DeleteExecutionsResult, WorkflowError> {
        params.config.apply_defaults();
        let activity = DeleteExecutionsPageActivity(Arc::clone(&self.backend));

        let mut result = DeleteExecutionsResult::default();
        let mut next_page_token = None;
        loop {
            let request = DeleteExecutionsPageRequest {
                namespace_id: params.namespace_id.clone(),
                namespace: params.namespace.clone(),
                page_size: params.config.page_size,
                rps: params.config.delete_activity_rps,
                next_page_token: next_page_token.take(),
            };
            let page = ctx
                .execute_activity(&activity, request, self.page_options.clone())
                .await?;
            result.success_count += page.success_count;
            result.error_count += page.error_count;

            match page.next_page_token {
                Some(token) => next_page_token = Some(token),
                None => break,
            }
        }

        if !ctx.is_replaying() {
            info!(
                namespace = %params.namespace,
                success_count = result.success_count,
                error_count = result.error_count,
                "Workflow executions deleted"
            );
        }
        Ok(result)
    }

    fn failure(error: &WorkflowError) -> ApplicationError {
        error.application_failure().cloned().unwrap_or_else(|| {
            ApplicationError::retryable(error.to_string(), WORKFLOW_FAILED_ERROR_TYPE)
        })
    }
}
