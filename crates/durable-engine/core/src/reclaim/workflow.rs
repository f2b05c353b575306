//! Namespace reclamation workflow.
//!
//! Runs after a namespace has been marked deleted: waits for namespace
//! caches to refresh, deletes every execution through a child workflow,
//! verifies nothing is left, honours an optional, updatable delay and
//! finally removes the namespace record.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::error::ApplicationError;
use crate::port::{metrics::names, metrics::tags, MetricsHandler};
use crate::reclaim::activities::{
    CountExecutionsActivity, DeleteNamespaceActivity, EnsureNoExecutionsActivity,
    EnsureNoExecutionsInput, IsAdvancedVisibilityActivity, NamespaceBackend, NamespaceRef,
};
use crate::reclaim::delay::{namespace_delete_delay_handler, NamespaceDeleteDelay};
use crate::reclaim::delete_executions::DeleteExecutionsWorkflow;
use crate::reclaim::errors::{ReclaimError, ReclaimFailure, RESIDUAL_EXECUTIONS_ERROR_TYPES};
use crate::reclaim::{ReclaimResourcesParams, ReclaimResourcesResult};
use crate::workflow::{
    Activity, ActivityOptions, ChildWorkflowOptions, DurableWorkflow, LocalActivityOptions,
    RetryPolicy, WorkflowContext, WorkflowError, DEFAULT_VERSION, WORKFLOW_FAILED_ERROR_TYPE,
};

/// Task queue of the namespace deletion activities.
pub const DELETE_NAMESPACE_ACTIVITY_TASK_QUEUE: &str = "temporal-sys-delete-namespace-activity-tq";

/// Version marker guarding the legacy visibility probe.
pub const REMOVE_STANDARD_VISIBILITY_CHANGE_ID: &str = "remove-std-vis";

/// Timeouts and retry policies of the reclamation steps.
#[derive(Debug, Clone, PartialEq)]
pub struct ReclaimOptions {
    /// Wait for namespace caches to observe the deleted state.
    pub cache_refresh_delay: Duration,
    pub local_activity: LocalActivityOptions,
    pub delete_executions: ChildWorkflowOptions,
    pub ensure_no_executions: ActivityOptions,
}

impl Default for ReclaimOptions {
    fn default() -> Self {
        let retry_policy = RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(10));
        Self {
            cache_refresh_delay: Duration::from_secs(11),
            local_activity: LocalActivityOptions::new(Duration::from_secs(30))
                .with_schedule_to_close_timeout(Duration::from_secs(5 * 60))
                .with_retry_policy(retry_policy.clone()),
            delete_executions: ChildWorkflowOptions::default()
                .with_task_queue(DELETE_NAMESPACE_ACTIVITY_TASK_QUEUE)
                .with_retry_policy(retry_policy),
            ensure_no_executions: ActivityOptions::new(Duration::from_secs(30))
                .with_task_queue(DELETE_NAMESPACE_ACTIVITY_TASK_QUEUE)
                // Visibility controls the pace; this is only an upper bound.
                .with_schedule_to_close_timeout(Duration::from_secs(10 * 60 * 60))
                .with_retry_policy(
                    RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(2 * 60))
                        .with_backoff_coefficient(2.0),
                ),
        }
    }
}

/// Deletes the executions and then the record of a deleted namespace.
pub struct ReclaimResourcesWorkflow {
    backend: Arc<dyn NamespaceBackend>,
    delete_executions: Arc<DeleteExecutionsWorkflow>,
    options: ReclaimOptions,
}

impl ReclaimResourcesWorkflow {
    pub fn new(backend: Arc<dyn NamespaceBackend>) -> Self {
        let delete_executions = Arc::new(DeleteExecutionsWorkflow::new(Arc::clone(&backend)));
        Self {
            backend,
            delete_executions,
            options: ReclaimOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ReclaimOptions) -> Self {
        self.options = options;
        self
    }

    /// Replace the child workflow, e.g. to tune its page options.
    pub fn with_delete_executions(mut self, workflow: Arc<DeleteExecutionsWorkflow>) -> Self {
        self.delete_executions = workflow;
        self
    }

    pub fn options(&self) -> &ReclaimOptions {
        &self.options
    }

    async fn reclaim(
        &self,
        ctx: &mut WorkflowContext,
        params: &ReclaimResourcesParams,
        result: &mut ReclaimResourcesResult,
    ) -> Result<(), ReclaimError> {
        ctx.insert_local(NamespaceDeleteDelay::new(params.namespace_delete_delay));
        ctx.set_update_handler(namespace_delete_delay_handler())
            .map_err(ReclaimError::UnableToSetUpdateHandler)?;

        ctx.sleep(self.options.cache_refresh_delay).await?;

        self.delete_workflow_executions(ctx, params, result).await?;

        self.await_namespace_delete_delay(ctx).await?;

        let activity = DeleteNamespaceActivity(Arc::clone(&self.backend));
        ctx.execute_local_activity(
            &activity,
            NamespaceRef::new(params.namespace_id(), params.namespace()),
            self.options.local_activity.clone(),
        )
        .await
        .map_err(|e| ReclaimError::activity(DeleteNamespaceActivity::TYPE_ID, e))?;

        result.namespace_deleted = true;
        Ok(())
    }

    async fn delete_workflow_executions(
        &self,
        ctx: &mut WorkflowContext,
        params: &ReclaimResourcesParams,
        result: &mut ReclaimResourcesResult,
    ) -> Result<(), ReclaimError> {
        let version = ctx
            .get_version(REMOVE_STANDARD_VISIBILITY_CHANGE_ID, DEFAULT_VERSION, 0)
            .await?;
        if version == DEFAULT_VERSION {
            // Histories recorded before the change still contain the probe.
            let probe = IsAdvancedVisibilityActivity(Arc::clone(&self.backend));
            ctx.execute_local_activity(
                &probe,
                params.namespace().to_string(),
                self.options.local_activity.clone(),
            )
            .await
            .map_err(|e| ReclaimError::activity(IsAdvancedVisibilityActivity::TYPE_ID, e))?;
        }

        let count = CountExecutionsActivity(Arc::clone(&self.backend));
        let executions_count = ctx
            .execute_local_activity(
                &count,
                NamespaceRef::new(params.namespace_id(), params.namespace()),
                self.options.local_activity.clone(),
            )
            .await
            .map_err(|e| ReclaimError::activity(CountExecutionsActivity::TYPE_ID, e))?;
        if executions_count == 0 {
            return Ok(());
        }

        let child_options = self.options.delete_executions.clone().with_workflow_id(format!(
            "{}/{}",
            DeleteExecutionsWorkflow::TYPE_ID,
            params.namespace()
        ));
        let deleted = ctx
            .execute_child_workflow(
                Arc::clone(&self.delete_executions),
                params.delete_executions.clone(),
                child_options,
            )
            .await
            .map_err(|e| {
                if !ctx.is_replaying() {
                    tracing::error!(error = %e, "Unable to execute child workflow.");
                }
                ReclaimError::child_workflow(DeleteExecutionsWorkflow::TYPE_ID, e)
            })?;
        result.delete_success_count = deleted.success_count;
        result.delete_error_count = deleted.error_count;

        let ensure = EnsureNoExecutionsActivity(Arc::clone(&self.backend));
        let input = EnsureNoExecutionsInput {
            namespace: NamespaceRef::new(params.namespace_id(), params.namespace()),
            not_deleted_count: deleted.error_count,
        };
        match ctx
            .execute_activity(&ensure, input, self.options.ensure_no_executions.clone())
            .await
        {
            Ok(()) => Ok(()),
            Err(error) => match residual_executions(&error) {
                Some(failure) => {
                    if !ctx.is_replaying() {
                        info!(
                            counter = failure.details_as::<u64>().unwrap_or_default(),
                            "Unable to delete workflow executions."
                        );
                    }
                    Err(ReclaimError::Application(failure))
                }
                None => Err(ReclaimError::activity(EnsureNoExecutionsActivity::TYPE_ID, error)),
            },
        }
    }

    async fn await_namespace_delete_delay(
        &self,
        ctx: &mut WorkflowContext,
    ) -> Result<(), ReclaimError> {
        loop {
            let delay = ctx
                .local_mut::<NamespaceDeleteDelay>()
                .map(|state| std::mem::take(&mut state.delay))
                .unwrap_or_default();
            if delay.is_zero() {
                return Ok(());
            }
            if !ctx.is_replaying() {
                info!(
                    duration = %humantime::format_duration(delay),
                    "Delaying namespace delete. Send 'update_namespace_delete_delay' update to change or clear the delay."
                );
            }

            let timer = ctx.start_timer(delay).await?;
            if let Some(state) = ctx.local_mut::<NamespaceDeleteDelay>() {
                state.pending_timer = Some(timer);
            }
            let outcome = ctx.await_timer(timer).await;
            if let Some(state) = ctx.local_mut::<NamespaceDeleteDelay>() {
                state.pending_timer = None;
            }
            outcome?;
        }
    }

    fn emit_metrics(
        &self,
        ctx: &WorkflowContext,
        namespace: &str,
        result: &ReclaimResourcesResult,
    ) {
        let metrics = ctx.metrics();
        let tags = [(tags::NAMESPACE, namespace)];
        if result.namespace_deleted {
            metrics.counter(names::RECLAIM_RESOURCES_NAMESPACE_DELETE_SUCCESS_COUNT, 1, &tags);
        } else {
            metrics.counter(names::RECLAIM_RESOURCES_NAMESPACE_DELETE_FAILURE_COUNT, 1, &tags);
        }
        if result.delete_success_count > 0 {
            metrics.counter(
                names::RECLAIM_RESOURCES_DELETE_EXECUTIONS_SUCCESS_COUNT,
                result.delete_success_count,
                &tags,
            );
        }
        if result.delete_error_count > 0 {
            metrics.counter(
                names::RECLAIM_RESOURCES_DELETE_EXECUTIONS_FAILURE_COUNT,
                result.delete_error_count,
                &tags,
            );
        }
    }
}

/// Ensure-no-executions failures that the outer retry policy should retry,
/// re-classified as retryable with the remaining count as details.
fn residual_executions(error: &WorkflowError) -> Option<ApplicationError> {
    let failure = error.application_failure()?;
    if !failure.has_type(&RESIDUAL_EXECUTIONS_ERROR_TYPES) {
        return None;
    }
    let not_deleted_count = failure.details_as::<u64>().unwrap_or_default();
    Some(
        ApplicationError::retryable(failure.message(), failure.error_type())
            .with_details(&not_deleted_count),
    )
}

#[async_trait]
impl DurableWorkflow for ReclaimResourcesWorkflow {
    const TYPE_ID: &'static str = "temporal-sys-reclaim-namespace-resources-workflow";

    type Input = ReclaimResourcesParams;
    type Output = ReclaimResourcesResult;
    type Error = ReclaimFailure;

    async fn run(
        &self,
        ctx: &mut WorkflowContext,
        mut params: ReclaimResourcesParams,
    ) -> Result<ReclaimResourcesResult, ReclaimFailure> {
        if !ctx.is_replaying() {
            info!(
                workflow_type = Self::TYPE_ID,
                namespace = %params.namespace(),
                namespace_id = %params.namespace_id(),
                "Workflow started."
            );
        }

        let mut result = ReclaimResourcesResult::default();
        if let Err(failure) = params.validate() {
            return Err(ReclaimFailure::new(result, ReclaimError::InvalidParams(failure)));
        }

        let outcome = self.reclaim(ctx, &params, &mut result).await;
        self.emit_metrics(ctx, params.namespace(), &result);

        match outcome {
            Ok(()) => {
                if !ctx.is_replaying() {
                    info!(namespace = %params.namespace(), "Workflow finished successfully.");
                }
                Ok(result)
            }
            Err(error) => Err(ReclaimFailure::new(result, error)),
        }
    }

    fn failure(error: &ReclaimFailure) -> ApplicationError {
        match &error.error {
            ReclaimError::InvalidParams(failure) | ReclaimError::Application(failure) => {
                failure.clone()
            }
            other if other.is_retryable() => {
                ApplicationError::retryable(other.to_string(), WORKFLOW_FAILED_ERROR_TYPE)
            }
            other => ApplicationError::non_retryable(other.to_string(), WORKFLOW_FAILED_ERROR_TYPE),
        }
    }
}
