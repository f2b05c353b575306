use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;

use crate::error::ApplicationError;
use crate::event::InstanceId;
use crate::workflow::{DurableWorkflow, WorkflowError, WorkflowHandle, WorkflowRuntime};

/// Type-erased durable workflow for storage in the registry.
#[async_trait]
pub trait DynDurableWorkflow: Send + Sync {
    fn workflow_type(&self) -> &'static str;

    /// Version of the workflow definition.
    fn version(&self) -> u32;

    /// Start a new instance with JSON input.
    async fn start_dyn(
        &self,
        runtime: &WorkflowRuntime,
        instance_id: InstanceId,
        input: Value,
    ) -> Result<WorkflowHandle<Value, ApplicationError>, WorkflowError>;

    /// Resume an instance from its history.
    async fn resume_dyn(
        &self,
        runtime: &WorkflowRuntime,
        instance_id: InstanceId,
    ) -> Result<WorkflowHandle<Value, ApplicationError>, WorkflowError>;
}

struct RegisteredWorkflow<W>(Arc<W>);

#[async_trait]
impl<W: DurableWorkflow> DynDurableWorkflow for RegisteredWorkflow<W> {
    fn workflow_type(&self) -> &'static str {
        W::TYPE_ID
    }

    fn version(&self) -> u32 {
        W::VERSION
    }

    async fn start_dyn(
        &self,
        runtime: &WorkflowRuntime,
        instance_id: InstanceId,
        input: Value,
    ) -> Result<WorkflowHandle<Value, ApplicationError>, WorkflowError> {
        let typed_input: W::Input = serde_json::from_value(input).map_err(|e| {
            WorkflowError::Serialization(format!("Invalid input for {}: {}", W::TYPE_ID, e))
        })?;
        let handle = runtime
            .start(Arc::clone(&self.0), instance_id, typed_input)
            .await?;
        Ok(handle.erase(W::failure))
    }

    async fn resume_dyn(
        &self,
        runtime: &WorkflowRuntime,
        instance_id: InstanceId,
    ) -> Result<WorkflowHandle<Value, ApplicationError>, WorkflowError> {
        let handle = runtime.resume(Arc::clone(&self.0), instance_id).await?;
        Ok(handle.erase(W::failure))
    }
}

/// Registry for durable workflows.
#[derive(Default)]
pub struct WorkflowRegistry {
    workflows: DashMap<String, Arc<dyn DynDurableWorkflow>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self {
            workflows: DashMap::new(),
        }
    }

    /// Register a durable workflow under its type id.
    pub fn register_workflow<W: DurableWorkflow>(&self, workflow: Arc<W>) {
        self.workflows
            .insert(W::TYPE_ID.to_string(), Arc::new(RegisteredWorkflow(workflow)));
    }

    /// Get a workflow by type ID.
    pub fn get_workflow(&self, type_id: &str) -> Option<Arc<dyn DynDurableWorkflow>> {
        self.workflows.get(type_id).map(|r| r.value().clone())
    }

    /// Check if workflow is registered.
    pub fn has_workflow(&self, type_id: &str) -> bool {
        self.workflows.contains_key(type_id)
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }

    /// All registered workflow type IDs.
    pub fn workflow_keys(&self) -> Vec<String> {
        self.workflows
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }
}

impl std::fmt::Debug for WorkflowRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowRegistry")
            .field("workflows", &self.workflow_keys())
            .finish()
    }
}
