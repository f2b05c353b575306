//! Build the mutable state of a brand-new run.

use std::time::Duration;

use super::mutable_state::MutableState;
use super::namespace::NamespaceEntry;
use super::request::{HistoryStartRequest, ParentExecutionInfo, SignalWithStartRequest, duration_value};
use super::shard::ShardContext;
use crate::error::Result;
use crate::event::{EventId, HistoryEvent};

/// Empty state for a new run, attached to a fresh history branch.
pub fn create_mutable_state(
    shard: &dyn ShardContext,
    namespace_entry: &NamespaceEntry,
    execution_timeout: Duration,
    run_timeout: Duration,
    workflow_id: &str,
    run_id: &str,
) -> Result<MutableState> {
    let mut state = MutableState::new(namespace_entry.clone(), workflow_id, run_id, shard.now());
    let branch = shard.new_history_branch(namespace_entry.id(), workflow_id, run_id)?;
    state.set_history_tree(branch, execution_timeout, run_timeout)?;
    Ok(state)
}

/// Schedule the first workflow task unless the run is a child, whose first
/// task is scheduled by the parent's start transaction.
pub fn generate_first_workflow_task(
    state: &mut MutableState,
    parent: Option<&ParentExecutionInfo>,
    start_event: &HistoryEvent,
    bypass_task_generation: bool,
) -> Result<Option<EventId>> {
    if parent.is_some() {
        return Ok(None);
    }
    state.add_first_workflow_task_scheduled(start_event, bypass_task_generation)
}

/// Create the complete initial state of a run: started event, optional
/// signal, first workflow task, and the eager-start transition.
///
/// Either the whole state is returned or an error is; partially built state
/// never escapes.
pub fn new_workflow_with_signal(
    shard: &dyn ShardContext,
    namespace_entry: &NamespaceEntry,
    workflow_id: &str,
    run_id: &str,
    start_request: &HistoryStartRequest,
    signal_with_start: Option<&SignalWithStartRequest>,
) -> Result<MutableState> {
    let start = &start_request.start_request;
    let mut state = create_mutable_state(
        shard,
        namespace_entry,
        duration_value(start.workflow_execution_timeout.as_ref()),
        duration_value(start.workflow_run_timeout.as_ref()),
        workflow_id,
        run_id,
    )?;

    let start_event = state.add_workflow_execution_started_event(start_request)?;

    if let Some(signal) = signal_with_start {
        if !signal.request_id.is_empty() {
            state.add_signal_requested(signal.request_id.clone());
        }
        state.add_workflow_execution_signaled(
            &signal.signal_name,
            signal.signal_input.as_ref(),
            &signal.identity,
            signal.header.as_ref(),
        )?;
    }

    let eager = start.request_eager_execution;
    let scheduled = generate_first_workflow_task(
        &mut state,
        start_request.parent_execution_info.as_ref(),
        &start_event,
        eager,
    )?;

    if eager && state.has_pending_workflow_task() {
        if let Some(scheduled_event_id) = scheduled {
            state.add_workflow_task_started_event(
                scheduled_event_id,
                &start.request_id,
                start.task_queue.as_ref(),
                &start.identity,
            )?;
        }
    }

    Ok(state)
}
