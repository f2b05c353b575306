//! The `update_namespace_delete_delay` update.
//!
//! Lets an operator change or clear the wait between execution deletion and
//! namespace deletion while the reclamation is running.

use std::time::Duration;
use tracing::info;

use crate::error::ApplicationError;
use crate::reclaim::errors::VALIDATION_ERROR_TYPE;
use crate::workflow::{TimerId, UpdateHandler, UpdateScope};

pub const UPDATE_NAMESPACE_DELETE_DELAY: &str = "update_namespace_delete_delay";

/// Longest delay the update accepts.
pub const MAX_NAMESPACE_DELETE_DELAY: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Delay state shared between the workflow and the update handler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceDeleteDelay {
    /// Delay still to wait. Taken by the workflow when it starts a wait.
    pub delay: Duration,
    /// The delay timer while the workflow is waiting on it.
    pub pending_timer: Option<TimerId>,
}

impl NamespaceDeleteDelay {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending_timer: None,
        }
    }
}

fn validation_error(message: &str) -> ApplicationError {
    ApplicationError::non_retryable(message, VALIDATION_ERROR_TYPE)
}

fn parse_delay(argument: &str) -> Result<Duration, ApplicationError> {
    if argument.is_empty() {
        return Err(validation_error("delay duration is required"));
    }
    let (negative, magnitude) = match argument.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, argument.strip_prefix('+').unwrap_or(argument)),
    };
    let delay = if magnitude == "0" {
        Duration::ZERO
    } else {
        humantime::parse_duration(magnitude)
            .map_err(|_| validation_error("unable to parse delay duration"))?
    };
    if negative && !delay.is_zero() {
        return Err(validation_error("delay duration must be positive"));
    }
    Ok(delay)
}

/// Validator: a non-negative duration of at most 30 days.
pub fn validate_namespace_delete_delay(argument: &str) -> Result<(), ApplicationError> {
    let delay = parse_delay(argument)?;
    if delay > MAX_NAMESPACE_DELETE_DELAY {
        return Err(validation_error("delay duration must be less than 30 days"));
    }
    Ok(())
}

/// Handler: replace the delay and cancel the wait in progress, if any.
pub fn apply_namespace_delete_delay(
    scope: &mut UpdateScope<'_>,
    argument: &str,
) -> Result<String, ApplicationError> {
    let delay = parse_delay(argument)?;
    let replaying = scope.is_replaying();
    let state = scope
        .local_mut::<NamespaceDeleteDelay>()
        .ok_or_else(|| ApplicationError::non_retryable("namespace delete delay is not tracked", "InvalidState"))?;
    state.delay = delay;
    let pending_timer = state.pending_timer.take();

    let mut message = if delay.is_zero() {
        if !replaying {
            info!("Namespace delete delay is removed. Namespace will be deleted immediately after all workflow executions are deleted.");
        }
        "Namespace delete delay is removed.".to_string()
    } else {
        let formatted = humantime::format_duration(delay);
        if !replaying {
            info!(new_delete_delay = %formatted, "Namespace delete delay is updated.");
        }
        format!("Namespace delete delay is updated to {formatted}.")
    };

    if let Some(timer) = pending_timer {
        if scope.cancel_timer(timer) {
            if !replaying {
                info!("Existing namespace delete delay timer is cancelled.");
            }
            message = format!("Existing namespace delete delay timer is cancelled. {message}");
        }
    }
    Ok(message)
}

/// The update handler with its validator.
pub fn namespace_delete_delay_handler() -> UpdateHandler {
    UpdateHandler::new(UPDATE_NAMESPACE_DELETE_DELAY, apply_namespace_delete_delay)
        .with_validator(validate_namespace_delete_delay)
}
