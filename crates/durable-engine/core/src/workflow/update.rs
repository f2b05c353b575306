//! Workflow updates, timer bookkeeping and per-instance local state.
//!
//! An update is a named request delivered to a running instance. Its
//! validator runs first and may reject the request without touching state;
//! an accepted update is recorded in history and its handler re-runs on
//! replay, so handlers must be deterministic too.

use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::error::ApplicationError;
use crate::workflow::UpdateError;

type HandlerFn =
    dyn Fn(&mut UpdateScope<'_>, &str) -> Result<String, ApplicationError> + Send + Sync;
type ValidatorFn = dyn Fn(&str) -> Result<(), ApplicationError> + Send + Sync;

/// Named update handler with an optional validator.
#[derive(Clone)]
pub struct UpdateHandler {
    name: String,
    handler: Arc<HandlerFn>,
    validator: Option<Arc<ValidatorFn>>,
}

impl UpdateHandler {
    pub fn new<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut UpdateScope<'_>, &str) -> Result<String, ApplicationError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            handler: Arc::new(handler),
            validator: None,
        }
    }

    pub fn with_validator<V>(mut self, validator: V) -> Self
    where
        V: Fn(&str) -> Result<(), ApplicationError> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn validate(&self, argument: &str) -> Result<(), ApplicationError> {
        match &self.validator {
            Some(validator) => validator(argument),
            None => Ok(()),
        }
    }

    pub(crate) fn handle(
        &self,
        scope: &mut UpdateScope<'_>,
        argument: &str,
    ) -> Result<String, ApplicationError> {
        (self.handler)(scope, argument)
    }
}

impl fmt::Debug for UpdateHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateHandler")
            .field("name", &self.name)
            .field("has_validator", &self.validator.is_some())
            .finish()
    }
}

/// An update in flight to a running instance.
#[derive(Debug)]
pub struct UpdateRequest {
    pub update_id: String,
    pub name: String,
    pub argument: String,
    pub(crate) reply: oneshot::Sender<Result<String, UpdateError>>,
}

impl UpdateRequest {
    pub(crate) fn new(
        name: impl Into<String>,
        argument: impl Into<String>,
    ) -> (Self, oneshot::Receiver<Result<String, UpdateError>>) {
        let (reply, receiver) = oneshot::channel();
        let request = Self {
            update_id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            argument: argument.into(),
            reply,
        };
        (request, receiver)
    }

    pub(crate) fn respond(self, outcome: Result<String, UpdateError>) {
        // The caller may have stopped waiting.
        let _ = self.reply.send(outcome);
    }
}

/// State shared between workflow code and its update handlers.
///
/// One value per type. Workflow code seeds values with
/// [`WorkflowContext::insert_local`](crate::workflow::WorkflowContext::insert_local)
/// and handlers reach them through [`UpdateScope::local_mut`].
#[derive(Default)]
pub struct InstanceLocals {
    values: HashMap<TypeId, Box<dyn Any + Send>>,
}

impl InstanceLocals {
    pub fn insert<T: Any + Send>(&mut self, value: T) {
        self.values.insert(TypeId::of::<T>(), Box::new(value));
    }

    pub fn get<T: Any + Send>(&self) -> Option<&T> {
        self.values
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    pub fn get_mut<T: Any + Send>(&mut self) -> Option<&mut T> {
        self.values
            .get_mut(&TypeId::of::<T>())
            .and_then(|value| value.downcast_mut::<T>())
    }
}

impl fmt::Debug for InstanceLocals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceLocals")
            .field("len", &self.values.len())
            .finish()
    }
}

/// Handle to a durable timer, scoped to one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimerId(pub u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

/// How a timer resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerOutcome {
    Fired,
    Canceled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerState {
    Pending,
    CancelRequested,
}

#[derive(Debug, Clone)]
pub(crate) struct TimerEntry {
    pub(crate) fire_at: chrono::DateTime<chrono::Utc>,
    pub(crate) state: TimerState,
}

/// Unresolved timers of one instance.
#[derive(Debug, Default)]
pub struct TimerTable {
    timers: HashMap<TimerId, TimerEntry>,
}

impl TimerTable {
    pub(crate) fn insert(&mut self, id: TimerId, fire_at: chrono::DateTime<chrono::Utc>) {
        self.timers.insert(
            id,
            TimerEntry {
                fire_at,
                state: TimerState::Pending,
            },
        );
    }

    pub(crate) fn get(&self, id: TimerId) -> Option<&TimerEntry> {
        self.timers.get(&id)
    }

    pub(crate) fn remove(&mut self, id: TimerId) {
        self.timers.remove(&id);
    }

    /// Request cancellation. False when the timer is unknown or already
    /// resolved or already cancelled.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        match self.timers.get_mut(&id) {
            Some(entry) if entry.state == TimerState::Pending => {
                entry.state = TimerState::CancelRequested;
                true
            }
            _ => false,
        }
    }

    pub fn is_pending(&self, id: TimerId) -> bool {
        matches!(self.timers.get(&id), Some(entry) if entry.state == TimerState::Pending)
    }

    pub(crate) fn is_cancel_requested(&self, id: TimerId) -> bool {
        matches!(self.timers.get(&id), Some(entry) if entry.state == TimerState::CancelRequested)
    }
}

/// What an update handler may touch.
pub struct UpdateScope<'a> {
    locals: &'a mut InstanceLocals,
    timers: &'a mut TimerTable,
    replaying: bool,
}

impl<'a> UpdateScope<'a> {
    pub(crate) fn new(
        locals: &'a mut InstanceLocals,
        timers: &'a mut TimerTable,
        replaying: bool,
    ) -> Self {
        Self {
            locals,
            timers,
            replaying,
        }
    }

    pub fn local<T: Any + Send>(&self) -> Option<&T> {
        self.locals.get::<T>()
    }

    pub fn local_mut<T: Any + Send>(&mut self) -> Option<&mut T> {
        self.locals.get_mut::<T>()
    }

    /// Cancel a pending timer. Returns true when the timer was pending.
    pub fn cancel_timer(&mut self, id: TimerId) -> bool {
        self.timers.cancel(id)
    }

    /// True while the handler is re-running from history.
    pub fn is_replaying(&self) -> bool {
        self.replaying
    }
}
