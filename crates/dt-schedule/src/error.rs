//! Error taxonomy for scheduling.
//!
//! | Error                               | Scope     | Effect                               |
//! |-------------------------------------|-----------|--------------------------------------|
//! | [`SchedulerError::Callback`]        | one call  | logged + broadcast, run continues    |
//! | [`SchedulerError::EngineScheduling`]| one entry | expectation fails + broadcast        |
//! | [`SchedulerError::EngineRun`]       | global    | scheduler `Failed`, pending entries fail |
//! | [`SchedulerError::PastInstant`]     | caller    | returned from `schedule`             |
//!
//! Every variant is `Clone` so a single error can be delivered to any number
//! of expectation holders and stream subscribers.

use std::any::Any;

use dt_time::{Instant, SubscriptionId, TimeError};
use thiserror::Error;

use crate::SchedulerState;

/// Failure reported by the external engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("cannot schedule {at}: {reason}")]
    Unsupported { at: Instant, reason: String },

    #[error("engine has already terminated")]
    Terminated,

    #[error("engine failed while advancing: {0}")]
    Run(String),
}

/// Failure raised inside a fired callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CallbackError {
    message:  String,
    panicked: bool,
}

impl CallbackError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), panicked: false }
    }

    /// Build from a `catch_unwind` payload.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            format!("callback panicked: {s}")
        } else if let Some(s) = payload.downcast_ref::<String>() {
            format!("callback panicked: {s}")
        } else {
            "callback panicked".to_owned()
        };
        Self { message, panicked: true }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// `true` if the callback panicked rather than returning `Err`.
    pub fn is_panic(&self) -> bool {
        self.panicked
    }
}

impl From<String> for CallbackError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// Lets callbacks use `?` on re-entrant `schedule` calls.
impl From<SchedulerError> for CallbackError {
    fn from(error: SchedulerError) -> Self {
        Self::new(error.to_string())
    }
}

impl From<&str> for CallbackError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Errors surfaced by the scheduler, its expectations, and its error stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("callback {subscription} at {at} failed: {source}")]
    Callback {
        at:           Instant,
        subscription: SubscriptionId,
        source:       CallbackError,
    },

    #[error("engine refused to schedule {at}: {source}")]
    EngineScheduling { at: Instant, source: EngineError },

    #[error("engine run failed: {0}")]
    EngineRun(#[source] EngineError),

    #[error("cannot schedule {requested}: earlier than now ({now})")]
    PastInstant { requested: Instant, now: Instant },

    #[error("scheduler is {0}")]
    Terminated(SchedulerState),

    #[error(transparent)]
    Time(#[from] TimeError),
}

/// Outcome of a user callback.
pub type CallbackResult = Result<(), CallbackError>;

/// Shorthand result type for scheduler operations.
pub type SchedResult<T> = Result<T, SchedulerError>;
