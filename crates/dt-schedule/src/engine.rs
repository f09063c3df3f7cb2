//! The contract between the scheduler and an external stepped engine.
//!
//! The engine owns the real event list and advances simulated time on its
//! own worker.  The scheduler only ever asks it for one-shot primitive events
//! and listens for its notifications.

use std::sync::Arc;

use dt_time::{Instant, Token};

use crate::EngineError;

/// Primitive operations required of an external discrete-event engine.
///
/// # Contract
///
/// - `schedule_once(at, token)` arranges exactly one
///   [`EngineListener::on_fire`]`(at, token)` once simulated time reaches
///   `at`, delivered after `on_time_advanced(at)` has been published.
/// - `on_end_of_run` is delivered exactly once, terminally; nothing is
///   delivered after it.
/// - `schedule_once` must not call the listener synchronously.  The scheduler
///   invokes it while holding its registry lock.
/// - Listener calls must not be made while holding a lock that
///   `schedule_once` also takes, because callbacks schedule re-entrantly.
pub trait Engine: Send + Sync + 'static {
    /// Register one primitive, one-shot, time-ordered invocation.
    fn schedule_once(&self, at: Instant, token: Token) -> Result<(), EngineError>;

    /// Whether the engine is currently advancing time.
    fn is_running(&self) -> bool;

    /// Start (or continue) advancing time.
    fn start(&self) -> Result<(), EngineError>;

    /// Bind the listener that receives this engine's notifications.
    fn attach(&self, listener: Arc<dyn EngineListener>);
}

/// Notifications published by an [`Engine`].
pub trait EngineListener: Send + Sync {
    /// Simulated time has moved to `at`.  Published once per distinct
    /// instant actually reached.
    fn on_time_advanced(&self, at: Instant);

    /// A primitive event requested with `token` has come due.
    fn on_fire(&self, at: Instant, token: Token);

    /// The run is over; no further notifications follow.
    fn on_end_of_run(&self);

    /// The engine failed while advancing; no further notifications follow.
    fn on_failure(&self, error: EngineError);
}
