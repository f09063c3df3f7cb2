//! `Scheduler` — the public face of the scheduling core.

use std::fmt;
use std::sync::Arc;

use dt_time::{Instant, SimDuration, Token};
use tracing::{error, info};

use crate::adapter::EngineAdapter;
use crate::broadcast::Broadcast;
use crate::{
    CallbackResult, Engine, EngineError, ErrorStream, Expectation, PendingRegistry,
    SchedResult, SchedulerError, TimeStream,
};

// ── SchedulerState ────────────────────────────────────────────────────────────

/// Lifecycle of a scheduler.
///
/// ```text
/// Idle ──resume()/first engine notification──▶ Running ──end-of-run──▶ Completed
///                                                  └──────engine failure──▶ Failed
/// ```
///
/// `Completed` and `Failed` are terminal.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum SchedulerState {
    Idle,
    Running,
    Completed,
    Failed,
}

impl SchedulerState {
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, SchedulerState::Completed | SchedulerState::Failed)
    }
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SchedulerState::Idle      => "idle",
            SchedulerState::Running   => "running",
            SchedulerState::Completed => "completed",
            SchedulerState::Failed    => "failed",
        })
    }
}

// ── SchedulerCore ─────────────────────────────────────────────────────────────

/// State shared by every `Scheduler` handle and, weakly, by the engine
/// adapter.
pub(crate) struct SchedulerCore {
    pub(crate) registry: PendingRegistry,
    engine:              Arc<dyn Engine>,
    time:                Broadcast<SchedResult<Instant>>,
    errors:              Broadcast<SchedulerError>,
}

impl SchedulerCore {
    pub(crate) fn time_advanced(&self, at: Instant) {
        if self.registry.advance_cursor(at) {
            self.time.send(Ok(at));
        }
    }

    pub(crate) fn fire(&self, at: Instant, token: Token) {
        self.registry.on_engine_fire(at, token);
    }

    /// End-of-run: both streams end after their buffered items.
    pub(crate) fn complete(&self) {
        if self.registry.on_run_complete().is_some() {
            self.time.close(None);
            self.errors.close(None);
        }
    }

    /// Engine failure: the error is the terminal item of both streams, so
    /// subscribers that arrive later still observe it.
    pub(crate) fn fail(&self, source: EngineError) {
        let err = SchedulerError::EngineRun(source);
        if self.registry.fail_all(err.clone()).is_none() {
            return;
        }
        error!(error = %err, now = %self.registry.now(), "engine failure");
        self.errors.close(Some(err.clone()));
        self.time.close(Some(Err(err)));
    }
}

// ── Scheduler ─────────────────────────────────────────────────────────────────

/// Registers deferred callbacks at future simulated instants on top of an
/// external stepped [`Engine`].
///
/// `Scheduler` is a cheap `Clone` handle: create one per run and pass it to
/// every component that needs to schedule.  Callbacks typically capture a
/// clone so they can schedule follow-up work.
///
/// # Example
///
/// ```rust,ignore
/// let scheduler = Scheduler::new(engine.clone());
/// let s = scheduler.clone();
/// scheduler.schedule(Instant::seconds(10), move |now| {
///     s.schedule(now + SimDuration::seconds(5), |_| Ok(()))?;
///     Ok(())
/// })?;
/// scheduler.resume()?;
/// ```
#[derive(Clone)]
pub struct Scheduler {
    core: Arc<SchedulerCore>,
}

impl Scheduler {
    /// Bind a new scheduler to `engine`, starting at `Instant::ZERO`.
    pub fn new<E: Engine>(engine: Arc<E>) -> Self {
        Self::with_start(engine, Instant::ZERO)
    }

    /// Bind a new scheduler to `engine` with the cursor at `start`.
    pub fn with_start<E: Engine>(engine: Arc<E>, start: Instant) -> Self {
        let engine: Arc<dyn Engine> = engine;
        let errors = Broadcast::new();
        let core = Arc::new(SchedulerCore {
            registry: PendingRegistry::new(Arc::clone(&engine), errors.clone(), start),
            engine:   Arc::clone(&engine),
            time:     Broadcast::new(),
            errors,
        });
        engine.attach(Arc::new(EngineAdapter::new(Arc::downgrade(&core))));
        Self { core }
    }

    /// The most recent engine-confirmed instant.  Inside a callback this is
    /// the callback's own firing instant.
    pub fn now(&self) -> Instant {
        self.core.registry.now()
    }

    pub fn state(&self) -> SchedulerState {
        self.core.registry.phase()
    }

    /// Start or continue engine time advancement.  No-op while the engine
    /// is already running.
    ///
    /// Fails with [`SchedulerError::Terminated`] once the run is over.  If
    /// the engine cannot start, the scheduler moves to `Failed`.
    pub fn resume(&self) -> SchedResult<()> {
        self.core.registry.mark_running()?;
        if self.core.engine.is_running() {
            return Ok(());
        }
        info!(now = %self.now(), "resuming engine");
        self.core.engine.start().map_err(|source| {
            self.core.fail(source.clone());
            SchedulerError::EngineRun(source)
        })
    }

    /// A stream of every distinct instant the engine advances to from now on.
    pub fn time(&self) -> TimeStream {
        TimeStream::new(self.core.time.subscribe())
    }

    /// A stream of every scheduler error raised from now on.  It ends when
    /// the run is over; after an engine failure a late subscriber receives
    /// that failure and nothing else.
    pub fn errors(&self) -> ErrorStream {
        ErrorStream::new(self.core.errors.subscribe())
    }

    /// Run `callback` when the engine reaches `at`.
    ///
    /// Callbacks for the same instant run in registration order, on the
    /// engine's thread, and may schedule further callbacks.  Scheduling
    /// exactly `now()` is allowed and runs after the batch currently firing.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::PastInstant`] if `at` is before `now()`.  Engine
    /// refusals are not returned here: the expectation comes back already
    /// failed and, while the run is live, the error is broadcast on
    /// [`errors`][Self::errors].
    pub fn schedule<F>(&self, at: Instant, callback: F) -> SchedResult<Expectation>
    where
        F: FnOnce(Instant) -> CallbackResult + Send + 'static,
    {
        self.core.registry.register_at(at, Box::new(callback))
    }

    /// Run `callback` `delay` after `now()`.
    pub fn schedule_after<F>(&self, delay: SimDuration, callback: F) -> SchedResult<Expectation>
    where
        F: FnOnce(Instant) -> CallbackResult + Send + 'static,
    {
        let at = self.now().checked_plus(delay)?;
        self.schedule(at, callback)
    }

    /// The pending registry, for introspection.
    pub fn registry(&self) -> &PendingRegistry {
        &self.core.registry
    }

    /// Distinct instants still waiting to fire, earliest first.
    pub fn pending_instants(&self) -> Vec<Instant> {
        self.core.registry.pending_instants()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("state", &self.state())
            .field("now", &self.now())
            .field("pending", &self.core.registry.pending_len())
            .finish()
    }
}
