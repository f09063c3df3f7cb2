//! The `Sim` struct: a [`StepEngine`] paired with the [`Scheduler`] bound to
//! it.

use std::sync::Arc;

use dt_schedule::{Scheduler, SchedulerState};
use dt_time::{Instant, RunConfig};
use tracing::info;

use crate::{SimResult, StepEngine};

/// A ready-to-run simulation.
///
/// Drive it either on the calling thread with [`run`][Self::run] /
/// [`run_until`][Self::run_until], or on the engine's worker thread with
/// [`start`][Self::start] followed by [`join`][Self::join].  Do not mix the
/// two while the worker is alive.
///
/// Create via [`SimBuilder`][crate::SimBuilder].
pub struct Sim {
    engine:    Arc<StepEngine>,
    scheduler: Scheduler,
}

impl Sim {
    pub(crate) fn new(engine: Arc<StepEngine>, scheduler: Scheduler) -> Self {
        Self { engine, scheduler }
    }

    pub fn config(&self) -> &RunConfig {
        self.engine.config()
    }

    /// The scheduler handle.  Clone it into callbacks that schedule
    /// follow-up work.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn engine(&self) -> &Arc<StepEngine> {
        &self.engine
    }

    // ── Driving ───────────────────────────────────────────────────────────

    /// Step on the calling thread until the run is over and return the
    /// scheduler's final state (`Completed`, or `Failed` after an abort).
    pub fn run(&self) -> SimResult<SchedulerState> {
        self.engine.run()?;
        let state = self.scheduler.state();
        info!(%state, now = %self.scheduler.now(), "simulation finished");
        Ok(state)
    }

    /// Step on the calling thread through every tick due at or before
    /// `target` and return the scheduler's current instant.
    pub fn run_until(&self, target: Instant) -> SimResult<Instant> {
        self.engine.advance_to(target)?;
        Ok(self.scheduler.now())
    }

    /// Resume the scheduler, which starts the engine's worker thread.
    pub fn start(&self) -> SimResult<()> {
        self.scheduler.resume()?;
        Ok(())
    }

    /// Wait for the worker thread and return the scheduler's final state.
    pub fn join(&self) -> SimResult<SchedulerState> {
        self.engine.join()?;
        Ok(self.scheduler.state())
    }
}
