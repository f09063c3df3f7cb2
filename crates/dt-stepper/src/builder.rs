//! Fluent builder for constructing a [`Sim`].

use dt_schedule::{Callback, CallbackResult, Outcome, Scheduler};
use dt_time::{Instant, RunConfig};
use tracing::debug;

use crate::{Sim, SimError, SimResult, StepEngine};

/// Fluent builder for [`Sim`].
///
/// # Required inputs
///
/// - [`RunConfig`] — time unit, tick length, total ticks
///
/// # Optional inputs (have defaults)
///
/// | Method           | Default             |
/// |------------------|---------------------|
/// | `.start(i)`      | `Instant::ZERO`     |
/// | `.at(i, f)`      | No seed callbacks   |
///
/// Seed callbacks are registered in call order, so callbacks seeded for the
/// same instant run in that order.
///
/// # Example
///
/// ```rust,ignore
/// let sim = SimBuilder::new(RunConfig::new(TimeUnit::Millis, 100, 600))
///     .at(Instant::millis(500), |now| { tracing::info!(%now, "tick"); Ok(()) })
///     .build()?;
/// sim.run()?;
/// ```
pub struct SimBuilder {
    config: RunConfig,
    start:  Instant,
    seeds:  Vec<(Instant, Callback)>,
}

impl SimBuilder {
    pub fn new(config: RunConfig) -> Self {
        Self { config, start: Instant::ZERO, seeds: Vec::new() }
    }

    /// Initial scheduler cursor.  Seeds before it are rejected by `build`.
    pub fn start(mut self, start: Instant) -> Self {
        self.start = start;
        self
    }

    /// Register `callback` at `at` once the scheduler exists.
    pub fn at<F>(mut self, at: Instant, callback: F) -> Self
    where
        F: FnOnce(Instant) -> CallbackResult + Send + 'static,
    {
        self.seeds.push((at, Box::new(callback)));
        self
    }

    /// Validate the configuration and wire engine, scheduler and seeds.
    ///
    /// # Errors
    ///
    /// - [`SimError::Config`] if the run configuration is invalid.
    /// - [`SimError::Schedule`] if a seed lies before the start instant or
    ///   the engine refuses it (e.g. it falls between ticks).
    pub fn build(self) -> SimResult<Sim> {
        let engine = StepEngine::new(self.config)?;
        let scheduler = Scheduler::with_start(engine.clone(), self.start);

        let seeded = self.seeds.len();
        for (at, callback) in self.seeds {
            let expectation = scheduler.registry().register_at(at, callback)?;
            if let Some(Outcome::Failed(err)) = expectation.outcome() {
                return Err(SimError::Schedule(err));
            }
        }
        debug!(
            seeded,
            instants = scheduler.registry().pending_len(),
            end = %engine.config().end_tick(),
            "simulation built"
        );

        Ok(Sim::new(engine, scheduler))
    }
}
