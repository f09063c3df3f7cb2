//! `StepEngine` — stepped clock with a sparse per-tick request queue.
//!
//! # Why a sparse queue
//!
//! Most ticks have nothing due.  Visiting every tick would cost
//! O(total_ticks) regardless of how much work is actually scheduled, so the
//! engine keeps requests in a `BTreeMap<Tick, Vec<Token>>` and jumps straight
//! to the earliest tick that has any.  Only ticks actually reached are
//! published as time advances.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle};

use dt_schedule::{Engine, EngineError, EngineListener};
use dt_time::{Instant, RunConfig, Tick, Token};
use tracing::{debug, error, info, trace};

use crate::{SimError, SimResult};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── EngineState ───────────────────────────────────────────────────────────────

#[derive(Default)]
struct EngineState {
    /// Tick most recently reached.
    clock:     Tick,
    /// Outstanding primitive requests, earliest tick first.
    queue:     BTreeMap<Tick, Vec<Token>>,
    /// Last tick announced through `on_time_advanced`.
    published: Option<Tick>,
    /// Set once a terminal notification has been produced.
    finished:  bool,
    /// Pending abort reason, reported by the next step.
    abort:     Option<String>,
    /// Primitive requests accepted so far.
    accepted:  u64,
}

/// What the next step will deliver, decided under the state lock and
/// delivered after releasing it.
enum Step {
    Fire { at: Instant, tokens: Vec<Token>, publish: bool },
    End,
    Fail(String),
    Idle,
}

// ── StepEngine ────────────────────────────────────────────────────────────────

/// A stepped discrete-time engine implementing [`Engine`].
///
/// Tick `t` is the instant `config.instant_at(t)`.  Requests that fall
/// between ticks are refused; requests at or past `config.total_ticks` are
/// accepted but never delivered, and the run ends once nothing earlier is
/// left.
///
/// Time advances either on the caller's thread ([`step`][Self::step],
/// [`advance_to`][Self::advance_to], [`run`][Self::run]) or on a worker
/// thread spawned by [`Engine::start`].  Steps are serialized; listener
/// callbacks are made without holding the queue lock, so they may schedule
/// freely, but must not call `step` themselves.
pub struct StepEngine {
    config:   RunConfig,
    state:    Mutex<EngineState>,
    listener: Mutex<Option<Arc<dyn EngineListener>>>,
    stepping: Mutex<()>,
    running:  AtomicBool,
    worker:   Mutex<Option<JoinHandle<()>>>,
    me:       Weak<StepEngine>,
}

impl StepEngine {
    /// Validate `config` and build an engine positioned at tick 0.
    pub fn new(config: RunConfig) -> SimResult<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new_cyclic(|me| Self {
            config,
            state:    Mutex::new(EngineState::default()),
            listener: Mutex::new(None),
            stepping: Mutex::new(()),
            running:  AtomicBool::new(false),
            worker:   Mutex::new(None),
            me:       me.clone(),
        }))
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Tick most recently reached.
    pub fn current_tick(&self) -> Tick {
        lock(&self.state).clock
    }

    /// `true` once end-of-run or failure has been delivered.
    pub fn is_finished(&self) -> bool {
        lock(&self.state).finished
    }

    /// Primitive requests accepted so far.
    pub fn accepted_requests(&self) -> u64 {
        lock(&self.state).accepted
    }

    /// Requests waiting to be delivered, including any beyond the run length.
    pub fn pending_requests(&self) -> usize {
        lock(&self.state).queue.values().map(Vec::len).sum()
    }

    /// Make the next step report `on_failure` instead of advancing.
    pub fn abort(&self, reason: impl Into<String>) {
        let mut state = lock(&self.state);
        if !state.finished {
            state.abort = Some(reason.into());
        }
    }

    fn listener(&self) -> SimResult<Arc<dyn EngineListener>> {
        lock(&self.listener).clone().ok_or(SimError::Detached)
    }

    // ── Stepping ──────────────────────────────────────────────────────────

    /// Deliver the next tick's batch of requests.
    ///
    /// Returns `Ok(true)` if a batch was delivered and `Ok(false)` once the
    /// run is over (this call may be the one that delivers end-of-run or the
    /// abort failure).
    pub fn step(&self) -> SimResult<bool> {
        let _stepping = lock(&self.stepping);
        let listener = self.listener()?;

        let next = {
            let mut state = lock(&self.state);
            if state.finished {
                Step::Idle
            } else if let Some(reason) = state.abort.take() {
                state.finished = true;
                Step::Fail(reason)
            } else {
                match state.queue.first_key_value() {
                    Some((&tick, _)) if tick < self.config.end_tick() => {
                        let tokens = state.queue.remove(&tick).unwrap_or_default();
                        state.clock = tick;
                        let publish = state.published != Some(tick);
                        state.published = Some(tick);
                        Step::Fire { at: self.config.instant_at(tick)?, tokens, publish }
                    }
                    _ => {
                        state.finished = true;
                        Step::End
                    }
                }
            }
        };

        match next {
            Step::Idle => Ok(false),
            Step::Fail(reason) => {
                error!(%reason, "engine aborted");
                listener.on_failure(EngineError::Run(reason));
                Ok(false)
            }
            Step::End => {
                info!(tick = %self.current_tick(), "end of run");
                listener.on_end_of_run();
                Ok(false)
            }
            Step::Fire { at, tokens, publish } => {
                if publish {
                    listener.on_time_advanced(at);
                }
                debug!(%at, events = tokens.len(), "delivering primitive events");
                for token in tokens {
                    listener.on_fire(at, token);
                }
                Ok(true)
            }
        }
    }

    /// Step until the next due tick lies after `target` or the run ends.
    pub fn advance_to(&self, target: Instant) -> SimResult<()> {
        loop {
            let due = {
                let state = lock(&self.state);
                !state.finished
                    && (state.abort.is_some()
                        || state.queue.first_key_value().is_some_and(|(&tick, _)| {
                            tick < self.config.end_tick()
                                && self.config.instant_at(tick).is_ok_and(|at| at <= target)
                        }))
            };
            if !due || !self.step()? {
                return Ok(());
            }
        }
    }

    /// Step until end-of-run (or abort) has been delivered.
    pub fn run(&self) -> SimResult<()> {
        while self.step()? {}
        Ok(())
    }

    /// Wait for the worker thread spawned by [`Engine::start`], if any.
    pub fn join(&self) -> SimResult<()> {
        let handle = lock(&self.worker).take();
        match handle {
            Some(h) => h.join().map_err(|_| SimError::WorkerPanicked),
            None => Ok(()),
        }
    }
}

impl Engine for StepEngine {
    fn schedule_once(&self, at: Instant, token: Token) -> Result<(), EngineError> {
        let tick = self.config.tick_of(at).ok_or_else(|| EngineError::Unsupported {
            at,
            reason: format!("not on the {} tick grid", self.config.tick_duration()),
        })?;

        let mut state = lock(&self.state);
        if state.finished {
            return Err(EngineError::Terminated);
        }
        if tick < state.clock {
            return Err(EngineError::Unsupported {
                at,
                reason: format!("before current tick {}", state.clock),
            });
        }
        state.queue.entry(tick).or_default().push(token);
        state.accepted += 1;
        trace!(%at, %tick, %token, "accepted primitive request");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn start(&self) -> Result<(), EngineError> {
        if self.is_finished() {
            return Err(EngineError::Terminated);
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let Some(engine) = self.me.upgrade() else {
            self.running.store(false, Ordering::SeqCst);
            return Err(EngineError::Terminated);
        };

        let spawned = thread::Builder::new()
            .name("dt-stepper".into())
            .spawn(move || {
                if let Err(err) = engine.run() {
                    error!(error = %err, "engine worker stopped");
                }
                engine.running.store(false, Ordering::SeqCst);
            });

        match spawned {
            Ok(handle) => {
                *lock(&self.worker) = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(EngineError::Run(format!("cannot spawn worker: {e}")))
            }
        }
    }

    fn attach(&self, listener: Arc<dyn EngineListener>) {
        *lock(&self.listener) = Some(listener);
    }
}
