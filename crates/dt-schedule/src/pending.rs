//! `PendingRegistry` — the coalescing map from instant to waiting callbacks.
//!
//! # Coalescing
//!
//! Many logical registrations for one instant share a single primitive engine
//! event.  The first registration for an instant creates a [`PendingEntry`]
//! and issues exactly one `Engine::schedule_once`; later registrations for the
//! same instant only append to the entry.  So the number of primitive requests
//! equals the number of distinct instants ever made pending, never the number
//! of callbacks.
//!
//! # Exclusion domain
//!
//! The sorted map, the time cursor and the lifecycle phase sit behind one
//! `Mutex`.  That gives a total order between "a registration for X arrives"
//! and "the engine fires X": a registration either lands in the entry before
//! it is taken for firing, or it finds no entry and requests a fresh event.
//!
//! # Snapshot before invoke
//!
//! Firing removes the entry and moves its subscriber list out while holding
//! the lock, then runs the callbacks after releasing it.  Callbacks are free to
//! schedule (same or other instants) or cancel; none of that can disturb the
//! batch in flight, and a cancel that loses the race is a no-op.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dt_time::{Instant, SubscriptionId, Token};
use tracing::{debug, info, trace, warn};

use crate::broadcast::Broadcast;
use crate::expectation::{Completion, Outcome};
use crate::{
    CallbackError, CallbackResult, Engine, EngineError, Expectation, SchedResult,
    SchedulerError, SchedulerState,
};

/// Lock `m`, recovering the guard if a previous holder panicked.  Registry
/// state is consistent between statements, and callbacks never run under it.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A deferred callback.  Receives the instant it fires at.
pub type Callback = Box<dyn FnOnce(Instant) -> CallbackResult + Send + 'static>;

// ── PendingEntry ──────────────────────────────────────────────────────────────

pub(crate) struct Subscriber {
    id:         SubscriptionId,
    callback:   Callback,
    completion: Arc<Completion>,
}

/// Callbacks waiting for one instant, plus the token of the primitive engine
/// event that will deliver them.  Subscribers are kept in registration order.
pub(crate) struct PendingEntry {
    token:       Token,
    subscribers: Vec<Subscriber>,
}

// ── RegistryState ─────────────────────────────────────────────────────────────

pub(crate) struct RegistryState {
    entries:            BTreeMap<Instant, PendingEntry>,
    /// Most recent engine-confirmed instant.
    now:                Instant,
    /// Last instant published on the time stream.
    advanced:           Option<Instant>,
    phase:              SchedulerState,
    next_token:         Token,
    next_subscription:  SubscriptionId,
    primitive_requests: u64,
}

impl RegistryState {
    fn new(start: Instant) -> Self {
        Self {
            entries:            BTreeMap::new(),
            now:                start,
            advanced:           None,
            phase:              SchedulerState::Idle,
            next_token:         Token::FIRST,
            next_subscription:  SubscriptionId::FIRST,
            primitive_requests: 0,
        }
    }

    /// Remove one subscriber, preserving the order of its siblings.  An entry
    /// left empty stays in place until its primitive event fires.
    pub(crate) fn unsubscribe(&mut self, at: Instant, id: SubscriptionId) -> Option<Subscriber> {
        let entry = self.entries.get_mut(&at)?;
        let pos = entry.subscribers.iter().position(|s| s.id == id)?;
        Some(entry.subscribers.remove(pos))
    }

    /// `Idle → Running` when the first sign of life arrives.
    fn enter_running(&mut self) {
        if self.phase == SchedulerState::Idle {
            self.phase = SchedulerState::Running;
            debug!(now = %self.now, "scheduler running");
        }
    }

    /// Move to a terminal phase and hand back everything still pending.
    fn terminate(&mut self, phase: SchedulerState) -> Option<BTreeMap<Instant, PendingEntry>> {
        if self.phase.is_terminal() {
            return None;
        }
        self.enter_running();
        self.phase = phase;
        Some(std::mem::take(&mut self.entries))
    }
}

// ── PendingRegistry ───────────────────────────────────────────────────────────

/// Sorted, lock-guarded map from instant to the callbacks awaiting it.
pub struct PendingRegistry {
    shared: Arc<Mutex<RegistryState>>,
    engine: Arc<dyn Engine>,
    errors: Broadcast<SchedulerError>,
}

impl PendingRegistry {
    pub(crate) fn new(
        engine: Arc<dyn Engine>,
        errors: Broadcast<SchedulerError>,
        start:  Instant,
    ) -> Self {
        Self {
            shared: Arc::new(Mutex::new(RegistryState::new(start))),
            engine,
            errors,
        }
    }

    /// Register `callback` for `at` and return its expectation.
    ///
    /// The first registration for an instant requests one primitive engine
    /// event; later ones coalesce onto it.  If the engine refuses the request
    /// (or the run is already over) the returned expectation is already
    /// `Failed` and the error is broadcast.  Scheduling before the current
    /// instant is a caller error and returns `Err(PastInstant)`.
    pub fn register_at(&self, at: Instant, callback: Callback) -> SchedResult<Expectation> {
        let mut guard = lock(&self.shared);
        let state = &mut *guard;

        if state.phase.is_terminal() {
            drop(guard);
            return Ok(self.refuse(at, EngineError::Terminated));
        }
        if at < state.now {
            return Err(SchedulerError::PastInstant { requested: at, now: state.now });
        }

        let id = state.next_subscription;
        state.next_subscription = id.next();
        let completion = Completion::new();
        let subscriber = Subscriber { id, callback, completion: Arc::clone(&completion) };

        if let Some(entry) = state.entries.get_mut(&at) {
            entry.subscribers.push(subscriber);
            trace!(%at, subscription = %id, token = %entry.token, "coalesced registration");
        } else {
            let token = state.next_token;
            if let Err(source) = self.engine.schedule_once(at, token) {
                drop(guard);
                drop(subscriber);
                return Ok(self.refuse(at, source));
            }
            state.next_token = token.next();
            state.primitive_requests += 1;
            state.entries.insert(at, PendingEntry { token, subscribers: vec![subscriber] });
            debug!(%at, %token, subscription = %id, "requested primitive engine event");
        }

        Ok(Expectation::pending(at, id, completion, Arc::downgrade(&self.shared)))
    }

    fn refuse(&self, at: Instant, source: EngineError) -> Expectation {
        let error = SchedulerError::EngineScheduling { at, source };
        warn!(%at, %error, "registration refused");
        self.errors.send(error.clone());
        Expectation::failed(at, error)
    }

    /// The engine reached `at` and delivered the primitive event `token`.
    ///
    /// Runs every callback subscribed at the moment of firing, in
    /// registration order, and returns how many ran.  A callback that returns
    /// `Err` or panics is logged and broadcast; its siblings still run.
    /// Unknown or stale tokens, and entries whose callbacks were all
    /// cancelled, fire as no-ops.
    pub fn on_engine_fire(&self, at: Instant, token: Token) -> usize {
        let subscribers = {
            let mut guard = lock(&self.shared);
            let state = &mut *guard;
            if state.phase.is_terminal() {
                return 0;
            }
            state.enter_running();
            if at > state.now {
                state.now = at;
            }
            match state.entries.get(&at) {
                Some(entry) if entry.token == token => {}
                _ => {
                    debug!(%at, %token, "no pending entry for fired token");
                    return 0;
                }
            }
            state.entries.remove(&at).map(|e| e.subscribers).unwrap_or_default()
        };

        let count = subscribers.len();
        if count == 0 {
            debug!(%at, %token, "fired with no subscribers");
            return 0;
        }
        debug!(%at, %token, count, "firing pending entry");

        for Subscriber { id, callback, completion } in subscribers {
            let result = panic::catch_unwind(AssertUnwindSafe(move || callback(at)))
                .unwrap_or_else(|payload| Err(CallbackError::from_panic(payload)));
            completion.resolve(Outcome::Fired(at));
            if let Err(source) = result {
                let error = SchedulerError::Callback { at, subscription: id, source };
                warn!(%at, subscription = %id, %error, "callback failed");
                self.errors.send(error);
            }
        }
        count
    }

    /// The run ended.  Every never-fired registration resolves as
    /// [`Outcome::Expired`] without its callback running, and the registry is
    /// cleared.  Returns the number of expectations expired, or `None` if the
    /// scheduler had already terminated.
    pub fn on_run_complete(&self) -> Option<usize> {
        let entries = lock(&self.shared).terminate(SchedulerState::Completed)?;
        let instants = entries.len();
        let expired = resolve_all(entries, &Outcome::Expired);
        info!(instants, expired, "run complete");
        Some(expired)
    }

    /// The engine failed.  Every never-fired registration resolves as
    /// [`Outcome::Failed`] with `error`.  Returns the number failed, or
    /// `None` if the scheduler had already terminated.
    pub fn fail_all(&self, error: SchedulerError) -> Option<usize> {
        let entries = lock(&self.shared).terminate(SchedulerState::Failed)?;
        let failed = resolve_all(entries, &Outcome::Failed(error));
        info!(failed, "pending registrations failed");
        Some(failed)
    }

    /// Record an engine time advance.  Returns `true` if `at` is a new
    /// instant that should be published on the time stream.
    pub(crate) fn advance_cursor(&self, at: Instant) -> bool {
        let mut state = lock(&self.shared);
        if state.phase.is_terminal() {
            return false;
        }
        state.enter_running();
        if at > state.now {
            state.now = at;
        }
        if state.advanced.is_some_and(|last| at <= last) || at < state.now {
            return false;
        }
        state.advanced = Some(at);
        true
    }

    /// `Idle → Running` on explicit resume.  Terminal phases are rejected.
    pub(crate) fn mark_running(&self) -> SchedResult<()> {
        let mut state = lock(&self.shared);
        if state.phase.is_terminal() {
            return Err(SchedulerError::Terminated(state.phase));
        }
        state.enter_running();
        Ok(())
    }

    // ── Introspection ─────────────────────────────────────────────────────

    pub fn now(&self) -> Instant {
        lock(&self.shared).now
    }

    pub fn phase(&self) -> SchedulerState {
        lock(&self.shared).phase
    }

    /// Distinct instants still waiting to fire, earliest first.  Includes
    /// entries whose callbacks were all cancelled.
    pub fn pending_instants(&self) -> Vec<Instant> {
        lock(&self.shared).entries.keys().copied().collect()
    }

    /// Number of distinct pending instants.
    pub fn pending_len(&self) -> usize {
        lock(&self.shared).entries.len()
    }

    /// Total callbacks still waiting, across all instants.
    pub fn subscriber_count(&self) -> usize {
        lock(&self.shared).entries.values().map(|e| e.subscribers.len()).sum()
    }

    /// Primitive engine events requested so far.
    pub fn primitive_requests(&self) -> u64 {
        lock(&self.shared).primitive_requests
    }
}

/// Dropping the last scheduler handle ends the run for anything still
/// pending: those expectations resolve as [`Outcome::Expired`].
impl Drop for PendingRegistry {
    fn drop(&mut self) {
        let entries = std::mem::take(&mut lock(&self.shared).entries);
        let expired = resolve_all(entries, &Outcome::Expired);
        if expired > 0 {
            debug!(expired, "scheduler dropped with pending registrations");
        }
    }
}

fn resolve_all(entries: BTreeMap<Instant, PendingEntry>, outcome: &Outcome) -> usize {
    entries
        .into_values()
        .flat_map(|e| e.subscribers)
        .filter(|s| s.completion.resolve(outcome.clone()))
        .count()
}
