//! `Expectation` — the cancellable handle returned for each registration.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::Duration;

use dt_time::{Instant, SubscriptionId};
use tracing::trace;

use crate::pending::{RegistryState, lock};
use crate::SchedulerError;

// ── Outcome ───────────────────────────────────────────────────────────────────

/// How a registration ended.  Every expectation resolves exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The callback ran at this instant (even if it returned an error; that
    /// error goes to the scheduler's error stream).
    Fired(Instant),
    /// Removed by [`Expectation::cancel`] before it fired.
    Cancelled,
    /// The run ended (or every scheduler handle was dropped) before the
    /// instant was reached.  Not an error.
    Expired,
    /// The registration could not be honoured.
    Failed(SchedulerError),
}

// ── Completion ────────────────────────────────────────────────────────────────

/// Write-once outcome slot shared by the registry and every clone of an
/// expectation.
pub(crate) struct Completion {
    outcome: Mutex<Option<Outcome>>,
    ready:   Condvar,
}

impl Completion {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self { outcome: Mutex::new(None), ready: Condvar::new() })
    }

    /// Store `outcome` unless one is already stored.  Returns whether this
    /// call won.
    pub(crate) fn resolve(&self, outcome: Outcome) -> bool {
        let mut slot = lock(&self.outcome);
        if slot.is_some() {
            return false;
        }
        *slot = Some(outcome);
        self.ready.notify_all();
        true
    }

    fn get(&self) -> Option<Outcome> {
        lock(&self.outcome).clone()
    }

    fn wait(&self) -> Outcome {
        let mut slot = lock(&self.outcome);
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            slot = self.ready.wait(slot).unwrap_or_else(|e| e.into_inner());
        }
    }

    fn wait_timeout(&self, timeout: Duration) -> Option<Outcome> {
        let slot = lock(&self.outcome);
        let (slot, _) = self
            .ready
            .wait_timeout_while(slot, timeout, |o| o.is_none())
            .unwrap_or_else(|e| e.into_inner());
        slot.clone()
    }
}

// ── Expectation ───────────────────────────────────────────────────────────────

/// Handle for one callback registered at one instant.
///
/// Clones share the same registration: cancelling any clone cancels it, and
/// every clone observes the same [`Outcome`].  Holding an expectation does not
/// keep the scheduler alive.
#[derive(Clone)]
pub struct Expectation {
    at:         Instant,
    id:         SubscriptionId,
    completion: Arc<Completion>,
    registry:   Weak<Mutex<RegistryState>>,
}

impl Expectation {
    pub(crate) fn pending(
        at:         Instant,
        id:         SubscriptionId,
        completion: Arc<Completion>,
        registry:   Weak<Mutex<RegistryState>>,
    ) -> Self {
        Self { at, id, completion, registry }
    }

    /// An expectation that was refused at registration time.
    pub(crate) fn failed(at: Instant, error: SchedulerError) -> Self {
        let completion = Completion::new();
        completion.resolve(Outcome::Failed(error));
        Self { at, id: SubscriptionId::INVALID, completion, registry: Weak::new() }
    }

    /// The instant this registration waits for.
    pub fn instant(&self) -> Instant {
        self.at
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Remove this one callback from its pending entry.
    ///
    /// Siblings registered for the same instant are untouched, and the
    /// primitive engine event stays requested (it fires as a no-op if nothing
    /// is left).  Returns `false` if the callback already fired, was already
    /// cancelled, or the run is over.
    pub fn cancel(&self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        // The callback is dropped after the registry lock is released.
        let Some(_callback) = lock(&registry).unsubscribe(self.at, self.id) else {
            return false;
        };
        self.completion.resolve(Outcome::Cancelled);
        trace!(at = %self.at, subscription = %self.id, "expectation cancelled");
        true
    }

    /// The outcome, if resolved.
    pub fn outcome(&self) -> Option<Outcome> {
        self.completion.get()
    }

    pub fn is_resolved(&self) -> bool {
        self.outcome().is_some()
    }

    /// Block until resolved.
    ///
    /// Do not call this from inside a callback for a later instant: the
    /// engine thread would wait on itself.
    pub fn wait(&self) -> Outcome {
        self.completion.wait()
    }

    /// Block until resolved or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Outcome> {
        self.completion.wait_timeout(timeout)
    }
}

impl fmt::Debug for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expectation")
            .field("at", &self.at)
            .field("id", &self.id)
            .field("outcome", &self.outcome())
            .finish()
    }
}
