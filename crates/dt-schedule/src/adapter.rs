//! `EngineAdapter` — forwards engine notifications into the scheduler.

use std::sync::Weak;

use dt_time::{Instant, Token};
use tracing::trace;

use crate::scheduler::SchedulerCore;
use crate::{EngineError, EngineListener};

/// The listener a [`Scheduler`][crate::Scheduler] attaches to its engine.
///
/// Holds the scheduler core weakly: the engine keeps the adapter alive, and
/// the core keeps the engine alive, so a strong reference here would leak
/// both.  Notifications arriving after every scheduler handle is gone are
/// dropped.
pub(crate) struct EngineAdapter {
    core: Weak<SchedulerCore>,
}

impl EngineAdapter {
    pub(crate) fn new(core: Weak<SchedulerCore>) -> Self {
        Self { core }
    }
}

impl EngineListener for EngineAdapter {
    fn on_time_advanced(&self, at: Instant) {
        if let Some(core) = self.core.upgrade() {
            trace!(%at, "time advanced");
            core.time_advanced(at);
        }
    }

    fn on_fire(&self, at: Instant, token: Token) {
        if let Some(core) = self.core.upgrade() {
            core.fire(at, token);
        }
    }

    fn on_end_of_run(&self) {
        if let Some(core) = self.core.upgrade() {
            core.complete();
        }
    }

    fn on_failure(&self, error: EngineError) {
        if let Some(core) = self.core.upgrade() {
            core.fail(error);
        }
    }
}
