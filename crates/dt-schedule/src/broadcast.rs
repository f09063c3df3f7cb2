//! Fan-out streams for time advances and errors.
//!
//! A [`Broadcast`] keeps one unbounded `crossbeam` sender per subscriber.
//! Closing it drops every sender, which ends each subscriber's iteration
//! after the buffered items are read.  An optional terminal item (the error
//! that ended the run) is delivered to current subscribers and replayed to
//! anyone who subscribes later.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use dt_time::Instant;

use crate::pending::lock;
use crate::{SchedResult, SchedulerError};

// ── Broadcast ─────────────────────────────────────────────────────────────────

struct BroadcastState<T> {
    subscribers: Vec<Sender<T>>,
    closed:      bool,
    terminal:    Option<T>,
}

/// Multi-subscriber push channel.
pub(crate) struct Broadcast<T: Clone> {
    state: Arc<Mutex<BroadcastState<T>>>,
}

impl<T: Clone> Clone for Broadcast<T> {
    fn clone(&self) -> Self {
        Self { state: Arc::clone(&self.state) }
    }
}

impl<T: Clone> Broadcast<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BroadcastState {
                subscribers: Vec::new(),
                closed:      false,
                terminal:    None,
            })),
        }
    }

    pub(crate) fn subscribe(&self) -> Receiver<T> {
        let (tx, rx) = channel::unbounded();
        let mut state = lock(&self.state);
        if state.closed {
            if let Some(item) = &state.terminal {
                // The receiver is alive, so this cannot fail.
                let _ = tx.send(item.clone());
            }
        } else {
            state.subscribers.push(tx);
        }
        rx
    }

    /// Deliver `item` to every live subscriber.  Dropped receivers are pruned.
    pub(crate) fn send(&self, item: T) {
        let mut state = lock(&self.state);
        if state.closed {
            return;
        }
        state.subscribers.retain(|tx| tx.send(item.clone()).is_ok());
    }

    /// Deliver an optional terminal item, then end every stream.  Later calls
    /// are ignored.
    pub(crate) fn close(&self, terminal: Option<T>) {
        let mut state = lock(&self.state);
        if state.closed {
            return;
        }
        if let Some(item) = &terminal {
            for tx in &state.subscribers {
                let _ = tx.send(item.clone());
            }
        }
        state.subscribers.clear();
        state.closed = true;
        state.terminal = terminal;
    }
}

// ── TimeStream ────────────────────────────────────────────────────────────────

/// One item per distinct instant the engine advances to.
///
/// Blocking iteration ends when the run completes.  If the engine fails the
/// stream yields a single `Err(SchedulerError::EngineRun(..))` and then ends.
pub struct TimeStream {
    rx: Receiver<SchedResult<Instant>>,
}

impl TimeStream {
    pub(crate) fn new(rx: Receiver<SchedResult<Instant>>) -> Self {
        Self { rx }
    }

    /// Next buffered item, without blocking.
    pub fn try_next(&self) -> Option<SchedResult<Instant>> {
        self.rx.try_recv().ok()
    }

    /// Wait up to `timeout` for the next item.
    pub fn next_timeout(
        &self,
        timeout: Duration,
    ) -> Result<SchedResult<Instant>, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }
}

impl Iterator for TimeStream {
    type Item = SchedResult<Instant>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rx.recv().ok()
    }
}

// ── ErrorStream ───────────────────────────────────────────────────────────────

/// Every [`SchedulerError`] broadcast after the stream was opened.
///
/// Callback failures, refused engine requests and the fatal engine error all
/// arrive here, so supervising code can log, restart, or abort.
pub struct ErrorStream {
    rx: Receiver<SchedulerError>,
}

impl ErrorStream {
    pub(crate) fn new(rx: Receiver<SchedulerError>) -> Self {
        Self { rx }
    }

    pub fn try_recv(&self) -> Option<SchedulerError> {
        self.rx.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<SchedulerError> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Everything currently buffered.
    pub fn drain(&self) -> Vec<SchedulerError> {
        self.rx.try_iter().collect()
    }
}

impl Iterator for ErrorStream {
    type Item = SchedulerError;

    fn next(&mut self) -> Option<Self::Item> {
        self.rx.recv().ok()
    }
}
