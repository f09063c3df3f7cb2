//! `dt-schedule` — deferred callbacks at future simulated instants.
//!
//! # Crate layout
//!
//! | Module          | Contents                                                  |
//! |-----------------|-----------------------------------------------------------|
//! | [`engine`]      | `Engine`, `EngineListener` — the external engine contract |
//! | [`pending`]     | `PendingRegistry` (`BTreeMap<Instant, PendingEntry>`)     |
//! | [`expectation`] | `Expectation`, `Outcome`                                  |
//! | [`scheduler`]   | `Scheduler`, `SchedulerState`                             |
//! | [`broadcast`]   | `TimeStream`, `ErrorStream`                               |
//! | `adapter`       | `EngineAdapter` — engine notifications → scheduler        |
//! | [`error`]       | `SchedulerError`, `EngineError`, `CallbackError`          |
//!
//! # Flow (summary)
//!
//! ```text
//! Scheduler::schedule(at, f)
//!   └─▶ PendingRegistry::register_at
//!         first registration for `at`? ──▶ Engine::schedule_once(at, token)
//!
//! engine reaches `at`
//!   on_time_advanced(at) ──▶ cursor = at, TimeStream ◀─ at
//!   on_fire(at, token)   ──▶ snapshot subscribers, run them in order
//!   on_end_of_run()      ──▶ remaining expectations → Expired
//! ```
//!
//! Registrations for the same instant coalesce into one primitive engine
//! event; each registration can be cancelled on its own.

mod adapter;
pub mod broadcast;
pub mod engine;
pub mod error;
pub mod expectation;
pub mod pending;
pub mod scheduler;

#[cfg(test)]
mod tests;

pub use broadcast::{ErrorStream, TimeStream};
pub use engine::{Engine, EngineListener};
pub use error::{CallbackError, CallbackResult, EngineError, SchedResult, SchedulerError};
pub use expectation::{Expectation, Outcome};
pub use pending::{Callback, PendingRegistry};
pub use scheduler::{Scheduler, SchedulerState};
