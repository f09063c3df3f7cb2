//! `dt-stepper` — a reference stepped engine for the dt scheduling framework.
//!
//! [`StepEngine`] implements [`dt_schedule::Engine`] with a tick clock and a
//! sparse `BTreeMap<Tick, Vec<Token>>` of primitive requests.  Other engines
//! plug in through the same trait; this one serves single-process runs and
//! tests.
//!
//! # Step loop
//!
//! ```text
//! loop:
//!   ① Abort?     — deliver on_failure, stop.
//!   ② Next tick  — earliest tick with requests; none left (or past
//!                  total_ticks) → deliver on_end_of_run, stop.
//!   ③ Publish    — on_time_advanced(instant), once per distinct tick.
//!   ④ Fire       — on_fire(instant, token) for each request, in request order.
//! ```
//!
//! Requests added for the current tick while it fires are delivered by the
//! next step at the same instant.
//!
//! # Quick-start
//!
//! ```rust,ignore
//! use dt_stepper::SimBuilder;
//! use dt_time::{Instant, RunConfig, TimeUnit};
//!
//! let sim = SimBuilder::new(RunConfig::new(TimeUnit::Seconds, 1, 3_600))
//!     .at(Instant::seconds(10), |now| { println!("hello at {now}"); Ok(()) })
//!     .build()?;
//! sim.run()?;
//! ```

pub mod builder;
pub mod engine;
pub mod error;
pub mod sim;


pub use builder::SimBuilder;
pub use engine::StepEngine;
pub use error::{SimError, SimResult};
pub use sim::Sim;
