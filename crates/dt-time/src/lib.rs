//! `dt-time` — foundational time types for the `dt` scheduling framework.
//!
//! This crate is a dependency of every other `dt-*` crate.  It has no `dt-*`
//! dependencies and minimal external ones (only `thiserror`, plus optional
//! `serde`).
//!
//! # What lives here
//!
//! | Module          | Contents                                              |
//! |-----------------|-------------------------------------------------------|
//! | [`unit`]        | `TimeUnit` and its single conversion function         |
//! | [`time`]        | `Instant`, `SimDuration`, `Tick`, `RunConfig`         |
//! | [`ids`]         | `Token`, `SubscriptionId`                             |
//! | [`error`]       | `TimeError`, `TimeResult`                             |
//!
//! # Feature flags
//!
//! | Flag    | Effect                                                     |
//! |---------|------------------------------------------------------------|
//! | `serde` | Adds `Serialize`/`Deserialize` to all public types.        |

pub mod error;
pub mod ids;
pub mod time;
pub mod unit;


// ── Re-exports ────────────────────────────────────────────────────────────────

pub use error::{TimeError, TimeResult};
pub use ids::{SubscriptionId, Token};
pub use time::{Instant, RunConfig, SimDuration, Tick};
pub use unit::TimeUnit;
