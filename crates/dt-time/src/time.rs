//! Simulation time model.
//!
//! # Design
//!
//! A time value is an integer magnitude plus a [`TimeUnit`] tag:
//!
//!   nanos = magnitude * unit.nanos()
//!
//! Equality, ordering and hashing all compare the exact `u128` nanosecond
//! value, never the raw magnitude, so `1 s`, `1000 ms` and `1_000_000_000 ns`
//! are the same key in a `BTreeMap`.  No floating point is involved anywhere:
//! two instants reached by different arithmetic paths compare equal whenever
//! they denote the same moment.
//!
//! The engine-facing integer step counter is [`Tick`]; [`RunConfig`] maps
//! ticks onto instants.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::{TimeError, TimeResult, TimeUnit};

/// Convert an exact nanosecond value into `unit`, failing if it is not a whole
/// number of units or does not fit the `u64` magnitude.
fn from_nanos(nanos: u128, unit: TimeUnit) -> TimeResult<u64> {
    if nanos % unit.nanos() != 0 {
        return Err(TimeError::Inexact { value: nanos, unit });
    }
    u64::try_from(nanos / unit.nanos()).map_err(|_| TimeError::Overflow { unit })
}

/// Generate the magnitude-plus-unit plumbing shared by `Instant` and
/// `SimDuration`.
macro_rules! time_value {
    ($(#[$attr:meta])* $vis:vis struct $name:ident;) => {
        $(#[$attr])*
        #[derive(Copy, Clone, Debug)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        $vis struct $name {
            magnitude: u64,
            unit:      TimeUnit,
        }

        impl $name {
            pub const ZERO: $name = $name { magnitude: 0, unit: TimeUnit::Seconds };

            #[inline]
            pub const fn new(magnitude: u64, unit: TimeUnit) -> Self {
                Self { magnitude, unit }
            }

            #[inline]
            pub const fn nanos(n: u64) -> Self {
                Self::new(n, TimeUnit::Nanos)
            }

            #[inline]
            pub const fn millis(n: u64) -> Self {
                Self::new(n, TimeUnit::Millis)
            }

            #[inline]
            pub const fn seconds(n: u64) -> Self {
                Self::new(n, TimeUnit::Seconds)
            }

            #[inline]
            pub const fn minutes(n: u64) -> Self {
                Self::new(n, TimeUnit::Minutes)
            }

            #[inline]
            pub const fn hours(n: u64) -> Self {
                Self::new(n, TimeUnit::Hours)
            }

            #[inline]
            pub const fn days(n: u64) -> Self {
                Self::new(n, TimeUnit::Days)
            }

            /// Raw magnitude in [`unit`][Self::unit].
            #[inline]
            pub fn magnitude(self) -> u64 {
                self.magnitude
            }

            #[inline]
            pub fn unit(self) -> TimeUnit {
                self.unit
            }

            /// Exact value in nanoseconds.
            #[inline]
            pub fn as_nanos(self) -> u128 {
                self.magnitude as u128 * self.unit.nanos()
            }

            /// Re-express the value in `unit`.  Fails unless the value is a
            /// whole number of `unit`.
            pub fn to_unit(self, unit: TimeUnit) -> TimeResult<Self> {
                from_nanos(self.as_nanos(), unit).map(|m| Self::new(m, unit))
            }

            /// Re-express the value in `unit`, truncating any remainder.
            pub fn to_unit_floor(self, unit: TimeUnit) -> TimeResult<Self> {
                let whole = self.as_nanos() / unit.nanos();
                u64::try_from(whole)
                    .map(|m| Self::new(m, unit))
                    .map_err(|_| TimeError::Overflow { unit })
            }

            /// Add an exact span; the result is expressed in the finer of the
            /// two units so no precision is lost.
            pub fn checked_plus(self, span: SimDuration) -> TimeResult<Self> {
                let unit = self.unit.finer(span.unit());
                let nanos = self
                    .as_nanos()
                    .checked_add(span.as_nanos())
                    .ok_or(TimeError::Overflow { unit })?;
                from_nanos(nanos, unit).map(|m| Self::new(m, unit))
            }

            /// Like [`checked_plus`][Self::checked_plus].
            ///
            /// # Panics
            /// Panics if the sum does not fit a `u64` magnitude of the finer unit.
            pub fn plus(self, span: SimDuration) -> Self {
                match self.checked_plus(span) {
                    Ok(v) => v,
                    Err(e) => panic!("{} + {}: {e}", self, span),
                }
            }
        }

        impl PartialEq for $name {
            #[inline]
            fn eq(&self, other: &Self) -> bool {
                self.as_nanos() == other.as_nanos()
            }
        }

        impl Eq for $name {}

        impl PartialOrd for $name {
            #[inline]
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                Some(self.cmp(other))
            }
        }

        impl Ord for $name {
            #[inline]
            fn cmp(&self, other: &Self) -> Ordering {
                self.as_nanos().cmp(&other.as_nanos())
            }
        }

        impl Hash for $name {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.as_nanos().hash(state);
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::ZERO
            }
        }

        impl std::ops::Add<SimDuration> for $name {
            type Output = $name;
            /// See [`plus`][Self::plus].
            ///
            /// # Panics
            /// Panics if the sum does not fit a `u64` magnitude of the finer unit.
            #[inline]
            fn add(self, rhs: SimDuration) -> $name {
                self.plus(rhs)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", self.magnitude, self.unit)
            }
        }
    };
}

// ── Instant ───────────────────────────────────────────────────────────────────

time_value! {
    /// An immutable point on the simulated timeline.
    pub struct Instant;
}

// ── SimDuration ───────────────────────────────────────────────────────────────

time_value! {
    /// An exact span of simulated time.
    pub struct SimDuration;
}

// ── Tick ─────────────────────────────────────────────────────────────────────

/// An absolute engine step counter.
///
/// Stored as `u64` to avoid overflow: at one tick per simulated nanosecond a
/// u64 still lasts ~585 years of simulated time.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Tick(pub u64);

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

// ── RunConfig ─────────────────────────────────────────────────────────────────

/// Run-length and tick-grid configuration for a stepped engine.
///
/// Tick `t` corresponds to `Instant::new(t * tick_length, time_unit)`.  The run
/// ends before `total_ticks` is reached; instants at or past
/// [`end_instant`][Self::end_instant] are never visited.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RunConfig {
    /// Unit the tick grid is expressed in.  Default: seconds.
    pub time_unit: TimeUnit,

    /// Length of one tick in `time_unit`.  Must be non-zero.  Default: 1.
    pub tick_length: u64,

    /// Total ticks to simulate (exclusive upper bound).
    pub total_ticks: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            time_unit:   TimeUnit::Seconds,
            tick_length: 1,
            total_ticks: 0,
        }
    }
}

impl RunConfig {
    pub fn new(time_unit: TimeUnit, tick_length: u64, total_ticks: u64) -> Self {
        Self { time_unit, tick_length, total_ticks }
    }

    /// Reject configurations whose tick grid cannot be represented.
    pub fn validate(&self) -> TimeResult<()> {
        if self.tick_length == 0 {
            return Err(TimeError::Config("tick_length must be non-zero".into()));
        }
        self.instant_at(self.end_tick()).map(|_| ())
    }

    /// Length of one tick.
    #[inline]
    pub fn tick_duration(&self) -> SimDuration {
        SimDuration::new(self.tick_length, self.time_unit)
    }

    /// The tick at which the run ends (exclusive upper bound).
    #[inline]
    pub fn end_tick(&self) -> Tick {
        Tick(self.total_ticks)
    }

    /// First instant that is never visited.
    pub fn end_instant(&self) -> TimeResult<Instant> {
        self.instant_at(self.end_tick())
    }

    /// The instant tick `tick` lands on.
    pub fn instant_at(&self, tick: Tick) -> TimeResult<Instant> {
        tick.0
            .checked_mul(self.tick_length)
            .map(|m| Instant::new(m, self.time_unit))
            .ok_or(TimeError::Overflow { unit: self.time_unit })
    }

    /// The tick `at` lands on, or `None` if `at` falls between grid points.
    pub fn tick_of(&self, at: Instant) -> Option<Tick> {
        let step = self.tick_length as u128 * self.time_unit.nanos();
        if step == 0 {
            return None;
        }
        let nanos = at.as_nanos();
        if nanos % step != 0 {
            return None;
        }
        u64::try_from(nanos / step).ok().map(Tick)
    }
}
