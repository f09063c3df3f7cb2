//! Time units.
//!
//! Every conversion between units goes through [`TimeUnit::nanos`]: a value
//! `m` in unit `u` is exactly `m * u.nanos()` nanoseconds.  Keeping a single
//! conversion function (instead of a pairwise table) means two values that
//! describe the same moment always reduce to the same base number.

use std::fmt;

/// Unit tag attached to every [`Instant`][crate::Instant] and
/// [`SimDuration`][crate::SimDuration].
///
/// Variants are declared finest first, so the derived `Ord` sorts by length.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TimeUnit {
    Nanos,
    Micros,
    Millis,
    #[default]
    Seconds,
    Minutes,
    Hours,
    Days,
    Weeks,
}

impl TimeUnit {
    /// All units, finest first.
    pub const ALL: [TimeUnit; 8] = [
        TimeUnit::Nanos,
        TimeUnit::Micros,
        TimeUnit::Millis,
        TimeUnit::Seconds,
        TimeUnit::Minutes,
        TimeUnit::Hours,
        TimeUnit::Days,
        TimeUnit::Weeks,
    ];

    /// Exact length of one unit in nanoseconds.
    #[inline]
    pub const fn nanos(self) -> u128 {
        match self {
            TimeUnit::Nanos   => 1,
            TimeUnit::Micros  => 1_000,
            TimeUnit::Millis  => 1_000_000,
            TimeUnit::Seconds => 1_000_000_000,
            TimeUnit::Minutes => 60 * 1_000_000_000,
            TimeUnit::Hours   => 3_600 * 1_000_000_000,
            TimeUnit::Days    => 86_400 * 1_000_000_000,
            TimeUnit::Weeks   => 604_800 * 1_000_000_000,
        }
    }

    /// The finer (shorter) of two units.
    #[inline]
    pub fn finer(self, other: TimeUnit) -> TimeUnit {
        self.min(other)
    }

    /// Short suffix used by `Display` on time values.
    pub const fn symbol(self) -> &'static str {
        match self {
            TimeUnit::Nanos   => "ns",
            TimeUnit::Micros  => "us",
            TimeUnit::Millis  => "ms",
            TimeUnit::Seconds => "s",
            TimeUnit::Minutes => "min",
            TimeUnit::Hours   => "h",
            TimeUnit::Days    => "d",
            TimeUnit::Weeks   => "w",
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}
