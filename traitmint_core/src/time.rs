// Copyright 2026 the Traitmint Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Monotonic host time, durations, and the [`Clock`] seam.
//!
//! The core never reads a platform clock itself. Hosts hand it a [`Clock`]
//! whose [`HostTime`] ticks are converted to wall units through a
//! [`Timebase`] (`nanoseconds = ticks * numer / denom`). The web backend uses
//! microsecond ticks from `performance.now()`; tests use [`ManualClock`].

use core::cell::Cell;
use core::fmt;
use core::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

/// A point in time expressed as host-native monotonic ticks.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostTime(pub u64);

impl HostTime {
    /// Returns the raw tick value.
    #[inline]
    #[must_use]
    pub const fn ticks(self) -> u64 {
        self.0
    }

    /// Returns the duration between `self` and an earlier time, or zero if
    /// `earlier` is after `self`.
    #[inline]
    #[must_use]
    pub const fn saturating_duration_since(self, earlier: Self) -> Duration {
        Duration(self.0.saturating_sub(earlier.0))
    }

    /// Saturating addition of a duration.
    #[inline]
    #[must_use]
    pub const fn saturating_add(self, duration: Duration) -> Self {
        Self(self.0.saturating_add(duration.0))
    }
}

impl Add<Duration> for HostTime {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Duration) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl Sub for HostTime {
    type Output = Duration;

    #[inline]
    fn sub(self, rhs: Self) -> Duration {
        Duration(self.0 - rhs.0)
    }
}

impl fmt::Debug for HostTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostTime({})", self.0)
    }
}

/// Rational conversion factor from ticks to nanoseconds.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timebase {
    /// Numerator of the ticks-to-nanoseconds ratio.
    pub numer: u32,
    /// Denominator of the ticks-to-nanoseconds ratio.
    pub denom: u32,
}

impl Timebase {
    /// Ticks are nanoseconds.
    pub const NANOS: Self = Self { numer: 1, denom: 1 };

    /// Ticks are microseconds.
    pub const MICROS: Self = Self {
        numer: 1000,
        denom: 1,
    };

    /// Ticks are milliseconds.
    pub const MILLIS: Self = Self {
        numer: 1_000_000,
        denom: 1,
    };

    /// Creates a new timebase.
    ///
    /// # Panics
    ///
    /// Panics if `denom` is zero.
    #[inline]
    #[must_use]
    pub const fn new(numer: u32, denom: u32) -> Self {
        assert!(denom != 0, "timebase denominator must not be zero");
        Self { numer, denom }
    }

    /// Converts a tick count to nanoseconds.
    #[inline]
    #[must_use]
    #[expect(
        clippy::cast_possible_truncation,
        reason = "u128 intermediate avoids overflow; truncation back to u64 is intentional"
    )]
    pub const fn ticks_to_nanos(self, ticks: u64) -> u64 {
        (ticks as u128 * self.numer as u128 / self.denom as u128) as u64
    }

    /// Converts nanoseconds to a tick count.
    #[inline]
    #[must_use]
    #[expect(
        clippy::cast_possible_truncation,
        reason = "u128 intermediate avoids overflow; truncation back to u64 is intentional"
    )]
    pub const fn nanos_to_ticks(self, nanos: u64) -> u64 {
        (nanos as u128 * self.denom as u128 / self.numer as u128) as u64
    }
}

impl fmt::Debug for Timebase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timebase({}/{})", self.numer, self.denom)
    }
}

/// A duration in host ticks.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Duration(pub u64);

impl Duration {
    /// A zero-length duration.
    pub const ZERO: Self = Self(0);

    /// Returns the raw tick value.
    #[inline]
    #[must_use]
    pub const fn ticks(self) -> u64 {
        self.0
    }

    /// Creates a duration of `ms` milliseconds in the given timebase.
    #[inline]
    #[must_use]
    pub const fn from_millis(ms: u64, timebase: Timebase) -> Self {
        Self(timebase.nanos_to_ticks(ms.saturating_mul(1_000_000)))
    }

    /// Whole milliseconds in this duration.
    #[inline]
    #[must_use]
    pub const fn as_millis(self, timebase: Timebase) -> u64 {
        timebase.ticks_to_nanos(self.0) / 1_000_000
    }

    /// Saturating subtraction.
    #[inline]
    #[must_use]
    pub const fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }

    /// Scales the duration by `numer / denom`, saturating on overflow.
    ///
    /// Returns zero when `denom` is zero.
    #[inline]
    #[must_use]
    #[expect(
        clippy::cast_possible_truncation,
        reason = "clamped to u64::MAX before narrowing"
    )]
    pub const fn mul_div(self, numer: u64, denom: u64) -> Self {
        if denom == 0 {
            return Self::ZERO;
        }
        let wide = self.0 as u128 * numer as u128 / denom as u128;
        if wide > u64::MAX as u128 {
            Self(u64::MAX)
        } else {
            Self(wide as u64)
        }
    }
}

impl Add for Duration {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl fmt::Debug for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Duration({})", self.0)
    }
}

/// Source of monotonic host time.
///
/// Backends implement this over the platform clock. The controller, sampler
/// and reporter only ever see [`HostTime`] values produced by a clock.
pub trait Clock {
    /// Current host time.
    fn now(&self) -> HostTime;

    /// Unit of the ticks returned by [`now`](Self::now).
    fn timebase(&self) -> Timebase;
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Cell<u64>,
    timebase: Timebase,
}

impl ManualClock {
    /// Creates a clock at tick zero with millisecond ticks.
    #[must_use]
    pub const fn millis() -> Self {
        Self {
            now: Cell::new(0),
            timebase: Timebase::MILLIS,
        }
    }

    /// Creates a clock at tick zero with the given timebase.
    #[must_use]
    pub const fn with_timebase(timebase: Timebase) -> Self {
        Self {
            now: Cell::new(0),
            timebase,
        }
    }

    /// Moves the clock forward by `ticks`.
    pub fn advance(&self, ticks: u64) {
        self.now.set(self.now.get().saturating_add(ticks));
    }

    /// Jumps the clock to an absolute tick value.
    pub fn set(&self, ticks: u64) {
        self.now.set(ticks);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> HostTime {
        HostTime(self.now.get())
    }

    fn timebase(&self) -> Timebase {
        self.timebase
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> HostTime {
        (**self).now()
    }

    fn timebase(&self) -> Timebase {
        (**self).timebase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_round_trip_through_micro_ticks() {
        let d = Duration::from_millis(5_000, Timebase::MICROS);
        assert_eq!(d.ticks(), 5_000_000, "5 s in µs ticks");
        assert_eq!(d.as_millis(Timebase::MICROS), 5_000);
    }

    #[test]
    fn mul_div_scales_and_guards_zero() {
        let d = Duration(1_000);
        assert_eq!(d.mul_div(3, 2), Duration(1_500));
        assert_eq!(d.mul_div(1, 0), Duration::ZERO);
        assert_eq!(Duration(u64::MAX).mul_div(4, 1), Duration(u64::MAX));
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::millis();
        assert_eq!(clock.now(), HostTime(0));
        clock.advance(250);
        clock.advance(250);
        assert_eq!(clock.now(), HostTime(500));
        clock.set(10);
        assert_eq!(clock.now().ticks(), 10);
    }

    #[test]
    fn saturating_since_never_underflows() {
        let t = HostTime(100);
        assert_eq!(t.saturating_duration_since(HostTime(400)), Duration::ZERO);
        assert_eq!(t.saturating_duration_since(HostTime(40)), Duration(60));
    }
}
