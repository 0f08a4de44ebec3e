// Copyright 2026 the Traitmint Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Browser backend for traitmint.
//!
//! This crate provides integration with browser APIs:
//!
//! - [`WebClock`]: `performance.now()` in microsecond ticks
//! - [`PerformanceMemoryProbe`] and [`GcHint`]: `performance.memory` and the
//!   optional `gc()` global
//! - [`SessionStorageStore`]: `sessionStorage`-backed session persistence
//! - [`BatchLoop`] and [`IntervalTimer`]: `setTimeout(0)` stepping and
//!   `setInterval` polling
//! - [`ProgressBroadcaster`] and [`PressureBroadcaster`]: `CustomEvent`
//!   dispatch on `window`
//! - [`WebSession`]: all of the above wired to a
//!   [`BatchController`](traitmint_core::controller::BatchController)

#![no_std]

extern crate alloc;

mod events;
mod memory;
mod session;
mod storage;
mod timer;

pub use events::{MEMORY_EVENT, PROGRESS_EVENT, PressureBroadcaster, ProgressBroadcaster};
pub use memory::{GcHint, PerformanceMemoryProbe};
pub use session::WebSession;
pub use storage::SessionStorageStore;
pub use timer::{BatchLoop, IntervalTimer, LoopControl};

use traitmint_core::time::{Clock, HostTime, Timebase};

/// Returns the current host time from `performance.now()`.
///
/// The returned [`HostTime`] is in microsecond ticks. Use [`timebase`] to
/// convert to nanoseconds.
#[must_use]
pub fn now() -> HostTime {
    micros_from_millis(timer::performance_now())
}

/// Returns the web [`Timebase`]: 1 tick = 1 µs = 1000 ns.
#[must_use]
pub fn timebase() -> Timebase {
    Timebase::MICROS
}

/// Converts a `DOMHighResTimeStamp` in milliseconds to microsecond ticks.
pub(crate) fn micros_from_millis(ms: f64) -> HostTime {
    #[expect(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "performance.now() returns small positive f64; µs fits in u64"
    )]
    let us = (ms * 1000.0) as u64;
    HostTime(us)
}

/// [`Clock`] over `performance.now()`.
#[derive(Clone, Copy, Debug, Default)]
pub struct WebClock;

impl Clock for WebClock {
    fn now(&self) -> HostTime {
        now()
    }

    fn timebase(&self) -> Timebase {
        timebase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timebase_is_microsecond() {
        let tb = timebase();
        // 1 tick = 1 µs = 1000 ns
        assert_eq!(tb.ticks_to_nanos(1), 1000);
        assert_eq!(tb.ticks_to_nanos(1_000_000), 1_000_000_000);
    }

    #[test]
    fn millisecond_timestamps_become_micro_ticks() {
        assert_eq!(micros_from_millis(16.5), HostTime(16_500));
        assert_eq!(micros_from_millis(0.0), HostTime(0));
        assert_eq!(micros_from_millis(-3.0), HostTime(0), "negative saturates");
    }
}
