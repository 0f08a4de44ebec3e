// Copyright 2026 the Traitmint Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Diagnostics for generation sessions.
//!
//! This module provides a [`TraceSink`] trait with per-event methods that the
//! batch controller calls as a session runs. All method bodies default to
//! no-ops, so implementing only the events you care about is fine.
//!
//! [`Tracer`] wraps an optional `&mut dyn TraceSink`. When the `trace` feature
//! is **off**, every `Tracer` method compiles to nothing. When **on**, each
//! method performs a single `Option` branch before dispatching.
//!
//! Trace events are separate from `tracing` logs: logs are for humans,
//! trace events are structured input for tools like the Chrome trace
//! exporter in `traitmint_debug`.
//!
//! # Crate features
//!
//! - `trace`: enables the `Tracer` method bodies (one branch per call).

use crate::memory::PressureLevel;
use crate::time::HostTime;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Why a candidate combination was turned away.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// Already generated in this session.
    Duplicate,
    /// Repeats a pair forbidden by the strict-pair rule at this index.
    StrictPair {
        /// Index into the tracker's rule list.
        rule_index: usize,
    },
}

/// How a session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionOutcome {
    /// Every batch completed.
    Completed,
    /// Cancelled by the host.
    Cancelled,
    /// Gave up after too many consecutive failures.
    Failed,
}

// ---------------------------------------------------------------------------
// Event structs
// ---------------------------------------------------------------------------

/// Emitted when a session has been planned and starts running.
#[derive(Clone, Copy, Debug)]
pub struct SessionStartEvent {
    /// Items requested.
    pub total_items: usize,
    /// Items per batch.
    pub batch_size: usize,
    /// Number of batches.
    pub total_batches: u32,
    /// Batches already completed by a restored session.
    pub restored_batches: u32,
    /// Host time at start.
    pub timestamp: HostTime,
}

/// Marks the beginning of a batch.
#[derive(Clone, Copy, Debug)]
pub struct BatchBeginEvent {
    /// 1-based batch number.
    pub batch: u32,
    /// First item slot.
    pub start: usize,
    /// One past the last item slot.
    pub end: usize,
    /// Host time at the start of the batch.
    pub timestamp: HostTime,
}

/// Marks the end of a batch.
#[derive(Clone, Copy, Debug)]
pub struct BatchEndEvent {
    /// 1-based batch number.
    pub batch: u32,
    /// Items accepted in this batch.
    pub accepted: usize,
    /// Candidates rejected as duplicates or forbidden pairs.
    pub rejected: usize,
    /// Items whose rendering failed.
    pub failed: usize,
    /// Host time at the end of the batch.
    pub timestamp: HostTime,
}

/// Emitted for every rejected candidate.
#[derive(Clone, Copy, Debug)]
pub struct CandidateRejectedEvent {
    /// Item slot the candidate was proposed for.
    pub index: usize,
    /// 0-based attempt number for that slot.
    pub attempt: u32,
    /// Why it was rejected.
    pub reason: RejectReason,
}

/// Emitted when rendering an item fails.
#[derive(Clone, Copy, Debug)]
pub struct ItemFailedEvent {
    /// Item slot.
    pub index: usize,
    /// Consecutive non-accepting attempts so far, including this one.
    pub consecutive_failures: u32,
}

/// Emitted after batch-boundary cleanup.
#[derive(Clone, Copy, Debug)]
pub struct CleanupEvent {
    /// Batch the cleanup followed.
    pub batch: u32,
    /// Items whose image bytes were evicted.
    pub evicted_images: usize,
    /// Preview handles released.
    pub released_previews: usize,
    /// Pressure level that chose the retention window.
    pub pressure: PressureLevel,
    /// Whether the host was asked to reclaim memory.
    pub reclaim_requested: bool,
}

/// Emitted when the controller observes a pressure change.
#[derive(Clone, Copy, Debug)]
pub struct PressureChangeEvent {
    /// Previous level.
    pub from: PressureLevel,
    /// New level.
    pub to: PressureLevel,
    /// Usage percentage that caused the change.
    pub percentage: f32,
    /// Host time of the sample.
    pub timestamp: HostTime,
}

/// Emitted when a session leaves the running states for good.
#[derive(Clone, Copy, Debug)]
pub struct SessionEndEvent {
    /// How it ended.
    pub outcome: SessionOutcome,
    /// Items accepted over the whole session.
    pub generated: usize,
    /// Host time at the end.
    pub timestamp: HostTime,
}

// ---------------------------------------------------------------------------
// TraceSink trait
// ---------------------------------------------------------------------------

/// Receives trace events from the batch controller.
///
/// All methods have default no-op implementations, so you only need to
/// override the events you care about.
pub trait TraceSink {
    /// Called when a session starts running.
    fn on_session_start(&mut self, e: &SessionStartEvent) {
        _ = e;
    }

    /// Called at the beginning of a batch.
    fn on_batch_begin(&mut self, e: &BatchBeginEvent) {
        _ = e;
    }

    /// Called at the end of a batch.
    fn on_batch_end(&mut self, e: &BatchEndEvent) {
        _ = e;
    }

    /// Called for every rejected candidate.
    fn on_candidate_rejected(&mut self, e: &CandidateRejectedEvent) {
        _ = e;
    }

    /// Called when rendering an item fails.
    fn on_item_failed(&mut self, e: &ItemFailedEvent) {
        _ = e;
    }

    /// Called after batch-boundary cleanup.
    fn on_cleanup(&mut self, e: &CleanupEvent) {
        _ = e;
    }

    /// Called when memory pressure changes.
    fn on_pressure_change(&mut self, e: &PressureChangeEvent) {
        _ = e;
    }

    /// Called when a session completes, is cancelled, or fails.
    fn on_session_end(&mut self, e: &SessionEndEvent) {
        _ = e;
    }
}

// ---------------------------------------------------------------------------
// NoopSink
// ---------------------------------------------------------------------------

/// A [`TraceSink`] that discards all events.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

impl TraceSink for NoopSink {}

// ---------------------------------------------------------------------------
// Tracer wrapper
// ---------------------------------------------------------------------------

/// Thin wrapper around an optional [`TraceSink`].
///
/// When the `trace` feature is **off**, every method compiles to nothing. When
/// **on**, each method checks the inner `Option` (one branch) before
/// dispatching to the sink.
pub struct Tracer<'a> {
    #[cfg(feature = "trace")]
    sink: Option<&'a mut dyn TraceSink>,
    #[cfg(not(feature = "trace"))]
    _marker: core::marker::PhantomData<&'a mut dyn TraceSink>,
}

impl core::fmt::Debug for Tracer<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tracer").finish_non_exhaustive()
    }
}

/// Generates a forwarding method on [`Tracer`].
macro_rules! forward {
    ($(#[$doc:meta])* $name:ident => $hook:ident($ty:ty)) => {
        $(#[$doc])*
        #[inline]
        pub fn $name(&mut self, e: &$ty) {
            #[cfg(feature = "trace")]
            if let Some(s) = &mut self.sink {
                s.$hook(e);
            }
            #[cfg(not(feature = "trace"))]
            {
                _ = e;
            }
        }
    };
}

impl<'a> Tracer<'a> {
    /// Creates a tracer that dispatches to the given sink.
    #[inline]
    #[must_use]
    pub fn new(sink: &'a mut dyn TraceSink) -> Self {
        #[cfg(feature = "trace")]
        {
            Self { sink: Some(sink) }
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = sink;
            Self {
                _marker: core::marker::PhantomData,
            }
        }
    }

    /// Creates a tracer that discards all events.
    #[inline]
    #[must_use]
    pub fn none() -> Self {
        #[cfg(feature = "trace")]
        {
            Self { sink: None }
        }
        #[cfg(not(feature = "trace"))]
        {
            Self {
                _marker: core::marker::PhantomData,
            }
        }
    }

    forward!(
        /// Emits a [`SessionStartEvent`].
        session_start => on_session_start(SessionStartEvent)
    );
    forward!(
        /// Emits a [`BatchBeginEvent`].
        batch_begin => on_batch_begin(BatchBeginEvent)
    );
    forward!(
        /// Emits a [`BatchEndEvent`].
        batch_end => on_batch_end(BatchEndEvent)
    );
    forward!(
        /// Emits a [`CandidateRejectedEvent`].
        candidate_rejected => on_candidate_rejected(CandidateRejectedEvent)
    );
    forward!(
        /// Emits an [`ItemFailedEvent`].
        item_failed => on_item_failed(ItemFailedEvent)
    );
    forward!(
        /// Emits a [`CleanupEvent`].
        cleanup => on_cleanup(CleanupEvent)
    );
    forward!(
        /// Emits a [`PressureChangeEvent`].
        pressure_change => on_pressure_change(PressureChangeEvent)
    );
    forward!(
        /// Emits a [`SessionEndEvent`].
        session_end => on_session_end(SessionEndEvent)
    );
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
