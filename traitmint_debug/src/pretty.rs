// Copyright 2026 the Traitmint Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Human-readable trace output.
//!
//! [`PrettyPrintSink`] implements [`TraceSink`] and writes one line per event
//! to a [`Write`](std::io::Write) destination (default: stderr). Timestamps
//! are converted to milliseconds using a [`Timebase`].

use std::io::Write;

use traitmint_core::memory::PressureLevel;
use traitmint_core::time::{HostTime, Timebase};
use traitmint_core::trace::{
    BatchBeginEvent, BatchEndEvent, CandidateRejectedEvent, CleanupEvent, ItemFailedEvent,
    PressureChangeEvent, RejectReason, SessionEndEvent, SessionStartEvent, TraceSink,
};

/// Writes human-readable trace lines to a [`Write`](std::io::Write) destination.
pub struct PrettyPrintSink<W: Write = Box<dyn Write>> {
    writer: W,
    timebase: Timebase,
    show_rejections: bool,
}

impl<W: Write> std::fmt::Debug for PrettyPrintSink<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrettyPrintSink")
            .field("timebase", &self.timebase)
            .field("show_rejections", &self.show_rejections)
            .finish_non_exhaustive()
    }
}

impl PrettyPrintSink {
    /// Creates a sink that writes to stderr.
    #[must_use]
    pub fn stderr(timebase: Timebase) -> Self {
        Self::new(Box::new(std::io::stderr()), timebase)
    }

    /// Creates a sink that writes to a boxed writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write>, timebase: Timebase) -> Self {
        Self::with_writer(writer, timebase)
    }
}

impl<W: Write> PrettyPrintSink<W> {
    /// Creates a sink that writes to the given destination.
    #[must_use]
    pub fn with_writer(writer: W, timebase: Timebase) -> Self {
        Self {
            writer,
            timebase,
            show_rejections: true,
        }
    }

    /// Hides per-candidate rejection lines, which dominate output when the
    /// space is nearly exhausted.
    #[must_use]
    pub fn quiet_rejections(mut self) -> Self {
        self.show_rejections = false;
        self
    }

    fn host_ms(&self, t: HostTime) -> f64 {
        self.timebase.ticks_to_nanos(t.ticks()) as f64 / 1_000_000.0
    }
}

fn level_name(level: PressureLevel) -> &'static str {
    match level {
        PressureLevel::Low => "low",
        PressureLevel::Medium => "medium",
        PressureLevel::High => "high",
    }
}

impl<W: Write> TraceSink for PrettyPrintSink<W> {
    fn on_session_start(&mut self, e: &SessionStartEvent) {
        let _ = writeln!(
            self.writer,
            "[session:start] items={} batch_size={} batches={} restored={} at {:.1}ms",
            e.total_items,
            e.batch_size,
            e.total_batches,
            e.restored_batches,
            self.host_ms(e.timestamp),
        );
    }

    fn on_batch_begin(&mut self, e: &BatchBeginEvent) {
        let _ = writeln!(
            self.writer,
            "[batch:begin] #{} items {}..{} at {:.1}ms",
            e.batch,
            e.start,
            e.end,
            self.host_ms(e.timestamp),
        );
    }

    fn on_batch_end(&mut self, e: &BatchEndEvent) {
        let _ = writeln!(
            self.writer,
            "[batch:end] #{} accepted={} rejected={} failed={} at {:.1}ms",
            e.batch,
            e.accepted,
            e.rejected,
            e.failed,
            self.host_ms(e.timestamp),
        );
    }

    fn on_candidate_rejected(&mut self, e: &CandidateRejectedEvent) {
        if !self.show_rejections {
            return;
        }
        let _ = match e.reason {
            RejectReason::Duplicate => writeln!(
                self.writer,
                "[reject] item={} attempt={} duplicate",
                e.index, e.attempt,
            ),
            RejectReason::StrictPair { rule_index } => writeln!(
                self.writer,
                "[reject] item={} attempt={} strict-pair rule={}",
                e.index, e.attempt, rule_index,
            ),
        };
    }

    fn on_item_failed(&mut self, e: &ItemFailedEvent) {
        let _ = writeln!(
            self.writer,
            "[fail] item={} consecutive={}",
            e.index, e.consecutive_failures,
        );
    }

    fn on_cleanup(&mut self, e: &CleanupEvent) {
        let _ = writeln!(
            self.writer,
            "[cleanup] after #{} evicted={} released={} pressure={}{}",
            e.batch,
            e.evicted_images,
            e.released_previews,
            level_name(e.pressure),
            if e.reclaim_requested { " reclaim" } else { "" },
        );
    }

    fn on_pressure_change(&mut self, e: &PressureChangeEvent) {
        let _ = writeln!(
            self.writer,
            "[memory] {} -> {} ({:.1}%) at {:.1}ms",
            level_name(e.from),
            level_name(e.to),
            e.percentage,
            self.host_ms(e.timestamp),
        );
    }

    fn on_session_end(&mut self, e: &SessionEndEvent) {
        let _ = writeln!(
            self.writer,
            "[session:end] {:?} generated={} at {:.1}ms",
            e.outcome,
            e.generated,
            self.host_ms(e.timestamp),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use traitmint_core::trace::SessionOutcome;

    #[test]
    fn pretty_print_batch_lines() {
        let mut sink = PrettyPrintSink::with_writer(Vec::<u8>::new(), Timebase::MILLIS);
        sink.on_batch_begin(&BatchBeginEvent {
            batch: 4,
            start: 1_500,
            end: 2_000,
            timestamp: HostTime(120),
        });
        sink.on_session_end(&SessionEndEvent {
            outcome: SessionOutcome::Cancelled,
            generated: 1_731,
            timestamp: HostTime(180),
        });
        let output = String::from_utf8(sink.writer).unwrap();
        assert!(output.contains("[batch:begin] #4 items 1500..2000 at 120.0ms"), "got: {output}");
        assert!(output.contains("Cancelled generated=1731"), "got: {output}");
    }

    #[test]
    fn quiet_rejections_suppresses_reject_lines() {
        let mut sink =
            PrettyPrintSink::with_writer(Vec::<u8>::new(), Timebase::MILLIS).quiet_rejections();
        sink.on_candidate_rejected(&CandidateRejectedEvent {
            index: 3,
            attempt: 0,
            reason: RejectReason::StrictPair { rule_index: 0 },
        });
        sink.on_item_failed(&ItemFailedEvent {
            index: 3,
            consecutive_failures: 2,
        });
        let output = String::from_utf8(sink.writer).unwrap();
        assert!(!output.contains("[reject]"), "got: {output}");
        assert!(output.contains("[fail] item=3 consecutive=2"), "got: {output}");
    }
}
