// Copyright 2026 the Traitmint Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Compact binary event recording and decoding.
//!
//! [`RecorderSink`] implements [`TraceSink`] and encodes events into a
//! `Vec<u8>` as fixed-size little-endian records. [`decode`] reads them back
//! as an iterator of [`RecordedEvent`].
//!
//! A long session rejects many candidates; each rejection costs 14 bytes.

use traitmint_core::memory::PressureLevel;
use traitmint_core::time::HostTime;
use traitmint_core::trace::{
    BatchBeginEvent, BatchEndEvent, CandidateRejectedEvent, CleanupEvent, ItemFailedEvent,
    PressureChangeEvent, RejectReason, SessionEndEvent, SessionOutcome, SessionStartEvent,
    TraceSink,
};

// ---------------------------------------------------------------------------
// Event type discriminants
// ---------------------------------------------------------------------------

const TAG_SESSION_START: u8 = 1;
const TAG_BATCH_BEGIN: u8 = 2;
const TAG_BATCH_END: u8 = 3;
const TAG_CANDIDATE_REJECTED: u8 = 4;
const TAG_ITEM_FAILED: u8 = 5;
const TAG_CLEANUP: u8 = 6;
const TAG_PRESSURE_CHANGE: u8 = 7;
const TAG_SESSION_END: u8 = 8;

// ---------------------------------------------------------------------------
// RecorderSink
// ---------------------------------------------------------------------------

/// A [`TraceSink`] that encodes events into a compact binary buffer.
#[derive(Debug, Default)]
pub struct RecorderSink {
    buf: Vec<u8>,
}

impl RecorderSink {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a view of the recorded bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the recorder and returns the recorded bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    // -- encoding helpers --------------------------------------------------

    fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_usize(&mut self, v: usize) {
        self.write_u64(v as u64);
    }

    fn write_bool(&mut self, v: bool) {
        self.write_u8(u8::from(v));
    }

    fn write_pressure(&mut self, p: PressureLevel) {
        self.write_u8(match p {
            PressureLevel::Low => 0,
            PressureLevel::Medium => 1,
            PressureLevel::High => 2,
        });
    }

    fn write_reason(&mut self, r: RejectReason) {
        match r {
            RejectReason::Duplicate => {
                self.write_u8(0);
                self.write_u32(0);
            }
            RejectReason::StrictPair { rule_index } => {
                self.write_u8(1);
                self.write_u32(u32::try_from(rule_index).unwrap_or(u32::MAX));
            }
        }
    }

    fn write_outcome(&mut self, o: SessionOutcome) {
        self.write_u8(match o {
            SessionOutcome::Completed => 0,
            SessionOutcome::Cancelled => 1,
            SessionOutcome::Failed => 2,
        });
    }
}

impl TraceSink for RecorderSink {
    fn on_session_start(&mut self, e: &SessionStartEvent) {
        self.write_u8(TAG_SESSION_START);
        self.write_usize(e.total_items);
        self.write_usize(e.batch_size);
        self.write_u32(e.total_batches);
        self.write_u32(e.restored_batches);
        self.write_u64(e.timestamp.ticks());
    }

    fn on_batch_begin(&mut self, e: &BatchBeginEvent) {
        self.write_u8(TAG_BATCH_BEGIN);
        self.write_u32(e.batch);
        self.write_usize(e.start);
        self.write_usize(e.end);
        self.write_u64(e.timestamp.ticks());
    }

    fn on_batch_end(&mut self, e: &BatchEndEvent) {
        self.write_u8(TAG_BATCH_END);
        self.write_u32(e.batch);
        self.write_usize(e.accepted);
        self.write_usize(e.rejected);
        self.write_usize(e.failed);
        self.write_u64(e.timestamp.ticks());
    }

    fn on_candidate_rejected(&mut self, e: &CandidateRejectedEvent) {
        self.write_u8(TAG_CANDIDATE_REJECTED);
        self.write_usize(e.index);
        self.write_u32(e.attempt);
        self.write_reason(e.reason);
    }

    fn on_item_failed(&mut self, e: &ItemFailedEvent) {
        self.write_u8(TAG_ITEM_FAILED);
        self.write_usize(e.index);
        self.write_u32(e.consecutive_failures);
    }

    fn on_cleanup(&mut self, e: &CleanupEvent) {
        self.write_u8(TAG_CLEANUP);
        self.write_u32(e.batch);
        self.write_usize(e.evicted_images);
        self.write_usize(e.released_previews);
        self.write_pressure(e.pressure);
        self.write_bool(e.reclaim_requested);
    }

    fn on_pressure_change(&mut self, e: &PressureChangeEvent) {
        self.write_u8(TAG_PRESSURE_CHANGE);
        self.write_pressure(e.from);
        self.write_pressure(e.to);
        self.write_u32(e.percentage.to_bits());
        self.write_u64(e.timestamp.ticks());
    }

    fn on_session_end(&mut self, e: &SessionEndEvent) {
        self.write_u8(TAG_SESSION_END);
        self.write_outcome(e.outcome);
        self.write_usize(e.generated);
        self.write_u64(e.timestamp.ticks());
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// A decoded event from a binary recording.
#[derive(Clone, Debug)]
pub enum RecordedEvent {
    /// A [`SessionStartEvent`].
    SessionStart(SessionStartEvent),
    /// A [`BatchBeginEvent`].
    BatchBegin(BatchBeginEvent),
    /// A [`BatchEndEvent`].
    BatchEnd(BatchEndEvent),
    /// A [`CandidateRejectedEvent`].
    CandidateRejected(CandidateRejectedEvent),
    /// An [`ItemFailedEvent`].
    ItemFailed(ItemFailedEvent),
    /// A [`CleanupEvent`].
    Cleanup(CleanupEvent),
    /// A [`PressureChangeEvent`].
    PressureChange(PressureChangeEvent),
    /// A [`SessionEndEvent`].
    SessionEnd(SessionEndEvent),
}

/// Decodes a byte slice produced by [`RecorderSink`] into an iterator of
/// [`RecordedEvent`].
pub fn decode(bytes: &[u8]) -> DecodeIter<'_> {
    DecodeIter {
        data: bytes,
        pos: 0,
    }
}

/// Iterator over decoded events.
#[derive(Debug)]
pub struct DecodeIter<'a> {
    data: &'a [u8],
    pos: usize,
}

impl DecodeIter<'_> {
    fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
        let bytes = self.data.get(self.pos..self.pos + N)?.try_into().ok()?;
        self.pos += N;
        Some(bytes)
    }

    fn read_u8(&mut self) -> Option<u8> {
        Some(self.take::<1>()?[0])
    }

    fn read_u32(&mut self) -> Option<u32> {
        Some(u32::from_le_bytes(self.take()?))
    }

    fn read_u64(&mut self) -> Option<u64> {
        Some(u64::from_le_bytes(self.take()?))
    }

    fn read_usize(&mut self) -> Option<usize> {
        Some(usize::try_from(self.read_u64()?).unwrap_or(usize::MAX))
    }

    fn read_time(&mut self) -> Option<HostTime> {
        Some(HostTime(self.read_u64()?))
    }

    fn read_pressure(&mut self) -> Option<PressureLevel> {
        Some(match self.read_u8()? {
            0 => PressureLevel::Low,
            1 => PressureLevel::Medium,
            _ => PressureLevel::High,
        })
    }

    fn read_reason(&mut self) -> Option<RejectReason> {
        let kind = self.read_u8()?;
        let rule = self.read_u32()?;
        Some(match kind {
            0 => RejectReason::Duplicate,
            _ => RejectReason::StrictPair {
                rule_index: rule as usize,
            },
        })
    }

    fn read_outcome(&mut self) -> Option<SessionOutcome> {
        Some(match self.read_u8()? {
            0 => SessionOutcome::Completed,
            1 => SessionOutcome::Cancelled,
            _ => SessionOutcome::Failed,
        })
    }

    fn decode_session_start(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::SessionStart(SessionStartEvent {
            total_items: self.read_usize()?,
            batch_size: self.read_usize()?,
            total_batches: self.read_u32()?,
            restored_batches: self.read_u32()?,
            timestamp: self.read_time()?,
        }))
    }

    fn decode_batch_begin(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::BatchBegin(BatchBeginEvent {
            batch: self.read_u32()?,
            start: self.read_usize()?,
            end: self.read_usize()?,
            timestamp: self.read_time()?,
        }))
    }

    fn decode_batch_end(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::BatchEnd(BatchEndEvent {
            batch: self.read_u32()?,
            accepted: self.read_usize()?,
            rejected: self.read_usize()?,
            failed: self.read_usize()?,
            timestamp: self.read_time()?,
        }))
    }

    fn decode_candidate_rejected(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::CandidateRejected(CandidateRejectedEvent {
            index: self.read_usize()?,
            attempt: self.read_u32()?,
            reason: self.read_reason()?,
        }))
    }

    fn decode_item_failed(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::ItemFailed(ItemFailedEvent {
            index: self.read_usize()?,
            consecutive_failures: self.read_u32()?,
        }))
    }

    fn decode_cleanup(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::Cleanup(CleanupEvent {
            batch: self.read_u32()?,
            evicted_images: self.read_usize()?,
            released_previews: self.read_usize()?,
            pressure: self.read_pressure()?,
            reclaim_requested: self.read_u8()? != 0,
        }))
    }

    fn decode_pressure_change(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::PressureChange(PressureChangeEvent {
            from: self.read_pressure()?,
            to: self.read_pressure()?,
            percentage: f32::from_bits(self.read_u32()?),
            timestamp: self.read_time()?,
        }))
    }

    fn decode_session_end(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::SessionEnd(SessionEndEvent {
            outcome: self.read_outcome()?,
            generated: self.read_usize()?,
            timestamp: self.read_time()?,
        }))
    }
}

impl Iterator for DecodeIter<'_> {
    type Item = RecordedEvent;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_u8()? {
            TAG_SESSION_START => self.decode_session_start(),
            TAG_BATCH_BEGIN => self.decode_batch_begin(),
            TAG_BATCH_END => self.decode_batch_end(),
            TAG_CANDIDATE_REJECTED => self.decode_candidate_rejected(),
            TAG_ITEM_FAILED => self.decode_item_failed(),
            TAG_CLEANUP => self.decode_cleanup(),
            TAG_PRESSURE_CHANGE => self.decode_pressure_change(),
            TAG_SESSION_END => self.decode_session_end(),
            _ => None, // unknown tag → stop iteration
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_events_decode_in_order() {
        let mut rec = RecorderSink::new();
        rec.on_batch_begin(&BatchBeginEvent {
            batch: 2,
            start: 1_000,
            end: 2_000,
            timestamp: HostTime(40),
        });
        rec.on_candidate_rejected(&CandidateRejectedEvent {
            index: 1_017,
            attempt: 3,
            reason: RejectReason::StrictPair { rule_index: 1 },
        });
        rec.on_batch_end(&BatchEndEvent {
            batch: 2,
            accepted: 999,
            rejected: 1,
            failed: 1,
            timestamp: HostTime(90),
        });

        let events: Vec<_> = decode(rec.as_bytes()).collect();
        assert_eq!(events.len(), 3);
        match &events[1] {
            RecordedEvent::CandidateRejected(e) => {
                assert_eq!(e.index, 1_017);
                assert_eq!(e.attempt, 3);
                assert_eq!(e.reason, RejectReason::StrictPair { rule_index: 1 });
            }
            other => panic!("expected CandidateRejected, got {other:?}"),
        }
        match &events[2] {
            RecordedEvent::BatchEnd(e) => {
                assert_eq!((e.accepted, e.rejected, e.failed), (999, 1, 1));
                assert_eq!(e.timestamp, HostTime(90));
            }
            other => panic!("expected BatchEnd, got {other:?}"),
        }
    }

    #[test]
    fn pressure_change_keeps_exact_percentage() {
        let mut rec = RecorderSink::new();
        rec.on_pressure_change(&PressureChangeEvent {
            from: PressureLevel::Medium,
            to: PressureLevel::High,
            percentage: 91.25,
            timestamp: HostTime(7),
        });

        let events: Vec<_> = decode(rec.as_bytes()).collect();
        match &events[0] {
            RecordedEvent::PressureChange(e) => {
                assert_eq!(e.from, PressureLevel::Medium);
                assert_eq!(e.to, PressureLevel::High);
                assert_eq!(e.percentage, 91.25);
            }
            other => panic!("expected PressureChange, got {other:?}"),
        }
    }

    #[test]
    fn truncated_record_stops_iteration() {
        let mut rec = RecorderSink::new();
        rec.on_session_end(&SessionEndEvent {
            outcome: SessionOutcome::Cancelled,
            generated: 12,
            timestamp: HostTime(3),
        });
        let bytes = rec.into_bytes();
        assert_eq!(decode(&bytes).count(), 1);
        assert_eq!(decode(&bytes[..bytes.len() - 1]).count(), 0);
    }

    #[test]
    fn empty_buffer_decodes_to_nothing() {
        let events: Vec<_> = decode(&[]).collect();
        assert!(events.is_empty());
    }
}
