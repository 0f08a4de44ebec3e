// Copyright 2026 the Traitmint Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Chrome Trace Event Format exporter.
//!
//! [`export`] reads recorded bytes from a [`RecorderSink`](super::recorder::RecorderSink)
//! and writes [Chrome Trace Event Format][spec] JSON to the given writer.
//!
//! Batches become duration slices on thread 0. Rejections and render
//! failures go on thread 1 so they do not split the batch slices.
//!
//! [spec]: https://docs.google.com/document/d/1CvAClvFfyA5R-PhYUmn5OOQtYMH4h6I0nSsKchNAySU

use std::io::{self, Write};

use serde_json::{Value, json};

use traitmint_core::time::{HostTime, Timebase};

use crate::recorder::{RecordedEvent, decode};

const BATCH_TID: u32 = 0;
const ITEM_TID: u32 = 1;

/// Exports recorded events as Chrome Trace Event Format JSON.
///
/// The output is a complete JSON array of trace event objects, suitable for
/// loading into `chrome://tracing` or [Perfetto](https://ui.perfetto.dev/).
///
/// Timestamps are converted to microseconds using the provided [`Timebase`].
/// Events recorded without a timestamp are placed at the most recent one.
pub fn export(bytes: &[u8], timebase: Timebase, writer: &mut dyn Write) -> io::Result<()> {
    let mut events: Vec<Value> = Vec::new();
    let mut last_seen = HostTime(0);

    for recorded in decode(bytes) {
        if let Some(t) = timestamp_of(&recorded) {
            last_seen = t;
        }
        let ts = ticks_to_us(last_seen.ticks(), timebase);
        match recorded {
            RecordedEvent::SessionStart(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": "SessionStart",
                    "cat": "Session",
                    "ts": ts,
                    "pid": 0,
                    "tid": BATCH_TID,
                    "s": "g",
                    "args": {
                        "total_items": e.total_items,
                        "batch_size": e.batch_size,
                        "total_batches": e.total_batches,
                        "restored_batches": e.restored_batches,
                    }
                }));
            }
            RecordedEvent::BatchBegin(e) => {
                events.push(json!({
                    "ph": "B",
                    "name": format!("Batch {}", e.batch),
                    "cat": "Batch",
                    "ts": ts,
                    "pid": 0,
                    "tid": BATCH_TID,
                    "args": {
                        "start": e.start,
                        "end": e.end,
                    }
                }));
            }
            RecordedEvent::BatchEnd(e) => {
                events.push(json!({
                    "ph": "E",
                    "name": format!("Batch {}", e.batch),
                    "cat": "Batch",
                    "ts": ts,
                    "pid": 0,
                    "tid": BATCH_TID,
                    "args": {
                        "accepted": e.accepted,
                        "rejected": e.rejected,
                        "failed": e.failed,
                    }
                }));
            }
            RecordedEvent::CandidateRejected(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": "CandidateRejected",
                    "cat": "Item",
                    "ts": ts,
                    "pid": 0,
                    "tid": ITEM_TID,
                    "s": "t",
                    "args": {
                        "index": e.index,
                        "attempt": e.attempt,
                        "reason": format!("{:?}", e.reason),
                    }
                }));
            }
            RecordedEvent::ItemFailed(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": "ItemFailed",
                    "cat": "Item",
                    "ts": ts,
                    "pid": 0,
                    "tid": ITEM_TID,
                    "s": "t",
                    "args": {
                        "index": e.index,
                        "consecutive_failures": e.consecutive_failures,
                    }
                }));
            }
            RecordedEvent::Cleanup(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": "Cleanup",
                    "cat": "Memory",
                    "ts": ts,
                    "pid": 0,
                    "tid": BATCH_TID,
                    "s": "t",
                    "args": {
                        "batch": e.batch,
                        "evicted_images": e.evicted_images,
                        "released_previews": e.released_previews,
                        "pressure": format!("{:?}", e.pressure),
                        "reclaim_requested": e.reclaim_requested,
                    }
                }));
            }
            RecordedEvent::PressureChange(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": "PressureChange",
                    "cat": "Memory",
                    "ts": ts,
                    "pid": 0,
                    "tid": BATCH_TID,
                    "s": "g",
                    "args": {
                        "from": format!("{:?}", e.from),
                        "to": format!("{:?}", e.to),
                        "percentage": e.percentage,
                    }
                }));
            }
            RecordedEvent::SessionEnd(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": "SessionEnd",
                    "cat": "Session",
                    "ts": ts,
                    "pid": 0,
                    "tid": BATCH_TID,
                    "s": "g",
                    "args": {
                        "outcome": format!("{:?}", e.outcome),
                        "generated": e.generated,
                    }
                }));
            }
        }
    }

    serde_json::to_writer_pretty(writer, &events)?;
    Ok(())
}

fn timestamp_of(event: &RecordedEvent) -> Option<HostTime> {
    match event {
        RecordedEvent::SessionStart(e) => Some(e.timestamp),
        RecordedEvent::BatchBegin(e) => Some(e.timestamp),
        RecordedEvent::BatchEnd(e) => Some(e.timestamp),
        RecordedEvent::PressureChange(e) => Some(e.timestamp),
        RecordedEvent::SessionEnd(e) => Some(e.timestamp),
        RecordedEvent::CandidateRejected(_)
        | RecordedEvent::ItemFailed(_)
        | RecordedEvent::Cleanup(_) => None,
    }
}

fn ticks_to_us(ticks: u64, timebase: Timebase) -> f64 {
    timebase.ticks_to_nanos(ticks) as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::RecorderSink;
    use traitmint_core::trace::{
        BatchBeginEvent, BatchEndEvent, CandidateRejectedEvent, RejectReason, TraceSink,
    };

    #[test]
    fn export_produces_valid_json() {
        let mut rec = RecorderSink::new();
        rec.on_batch_begin(&BatchBeginEvent {
            batch: 1,
            start: 0,
            end: 500,
            timestamp: HostTime(2_000),
        });
        rec.on_candidate_rejected(&CandidateRejectedEvent {
            index: 12,
            attempt: 0,
            reason: RejectReason::Duplicate,
        });
        rec.on_batch_end(&BatchEndEvent {
            batch: 1,
            accepted: 500,
            rejected: 1,
            failed: 0,
            timestamp: HostTime(3_000),
        });

        let mut out = Vec::new();
        export(rec.as_bytes(), Timebase::MICROS, &mut out).unwrap();
        let json_str = String::from_utf8(out).unwrap();

        let parsed: Vec<Value> = serde_json::from_str(&json_str).unwrap();
        assert_eq!(parsed.len(), 3);

        assert_eq!(parsed[0]["ph"], "B");
        assert_eq!(parsed[0]["name"], "Batch 1");
        assert_eq!(parsed[0]["ts"], 2_000.0);

        // The rejection inherits the batch's start time.
        assert_eq!(parsed[1]["ph"], "i");
        assert_eq!(parsed[1]["tid"], ITEM_TID);
        assert_eq!(parsed[1]["ts"], 2_000.0);
        assert_eq!(parsed[1]["args"]["reason"], "Duplicate");

        assert_eq!(parsed[2]["ph"], "E");
        assert_eq!(parsed[2]["name"], "Batch 1");
        assert_eq!(parsed[2]["args"]["accepted"], 500);
    }

    #[test]
    fn export_empty_recording() {
        let mut out = Vec::new();
        export(&[], Timebase::NANOS, &mut out).unwrap();
        let json_str = String::from_utf8(out).unwrap();
        let parsed: Vec<Value> = serde_json::from_str(&json_str).unwrap();
        assert!(parsed.is_empty());
    }
}
