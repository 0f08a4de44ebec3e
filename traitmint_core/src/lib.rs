// Copyright 2026 the Traitmint Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Trait-combination uniqueness, adaptive batching and progress reporting
//! for layered collection generation.
//!
//! `traitmint_core` is the host-independent half of a generator that
//! composites layered trait images into large collections. It is `no_std`
//! compatible (with `alloc`) and has no timers or platform calls of its own:
//! hosts feed it [`HostTime`](time::HostTime) values and call it back from
//! their event loop.
//!
//! # Architecture
//!
//! ```text
//!   Host event loop
//!       │
//!       ▼
//!   BatchController::step() ──► BatchPlan (1 batch)
//!       │
//!       ├──► Generator::propose() ──► UniquenessTracker::admit()
//!       │                                  │ accept
//!       │                                  ▼
//!       │                     Generator::render() ──► ItemSink
//!       │
//!       ├──► BatchedProgressReporter ──► ProgressListener / SessionStore
//!       │
//!       └──◄ MemorySampler (pressure) ──► cleanup_batch_memory()
//! ```
//!
//! **[`indexer`]**: Packs up to eight 8-bit trait ids into a `u64` key and
//! falls back to a delimited string for anything wider.
//!
//! **[`tracker`]**: Per-group sets of seen combination keys, including
//! strict-pair rules that forbid repeating a pair of traits.
//!
//! **[`memory`]**: Periodic heap sampling, pressure levels and the
//! admission check for single-pass sessions.
//!
//! **[`plan`]**: Batch-size breakpoints and the batch plan.
//!
//! **[`controller`]**: The session state machine that ties everything
//! together.
//!
//! **[`progress`]**: Coalesces per-item progress into one published
//! snapshot per window.
//!
//! **[`persist`]**: Versioned session blob and the
//! [`SessionStore`](persist::SessionStore) seam.
//!
//! **[`trace`]**: [`TraceSink`](trace::TraceSink) trait and event types for
//! session instrumentation, with a zero-overhead
//! [`Tracer`](trace::Tracer) wrapper.
//!
//! **[`time`]**: Host time, durations and the [`Clock`](time::Clock) seam.
//!
//! # Crate features
//!
//! - `trace` (disabled by default): Enables `Tracer` method bodies (one branch
//!   per call site).

#![no_std]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod controller;
pub mod error;
pub mod indexer;
pub mod memory;
pub mod persist;
pub mod plan;
pub mod progress;
pub mod time;
pub mod trace;
pub mod tracker;
