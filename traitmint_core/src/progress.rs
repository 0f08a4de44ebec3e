// Copyright 2026 the Traitmint Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Coalesced progress reporting.
//!
//! Generation produces one snapshot per accepted item, far more than a UI or
//! storage layer wants. [`BatchedProgressReporter`] queues snapshots and
//! publishes only the latest one of each window, where a window closes after
//! [`update_interval`](ReporterConfig::update_interval) snapshots or
//! [`max_delay_ms`](ReporterConfig::max_delay_ms) after it opened, whichever
//! comes first.
//!
//! Like the memory sampler it has no timer; the host calls
//! [`poll`](BatchedProgressReporter::poll), and can use
//! [`next_deadline`](BatchedProgressReporter::next_deadline) to schedule the
//! call.

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::vec::Vec;

use serde::{Deserialize, Serialize};

use crate::controller::ControllerState;
use crate::persist::{self, SessionStore};
use crate::time::{Duration, HostTime, Timebase};

/// Point-in-time progress of a session.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Items accepted so far.
    pub generated_count: usize,
    /// Items requested.
    pub total_count: usize,
    /// Controller state when the snapshot was taken.
    pub status: ControllerState,
    /// Latest heap usage percentage, when known.
    pub memory_usage: Option<f32>,
    /// Host time of the snapshot.
    pub timestamp: HostTime,
}

impl ProgressSnapshot {
    /// Completed fraction in `0.0..=1.0`.
    #[must_use]
    pub fn fraction(&self) -> f64 {
        if self.total_count == 0 {
            return 0.0;
        }
        (self.generated_count as f64 / self.total_count as f64).min(1.0)
    }
}

/// Receives published snapshots.
pub trait ProgressListener {
    /// Called once per flush with the latest snapshot.
    fn on_progress(&mut self, snapshot: &ProgressSnapshot);
}

impl<F: FnMut(&ProgressSnapshot)> ProgressListener for F {
    fn on_progress(&mut self, snapshot: &ProgressSnapshot) {
        self(snapshot);
    }
}

/// Configuration for the [`BatchedProgressReporter`].
#[derive(Clone, Copy, Debug)]
pub struct ReporterConfig {
    /// Pending snapshots that force a flush.
    pub update_interval: usize,
    /// Longest a snapshot may wait before a flush, in milliseconds.
    pub max_delay_ms: u64,
    /// Minimum time between persisted snapshots, in milliseconds.
    pub persist_interval_ms: u64,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            update_interval: 100,
            max_delay_ms: 5_000,
            persist_interval_ms: 2_000,
        }
    }
}

impl ReporterConfig {
    /// Publishes every snapshot as soon as it arrives.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            update_interval: 1,
            ..Self::default()
        }
    }
}

/// Queues progress snapshots and publishes the latest of each window.
pub struct BatchedProgressReporter {
    config: ReporterConfig,
    max_delay: Duration,
    persist_interval: Duration,
    pending: Vec<ProgressSnapshot>,
    window_opened_at: Option<HostTime>,
    last_persisted_at: Option<HostTime>,
    enabled: bool,
    current: Option<ProgressSnapshot>,
    flushes: u64,
    listeners: Vec<Box<dyn ProgressListener>>,
    store: Option<Rc<dyn SessionStore>>,
}

impl core::fmt::Debug for BatchedProgressReporter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BatchedProgressReporter")
            .field("config", &self.config)
            .field("pending", &self.pending.len())
            .field("enabled", &self.enabled)
            .field("current", &self.current)
            .field("flushes", &self.flushes)
            .finish_non_exhaustive()
    }
}

impl BatchedProgressReporter {
    /// Creates an enabled reporter with no listeners.
    #[must_use]
    pub fn new(config: ReporterConfig, timebase: Timebase) -> Self {
        Self {
            max_delay: Duration::from_millis(config.max_delay_ms, timebase),
            persist_interval: Duration::from_millis(config.persist_interval_ms, timebase),
            pending: Vec::with_capacity(config.update_interval.min(1024)),
            config,
            window_opened_at: None,
            last_persisted_at: None,
            enabled: true,
            current: None,
            flushes: 0,
            listeners: Vec::new(),
            store: None,
        }
    }

    /// Persists flushed snapshots to `store`.
    pub fn set_store(&mut self, store: Rc<dyn SessionStore>) {
        self.store = Some(store);
    }

    /// Registers a listener.
    pub fn add_listener(&mut self, listener: Box<dyn ProgressListener>) {
        self.listeners.push(listener);
    }

    /// Turns batching on or off.
    ///
    /// While disabled every scheduled snapshot is published immediately.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Whether batching is on.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Queues a snapshot, flushing if the window is full.
    ///
    /// Returns `true` if this call flushed.
    pub fn schedule_update(&mut self, snapshot: ProgressSnapshot, now: HostTime) -> bool {
        self.pending.push(snapshot);
        if self.window_opened_at.is_none() {
            self.window_opened_at = Some(now);
        }

        if !self.enabled || self.pending.len() >= self.config.update_interval {
            return self.flush_updates(now);
        }
        false
    }

    /// Flushes if the open window has waited at least `max_delay`.
    ///
    /// Returns `true` if this call flushed.
    pub fn poll(&mut self, now: HostTime) -> bool {
        match self.next_deadline() {
            Some(deadline) if now >= deadline => self.flush_updates(now),
            _ => false,
        }
    }

    /// When the open window must be flushed, if one is open.
    #[must_use]
    pub fn next_deadline(&self) -> Option<HostTime> {
        if self.pending.is_empty() {
            return None;
        }
        self.window_opened_at
            .map(|opened| opened.saturating_add(self.max_delay))
    }

    /// Publishes the latest pending snapshot and clears the queue.
    ///
    /// Returns `false` when nothing was pending.
    pub fn flush_updates(&mut self, now: HostTime) -> bool {
        let Some(latest) = self.pending.pop() else {
            return false;
        };
        self.pending.clear();
        self.window_opened_at = None;
        self.current = Some(latest);
        self.flushes += 1;

        for listener in &mut self.listeners {
            listener.on_progress(&latest);
        }

        let persist_due = self
            .last_persisted_at
            .is_none_or(|last| now.saturating_duration_since(last) >= self.persist_interval);
        if persist_due {
            self.persist(now);
        }
        true
    }

    /// Writes the current snapshot to the store regardless of cadence.
    pub fn persist(&mut self, now: HostTime) {
        if let (Some(store), Some(snapshot)) = (&self.store, &self.current)
            && persist::save_progress(store.as_ref(), snapshot)
        {
            self.last_persisted_at = Some(now);
        }
    }

    /// Drops pending snapshots and the current one, keeping listeners.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.window_opened_at = None;
        self.last_persisted_at = None;
        self.current = None;
    }

    /// The most recently published snapshot.
    #[must_use]
    pub fn current(&self) -> Option<&ProgressSnapshot> {
        self.current.as_ref()
    }

    /// Snapshots waiting for the next flush.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Number of flushes so far.
    #[must_use]
    pub fn flush_count(&self) -> u64 {
        self.flushes
    }
}
