// Copyright 2026 the Traitmint Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Host memory sampling and pressure classification.
//!
//! The [`MemorySampler`] has no timer of its own. While
//! [`Running`](SamplerState::Running) it takes a sample whenever
//! [`poll`](MemorySampler::poll) is called at least one interval after the
//! previous sample; backends call `poll` from a platform interval.
//!
//! Introspection goes through [`MemoryProbe`]. When the host offers none,
//! samples degrade to a 0% placeholder and pressure never rises, so every
//! pressure-driven behavior becomes a no-op instead of an error.
//!
//! The optional [`ReclaimHint`] is asked to free memory when usage crosses
//! the critical threshold. Hosts are free to ignore it.

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::vec::Vec;

use crate::time::{Duration, HostTime, Timebase};

/// Raw heap figures reported by a [`MemoryProbe`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapUsage {
    /// Bytes currently in use.
    pub used_bytes: u64,
    /// Bytes the host will allow before failing allocations.
    pub limit_bytes: u64,
}

/// Reads host heap usage.
pub trait MemoryProbe {
    /// Current usage, or `None` if the host offers no introspection.
    fn read(&mut self) -> Option<HeapUsage>;
}

/// A probe for hosts without memory introspection.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoIntrospection;

impl MemoryProbe for NoIntrospection {
    fn read(&mut self) -> Option<HeapUsage> {
        None
    }
}

/// Best-effort request for the host to reclaim memory.
pub trait ReclaimHint {
    /// Asks the host to collect garbage or drop caches.
    fn request_reclaim(&mut self);
}

/// One observation of heap usage.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MemorySample {
    /// Bytes in use.
    pub used_bytes: u64,
    /// Heap limit in bytes (zero when unknown).
    pub limit_bytes: u64,
    /// `used / limit` as a percentage (zero when unknown).
    pub percentage: f32,
    /// When the sample was taken.
    pub timestamp: HostTime,
}

impl MemorySample {
    fn from_usage(usage: Option<HeapUsage>, timestamp: HostTime) -> Self {
        let usage = usage.unwrap_or_default();
        #[expect(
            clippy::cast_possible_truncation,
            reason = "percentage only needs f32 precision"
        )]
        let percentage = if usage.limit_bytes == 0 {
            0.0
        } else {
            (usage.used_bytes as f64 / usage.limit_bytes as f64 * 100.0) as f32
        };
        Self {
            used_bytes: usage.used_bytes,
            limit_bytes: usage.limit_bytes,
            percentage,
            timestamp,
        }
    }
}

/// Coarse memory pressure.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PressureLevel {
    /// Below the warning threshold.
    #[default]
    Low,
    /// At or above warning, below critical.
    Medium,
    /// At or above critical.
    High,
}

/// Usage percentages at which pressure rises.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Thresholds {
    /// Percentage at which pressure becomes [`PressureLevel::Medium`].
    pub warning: f32,
    /// Percentage at which pressure becomes [`PressureLevel::High`].
    pub critical: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            warning: 80.0,
            critical: 90.0,
        }
    }
}

impl Thresholds {
    /// Classifies a usage percentage.
    #[must_use]
    pub fn classify(&self, percentage: f32) -> PressureLevel {
        if percentage >= self.critical {
            PressureLevel::High
        } else if percentage >= self.warning {
            PressureLevel::Medium
        } else {
            PressureLevel::Low
        }
    }
}

/// Configuration for the [`MemorySampler`].
#[derive(Clone, Copy, Debug)]
pub struct SamplerConfig {
    /// Minimum time between samples, in milliseconds.
    pub interval_ms: u64,
    /// Maximum number of samples kept in history.
    pub history_capacity: usize,
    /// Estimated bytes held per generated item, for admission checks.
    pub bytes_per_item: u64,
    /// Required headroom as a multiple of the estimate, in tenths
    /// (15 = 1.5×).
    pub headroom_tenths: u64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            history_capacity: 100,
            bytes_per_item: 100 * 1024,
            headroom_tenths: 15,
        }
    }
}

/// Lifecycle of a [`MemorySampler`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SamplerState {
    /// Not sampling.
    #[default]
    Stopped,
    /// Sampling on every due [`poll`](MemorySampler::poll).
    Running,
}

/// Receives samples and pressure transitions.
///
/// Both methods default to no-ops.
pub trait MemoryListener {
    /// Called with every recorded sample.
    fn on_sample(&mut self, sample: &MemorySample) {
        _ = sample;
    }

    /// Called when the pressure level changes.
    fn on_pressure_change(&mut self, from: PressureLevel, to: PressureLevel) {
        _ = (from, to);
    }
}

/// Handle returned by [`MemorySampler::add_listener`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u32);

/// Periodic heap sampler with bounded history.
pub struct MemorySampler {
    probe: Box<dyn MemoryProbe>,
    reclaim: Option<Box<dyn ReclaimHint>>,
    config: SamplerConfig,
    thresholds: Thresholds,
    interval: Duration,
    state: SamplerState,
    history: VecDeque<MemorySample>,
    last_sample_at: Option<HostTime>,
    level: PressureLevel,
    listeners: Vec<(ListenerId, Box<dyn MemoryListener>)>,
    next_listener: u32,
}

impl core::fmt::Debug for MemorySampler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MemorySampler")
            .field("state", &self.state)
            .field("level", &self.level)
            .field("thresholds", &self.thresholds)
            .field("history_len", &self.history.len())
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

impl MemorySampler {
    /// Creates a stopped sampler.
    ///
    /// `timebase` is the unit of the [`HostTime`] values later passed to
    /// [`poll`](Self::poll).
    #[must_use]
    pub fn new(probe: Box<dyn MemoryProbe>, config: SamplerConfig, timebase: Timebase) -> Self {
        Self {
            probe,
            reclaim: None,
            interval: Duration::from_millis(config.interval_ms, timebase),
            config,
            thresholds: Thresholds::default(),
            state: SamplerState::Stopped,
            history: VecDeque::with_capacity(config.history_capacity),
            last_sample_at: None,
            level: PressureLevel::Low,
            listeners: Vec::new(),
            next_listener: 0,
        }
    }

    /// A stopped sampler for hosts without introspection.
    #[must_use]
    pub fn without_introspection(timebase: Timebase) -> Self {
        Self::new(Box::new(NoIntrospection), SamplerConfig::default(), timebase)
    }

    /// Installs the hint used when usage crosses the critical threshold.
    #[must_use]
    pub fn with_reclaim_hint(mut self, hint: Box<dyn ReclaimHint>) -> Self {
        self.reclaim = Some(hint);
        self
    }

    /// Starts sampling with the given thresholds.
    ///
    /// The next [`poll`](Self::poll) samples immediately. Calling `start`
    /// while running only replaces the thresholds.
    pub fn start(&mut self, thresholds: Thresholds) {
        self.thresholds = thresholds;
        if self.state == SamplerState::Running {
            return;
        }
        self.state = SamplerState::Running;
        self.last_sample_at = None;
        tracing::debug!(
            warning = thresholds.warning,
            critical = thresholds.critical,
            "memory sampler started"
        );
    }

    /// Stops sampling. History is kept.
    pub fn stop(&mut self) {
        self.state = SamplerState::Stopped;
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SamplerState {
        self.state
    }

    /// Registers a listener.
    pub fn add_listener(&mut self, listener: Box<dyn MemoryListener>) -> ListenerId {
        let id = ListenerId(self.next_listener);
        self.next_listener = self.next_listener.wrapping_add(1);
        self.listeners.push((id, listener));
        id
    }

    /// Removes a listener. Returns `false` if it was not registered.
    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    /// Samples if running and at least one interval has passed.
    pub fn poll(&mut self, now: HostTime) -> Option<MemorySample> {
        if self.state != SamplerState::Running {
            return None;
        }
        let due = self
            .last_sample_at
            .is_none_or(|last| now.saturating_duration_since(last) >= self.interval);
        if !due {
            return None;
        }
        Some(self.sample_now(now))
    }

    /// Takes and records a sample regardless of state or interval.
    pub fn sample_now(&mut self, now: HostTime) -> MemorySample {
        let sample = MemorySample::from_usage(self.probe.read(), now);

        if self.history.len() >= self.config.history_capacity {
            self.history.pop_front();
        }
        if self.config.history_capacity > 0 {
            self.history.push_back(sample);
        }
        self.last_sample_at = Some(now);

        for (_, listener) in &mut self.listeners {
            listener.on_sample(&sample);
        }

        let level = self.thresholds.classify(sample.percentage);
        if level != self.level {
            self.transition(level, &sample);
        }

        sample
    }

    fn transition(&mut self, to: PressureLevel, sample: &MemorySample) {
        let from = self.level;
        self.level = to;

        match to {
            PressureLevel::High => {
                tracing::warn!(
                    percentage = sample.percentage,
                    used_bytes = sample.used_bytes,
                    limit_bytes = sample.limit_bytes,
                    "memory usage crossed critical threshold, requesting reclaim"
                );
                self.request_reclaim();
            }
            PressureLevel::Medium if from == PressureLevel::Low => {
                tracing::warn!(
                    percentage = sample.percentage,
                    "memory usage crossed warning threshold"
                );
            }
            _ => {
                tracing::debug!(?from, ?to, "memory pressure changed");
            }
        }

        for (_, listener) in &mut self.listeners {
            listener.on_pressure_change(from, to);
        }
    }

    /// Forwards to the installed [`ReclaimHint`], if any.
    pub fn request_reclaim(&mut self) {
        if let Some(hint) = &mut self.reclaim {
            hint.request_reclaim();
        }
    }

    /// Most recent sample.
    #[must_use]
    pub fn latest(&self) -> Option<&MemorySample> {
        self.history.back()
    }

    /// Recorded samples, oldest first.
    pub fn history(&self) -> impl ExactSizeIterator<Item = &MemorySample> + '_ {
        self.history.iter()
    }

    /// Pressure level as of the latest sample.
    #[must_use]
    pub fn pressure_level(&self) -> PressureLevel {
        self.level
    }

    /// Whether the host has room for `item_count` more items.
    ///
    /// Estimates `item_count × bytes_per_item` and requires the free heap to
    /// be at least the configured headroom multiple of that. Without
    /// introspection the answer is always `true`; callers use this to pick a
    /// cheaper strategy, never to refuse work.
    pub fn is_safe_for_large_operation(&mut self, item_count: usize) -> bool {
        let Some(usage) = self.probe.read() else {
            return true;
        };
        if usage.limit_bytes == 0 {
            return true;
        }
        let available = usage.limit_bytes.saturating_sub(usage.used_bytes);
        let needed = (item_count as u64)
            .saturating_mul(self.config.bytes_per_item)
            .saturating_mul(self.config.headroom_tenths)
            / 10;
        available >= needed
    }
}
