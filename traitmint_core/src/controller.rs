// Copyright 2026 the Traitmint Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Adaptive batch controller.
//!
//! The [`BatchController`] owns a generation session end to end: it plans
//! batches, asks the caller's [`Generator`] for candidate combinations, gates
//! each through the [`UniquenessTracker`], renders the accepted ones, and
//! reports progress. Between batches it cleans up memory and persists the
//! session so a reload can resume it.
//!
//! The controller never blocks. The host calls [`step`](BatchController::step)
//! once per turn of its event loop; each call runs exactly one batch and
//! returns. [`run`](BatchController::run) loops `step` for hosts that do not
//! need to yield.
//!
//! ```text
//!   Idle ──start──▶ Planning ──▶ Running ◀──resume── Paused
//!                                  │  │ ╰──pause──────▶ │
//!                                  │  ╰──cancel──▶ Cancelled ◀──cancel──╯
//!                                  ├──last batch──▶ Completed
//!                                  ╰──stall──▶ Failed
//! ```

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{ItemError, SessionError};
use crate::indexer::CombinationKey;
use crate::memory::{MemorySampler, PressureLevel, Thresholds};
use crate::persist::{self, PersistedSession, SessionStore};
use crate::plan::{BatchPlan, Eta};
use crate::progress::{BatchedProgressReporter, ProgressSnapshot, ReporterConfig};
use crate::time::{Clock, HostTime};
use crate::trace::{
    BatchBeginEvent, BatchEndEvent, CandidateRejectedEvent, CleanupEvent, ItemFailedEvent,
    PressureChangeEvent, RejectReason, SessionEndEvent, SessionOutcome, SessionStartEvent, Tracer,
};
use crate::tracker::{Admission, StrictPairRule, UniquenessTracker};

/// Floor for the default consecutive-failure limit.
pub const MIN_FAILURE_LIMIT: u32 = 100;

// ---------------------------------------------------------------------------
// State and configuration
// ---------------------------------------------------------------------------

/// Lifecycle of a [`BatchController`] session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    /// No session.
    #[default]
    Idle,
    /// Computing the batch plan.
    Planning,
    /// Generating.
    Running,
    /// Suspended at a batch boundary.
    Paused,
    /// Every batch completed.
    Completed,
    /// Cancelled by the host. Cannot be resumed.
    Cancelled,
    /// Stopped after a systemic generation failure.
    Failed,
}

impl ControllerState {
    /// Whether a session is in flight.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Planning | Self::Running | Self::Paused)
    }
}

/// Configuration for the [`BatchController`].
#[derive(Clone, Copy, Debug)]
pub struct ControllerConfig {
    /// Consecutive non-accepting attempts before the session fails.
    ///
    /// `None` uses the session's batch size, but never less than
    /// [`MIN_FAILURE_LIMIT`].
    pub max_consecutive_failures: Option<u32>,
    /// Batches' worth of recent items whose image bytes are kept after
    /// cleanup. Under high pressure only one batch is kept.
    pub retained_batches: usize,
    /// Memory thresholds handed to the sampler on start.
    pub thresholds: Thresholds,
}

impl ControllerConfig {
    /// Defaults for an in-browser session.
    #[must_use]
    pub fn browser() -> Self {
        Self {
            max_consecutive_failures: None,
            retained_batches: 2,
            thresholds: Thresholds::default(),
        }
    }

    /// Fails the session after exactly `limit` consecutive failures.
    #[must_use]
    pub fn with_failure_limit(mut self, limit: u32) -> Self {
        self.max_consecutive_failures = Some(limit);
        self
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::browser()
    }
}

// ---------------------------------------------------------------------------
// Host integration
// ---------------------------------------------------------------------------

/// Opaque handle to a host-side preview resource (an object URL, a texture).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PreviewHandle(pub u64);

/// Output of the external compositor for one item.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RenderedItem {
    /// Encoded image bytes.
    pub image: Option<Vec<u8>>,
    /// Metadata attributes as `(trait_type, value)` pairs.
    pub metadata: Vec<(String, String)>,
    /// Transient preview resource.
    pub preview: Option<PreviewHandle>,
}

/// An accepted, rendered item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneratedItem {
    /// Collection slot.
    pub index: usize,
    /// Trait ids, one per layer.
    pub combination: Vec<u32>,
    /// Key recorded in the global uniqueness group.
    pub key: CombinationKey,
    /// Image bytes, until evicted by batch cleanup.
    pub image: Option<Vec<u8>>,
    /// Metadata attributes.
    pub metadata: Vec<(String, String)>,
    /// Preview resource, until released by batch cleanup.
    pub preview: Option<PreviewHandle>,
}

/// Produces candidates and renders them.
///
/// `propose` is called again with an increasing `attempt` whenever the
/// previous candidate for the same slot was rejected, so implementations
/// should vary their output with it.
pub trait Generator {
    /// Proposes trait ids for collection slot `index`.
    fn propose(&mut self, index: usize, attempt: u32) -> Vec<u32>;

    /// Composites the layers of an accepted combination.
    fn render(&mut self, index: usize, combination: &[u32]) -> Result<RenderedItem, ItemError>;
}

/// Receives accepted items and preview releases.
///
/// Both methods default to no-ops.
pub trait ItemSink {
    /// Called once per accepted item.
    fn on_item(&mut self, item: &GeneratedItem) {
        _ = item;
    }

    /// Called when a preview handle is no longer referenced.
    fn release_preview(&mut self, handle: PreviewHandle) {
        _ = handle;
    }
}

/// Requests cancel or pause from outside the controller.
///
/// Cancel is observed before every item, pause before every batch.
#[derive(Clone, Debug, Default)]
pub struct ControlHandle {
    cancel: Arc<AtomicBool>,
    pause: Arc<AtomicBool>,
}

impl ControlHandle {
    /// Asks the session to cancel.
    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    /// Asks the session to pause at the next batch boundary.
    pub fn request_pause(&self) {
        self.pause.store(true, Ordering::Release);
    }

    /// Whether a cancel is pending.
    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    fn take_pause(&self) -> bool {
        self.pause.swap(false, Ordering::AcqRel)
    }

    fn take_cancel(&self) -> bool {
        self.cancel.swap(false, Ordering::AcqRel)
    }

    fn reset(&self) {
        self.cancel.store(false, Ordering::Release);
        self.pause.store(false, Ordering::Release);
    }
}

/// Result of one [`step`](BatchController::step).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// A batch finished and more remain.
    BatchCompleted {
        /// 1-based batch number.
        batch: u32,
        /// Items accepted in the batch.
        accepted: usize,
    },
    /// The last batch finished.
    Completed,
    /// The session is paused.
    Paused,
    /// The session was cancelled.
    Cancelled,
}

/// What [`cleanup_batch_memory`](BatchController::cleanup_batch_memory) did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Items whose image bytes were dropped.
    pub evicted_images: usize,
    /// Preview handles released.
    pub released_previews: usize,
    /// Whether the host was asked to reclaim memory.
    pub reclaim_requested: bool,
}

// ---------------------------------------------------------------------------
// BatchController
// ---------------------------------------------------------------------------

#[derive(Default)]
struct BatchCounts {
    accepted: usize,
    rejected: usize,
    failed: usize,
}

/// Drives a generation session batch by batch.
pub struct BatchController<C: Clock> {
    clock: C,
    config: ControllerConfig,
    state: ControllerState,
    rules: Vec<StrictPairRule>,
    tracker: UniquenessTracker,
    sampler: MemorySampler,
    reporter: BatchedProgressReporter,
    store: Option<Rc<dyn SessionStore>>,
    sink: Option<Box<dyn ItemSink>>,
    control: ControlHandle,
    plan: Option<BatchPlan>,
    items: Vec<GeneratedItem>,
    evicted_upto: usize,
    released_upto: usize,
    generated: usize,
    consecutive_failures: u32,
    last_failure: Option<String>,
    started_at: HostTime,
    batches_this_run: u32,
    pressure: PressureLevel,
    pause_reason: Option<String>,
}

impl<C: Clock> core::fmt::Debug for BatchController<C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BatchController")
            .field("state", &self.state)
            .field("plan", &self.plan)
            .field("generated", &self.generated)
            .field("consecutive_failures", &self.consecutive_failures)
            .field("pressure", &self.pressure)
            .finish_non_exhaustive()
    }
}

impl<C: Clock> BatchController<C> {
    /// Creates an idle controller.
    ///
    /// The sampler starts without introspection and the reporter with
    /// [`ReporterConfig::default`]; replace them with
    /// [`with_sampler`](Self::with_sampler) and
    /// [`with_reporter`](Self::with_reporter).
    #[must_use]
    pub fn new(clock: C, config: ControllerConfig) -> Self {
        let timebase = clock.timebase();
        Self {
            clock,
            config,
            state: ControllerState::Idle,
            rules: Vec::new(),
            tracker: UniquenessTracker::new(),
            sampler: MemorySampler::without_introspection(timebase),
            reporter: BatchedProgressReporter::new(ReporterConfig::default(), timebase),
            store: None,
            sink: None,
            control: ControlHandle::default(),
            plan: None,
            items: Vec::new(),
            evicted_upto: 0,
            released_upto: 0,
            generated: 0,
            consecutive_failures: 0,
            last_failure: None,
            started_at: HostTime(0),
            batches_this_run: 0,
            pressure: PressureLevel::Low,
            pause_reason: None,
        }
    }

    /// Uses `sampler` for pressure and admission checks.
    #[must_use]
    pub fn with_sampler(mut self, sampler: MemorySampler) -> Self {
        self.sampler = sampler;
        self
    }

    /// Uses `reporter` for progress. Its store is replaced by the
    /// controller's when one is set.
    #[must_use]
    pub fn with_reporter(mut self, mut reporter: BatchedProgressReporter) -> Self {
        if let Some(store) = &self.store {
            reporter.set_store(Rc::clone(store));
        }
        self.reporter = reporter;
        self
    }

    /// Persists the session and progress to `store`.
    #[must_use]
    pub fn with_store(mut self, store: Rc<dyn SessionStore>) -> Self {
        self.reporter.set_store(Rc::clone(&store));
        self.store = Some(store);
        self
    }

    /// Forwards accepted items and preview releases to `sink`.
    #[must_use]
    pub fn with_item_sink(mut self, sink: Box<dyn ItemSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Enforces strict-pair rules in every session.
    #[must_use]
    pub fn with_strict_pairs(mut self, rules: impl IntoIterator<Item = StrictPairRule>) -> Self {
        self.rules = rules.into_iter().collect();
        self.tracker = UniquenessTracker::with_strict_pairs(self.rules.iter().cloned());
        self
    }

    // ---- Accessors ----

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Plan of the current session.
    #[must_use]
    pub fn plan(&self) -> Option<&BatchPlan> {
        self.plan.as_ref()
    }

    /// Uniqueness state of the current session.
    #[must_use]
    pub fn tracker(&self) -> &UniquenessTracker {
        &self.tracker
    }

    /// Items accepted in this session.
    #[must_use]
    pub fn generated(&self) -> usize {
        self.generated
    }

    /// Buffered items, oldest first.
    #[must_use]
    pub fn items(&self) -> &[GeneratedItem] {
        &self.items
    }

    /// Hands the buffered items to the caller.
    pub fn take_items(&mut self) -> Vec<GeneratedItem> {
        self.evicted_upto = 0;
        self.released_upto = 0;
        core::mem::take(&mut self.items)
    }

    /// A handle for requesting cancel or pause from elsewhere.
    #[must_use]
    pub fn control_handle(&self) -> ControlHandle {
        self.control.clone()
    }

    /// Why the session is paused, if it is.
    #[must_use]
    pub fn pause_reason(&self) -> Option<&str> {
        self.pause_reason.as_deref()
    }

    /// The memory sampler.
    pub fn sampler_mut(&mut self) -> &mut MemorySampler {
        &mut self.sampler
    }

    /// The progress reporter.
    pub fn reporter_mut(&mut self) -> &mut BatchedProgressReporter {
        &mut self.reporter
    }

    // ---- Lifecycle ----

    /// Plans and starts a fresh session of `total_items`.
    ///
    /// Any previous session's keys, items and persisted state are dropped.
    pub fn start(&mut self, total_items: usize) -> Result<(), SessionError> {
        self.start_traced(total_items, &mut Tracer::none())
    }

    /// [`start`](Self::start) with trace events.
    pub fn start_traced(
        &mut self,
        total_items: usize,
        tracer: &mut Tracer<'_>,
    ) -> Result<(), SessionError> {
        self.begin(total_items, "start")?;

        let single_pass_safe = self.sampler.is_safe_for_large_operation(total_items);
        if !single_pass_safe {
            tracing::info!(total_items, "not enough memory for a single pass, forcing batches");
        }
        if let Some(store) = &self.store {
            persist::clear_session(store.as_ref());
        }

        self.launch(BatchPlan::for_total(total_items, single_pass_safe), tracer);
        Ok(())
    }

    /// Resumes a persisted session of `total_items`, or starts a fresh one.
    ///
    /// A blob is used only if it is valid and describes the same number of
    /// items. Returns `true` when state was restored.
    pub fn resume_from_store(&mut self, total_items: usize) -> Result<bool, SessionError> {
        self.resume_from_store_traced(total_items, &mut Tracer::none())
    }

    /// [`resume_from_store`](Self::resume_from_store) with trace events.
    pub fn resume_from_store_traced(
        &mut self,
        total_items: usize,
        tracer: &mut Tracer<'_>,
    ) -> Result<bool, SessionError> {
        let blob = self
            .store
            .as_ref()
            .and_then(|store| persist::load_session(store.as_ref()))
            .filter(|blob| {
                let matches = blob.total_items == total_items;
                if !matches {
                    tracing::warn!(
                        stored = blob.total_items,
                        requested = total_items,
                        "persisted session is for a different collection size, starting fresh"
                    );
                }
                matches
            });

        let Some(blob) = blob else {
            self.start_traced(total_items, tracer)?;
            return Ok(false);
        };

        self.begin(total_items, "resume")?;
        let plan = blob.plan();
        self.generated = blob
            .progress
            .map_or_else(|| plan.items_completed(), |p| p.generated_count);
        self.tracker.from_persisted(blob.uniqueness);
        tracing::info!(
            completed = plan.completed_batches().len(),
            total_batches = plan.total_batches(),
            generated = self.generated,
            "restored persisted session"
        );

        if plan.is_finished() {
            self.plan = Some(plan);
            self.state = ControllerState::Completed;
            return Ok(true);
        }
        self.launch(plan, tracer);
        Ok(true)
    }

    /// Resets per-session state and enters `Planning`.
    fn begin(&mut self, total_items: usize, operation: &'static str) -> Result<(), SessionError> {
        if self.state.is_active() {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                operation,
            });
        }
        if total_items == 0 {
            return Err(SessionError::InvalidTotal(total_items));
        }

        self.state = ControllerState::Planning;
        self.tracker = UniquenessTracker::with_strict_pairs(self.rules.iter().cloned());
        self.items.clear();
        self.evicted_upto = 0;
        self.released_upto = 0;
        self.generated = 0;
        self.consecutive_failures = 0;
        self.last_failure = None;
        self.batches_this_run = 0;
        self.pause_reason = None;
        self.control.reset();
        self.reporter.reset();
        Ok(())
    }

    /// Installs `plan` and enters `Running`.
    fn launch(&mut self, plan: BatchPlan, tracer: &mut Tracer<'_>) {
        let now = self.clock.now();
        self.started_at = now;
        self.sampler.start(self.config.thresholds);
        self.pressure = self.sampler.pressure_level();

        tracing::info!(
            total_items = plan.total_items(),
            batch_size = plan.batch_size(),
            total_batches = plan.total_batches(),
            "generation session started"
        );
        tracer.session_start(&SessionStartEvent {
            total_items: plan.total_items(),
            batch_size: plan.batch_size(),
            total_batches: plan.total_batches(),
            restored_batches: u32::try_from(plan.completed_batches().len()).unwrap_or(u32::MAX),
            timestamp: now,
        });

        self.plan = Some(plan);
        self.state = ControllerState::Running;
        self.publish_now();
    }

    /// Suspends the session at the current batch boundary.
    pub fn pause(&mut self, reason: impl Into<String>) -> Result<(), SessionError> {
        if self.state != ControllerState::Running {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                operation: "pause",
            });
        }
        let reason = reason.into();
        tracing::info!(reason = %reason, "generation paused");
        self.pause_reason = Some(reason);
        self.state = ControllerState::Paused;
        self.publish_now();
        Ok(())
    }

    /// Continues a paused session from its first incomplete batch.
    pub fn resume(&mut self) -> Result<(), SessionError> {
        if self.state != ControllerState::Paused {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                operation: "resume",
            });
        }
        tracing::info!("generation resumed");
        self.pause_reason = None;
        self.state = ControllerState::Running;
        self.publish_now();
        Ok(())
    }

    /// Cancels the session, discarding items, keys and persisted state.
    ///
    /// Does nothing unless a session is in flight.
    pub fn cancel(&mut self) {
        self.cancel_traced(&mut Tracer::none());
    }

    /// [`cancel`](Self::cancel) with trace events.
    pub fn cancel_traced(&mut self, tracer: &mut Tracer<'_>) {
        if !self.state.is_active() {
            return;
        }
        let now = self.clock.now();
        let generated = self.generated;

        self.release_all_previews();
        self.items.clear();
        self.evicted_upto = 0;
        self.released_upto = 0;
        self.tracker.clear();
        self.sampler.stop();
        self.control.reset();
        if let Some(store) = &self.store {
            persist::clear_session(store.as_ref());
        }

        self.state = ControllerState::Cancelled;
        let snapshot = self.snapshot(now);
        self.reporter.reset();
        self.reporter.schedule_update(snapshot, now);
        self.reporter.flush_updates(now);

        tracing::info!(generated, "generation cancelled");
        tracer.session_end(&SessionEndEvent {
            outcome: SessionOutcome::Cancelled,
            generated,
            timestamp: now,
        });
    }

    // ---- Stepping ----

    /// Runs one batch.
    pub fn step(&mut self, generator: &mut dyn Generator) -> Result<StepOutcome, SessionError> {
        self.step_traced(generator, &mut Tracer::none())
    }

    /// Runs batches until the session completes, pauses, or is cancelled.
    pub fn run(&mut self, generator: &mut dyn Generator) -> Result<StepOutcome, SessionError> {
        self.run_traced(generator, &mut Tracer::none())
    }

    /// [`run`](Self::run) with trace events.
    pub fn run_traced(
        &mut self,
        generator: &mut dyn Generator,
        tracer: &mut Tracer<'_>,
    ) -> Result<StepOutcome, SessionError> {
        loop {
            match self.step_traced(generator, tracer)? {
                StepOutcome::BatchCompleted { .. } => {}
                outcome => return Ok(outcome),
            }
        }
    }

    /// [`step`](Self::step) with trace events.
    pub fn step_traced(
        &mut self,
        generator: &mut dyn Generator,
        tracer: &mut Tracer<'_>,
    ) -> Result<StepOutcome, SessionError> {
        match self.state {
            ControllerState::Running => {}
            ControllerState::Paused => return Ok(StepOutcome::Paused),
            ControllerState::Completed => return Ok(StepOutcome::Completed),
            ControllerState::Cancelled => return Ok(StepOutcome::Cancelled),
            from @ (ControllerState::Idle | ControllerState::Planning | ControllerState::Failed) => {
                return Err(SessionError::InvalidTransition {
                    from,
                    operation: "step",
                });
            }
        }

        if self.control.take_cancel() {
            self.cancel_traced(tracer);
            return Ok(StepOutcome::Cancelled);
        }
        if self.control.take_pause() {
            self.pause("pause requested")?;
            return Ok(StepOutcome::Paused);
        }

        let Some(plan) = &self.plan else {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                operation: "step",
            });
        };
        let batch = plan.current_batch();
        let range = plan.batch_range(batch);
        let now = self.clock.now();
        self.observe_memory(now, tracer);

        tracing::debug!(batch, start = range.start, end = range.end, "batch started");
        tracer.batch_begin(&BatchBeginEvent {
            batch,
            start: range.start,
            end: range.end,
            timestamp: now,
        });

        let mut counts = BatchCounts::default();
        for index in range {
            if self.control.take_cancel() {
                self.cancel_traced(tracer);
                return Ok(StepOutcome::Cancelled);
            }
            self.fill_slot(generator, index, batch, &mut counts, tracer)?;
        }

        self.finish_batch(batch, &counts, tracer)
    }

    /// Proposes candidates for `index` until one is accepted or rendering
    /// fails.
    fn fill_slot(
        &mut self,
        generator: &mut dyn Generator,
        index: usize,
        batch: u32,
        counts: &mut BatchCounts,
        tracer: &mut Tracer<'_>,
    ) -> Result<(), SessionError> {
        let mut attempt = 0_u32;
        loop {
            let combination = generator.propose(index, attempt);
            let reason = match self.tracker.admit(&combination) {
                Admission::Accept => None,
                Admission::Duplicate => Some(RejectReason::Duplicate),
                Admission::StrictPairViolation { rule } => Some(RejectReason::StrictPair {
                    rule_index: self
                        .tracker
                        .rules()
                        .iter()
                        .position(|r| r.id == rule)
                        .unwrap_or(usize::MAX),
                }),
            };

            if let Some(reason) = reason {
                counts.rejected += 1;
                tracer.candidate_rejected(&CandidateRejectedEvent {
                    index,
                    attempt,
                    reason,
                });
                if self.note_failure(None) {
                    return Err(self.fail_session(batch, counts, tracer));
                }
                attempt = attempt.saturating_add(1);
                continue;
            }

            match generator.render(index, &combination) {
                Ok(rendered) => {
                    let key = self.tracker.record(&combination);
                    self.consecutive_failures = 0;
                    self.accept(index, combination, key, rendered);
                    counts.accepted += 1;
                }
                Err(err) => {
                    tracing::warn!(index = err.index, reason = %err.reason, "item dropped");
                    counts.failed += 1;
                    let stalled = self.note_failure(Some(err.reason));
                    tracer.item_failed(&ItemFailedEvent {
                        index,
                        consecutive_failures: self.consecutive_failures,
                    });
                    if stalled {
                        return Err(self.fail_session(batch, counts, tracer));
                    }
                }
            }
            return Ok(());
        }
    }

    fn accept(
        &mut self,
        index: usize,
        combination: Vec<u32>,
        key: CombinationKey,
        rendered: RenderedItem,
    ) {
        let item = GeneratedItem {
            index,
            combination,
            key,
            image: rendered.image,
            metadata: rendered.metadata,
            preview: rendered.preview,
        };
        if let Some(sink) = &mut self.sink {
            sink.on_item(&item);
        }
        self.items.push(item);
        self.generated += 1;

        let now = self.clock.now();
        let snapshot = self.snapshot(now);
        self.reporter.schedule_update(snapshot, now);
    }

    /// Counts a non-accepting attempt. Returns `true` once the limit is hit.
    fn note_failure(&mut self, reason: Option<String>) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if reason.is_some() {
            self.last_failure = reason;
        }
        self.consecutive_failures >= self.failure_limit()
    }

    /// Ends the session as `Failed`, closing the open batch on the trace.
    fn fail_session(
        &mut self,
        batch: u32,
        counts: &BatchCounts,
        tracer: &mut Tracer<'_>,
    ) -> SessionError {
        self.state = ControllerState::Failed;
        self.sampler.stop();
        self.publish_now();
        tracing::warn!(
            consecutive_failures = self.consecutive_failures,
            batch,
            generated = self.generated,
            "generation stalled, giving up"
        );

        let now = self.clock.now();
        tracer.batch_end(&BatchEndEvent {
            batch,
            accepted: counts.accepted,
            rejected: counts.rejected,
            failed: counts.failed,
            timestamp: now,
        });
        tracer.session_end(&SessionEndEvent {
            outcome: SessionOutcome::Failed,
            generated: self.generated,
            timestamp: now,
        });

        SessionError::SystemicGenerationFailure {
            consecutive_failures: self.consecutive_failures,
            batch,
            generated: self.generated,
            last_failure: self.last_failure.clone(),
        }
    }

    fn failure_limit(&self) -> u32 {
        self.config.max_consecutive_failures.unwrap_or_else(|| {
            let batch_size = self.plan.as_ref().map_or(0, BatchPlan::batch_size);
            u32::try_from(batch_size)
                .unwrap_or(u32::MAX)
                .max(MIN_FAILURE_LIMIT)
        })
    }

    fn finish_batch(
        &mut self,
        batch: u32,
        counts: &BatchCounts,
        tracer: &mut Tracer<'_>,
    ) -> Result<StepOutcome, SessionError> {
        let Some(plan) = &mut self.plan else {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                operation: "step",
            });
        };
        plan.mark_completed();
        let finished = plan.is_finished();
        self.batches_this_run = self.batches_this_run.saturating_add(1);

        let cleanup = self.cleanup_batch_memory();
        tracer.cleanup(&CleanupEvent {
            batch,
            evicted_images: cleanup.evicted_images,
            released_previews: cleanup.released_previews,
            pressure: self.pressure,
            reclaim_requested: cleanup.reclaim_requested,
        });

        if finished {
            self.state = ControllerState::Completed;
            self.sampler.stop();
            self.tracker.clear();
            if let Some(store) = &self.store {
                persist::clear_session(store.as_ref());
            }
        } else {
            self.persist_session();
        }
        self.publish_now();

        let now = self.clock.now();
        tracing::debug!(
            batch,
            accepted = counts.accepted,
            rejected = counts.rejected,
            failed = counts.failed,
            "batch finished"
        );
        tracer.batch_end(&BatchEndEvent {
            batch,
            accepted: counts.accepted,
            rejected: counts.rejected,
            failed: counts.failed,
            timestamp: now,
        });

        if finished {
            tracing::info!(generated = self.generated, "generation session completed");
            tracer.session_end(&SessionEndEvent {
                outcome: SessionOutcome::Completed,
                generated: self.generated,
                timestamp: now,
            });
            return Ok(StepOutcome::Completed);
        }
        Ok(StepOutcome::BatchCompleted {
            batch,
            accepted: counts.accepted,
        })
    }

    // ---- Memory ----

    /// Drops image bytes of older items and releases preview handles.
    ///
    /// Image bytes are kept for the `retained_batches × batch_size` most
    /// recent items, or one batch under high pressure, in which case the
    /// host is also asked to reclaim memory.
    pub fn cleanup_batch_memory(&mut self) -> CleanupReport {
        let batch_size = self.plan.as_ref().map_or(0, BatchPlan::batch_size);
        let high = self.pressure == PressureLevel::High;
        let keep = if high {
            batch_size
        } else {
            batch_size.saturating_mul(self.config.retained_batches)
        };

        let mut report = CleanupReport::default();
        let cut = self.items.len().saturating_sub(keep);
        for item in &mut self.items[self.evicted_upto.min(cut)..cut] {
            if item.image.take().is_some() {
                report.evicted_images += 1;
            }
        }
        self.evicted_upto = self.evicted_upto.max(cut);
        report.released_previews = self.release_all_previews();

        if high {
            self.sampler.request_reclaim();
            report.reclaim_requested = true;
        }
        tracing::debug!(
            evicted = report.evicted_images,
            released = report.released_previews,
            reclaim = report.reclaim_requested,
            "batch memory cleaned up"
        );
        report
    }

    fn release_all_previews(&mut self) -> usize {
        let mut released = 0;
        for item in &mut self.items[self.released_upto..] {
            if let Some(handle) = item.preview.take() {
                if let Some(sink) = &mut self.sink {
                    sink.release_preview(handle);
                }
                released += 1;
            }
        }
        self.released_upto = self.items.len();
        released
    }

    /// Polls the sampler and records pressure changes.
    ///
    /// Hosts may also poll the sampler on their own timer, so the level is
    /// read back even when this poll was not due.
    fn observe_memory(&mut self, now: HostTime, tracer: &mut Tracer<'_>) {
        let polled = self.sampler.poll(now);
        let level = self.sampler.pressure_level();
        if level == self.pressure {
            return;
        }
        let percentage = polled
            .as_ref()
            .or_else(|| self.sampler.latest())
            .map_or(0.0, |sample| sample.percentage);
        tracer.pressure_change(&PressureChangeEvent {
            from: self.pressure,
            to: level,
            percentage,
            timestamp: now,
        });
        self.pressure = level;
    }

    // ---- Progress ----

    /// Projected time to completion.
    #[must_use]
    pub fn eta(&self, now: HostTime) -> Eta {
        let remaining = self.plan.as_ref().map_or(0, BatchPlan::remaining);
        Eta::project(
            now.saturating_duration_since(self.started_at),
            self.batches_this_run,
            remaining,
        )
    }

    fn snapshot(&self, now: HostTime) -> ProgressSnapshot {
        ProgressSnapshot {
            generated_count: self.generated,
            total_count: self.plan.as_ref().map_or(0, BatchPlan::total_items),
            status: self.state,
            memory_usage: self.sampler.latest().map(|s| s.percentage),
            timestamp: now,
        }
    }

    /// Publishes a snapshot of the current state immediately.
    fn publish_now(&mut self) {
        let now = self.clock.now();
        let snapshot = self.snapshot(now);
        self.reporter.schedule_update(snapshot, now);
        self.reporter.flush_updates(now);
    }

    fn persist_session(&self) {
        let (Some(store), Some(plan)) = (&self.store, &self.plan) else {
            return;
        };
        let blob = PersistedSession::capture(plan, &self.tracker, Some(self.snapshot(self.clock.now())));
        persist::save_session(store.as_ref(), &blob);
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;
    use core::cell::{Cell, RefCell};

    use super::*;
    use crate::memory::{HeapUsage, MemoryProbe, ReclaimHint, SamplerConfig};
    use crate::persist::{MemoryStore, SESSION_KEY};
    use crate::time::{ManualClock, Timebase};

    /// Walks a `width^layers` trait space, one candidate per attempt.
    struct GridGenerator {
        width: u32,
        layers: u32,
        fail_indices: Vec<usize>,
        proposals: usize,
    }

    impl GridGenerator {
        fn new(width: u32, layers: u32) -> Self {
            Self {
                width,
                layers,
                fail_indices: Vec::new(),
                proposals: 0,
            }
        }
    }

    impl Generator for GridGenerator {
        fn propose(&mut self, index: usize, attempt: u32) -> Vec<u32> {
            self.proposals += 1;
            let mut n = u32::try_from(index).unwrap() + attempt;
            (0..self.layers)
                .map(|_| {
                    let id = n % self.width;
                    n /= self.width;
                    id
                })
                .collect()
        }

        fn render(&mut self, index: usize, combination: &[u32]) -> Result<RenderedItem, ItemError> {
            if self.fail_indices.contains(&index) {
                return Err(ItemError::new(index, "layer image missing"));
            }
            Ok(RenderedItem {
                image: Some(vec![0; 4]),
                metadata: vec![(String::from("layers"), alloc::format!("{combination:?}"))],
                preview: Some(PreviewHandle(index as u64)),
            })
        }
    }

    #[derive(Default)]
    struct SinkLog {
        items: Vec<usize>,
        released: Vec<PreviewHandle>,
    }

    struct LogSink(Rc<RefCell<SinkLog>>);

    impl ItemSink for LogSink {
        fn on_item(&mut self, item: &GeneratedItem) {
            self.0.borrow_mut().items.push(item.index);
        }

        fn release_preview(&mut self, handle: PreviewHandle) {
            self.0.borrow_mut().released.push(handle);
        }
    }

    fn controller(clock: &ManualClock) -> BatchController<&ManualClock> {
        BatchController::new(clock, ControllerConfig::default())
    }

    #[test]
    fn small_trait_space_fails_systemically() {
        let clock = ManualClock::millis();
        let mut ctl = controller(&clock);
        ctl.start(10).unwrap();

        let err = ctl.run(&mut GridGenerator::new(2, 2)).unwrap_err();
        match err {
            SessionError::SystemicGenerationFailure {
                consecutive_failures,
                batch,
                generated,
                last_failure,
            } => {
                assert_eq!(consecutive_failures, MIN_FAILURE_LIMIT);
                assert_eq!(batch, 1);
                assert_eq!(generated, 4, "all four combinations were produced first");
                assert_eq!(last_failure, None);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(ctl.state(), ControllerState::Failed);
        assert!(ctl.step(&mut GridGenerator::new(2, 2)).is_err());
    }

    #[test]
    fn explicit_failure_limit_counts_render_errors() {
        let clock = ManualClock::millis();
        let mut ctl = BatchController::new(&clock, ControllerConfig::default().with_failure_limit(3));
        ctl.start(10).unwrap();

        let mut generator = GridGenerator::new(16, 2);
        generator.fail_indices = vec![2, 3, 4];
        let err = ctl.run(&mut generator).unwrap_err();
        assert!(matches!(
            err,
            SessionError::SystemicGenerationFailure {
                consecutive_failures: 3,
                generated: 2,
                last_failure: Some(_),
                ..
            }
        ));
    }

    #[test]
    fn isolated_render_failures_are_dropped() {
        let clock = ManualClock::millis();
        let mut ctl = controller(&clock);
        ctl.start(20).unwrap();

        let mut generator = GridGenerator::new(16, 2);
        generator.fail_indices = vec![3, 11];
        assert_eq!(ctl.run(&mut generator).unwrap(), StepOutcome::Completed);
        assert_eq!(ctl.generated(), 18);
        assert_eq!(ctl.items().len(), 18);
        assert!(ctl.items().iter().all(|item| item.index != 3 && item.index != 11));
    }

    #[test]
    fn zero_items_are_rejected() {
        let clock = ManualClock::millis();
        let mut ctl = controller(&clock);
        assert_eq!(ctl.start(0), Err(SessionError::InvalidTotal(0)));
        assert_eq!(ctl.state(), ControllerState::Idle);
    }

    #[test]
    fn start_while_running_is_rejected() {
        let clock = ManualClock::millis();
        let mut ctl = controller(&clock);
        ctl.start(5).unwrap();
        assert!(matches!(
            ctl.start(5),
            Err(SessionError::InvalidTransition {
                from: ControllerState::Running,
                operation: "start"
            })
        ));
    }

    #[test]
    fn steps_one_batch_at_a_time() {
        let clock = ManualClock::millis();
        let mut ctl = controller(&clock);
        ctl.start(2_500).unwrap();
        assert_eq!(ctl.plan().map(BatchPlan::batch_size), Some(1_500));

        let mut generator = GridGenerator::new(64, 2);
        assert_eq!(
            ctl.step(&mut generator).unwrap(),
            StepOutcome::BatchCompleted {
                batch: 1,
                accepted: 1_500
            }
        );
        assert_eq!(ctl.eta(HostTime(0)), Eta::Remaining(crate::time::Duration::ZERO));
        assert_eq!(ctl.step(&mut generator).unwrap(), StepOutcome::Completed);
        assert_eq!(ctl.generated(), 2_500);
        assert_eq!(ctl.step(&mut generator).unwrap(), StepOutcome::Completed);
    }

    #[test]
    fn pause_and_resume_never_re_emit() {
        let clock = ManualClock::millis();
        let log = Rc::new(RefCell::new(SinkLog::default()));
        let mut ctl = controller(&clock).with_item_sink(Box::new(LogSink(Rc::clone(&log))));
        ctl.start(6_000).unwrap();
        let mut generator = GridGenerator::new(128, 2);

        ctl.step(&mut generator).unwrap();
        ctl.pause("user").unwrap();
        assert_eq!(ctl.pause_reason(), Some("user"));
        assert_eq!(ctl.step(&mut generator).unwrap(), StepOutcome::Paused);
        assert_eq!(ctl.tracker().len(&crate::tracker::GroupId::global()), 1_000);

        ctl.resume().unwrap();
        assert_eq!(ctl.run(&mut generator).unwrap(), StepOutcome::Completed);

        let log = log.borrow();
        assert_eq!(log.items.len(), 6_000);
        let mut indices = log.items.clone();
        indices.dedup();
        assert_eq!(indices.len(), 6_000, "no slot emitted twice");
        assert_eq!(ctl.plan().unwrap().completed_batches().len(), 6);
    }

    #[test]
    fn control_handle_pauses_at_batch_boundary() {
        let clock = ManualClock::millis();
        let mut ctl = controller(&clock);
        ctl.start(3_000).unwrap();
        let handle = ctl.control_handle();
        handle.request_pause();

        assert_eq!(ctl.run(&mut GridGenerator::new(64, 2)).unwrap(), StepOutcome::Paused);
        assert_eq!(ctl.generated(), 0);
        assert_eq!(ctl.state(), ControllerState::Paused);
    }

    #[test]
    fn control_handle_cancel_is_seen_per_item() {
        struct CancelAt {
            inner: GridGenerator,
            handle: ControlHandle,
            at: usize,
        }
        impl Generator for CancelAt {
            fn propose(&mut self, index: usize, attempt: u32) -> Vec<u32> {
                if index == self.at {
                    self.handle.request_cancel();
                }
                self.inner.propose(index, attempt)
            }
            fn render(&mut self, index: usize, c: &[u32]) -> Result<RenderedItem, ItemError> {
                self.inner.render(index, c)
            }
        }

        let clock = ManualClock::millis();
        let mut ctl = controller(&clock);
        ctl.start(50).unwrap();
        let mut generator = CancelAt {
            inner: GridGenerator::new(64, 2),
            handle: ctl.control_handle(),
            at: 7,
        };
        assert_eq!(ctl.run(&mut generator).unwrap(), StepOutcome::Cancelled);
        assert_eq!(ctl.state(), ControllerState::Cancelled);
        assert!(ctl.items().is_empty());
        assert!(ctl.tracker().is_empty());
    }

    #[test]
    fn cancel_then_resume_fails_and_fresh_start_is_clean() {
        let clock = ManualClock::millis();
        let store = Rc::new(MemoryStore::new());
        let mut ctl = controller(&clock).with_store(store.clone());
        ctl.start(3_000).unwrap();
        let mut generator = GridGenerator::new(64, 2);
        ctl.step(&mut generator).unwrap();
        assert!(store.get(SESSION_KEY).is_some());

        ctl.cancel();
        assert_eq!(ctl.state(), ControllerState::Cancelled);
        assert!(store.get(SESSION_KEY).is_none());
        assert!(matches!(
            ctl.resume(),
            Err(SessionError::InvalidTransition {
                from: ControllerState::Cancelled,
                ..
            })
        ));

        ctl.start(3_000).unwrap();
        assert!(ctl.tracker().is_empty(), "no keys from the cancelled session");
        assert!(ctl.tracker().admit(&[0, 0]).is_accept());
        assert_eq!(ctl.run(&mut generator).unwrap(), StepOutcome::Completed);
        assert_eq!(ctl.generated(), 3_000);
    }

    #[test]
    fn cancel_outside_a_session_is_a_no_op() {
        let clock = ManualClock::millis();
        let mut ctl = controller(&clock);
        ctl.cancel();
        assert_eq!(ctl.state(), ControllerState::Idle);
    }

    #[test]
    fn resumes_from_persisted_session() {
        let clock = ManualClock::millis();
        let store = Rc::new(MemoryStore::new());
        let mut generator = GridGenerator::new(64, 2);

        let mut first = controller(&clock).with_store(store.clone());
        first.start(3_000).unwrap();
        first.step(&mut generator).unwrap();
        drop(first);

        let mut second = controller(&clock).with_store(store.clone());
        assert!(second.resume_from_store(3_000).unwrap());
        assert_eq!(second.generated(), 1_500);
        assert_eq!(second.plan().unwrap().current_batch(), 2);
        assert!(!second.tracker().admit(&[0, 0]).is_accept(), "keys restored");

        assert_eq!(second.run(&mut generator).unwrap(), StepOutcome::Completed);
        assert_eq!(second.generated(), 3_000);
        assert_eq!(second.items().len(), 1_500, "only the resumed batch is buffered");
    }

    #[test]
    fn completed_session_clears_persisted_state() {
        let clock = ManualClock::millis();
        let store = Rc::new(MemoryStore::new());
        let mut generator = GridGenerator::new(64, 2);

        let mut ctl = controller(&clock).with_store(store.clone());
        ctl.start(3_000).unwrap();
        ctl.step(&mut generator).unwrap();
        assert!(store.get(SESSION_KEY).is_some());

        assert_eq!(ctl.run(&mut generator).unwrap(), StepOutcome::Completed);
        assert!(store.get(SESSION_KEY).is_none());
        assert!(ctl.tracker().is_empty(), "keys dropped with the session");
        assert_eq!(ctl.generated(), 3_000);
        assert_eq!(ctl.items().len(), 3_000);

        let mut reload = controller(&clock).with_store(store.clone());
        assert!(!reload.resume_from_store(3_000).unwrap());
        assert_eq!(reload.generated(), 0);
        assert_eq!(reload.state(), ControllerState::Running);
    }

    #[test]
    fn mismatched_blob_starts_fresh() {
        let clock = ManualClock::millis();
        let store = Rc::new(MemoryStore::new());
        let mut ctl = controller(&clock).with_store(store.clone());
        ctl.start(3_000).unwrap();
        ctl.step(&mut GridGenerator::new(64, 2)).unwrap();
        ctl.cancel();

        store.write(SESSION_KEY, "{\"version\":9}").unwrap();
        let mut fresh = controller(&clock).with_store(store.clone());
        assert!(!fresh.resume_from_store(3_000).unwrap());
        assert_eq!(fresh.state(), ControllerState::Running);
        assert_eq!(fresh.generated(), 0);
    }

    #[test]
    fn cleanup_keeps_two_batches_of_images() {
        let clock = ManualClock::millis();
        let log = Rc::new(RefCell::new(SinkLog::default()));
        let mut ctl = controller(&clock).with_item_sink(Box::new(LogSink(Rc::clone(&log))));
        ctl.start(6_000).unwrap();
        let mut generator = GridGenerator::new(128, 2);
        for _ in 0..3 {
            ctl.step(&mut generator).unwrap();
        }

        let with_images = ctl.items().iter().filter(|i| i.image.is_some()).count();
        assert_eq!(with_images, 2_000);
        assert!(ctl.items()[..1_000].iter().all(|i| i.image.is_none()));
        assert!(ctl.items().iter().all(|i| i.preview.is_none()));
        assert_eq!(log.borrow().released.len(), 3_000);
    }

    struct FixedProbe(Rc<Cell<HeapUsage>>);

    impl MemoryProbe for FixedProbe {
        fn read(&mut self) -> Option<HeapUsage> {
            Some(self.0.get())
        }
    }

    struct CountingHint(Rc<Cell<u32>>);

    impl ReclaimHint for CountingHint {
        fn request_reclaim(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn high_pressure_shrinks_retention_and_requests_reclaim() {
        let clock = ManualClock::millis();
        let usage = Rc::new(Cell::new(HeapUsage {
            used_bytes: 95,
            limit_bytes: 100,
        }));
        let reclaims = Rc::new(Cell::new(0));
        let sampler = MemorySampler::new(
            Box::new(FixedProbe(Rc::clone(&usage))),
            SamplerConfig::default(),
            Timebase::MILLIS,
        )
        .with_reclaim_hint(Box::new(CountingHint(Rc::clone(&reclaims))));

        let mut ctl = controller(&clock).with_sampler(sampler);
        ctl.start(6_000).unwrap();
        let mut generator = GridGenerator::new(128, 2);
        ctl.step(&mut generator).unwrap();
        ctl.step(&mut generator).unwrap();

        let with_images = ctl.items().iter().filter(|i| i.image.is_some()).count();
        assert_eq!(with_images, 1_000, "one batch kept under pressure");
        // One reclaim when the sampler crossed critical, one per cleanup.
        assert_eq!(reclaims.get(), 3);
    }

    #[test]
    fn pressure_seen_by_an_external_poll_still_sheds_memory() {
        let clock = ManualClock::millis();
        let usage = Rc::new(Cell::new(HeapUsage {
            used_bytes: 95,
            limit_bytes: 100,
        }));
        let reclaims = Rc::new(Cell::new(0));
        let sampler = MemorySampler::new(
            Box::new(FixedProbe(Rc::clone(&usage))),
            SamplerConfig::default(),
            Timebase::MILLIS,
        )
        .with_reclaim_hint(Box::new(CountingHint(Rc::clone(&reclaims))));

        let mut ctl = controller(&clock).with_sampler(sampler);
        ctl.start(6_000).unwrap();
        // The host's interval timer takes the due sample before the first step.
        assert!(ctl.sampler_mut().poll(clock.now()).is_some());
        assert_eq!(ctl.sampler_mut().pressure_level(), PressureLevel::High);

        let mut generator = GridGenerator::new(128, 2);
        ctl.step(&mut generator).unwrap();
        ctl.step(&mut generator).unwrap();

        let with_images = ctl.items().iter().filter(|i| i.image.is_some()).count();
        assert_eq!(with_images, 1_000, "one batch kept under pressure");
        assert_eq!(reclaims.get(), 3);
    }

    #[test]
    fn unsafe_small_session_is_batched() {
        let clock = ManualClock::millis();
        let usage = Rc::new(Cell::new(HeapUsage {
            used_bytes: 0,
            limit_bytes: 10 * 1024 * 1024,
        }));
        let sampler = MemorySampler::new(
            Box::new(FixedProbe(Rc::clone(&usage))),
            SamplerConfig::default(),
            Timebase::MILLIS,
        );
        let mut ctl = controller(&clock).with_sampler(sampler);
        ctl.start(800).unwrap();
        let plan = ctl.plan().unwrap();
        assert_eq!(plan.batch_size(), 500);
        assert_eq!(plan.total_batches(), 2);
    }

    #[test]
    fn strict_pairs_are_enforced() {
        let clock = ManualClock::millis();
        let mut ctl = controller(&clock).with_strict_pairs([StrictPairRule::new("a-b", 0, 1)]);
        ctl.start(10).unwrap();
        assert_eq!(ctl.run(&mut GridGenerator::new(4, 3)).unwrap(), StepOutcome::Completed);

        let mut pairs: Vec<[u32; 2]> = ctl
            .items()
            .iter()
            .map(|i| {
                let mut p = [i.combination[0], i.combination[1]];
                p.sort_unstable();
                p
            })
            .collect();
        pairs.sort_unstable();
        let before = pairs.len();
        pairs.dedup();
        assert_eq!(pairs.len(), before, "no unordered pair repeats");
    }

    #[test]
    fn progress_is_published_per_window() {
        let clock = ManualClock::millis();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let mut ctl = controller(&clock);
        ctl.reporter_mut()
            .add_listener(Box::new(move |s: &ProgressSnapshot| {
                sink.borrow_mut().push((s.generated_count, s.status));
            }));
        ctl.start(250).unwrap();
        ctl.run(&mut GridGenerator::new(64, 2)).unwrap();

        let seen = seen.borrow();
        assert_eq!(
            seen.as_slice(),
            &[
                (0, ControllerState::Running),
                (100, ControllerState::Running),
                (200, ControllerState::Running),
                (250, ControllerState::Completed),
            ]
        );
    }

    #[cfg(feature = "trace")]
    #[test]
    fn trace_events_cover_a_session() {
        use crate::trace::TraceSink;

        #[derive(Default)]
        struct Counter {
            starts: u32,
            batches: u32,
            rejects: u32,
            ends: Vec<SessionOutcome>,
        }
        impl TraceSink for Counter {
            fn on_session_start(&mut self, _: &crate::trace::SessionStartEvent) {
                self.starts += 1;
            }
            fn on_batch_end(&mut self, _: &BatchEndEvent) {
                self.batches += 1;
            }
            fn on_candidate_rejected(&mut self, _: &CandidateRejectedEvent) {
                self.rejects += 1;
            }
            fn on_session_end(&mut self, e: &SessionEndEvent) {
                self.ends.push(e.outcome);
            }
        }

        let clock = ManualClock::millis();
        let mut sink = Counter::default();
        let mut tracer = Tracer::new(&mut sink);
        let mut ctl = controller(&clock);
        ctl.start_traced(2_000, &mut tracer).unwrap();
        ctl.run_traced(&mut GridGenerator::new(64, 2), &mut tracer)
            .unwrap();
        drop(tracer);

        assert_eq!(sink.starts, 1);
        assert_eq!(sink.batches, 2);
        assert_eq!(sink.rejects, 0);
        assert_eq!(sink.ends, vec![SessionOutcome::Completed]);
    }

    #[cfg(feature = "trace")]
    #[test]
    fn systemic_failure_closes_the_trace() {
        use crate::trace::TraceSink;

        #[derive(Default)]
        struct Log {
            batch_ends: Vec<(u32, usize, usize)>,
            failed_items: Vec<(usize, u32)>,
            ends: Vec<(SessionOutcome, usize)>,
        }
        impl TraceSink for Log {
            fn on_batch_end(&mut self, e: &BatchEndEvent) {
                self.batch_ends.push((e.batch, e.accepted, e.rejected));
            }
            fn on_item_failed(&mut self, e: &ItemFailedEvent) {
                self.failed_items.push((e.index, e.consecutive_failures));
            }
            fn on_session_end(&mut self, e: &SessionEndEvent) {
                self.ends.push((e.outcome, e.generated));
            }
        }

        let clock = ManualClock::millis();
        let mut log = Log::default();
        let mut tracer = Tracer::new(&mut log);
        let mut ctl = controller(&clock);
        ctl.start_traced(10, &mut tracer).unwrap();
        assert!(ctl
            .run_traced(&mut GridGenerator::new(2, 2), &mut tracer)
            .is_err());
        drop(tracer);

        let rejected = usize::try_from(MIN_FAILURE_LIMIT).unwrap();
        assert_eq!(log.batch_ends, vec![(1, 4, rejected)]);
        assert_eq!(log.ends, vec![(SessionOutcome::Failed, 4)]);
        assert!(log.failed_items.is_empty());
    }

    #[cfg(feature = "trace")]
    #[test]
    fn render_failure_at_the_limit_is_traced_before_the_stall() {
        use crate::trace::TraceSink;

        #[derive(Default)]
        struct Log(Vec<&'static str>);
        impl TraceSink for Log {
            fn on_item_failed(&mut self, _: &ItemFailedEvent) {
                self.0.push("item_failed");
            }
            fn on_batch_end(&mut self, _: &BatchEndEvent) {
                self.0.push("batch_end");
            }
            fn on_session_end(&mut self, e: &SessionEndEvent) {
                assert_eq!(e.outcome, SessionOutcome::Failed);
                self.0.push("session_end");
            }
        }

        let clock = ManualClock::millis();
        let mut log = Log::default();
        let mut tracer = Tracer::new(&mut log);
        let mut ctl = BatchController::new(&clock, ControllerConfig::default().with_failure_limit(2));
        ctl.start_traced(10, &mut tracer).unwrap();
        let mut generator = GridGenerator::new(16, 2);
        generator.fail_indices = vec![5, 6];
        assert!(ctl.run_traced(&mut generator, &mut tracer).is_err());
        drop(tracer);

        assert_eq!(
            log.0,
            vec!["item_failed", "item_failed", "batch_end", "session_end"]
        );
    }
}
