// Copyright 2026 the Traitmint Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A generation session wired to browser timers.

use alloc::boxed::Box;
use alloc::rc::Rc;
use core::cell::RefCell;

use traitmint_core::controller::{
    BatchController, ControllerConfig, Generator, ItemSink, StepOutcome,
};
use traitmint_core::error::SessionError;
use traitmint_core::memory::{MemorySampler, SamplerConfig};
use traitmint_core::persist::SessionStore;
use traitmint_core::progress::{BatchedProgressReporter, ReporterConfig};

use crate::events::{PressureBroadcaster, ProgressBroadcaster};
use crate::memory::{GcHint, PerformanceMemoryProbe};
use crate::storage::SessionStorageStore;
use crate::timer::{BatchLoop, IntervalTimer, LoopControl};
use crate::WebClock;

type Shared<T> = Rc<RefCell<T>>;

/// A [`BatchController`] stepped by a [`BatchLoop`], with an
/// [`IntervalTimer`] polling the memory sampler and progress reporter.
///
/// Progress and pressure changes are broadcast as DOM events and the
/// session is persisted to `sessionStorage`.
pub struct WebSession {
    controller: Shared<BatchController<WebClock>>,
    batch_loop: BatchLoop,
    ticker: IntervalTimer,
}

impl WebSession {
    /// Builds a session with browser defaults.
    ///
    /// `on_finish` is called once the loop stops: with the final outcome
    /// when the session completes, pauses or is cancelled, or with the error
    /// that ended it.
    pub fn new(
        generator: impl Generator + 'static,
        sink: Option<Box<dyn ItemSink>>,
        on_finish: impl FnMut(Result<StepOutcome, SessionError>) + 'static,
    ) -> Self {
        let clock = WebClock;
        let sampler_config = SamplerConfig::default();
        let mut sampler = MemorySampler::new(
            Box::new(PerformanceMemoryProbe),
            sampler_config,
            crate::timebase(),
        )
        .with_reclaim_hint(Box::new(GcHint));
        sampler.add_listener(Box::new(PressureBroadcaster));

        let mut reporter = BatchedProgressReporter::new(ReporterConfig::default(), crate::timebase());
        reporter.add_listener(Box::new(ProgressBroadcaster));

        let store: Rc<dyn SessionStore> = Rc::new(SessionStorageStore::open());
        let mut controller = BatchController::new(clock, ControllerConfig::browser())
            .with_sampler(sampler)
            .with_store(store)
            .with_reporter(reporter);
        if let Some(sink) = sink {
            controller = controller.with_item_sink(sink);
        }

        Self::from_controller(controller, generator, on_finish, sampler_config.interval_ms)
    }

    /// Wraps an already configured controller.
    ///
    /// The ticker fires every `poll_interval_ms`; the sampler still honors
    /// its own interval.
    pub fn from_controller(
        controller: BatchController<WebClock>,
        mut generator: impl Generator + 'static,
        mut on_finish: impl FnMut(Result<StepOutcome, SessionError>) + 'static,
        poll_interval_ms: u64,
    ) -> Self {
        let controller = Rc::new(RefCell::new(controller));

        let stepped = Rc::clone(&controller);
        let batch_loop = BatchLoop::new(move |_now| {
            let result = stepped.borrow_mut().step(&mut generator);
            match result {
                Ok(StepOutcome::BatchCompleted { .. }) => LoopControl::Continue,
                finished => {
                    on_finish(finished);
                    LoopControl::Stop
                }
            }
        });

        let polled = Rc::clone(&controller);
        let ticker = IntervalTimer::new(
            u32::try_from(poll_interval_ms).unwrap_or(u32::MAX),
            move |now| {
                // Skip the tick if a step holds the controller.
                let Ok(mut controller) = polled.try_borrow_mut() else {
                    return;
                };
                controller.sampler_mut().poll(now);
                controller.reporter_mut().poll(now);
            },
        );

        Self {
            controller,
            batch_loop,
            ticker,
        }
    }

    /// Starts a fresh session of `total_items` and begins stepping.
    pub fn start(&self, total_items: usize) -> Result<(), SessionError> {
        self.controller.borrow_mut().start(total_items)?;
        self.run();
        Ok(())
    }

    /// Resumes a session persisted in `sessionStorage`, or starts fresh.
    ///
    /// Returns `true` when state was restored.
    pub fn resume_or_start(&self, total_items: usize) -> Result<bool, SessionError> {
        let restored = self.controller.borrow_mut().resume_from_store(total_items)?;
        self.run();
        Ok(restored)
    }

    /// Resumes a paused session and begins stepping again.
    pub fn resume(&self) -> Result<(), SessionError> {
        self.controller.borrow_mut().resume()?;
        self.run();
        Ok(())
    }

    /// Requests a pause at the next batch boundary.
    pub fn pause(&self) {
        self.controller.borrow().control_handle().request_pause();
    }

    /// Requests cancellation before the next item.
    pub fn cancel(&self) {
        let handle = self.controller.borrow().control_handle();
        handle.request_cancel();
        if !self.batch_loop.is_running() {
            // Nothing will observe the flag; cancel directly.
            self.controller.borrow_mut().cancel();
        }
    }

    /// The controller, for inspection between turns.
    #[must_use]
    pub fn controller(&self) -> Shared<BatchController<WebClock>> {
        Rc::clone(&self.controller)
    }

    fn run(&self) {
        self.ticker.start();
        self.batch_loop.start();
    }
}

impl Drop for WebSession {
    fn drop(&mut self) {
        self.batch_loop.stop();
        self.ticker.stop();
    }
}

impl core::fmt::Debug for WebSession {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WebSession")
            .field("batch_loop", &self.batch_loop)
            .field("ticker", &self.ticker)
            .finish_non_exhaustive()
    }
}
