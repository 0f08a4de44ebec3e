// Copyright 2026 the Traitmint Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Timer-driven loops.
//!
//! [`BatchLoop`] runs a callback once per macrotask by chaining
//! `setTimeout(…, 0)`, which lets the browser paint and handle input between
//! batches. [`IntervalTimer`] wraps `setInterval` for periodic polling.

use alloc::boxed::Box;
use alloc::rc::Rc;
use core::cell::{Cell, RefCell};

use wasm_bindgen::closure::Closure;
use wasm_bindgen::prelude::*;

use traitmint_core::time::HostTime;

// Direct global bindings instead of `web_sys::Window` methods, so workers
// (which have no Window) can run the loop too.
#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_namespace = performance, js_name = "now")]
    pub(crate) fn performance_now() -> f64;

    #[wasm_bindgen(js_name = "setTimeout")]
    fn set_timeout(callback: &JsValue, delay_ms: i32) -> i32;

    #[wasm_bindgen(js_name = "clearTimeout")]
    fn clear_timeout(id: i32);

    #[wasm_bindgen(js_name = "setInterval")]
    fn set_interval(callback: &JsValue, period_ms: i32) -> i32;

    #[wasm_bindgen(js_name = "clearInterval")]
    fn clear_interval(id: i32);
}

/// What a [`BatchLoop`] callback wants next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopControl {
    /// Schedule another turn.
    Continue,
    /// Stop the loop.
    Stop,
}

// ---------------------------------------------------------------------------
// BatchLoop
// ---------------------------------------------------------------------------

/// A `setTimeout(0)`-chained loop.
///
/// Create with [`BatchLoop::new`], then call [`start`](Self::start). The loop
/// re-schedules itself after every turn until the callback returns
/// [`LoopControl::Stop`], [`stop`](Self::stop) is called, or the `BatchLoop`
/// is dropped.
pub struct BatchLoop {
    inner: Rc<LoopInner>,
}

type TurnClosure = Closure<dyn FnMut()>;

struct LoopInner {
    /// The JS closure registered with `setTimeout`.
    ///
    /// Kept in its own `RefCell` so it can reference itself without
    /// conflicting with `callback`.
    closure: RefCell<Option<TurnClosure>>,

    /// Called once per turn with the current host time.
    callback: RefCell<Box<dyn FnMut(HostTime) -> LoopControl>>,

    /// Turns run so far.
    turns: Cell<u64>,

    /// Whether a turn is scheduled or running.
    running: Cell<bool>,

    /// ID of the pending `setTimeout`, for cancellation.
    timeout_id: Cell<i32>,
}

impl BatchLoop {
    /// Creates a loop that is **not yet running**.
    pub fn new(callback: impl FnMut(HostTime) -> LoopControl + 'static) -> Self {
        Self {
            inner: Rc::new(LoopInner {
                closure: RefCell::new(None),
                callback: RefCell::new(Box::new(callback)),
                turns: Cell::new(0),
                running: Cell::new(false),
                timeout_id: Cell::new(0),
            }),
        }
    }

    /// Starts the loop. If already running, this is a no-op.
    pub fn start(&self) {
        if self.inner.running.get() {
            return;
        }
        self.inner.running.set(true);

        if self.inner.closure.borrow().is_none() {
            let inner = Rc::clone(&self.inner);
            let closure = Closure::wrap(Box::new(move || {
                if !inner.running.get() {
                    return;
                }
                inner.turns.set(inner.turns.get() + 1);

                let control = inner.callback.borrow_mut()(crate::now());
                if control == LoopControl::Stop {
                    inner.running.set(false);
                }

                if inner.running.get()
                    && let Some(ref closure) = *inner.closure.borrow()
                {
                    let id = set_timeout(closure.as_ref().unchecked_ref(), 0);
                    inner.timeout_id.set(id);
                }
            }) as Box<dyn FnMut()>);
            *self.inner.closure.borrow_mut() = Some(closure);
        }

        if let Some(ref closure) = *self.inner.closure.borrow() {
            let id = set_timeout(closure.as_ref().unchecked_ref(), 0);
            self.inner.timeout_id.set(id);
        }
    }

    /// Stops the loop. Can be restarted with [`start`](Self::start).
    pub fn stop(&self) {
        if !self.inner.running.get() {
            return;
        }
        self.inner.running.set(false);
        clear_timeout(self.inner.timeout_id.get());
    }

    /// Returns `true` while a turn is scheduled.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.get()
    }

    /// Turns run so far.
    #[must_use]
    pub fn turns(&self) -> u64 {
        self.inner.turns.get()
    }
}

impl Drop for BatchLoop {
    fn drop(&mut self) {
        self.stop();
        // Drop the JS closure so it doesn't leak.
        self.inner.closure.borrow_mut().take();
    }
}

impl core::fmt::Debug for BatchLoop {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BatchLoop")
            .field("running", &self.inner.running.get())
            .field("turns", &self.inner.turns.get())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// IntervalTimer
// ---------------------------------------------------------------------------

/// A `setInterval` timer.
pub struct IntervalTimer {
    closure: Option<TurnClosure>,
    period_ms: i32,
    interval_id: Cell<Option<i32>>,
}

impl IntervalTimer {
    /// Creates a stopped timer that calls `callback` every `period_ms`.
    pub fn new(period_ms: u32, mut callback: impl FnMut(HostTime) + 'static) -> Self {
        let closure = Closure::wrap(Box::new(move || callback(crate::now())) as Box<dyn FnMut()>);
        Self {
            closure: Some(closure),
            period_ms: i32::try_from(period_ms).unwrap_or(i32::MAX),
            interval_id: Cell::new(None),
        }
    }

    /// Starts the timer. If already running, this is a no-op.
    pub fn start(&self) {
        if self.interval_id.get().is_some() {
            return;
        }
        if let Some(closure) = &self.closure {
            let id = set_interval(closure.as_ref().unchecked_ref(), self.period_ms);
            self.interval_id.set(Some(id));
        }
    }

    /// Stops the timer.
    pub fn stop(&self) {
        if let Some(id) = self.interval_id.take() {
            clear_interval(id);
        }
    }

    /// Returns `true` while the interval is registered.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.interval_id.get().is_some()
    }
}

impl Drop for IntervalTimer {
    fn drop(&mut self) {
        self.stop();
        self.closure.take();
    }
}

impl core::fmt::Debug for IntervalTimer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IntervalTimer")
            .field("period_ms", &self.period_ms)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
