// Copyright 2026 the Traitmint Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Heap introspection through non-standard browser APIs.
//!
//! `performance.memory` exists only in Chromium-based browsers and `gc()`
//! only when the page runs with `--expose-gc`. Both are looked up
//! reflectively on every call; when missing, the probe reports nothing and
//! the hint does nothing.

use js_sys::{Function, Reflect};
use wasm_bindgen::{JsCast, JsValue};

use traitmint_core::memory::{HeapUsage, MemoryProbe, ReclaimHint};

fn global_property(name: &str) -> Option<JsValue> {
    Reflect::get(&js_sys::global(), &JsValue::from_str(name))
        .ok()
        .filter(|value| !value.is_undefined() && !value.is_null())
}

fn number_property(target: &JsValue, name: &str) -> Option<u64> {
    let value = Reflect::get(target, &JsValue::from_str(name)).ok()?.as_f64()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    #[expect(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "checked finite and non-negative; heap sizes fit in u64"
    )]
    Some(value as u64)
}

/// [`MemoryProbe`] over `performance.memory`.
#[derive(Clone, Copy, Debug, Default)]
pub struct PerformanceMemoryProbe;

impl MemoryProbe for PerformanceMemoryProbe {
    fn read(&mut self) -> Option<HeapUsage> {
        let performance = global_property("performance")?;
        let memory = Reflect::get(&performance, &JsValue::from_str("memory")).ok()?;
        if memory.is_undefined() {
            return None;
        }
        Some(HeapUsage {
            used_bytes: number_property(&memory, "usedJSHeapSize")?,
            limit_bytes: number_property(&memory, "jsHeapSizeLimit")?,
        })
    }
}

/// [`ReclaimHint`] that calls the global `gc()` when it is exposed.
#[derive(Clone, Copy, Debug, Default)]
pub struct GcHint;

impl ReclaimHint for GcHint {
    fn request_reclaim(&mut self) {
        let Some(gc) = global_property("gc").and_then(|v| v.dyn_into::<Function>().ok()) else {
            return;
        };
        if let Err(err) = gc.call0(&JsValue::NULL) {
            tracing::debug!(error = ?err, "gc() threw");
        }
    }
}
