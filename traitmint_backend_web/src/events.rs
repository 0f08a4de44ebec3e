// Copyright 2026 the Traitmint Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! `CustomEvent` broadcasting on `window`.
//!
//! Page scripts subscribe with
//! `window.addEventListener("traitmint:progress", e => e.detail…)`.

use js_sys::{Object, Reflect};
use wasm_bindgen::JsValue;

use traitmint_core::memory::{MemoryListener, PressureLevel};
use traitmint_core::progress::{ProgressListener, ProgressSnapshot};

/// Event type for published progress snapshots.
pub const PROGRESS_EVENT: &str = "traitmint:progress";

/// Event type for memory pressure changes.
pub const MEMORY_EVENT: &str = "traitmint:memory-pressure";

fn set(detail: &Object, key: &str, value: &JsValue) {
    // Setting a plain property on a fresh object cannot throw.
    _ = Reflect::set(detail, &JsValue::from_str(key), value);
}

fn dispatch(event_type: &str, detail: &Object) {
    let Some(window) = web_sys::window() else {
        return;
    };
    let init = web_sys::CustomEventInit::new();
    init.set_detail(detail);
    match web_sys::CustomEvent::new_with_event_init_dict(event_type, &init) {
        Ok(event) => {
            if let Err(err) = window.dispatch_event(&event) {
                tracing::debug!(event_type, error = ?err, "event listener threw");
            }
        }
        Err(err) => tracing::warn!(event_type, error = ?err, "could not create CustomEvent"),
    }
}

const fn level_name(level: PressureLevel) -> &'static str {
    match level {
        PressureLevel::Low => "low",
        PressureLevel::Medium => "medium",
        PressureLevel::High => "high",
    }
}

/// [`ProgressListener`] that re-dispatches snapshots as DOM events.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProgressBroadcaster;

impl ProgressListener for ProgressBroadcaster {
    fn on_progress(&mut self, snapshot: &ProgressSnapshot) {
        let detail = Object::new();
        set(
            &detail,
            "generatedCount",
            &JsValue::from_f64(snapshot.generated_count as f64),
        );
        set(
            &detail,
            "totalCount",
            &JsValue::from_f64(snapshot.total_count as f64),
        );
        set(&detail, "fraction", &JsValue::from_f64(snapshot.fraction()));
        set(
            &detail,
            "status",
            &JsValue::from_str(&alloc::format!("{:?}", snapshot.status).to_lowercase()),
        );
        let memory = snapshot
            .memory_usage
            .map_or(JsValue::NULL, |pct| JsValue::from_f64(f64::from(pct)));
        set(&detail, "memoryUsage", &memory);
        dispatch(PROGRESS_EVENT, &detail);
    }
}

/// [`MemoryListener`] that re-dispatches pressure changes as DOM events.
#[derive(Clone, Copy, Debug, Default)]
pub struct PressureBroadcaster;

impl MemoryListener for PressureBroadcaster {
    fn on_pressure_change(&mut self, from: PressureLevel, to: PressureLevel) {
        let detail = Object::new();
        set(&detail, "from", &JsValue::from_str(level_name(from)));
        set(&detail, "to", &JsValue::from_str(level_name(to)));
        dispatch(MEMORY_EVENT, &detail);
    }
}
