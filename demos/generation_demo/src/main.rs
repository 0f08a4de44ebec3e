// Copyright 2026 the Traitmint Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Simulated generation session that exercises batching, persistence and the
//! diagnostics pipeline.
//!
//! Generates a 1800-item collection over four trait layers with a strict
//! background/body pair rule. The first "page load" runs one batch and is
//! dropped; the second restores the session from the shared store and runs
//! to completion. Events go to both a
//! [`PrettyPrintSink`](traitmint_debug::pretty::PrettyPrintSink) and a
//! [`RecorderSink`](traitmint_debug::recorder::RecorderSink), and the
//! recording is exported as a Chrome trace JSON file.

use std::cell::Cell;
use std::fs::File;
use std::io::BufWriter;
use std::rc::Rc;

use traitmint_core::controller::{
    BatchController, ControllerConfig, Generator, ItemSink, PreviewHandle, RenderedItem,
};
use traitmint_core::error::ItemError;
use traitmint_core::memory::{HeapUsage, MemoryProbe, MemorySampler, SamplerConfig};
use traitmint_core::persist::{MemoryStore, SessionStore};
use traitmint_core::progress::{BatchedProgressReporter, ProgressSnapshot, ReporterConfig};
use traitmint_core::time::{Clock, ManualClock};
use traitmint_core::trace::{
    BatchBeginEvent, BatchEndEvent, CandidateRejectedEvent, CleanupEvent, ItemFailedEvent,
    PressureChangeEvent, SessionEndEvent, SessionStartEvent, TraceSink, Tracer,
};
use traitmint_core::tracker::StrictPairRule;

use traitmint_debug::pretty::PrettyPrintSink;
use traitmint_debug::recorder::RecorderSink;

const TOTAL_ITEMS: usize = 1_800;
/// Trait counts per layer: background, body, eyes, accessory.
const LAYER_WIDTHS: [u32; 4] = [40, 50, 6, 5];
/// Simulated compositing time per item, in ms ticks.
const RENDER_MS: u64 = 2;
const IMAGE_BYTES: u64 = 256 * 1024;
const BASE_HEAP: u64 = 64 * 1024 * 1024;
const HEAP_LIMIT: u64 = 512 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Simulated host
// ---------------------------------------------------------------------------

fn splitmix(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

/// Picks traits pseudo-randomly and "renders" them by advancing the clock.
struct Artist<'a> {
    clock: &'a ManualClock,
    heap: Rc<Cell<u64>>,
}

impl Generator for Artist<'_> {
    fn propose(&mut self, index: usize, attempt: u32) -> Vec<u32> {
        let mut bits = splitmix(((index as u64) << 32) | u64::from(attempt));
        LAYER_WIDTHS
            .iter()
            .map(|&width| {
                #[expect(
                    clippy::cast_possible_truncation,
                    reason = "reduced modulo a u32 width"
                )]
                let id = (bits % u64::from(width)) as u32;
                bits = splitmix(bits);
                id
            })
            .collect()
    }

    fn render(&mut self, index: usize, combination: &[u32]) -> Result<RenderedItem, ItemError> {
        self.clock.advance(RENDER_MS);
        if splitmix(index as u64) % 251 == 0 {
            return Err(ItemError::new(index, "accessory layer failed to decode"));
        }
        self.heap.set(self.heap.get() + IMAGE_BYTES);
        let names = ["background", "body", "eyes", "accessory"];
        Ok(RenderedItem {
            image: Some(vec![0; 16]),
            metadata: names
                .iter()
                .zip(combination)
                .map(|(name, id)| ((*name).to_owned(), format!("#{id}")))
                .collect(),
            preview: Some(PreviewHandle(index as u64)),
        })
    }
}

/// Reports the simulated heap to the sampler.
struct SimulatedHeap(Rc<Cell<u64>>);

impl MemoryProbe for SimulatedHeap {
    fn read(&mut self) -> Option<HeapUsage> {
        Some(HeapUsage {
            used_bytes: self.0.get(),
            limit_bytes: HEAP_LIMIT,
        })
    }
}

/// Frees simulated image memory when previews are released.
struct HeapReleaser(Rc<Cell<u64>>);

impl ItemSink for HeapReleaser {
    fn release_preview(&mut self, _handle: PreviewHandle) {
        self.0.set(self.0.get().saturating_sub(IMAGE_BYTES));
    }
}

// ---------------------------------------------------------------------------
// Tee sink
// ---------------------------------------------------------------------------

/// Forwards every event to both sinks.
struct Tee<'a> {
    pretty: &'a mut PrettyPrintSink,
    recorder: &'a mut RecorderSink,
}

macro_rules! tee {
    ($($hook:ident($ty:ty)),* $(,)?) => {
        impl TraceSink for Tee<'_> {
            $(
                fn $hook(&mut self, e: &$ty) {
                    self.pretty.$hook(e);
                    self.recorder.$hook(e);
                }
            )*
        }
    };
}

tee!(
    on_session_start(SessionStartEvent),
    on_batch_begin(BatchBeginEvent),
    on_batch_end(BatchEndEvent),
    on_candidate_rejected(CandidateRejectedEvent),
    on_item_failed(ItemFailedEvent),
    on_cleanup(CleanupEvent),
    on_pressure_change(PressureChangeEvent),
    on_session_end(SessionEndEvent),
);

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

/// Builds the controller a page load would build.
fn page_load<'a>(
    clock: &'a ManualClock,
    heap: &Rc<Cell<u64>>,
    store: &Rc<MemoryStore>,
) -> BatchController<&'a ManualClock> {
    let timebase = clock.timebase();
    let sampler = MemorySampler::new(
        Box::new(SimulatedHeap(Rc::clone(heap))),
        SamplerConfig {
            interval_ms: 500,
            ..SamplerConfig::default()
        },
        timebase,
    );

    let mut reporter = BatchedProgressReporter::new(ReporterConfig::default(), timebase);
    reporter.add_listener(Box::new(|s: &ProgressSnapshot| {
        println!(
            "[progress] {}/{} ({:.0}%) {:?} heap={}",
            s.generated_count,
            s.total_count,
            s.fraction() * 100.0,
            s.status,
            s.memory_usage
                .map_or_else(|| "?".to_owned(), |pct| format!("{pct:.1}%")),
        );
    }));

    let store: Rc<dyn SessionStore> = Rc::clone(store) as Rc<dyn SessionStore>;
    BatchController::new(clock, ControllerConfig::browser())
        .with_sampler(sampler)
        .with_store(store)
        .with_reporter(reporter)
        .with_item_sink(Box::new(HeapReleaser(Rc::clone(heap))))
        .with_strict_pairs([StrictPairRule::new("background-body", 0, 1)])
}

fn main() {
    let clock = ManualClock::millis();
    let timebase = clock.timebase();
    let heap = Rc::new(Cell::new(BASE_HEAP));
    let store = Rc::new(MemoryStore::new());

    // -- sinks -------------------------------------------------------------
    let mut pretty =
        PrettyPrintSink::new(Box::new(std::io::stdout()), timebase).quiet_rejections();
    let mut recorder = RecorderSink::new();
    let mut artist = Artist {
        clock: &clock,
        heap: Rc::clone(&heap),
    };

    // -- first load: one batch, then the tab reloads -----------------------
    {
        let mut controller = page_load(&clock, &heap, &store);
        let mut tee = Tee {
            pretty: &mut pretty,
            recorder: &mut recorder,
        };
        let mut tracer = Tracer::new(&mut tee);
        controller
            .start_traced(TOTAL_ITEMS, &mut tracer)
            .expect("a fresh controller is idle");
        let outcome = controller
            .step_traced(&mut artist, &mut tracer)
            .expect("first batch failed");
        println!(
            "first load: {outcome:?}, {} items, eta {:?}",
            controller.generated(),
            controller.eta(clock.now()),
        );
    }

    // Previews die with the page.
    heap.set(BASE_HEAP);
    clock.advance(1_000);

    // -- second load: restore and finish -----------------------------------
    {
        let mut controller = page_load(&clock, &heap, &store);
        let mut tee = Tee {
            pretty: &mut pretty,
            recorder: &mut recorder,
        };
        let mut tracer = Tracer::new(&mut tee);
        let restored = controller
            .resume_from_store_traced(TOTAL_ITEMS, &mut tracer)
            .expect("a fresh controller is idle");
        let outcome = controller
            .run_traced(&mut artist, &mut tracer)
            .expect("session failed");
        println!(
            "second load: restored={restored} {outcome:?}, {} items",
            controller.generated(),
        );
    }

    // -- export Chrome trace -----------------------------------------------
    let path = "generation_trace.json";
    let file = File::create(path).expect("failed to create generation_trace.json");
    let mut writer = BufWriter::new(file);
    traitmint_debug::chrome::export(recorder.as_bytes(), timebase, &mut writer)
        .expect("failed to write Chrome trace");

    println!("Wrote {path} ({TOTAL_ITEMS} items, {} store writes)", store.write_count());
}
