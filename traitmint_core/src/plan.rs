// Copyright 2026 the Traitmint Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Batch planning.
//!
//! A session of `total_items` is split into fixed-size batches so the host
//! can yield between them. Small sessions run in a single pass unless the
//! memory sampler says the host cannot hold them.

use alloc::vec::Vec;
use core::ops::Range;

use crate::time::Duration;

/// Sessions at or below this size run in a single pass.
pub const SINGLE_PASS_LIMIT: usize = 1_000;

/// Batch size used when a single pass is unsafe for memory.
pub const FORCED_BATCH_SIZE: usize = 500;

/// Batch size for `total_items`, or `None` for a single pass.
///
/// | items | batch size |
/// |---|---|
/// | ≤ 1000 | single pass |
/// | 1001–5000 | 1500 |
/// | 5001–50000 | 1000 |
/// | > 50000 | 500 |
#[must_use]
pub const fn batch_size_for(total_items: usize) -> Option<usize> {
    match total_items {
        0..=SINGLE_PASS_LIMIT => None,
        1_001..=5_000 => Some(1_500),
        5_001..=50_000 => Some(1_000),
        _ => Some(500),
    }
}

/// Fixed partition of a session into batches.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchPlan {
    total_items: usize,
    batch_size: usize,
    total_batches: u32,
    current_batch: u32,
    completed_batches: Vec<u32>,
}

impl BatchPlan {
    /// Plans `total_items` with the given batch size.
    ///
    /// A `batch_size` of zero or one not smaller than `total_items` yields a
    /// single batch.
    #[must_use]
    pub fn new(total_items: usize, batch_size: usize) -> Self {
        let batch_size = if batch_size == 0 {
            total_items.max(1)
        } else {
            batch_size.min(total_items.max(1))
        };
        let batches = total_items.div_ceil(batch_size).max(1);
        Self {
            total_items,
            batch_size,
            total_batches: u32::try_from(batches).unwrap_or(u32::MAX),
            current_batch: 1,
            completed_batches: Vec::new(),
        }
    }

    /// Plans `total_items` as one batch.
    #[must_use]
    pub fn single_pass(total_items: usize) -> Self {
        Self::new(total_items, total_items)
    }

    /// Plans using [`batch_size_for`].
    ///
    /// When `single_pass_safe` is `false` a session that would have run in a
    /// single pass is batched at [`FORCED_BATCH_SIZE`] instead.
    #[must_use]
    pub fn for_total(total_items: usize, single_pass_safe: bool) -> Self {
        match batch_size_for(total_items) {
            Some(size) => Self::new(total_items, size),
            None if !single_pass_safe && total_items > FORCED_BATCH_SIZE => {
                Self::new(total_items, FORCED_BATCH_SIZE)
            }
            None => Self::single_pass(total_items),
        }
    }

    /// Restores a plan with some batches already completed.
    ///
    /// Entries outside `1..=total_batches` and duplicates are ignored.
    #[must_use]
    pub fn with_completed(mut self, completed: impl IntoIterator<Item = u32>) -> Self {
        let mut done: Vec<u32> = completed
            .into_iter()
            .filter(|b| (1..=self.total_batches).contains(b))
            .collect();
        done.sort_unstable();
        done.dedup();
        self.completed_batches = done;
        self.current_batch = self.first_incomplete();
        self
    }

    /// Items in the session.
    #[must_use]
    pub fn total_items(&self) -> usize {
        self.total_items
    }

    /// Items per batch (the last batch may be shorter).
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of batches.
    #[must_use]
    pub fn total_batches(&self) -> u32 {
        self.total_batches
    }

    /// 1-based number of the batch to run next.
    ///
    /// Equals `total_batches + 1` once finished.
    #[must_use]
    pub fn current_batch(&self) -> u32 {
        self.current_batch
    }

    /// Completed batch numbers, increasing.
    #[must_use]
    pub fn completed_batches(&self) -> &[u32] {
        &self.completed_batches
    }

    /// Whether this session runs as a single batch.
    #[must_use]
    pub fn is_single_pass(&self) -> bool {
        self.total_batches == 1
    }

    /// Item slots covered by 1-based `batch`.
    #[must_use]
    pub fn batch_range(&self, batch: u32) -> Range<usize> {
        let idx = (batch.saturating_sub(1)) as usize;
        let start = idx.saturating_mul(self.batch_size).min(self.total_items);
        let end = start.saturating_add(self.batch_size).min(self.total_items);
        start..end
    }

    /// Marks the current batch completed and advances.
    ///
    /// Returns the batch number that was completed, or `None` when the plan
    /// was already finished.
    pub fn mark_completed(&mut self) -> Option<u32> {
        if self.is_finished() {
            return None;
        }
        let batch = self.current_batch;
        if self.completed_batches.last().is_none_or(|&last| last < batch) {
            self.completed_batches.push(batch);
        }
        self.current_batch = self.first_incomplete();
        Some(batch)
    }

    /// Whether every batch has completed.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.completed_batches.len() as u64 >= u64::from(self.total_batches)
    }

    /// Batches not yet completed.
    #[must_use]
    pub fn remaining(&self) -> u32 {
        let done = u32::try_from(self.completed_batches.len()).unwrap_or(u32::MAX);
        self.total_batches.saturating_sub(done)
    }

    /// Items covered by completed batches.
    #[must_use]
    pub fn items_completed(&self) -> usize {
        self.completed_batches
            .iter()
            .map(|&b| self.batch_range(b).len())
            .sum()
    }

    fn first_incomplete(&self) -> u32 {
        (1..=self.total_batches)
            .find(|b| self.completed_batches.binary_search(b).is_err())
            .unwrap_or(self.total_batches.saturating_add(1))
    }
}

/// Estimated time to completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Eta {
    /// No batch has completed yet.
    Estimating,
    /// Projected remaining time.
    Remaining(Duration),
}

impl Eta {
    /// Projects remaining time from elapsed time over completed batches.
    #[must_use]
    pub fn project(elapsed: Duration, completed: u32, remaining: u32) -> Self {
        if completed == 0 {
            return Self::Estimating;
        }
        Self::Remaining(elapsed.mul_div(u64::from(remaining), u64::from(completed)))
    }
}
