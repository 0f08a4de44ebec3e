// Copyright 2026 the Traitmint Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Session persistence.
//!
//! A session survives a reload through a [`SessionStore`], a string
//! key/value store shaped like the browser's `sessionStorage`. The controller
//! writes a [`PersistedSession`] blob after every batch and the reporter
//! writes the latest progress snapshot on its own cadence.
//!
//! Storage is best effort. Every failure is logged and the session carries
//! on in memory.

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};

use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::indexer::{CombinationKey, KeyMode};
use crate::plan::BatchPlan;
use crate::progress::ProgressSnapshot;
use crate::tracker::{GroupId, UniquenessTracker};

/// Storage key of the session blob.
pub const SESSION_KEY: &str = "traitmint.session";

/// Storage key of the latest progress snapshot.
pub const PROGRESS_KEY: &str = "traitmint.progress";

/// Current blob version.
pub const SESSION_VERSION: u32 = 1;

/// String key/value storage.
///
/// Methods take `&self`; implementations that need mutation use interior
/// mutability, as the browser storage API does.
pub trait SessionStore {
    /// Reads a value. `Ok(None)` means the key is absent.
    fn read(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Writes a value, replacing any previous one.
    fn write(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Removes a value. Removing an absent key succeeds.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-memory [`SessionStore`] for tests and hosts without storage.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RefCell<BTreeMap<String, String>>,
    fail_writes: Cell<bool>,
    writes: Cell<u32>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later write fail with [`StorageError::WriteFailed`].
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.set(fail);
    }

    /// Number of successful writes.
    #[must_use]
    pub fn write_count(&self) -> u32 {
        self.writes.get()
    }

    /// Returns a copy of the stored value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.borrow().get(key).cloned()
    }

    /// Number of keys present.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl SessionStore for MemoryStore {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.get(key))
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        if self.fail_writes.get() {
            return Err(StorageError::WriteFailed {
                key: key.to_string(),
                reason: String::from("quota exceeded"),
            });
        }
        self.entries
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        self.writes.set(self.writes.get().saturating_add(1));
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.borrow_mut().remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Session blob
// ---------------------------------------------------------------------------

/// One uniqueness group as stored: `[group, mode, [keys], [legacy keys]]`.
///
/// The legacy list holds migrated keys of a positional group and is omitted
/// when empty.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedGroup(
    pub GroupId,
    pub KeyMode,
    pub Vec<CombinationKey>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")] pub Vec<CombinationKey>,
);

/// Everything needed to resume a session after a reload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersistedSession {
    /// Always [`SESSION_VERSION`] when written.
    pub version: u32,
    /// Items requested.
    pub total_items: usize,
    /// Items per batch. Zero in blobs that predate the field.
    #[serde(default)]
    pub batch_size: usize,
    /// Completed batch numbers, increasing.
    pub completed_batches: Vec<u32>,
    /// Uniqueness sets.
    pub uniqueness: Vec<PersistedGroup>,
    /// Progress at the time of writing.
    pub progress: Option<ProgressSnapshot>,
}

#[derive(Deserialize)]
struct VersionProbe {
    version: u32,
}

impl PersistedSession {
    /// Captures the state of a running session.
    #[must_use]
    pub fn capture(
        plan: &BatchPlan,
        tracker: &UniquenessTracker,
        progress: Option<ProgressSnapshot>,
    ) -> Self {
        Self {
            version: SESSION_VERSION,
            total_items: plan.total_items(),
            batch_size: plan.batch_size(),
            completed_batches: plan.completed_batches().to_vec(),
            uniqueness: tracker.to_persisted(),
            progress,
        }
    }

    /// Serializes to JSON.
    pub fn encode(&self) -> Result<String, StorageError> {
        serde_json::to_string(self).map_err(|err| StorageError::Encode(err.to_string()))
    }

    /// Parses a blob, returning `None` for other versions or malformed
    /// input.
    #[must_use]
    pub fn decode(raw: &str) -> Option<Self> {
        match serde_json::from_str::<VersionProbe>(raw) {
            Ok(probe) if probe.version != SESSION_VERSION => {
                tracing::warn!(
                    found = probe.version,
                    expected = SESSION_VERSION,
                    "ignoring persisted session with unknown version"
                );
                return None;
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(error = %err, "ignoring unreadable persisted session");
                return None;
            }
        }

        match serde_json::from_str(raw) {
            Ok(session) => Some(session),
            Err(err) => {
                tracing::warn!(error = %err, "ignoring malformed persisted session");
                None
            }
        }
    }

    /// Rebuilds the batch plan this blob describes.
    #[must_use]
    pub fn plan(&self) -> BatchPlan {
        BatchPlan::new(self.total_items, self.batch_size)
            .with_completed(self.completed_batches.iter().copied())
    }
}

impl UniquenessTracker {
    /// Exports every group for the session blob.
    #[must_use]
    pub fn to_persisted(&self) -> Vec<PersistedGroup> {
        self.export_groups()
            .into_iter()
            .map(|(group, mode, keys)| {
                let legacy = self.legacy_keys(&group);
                PersistedGroup(group, mode, keys, legacy)
            })
            .collect()
    }

    /// Imports groups from a session blob.
    ///
    /// Groups already registered keep their mode; string keys from older
    /// sessions are migrated.
    pub fn from_persisted(&mut self, groups: Vec<PersistedGroup>) {
        for PersistedGroup(group, mode, keys, legacy) in groups {
            self.import_group(group.clone(), mode, keys);
            if !legacy.is_empty() {
                self.import_legacy_keys(&group, legacy);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Store helpers
// ---------------------------------------------------------------------------

/// Loads the persisted session, if a valid one exists.
pub fn load_session(store: &dyn SessionStore) -> Option<PersistedSession> {
    match store.read(SESSION_KEY) {
        Ok(Some(raw)) => PersistedSession::decode(&raw),
        Ok(None) => None,
        Err(err) => {
            tracing::warn!(error = %err, "session storage read failed");
            None
        }
    }
}

/// Writes the session blob. Returns `false` if it was not stored.
pub fn save_session(store: &dyn SessionStore, session: &PersistedSession) -> bool {
    let result = session
        .encode()
        .and_then(|raw| store.write(SESSION_KEY, &raw));
    match result {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(error = %err, "session not persisted, continuing in memory");
            false
        }
    }
}

/// Writes a progress snapshot. Returns `false` if it was not stored.
pub fn save_progress(store: &dyn SessionStore, snapshot: &ProgressSnapshot) -> bool {
    let result = serde_json::to_string(snapshot)
        .map_err(|err| StorageError::Encode(err.to_string()))
        .and_then(|raw| store.write(PROGRESS_KEY, &raw));
    match result {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(error = %err, "progress not persisted");
            false
        }
    }
}

/// Loads the last persisted progress snapshot.
pub fn load_progress(store: &dyn SessionStore) -> Option<ProgressSnapshot> {
    let raw = match store.read(PROGRESS_KEY) {
        Ok(raw) => raw?,
        Err(err) => {
            tracing::warn!(error = %err, "progress read failed");
            return None;
        }
    };
    serde_json::from_str(&raw)
        .inspect_err(|err| tracing::warn!(error = %err, "ignoring malformed progress snapshot"))
        .ok()
}

/// Removes the session blob and progress snapshot.
pub fn clear_session(store: &dyn SessionStore) {
    for key in [SESSION_KEY, PROGRESS_KEY] {
        if let Err(err) = store.remove(key) {
            tracing::warn!(error = %err, key, "failed to clear persisted session");
        }
    }
}
