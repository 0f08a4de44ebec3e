// Copyright 2026 the Traitmint Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error taxonomy.
//!
//! Only [`SessionError`] ever escapes the controller. Indexing errors are
//! absorbed by the string-key fallback, item and storage errors are logged
//! and the session carries on.

use alloc::string::String;

use thiserror::Error as ThisError;

use crate::controller::ControllerState;

// ---------------------------------------------------------------------------
// Indexing
// ---------------------------------------------------------------------------

/// A combination that cannot be packed or a key that cannot be parsed.
///
/// Never leaves the indexer and tracker: the caller falls back to a string
/// key or drops the entry.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum IndexError {
    /// More layers than fit in a packed key.
    #[error("cannot pack {len} trait ids into a 64-bit key (max {max})", max = crate::indexer::MAX_PACKED_LAYERS)]
    IndexingOverflow {
        /// Layers in the combination.
        len: usize,
    },

    /// A trait id outside the 8-bit field range.
    #[error("trait id {value} at layer {position} exceeds 255")]
    InvalidTraitId {
        /// Layer position.
        position: usize,
        /// Offending trait id.
        value: u32,
    },

    /// A fallback key string that does not parse back into trait ids.
    #[error("malformed combination key '{key}'")]
    MalformedKey {
        /// The key as stored.
        key: String,
    },
}

// ---------------------------------------------------------------------------
// Item and storage failures
// ---------------------------------------------------------------------------

/// The external compositor failed for one candidate.
///
/// The item is dropped and the batch continues.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("generation failed for item {index}: {reason}")]
pub struct ItemError {
    /// Collection slot.
    pub index: usize,
    /// Compositor message.
    pub reason: String,
}

impl ItemError {
    /// Creates an item failure for collection slot `index`.
    #[must_use]
    pub fn new(index: usize, reason: impl Into<String>) -> Self {
        Self {
            index,
            reason: reason.into(),
        }
    }
}

/// Session storage could not be read or written.
///
/// The session proceeds in memory only.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum StorageError {
    /// No storage on this host.
    #[error("session storage unavailable")]
    Unavailable,

    /// A write or remove was refused, usually over quota.
    #[error("session storage rejected write of '{key}': {reason}")]
    WriteFailed {
        /// Storage key.
        key: String,
        /// Host message.
        reason: String,
    },

    /// A read threw.
    #[error("session storage read of '{key}' failed: {reason}")]
    ReadFailed {
        /// Storage key.
        key: String,
        /// Host message.
        reason: String,
    },

    /// Serialization failed.
    #[error("session blob could not be encoded: {0}")]
    Encode(String),
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Errors that end or refuse a controller operation.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum SessionError {
    /// Too many consecutive candidates failed to produce an accepted item.
    ///
    /// Either the combination space is smaller than the request or the
    /// compositor is failing systemically. The session is over; the caller
    /// should offer retry or cancel.
    #[error(
        "generation stalled after {consecutive_failures} consecutive failures in batch {batch} \
         ({generated} items generated)"
    )]
    SystemicGenerationFailure {
        /// Failures in a row when the session gave up.
        consecutive_failures: u32,
        /// Batch that was running.
        batch: u32,
        /// Items accepted before giving up.
        generated: usize,
        /// Message of the last render failure, if any.
        last_failure: Option<String>,
    },

    /// A session must generate at least one item.
    #[error("total item count must be positive, got {0}")]
    InvalidTotal(usize),

    /// The requested operation is not valid in the current state.
    #[error("cannot {operation} while {from:?}")]
    InvalidTransition {
        /// State at the time of the call.
        from: ControllerState,
        /// Name of the rejected operation.
        operation: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use alloc::string::ToString;

    use super::*;

    #[test]
    fn messages_name_the_failing_piece() {
        assert_eq!(
            IndexError::IndexingOverflow { len: 9 }.to_string(),
            "cannot pack 9 trait ids into a 64-bit key (max 8)"
        );
        assert_eq!(
            ItemError::new(12, "layer image missing").to_string(),
            "generation failed for item 12: layer image missing"
        );
        let stalled = SessionError::SystemicGenerationFailure {
            consecutive_failures: 100,
            batch: 3,
            generated: 2_004,
            last_failure: None,
        };
        assert_eq!(
            stalled.to_string(),
            "generation stalled after 100 consecutive failures in batch 3 (2004 items generated)"
        );
        assert_eq!(
            SessionError::InvalidTransition {
                from: ControllerState::Cancelled,
                operation: "resume",
            }
            .to_string(),
            "cannot resume while Cancelled"
        );
    }
}
