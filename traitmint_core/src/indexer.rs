// Copyright 2026 the Traitmint Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Combination keys.
//!
//! A combination of up to [`MAX_PACKED_LAYERS`] trait ids in `0..=255` packs
//! into a single `u64`, one byte per layer: layer 0 occupies bits 0–7,
//! layer 1 bits 8–15, and so on. Anything larger falls back to a
//! delimiter-joined string. [`CombinationKey`] carries either form so a set
//! can hold both without caring which one it got.
//!
//! Everything here is a pure function.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::{self, Write as _};

use serde::{Deserialize, Serialize};

use crate::error::IndexError;

/// Number of 8-bit layer fields in a packed key.
pub const MAX_PACKED_LAYERS: usize = 8;

/// Largest trait id that fits a packed field.
pub const MAX_PACKED_TRAIT_ID: u32 = 0xFF;

/// Separator used when writing fallback keys.
pub const KEY_DELIMITER: char = ',';

/// Separators accepted when parsing fallback keys written by older sessions.
const LEGACY_DELIMITERS: [char; 4] = [KEY_DELIMITER, '-', '|', '_'];

/// How a combination's layer order participates in its identity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyMode {
    /// Layer order matters: `[1, 5]` and `[5, 1]` are different items.
    ///
    /// Used for general duplicate avoidance.
    #[default]
    Positional,
    /// Only the set of trait ids matters: `[1, 5]` and `[5, 1]` collide.
    ///
    /// Used for strict-pair tracking.
    Unordered,
}

/// Identity of one combination inside a uniqueness set.
///
/// Orders packed keys before fallback keys.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CombinationKey {
    /// Fast path: one byte per layer.
    Packed(u64),
    /// Too many layers or an id above 255.
    Fallback(String),
}

impl CombinationKey {
    /// Returns `true` for the packed representation.
    #[inline]
    #[must_use]
    pub const fn is_packed(&self) -> bool {
        matches!(self, Self::Packed(_))
    }
}

impl fmt::Debug for CombinationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Packed(k) => write!(f, "Packed({k:#018x})"),
            Self::Fallback(s) => write!(f, "Fallback({s:?})"),
        }
    }
}

/// Packs up to eight trait ids into a `u64`.
///
/// Fails with [`IndexError::IndexingOverflow`] for more than
/// [`MAX_PACKED_LAYERS`] ids and [`IndexError::InvalidTraitId`] for any id
/// above [`MAX_PACKED_TRAIT_ID`]. Callers normally go through
/// [`create_key`], which handles both by falling back to a string.
pub fn pack(trait_ids: &[u32]) -> Result<u64, IndexError> {
    if trait_ids.len() > MAX_PACKED_LAYERS {
        return Err(IndexError::IndexingOverflow {
            len: trait_ids.len(),
        });
    }

    let mut key = 0_u64;
    for (position, &value) in trait_ids.iter().enumerate() {
        if value > MAX_PACKED_TRAIT_ID {
            return Err(IndexError::InvalidTraitId { position, value });
        }
        key |= u64::from(value) << (position * 8);
    }

    Ok(key)
}

/// Unpacks `expected_len` trait ids from a key produced by [`pack`].
///
/// The result for keys that did not come from `pack` with the same length is
/// unspecified. `expected_len` is clamped to [`MAX_PACKED_LAYERS`].
#[must_use]
pub fn unpack(key: u64, expected_len: usize) -> Vec<u32> {
    let bytes = key.to_le_bytes();
    bytes[..expected_len.min(MAX_PACKED_LAYERS)]
        .iter()
        .map(|&b| u32::from(b))
        .collect()
}

/// Builds the key for a combination, never failing.
///
/// Packs positionally when possible; otherwise returns the trait ids sorted
/// ascending and joined by [`KEY_DELIMITER`].
#[must_use]
pub fn create_key(trait_ids: &[u32]) -> CombinationKey {
    match pack(trait_ids) {
        Ok(key) => CombinationKey::Packed(key),
        Err(_) => CombinationKey::Fallback(join_sorted(trait_ids)),
    }
}

/// Builds the key for a combination under an explicit [`KeyMode`].
///
/// [`KeyMode::Positional`] keeps layer order in both representations.
/// [`KeyMode::Unordered`] sorts the ids first, so any permutation of the same
/// ids yields the same key.
#[must_use]
pub fn create_key_with(trait_ids: &[u32], mode: KeyMode) -> CombinationKey {
    match mode {
        KeyMode::Positional => match pack(trait_ids) {
            Ok(key) => CombinationKey::Packed(key),
            Err(_) => CombinationKey::Fallback(join(trait_ids.iter().copied())),
        },
        KeyMode::Unordered => {
            let mut sorted = trait_ids.to_vec();
            sorted.sort_unstable();
            match pack(&sorted) {
                Ok(key) => CombinationKey::Packed(key),
                Err(_) => CombinationKey::Fallback(join(sorted.into_iter())),
            }
        }
    }
}

/// Parses a fallback key back into trait ids.
///
/// Accepts the current delimiter as well as the separators older sessions
/// used. Empty keys and non-numeric fields are rejected.
pub fn parse_fallback(key: &str) -> Result<Vec<u32>, IndexError> {
    let malformed = || IndexError::MalformedKey {
        key: String::from(key),
    };

    let trimmed = key.trim();
    if trimmed.is_empty() {
        return Err(malformed());
    }

    trimmed
        .split(LEGACY_DELIMITERS)
        .map(|field| field.trim().parse::<u32>().map_err(|_| malformed()))
        .collect()
}

fn join_sorted(trait_ids: &[u32]) -> String {
    let mut sorted = trait_ids.to_vec();
    sorted.sort_unstable();
    join(sorted.into_iter())
}

fn join(ids: impl Iterator<Item = u32>) -> String {
    let mut out = String::new();
    for (i, id) in ids.enumerate() {
        if i > 0 {
            out.push(KEY_DELIMITER);
        }
        // Writing into a String cannot fail.
        let _ = write!(out, "{id}");
    }
    out
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use proptest::prelude::*;

    use super::*;

    #[test]
    fn pack_places_layer_zero_in_low_byte() {
        assert_eq!(pack(&[0x01]).unwrap(), 0x01);
        assert_eq!(pack(&[0x01, 0x02]).unwrap(), 0x0201);
        assert_eq!(
            pack(&[1, 2, 3, 4, 5, 6, 7, 255]).unwrap(),
            0xFF07_0605_0403_0201
        );
        assert_eq!(pack(&[]).unwrap(), 0, "empty combination packs to zero");
    }

    #[test]
    fn pack_rejects_nine_layers() {
        let err = pack(&[0; 9]).unwrap_err();
        assert_eq!(err, IndexError::IndexingOverflow { len: 9 });
    }

    #[test]
    fn pack_rejects_wide_trait_id() {
        let err = pack(&[3, 256, 4]).unwrap_err();
        assert_eq!(
            err,
            IndexError::InvalidTraitId {
                position: 1,
                value: 256
            }
        );
    }

    #[test]
    fn create_key_falls_back_to_sorted_string() {
        assert_eq!(
            create_key(&[10, 1, 300]),
            CombinationKey::Fallback(String::from("1,10,300"))
        );
        let nine: Vec<u32> = (0..9).rev().collect();
        assert_eq!(
            create_key(&nine),
            CombinationKey::Fallback(String::from("0,1,2,3,4,5,6,7,8"))
        );
    }

    #[test]
    fn positional_mode_distinguishes_order() {
        let a = create_key_with(&[1, 5, 10], KeyMode::Positional);
        let b = create_key_with(&[10, 1, 5], KeyMode::Positional);
        assert_ne!(a, b);

        let wide_a = create_key_with(&[1, 500], KeyMode::Positional);
        let wide_b = create_key_with(&[500, 1], KeyMode::Positional);
        assert_ne!(wide_a, wide_b, "fallback keeps layer order too");
    }

    #[test]
    fn unordered_mode_collides_permutations() {
        let a = create_key_with(&[1, 5, 10], KeyMode::Unordered);
        let b = create_key_with(&[10, 1, 5], KeyMode::Unordered);
        assert_eq!(a, b);
        assert!(a.is_packed());

        let wide_a = create_key_with(&[700, 2], KeyMode::Unordered);
        let wide_b = create_key_with(&[2, 700], KeyMode::Unordered);
        assert_eq!(wide_a, wide_b);
        assert_eq!(wide_a, CombinationKey::Fallback(String::from("2,700")));
    }

    #[test]
    fn parse_fallback_accepts_legacy_separators() {
        assert_eq!(parse_fallback("1,10,300").unwrap(), vec![1, 10, 300]);
        assert_eq!(parse_fallback("4-2-9").unwrap(), vec![4, 2, 9]);
        assert_eq!(parse_fallback(" 7|8 ").unwrap(), vec![7, 8]);
        assert_eq!(parse_fallback("3_3").unwrap(), vec![3, 3]);
    }

    #[test]
    fn parse_fallback_rejects_garbage() {
        assert!(parse_fallback("").is_err());
        assert!(parse_fallback("1,,2").is_err());
        assert!(parse_fallback("hat-red").is_err());
    }

    #[test]
    fn fallback_key_serializes_as_plain_string() {
        let json = serde_json::to_string(&create_key(&[300, 2])).unwrap();
        assert_eq!(json, "\"2,300\"");
        let packed = serde_json::to_string(&create_key(&[1, 2])).unwrap();
        assert_eq!(packed, "513");
    }

    proptest! {
        #[test]
        fn unpack_inverts_pack(ids in proptest::collection::vec(0_u32..=255, 0..=8)) {
            let key = pack(&ids).unwrap();
            prop_assert_eq!(unpack(key, ids.len()), ids);
        }

        #[test]
        fn create_key_never_fails_out_of_range(
            ids in proptest::collection::vec(0_u32..2000, 9..16),
        ) {
            prop_assert!(pack(&ids).is_err());
            let is_fallback = matches!(create_key(&ids), CombinationKey::Fallback(_));
            prop_assert!(is_fallback);
        }
    }
}
