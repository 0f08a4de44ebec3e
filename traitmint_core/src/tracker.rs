// Copyright 2026 the Traitmint Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-session uniqueness sets.
//!
//! A [`UniquenessTracker`] owns one set of [`CombinationKey`]s per constraint
//! group. The [global](GroupId::global) group rejects repeated combinations;
//! each [`StrictPairRule`] gets an [`Unordered`](KeyMode::Unordered) group
//! that rejects a pair of trait ids (taken from two layers) once it has been
//! used.
//!
//! The tracker is a session object: the controller creates it at session
//! start and drops it on cancel or completion. Nothing here is global.

use alloc::borrow::ToOwned;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use hashbrown::{HashMap, HashSet};
use serde::{Deserialize, Serialize};

use crate::indexer::{self, CombinationKey, KeyMode};

const GLOBAL_GROUP: &str = "global";
const STRICT_PAIR_PREFIX: &str = "strict-pair:";

/// Name of a constraint group.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(String);

impl GroupId {
    /// The implicit group every accepted combination lands in.
    #[must_use]
    pub fn global() -> Self {
        Self(GLOBAL_GROUP.to_owned())
    }

    /// The group backing strict-pair rule `rule`.
    #[must_use]
    pub fn strict_pair(rule: &str) -> Self {
        Self(format!("{STRICT_PAIR_PREFIX}{rule}"))
    }

    /// Wraps an arbitrary group name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The group name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GroupId({})", self.0)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A rule that forbids reusing the same pair of traits across two layers.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StrictPairRule {
    /// Stable rule identifier, used to name the backing group.
    pub id: String,
    /// First layer of the pair (position in the combination).
    pub first_layer: usize,
    /// Second layer of the pair.
    pub second_layer: usize,
}

impl StrictPairRule {
    /// Creates a rule over two layer positions.
    #[must_use]
    pub fn new(id: impl Into<String>, first_layer: usize, second_layer: usize) -> Self {
        Self {
            id: id.into(),
            first_layer,
            second_layer,
        }
    }

    /// The group this rule records into.
    #[must_use]
    pub fn group(&self) -> GroupId {
        GroupId::strict_pair(&self.id)
    }

    /// The pair of trait ids `combination` places on this rule's layers, if it
    /// has both.
    #[must_use]
    pub fn pair(&self, combination: &[u32]) -> Option<[u32; 2]> {
        Some([
            *combination.get(self.first_layer)?,
            *combination.get(self.second_layer)?,
        ])
    }
}

/// Outcome of checking a candidate against every group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Admission {
    /// Not seen in any group.
    Accept,
    /// The global group already holds this combination.
    Duplicate,
    /// The pair for strict-pair rule `rule` was already used.
    StrictPairViolation {
        /// Identifier of the violated rule.
        rule: String,
    },
}

impl Admission {
    /// Returns `true` for [`Admission::Accept`].
    #[must_use]
    pub const fn is_accept(&self) -> bool {
        matches!(self, Self::Accept)
    }
}

/// Result of [`UniquenessTracker::migrate`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Legacy keys converted to the packed representation.
    pub packed: usize,
    /// Legacy keys that still need the string representation.
    pub fallback: usize,
    /// Legacy keys that failed to parse and were dropped.
    pub dropped: usize,
}

#[derive(Clone, Debug, Default)]
struct GroupSet {
    mode: KeyMode,
    keys: HashSet<CombinationKey>,
    /// Migrated keys of a positional group. Legacy strings were sorted, so
    /// they are held as unordered keys and match any layer order.
    legacy: HashSet<CombinationKey>,
}

impl GroupSet {
    fn contains(&self, trait_ids: &[u32]) -> bool {
        self.keys
            .contains(&indexer::create_key_with(trait_ids, self.mode))
            || (!self.legacy.is_empty()
                && self
                    .legacy
                    .contains(&indexer::create_key_with(trait_ids, KeyMode::Unordered)))
    }

    /// Inserts an unordered key parsed from a legacy string.
    fn insert_legacy(&mut self, key: CombinationKey) {
        match self.mode {
            KeyMode::Positional => self.legacy.insert(key),
            KeyMode::Unordered => self.keys.insert(key),
        };
    }

    fn len(&self) -> usize {
        self.keys.len() + self.legacy.len()
    }

    fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.legacy.is_empty()
    }
}

/// Sets of accepted combination keys, one per constraint group.
#[derive(Clone, Debug)]
pub struct UniquenessTracker {
    groups: HashMap<GroupId, GroupSet>,
    global: GroupId,
    rules: Vec<StrictPairRule>,
    rule_groups: Vec<GroupId>,
}

impl Default for UniquenessTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl UniquenessTracker {
    /// Creates a tracker with only the global group.
    #[must_use]
    pub fn new() -> Self {
        let mut groups = HashMap::new();
        groups.insert(GroupId::global(), GroupSet::default());
        Self {
            groups,
            global: GroupId::global(),
            rules: Vec::new(),
            rule_groups: Vec::new(),
        }
    }

    /// Creates a tracker with the global group plus one group per rule.
    #[must_use]
    pub fn with_strict_pairs(rules: impl IntoIterator<Item = StrictPairRule>) -> Self {
        let mut tracker = Self::new();
        for rule in rules {
            let group = rule.group();
            tracker.register_group(group.clone(), KeyMode::Unordered);
            tracker.rules.push(rule);
            tracker.rule_groups.push(group);
        }
        tracker
    }

    /// Declares `group` with the given key mode.
    ///
    /// Re-registering an existing group keeps its keys and replaces the mode
    /// only while the group is still empty.
    pub fn register_group(&mut self, group: GroupId, mode: KeyMode) {
        let set = self.groups.entry(group).or_default();
        if set.is_empty() {
            set.mode = mode;
        }
    }

    /// The strict-pair rules this tracker enforces.
    #[must_use]
    pub fn rules(&self) -> &[StrictPairRule] {
        &self.rules
    }

    /// Returns `true` if `trait_ids` was previously added to `group`.
    ///
    /// Unknown groups have seen nothing.
    #[must_use]
    pub fn has(&self, group: &GroupId, trait_ids: &[u32]) -> bool {
        self.groups
            .get(group)
            .is_some_and(|set| set.contains(trait_ids))
    }

    /// Records `trait_ids` in `group` and returns its key.
    ///
    /// Adding the same combination twice leaves the set unchanged. A group
    /// that was never registered is created in positional mode.
    pub fn add(&mut self, group: &GroupId, trait_ids: &[u32]) -> CombinationKey {
        let set = self.group_mut(group);
        let key = indexer::create_key_with(trait_ids, set.mode);
        set.keys.insert(key.clone());
        key
    }

    /// Converts legacy string keys into this tracker's representation.
    ///
    /// Legacy keys hold sorted trait ids, so layer order is already lost.
    /// Each key is re-keyed as an unordered key, packed whenever the ids fit.
    /// In a positional group these land in a side set that matches the same
    /// ids in any layer order, which can reject a combination that only
    /// shares its traits with a migrated one but never misses a repeat.
    /// Keys that do not parse are logged and dropped.
    pub fn migrate<'a>(
        &mut self,
        group: &GroupId,
        legacy_keys: impl IntoIterator<Item = &'a str>,
    ) -> MigrationReport {
        let mut report = MigrationReport::default();
        let set = self.group_mut(group);

        for legacy in legacy_keys {
            match indexer::parse_fallback(legacy) {
                Ok(ids) => {
                    let key = indexer::create_key_with(&ids, KeyMode::Unordered);
                    if key.is_packed() {
                        report.packed += 1;
                    } else {
                        report.fallback += 1;
                    }
                    set.insert_legacy(key);
                }
                Err(err) => {
                    tracing::warn!(group = %group, %err, "dropping unparsable legacy combination key");
                    report.dropped += 1;
                }
            }
        }

        report
    }

    /// Checks a candidate against the global group and every strict-pair
    /// rule without recording it.
    #[must_use]
    pub fn admit(&self, combination: &[u32]) -> Admission {
        if self.has(&self.global, combination) {
            return Admission::Duplicate;
        }
        for (rule, group) in self.rules.iter().zip(&self.rule_groups) {
            if let Some(pair) = rule.pair(combination)
                && self.has(group, &pair)
            {
                return Admission::StrictPairViolation {
                    rule: rule.id.clone(),
                };
            }
        }
        Admission::Accept
    }

    /// Records an accepted combination in the global group and every
    /// strict-pair group it touches. Returns the global key.
    pub fn record(&mut self, combination: &[u32]) -> CombinationKey {
        for (rule, group) in self.rules.iter().zip(&self.rule_groups) {
            if let Some(pair) = rule.pair(combination)
                && let Some(set) = self.groups.get_mut(group)
            {
                set.keys
                    .insert(indexer::create_key_with(&pair, set.mode));
            }
        }
        let global = self.global.clone();
        self.add(&global, combination)
    }

    fn group_mut(&mut self, group: &GroupId) -> &mut GroupSet {
        self.groups.entry(group.clone()).or_default()
    }

    /// Number of keys in `group` (zero for unknown groups).
    #[must_use]
    pub fn len(&self, group: &GroupId) -> usize {
        self.groups.get(group).map_or(0, GroupSet::len)
    }

    /// Returns `true` when no group holds any key.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.values().all(GroupSet::is_empty)
    }

    /// Number of registered groups.
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Forgets every key, keeping groups and rules.
    pub fn clear(&mut self) {
        for set in self.groups.values_mut() {
            set.keys.clear();
            set.legacy.clear();
        }
    }

    /// Groups in name order, each with its mode and keys in key order.
    #[must_use]
    pub fn export_groups(&self) -> Vec<(GroupId, KeyMode, Vec<CombinationKey>)> {
        let mut out: Vec<_> = self
            .groups
            .iter()
            .map(|(id, set)| {
                let mut keys: Vec<CombinationKey> = set.keys.iter().cloned().collect();
                keys.sort_unstable();
                (id.clone(), set.mode, keys)
            })
            .collect();
        out.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Migrated legacy keys of `group`, in key order.
    ///
    /// Empty for unordered groups, which hold migrated keys directly.
    #[must_use]
    pub fn legacy_keys(&self, group: &GroupId) -> Vec<CombinationKey> {
        let mut keys: Vec<CombinationKey> = self
            .groups
            .get(group)
            .map(|set| set.legacy.iter().cloned().collect())
            .unwrap_or_default();
        keys.sort_unstable();
        keys
    }

    /// Restores keys returned by [`legacy_keys`](Self::legacy_keys).
    pub fn import_legacy_keys(&mut self, group: &GroupId, keys: Vec<CombinationKey>) {
        let set = self.group_mut(group);
        for key in keys {
            set.insert_legacy(key);
        }
    }

    /// Loads keys exported by [`export_groups`](Self::export_groups).
    ///
    /// Packed keys and string keys already in the group's form are inserted
    /// as-is. Other string keys come from older sessions and go through
    /// [`migrate`](Self::migrate).
    pub fn import_group(&mut self, group: GroupId, mode: KeyMode, keys: Vec<CombinationKey>) {
        self.register_group(group.clone(), mode);
        let mut legacy = Vec::new();
        if let Some(set) = self.groups.get_mut(&group) {
            for key in keys {
                let raw = match key {
                    CombinationKey::Packed(_) => {
                        set.keys.insert(key);
                        continue;
                    }
                    CombinationKey::Fallback(raw) => raw,
                };
                let current = indexer::parse_fallback(&raw)
                    .ok()
                    .map(|ids| indexer::create_key_with(&ids, set.mode));
                match current {
                    Some(key) if matches!(&key, CombinationKey::Fallback(s) if *s == raw) => {
                        set.keys.insert(key);
                    }
                    _ => legacy.push(raw),
                }
            }
        }
        if !legacy.is_empty() {
            let report = self.migrate(&group, legacy.iter().map(String::as_str));
            tracing::debug!(
                group = %group,
                packed = report.packed,
                fallback = report.fallback,
                dropped = report.dropped,
                "restored string-keyed combinations"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use proptest::prelude::*;

    use super::*;

    #[test]
    fn has_is_false_until_added() {
        let mut tracker = UniquenessTracker::new();
        let g = GroupId::global();
        assert!(!tracker.has(&g, &[1, 2, 3]));
        let key = tracker.add(&g, &[1, 2, 3]);
        assert!(key.is_packed());
        assert!(tracker.has(&g, &[1, 2, 3]));
        assert!(!tracker.has(&g, &[3, 2, 1]), "global group is positional");
    }

    #[test]
    fn groups_are_independent() {
        let mut tracker = UniquenessTracker::new();
        tracker.add(&GroupId::named("a"), &[4, 4]);
        assert!(tracker.has(&GroupId::named("a"), &[4, 4]));
        assert!(!tracker.has(&GroupId::named("b"), &[4, 4]));
        assert!(!tracker.has(&GroupId::global(), &[4, 4]));
    }

    #[test]
    fn fallback_keys_are_tracked_transparently() {
        let mut tracker = UniquenessTracker::new();
        let g = GroupId::global();
        let key = tracker.add(&g, &[1, 999]);
        assert!(!key.is_packed());
        assert!(tracker.has(&g, &[1, 999]));
        assert!(!tracker.has(&g, &[999, 1]));

        let nine = [0, 1, 2, 3, 4, 5, 6, 7, 8];
        tracker.add(&g, &nine);
        assert!(tracker.has(&g, &nine));
        assert_eq!(tracker.len(&g), 2);
    }

    #[test]
    fn strict_pair_blocks_reused_pair_in_any_order() {
        let rule = StrictPairRule::new("hat-eyes", 0, 2);
        let mut tracker = UniquenessTracker::with_strict_pairs([rule]);

        assert_eq!(tracker.admit(&[1, 7, 3]), Admission::Accept);
        tracker.record(&[1, 7, 3]);

        assert_eq!(tracker.admit(&[1, 7, 3]), Admission::Duplicate);
        assert_eq!(
            tracker.admit(&[1, 8, 3]),
            Admission::StrictPairViolation {
                rule: String::from("hat-eyes")
            }
        );
        // Same ids swapped across the two layers also collide.
        assert!(!tracker.admit(&[3, 9, 1]).is_accept());
        assert!(tracker.admit(&[2, 7, 3]).is_accept());
    }

    #[test]
    fn strict_pair_ignores_short_combinations() {
        let rule = StrictPairRule::new("r", 0, 5);
        let mut tracker = UniquenessTracker::with_strict_pairs([rule]);
        tracker.record(&[1, 2]);
        assert_eq!(tracker.len(&GroupId::strict_pair("r")), 0);
        assert!(tracker.admit(&[1, 3]).is_accept());
    }

    #[test]
    fn migrate_packs_legacy_keys_and_drops_garbage() {
        let mut tracker = UniquenessTracker::new();
        let g = GroupId::strict_pair("legacy");
        tracker.register_group(g.clone(), KeyMode::Unordered);

        let report = tracker.migrate(&g, ["5-1", "2,900", "not-a-key", ""]);
        assert_eq!(
            report,
            MigrationReport {
                packed: 1,
                fallback: 1,
                dropped: 2
            }
        );
        assert!(tracker.has(&g, &[1, 5]));
        assert!(tracker.has(&g, &[900, 2]));
        assert_eq!(tracker.len(&g), 2);
    }

    #[test]
    fn migrated_keys_in_a_positional_group_match_any_layer_order() {
        let mut tracker = UniquenessTracker::new();
        let g = GroupId::global();
        let report = tracker.migrate(&g, ["1,300", "2-7"]);
        assert_eq!(
            report,
            MigrationReport {
                packed: 1,
                fallback: 1,
                dropped: 0
            }
        );

        assert!(tracker.has(&g, &[300, 1]));
        assert!(tracker.has(&g, &[1, 300]));
        assert_eq!(tracker.admit(&[7, 2]), Admission::Duplicate);
        assert!(!tracker.has(&g, &[1, 301]));
        assert_eq!(tracker.len(&g), 2);
        assert_eq!(
            tracker.legacy_keys(&g),
            vec![
                CombinationKey::Packed(0x0702),
                CombinationKey::Fallback(String::from("1,300"))
            ]
        );

        tracker.add(&g, &[300, 1]);
        let exported = tracker.export_groups();
        assert!(exported[0].2.contains(&CombinationKey::Fallback(String::from("300,1"))));
        tracker.clear();
        assert!(tracker.is_empty());
        assert!(!tracker.has(&g, &[1, 300]));
    }

    #[test]
    fn import_keeps_current_string_keys_positional() {
        let mut tracker = UniquenessTracker::new();
        tracker.record(&[300, 1]);

        let mut restored = UniquenessTracker::new();
        for (group, mode, keys) in tracker.export_groups() {
            restored.import_group(group, mode, keys);
        }
        assert!(restored.has(&GroupId::global(), &[300, 1]));
        assert!(!restored.has(&GroupId::global(), &[1, 300]));
        assert!(restored.legacy_keys(&GroupId::global()).is_empty());
    }

    #[test]
    fn export_import_preserves_membership() {
        let mut tracker =
            UniquenessTracker::with_strict_pairs([StrictPairRule::new("bg-body", 0, 1)]);
        tracker.record(&[3, 4, 5]);
        tracker.record(&[300, 4, 5]);

        let mut restored =
            UniquenessTracker::with_strict_pairs([StrictPairRule::new("bg-body", 0, 1)]);
        for (group, mode, keys) in tracker.export_groups() {
            restored.import_group(group, mode, keys);
        }

        assert_eq!(restored.admit(&[3, 4, 5]), Admission::Duplicate);
        assert_eq!(restored.admit(&[300, 4, 5]), Admission::Duplicate);
        assert!(!restored.admit(&[4, 3, 9]).is_accept());
        assert_eq!(restored.len(&GroupId::global()), 2);
    }

    #[test]
    fn export_is_ordered() {
        let mut tracker = UniquenessTracker::new();
        tracker.add(&GroupId::named("zeta"), &[1]);
        tracker.add(&GroupId::named("alpha"), &[9]);
        tracker.add(&GroupId::named("alpha"), &[2]);
        let names: Vec<String> = tracker
            .export_groups()
            .iter()
            .map(|(g, _, _)| String::from(g.as_str()))
            .collect();
        assert_eq!(names, vec!["alpha", "global", "zeta"]);
        let alpha = &tracker.export_groups()[0].2;
        assert_eq!(
            alpha,
            &vec![CombinationKey::Packed(2), CombinationKey::Packed(9)]
        );
    }

    #[test]
    fn clear_forgets_keys_but_keeps_rules() {
        let mut tracker = UniquenessTracker::with_strict_pairs([StrictPairRule::new("x", 0, 1)]);
        tracker.record(&[1, 2]);
        assert!(!tracker.is_empty());
        tracker.clear();
        assert!(tracker.is_empty());
        assert_eq!(tracker.rules().len(), 1);
        assert!(tracker.admit(&[1, 2]).is_accept());
    }

    proptest! {
        #[test]
        fn add_is_idempotent(
            ids in proptest::collection::vec(0_u32..600, 1..12),
            other in proptest::collection::vec(0_u32..600, 1..12),
        ) {
            let mut tracker = UniquenessTracker::new();
            let g = GroupId::global();
            tracker.add(&g, &ids);
            let other_seen = tracker.has(&g, &other);
            let before = tracker.len(&g);
            tracker.add(&g, &ids);
            prop_assert_eq!(tracker.len(&g), before);
            prop_assert_eq!(tracker.has(&g, &other), other_seen);
            prop_assert!(tracker.has(&g, &ids));
        }
    }
}
