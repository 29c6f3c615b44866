// SPDX-License-Identifier: MIT OR Apache-2.0
//! Insertion-ordered symbol-use counts.

use indexmap::IndexMap;
use serde_json::Value;

/// A multiset of symbol-use counts with stable insertion order.
///
/// Order matters for the `most_common` contract: ties are broken by the
/// order symbols were first seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UseCounts {
    counts: IndexMap<String, i64>,
}

impl UseCounts {
    /// An empty multiset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `count` uses of `symbol`.
    pub fn add(&mut self, symbol: impl Into<String>, count: i64) {
        *self.counts.entry(symbol.into()).or_insert(0) += count;
    }

    /// Build from a backend `use_count` object; non-integer values count 0.
    pub fn from_use_count(value: &Value) -> Self {
        let mut counts = Self::new();
        if let Some(map) = value.as_object() {
            for (symbol, count) in map {
                counts.add(symbol.clone(), count.as_i64().unwrap_or(0));
            }
        }
        counts
    }

    /// The count for `symbol` (0 when absent).
    pub fn get(&self, symbol: &str) -> i64 {
        self.counts.get(symbol).copied().unwrap_or(0)
    }

    /// Number of distinct symbols.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// `true` when no symbol has been counted.
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// The distinct symbols in insertion order.
    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.counts.keys().map(String::as_str)
    }

    /// Keep only symbols for which `keep` returns `true`.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.counts.retain(|symbol, _| keep(symbol));
    }

    /// Component-wise `|after − before|` over the union of symbols, zero
    /// deltas dropped. Union order: `before` symbols first, then new `after`
    /// symbols.
    pub fn abs_delta(before: &Self, after: &Self) -> Self {
        let mut delta = Self::new();
        for (symbol, count_before) in &before.counts {
            let difference = (after.get(symbol) - count_before).abs();
            if difference != 0 {
                delta.add(symbol.clone(), difference);
            }
        }
        for (symbol, count_after) in &after.counts {
            if !before.counts.contains_key(symbol) && *count_after != 0 {
                delta.add(symbol.clone(), count_after.abs());
            }
        }
        delta
    }

    /// Symbols in descending count order, ties broken by insertion order.
    pub fn most_common(&self) -> Vec<(&str, i64)> {
        let mut entries: Vec<(&str, i64)> = self
            .counts
            .iter()
            .map(|(symbol, count)| (symbol.as_str(), *count))
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn delta_covers_both_sides() {
        let mut before = UseCounts::new();
        before.add("os.path", 3);
        before.add("sys.argv", 1);
        let mut after = UseCounts::new();
        after.add("os.path", 5);
        after.add("json.loads", 2);

        let delta = UseCounts::abs_delta(&before, &after);
        assert_eq!(delta.get("os.path"), 2);
        assert_eq!(delta.get("sys.argv"), 1);
        assert_eq!(delta.get("json.loads"), 2);
    }

    #[test]
    fn unchanged_symbols_are_dropped() {
        let mut before = UseCounts::new();
        before.add("os.path", 3);
        let delta = UseCounts::abs_delta(&before, &before.clone());
        assert!(delta.is_empty());
    }

    #[test]
    fn most_common_is_stable_on_ties() {
        let mut counts = UseCounts::new();
        counts.add("b.second", 2);
        counts.add("a.tie", 1);
        counts.add("z.tie", 1);
        let order: Vec<&str> = counts.most_common().iter().map(|(s, _)| *s).collect();
        assert_eq!(order, vec!["b.second", "a.tie", "z.tie"]);
    }

    #[test]
    fn builds_from_a_use_count_object() {
        let counts =
            UseCounts::from_use_count(&json!({"os.path": 2, "sys": 1, "weird": "x"}));
        assert_eq!(counts.get("os.path"), 2);
        assert_eq!(counts.get("weird"), 0);
    }
}
