// SPDX-License-Identifier: MIT OR Apache-2.0
//! Reference accumulation and normalization.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use skm_core::{OVERALL_KEY, PRIVATE_KEY, ReferenceSink, UNKNOWN_KEY};

use crate::reference::Reference;

/// Version tag of the knowledge layout. Two knowledge objects with different
/// versions are incompatible for ranking.
pub const KNOWLEDGE_VERSION: &str = "1";

/// Default breadth-regularization constant `K` when `REPETITION_PENALTY` is
/// not configured.
pub const DEFAULT_REPETITION_PENALTY: f64 = 100.0;

/// Settings for normalizing knowledge into a published score vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    /// Truncation depth of the published dotted names.
    pub depth: usize,
    /// The `K` constant of the breadth regularization.
    pub repetition_penalty: f64,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            depth: 2,
            repetition_penalty: DEFAULT_REPETITION_PENALTY,
        }
    }
}

impl KnowledgeConfig {
    /// Read `REPETITION_PENALTY` from the environment, keeping defaults for
    /// anything absent or unparsable.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var("REPETITION_PENALTY") {
            match raw.parse::<f64>() {
                Ok(k) if k > 0.0 => config.repetition_penalty = k,
                _ => debug!(raw, "ignoring invalid REPETITION_PENALTY"),
            }
        }
        config
    }
}

/// Concave remapping applied to summed activations at one bucket:
/// `r(x) = ln(1 + x/K) / ln(1 + 1/K)`.
///
/// Monotonic, `r(0) = 0`, `r(1) = 1`; repeated references at one name gain
/// progressively less than references spread across names.
pub fn breadth_regularization(knowledge: f64, penalty: f64) -> f64 {
    (knowledge / penalty).ln_1p() / (1.0 / penalty).ln_1p()
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

// ---------------------------------------------------------------------------
// Knowledge
// ---------------------------------------------------------------------------

/// A versioned mapping from dotted symbol names to dated references.
///
/// The first path component is the language tag. Names carrying the
/// `__private__` sentinel are never admitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Knowledge {
    version: String,
    user_hash: Option<String>,
    references: BTreeMap<String, Vec<Reference>>,
}

impl Default for Knowledge {
    fn default() -> Self {
        Self::new()
    }
}

impl Knowledge {
    /// Empty knowledge at the current layout version.
    pub fn new() -> Self {
        Self {
            version: KNOWLEDGE_VERSION.to_string(),
            user_hash: None,
            references: BTreeMap::new(),
        }
    }

    /// Empty knowledge tagged with an opaque user hash.
    pub fn with_user_hash(user_hash: impl Into<String>) -> Self {
        Self {
            user_hash: Some(user_hash.into()),
            ..Self::new()
        }
    }

    /// The layout version tag.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The opaque user hash, if one was attached.
    pub fn user_hash(&self) -> Option<&str> {
        self.user_hash.as_deref()
    }

    /// Number of distinct dotted names with at least one reference.
    pub fn len(&self) -> usize {
        self.references.len()
    }

    /// `true` when no references have been recorded.
    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    /// The raw reference lists, keyed by full dotted name.
    pub fn references(&self) -> &BTreeMap<String, Vec<Reference>> {
        &self.references
    }

    /// Record `count` references to the dotted name `parts` on `date`.
    ///
    /// Empty paths and paths containing the `__private__` sentinel are
    /// dropped silently; everything else appends `count` copies of the dated
    /// reference.
    pub fn add(&mut self, parts: &[String], date: NaiveDate, count: u32) {
        if parts.is_empty() {
            return;
        }
        if parts.iter().any(|part| part == PRIVATE_KEY) {
            debug!(name = parts.join("."), "dropping private reference");
            return;
        }
        let reference = Reference::new(date);
        self.references
            .entry(parts.join("."))
            .or_default()
            .extend(std::iter::repeat_n(reference, count as usize));
    }

    /// Project the references onto a depth-`D` score vector as seen from
    /// `today`.
    ///
    /// Each reference is bucketed by the first `depth` components of its name
    /// (shorter names padded with `__unknown__`); a bucket's score is the
    /// breadth-regularized sum of its activations, rounded to four decimals.
    /// Every strict prefix of a bucket accumulates the bucket score under
    /// `prefix.__overall__` — a plain sum, not re-regularized.
    pub fn normalize(&self, config: &KnowledgeConfig, today: NaiveDate) -> NormalizedKnowledge {
        let depth = config.depth.max(1);
        let mut buckets: BTreeMap<String, f64> = BTreeMap::new();
        for (name, references) in &self.references {
            let mut components: Vec<&str> = name.split('.').take(depth).collect();
            while components.len() < depth {
                components.push(UNKNOWN_KEY);
            }
            let activation: f64 = references.iter().map(|r| r.activation(today)).sum();
            *buckets.entry(components.join(".")).or_insert(0.0) += activation;
        }

        let mut scores: BTreeMap<String, f64> = BTreeMap::new();
        for (name, activation) in buckets {
            let score = round4(breadth_regularization(activation, config.repetition_penalty));
            let components: Vec<&str> = name.split('.').collect();
            for prefix_len in 1..depth {
                let rollup = format!("{}.{OVERALL_KEY}", components[..prefix_len].join("."));
                *scores.entry(rollup).or_insert(0.0) += score;
            }
            scores.insert(name, score);
        }
        NormalizedKnowledge { scores }
    }

    /// [`normalize`](Self::normalize) as seen from the current UTC day.
    pub fn normalize_today(&self, config: &KnowledgeConfig) -> NormalizedKnowledge {
        self.normalize(config, Utc::now().date_naive())
    }
}

impl ReferenceSink for Knowledge {
    fn add_reference(&mut self, parts: &[String], date: NaiveDate, count: u32) {
        self.add(parts, date, count)
    }
}

// ---------------------------------------------------------------------------
// NormalizedKnowledge
// ---------------------------------------------------------------------------

/// A depth-truncated score vector derived from [`Knowledge`].
///
/// Stateless and order-deterministic; the publishable form of a scan.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedKnowledge {
    scores: BTreeMap<String, f64>,
}

impl NormalizedKnowledge {
    /// Build directly from a score map (used when loading stored knowledge).
    pub fn from_scores(scores: BTreeMap<String, f64>) -> Self {
        Self { scores }
    }

    /// The score for a dotted name, if present.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.scores.get(name).copied()
    }

    /// Iterate `(dotted_name, score)` in lexicographic name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.scores.iter().map(|(name, score)| (name.as_str(), *score))
    }

    /// Number of published names.
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    /// `true` when nothing was published.
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn parts(path: &[&str]) -> Vec<String> {
        path.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn regularization_endpoints() {
        let k = DEFAULT_REPETITION_PENALTY;
        assert_eq!(breadth_regularization(0.0, k), 0.0);
        assert!((breadth_regularization(1.0, k) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn private_sentinel_is_never_admitted() {
        let mut knowledge = Knowledge::new();
        knowledge.add(&parts(&["__private__", "mymod"]), today(), 5);
        knowledge.add(&parts(&["python", "__private__"]), today(), 5);
        assert!(knowledge.is_empty());
    }

    #[test]
    fn short_names_pad_with_unknown() {
        let mut knowledge = Knowledge::new();
        knowledge.add(&parts(&["python"]), today(), 1);
        let normalized = knowledge.normalize(&KnowledgeConfig::default(), today());
        assert!(normalized.get("python.__unknown__").is_some());
    }

    #[test]
    fn long_names_truncate_to_depth() {
        let mut knowledge = Knowledge::new();
        knowledge.add(&parts(&["python", "socket", "socket", "recv"]), today(), 1);
        let normalized = knowledge.normalize(&KnowledgeConfig::default(), today());
        assert!(normalized.get("python.socket").is_some());
        assert!(normalized.get("python.socket.socket").is_none());
    }

    #[test]
    fn overall_is_the_sum_of_bucket_scores() {
        let mut knowledge = Knowledge::new();
        knowledge.add(&parts(&["python", "socket", "recv"]), today(), 10);
        knowledge.add(&parts(&["python", "functools", "reduce"]), today(), 3);
        let normalized = knowledge.normalize(&KnowledgeConfig::default(), today());
        let expected =
            normalized.get("python.socket").unwrap() + normalized.get("python.functools").unwrap();
        let overall = normalized.get("python.__overall__").unwrap();
        assert!((overall - expected).abs() < 1e-9);
    }

    #[test]
    fn breadth_beats_repetition() {
        // One narrow burst of 80 references against the same total spread
        // over eight distinct names.
        let mut narrow = Knowledge::new();
        narrow.add(&parts(&["python", "socket", "recv"]), today(), 80);

        let mut broad = Knowledge::new();
        for name in [
            ["python", "socket", "send"],
            ["python", "socket", "recv"],
            ["python", "collections", "defaultdict"],
            ["python", "collections", "Counter"],
            ["python", "itertools", "filterfalse"],
            ["python", "functools", "lru_cache"],
            ["python", "functools", "reduce"],
            ["python", "contextlib", "AbstractContextManager"],
        ] {
            broad.add(&parts(&name), today(), 10);
        }

        let config = KnowledgeConfig::default();
        let narrow_overall = narrow
            .normalize(&config, today())
            .get("python.__overall__")
            .unwrap();
        let broad_overall = broad
            .normalize(&config, today())
            .get("python.__overall__")
            .unwrap();
        assert!(broad_overall > narrow_overall);
    }

    #[test]
    fn older_references_score_lower() {
        let config = KnowledgeConfig::default();
        let mut fresh = Knowledge::new();
        fresh.add(&parts(&["python", "socket"]), today(), 80);
        let mut stale = Knowledge::new();
        stale.add(
            &parts(&["python", "socket"]),
            today() - chrono::Days::new(1800),
            80,
        );
        let fresh_score = fresh.normalize(&config, today()).get("python.socket").unwrap();
        let stale_score = stale.normalize(&config, today()).get("python.socket").unwrap();
        assert!(fresh_score > stale_score);
    }
}
