// SPDX-License-Identifier: MIT OR Apache-2.0
//! Leaderboard ranking math and the nested ranking tree.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use skm_core::OVERALL_KEY;

/// Key interleaved between real name components in the nested ranking tree.
const MODULES_KEY: &str = "modules";

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Errors from folding rankings into the nested tree.
#[derive(Debug, Error)]
pub enum RankingError {
    /// A dotted name has more components than the tree depth allows.
    #[error("cannot project '{name}' into a nested tree of depth {depth}")]
    TooDeep {
        /// The offending dotted name.
        name: String,
        /// The configured tree depth.
        depth: usize,
    },
}

// ---------------------------------------------------------------------------
// Ranking
// ---------------------------------------------------------------------------

/// A user's standing for one dotted name against the scanned population.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ranking {
    /// Number of population members scoring strictly above this score.
    pub rank: usize,
    /// Size of the population.
    pub population: usize,
    /// Rough interest weight of this name: `floor(Σ population + score)`.
    pub relevance: i64,
}

impl Ranking {
    /// Rank `score` against `population_scores`.
    ///
    /// All scores are rounded to two decimals first — the precision the
    /// leaderboard keys encode — so the bisect lands exactly where the stored
    /// markers do.
    pub fn new(population_scores: &[f64], score: f64) -> Self {
        let mut sorted: Vec<f64> = population_scores.iter().map(|s| round2(*s)).collect();
        sorted.sort_by(f64::total_cmp);
        let probe = round2(score);
        let right = sorted.partition_point(|&s| s <= probe);
        Self {
            rank: sorted.len() - right,
            population: sorted.len(),
            relevance: (sorted.iter().sum::<f64>() + score).floor() as i64,
        }
    }
}

// ---------------------------------------------------------------------------
// NestedRanking
// ---------------------------------------------------------------------------

/// Folds flat `{dotted_name: Ranking}` pairs into a nested tree:
///
/// ```text
/// { "python": { "rank": 1, ..., "modules": { "socket": { "rank": 0, ... } } } }
/// ```
///
/// `__overall__` components are removed from the path; their ranking attaches
/// to the parent node.
#[derive(Debug, Clone, Default)]
pub struct NestedRanking {
    depth: usize,
    root: Map<String, Value>,
}

impl NestedRanking {
    /// An empty tree accepting names up to `depth` real components.
    pub fn new(depth: usize) -> Self {
        Self {
            depth,
            root: Map::new(),
        }
    }

    /// Insert one ranking under its dotted name.
    pub fn set(&mut self, dotted_name: &str, ranking: &Ranking) -> Result<(), RankingError> {
        let components: Vec<&str> = dotted_name
            .split('.')
            .filter(|component| *component != OVERALL_KEY)
            .collect();
        if components.len() > self.depth {
            return Err(RankingError::TooDeep {
                name: dotted_name.to_string(),
                depth: self.depth,
            });
        }

        let mut node = &mut self.root;
        for (index, component) in components.iter().enumerate() {
            let entry = node
                .entry(component.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            let object = entry
                .as_object_mut()
                .ok_or_else(|| RankingError::TooDeep {
                    name: dotted_name.to_string(),
                    depth: self.depth,
                })?;
            if index + 1 == components.len() {
                object.insert("rank".into(), Value::from(ranking.rank));
                object.insert("population".into(), Value::from(ranking.population));
                object.insert("relevance".into(), Value::from(ranking.relevance));
                return Ok(());
            }
            let child = object
                .entry(MODULES_KEY.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            node = child
                .as_object_mut()
                .ok_or_else(|| RankingError::TooDeep {
                    name: dotted_name.to_string(),
                    depth: self.depth,
                })?;
        }
        // Empty name after filtering (`"__overall__"` alone) has nowhere to
        // attach; treat it as too deep for depth 0.
        Err(RankingError::TooDeep {
            name: dotted_name.to_string(),
            depth: self.depth,
        })
    }

    /// The finished tree as a JSON value.
    pub fn to_value(&self) -> Value {
        Value::Object(self.root.clone())
    }
}
