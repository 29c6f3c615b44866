// SPDX-License-Identifier: MIT OR Apache-2.0
//! Temporally-weighted developer knowledge model.
//!
//! A [`Knowledge`] value accumulates dated [`Reference`]s under dotted symbol
//! names (`lang.module.submodule…`). Normalization projects the references
//! onto a fixed-depth score vector with sigmoidal temporal decay and breadth
//! regularization; [`Ranking`] compares one score against the population of
//! previously published scores.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod knowledge;
mod ranking;
mod reference;

pub use knowledge::{
    DEFAULT_REPETITION_PENALTY, KNOWLEDGE_VERSION, Knowledge, KnowledgeConfig, NormalizedKnowledge,
    breadth_regularization,
};
pub use ranking::{NestedRanking, Ranking, RankingError};
pub use reference::Reference;
