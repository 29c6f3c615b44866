// SPDX-License-Identifier: MIT OR Apache-2.0
//! Population storage and ranking surfaces.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod blob;
mod postgres;
mod store;

pub use blob::{BlobPopulation, Population, StoredKnowledge};
pub use postgres::PostgresRankings;
pub use store::{FsStore, MemoryStore, ObjectStore, StoreError};

use std::collections::BTreeMap;

use skm_knowledge::Ranking;
use thiserror::Error;

/// Flat rankings keyed by dotted name.
pub type Rankings = BTreeMap<String, Ranking>;

/// Errors from population persistence and ranking.
#[derive(Debug, Error)]
pub enum PopulationError {
    /// The blob store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A stored record did not decode.
    #[error("stored record for {key} is malformed: {source}")]
    Malformed {
        /// Key of the offending object.
        key: String,
        /// Decode-level cause.
        #[source]
        source: serde_json::Error,
    },

    /// The relational database failed.
    #[error(transparent)]
    Database(#[from] sqlx::Error),

    /// An expected relational row was absent.
    #[error("no {what} row for {who}")]
    MissingRow {
        /// Which lookup came up empty.
        what: &'static str,
        /// The key that was looked up.
        who: String,
    },
}
