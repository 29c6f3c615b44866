// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared data model for the skillmap scanning pipeline.
//!
//! Everything that crosses a crate boundary more than once lives here: the
//! [`WorkItem`] unit of parsing, the [`ReferenceSink`] seam between the
//! language parsers and the knowledge model, and the reserved dotted-name
//! sentinels.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Rollup key inserted at every intermediate depth of normalized knowledge.
pub const OVERALL_KEY: &str = "__overall__";

/// Padding component for dotted names shorter than the configured depth.
pub const UNKNOWN_KEY: &str = "__unknown__";

/// Reserved sentinel for repository-private modules. References carrying it
/// are never admitted into knowledge.
pub const PRIVATE_KEY: &str = "__private__";

/// Reserved sentinel a backend may use to tag standard-library symbols.
pub const STDLIB_KEY: &str = "__stdlib__";

/// Prefix a backend uses for language-grammar (keyword-level) symbols.
pub const GRAMMAR_PREFIX: &str = "__grammar__";

// ---------------------------------------------------------------------------
// WorkItem
// ---------------------------------------------------------------------------

/// A single code change to analyze: one file within one authored commit.
///
/// `before` fields are absent for file creation, `after` fields for deletion;
/// both are present for modification and rename. The initial commit of a
/// repository yields one addition-shaped item per blob in its tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// `owner/name` of the repository the commit belongs to.
    pub repo_full_name: String,
    /// Hex SHA of the commit under analysis.
    pub commit_sha: String,
    /// Calendar day the commit was authored.
    pub authored_at: NaiveDate,
    /// Path of the file before the change, if it existed.
    pub path_before: Option<String>,
    /// Path of the file after the change, if it still exists.
    pub path_after: Option<String>,
    /// File contents before the change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_before: Option<Vec<u8>>,
    /// File contents after the change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_after: Option<Vec<u8>>,
    /// Every blob path in the commit's (after) tree. Language parsers derive
    /// the private-module namespace from this list.
    #[serde(default)]
    pub tree_paths: Vec<String>,
}

impl WorkItem {
    /// The path to report for this item (after wins over before).
    pub fn display_path(&self) -> &str {
        self.path_after
            .as_deref()
            .or(self.path_before.as_deref())
            .unwrap_or("")
    }

    /// Browsable URL of the file at this commit, used in error reports and
    /// backend context payloads.
    pub fn commit_url(&self) -> String {
        format!(
            "https://github.com/{}/blob/{}/{}",
            self.repo_full_name,
            self.commit_sha,
            self.display_path()
        )
    }
}

// ---------------------------------------------------------------------------
// ReferenceSink
// ---------------------------------------------------------------------------

/// Receiver of dated symbol-use attributions.
///
/// Implemented by the knowledge model; language parsers call it once per
/// `(symbol, |delta|)` pair with the dotted path split into components, the
/// language tag first.
pub trait ReferenceSink {
    /// Record `count` references to the dotted name `parts` on `date`.
    fn add_reference(&mut self, parts: &[String], date: NaiveDate, count: u32);
}

impl<F> ReferenceSink for F
where
    F: FnMut(&[String], NaiveDate, u32),
{
    fn add_reference(&mut self, parts: &[String], date: NaiveDate, count: u32) {
        self(parts, date, count)
    }
}
