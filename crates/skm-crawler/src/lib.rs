// SPDX-License-Identifier: MIT OR Apache-2.0
//! Repository cloning and authored-commit crawling.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clone;
mod crawler;
mod workitems;

pub use clone::{CloneConfig, ClonedRepo};
pub use crawler::{CommitCrawler, CommitWork};
pub use workitems::work_items_for_commit;

use thiserror::Error;

/// Errors from cloning and crawling.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// Cloning a repository failed on its final storage tier.
    #[error("failed to clone {repo}: {source}")]
    Clone {
        /// `owner/name` of the repository.
        repo: String,
        /// Git-level cause.
        #[source]
        source: git2::Error,
    },

    /// A local git operation failed.
    #[error("git operation on {repo} failed: {source}")]
    Git {
        /// `owner/name` of the repository.
        repo: String,
        /// Git-level cause.
        #[source]
        source: git2::Error,
    },

    /// The upstream platform API failed.
    #[error(transparent)]
    Api(#[from] skm_github::GithubError),
}
