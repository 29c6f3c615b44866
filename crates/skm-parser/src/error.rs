// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-file parser error taxonomy.

use thiserror::Error;

/// Errors the dispatcher absorbs into health counters.
///
/// All three kinds are per-file and non-fatal: the scan moves on to the next
/// work item.
#[derive(Debug, Clone, Error)]
pub enum ParserError {
    /// The file extension maps to no known MIME type.
    #[error("unrecognized extension: {extension}")]
    UnrecognizedExtension {
        /// Extension (or whole file name when there is none).
        extension: String,
    },

    /// The language is known but no parser is registered for it.
    #[error("unsupported language: {language}")]
    MissingLanguageSupport {
        /// Language token derived from the MIME type.
        language: String,
    },

    /// Every backend refused the source.
    #[error("unparsable {language} code at {url}: {reason}")]
    UnparsableCode {
        /// Language of the failing parser.
        language: String,
        /// Browsable URL of the offending file for reporting.
        url: String,
        /// Last backend error, if any.
        reason: String,
    },
}
