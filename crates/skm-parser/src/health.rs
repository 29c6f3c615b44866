// SPDX-License-Identifier: MIT OR Apache-2.0
//! Process-wide parser health counters.

use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

use crate::error::ParserError;

/// Counters for how dispatch attempts fared, keyed by extension or language.
///
/// Mutated only inside the dispatcher's analyze call; the three known error
/// kinds are absorbed here so the scan continues.
#[derive(Debug, Clone, Default)]
pub struct ParserHealth {
    /// Work items that reached a language parser.
    pub attempted: u64,
    /// Per-extension counts of unrecognized file types.
    pub unrecognized: BTreeMap<String, u64>,
    /// Per-language counts of files with no registered parser.
    pub unsupported: BTreeMap<String, u64>,
    /// Per-language counts of files every backend refused.
    pub unparsable: BTreeMap<String, u64>,
}

impl ParserHealth {
    /// Fresh, all-zero counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one analyze outcome into the counters.
    pub fn observe(&mut self, outcome: &Result<(), ParserError>) {
        match outcome {
            Ok(()) => self.attempted += 1,
            Err(ParserError::UnrecognizedExtension { extension }) => {
                debug!(extension, "skipping parse: unrecognized extension");
                *self.unrecognized.entry(extension.clone()).or_default() += 1;
            }
            Err(ParserError::MissingLanguageSupport { language }) => {
                debug!(language, "skipping parse: missing language support");
                *self.unsupported.entry(language.clone()).or_default() += 1;
            }
            Err(ParserError::UnparsableCode { language, url, .. }) => {
                debug!(language, url, "skipping parse: unparsable code");
                *self.unparsable.entry(language.clone()).or_default() += 1;
            }
        }
    }
}

impl fmt::Display for ParserHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ParserHealth(unparsable={}, unrecognized={}, unsupported={}, attempted={})",
            self.unparsable.values().sum::<u64>(),
            self.unrecognized.values().sum::<u64>(),
            self.unsupported.values().sum::<u64>(),
            self.attempted,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observe_routes_each_kind_to_its_counter() {
        let mut health = ParserHealth::new();
        health.observe(&Ok(()));
        health.observe(&Err(ParserError::UnrecognizedExtension {
            extension: "xyz".into(),
        }));
        health.observe(&Err(ParserError::MissingLanguageSupport {
            language: "c".into(),
        }));
        health.observe(&Err(ParserError::UnparsableCode {
            language: "python".into(),
            url: "https://example.com".into(),
            reason: "syntax".into(),
        }));

        assert_eq!(health.attempted, 1);
        assert_eq!(health.unrecognized.get("xyz"), Some(&1));
        assert_eq!(health.unsupported.get("c"), Some(&1));
        assert_eq!(health.unparsable.get("python"), Some(&1));
        assert_eq!(
            health.to_string(),
            "ParserHealth(unparsable=1, unrecognized=1, unsupported=1, attempted=1)"
        );
    }
}
