// SPDX-License-Identifier: MIT OR Apache-2.0
//! The shared language-parser machinery.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};
use std::collections::{BTreeSet, HashMap};
use tracing::warn;

use skm_core::{GRAMMAR_PREFIX, PRIVATE_KEY, ReferenceSink, STDLIB_KEY, WorkItem};

use crate::backend::{BackendList, RelevanceOracle};
use crate::counts::UseCounts;
use crate::error::ParserError;

/// Registry value: anything able to analyze a work item for one language.
pub trait LanguageParser: Send {
    /// Language tag this parser owns.
    fn language(&self) -> &str;

    /// Analyze one work item, emitting count deltas to the sink.
    fn analyze(
        &mut self,
        item: &WorkItem,
        sink: &mut dyn ReferenceSink,
    ) -> Result<(), ParserError>;
}

/// Per-language hooks: standard-library membership, private-module
/// extraction, and the backend context payload.
pub trait LanguageProfile: Send {
    /// Language tag.
    fn language(&self) -> &'static str;

    /// Whether a root module belongs to the language's standard library.
    fn is_standard_library(&self, root: &str) -> bool;

    /// Private modules visible from this work item's tree.
    fn private_modules(&self, _item: &WorkItem) -> BTreeSet<String> {
        BTreeSet::new()
    }

    /// Language-specific additions to the backend context.
    fn extend_context(&self, _item: &WorkItem, _private: &BTreeSet<String>, _context: &mut Value) {}
}

#[derive(Hash, PartialEq, Eq)]
struct CountsKey {
    sha: String,
    path: String,
    side: &'static str,
}

/// The concrete language parser: a profile plus an MRU backend list and a
/// relevance oracle.
pub struct SymbolParser<P: LanguageProfile> {
    profile: P,
    backends: BackendList,
    oracle: Box<dyn RelevanceOracle>,
    counts_cache: HashMap<CountsKey, UseCounts>,
    oracle_cache: HashMap<String, bool>,
}

impl<P: LanguageProfile> SymbolParser<P> {
    /// Assemble a parser from its collaborators.
    pub fn new(profile: P, backends: BackendList, oracle: Box<dyn RelevanceOracle>) -> Self {
        Self {
            profile,
            backends,
            oracle,
            counts_cache: HashMap::new(),
            oracle_cache: HashMap::new(),
        }
    }

    /// Current backend try-order (exposed for adaptivity checks).
    pub fn backend_order(&self) -> Vec<&str> {
        self.backends.order()
    }

    /// Raw symbol counts for one side of a work item; empty when the side is
    /// absent (addition/deletion). Counts are relevance-filtered and
    /// memoized per `(commit, path, side)`.
    fn counts(
        &mut self,
        item: &WorkItem,
        blob: Option<&[u8]>,
        path: Option<&str>,
        side: &'static str,
        context: &Value,
        private: &BTreeSet<String>,
    ) -> Result<UseCounts, ParserError> {
        let (blob, path) = match (blob, path) {
            (Some(blob), Some(path)) => (blob, path),
            _ => return Ok(UseCounts::new()),
        };
        let key = CountsKey {
            sha: item.commit_sha.clone(),
            path: path.to_string(),
            side,
        };
        if let Some(hit) = self.counts_cache.get(&key) {
            return Ok(hit.clone());
        }

        let request = json!({
            "code": BASE64.encode(blob),
            "context": context,
        });
        let response = self.backends.parse(&request).map_err(|failure| {
            ParserError::UnparsableCode {
                language: self.profile.language().to_string(),
                url: item.commit_url(),
                reason: failure.reason,
            }
        })?;

        let mut counts =
            UseCounts::from_use_count(response.get("use_count").unwrap_or(&Value::Null));
        let symbols: Vec<String> = counts.symbols().map(str::to_string).collect();
        let verdicts: HashMap<String, bool> = symbols
            .into_iter()
            .map(|symbol| {
                let relevant = self.is_relevant(&symbol, private);
                (symbol, relevant)
            })
            .collect();
        counts.retain(|symbol| verdicts.get(symbol).copied().unwrap_or(false));

        self.counts_cache.insert(key, counts.clone());
        Ok(counts)
    }

    /// The relevance filter: standard-library, private, or oracle-impactful.
    fn is_relevant(&mut self, symbol: &str, private: &BTreeSet<String>) -> bool {
        let root = symbol.split('.').next().unwrap_or("");
        if root == STDLIB_KEY
            || root.starts_with(GRAMMAR_PREFIX)
            || self.profile.is_standard_library(root)
        {
            return true;
        }
        if root == PRIVATE_KEY || private.contains(root) {
            return true;
        }
        if let Some(verdict) = self.oracle_cache.get(root) {
            return *verdict;
        }
        let verdict = match self.oracle.impact(root) {
            Ok(impact) => impact > 0,
            Err(err) => {
                // The oracle being down should not sink the scan; err on the
                // side of keeping the symbol.
                warn!(module = root, error = %err, "relevance oracle failed, assuming relevant");
                true
            }
        };
        self.oracle_cache.insert(root.to_string(), verdict);
        verdict
    }
}

impl<P: LanguageProfile> LanguageParser for SymbolParser<P> {
    fn language(&self) -> &str {
        self.profile.language()
    }

    fn analyze(
        &mut self,
        item: &WorkItem,
        sink: &mut dyn ReferenceSink,
    ) -> Result<(), ParserError> {
        let private = self.profile.private_modules(item);
        let mut context = json!({
            "path": item.display_path(),
            "url": item.commit_url(),
        });
        self.profile.extend_context(item, &private, &mut context);

        let before = self.counts(
            item,
            item.blob_before.as_deref(),
            item.path_before.as_deref(),
            "before",
            &context,
            &private,
        )?;
        let after = self.counts(
            item,
            item.blob_after.as_deref(),
            item.path_after.as_deref(),
            "after",
            &context,
            &private,
        )?;

        let language = self.profile.language().to_string();
        for (symbol, delta) in UseCounts::abs_delta(&before, &after).most_common() {
            let mut parts = vec![language.clone()];
            parts.extend(symbol.split('.').map(str::to_string));
            sink.add_reference(&parts, item.authored_at, delta.unsigned_abs() as u32);
        }
        Ok(())
    }
}
