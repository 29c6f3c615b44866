// SPDX-License-Identifier: MIT OR Apache-2.0
//! The parser dispatcher: extension → MIME → language → registry.

use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use skm_core::{ReferenceSink, WorkItem};

use crate::error::ParserError;
use crate::health::ParserHealth;
use crate::language::LanguageParser;

/// Language token extractor for `application/...` and `text/x-...` MIME
/// types.
static MIME_LANGUAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:application|text)/(?:x-)?(?P<language>[a-z]+)").expect("static mime regex")
});

/// Routes work items to the registered language parsers.
///
/// Adding a language is adding a registry entry; dispatch failures of the
/// three known kinds are absorbed into [`ParserHealth`] so a scan never stops
/// on one odd file.
#[derive(Default)]
pub struct CodeParser {
    parsers: BTreeMap<String, Box<dyn LanguageParser>>,
    health: ParserHealth,
}

impl CodeParser {
    /// An empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a language parser under its own language tag.
    pub fn register(&mut self, parser: Box<dyn LanguageParser>) {
        self.parsers.insert(parser.language().to_string(), parser);
    }

    /// Guess the language of a path: extension → MIME type → token.
    ///
    /// `.jsx` is explicitly JavaScript; everything else goes through the MIME
    /// database.
    pub fn guess_language(&self, path: &str) -> Result<String, ParserError> {
        let extension = Path::new(path)
            .extension()
            .map(|ext| ext.to_string_lossy().into_owned())
            .unwrap_or_default();
        if extension.eq_ignore_ascii_case("jsx") {
            return Ok("javascript".to_string());
        }

        let unrecognized = || ParserError::UnrecognizedExtension {
            extension: if extension.is_empty() {
                path.to_string()
            } else {
                extension.clone()
            },
        };
        let mime = mime_guess::from_path(path).first().ok_or_else(unrecognized)?;
        let captures = MIME_LANGUAGE
            .captures(mime.essence_str())
            .ok_or_else(unrecognized)?;
        Ok(captures["language"].to_string())
    }

    /// Whether any of the given languages has a registered parser. Used to
    /// skip whole repositories cheaply; names compare case-insensitively
    /// since the platform reports `Python`, `JavaScript`, ...
    pub fn supports_any_of<I, S>(&self, languages: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        languages
            .into_iter()
            .any(|language| self.parsers.contains_key(&language.as_ref().to_lowercase()))
    }

    /// Analyze one work item inside the health scope.
    ///
    /// The three per-file error kinds are counted and swallowed; the scan
    /// continues.
    pub fn analyze(&mut self, item: &WorkItem, sink: &mut dyn ReferenceSink) {
        let outcome = self.try_analyze(item, sink);
        self.health.observe(&outcome);
    }

    /// Current health counters.
    pub fn health(&self) -> &ParserHealth {
        &self.health
    }

    fn try_analyze(
        &mut self,
        item: &WorkItem,
        sink: &mut dyn ReferenceSink,
    ) -> Result<(), ParserError> {
        // The language is assumed not to change within one commit; the
        // pre-change path wins when both sides exist.
        let path = item
            .path_before
            .as_deref()
            .or(item.path_after.as_deref())
            .unwrap_or_default();
        let language = self.guess_language(path)?;
        let parser = self
            .parsers
            .get_mut(&language)
            .ok_or(ParserError::MissingLanguageSupport { language })?;
        parser.analyze(item, sink)
    }
}
