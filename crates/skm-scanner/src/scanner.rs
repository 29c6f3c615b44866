// SPDX-License-Identifier: MIT OR Apache-2.0
//! The two-pass scan orchestrator.

use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, info, warn};

use skm_crawler::{CommitCrawler, CrawlError};
use skm_github::{GithubError, RepoInfo};
use skm_knowledge::Knowledge;
use skm_parser::{CodeParser, ParserHealth};
use skm_population::{Population, PopulationError};

use crate::progress::ScanProgress;
use crate::watchdog::Watchdog;

/// Errors that abort a whole scan (anything smaller is recovered inline).
#[derive(Debug, Error)]
pub enum ScanError {
    /// The crawler failed at scan scope.
    #[error(transparent)]
    Crawl(#[from] CrawlError),

    /// Publishing or probing the population failed.
    #[error(transparent)]
    Population(#[from] PopulationError),

    /// The platform API failed at scan scope.
    #[error(transparent)]
    Api(#[from] GithubError),
}

/// What a finished scan did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOutcome {
    /// Whether knowledge was published (false when the stored version was
    /// already current).
    pub published: bool,
    /// Authored commits analyzed.
    pub commits: u64,
    /// Distinct dotted names accumulated.
    pub names: usize,
}

/// Binds crawler, dispatcher, knowledge, population, progress, and watchdog
/// into the two-pass scan.
pub struct Scanner {
    crawler: CommitCrawler,
    parser: CodeParser,
    population: Box<dyn Population>,
    progress: ScanProgress,
    watchdog: Option<Watchdog>,
}

impl Scanner {
    /// Assemble a scanner from its collaborators.
    pub fn new(
        crawler: CommitCrawler,
        parser: CodeParser,
        population: Box<dyn Population>,
        progress: ScanProgress,
    ) -> Self {
        Self {
            crawler,
            parser,
            population,
            progress,
            watchdog: None,
        }
    }

    /// Arm a watchdog that every crawl callback re-arms.
    pub fn with_watchdog(mut self, watchdog: Watchdog) -> Self {
        self.watchdog = Some(watchdog);
        self
    }

    /// Dispatcher health counters for reporting.
    pub fn parser_health(&self) -> &ParserHealth {
        self.parser.health()
    }

    /// Login of the user the API token belongs to — the default scan target.
    pub async fn authorized_login(&mut self) -> Result<String, ScanError> {
        Ok(self.crawler.api().authorized_login().await?)
    }

    /// Progress totals `(steps, finished)`.
    pub fn progress_totals(&self) -> (u64, u64) {
        self.progress.totals()
    }

    /// Repositories to skip: no language overlap with the registered
    /// parsers, or the language probe itself failed.
    async fn unsupported_repos(&mut self, user: &str) -> Result<HashSet<String>, ScanError> {
        let mut excluded = HashSet::new();
        let repos = self.crawler.api().list_repos(user).await?;
        for repo in &repos {
            match self.crawler.api().list_languages(&repo.full_name).await {
                Ok(languages) => {
                    if !self.parser.supports_any_of(languages.keys()) {
                        debug!(
                            repo = repo.full_name,
                            "skipping repository: no supported language"
                        );
                        excluded.insert(repo.full_name.clone());
                    }
                }
                Err(err) => {
                    warn!(repo = repo.full_name, error = %err, "language probe failed, skipping");
                    excluded.insert(repo.full_name.clone());
                }
            }
        }
        Ok(excluded)
    }

    /// Scan everything the user authored and publish the result.
    ///
    /// Pass one measures (no clones) for progress reporting; pass two clones
    /// and analyzes. Publication is skipped when the stored knowledge is
    /// already at the current version, unless forced.
    pub async fn scan_all(&mut self, user: &str, force: bool) -> Result<ScanOutcome, ScanError> {
        let mut knowledge = Knowledge::new();
        if !force
            && self
                .population
                .user_knowledge_exists(user, knowledge.version())
                .await?
        {
            info!(user, "scan is up to date, skipping");
            return Ok(ScanOutcome {
                published: false,
                commits: 0,
                names: 0,
            });
        }

        let excluded = self.unsupported_repos(user).await?;
        let mut skip = move |repo: &RepoInfo| excluded.contains(&repo.full_name);

        debug!(user, "initializing progress");
        {
            let Self {
                crawler,
                progress,
                watchdog,
                ..
            } = self;
            crawler
                .measure_repos(user, &mut skip, &mut |name| {
                    progress.add_step(name);
                    if let Some(watchdog) = watchdog.as_ref() {
                        watchdog.keepalive();
                    }
                })
                .await?;
        }

        debug!(user, "starting scan");
        let mut commits = 0u64;
        {
            let Self {
                crawler,
                parser,
                progress,
                watchdog,
                ..
            } = self;
            crawler
                .crawl_repos(user, &mut skip, &mut |work| {
                    for item in &work.items {
                        parser.analyze(item, &mut knowledge);
                    }
                    progress.mark_finished(&work.repo_full_name);
                    commits += 1;
                    if let Some(watchdog) = watchdog.as_ref() {
                        watchdog.keepalive();
                    }
                })
                .await?;
        }

        self.population.add_user_knowledge(user, &knowledge).await?;
        info!(user, health = %self.parser.health(), "scan published");
        Ok(ScanOutcome {
            published: true,
            commits,
            names: knowledge.len(),
        })
    }

    /// Analyze a single repository without publishing.
    pub async fn scan_repo(
        &mut self,
        user: &str,
        full_name: &str,
        cleanup: bool,
    ) -> Result<Knowledge, ScanError> {
        let mut knowledge = Knowledge::new();
        {
            let Self {
                crawler,
                progress,
                watchdog,
                ..
            } = self;
            crawler
                .measure_repo(user, full_name, &mut |name| {
                    progress.add_step(name);
                    if let Some(watchdog) = watchdog.as_ref() {
                        watchdog.keepalive();
                    }
                })
                .await?;
        }
        {
            let Self {
                crawler,
                parser,
                progress,
                watchdog,
                ..
            } = self;
            crawler
                .crawl_repo_by_name(user, full_name, &mut |work| {
                    for item in &work.items {
                        parser.analyze(item, &mut knowledge);
                    }
                    progress.mark_finished(&work.repo_full_name);
                    if let Some(watchdog) = watchdog.as_ref() {
                        watchdog.keepalive();
                    }
                }, cleanup)
                .await?;
        }
        Ok(knowledge)
    }

    /// Analyze a single commit without publishing.
    pub async fn scan_commit(
        &mut self,
        full_name: &str,
        sha: &str,
        cleanup: bool,
    ) -> Result<Knowledge, ScanError> {
        let mut knowledge = Knowledge::new();
        let Self {
            crawler,
            parser,
            progress,
            watchdog,
            ..
        } = self;
        crawler
            .crawl_commit(full_name, sha, &mut |work| {
                for item in &work.items {
                    parser.analyze(item, &mut knowledge);
                }
                progress.mark_finished(&work.repo_full_name);
                if let Some(watchdog) = watchdog.as_ref() {
                    watchdog.keepalive();
                }
            }, cleanup)
            .await?;
        Ok(knowledge)
    }
}
