// SPDX-License-Identifier: MIT OR Apache-2.0
//! The commit crawler: repository iteration and work-item emission.

use tracing::{debug, warn};

use skm_core::WorkItem;
use skm_github::{GithubClient, RepoInfo};

use crate::clone::{CloneConfig, ClonedRepo};
use crate::workitems::work_items_for_commit;
use crate::CrawlError;

/// One authored commit's worth of work: the unit the execution callback
/// receives, so progress can tick per commit.
#[derive(Debug, Clone)]
pub struct CommitWork {
    /// `owner/name` of the repository.
    pub repo_full_name: String,
    /// The commit analyzed.
    pub commit_sha: String,
    /// Per-file work items (empty for merge commits).
    pub items: Vec<WorkItem>,
}

/// Crawls a user's repositories and turns authored commits into work items.
pub struct CommitCrawler {
    api: GithubClient,
    clone_config: CloneConfig,
}

impl CommitCrawler {
    /// A crawler over the given API client and clone tiers.
    pub fn new(api: GithubClient, clone_config: CloneConfig) -> Self {
        Self { api, clone_config }
    }

    /// The underlying API client (the orchestrator shares it for repo
    /// probing).
    pub fn api(&mut self) -> &mut GithubClient {
        &mut self.api
    }

    /// Remote-only measurement pass: count authored commits per repository
    /// without cloning anything.
    ///
    /// Failures while probing one repository are recovered to a warning so a
    /// single broken repo never aborts the pass.
    pub async fn measure_repos(
        &mut self,
        user: &str,
        skip: &mut dyn FnMut(&RepoInfo) -> bool,
        on_commit: &mut dyn FnMut(&str),
    ) -> Result<(), CrawlError> {
        for repo in self.api.list_repos(user).await? {
            if skip(&repo) {
                debug!(repo = repo.full_name, "skipping repository");
                continue;
            }
            match self.api.list_commits(&repo.full_name, user).await {
                Ok(commits) => {
                    for _ in &commits {
                        on_commit(&repo.full_name);
                    }
                }
                Err(err) => {
                    warn!(repo = repo.full_name, error = %err, "measurement failed, skipping");
                }
            }
        }
        Ok(())
    }

    /// Execution pass: clone each non-skipped repository and emit work items
    /// for every authored commit.
    ///
    /// A failure in one repository (clone failure included) is logged and the
    /// crawl continues with the next.
    pub async fn crawl_repos(
        &mut self,
        user: &str,
        skip: &mut dyn FnMut(&RepoInfo) -> bool,
        sink: &mut dyn FnMut(CommitWork),
    ) -> Result<(), CrawlError> {
        let repos = self.api.list_repos(user).await?;
        for repo in repos {
            if skip(&repo) {
                debug!(repo = repo.full_name, "skipping repository");
                continue;
            }
            if let Err(err) = self.crawl_repo(user, &repo, sink, true).await {
                warn!(repo = repo.full_name, error = %err, "repository crawl failed, continuing");
            }
        }
        Ok(())
    }

    /// Crawl one repository: clone, then emit work items per authored commit.
    ///
    /// Returns without cloning when the user has no authored commits. A
    /// commit that cannot be classified is skipped with a warning.
    pub async fn crawl_repo(
        &mut self,
        user: &str,
        repo: &RepoInfo,
        sink: &mut dyn FnMut(CommitWork),
        cleanup: bool,
    ) -> Result<(), CrawlError> {
        let commits = self.api.list_commits(&repo.full_name, user).await?;
        if commits.is_empty() {
            debug!(
                repo = repo.full_name,
                user, "no authored commits, skipping clone"
            );
            return Ok(());
        }

        let cloned = ClonedRepo::clone_remote(repo, self.api.token(), &self.clone_config, cleanup)?;
        for commit in &commits {
            match work_items_for_commit(cloned.repo(), &repo.full_name, &commit.sha) {
                Ok(items) => sink(CommitWork {
                    repo_full_name: repo.full_name.clone(),
                    commit_sha: commit.sha.clone(),
                    items,
                }),
                Err(err) => {
                    warn!(
                        repo = repo.full_name,
                        sha = commit.sha,
                        error = %err,
                        "skipping unclassifiable commit"
                    );
                }
            }
        }
        Ok(())
    }

    /// Crawl one repository by `owner/name`.
    pub async fn crawl_repo_by_name(
        &mut self,
        user: &str,
        full_name: &str,
        sink: &mut dyn FnMut(CommitWork),
        cleanup: bool,
    ) -> Result<(), CrawlError> {
        let repo = self.api.get_repo(full_name).await?;
        self.crawl_repo(user, &repo, sink, cleanup).await
    }

    /// Count authored commits in a single repository (measurement variant).
    pub async fn measure_repo(
        &mut self,
        user: &str,
        full_name: &str,
        on_commit: &mut dyn FnMut(&str),
    ) -> Result<(), CrawlError> {
        for _ in self.api.list_commits(full_name, user).await? {
            on_commit(full_name);
        }
        Ok(())
    }

    /// Clone a repository and emit work items for exactly one commit.
    pub async fn crawl_commit(
        &mut self,
        full_name: &str,
        sha: &str,
        sink: &mut dyn FnMut(CommitWork),
        cleanup: bool,
    ) -> Result<(), CrawlError> {
        let repo = self.api.get_repo(full_name).await?;
        let cloned = ClonedRepo::clone_remote(&repo, self.api.token(), &self.clone_config, cleanup)?;
        let items = work_items_for_commit(cloned.repo(), full_name, sha)?;
        sink(CommitWork {
            repo_full_name: full_name.to_string(),
            commit_sha: sha.to_string(),
            items,
        });
        Ok(())
    }
}
