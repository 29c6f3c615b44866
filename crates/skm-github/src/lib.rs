//! Rate-limit-aware GitHub API client.
//!
//! Wraps `reqwest` with the retry discipline the upstream API demands:
//! minimum spacing between requests, sleeping until the advertised rate-limit
//! reset, a bounded consecutive-failure counter, and a dedup cache so the
//! measurement and execution passes of a scan never pay for the same request
//! twice.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default minimum spacing between consecutive API requests.
pub const DEFAULT_MIN_DELAY: Duration = Duration::from_millis(750);

/// Default cap on consecutive failed attempts.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Page size used for every paginated listing.
const PER_PAGE: usize = 100;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from the GitHub API client.
#[derive(Debug, Error)]
pub enum GithubError {
    /// Too many consecutive transient failures.
    #[error("giving up on {url} after {retries} consecutive failed attempts")]
    RateLimitMaxRetries {
        /// Request that exhausted its retries.
        url: String,
        /// Number of consecutive failures.
        retries: u32,
    },

    /// A non-retryable transport failure.
    #[error("request to {url} failed: {source}")]
    Http {
        /// Request URL.
        url: String,
        /// Transport-level cause.
        #[source]
        source: reqwest::Error,
    },

    /// A non-retryable HTTP status.
    #[error("unexpected status {status} from {url}")]
    Status {
        /// Response status code.
        status: u16,
        /// Request URL.
        url: String,
    },

    /// The response body did not decode as the expected shape.
    #[error("undecodable response from {url}: {source}")]
    Decode {
        /// Request URL.
        url: String,
        /// Decode-level cause.
        #[source]
        source: serde_json::Error,
    },
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Throttling and retry policy for the client.
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// Minimum spacing between consecutive requests.
    pub min_delay: Duration,
    /// Consecutive-failure cap before a call gives up.
    pub max_retries: u32,
    /// Per-request transport timeout.
    pub request_timeout: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            min_delay: DEFAULT_MIN_DELAY,
            max_retries: DEFAULT_MAX_RETRIES,
            request_timeout: Duration::from_secs(30),
        }
    }
}

// ---------------------------------------------------------------------------
// API record types
// ---------------------------------------------------------------------------

/// A repository as listed by the platform API.
#[derive(Debug, Clone, Deserialize)]
pub struct RepoInfo {
    /// Short repository name.
    pub name: String,
    /// `owner/name`.
    pub full_name: String,
    /// Repository size as reported by the API, in KiB.
    #[serde(default)]
    pub size: u64,
    /// Whether the repository is a fork.
    #[serde(default)]
    pub fork: bool,
    /// HTTPS clone URL.
    #[serde(default)]
    pub clone_url: String,
}

impl RepoInfo {
    /// Reported size in bytes (the API reports KiB).
    pub fn size_in_bytes(&self) -> u64 {
        self.size.saturating_mul(1024)
    }
}

/// One commit as listed by the platform API.
#[derive(Debug, Clone, Deserialize)]
pub struct CommitInfo {
    /// Commit SHA.
    pub sha: String,
    /// Nested commit detail.
    pub commit: CommitDetail,
}

/// Commit detail payload.
#[derive(Debug, Clone, Deserialize)]
pub struct CommitDetail {
    /// Author stamp.
    pub author: Option<CommitStamp>,
}

/// An author or committer stamp.
#[derive(Debug, Clone, Deserialize)]
pub struct CommitStamp {
    /// When the commit was authored.
    pub date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RequestKey {
    method: String,
    url: String,
    params: Vec<(String, String)>,
}

// ---------------------------------------------------------------------------
// GithubClient
// ---------------------------------------------------------------------------

/// Rate-limit-aware client for the GitHub REST API.
///
/// All methods take `&mut self`: the throttle state (last request time,
/// wait-until deadline, consecutive-failure counter, dedup cache) belongs to
/// the single scan that owns the client.
pub struct GithubClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    config: ThrottleConfig,
    last_request: Option<Instant>,
    wait_until: Option<Instant>,
    consecutive_failures: u32,
    cache: HashMap<RequestKey, String>,
}

impl GithubClient {
    /// A client for the public API.
    pub fn new(token: impl Into<String>, config: ThrottleConfig) -> Self {
        Self::with_base_url("https://api.github.com", token, config)
    }

    /// A client against a custom API root (tests point this at a mock).
    pub fn with_base_url(
        base_url: impl Into<String>,
        token: impl Into<String>,
        config: ThrottleConfig,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            config,
            last_request: None,
            wait_until: None,
            consecutive_failures: 0,
            cache: HashMap::new(),
        }
    }

    /// The OAuth token, used by the crawler to build authenticated clone URLs.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Login of the user the token belongs to (`GET /user`).
    pub async fn authorized_login(&mut self) -> Result<String, GithubError> {
        let url = format!("{}/user", self.base_url);
        let body = self.get(&url, &[]).await?;
        let value: serde_json::Value =
            serde_json::from_str(&body).map_err(|source| GithubError::Decode {
                url: url.clone(),
                source,
            })?;
        Ok(value
            .get("login")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    /// Metadata for one repository (`GET /repos/{full_name}`).
    pub async fn get_repo(&mut self, full_name: &str) -> Result<RepoInfo, GithubError> {
        let url = format!("{}/repos/{full_name}", self.base_url);
        let body = self.get(&url, &[]).await?;
        serde_json::from_str(&body).map_err(|source| GithubError::Decode { url, source })
    }

    /// All non-fork repositories of `user`, fully paginated.
    pub async fn list_repos(&mut self, user: &str) -> Result<Vec<RepoInfo>, GithubError> {
        let url = format!("{}/users/{user}/repos", self.base_url);
        let repos: Vec<RepoInfo> = self.get_paginated(&url, &[]).await?;
        Ok(repos.into_iter().filter(|repo| !repo.fork).collect())
    }

    /// SHAs of commits authored by `author` in `full_name`, newest first.
    ///
    /// An empty repository (409 upstream) yields an empty list rather than an
    /// error.
    pub async fn list_commits(
        &mut self,
        full_name: &str,
        author: &str,
    ) -> Result<Vec<CommitInfo>, GithubError> {
        let url = format!("{}/repos/{full_name}/commits", self.base_url);
        match self
            .get_paginated(&url, &[("author".to_string(), author.to_string())])
            .await
        {
            Ok(commits) => Ok(commits),
            Err(GithubError::Status { status: 409, .. }) => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }

    /// Language byte counts for a repository.
    pub async fn list_languages(
        &mut self,
        full_name: &str,
    ) -> Result<BTreeMap<String, u64>, GithubError> {
        let url = format!("{}/repos/{full_name}/languages", self.base_url);
        let body = self.get(&url, &[]).await?;
        serde_json::from_str(&body).map_err(|source| GithubError::Decode { url, source })
    }

    async fn get_paginated<T: serde::de::DeserializeOwned>(
        &mut self,
        url: &str,
        extra_params: &[(String, String)],
    ) -> Result<Vec<T>, GithubError> {
        let mut collected = Vec::new();
        let mut page = 1usize;
        loop {
            let mut params = extra_params.to_vec();
            params.push(("per_page".to_string(), PER_PAGE.to_string()));
            params.push(("page".to_string(), page.to_string()));
            let body = self.get(url, &params).await?;
            let items: Vec<T> =
                serde_json::from_str(&body).map_err(|source| GithubError::Decode {
                    url: url.to_string(),
                    source,
                })?;
            let done = items.len() < PER_PAGE;
            collected.extend(items);
            if done {
                return Ok(collected);
            }
            page += 1;
        }
    }

    /// One GET with the full throttle/retry/dedup discipline applied.
    async fn get(&mut self, url: &str, params: &[(String, String)]) -> Result<String, GithubError> {
        let mut sorted_params = params.to_vec();
        sorted_params.sort();
        let key = RequestKey {
            method: "GET".to_string(),
            url: url.to_string(),
            params: sorted_params,
        };
        if let Some(hit) = self.cache.get(&key) {
            debug!(url, "request served from dedup cache");
            return Ok(hit.clone());
        }

        loop {
            if self.consecutive_failures >= self.config.max_retries {
                let retries = self.consecutive_failures;
                self.consecutive_failures = 0;
                return Err(GithubError::RateLimitMaxRetries {
                    url: url.to_string(),
                    retries,
                });
            }

            self.throttle().await;
            self.last_request = Some(Instant::now());

            let outcome = self
                .http
                .get(url)
                .query(params)
                .bearer_auth(&self.token)
                .header(reqwest::header::USER_AGENT, "skillmap-scanner")
                .header(reqwest::header::ACCEPT, "application/vnd.github+json")
                .send()
                .await;

            let response = match outcome {
                Ok(response) => response,
                Err(err) if is_transient(&err) => {
                    warn!(url, error = %err, "transient transport failure");
                    self.consecutive_failures += 1;
                    continue;
                }
                Err(source) => {
                    return Err(GithubError::Http {
                        url: url.to_string(),
                        source,
                    });
                }
            };

            let status = response.status();
            if is_rate_limited(&response) {
                let reset = rate_limit_reset(&response);
                info!(url, reset, "rate limited upstream");
                self.wait_until = Some(instant_at_epoch(reset));
                self.consecutive_failures += 1;
                continue;
            }
            if status == reqwest::StatusCode::UNAUTHORIZED {
                // The upstream intermittently reports bad credentials for
                // perfectly good tokens; treat it as transient.
                warn!(url, "spurious bad-credentials response");
                self.consecutive_failures += 1;
                continue;
            }

            match response.text().await {
                Ok(body) if status.is_success() => {
                    self.consecutive_failures = 0;
                    self.cache.insert(key, body.clone());
                    return Ok(body);
                }
                Ok(_) => {
                    return Err(GithubError::Status {
                        status: status.as_u16(),
                        url: url.to_string(),
                    });
                }
                Err(err) => {
                    // Truncated read mid-body.
                    warn!(url, error = %err, "truncated response body");
                    self.consecutive_failures += 1;
                    continue;
                }
            }
        }
    }

    /// Sleep off any pending rate-limit reset, otherwise enforce the minimum
    /// spacing since the previous request.
    async fn throttle(&mut self) {
        if let Some(until) = self.wait_until.take() {
            let now = Instant::now();
            if until > now {
                debug!(wait = ?(until - now), "sleeping until rate-limit reset");
                tokio::time::sleep_until(until.into()).await;
            }
        } else if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.config.min_delay {
                tokio::time::sleep(self.config.min_delay - elapsed).await;
            }
        }
    }
}

fn is_transient(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout() || err.is_body() || err.is_decode()
}

fn is_rate_limited(response: &reqwest::Response) -> bool {
    let status = response.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return true;
    }
    status == reqwest::StatusCode::FORBIDDEN
        && response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|value| value.to_str().ok())
            .map(|value| value.trim() == "0")
            .unwrap_or(false)
}

fn rate_limit_reset(response: &reqwest::Response) -> u64 {
    response
        .headers()
        .get("x-ratelimit-reset")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(0)
}

/// Translate an epoch-seconds reset stamp into a tokio-sleepable instant.
fn instant_at_epoch(epoch_secs: u64) -> Instant {
    let now_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    Instant::now() + Duration::from_secs(epoch_secs.saturating_sub(now_epoch))
}
