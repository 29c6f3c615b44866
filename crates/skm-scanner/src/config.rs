// SPDX-License-Identifier: MIT OR Apache-2.0
//! Scanner configuration: TOML file with environment overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use skm_crawler::CloneConfig;
use skm_github::ThrottleConfig;
use skm_knowledge::{DEFAULT_REPETITION_PENALTY, KnowledgeConfig};

/// Errors from loading the scanner configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The requested configuration file could not be read.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
        /// Filesystem-level cause.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },
}

/// Everything a scan run needs, with defaults matching the deployed service
/// topology.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Platform API token (overridden by `GITHUB_TOKEN`).
    pub github_token: Option<String>,
    /// Relational mirror URL (overridden by `DATABASE_URL`).
    pub database_url: Option<String>,
    /// Root directory of the filesystem blob store.
    pub blob_dir: PathBuf,
    /// Normalization depth of published knowledge.
    pub knowledge_depth: usize,
    /// Breadth-regularization constant (overridden by `REPETITION_PENALTY`).
    pub repetition_penalty: f64,
    /// tmpfs-backed clone tier.
    pub tmpfs_dir: PathBuf,
    /// Filesystem clone tier.
    pub fs_dir: PathBuf,
    /// Size cutoff for the tmpfs tier, bytes.
    pub tmpfs_cutoff_bytes: u64,
    /// Watchdog interval, seconds.
    pub watchdog_secs: u64,
    /// Minimum API request spacing, milliseconds.
    pub min_delay_ms: u64,
    /// Consecutive API failure cap.
    pub max_retries: u32,
    /// Python backend parsers, newest dialect first, as `host:port`.
    pub python_backends: Vec<String>,
    /// Python relevance oracle, `host:port`.
    pub python_oracle: String,
    /// JavaScript backend parsers, `host:port`.
    pub javascript_backends: Vec<String>,
    /// JavaScript relevance oracle, `host:port`.
    pub javascript_oracle: String,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            github_token: None,
            database_url: None,
            blob_dir: PathBuf::from("population"),
            knowledge_depth: 2,
            repetition_penalty: DEFAULT_REPETITION_PENALTY,
            tmpfs_dir: PathBuf::from("/repos"),
            fs_dir: PathBuf::from("/big_repos"),
            tmpfs_cutoff_bytes: 256 * 1024 * 1024,
            watchdog_secs: 360,
            min_delay_ms: 750,
            max_retries: 3,
            python_backends: vec![
                "python_parser:25252".to_string(),
                "python_2_parser:25253".to_string(),
            ],
            python_oracle: "python_impact:25000".to_string(),
            javascript_backends: vec!["javascript_parser:7777".to_string()],
            javascript_oracle: "javascript_impact:9999".to_string(),
        }
    }
}

impl ScanConfig {
    /// Load from an optional TOML file, then apply environment overrides
    /// (`GITHUB_TOKEN`, `DATABASE_URL`, `REPETITION_PENALTY`).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let raw =
                    std::fs::read_to_string(path).map_err(|source| ConfigError::FileNotFound {
                        path: path.display().to_string(),
                        source,
                    })?;
                toml::from_str(&raw).map_err(|e| ConfigError::ParseError {
                    reason: e.to_string(),
                })?
            }
            None => Self::default(),
        };

        if let Ok(token) = std::env::var("GITHUB_TOKEN") {
            config.github_token = Some(token);
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = Some(url);
        }
        if let Ok(raw) = std::env::var("REPETITION_PENALTY") {
            match raw.parse::<f64>() {
                Ok(k) if k > 0.0 => config.repetition_penalty = k,
                _ => debug!(raw, "ignoring invalid REPETITION_PENALTY"),
            }
        }
        Ok(config)
    }

    /// The knowledge normalization settings.
    pub fn knowledge(&self) -> KnowledgeConfig {
        KnowledgeConfig {
            depth: self.knowledge_depth,
            repetition_penalty: self.repetition_penalty,
        }
    }

    /// The clone-tier settings.
    pub fn clone_config(&self) -> CloneConfig {
        CloneConfig {
            tmpfs_dir: self.tmpfs_dir.clone(),
            fs_dir: self.fs_dir.clone(),
            tmpfs_cutoff_bytes: self.tmpfs_cutoff_bytes,
        }
    }

    /// The API throttle settings.
    pub fn throttle(&self) -> ThrottleConfig {
        ThrottleConfig {
            min_delay: Duration::from_millis(self.min_delay_ms),
            max_retries: self.max_retries,
            ..ThrottleConfig::default()
        }
    }

    /// The watchdog interval.
    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_secs)
    }
}
