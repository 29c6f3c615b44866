// SPDX-License-Identifier: MIT OR Apache-2.0
//! Scoped working copies with tiered storage.

use git2::Repository;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use skm_github::RepoInfo;

use crate::CrawlError;

/// Where clones land and when they qualify for the in-memory tier.
#[derive(Debug, Clone)]
pub struct CloneConfig {
    /// Base directory backed by tmpfs for small repositories.
    pub tmpfs_dir: PathBuf,
    /// Base directory on regular storage for everything else.
    pub fs_dir: PathBuf,
    /// Repositories up to this reported size (bytes) go to tmpfs.
    pub tmpfs_cutoff_bytes: u64,
}

/// A cloned working copy, owned for the duration of one repository scan.
///
/// Dropping removes the clone directory recursively unless the owner opted
/// out with [`keep`](ClonedRepo::keep); removal errors are swallowed so the
/// release guarantee holds on every exit path.
pub struct ClonedRepo {
    path: PathBuf,
    repo: Repository,
    cleanup: bool,
}

impl ClonedRepo {
    /// Clone `remote`, picking the storage tier from its reported size and
    /// falling back to the filesystem tier when a tmpfs clone fails.
    pub fn clone_remote(
        remote: &RepoInfo,
        token: &str,
        config: &CloneConfig,
        cleanup: bool,
    ) -> Result<Self, CrawlError> {
        let url = authenticated_clone_url(&remote.clone_url, token);
        let in_memory = remote.size_in_bytes() <= config.tmpfs_cutoff_bytes;
        let base = if in_memory {
            &config.tmpfs_dir
        } else {
            &config.fs_dir
        };
        debug!(
            repo = remote.full_name,
            tier = if in_memory { "tmpfs" } else { "fs" },
            "cloning repository"
        );

        match clone_into(&url, base, &remote.name) {
            Ok((path, repo)) => Ok(Self {
                path,
                repo,
                cleanup,
            }),
            Err(first) if in_memory => {
                warn!(
                    repo = remote.full_name,
                    error = %first,
                    "tmpfs clone failed, retrying on the filesystem tier"
                );
                let (path, repo) =
                    clone_into(&url, &config.fs_dir, &remote.name).map_err(|source| {
                        CrawlError::Clone {
                            repo: remote.full_name.clone(),
                            source,
                        }
                    })?;
                Ok(Self {
                    path,
                    repo,
                    cleanup,
                })
            }
            Err(source) => Err(CrawlError::Clone {
                repo: remote.full_name.clone(),
                source,
            }),
        }
    }

    /// The clone directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The local repository handle.
    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    /// Opt out of cleanup and return the clone directory.
    pub fn keep(mut self) -> PathBuf {
        self.cleanup = false;
        self.path.clone()
    }
}

impl Drop for ClonedRepo {
    fn drop(&mut self) {
        if self.cleanup {
            let _ = std::fs::remove_dir_all(&self.path);
        }
    }
}

fn clone_into(url: &str, base: &Path, name: &str) -> Result<(PathBuf, Repository), git2::Error> {
    if let Err(err) = std::fs::create_dir_all(base) {
        return Err(git2::Error::from_str(&format!(
            "cannot create clone base {}: {err}",
            base.display()
        )));
    }
    let path = base.join(name);
    if path.exists() {
        let _ = std::fs::remove_dir_all(&path);
    }
    let repo = Repository::clone(url, &path)?;
    Ok((path, repo))
}

/// Embed the OAuth token into a platform clone URL; anything else (local
/// fixture paths included) passes through untouched.
fn authenticated_clone_url(clone_url: &str, token: &str) -> String {
    if token.is_empty() {
        return clone_url.to_string();
    }
    clone_url.replacen(
        "https://github.com",
        &format!("https://{token}@github.com"),
        1,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_embedded_exactly_once() {
        let url = authenticated_clone_url("https://github.com/octocat/spoon.git", "t0k3n");
        assert_eq!(url, "https://t0k3n@github.com/octocat/spoon.git");
    }

    #[test]
    fn non_platform_urls_pass_through() {
        assert_eq!(
            authenticated_clone_url("/tmp/fixture/repo", "t0k3n"),
            "/tmp/fixture/repo"
        );
        assert_eq!(
            authenticated_clone_url("https://github.com/a/b.git", ""),
            "https://github.com/a/b.git"
        );
    }
}
