// SPDX-License-Identifier: MIT OR Apache-2.0
//! Commit classification into parser work items.

use chrono::{DateTime, NaiveDate};
use git2::{Delta, ObjectType, Oid, Repository, Tree, TreeWalkMode, TreeWalkResult};
use tracing::debug;

use skm_core::WorkItem;

use crate::CrawlError;

/// Classify one commit into work items.
///
/// Initial commits (zero parents) yield one addition per blob in the tree;
/// regular commits yield one item per file diff against the parent; merge
/// commits are skipped entirely.
pub fn work_items_for_commit(
    repo: &Repository,
    full_name: &str,
    sha: &str,
) -> Result<Vec<WorkItem>, CrawlError> {
    let git = |source| CrawlError::Git {
        repo: full_name.to_string(),
        source,
    };

    let oid = Oid::from_str(sha).map_err(git)?;
    let commit = repo.find_commit(oid).map_err(git)?;
    let authored_at = authored_date(&commit);
    let tree = commit.tree().map_err(git)?;
    let tree_paths = blob_paths(&tree);

    match commit.parent_count() {
        0 => initial_commit_items(repo, full_name, sha, authored_at, &tree, tree_paths)
            .map_err(git),
        1 => {
            let parent = commit.parent(0).map_err(git)?;
            let parent_tree = parent.tree().map_err(git)?;
            regular_commit_items(
                repo,
                full_name,
                sha,
                authored_at,
                &parent_tree,
                &tree,
                tree_paths,
            )
            .map_err(git)
        }
        parents => {
            debug!(sha, parents, "skipping merge commit");
            Ok(Vec::new())
        }
    }
}

fn authored_date(commit: &git2::Commit<'_>) -> NaiveDate {
    DateTime::from_timestamp(commit.author().when().seconds(), 0)
        .map(|stamp| stamp.date_naive())
        .unwrap_or_default()
}

/// Every blob path in a tree, in walk order.
fn blob_paths(tree: &Tree<'_>) -> Vec<String> {
    let mut paths = Vec::new();
    let _ = tree.walk(TreeWalkMode::PreOrder, |root, entry| {
        if entry.kind() == Some(ObjectType::Blob) {
            if let Some(name) = entry.name() {
                paths.push(format!("{root}{name}"));
            }
        }
        TreeWalkResult::Ok
    });
    paths
}

fn blob_bytes(repo: &Repository, oid: Oid) -> Result<Option<Vec<u8>>, git2::Error> {
    if oid.is_zero() {
        return Ok(None);
    }
    Ok(Some(repo.find_blob(oid)?.content().to_vec()))
}

fn initial_commit_items(
    repo: &Repository,
    full_name: &str,
    sha: &str,
    authored_at: NaiveDate,
    tree: &Tree<'_>,
    tree_paths: Vec<String>,
) -> Result<Vec<WorkItem>, git2::Error> {
    let mut entries = Vec::new();
    let _ = tree.walk(TreeWalkMode::PreOrder, |root, entry| {
        if entry.kind() == Some(ObjectType::Blob) {
            if let Some(name) = entry.name() {
                entries.push((format!("{root}{name}"), entry.id()));
            }
        }
        TreeWalkResult::Ok
    });

    let mut items = Vec::with_capacity(entries.len());
    for (path, oid) in entries {
        items.push(WorkItem {
            repo_full_name: full_name.to_string(),
            commit_sha: sha.to_string(),
            authored_at,
            path_before: None,
            path_after: Some(path),
            blob_before: None,
            blob_after: blob_bytes(repo, oid)?,
            tree_paths: tree_paths.clone(),
        });
    }
    Ok(items)
}

fn regular_commit_items(
    repo: &Repository,
    full_name: &str,
    sha: &str,
    authored_at: NaiveDate,
    parent_tree: &Tree<'_>,
    tree: &Tree<'_>,
    tree_paths: Vec<String>,
) -> Result<Vec<WorkItem>, git2::Error> {
    let diff = repo.diff_tree_to_tree(Some(parent_tree), Some(tree), None)?;
    let mut items = Vec::new();
    for delta in diff.deltas() {
        let old_path = delta
            .old_file()
            .path()
            .map(|p| p.to_string_lossy().into_owned());
        let new_path = delta
            .new_file()
            .path()
            .map(|p| p.to_string_lossy().into_owned());
        let (path_before, path_after) = match delta.status() {
            Delta::Added => (None, new_path),
            Delta::Deleted => (old_path, None),
            Delta::Modified | Delta::Renamed | Delta::Copied | Delta::Typechange => {
                (old_path, new_path)
            }
            status => {
                debug!(sha, ?status, "skipping diff entry");
                continue;
            }
        };
        let blob_before = if path_before.is_some() {
            blob_bytes(repo, delta.old_file().id())?
        } else {
            None
        };
        let blob_after = if path_after.is_some() {
            blob_bytes(repo, delta.new_file().id())?
        } else {
            None
        };
        items.push(WorkItem {
            repo_full_name: full_name.to_string(),
            commit_sha: sha.to_string(),
            authored_at,
            path_before,
            path_after,
            blob_before,
            blob_after,
            tree_paths: tree_paths.clone(),
        });
    }
    Ok(items)
}
