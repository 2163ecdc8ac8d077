//! Source materialization.
//!
//! Each project keeps a bare cache repository that is cloned once and
//! fetched on later builds. Building extracts the requested revision's
//! tree into a throwaway working directory, never a shared checkout.

use std::path::{Path, PathBuf};
use std::time::Duration;

use gix::progress::Discard;
use tokio::task;
use tracing::{debug, info, instrument, warn};

use berth_core::ProjectId;

use crate::error::{BuildError, BuildResult};

/// A materialized source tree ready for building.
#[derive(Debug)]
pub struct SourceTree {
    /// Path to the working directory holding the tree.
    pub path: PathBuf,
    /// Fully resolved commit SHA.
    pub commit_sha: String,
    /// First line of the commit message, when present.
    pub commit_summary: Option<String>,
}

/// Manages cached repositories and per-build working directories.
pub struct SourceManager {
    work_dir: PathBuf,
    cache_dir: PathBuf,
}

impl SourceManager {
    /// Create a source manager.
    ///
    /// - `work_dir`: per-build working directories (removed after build)
    /// - `cache_dir`: bare repository cache (persisted across builds)
    pub fn new(work_dir: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            cache_dir: cache_dir.into(),
        }
    }

    /// Clone or fetch the repository and extract `revision` into a
    /// fresh working directory.
    ///
    /// `revision` accepts a branch name, a full or abbreviated commit
    /// SHA, or `None` for the remote HEAD.
    #[instrument(skip(self), fields(project = %project_id))]
    pub async fn materialize(
        &self,
        project_id: &ProjectId,
        repo_url: &str,
        revision: Option<&str>,
    ) -> BuildResult<SourceTree> {
        if let Some(revision) = revision {
            validate_revision(revision)?;
        }

        let project_id = project_id.clone();
        let repo_url = repo_url.to_owned();
        let revision = revision.map(str::to_owned);
        let work_dir = self.work_dir.clone();
        let cache_dir = self.cache_dir.clone();

        // gix is blocking; keep it off the async runtime.
        task::spawn_blocking(move || {
            materialize_sync(
                &project_id,
                &repo_url,
                revision.as_deref(),
                &work_dir,
                &cache_dir,
            )
        })
        .await
        .map_err(|e| BuildError::Internal(format!("materialize task failed: {e}")))?
    }

    /// Remove working directories older than `max_age`.
    ///
    /// Returns the number of directories removed.
    #[instrument(skip(self))]
    pub async fn cleanup(&self, max_age: Duration) -> BuildResult<usize> {
        let work_dir = self.work_dir.clone();

        task::spawn_blocking(move || sweep_stale_trees(&work_dir, max_age))
            .await
            .map_err(|e| BuildError::Internal(format!("cleanup task failed: {e}")))?
    }

    /// Remove a single working directory, ignoring absence.
    pub async fn remove(&self, tree: &SourceTree) {
        let path = tree.path.clone();
        let result = task::spawn_blocking(move || std::fs::remove_dir_all(&path)).await;
        if let Ok(Err(e)) = result {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %tree.path.display(), error = %e, "failed to remove working directory");
            }
        }
    }
}

/// Reject revisions that cannot be a branch name or commit SHA.
fn validate_revision(revision: &str) -> BuildResult<()> {
    let bad = revision.is_empty()
        || revision.starts_with('-')
        || revision.contains("..")
        || revision.chars().any(|c| c.is_whitespace() || c == '\0');

    if bad {
        return Err(BuildError::Revision {
            revision: revision.to_owned(),
            message: "not a valid branch name or commit SHA".to_owned(),
        });
    }
    Ok(())
}

fn materialize_sync(
    project_id: &ProjectId,
    repo_url: &str,
    revision: Option<&str>,
    work_dir: &Path,
    cache_dir: &Path,
) -> BuildResult<SourceTree> {
    std::fs::create_dir_all(work_dir)?;
    std::fs::create_dir_all(cache_dir)?;

    let cache_path = cache_dir.join(sanitise_for_path(project_id.as_str()));

    let repo = if cache_path.exists() {
        fetch_repository(&cache_path, repo_url)?
    } else {
        clone_repository(repo_url, &cache_path)?
    };

    let commit_id = resolve_revision(&repo, revision)?;

    let tree_dir = work_dir.join(format!(
        "{}-{}",
        sanitise_for_path(project_id.as_str()),
        &commit_id.to_string()[..12]
    ));
    if tree_dir.exists() {
        std::fs::remove_dir_all(&tree_dir)?;
    }
    std::fs::create_dir_all(&tree_dir)?;

    let commit = repo
        .find_commit(commit_id)
        .map_err(|e| revision_error(revision, e))?;
    let commit_summary = commit
        .message()
        .ok()
        .map(|m| m.summary().to_string())
        .filter(|s| !s.is_empty());

    let tree = commit.tree().map_err(|e| revision_error(revision, e))?;
    extract_tree(&repo, &tree, &tree_dir)?;

    info!(
        path = %tree_dir.display(),
        commit = %commit_id,
        "source materialized"
    );

    Ok(SourceTree {
        path: tree_dir,
        commit_sha: commit_id.to_string(),
        commit_summary,
    })
}

fn revision_error(revision: Option<&str>, e: impl std::fmt::Display) -> BuildError {
    BuildError::Revision {
        revision: revision.unwrap_or("HEAD").to_owned(),
        message: e.to_string(),
    }
}

/// Clone a repository into the bare cache.
fn clone_repository(url: &str, path: &Path) -> BuildResult<gix::Repository> {
    info!(url = %url, path = %path.display(), "cloning repository");

    let mut prepare = gix::prepare_clone_bare(url, path).map_err(|e| BuildError::GitClone {
        url: url.to_owned(),
        message: e.to_string(),
    })?;

    let (repo, _outcome) = prepare
        .fetch_only(Discard, &gix::interrupt::IS_INTERRUPTED)
        .map_err(|e| BuildError::GitClone {
            url: url.to_owned(),
            message: e.to_string(),
        })?;

    Ok(repo)
}

/// Fetch updates into an existing cached repository.
fn fetch_repository(path: &Path, url: &str) -> BuildResult<gix::Repository> {
    debug!(path = %path.display(), "fetching updates");

    let repo = gix::open(path).map_err(|e| BuildError::GitFetch(e.to_string()))?;

    let remote = repo
        .find_remote("origin")
        .or_else(|_| repo.remote_at(url))
        .map_err(|e| BuildError::GitFetch(e.to_string()))?;

    let _outcome = remote
        .connect(gix::remote::Direction::Fetch)
        .map_err(|e| BuildError::GitFetch(e.to_string()))?
        .prepare_fetch(Discard, Default::default())
        .map_err(|e| BuildError::GitFetch(e.to_string()))?
        .receive(Discard, &gix::interrupt::IS_INTERRUPTED)
        .map_err(|e| BuildError::GitFetch(e.to_string()))?;

    Ok(repo)
}

/// Resolve a branch name or commit SHA to an object ID.
fn resolve_revision(repo: &gix::Repository, revision: Option<&str>) -> BuildResult<gix::ObjectId> {
    let Some(revision) = revision else {
        return repo
            .head_id()
            .map(|id| id.detach())
            .map_err(|e| revision_error(None, e));
    };

    // Full SHA first.
    if revision.len() == 40 && revision.chars().all(|c| c.is_ascii_hexdigit()) {
        if let Ok(id) = gix::ObjectId::from_hex(revision.as_bytes()) {
            if repo.find_object(id).is_ok() {
                return Ok(id);
            }
        }
    }

    // Branch or tag name, local then remote-tracking.
    for candidate in [
        revision.to_owned(),
        format!("refs/heads/{revision}"),
        format!("refs/remotes/origin/{revision}"),
    ] {
        if let Ok(reference) = repo.find_reference(&candidate) {
            if let Ok(id) = reference.into_fully_peeled_id() {
                return Ok(id.detach());
            }
        }
    }

    if revision.eq_ignore_ascii_case("head") {
        if let Ok(head) = repo.head_id() {
            return Ok(head.detach());
        }
    }

    // Abbreviated SHA: scan the object database.
    if revision.len() >= 7 && revision.len() < 40 && revision.chars().all(|c| c.is_ascii_hexdigit())
    {
        let prefix = revision.to_lowercase();
        let iter = repo
            .objects
            .iter()
            .map_err(|e| revision_error(Some(revision), e))?;
        for oid in iter.flatten() {
            if oid.to_hex().to_string().starts_with(&prefix) {
                return Ok(oid);
            }
        }
    }

    Err(BuildError::Revision {
        revision: revision.to_owned(),
        message: "could not resolve revision".to_owned(),
    })
}

/// Recursively extract a tree into a directory.
fn extract_tree(repo: &gix::Repository, tree: &gix::Tree<'_>, dest: &Path) -> BuildResult<()> {
    for entry in tree.iter() {
        let entry = entry.map_err(|e| BuildError::Internal(format!("bad tree entry: {e}")))?;

        let name = std::str::from_utf8(entry.filename())
            .map_err(|_| BuildError::Internal("invalid filename encoding".to_owned()))?;

        if name.contains("..") || name.starts_with('/') || name.contains('\0') {
            return Err(BuildError::PathEscape {
                path: dest.join(name),
            });
        }

        let entry_path = dest.join(name);

        match entry.mode().kind() {
            gix::object::tree::EntryKind::Tree => {
                std::fs::create_dir_all(&entry_path)?;
                let subtree = repo
                    .find_tree(entry.oid())
                    .map_err(|e| BuildError::Internal(format!("missing subtree: {e}")))?;
                extract_tree(repo, &subtree, &entry_path)?;
            }
            gix::object::tree::EntryKind::Blob | gix::object::tree::EntryKind::BlobExecutable => {
                let object = repo
                    .find_object(entry.oid())
                    .map_err(|e| BuildError::Internal(format!("missing blob: {e}")))?;
                std::fs::write(&entry_path, object.data.as_slice())?;

                #[cfg(unix)]
                if matches!(
                    entry.mode().kind(),
                    gix::object::tree::EntryKind::BlobExecutable
                ) {
                    use std::os::unix::fs::PermissionsExt;
                    let mut perms = std::fs::metadata(&entry_path)?.permissions();
                    perms.set_mode(0o755);
                    std::fs::set_permissions(&entry_path, perms)?;
                }
            }
            gix::object::tree::EntryKind::Link => {
                warn!(path = %entry_path.display(), "skipping symlink in repository");
            }
            gix::object::tree::EntryKind::Commit => {
                warn!(path = %entry_path.display(), "skipping submodule");
            }
        }
    }

    Ok(())
}

/// Remove working directories whose mtime exceeds `max_age`.
fn sweep_stale_trees(work_dir: &Path, max_age: Duration) -> BuildResult<usize> {
    if !work_dir.exists() {
        return Ok(0);
    }

    let now = std::time::SystemTime::now();
    let mut removed = 0;

    for entry in std::fs::read_dir(work_dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;

        if !metadata.is_dir() {
            continue;
        }

        if let Ok(modified) = metadata.modified() {
            if let Ok(age) = now.duration_since(modified) {
                if age > max_age {
                    debug!(path = %entry.path().display(), age = ?age, "removing stale working directory");
                    if let Err(e) = std::fs::remove_dir_all(entry.path()) {
                        warn!(path = %entry.path().display(), error = %e, "failed to remove working directory");
                    } else {
                        removed += 1;
                    }
                }
            }
        }
    }

    info!(removed, "swept stale working directories");
    Ok(removed)
}

/// Sanitise a string for use as a filesystem path component.
fn sanitise_for_path(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_branches_and_shas() {
        assert!(validate_revision("main").is_ok());
        assert!(validate_revision("feature/login").is_ok());
        assert!(validate_revision("abc123def456789").is_ok());
        assert!(validate_revision("abcdef1234567890abcdef1234567890abcdef12").is_ok());
    }

    #[test]
    fn rejects_malformed_revisions() {
        assert!(validate_revision("").is_err());
        assert!(validate_revision("-rf").is_err());
        assert!(validate_revision("a..b").is_err());
        assert!(validate_revision("has space").is_err());
    }

    #[test]
    fn sanitise_for_path_replaces_separators() {
        assert_eq!(sanitise_for_path("my-project"), "my-project");
        assert_eq!(sanitise_for_path("alice/my-api"), "alice_my-api");
        assert_eq!(sanitise_for_path("my:project"), "my_project");
    }

    #[test]
    fn sweep_ignores_missing_directory() {
        let removed = sweep_stale_trees(Path::new("/nonexistent/berth-test"), Duration::ZERO)
            .expect("sweep");
        assert_eq!(removed, 0);
    }

    #[test]
    fn sweep_removes_old_trees_only() {
        let root = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(root.path().join("old-tree")).expect("mkdir");
        std::fs::write(root.path().join("a-file"), b"x").expect("write");

        // Everything is younger than an hour; nothing goes.
        let removed = sweep_stale_trees(root.path(), Duration::from_secs(3600)).expect("sweep");
        assert_eq!(removed, 0);

        // With a zero threshold the directory goes, the file stays.
        let removed = sweep_stale_trees(root.path(), Duration::ZERO).expect("sweep");
        assert_eq!(removed, 1);
        assert!(root.path().join("a-file").exists());
    }
}
