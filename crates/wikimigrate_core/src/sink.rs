//! Version-control sink receiving the replayed history.

use std::fs;
use std::path::{Component, Path, PathBuf};

use git2::{Repository, Signature, Time};
use tracing::debug;

use crate::error::SinkError;
use crate::timestamp::iso8601_to_unix;

/// Working tree that accepts file writes, removals and commits.
///
/// Paths are relative to the working tree and use `/` separators.
pub trait VcsSink {
    fn write(&mut self, path: &str, content: &str) -> Result<(), SinkError>;

    /// Remove `path` from the tree and the tracked state. Returns `false` when
    /// the path was never tracked, in which case nothing changes.
    fn remove(&mut self, path: &str) -> Result<bool, SinkError>;

    fn stage(&mut self, path: &str) -> Result<(), SinkError>;

    /// Reject commit metadata the sink cannot record, before any file is touched.
    fn check_commit(
        &self,
        _author_name: &str,
        _author_email: &str,
        _timestamp: &str,
    ) -> Result<(), SinkError> {
        Ok(())
    }

    /// Record the staged state as a new commit on top of the previous one and
    /// return its id. `timestamp` is `YYYY-MM-DDTHH:MM:SS` in UTC.
    fn commit(
        &mut self,
        author_name: &str,
        author_email: &str,
        timestamp: &str,
        message: &str,
    ) -> Result<String, SinkError>;
}

/// A non-bare git repository written through libgit2.
pub struct GitSink {
    repo: Repository,
    workdir: PathBuf,
}

impl GitSink {
    /// Create `directory` (and parents) and initialize an empty repository in it.
    pub fn init(directory: &Path) -> Result<Self, SinkError> {
        fs::create_dir_all(directory).map_err(|source| SinkError::Io {
            action: "create",
            path: directory.to_path_buf(),
            source,
        })?;
        let repo = Repository::init(directory)?;
        Ok(Self {
            repo,
            workdir: directory.to_path_buf(),
        })
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, SinkError> {
        let relative = Path::new(path);
        let is_plain = !path.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !is_plain {
            return Err(SinkError::PathOutsideTree(path.to_string()));
        }
        Ok(self.workdir.join(relative))
    }

    fn prune_empty_parents(&self, file: &Path) {
        let mut cursor = file.parent();
        while let Some(dir) = cursor {
            if dir == self.workdir || fs::remove_dir(dir).is_err() {
                break;
            }
            cursor = dir.parent();
        }
    }
}

impl VcsSink for GitSink {
    fn write(&mut self, path: &str, content: &str) -> Result<(), SinkError> {
        let absolute = self.resolve(path)?;
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent).map_err(|source| SinkError::Io {
                action: "create",
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(&absolute, content).map_err(|source| SinkError::Io {
            action: "write",
            path: absolute.clone(),
            source,
        })
    }

    fn remove(&mut self, path: &str) -> Result<bool, SinkError> {
        let absolute = self.resolve(path)?;
        let mut index = self.repo.index()?;
        let tracked = index.get_path(Path::new(path), 0).is_some();
        if !tracked {
            return Ok(false);
        }

        if absolute.exists() {
            fs::remove_file(&absolute).map_err(|source| SinkError::Io {
                action: "remove",
                path: absolute.clone(),
                source,
            })?;
            self.prune_empty_parents(&absolute);
        }
        index.remove_path(Path::new(path))?;
        index.write()?;
        Ok(true)
    }

    fn stage(&mut self, path: &str) -> Result<(), SinkError> {
        self.resolve(path)?;
        let mut index = self.repo.index()?;
        index.add_path(Path::new(path))?;
        index.write()?;
        Ok(())
    }

    fn check_commit(
        &self,
        author_name: &str,
        author_email: &str,
        timestamp: &str,
    ) -> Result<(), SinkError> {
        signature(author_name, author_email, timestamp).map(|_| ())
    }

    fn commit(
        &mut self,
        author_name: &str,
        author_email: &str,
        timestamp: &str,
        message: &str,
    ) -> Result<String, SinkError> {
        let signature = signature(author_name, author_email, timestamp)?;

        let mut index = self.repo.index()?;
        let tree_oid = index.write_tree()?;
        let tree = self.repo.find_tree(tree_oid)?;

        let parent_commit = self
            .repo
            .head()
            .ok()
            .and_then(|head| head.peel_to_commit().ok());
        let parents = parent_commit.iter().collect::<Vec<_>>();

        let oid = self.repo.commit(
            Some("HEAD"),
            &signature,
            &signature,
            message,
            &tree,
            &parents,
        )?;
        debug!(commit = %oid, author = author_name, timestamp, "created commit");
        Ok(oid.to_string())
    }
}

fn signature(
    author_name: &str,
    author_email: &str,
    timestamp: &str,
) -> Result<Signature<'static>, SinkError> {
    let seconds =
        iso8601_to_unix(timestamp).ok_or_else(|| SinkError::InvalidDate(timestamp.to_string()))?;
    Ok(Signature::new(author_name, author_email, &Time::new(seconds, 0))?)
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn head_message(sink: &GitSink) -> String {
        let commit = sink
            .repository()
            .head()
            .expect("head")
            .peel_to_commit()
            .expect("commit");
        commit.message().unwrap_or_default().to_string()
    }

    #[test]
    fn commit_records_author_and_timestamp() {
        let temp = tempdir().expect("tempdir");
        let mut sink = GitSink::init(&temp.path().join("repo")).expect("init");

        sink.write("Home.md", "hello\n").expect("write");
        sink.stage("Home.md").expect("stage");
        let id = sink
            .commit("Alice", "alice@example.org", "2010-01-01T00:00:00", "Create Home")
            .expect("commit");

        let commit = sink
            .repository()
            .find_commit(git2::Oid::from_str(&id).expect("oid"))
            .expect("find commit");
        assert_eq!(commit.author().name(), Some("Alice"));
        assert_eq!(commit.author().email(), Some("alice@example.org"));
        assert_eq!(commit.author().when().seconds(), 1_262_304_000);
        assert_eq!(commit.committer().when().seconds(), 1_262_304_000);
        assert_eq!(commit.parent_count(), 0);
        let tree = commit.tree().expect("tree");
        assert!(tree.get_path(Path::new("Home.md")).is_ok());
    }

    #[test]
    fn unchanged_tree_still_produces_a_commit() {
        let temp = tempdir().expect("tempdir");
        let mut sink = GitSink::init(&temp.path().join("repo")).expect("init");

        sink.write("Home.md", "same\n").expect("write");
        sink.stage("Home.md").expect("stage");
        let first = sink
            .commit("Alice", "a@x", "2010-01-01T00:00:00", "first")
            .expect("first");
        sink.write("Home.md", "same\n").expect("rewrite");
        sink.stage("Home.md").expect("restage");
        let second = sink
            .commit("Bob", "b@x", "2010-01-02T00:00:00", "second")
            .expect("second");

        assert_ne!(first, second);
        assert_eq!(head_message(&sink), "second");
    }

    #[test]
    fn removing_untracked_path_is_a_noop() {
        let temp = tempdir().expect("tempdir");
        let mut sink = GitSink::init(&temp.path().join("repo")).expect("init");

        assert!(!sink.remove("Ghost.md").expect("remove"));
        sink.commit("Alice", "a@x", "2010-01-01T00:00:00", "Delete Ghost")
            .expect("empty root commit");
        assert_eq!(head_message(&sink), "Delete Ghost");
    }

    #[test]
    fn remove_deletes_file_and_prunes_empty_folders() {
        let temp = tempdir().expect("tempdir");
        let repo_dir = temp.path().join("repo");
        let mut sink = GitSink::init(&repo_dir).expect("init");

        sink.write("User/Alice.md", "me\n").expect("write");
        sink.stage("User/Alice.md").expect("stage");
        sink.commit("Alice", "a@x", "2010-01-01T00:00:00", "create")
            .expect("commit");

        assert!(sink.remove("User/Alice.md").expect("remove"));
        sink.commit("Alice", "a@x", "2010-01-02T00:00:00", "delete")
            .expect("commit");

        assert!(!repo_dir.join("User").exists());
        let tree = sink
            .repository()
            .head()
            .expect("head")
            .peel_to_tree()
            .expect("tree");
        assert_eq!(tree.len(), 0);
    }

    #[test]
    fn rejects_paths_outside_the_tree() {
        let temp = tempdir().expect("tempdir");
        let mut sink = GitSink::init(&temp.path().join("repo")).expect("init");

        for path in ["../escape.md", "/etc/passwd", "", "a/../../b.md"] {
            let error = sink.write(path, "x").expect_err("must fail");
            assert!(matches!(error, SinkError::PathOutsideTree(_)), "{path}");
        }
    }

    #[test]
    fn invalid_date_fails_without_moving_head() {
        let temp = tempdir().expect("tempdir");
        let mut sink = GitSink::init(&temp.path().join("repo")).expect("init");

        sink.write("Home.md", "x\n").expect("write");
        sink.stage("Home.md").expect("stage");
        sink.commit("Alice", "a@x", "2010-01-01T00:00:00", "good")
            .expect("commit");

        let error = sink
            .commit("Alice", "a@x", "2010-13-01T00:00:00", "bad")
            .expect_err("must fail");
        assert!(matches!(error, SinkError::InvalidDate(_)));
        assert_eq!(head_message(&sink), "good");
    }

    #[test]
    fn check_commit_matches_commit_validation() {
        let temp = tempdir().expect("tempdir");
        let sink = GitSink::init(&temp.path().join("repo")).expect("init");
        sink.check_commit("Alice", "a@x", "2010-01-01T00:00:00")
            .expect("valid");
        assert!(matches!(
            sink.check_commit("Alice", "a@x", "2010-02-30T00:00:00"),
            Err(SinkError::InvalidDate(_))
        ));
        assert!(matches!(
            sink.check_commit("", "", "2010-01-01T00:00:00"),
            Err(SinkError::Git(_))
        ));
    }

    #[test]
    fn empty_author_name_is_rejected() {
        let temp = tempdir().expect("tempdir");
        let mut sink = GitSink::init(&temp.path().join("repo")).expect("init");
        let error = sink
            .commit("", "", "2010-01-01T00:00:00", "nobody")
            .expect_err("must fail");
        assert!(matches!(error, SinkError::Git(_)));
        assert!(sink.repository().head().is_err());
    }
}
