//! Workspace change tracking via libgit2.
//!
//! The runner snapshots the working tree before each agent attempt, reads
//! the set of changed files afterwards (which feeds drift detection and
//! the diff-size gate check), and can hard-revert to the snapshot when the
//! drift policy demands it.

use anyhow::{Context, Result};
use git2::{Delta, DiffOptions, Repository, ResetType, Signature};
use std::path::Path;
use std::sync::Mutex;

/// Changes in the working tree relative to a snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    /// Paths of added, modified, and deleted files, in diff order.
    pub files: Vec<String>,
    /// Total added plus removed lines.
    pub lines_changed: usize,
}

/// What the per-issue loop needs from the working tree.
pub trait Workspace: Send + Sync {
    /// Record the current tree; returns an opaque snapshot id.
    fn snapshot(&self, label: &str) -> Result<String>;

    /// Everything changed since the snapshot, including untracked files.
    fn changes_since(&self, snapshot: &str) -> Result<ChangeSet>;

    /// Hard-revert the working tree to the snapshot.
    fn revert_to(&self, snapshot: &str) -> Result<()>;
}

/// Git-backed workspace. The repository handle is not thread-safe, so all
/// access goes through a mutex; operations are short-lived.
pub struct GitWorkspace {
    repo: Mutex<Repository>,
}

impl GitWorkspace {
    pub fn open(project_dir: &Path) -> Result<Self> {
        let repo = Repository::open(project_dir).context("Failed to open git repository")?;
        Ok(Self {
            repo: Mutex::new(repo),
        })
    }
}

impl Workspace for GitWorkspace {
    fn snapshot(&self, label: &str) -> Result<String> {
        let repo = self.repo.lock().unwrap();
        let mut index = repo.index()?;

        index.add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)?;
        index.write()?;

        let tree_id = index.write_tree()?;
        let tree = repo.find_tree(tree_id)?;
        let sig = Signature::now("huddle", "huddle@localhost")?;
        let message = format!("[huddle] snapshot: {}", label);

        // Handle unborn branch (new repo with no commits yet).
        let parent = repo.head().ok().and_then(|head| head.peel_to_commit().ok());
        let commit_id = match parent {
            Some(parent) => repo.commit(Some("HEAD"), &sig, &sig, &message, &tree, &[&parent])?,
            None => repo.commit(Some("HEAD"), &sig, &sig, &message, &tree, &[])?,
        };

        Ok(commit_id.to_string())
    }

    fn changes_since(&self, snapshot: &str) -> Result<ChangeSet> {
        let repo = self.repo.lock().unwrap();
        let oid = git2::Oid::from_str(snapshot)?;
        let commit = repo.find_commit(oid)?;
        let tree = commit.tree()?;

        let mut opts = DiffOptions::new();
        opts.include_untracked(true);

        let diff = repo.diff_tree_to_workdir_with_index(Some(&tree), Some(&mut opts))?;

        let mut changes = ChangeSet::default();
        diff.foreach(
            &mut |delta, _progress| {
                let changed = matches!(
                    delta.status(),
                    Delta::Added | Delta::Untracked | Delta::Modified | Delta::Deleted | Delta::Renamed
                );
                if changed && let Some(path) = delta.new_file().path() {
                    changes.files.push(path.to_string_lossy().into_owned());
                }
                true
            },
            None,
            None,
            Some(&mut |_delta, _hunk, line| {
                if matches!(line.origin(), '+' | '-') {
                    changes.lines_changed += 1;
                }
                true
            }),
        )?;

        Ok(changes)
    }

    fn revert_to(&self, snapshot: &str) -> Result<()> {
        let repo = self.repo.lock().unwrap();
        let oid = git2::Oid::from_str(snapshot)?;
        let object = repo.find_object(oid, None)?;

        // Untracked files the agent left behind are part of the drift;
        // sweep them along with the reset.
        let mut checkout = git2::build::CheckoutBuilder::new();
        checkout.force().remove_untracked(true);
        repo.reset(&object, ResetType::Hard, Some(&mut checkout))
            .context("Failed to revert working tree to snapshot")?;
        Ok(())
    }
}
