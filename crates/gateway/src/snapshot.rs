//! Workspace snapshot seam.
//!
//! Compaction's resume context wants a picture of where the work stands:
//! the git branch, staged and uncommitted files. Gathered by shelling
//! out to `git`; a workspace without git yields an empty state.

use std::path::{Path, PathBuf};

use serde::Serialize;

#[derive(Debug, Clone, Serialize, Default)]
pub struct GitState {
    pub branch: Option<String>,
    pub staged: Vec<String>,
    pub uncommitted: Vec<String>,
}

impl GitState {
    pub fn is_empty(&self) -> bool {
        self.branch.is_none() && self.staged.is_empty() && self.uncommitted.is_empty()
    }
}

pub struct Snapshotter {
    workdir: PathBuf,
}

impl Snapshotter {
    pub fn new(workdir: &Path) -> Self {
        Self {
            workdir: workdir.to_path_buf(),
        }
    }

    async fn git(&self, args: &[&str]) -> Option<String> {
        let output = tokio::process::Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    pub async fn git_state(&self) -> GitState {
        let branch = self.git(&["rev-parse", "--abbrev-ref", "HEAD"]).await;
        if branch.is_none() {
            return GitState::default();
        }

        let staged = self
            .git(&["diff", "--name-only", "--cached"])
            .await
            .map(split_lines)
            .unwrap_or_default();
        let uncommitted = self
            .git(&["diff", "--name-only"])
            .await
            .map(split_lines)
            .unwrap_or_default();

        GitState {
            branch,
            staged,
            uncommitted,
        }
    }

    /// Unified diff of uncommitted changes, for the resume context.
    pub async fn diff(&self) -> Option<String> {
        self.git(&["diff"]).await.filter(|d| !d.is_empty())
    }
}

fn split_lines(raw: String) -> Vec<String> {
    raw.lines()
        .filter(|l| !l.trim().is_empty())
        .map(str::to_string)
        .collect()
}
