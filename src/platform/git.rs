use anyhow::{Context, Result};
use async_trait::async_trait;
use git2::{IndexAddOption, Repository, Signature, StatusOptions};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use super::Vcs;

/// Git working copy. Local operations go through `git2`; pushing shells out to
/// `git` so the user's credential helpers apply.
pub struct GitRepo {
    project_dir: PathBuf,
}

impl GitRepo {
    pub fn new(project_dir: &Path) -> Self {
        Self {
            project_dir: project_dir.to_path_buf(),
        }
    }

    fn open(&self) -> Result<Repository> {
        Repository::discover(&self.project_dir).context("Failed to open git repository")
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Repository) -> Result<T> + Send + 'static,
    {
        // Repository is Send but not Sync; hand it to the blocking pool whole.
        let repo = self.open()?;
        let path = self.project_dir.clone();
        tokio::task::spawn_blocking(move || f(repo))
            .await
            .with_context(|| format!("git task panicked in {}", path.display()))?
    }
}

fn head_sha(repo: &Repository) -> Option<String> {
    repo.head()
        .ok()
        .and_then(|head| head.peel_to_commit().ok())
        .map(|c| c.id().to_string())
}

#[async_trait]
impl Vcs for GitRepo {
    async fn dirty_paths(&self) -> Result<Vec<String>> {
        self.blocking(|repo| {
            let mut opts = StatusOptions::new();
            opts.include_untracked(true)
                .recurse_untracked_dirs(true)
                .include_ignored(false);
            let statuses = repo
                .statuses(Some(&mut opts))
                .context("Failed to read git status")?;
            Ok(statuses
                .iter()
                .filter_map(|entry| entry.path().map(str::to_string))
                .collect())
        })
        .await
    }

    async fn head_revision(&self) -> Result<Option<String>> {
        self.blocking(|repo| Ok(head_sha(&repo))).await
    }

    async fn current_branch(&self) -> Result<String> {
        self.blocking(|repo| {
            let head = repo.head().context("Failed to resolve HEAD")?;
            head.shorthand()
                .map(str::to_string)
                .filter(|name| name != "HEAD")
                .context("HEAD is detached; check out a branch before launching")
        })
        .await
    }

    async fn commit_paths(&self, paths: &[PathBuf], message: &str) -> Result<Option<String>> {
        let specs: Vec<String> = paths
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        let message = message.to_string();
        self.blocking(move |repo| {
            let mut index = repo.index().context("Failed to open git index")?;
            index
                .add_all(specs.iter(), IndexAddOption::DEFAULT, None)
                .context("Failed to stage launch files")?;
            index
                .update_all(specs.iter(), None)
                .context("Failed to stage removed launch files")?;
            index.write()?;

            let tree_id = index.write_tree()?;
            let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
            if let Some(parent) = &parent
                && parent.tree_id() == tree_id
            {
                return Ok(None);
            }

            let tree = repo.find_tree(tree_id)?;
            let sig = repo
                .signature()
                .or_else(|_| Signature::now("launch-shop", "launch-shop@localhost"))?;
            let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
            let oid = repo
                .commit(Some("HEAD"), &sig, &sig, &message, &tree, &parents)
                .context("Failed to create commit")?;
            Ok(Some(oid.to_string()))
        })
        .await
    }

    async fn push(&self, branch: &str) -> Result<()> {
        let refspec = format!("HEAD:refs/heads/{}", branch);
        let output = tokio::process::Command::new("git")
            .args(["push", "origin", &refspec])
            .current_dir(&self.project_dir)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .context("Failed to run git push")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("git push failed: {}", stderr.trim());
        }
        Ok(())
    }
}
