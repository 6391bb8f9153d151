//! File-backed checkpoint store.
//!
//! Layout under the state directory:
//!
//! ```text
//! <shop>.state.json              active checkpoint, replaced atomically
//! <shop>.lock                    advisory lock held by a running launch
//! archive/<shop>-<launch>.json   completed and cancelled launches
//! ```

use chrono::Utc;
use fs2::FileExt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::checkpoint::{LaunchCheckpoint, LaunchStatus, LaunchStep};
use crate::config::LaunchMode;
use crate::errors::StoreError;
use crate::util::write_atomic;

/// Outcome of asking whether a shop's checkpoint can be resumed.
#[derive(Debug, Clone)]
pub struct ResumeInfo {
    pub can_resume: bool,
    pub checkpoint: Option<LaunchCheckpoint>,
    pub resume_from_step: Option<LaunchStep>,
    pub reason: Option<String>,
}

impl ResumeInfo {
    fn refused(checkpoint: Option<LaunchCheckpoint>, reason: impl Into<String>) -> Self {
        Self {
            can_resume: false,
            checkpoint,
            resume_from_step: None,
            reason: Some(reason.into()),
        }
    }
}

pub struct CheckpointStore {
    state_dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(state_dir: PathBuf) -> Self {
        Self { state_dir }
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn state_path(&self, shop_id: &str) -> PathBuf {
        self.state_dir.join(format!("{}.state.json", shop_id))
    }

    fn archive_dir(&self) -> PathBuf {
        self.state_dir.join("archive")
    }

    fn lock_path(&self, shop_id: &str) -> PathBuf {
        self.state_dir.join(format!("{}.lock", shop_id))
    }

    pub fn create_checkpoint(
        &self,
        launch_id: String,
        shop_id: String,
        fingerprint: String,
        mode: LaunchMode,
    ) -> LaunchCheckpoint {
        LaunchCheckpoint::new(launch_id, shop_id, fingerprint, mode)
    }

    /// Read the active checkpoint, reporting corruption as an error.
    pub fn read(&self, shop_id: &str) -> Result<Option<LaunchCheckpoint>, StoreError> {
        let path = self.state_path(shop_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                path,
                message: e.to_string(),
            })
    }

    /// Read the active checkpoint; an unreadable file is logged and treated as absent.
    pub fn load(&self, shop_id: &str) -> Option<LaunchCheckpoint> {
        match self.read(shop_id) {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                warn!("Ignoring launch state for {}: {}", shop_id, e);
                None
            }
        }
    }

    /// Persist the checkpoint, stamping `updated_at`.
    pub fn save(&self, checkpoint: &mut LaunchCheckpoint) -> Result<(), StoreError> {
        checkpoint.updated_at = Utc::now();
        self.write(checkpoint)?;
        debug!(
            "Saved checkpoint {} for {} ({})",
            checkpoint.launch_id, checkpoint.shop_id, checkpoint.status
        );
        Ok(())
    }

    fn write(&self, checkpoint: &LaunchCheckpoint) -> Result<(), StoreError> {
        let path = self.state_path(&checkpoint.shop_id);
        let json = serde_json::to_vec_pretty(checkpoint)
            .map_err(|e| StoreError::Other(anyhow::Error::new(e)))?;
        write_atomic(&path, &json)?;
        Ok(())
    }

    /// Remove the active checkpoint file, if any.
    pub fn discard(&self, shop_id: &str) -> Result<(), StoreError> {
        let path = self.state_path(shop_id);
        if path.exists() {
            fs::remove_file(&path).map_err(|source| StoreError::Io { path, source })?;
        }
        Ok(())
    }

    /// Decide whether the shop's failed launch may be resumed with this configuration.
    pub fn check_resumeability(
        &self,
        shop_id: &str,
        fingerprint: &str,
        mode: LaunchMode,
        max_age: chrono::Duration,
    ) -> ResumeInfo {
        let checkpoint = match self.read(shop_id) {
            Ok(Some(cp)) => cp,
            Ok(None) => return ResumeInfo::refused(None, "No previous launch state found"),
            Err(e) => {
                warn!("Launch state for {} is unreadable: {}", shop_id, e);
                return ResumeInfo::refused(None, format!("Launch state is unreadable ({})", e));
            }
        };

        let reason = match checkpoint.status {
            LaunchStatus::Completed => Some("Previous launch already completed".to_string()),
            LaunchStatus::Cancelled => Some("Previous launch was cancelled".to_string()),
            _ if checkpoint.config_fingerprint != fingerprint => Some(
                "Launch configuration has changed since the failed attempt".to_string(),
            ),
            _ if checkpoint.mode != mode => Some(format!(
                "Previous launch ran in {} mode, not {}",
                checkpoint.mode, mode
            )),
            LaunchStatus::Pending | LaunchStatus::Running => Some(format!(
                "Previous launch is still {}",
                checkpoint.status
            )),
            LaunchStatus::Failed if !checkpoint.failed_recoverable => Some(format!(
                "Previous launch failed at {} with a non-recoverable error: {}",
                checkpoint
                    .failed_step
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "unknown step".to_string()),
                checkpoint.failed_error.as_deref().unwrap_or("no details")
            )),
            LaunchStatus::Failed if Utc::now() - checkpoint.updated_at > max_age => Some(format!(
                "Launch state is older than {} hours",
                max_age.num_hours()
            )),
            LaunchStatus::Failed => None,
        };
        if let Some(reason) = reason {
            return ResumeInfo::refused(Some(checkpoint), reason);
        }

        match checkpoint.resume_from_step() {
            Some(step) => ResumeInfo {
                can_resume: true,
                resume_from_step: Some(step),
                checkpoint: Some(checkpoint),
                reason: None,
            },
            None => ResumeInfo::refused(Some(checkpoint), "Every step already succeeded"),
        }
    }

    /// Copy the checkpoint into the archive and clear it from the active slot.
    pub fn archive(&self, checkpoint: &LaunchCheckpoint) -> Result<PathBuf, StoreError> {
        let path = self
            .archive_dir()
            .join(format!("{}-{}.json", checkpoint.shop_id, checkpoint.launch_id));
        let json = serde_json::to_vec_pretty(checkpoint)
            .map_err(|e| StoreError::Other(anyhow::Error::new(e)))?;
        write_atomic(&path, &json)?;

        if let Ok(Some(active)) = self.read(&checkpoint.shop_id)
            && active.launch_id == checkpoint.launch_id
        {
            self.discard(&checkpoint.shop_id)?;
        }
        info!(
            "Archived launch {} for {} ({})",
            checkpoint.launch_id, checkpoint.shop_id, checkpoint.status
        );
        Ok(path)
    }

    /// Cancel the shop's active launch, if there is one.
    pub fn cancel(&self, shop_id: &str) -> Result<Option<LaunchCheckpoint>, StoreError> {
        let Some(mut checkpoint) = self.read(shop_id)? else {
            return Ok(None);
        };
        if checkpoint.status != LaunchStatus::Completed {
            checkpoint.mark_cancelled();
        }
        checkpoint.updated_at = Utc::now();
        self.archive(&checkpoint)?;
        Ok(Some(checkpoint))
    }

    /// Archived launches for the shop, newest first.
    pub fn list_recent(&self, shop_id: &str) -> Result<Vec<LaunchCheckpoint>, StoreError> {
        let dir = self.archive_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;

        let mut launches = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let parsed = fs::read_to_string(&path)
                .map_err(anyhow::Error::new)
                .and_then(|c| {
                    serde_json::from_str::<LaunchCheckpoint>(&c).map_err(anyhow::Error::new)
                });
            match parsed {
                Ok(cp) if cp.shop_id == shop_id => launches.push(cp),
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable archive {}: {}", path.display(), e),
            }
        }
        launches.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(launches)
    }

    /// Keep the newest `keep` archived launches for the shop. Returns how many were removed.
    pub fn prune(&self, shop_id: &str, keep: usize) -> Result<usize, StoreError> {
        let launches = self.list_recent(shop_id)?;
        let mut removed = 0;
        for launch in launches.iter().skip(keep) {
            let path = self
                .archive_dir()
                .join(format!("{}-{}.json", launch.shop_id, launch.launch_id));
            if path.exists() {
                fs::remove_file(&path).map_err(|source| StoreError::Io {
                    path: path.clone(),
                    source,
                })?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!("Pruned {} archived launch(es) for {}", removed, shop_id);
        }
        Ok(removed)
    }

    /// Take the shop's advisory lock, failing fast if another launch holds it.
    pub fn lock(&self, shop_id: &str) -> Result<ShopLock, StoreError> {
        let path = self.lock_path(shop_id);
        fs::create_dir_all(&self.state_dir).map_err(|source| StoreError::Io {
            path: self.state_dir.clone(),
            source,
        })?;
        let file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
        file.try_lock_exclusive().map_err(|_| StoreError::Locked {
            shop_id: shop_id.to_string(),
            path: path.clone(),
        })?;
        debug!("Acquired launch lock {}", path.display());
        Ok(ShopLock { file, path })
    }
}

/// Held for the duration of a mutating launch; released on drop.
#[derive(Debug)]
pub struct ShopLock {
    file: fs::File,
    path: PathBuf,
}

impl Drop for ShopLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to release lock {}: {}", self.path.display(), e);
        }
    }
}
