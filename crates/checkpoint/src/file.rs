//! Checkpoints as JSON files, replaced via write-to-temp, fsync, rename.

use crate::CheckpointStore;
use async_trait::async_trait;
use engine_core::{Checkpoint, Error, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// Opens a store rooted at `dir`, creating the directory if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await.map_err(|e| {
            Error::checkpoint(format!(
                "failed to create checkpoint dir {}: {}",
                dir.display(),
                e
            ))
        })?;
        info!(dir = %dir.display(), "Checkpoint store opened");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, pipeline_id: &str) -> PathBuf {
        self.dir.join(format!("{}.checkpoint.json", sanitize(pipeline_id)))
    }
}

/// Keeps ids usable as file names.
fn sanitize(pipeline_id: &str) -> String {
    pipeline_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Flushes directory entries so a completed rename survives a crash.
#[cfg(unix)]
async fn sync_dir(dir: &Path) -> std::io::Result<()> {
    fs::File::open(dir).await?.sync_all().await
}

/// No directory handle to sync on this platform.
#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self, pipeline_id: &str) -> Result<Option<Checkpoint>> {
        let path = self.path_for(pipeline_id);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::checkpoint(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let checkpoint = Checkpoint::from_bytes(&bytes)?;
        checkpoint.verify_owner(pipeline_id)?;
        debug!(
            pipeline_id,
            sequence = checkpoint.sequence,
            "Loaded checkpoint"
        );
        Ok(Some(checkpoint))
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let path = self.path_for(&checkpoint.pipeline_id);
        let tmp = path.with_extension("json.tmp");
        let bytes = checkpoint.to_bytes()?;
        let io_err = |what: &str, e: std::io::Error| {
            Error::checkpoint(format!("failed to {} {}: {}", what, tmp.display(), e))
        };

        let mut file = fs::File::create(&tmp)
            .await
            .map_err(|e| io_err("create", e))?;
        file.write_all(&bytes).await.map_err(|e| io_err("write", e))?;
        file.sync_all().await.map_err(|e| io_err("sync", e))?;
        drop(file);

        fs::rename(&tmp, &path).await.map_err(|e| {
            Error::checkpoint(format!(
                "failed to replace {}: {}",
                path.display(),
                e
            ))
        })?;
        sync_dir(&self.dir).await.map_err(|e| {
            Error::checkpoint(format!("failed to sync {}: {}", self.dir.display(), e))
        })?;

        debug!(
            pipeline_id = %checkpoint.pipeline_id,
            sequence = checkpoint.sequence,
            bytes = bytes.len(),
            "Checkpoint written"
        );
        Ok(())
    }
}
