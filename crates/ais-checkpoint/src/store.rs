// SPDX-License-Identifier: MIT OR Apache-2.0
//! Checkpoint persistence: a [`CheckpointStore`] trait plus a file-backed
//! implementation that writes atomically and an in-memory one for tests and
//! single-process runs that don't need survival across restarts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ais_core::Checkpoint;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Errors a [`CheckpointStore`] implementation can return.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The checkpoint file (or its temp sibling) could not be read or written.
    #[error("checkpoint i/o error at {path}: {source}")]
    Io {
        /// Path being read or written when the error occurred.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// The stored bytes were not a valid checkpoint document.
    #[error("checkpoint at {path} failed to deserialize: {source}")]
    Decode {
        /// Path of the file that failed to decode.
        path: PathBuf,
        /// Underlying JSON failure.
        #[source]
        source: serde_json::Error,
    },
    /// The checkpoint's `schema` field is not one this crate understands.
    #[error("checkpoint at {path} has unsupported schema `{schema}`")]
    UnsupportedSchema {
        /// Path of the file with the unsupported schema.
        path: PathBuf,
        /// The schema string found in the document.
        schema: String,
    },
    /// No checkpoint exists at the requested path.
    #[error("no checkpoint found at {path}")]
    NotFound {
        /// Path that was probed.
        path: PathBuf,
    },
}

/// Persists and retrieves [`Checkpoint`] snapshots.
///
/// Implementations are keyed by an explicit path (or, for the in-memory
/// variant, an opaque key) rather than a generated id: a run names its own
/// checkpoint location (typically via `--checkpoint`) and the store just
/// needs to write there atomically and read it back.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist `checkpoint`, replacing whatever was previously stored at
    /// `path`. Must not leave a partially-written file visible at `path` if
    /// interrupted mid-write.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if serialization to bytes succeeds but the
    /// write or rename fails.
    async fn save(&self, path: &Path, checkpoint: &Checkpoint) -> Result<(), StoreError>;

    /// Load the checkpoint most recently saved at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`], [`StoreError::Io`],
    /// [`StoreError::Decode`], or [`StoreError::UnsupportedSchema`].
    async fn load(&self, path: &Path) -> Result<Checkpoint, StoreError>;

    /// Whether a checkpoint currently exists at `path`.
    async fn exists(&self, path: &Path) -> bool;
}

/// Writes checkpoints to a JSON file at the given path, atomically.
///
/// `save` encodes with `serde_json`, writes to a sibling `.tmp` file in the
/// same directory, then renames it over the destination — `rename` is
/// atomic on the same filesystem, so a crash mid-write never leaves a
/// truncated checkpoint where a reader would find it.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileCheckpointStore;

impl FileCheckpointStore {
    /// Construct a new file-backed store. Stateless — every call takes its
    /// own path.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn tmp_path(path: &Path) -> PathBuf {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("checkpoint");
        path.with_file_name(format!(".{name}.tmp"))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, path: &Path, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(checkpoint)
            .map_err(|source| StoreError::Decode { path: path.to_path_buf(), source })?;
        let tmp = Self::tmp_path(path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|source| StoreError::Io { path: parent.to_path_buf(), source })?;
            }
        }

        tokio::fs::write(&tmp, &bytes).await.map_err(|source| StoreError::Io { path: tmp.clone(), source })?;
        tokio::fs::rename(&tmp, path).await.map_err(|source| StoreError::Io { path: path.to_path_buf(), source })?;
        debug!(target: "ais.checkpoint", path = %path.display(), bytes = bytes.len(), "checkpoint saved");
        Ok(())
    }

    async fn load(&self, path: &Path) -> Result<Checkpoint, StoreError> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(StoreError::NotFound { path: path.to_path_buf() });
        }
        let bytes = tokio::fs::read(path).await.map_err(|source| StoreError::Io { path: path.to_path_buf(), source })?;
        let checkpoint: Checkpoint =
            serde_json::from_slice(&bytes).map_err(|source| StoreError::Decode { path: path.to_path_buf(), source })?;
        if !checkpoint.schema_supported() {
            warn!(target: "ais.checkpoint", path = %path.display(), schema = %checkpoint.schema, "unsupported checkpoint schema");
            return Err(StoreError::UnsupportedSchema { path: path.to_path_buf(), schema: checkpoint.schema });
        }
        Ok(checkpoint)
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }
}

/// Keeps only the last checkpoint saved for each path, in memory.
///
/// Intended for tests and for runs that opt out of durable checkpointing —
/// nothing survives a process restart.
#[derive(Debug, Default, Clone)]
pub struct InMemoryCheckpointStore {
    last: Arc<Mutex<Option<(PathBuf, Checkpoint)>>>,
}

impl InMemoryCheckpointStore {
    /// Construct an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self { last: Arc::new(Mutex::new(None)) }
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, path: &Path, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        *self.last.lock().await = Some((path.to_path_buf(), checkpoint.clone()));
        Ok(())
    }

    async fn load(&self, path: &Path) -> Result<Checkpoint, StoreError> {
        match &*self.last.lock().await {
            Some((saved_path, checkpoint)) if saved_path == path => Ok(checkpoint.clone()),
            _ => Err(StoreError::NotFound { path: path.to_path_buf() }),
        }
    }

    async fn exists(&self, path: &Path) -> bool {
        matches!(&*self.last.lock().await, Some((saved_path, _)) if saved_path == path)
    }
}
