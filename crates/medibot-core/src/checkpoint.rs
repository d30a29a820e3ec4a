//! Resumable ingestion: remembers which documents were fully upserted, and how many
//! chunks each document last left in the index.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::app_data;

const CHECKPOINT_FILENAME: &str = "checkpoint.json";

/// Completed documents for one index, keyed by document source.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(skip)]
    path: PathBuf,
    /// Index the recorded documents were written to.
    #[serde(default)]
    pub index: String,
    /// Source → number of chunks upserted, for documents finished since the last reset.
    #[serde(default)]
    pub completed: BTreeMap<String, usize>,
    /// Source → number of chunks it holds in the index. Survives [`Checkpoint::reset`].
    #[serde(default)]
    pub stored: BTreeMap<String, usize>,
}

impl Checkpoint {
    /// Opens the checkpoint at `path` for `index`. A missing file starts empty; a file
    /// written for a different index is ignored, since its documents are not in this one.
    pub fn open(path: &Path, index: &str) -> Result<Self, CheckpointError> {
        let mut checkpoint = match std::fs::read_to_string(path) {
            Ok(s) => serde_json::from_str::<Checkpoint>(&s)
                .map_err(|e| CheckpointError::Parse(path.to_path_buf(), e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Checkpoint::default(),
            Err(e) => return Err(CheckpointError::Io(path.to_path_buf(), e)),
        };
        if checkpoint.index != index {
            if !checkpoint.completed.is_empty() {
                tracing::info!(
                    "checkpoint at {} belongs to index {:?}, starting fresh",
                    path.display(),
                    checkpoint.index
                );
            }
            checkpoint.completed.clear();
            checkpoint.stored.clear();
            checkpoint.index = index.to_string();
        }
        checkpoint.path = path.to_path_buf();
        Ok(checkpoint)
    }

    /// Opens the checkpoint in the app data directory.
    pub fn open_default(index: &str) -> Result<Self, CheckpointError> {
        let path = app_data::app_data_file(CHECKPOINT_FILENAME).ok_or(CheckpointError::NoDataDir)?;
        Self::open(&path, index)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_done(&self, source: &str) -> bool {
        self.completed.contains_key(source)
    }

    /// Chunks the index held for `source` after its last ingestion, if any.
    pub fn stored_chunks(&self, source: &str) -> Option<usize> {
        self.stored.get(source).copied()
    }

    /// Records a finished document and writes the checkpoint to disk.
    pub fn mark_done(&mut self, source: &str, chunks: usize) -> Result<(), CheckpointError> {
        self.completed.insert(source.to_string(), chunks);
        self.stored.insert(source.to_string(), chunks);
        self.save()
    }

    /// Forgets finished documents so the next run redoes them, and writes that to disk.
    /// Stored chunk counts are kept.
    pub fn reset(&mut self) -> Result<(), CheckpointError> {
        self.completed.clear();
        self.save()
    }

    fn save(&self) -> Result<(), CheckpointError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| CheckpointError::Io(dir.to_path_buf(), e))?;
        }
        let s = serde_json::to_string_pretty(self)
            .map_err(|e| CheckpointError::Parse(self.path.clone(), e))?;
        // Atomic replace.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, s).map_err(|e| CheckpointError::Io(tmp.clone(), e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| CheckpointError::Io(self.path.clone(), e))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("could not determine app data directory")]
    NoDataDir,
    #[error("checkpoint {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("invalid checkpoint {0}: {1}")]
    Parse(PathBuf, serde_json::Error),
}
