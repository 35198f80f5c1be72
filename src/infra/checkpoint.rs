// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Owns the on-disk layout of one experiment's checkpoints.
// What goes INSIDE a checkpoint is decided by the Checkpointable
// being saved (the burn learner writes its model and optimizer
// records with CompactRecorder); the manager only decides
// where it goes and which ones are kept.
//
// Layout:
//   {checkpoint_root}/{id}/
//     checkpoint.json          ← latest + history of regular saves
//     {id}-{step}/             ← one directory per save
//       meta.json              ← identity and step
//       ...                    ← files written by the Checkpointable
//     best/
//       checkpoint.json        ← latest + history of best saves
//       {id}-{step}/
//
// Regular and best checkpoints have independent histories.
// Each history is pruned to max_to_keep entries, oldest first.
//
// Every save is synchronous: when save_* returns, the files
// are on disk and the index points at them.
//
// Reference: Burn Book §5 (Records and Checkpointing)
//            Rust Book §9 (Error Handling)

use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::traits::Checkpointable;
use crate::infra::{remove_dir_if_exists, write_atomic};

const INDEX_FILE: &str = "checkpoint.json";
const META_FILE:  &str = "meta.json";

/// Written next to the learner's files in every checkpoint directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub identity: String,
    pub step:     usize,
}

impl CheckpointMeta {
    pub fn read(dir: &Path) -> Result<Self> {
        let path = dir.join(META_FILE);
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Cannot read '{}'", path.display()))?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Contents of checkpoint.json. Names are directory names, oldest first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CheckpointIndex {
    latest:  Option<String>,
    history: Vec<String>,
}

/// Saves, finds and prunes the checkpoints of one experiment.
pub struct CheckpointManager {
    /// {checkpoint_root}/{id}
    dir:         PathBuf,
    identity:    String,
    /// 0 keeps everything
    max_to_keep: usize,
}

impl CheckpointManager {
    pub fn new(root: impl AsRef<Path>, identity: &str, max_to_keep: usize) -> Result<Self> {
        let dir = root.as_ref().join(identity);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create checkpoint dir '{}'", dir.display()))?;
        Ok(Self { dir, identity: identity.to_string(), max_to_keep })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn best_dir(&self) -> PathBuf {
        self.dir.join("best")
    }

    /// Regular checkpoint tagged with `step`.
    pub fn save_latest(&self, state: &impl Checkpointable, step: usize) -> Result<PathBuf> {
        let path = self.save_into(&self.dir, state, step)?;
        tracing::debug!("Saved checkpoint '{}'", path.display());
        Ok(path)
    }

    /// Best-validation checkpoint tagged with `step`.
    pub fn save_best(&self, state: &impl Checkpointable, step: usize) -> Result<PathBuf> {
        let path = self.save_into(&self.best_dir(), state, step)?;
        tracing::info!("Saved best checkpoint '{}'", path.display());
        Ok(path)
    }

    /// Most recent regular checkpoint, if one exists on disk.
    pub fn latest(&self) -> Result<Option<PathBuf>> {
        latest_in(&self.dir)
    }

    /// Most recent best checkpoint, if one exists on disk.
    pub fn best(&self) -> Result<Option<PathBuf>> {
        latest_in(&self.best_dir())
    }

    /// Delete every checkpoint of this experiment.
    pub fn reset(&self) -> Result<()> {
        remove_dir_if_exists(&self.dir)?;
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Cannot recreate '{}'", self.dir.display()))?;
        tracing::info!("Cleared checkpoints in '{}'", self.dir.display());
        Ok(())
    }

    fn save_into(&self, parent: &Path, state: &impl Checkpointable, step: usize) -> Result<PathBuf> {
        let name   = format!("{}-{}", self.identity, step);
        let target = parent.join(&name);

        // A second save at the same step (e.g. interrupt right after
        // the epoch-end save) replaces the first one.
        remove_dir_if_exists(&target)?;
        fs::create_dir_all(&target)
            .with_context(|| format!("Cannot create '{}'", target.display()))?;

        state.save_checkpoint(&target)?;

        let meta = CheckpointMeta { identity: self.identity.clone(), step };
        write_atomic(&target.join(META_FILE), serde_json::to_string_pretty(&meta)?.as_bytes())?;

        let mut index = read_index(parent)?;
        index.history.retain(|n| n != &name);
        index.history.push(name.clone());
        index.latest = Some(name);

        if self.max_to_keep > 0 {
            while index.history.len() > self.max_to_keep {
                let old = index.history.remove(0);
                remove_dir_if_exists(&parent.join(&old))?;
                tracing::debug!("Pruned checkpoint '{}'", old);
            }
        }

        write_atomic(&parent.join(INDEX_FILE), serde_json::to_string_pretty(&index)?.as_bytes())?;
        Ok(target)
    }
}

fn read_index(dir: &Path) -> Result<CheckpointIndex> {
    let path = dir.join(INDEX_FILE);
    match fs::read_to_string(&path) {
        Ok(json) => serde_json::from_str(&json)
            .with_context(|| format!("Checkpoint index '{}' is malformed", path.display())),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(CheckpointIndex::default()),
        Err(e) => Err(e).with_context(|| format!("Cannot read '{}'", path.display())),
    }
}

fn latest_in(dir: &Path) -> Result<Option<PathBuf>> {
    let Some(name) = read_index(dir)?.latest else {
        return Ok(None);
    };
    let path = dir.join(name);
    if path.is_dir() {
        Ok(Some(path))
    } else {
        tracing::warn!("Index points at missing checkpoint '{}'", path.display());
        Ok(None)
    }
}
