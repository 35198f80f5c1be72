// ============================================================
// Layer 6 — Experiment Ledger
// ============================================================
// A single JSON object, one key per experiment identity:
//
//   {
//     "movieqa-subt-conv_attn": {
//       "now_epoch": 3,
//       "hparams_version": 1,
//       "emb_dim": 256,
//       ...
//     },
//     "movieqa-feat-response-emb_dim=512": { ... }
//   }
//
// now_epoch is the first epoch that has NOT been completed.
// It only moves forward, except through reset(). The best
// validation accuracy is not stored: each process starts its
// best-checkpoint threshold at 0.
//
// The file is shared by every experiment ever run, so:
//   - a missing file is an empty ledger (first run)
//   - a malformed file is an error, never silently replaced
//   - every mutation rewrites the whole file atomically
//   - entries are never deleted
//
// Reference: serde_json docs (flatten, Value)

use std::{
    collections::BTreeMap,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::hparams::HPARAMS_VERSION;
use crate::infra::write_atomic;

/// Persisted resumption state of one experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub now_epoch: usize,

    #[serde(default)]
    pub hparams_version: u32,

    /// Flattened hyperparameter record, kept for humans reading the file
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

pub struct ExperimentLedger {
    path:    PathBuf,
    entries: BTreeMap<String, LedgerEntry>,
}

impl ExperimentLedger {
    /// Read the ledger at `path`. A missing file yields an empty ledger.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(json) => serde_json::from_str(&json).with_context(|| {
                format!("Ledger '{}' is malformed; fix or move it aside", path.display())
            })?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!("No ledger at '{}', starting empty", path.display());
                BTreeMap::new()
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Cannot read ledger '{}'", path.display()))
            }
        };
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, identity: &str) -> Option<&LedgerEntry> {
        self.entries.get(identity)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &LedgerEntry)> {
        self.entries.iter()
    }

    /// Resume epoch of `identity`, 0 when unknown.
    pub fn now_epoch(&self, identity: &str) -> usize {
        self.get(identity).map_or(0, |e| e.now_epoch)
    }

    /// Create the entry for `identity` at epoch 0 if it does not exist.
    /// `fields` must serialise to a JSON object (typically HyperParams).
    pub fn ensure<T: Serialize>(&mut self, identity: &str, fields: &T) -> Result<&LedgerEntry> {
        if !self.entries.contains_key(identity) {
            let fields = match serde_json::to_value(fields)? {
                Value::Object(map) => flatten(map),
                other => bail!("ledger fields must be a JSON object, got {other}"),
            };
            self.entries.insert(
                identity.to_string(),
                LedgerEntry {
                    now_epoch: 0,
                    hparams_version: HPARAMS_VERSION,
                    fields,
                },
            );
            self.persist()?;
            tracing::info!("Registered new experiment '{}'", identity);
        }
        self.entries
            .get(identity)
            .with_context(|| format!("ledger entry '{identity}' vanished"))
    }

    /// Record that every epoch before `now_epoch` is complete, then persist.
    pub fn save(&mut self, identity: &str, now_epoch: usize) -> Result<()> {
        let entry = self
            .entries
            .get_mut(identity)
            .with_context(|| format!("no ledger entry for '{identity}'"))?;
        if now_epoch < entry.now_epoch {
            bail!(
                "refusing to move '{}' back from epoch {} to {}",
                identity, entry.now_epoch, now_epoch
            );
        }
        entry.now_epoch = now_epoch;
        self.persist()
    }

    /// Rewind `identity` to epoch 0 and persist. Unknown identities are a no-op.
    pub fn reset(&mut self, identity: &str) -> Result<()> {
        if let Some(entry) = self.entries.get_mut(identity) {
            entry.now_epoch = 0;
            self.persist()?;
        }
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.entries)?;
        write_atomic(&self.path, json.as_bytes())
            .with_context(|| format!("Cannot persist ledger '{}'", self.path.display()))
    }
}

/// Drop keys that would collide with the entry's own fields.
fn flatten(map: Map<String, Value>) -> BTreeMap<String, Value> {
    map.into_iter()
        .filter(|(k, _)| !matches!(k.as_str(), "now_epoch" | "hparams_version"))
        .collect()
}
