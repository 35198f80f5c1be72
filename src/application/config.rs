// ============================================================
// Layer 2 — Run Configuration
// ============================================================
// Everything a training run needs, built once before training
// starts and only ever borrowed afterwards.
//
// Sources, lowest to highest priority:
//   1. built-in defaults (Settings::default, HyperParams presets)
//   2. optional JSON settings file (--config): paths, dataset
//      name, logging and checkpoint cadence, history length, seed
//   3. command line flags
//
// Example settings file:
//   {
//     "dataset": "movieqa",
//     "paths": { "data_dir": "/data/movieqa", "log_root": "runs" },
//     "cadence": { "summary_every": 50 },
//     "max_checkpoints_to_keep": 3
//   }
//
// Reference: serde docs (#[serde(default)])

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::error::TrainError;
use crate::domain::hparams::{
    experiment_identity, ExperimentSpec, HyperParams, LossTargets, Modality, ModelVariant,
};

// ─── Paths ────────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Paths {
    /// Holds train.jsonl and val.jsonl
    pub data_dir:        PathBuf,
    pub checkpoint_root: PathBuf,
    pub log_root:        PathBuf,
    /// Ledger JSON file shared by all experiments
    pub ledger:          PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            data_dir:        PathBuf::from("data/movieqa"),
            checkpoint_root: PathBuf::from("checkpoints"),
            log_root:        PathBuf::from("logs"),
            ledger:          PathBuf::from("experiments.json"),
        }
    }
}

// ─── Cadence ──────────────────────────────────────────────────────────────────
/// Step intervals for periodic work during a train epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Cadence {
    /// Scalar summaries (loss, accuracy, learning rate)
    pub summary_every:    usize,
    /// Distribution summaries and a checkpoint
    pub checkpoint_every: usize,
}

impl Default for Cadence {
    fn default() -> Self {
        Self { summary_every: 100, checkpoint_every: 10_000 }
    }
}

// ─── Settings file ────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub dataset:                 String,
    pub paths:                   Paths,
    pub cadence:                 Cadence,
    pub max_checkpoints_to_keep: usize,
    pub seed:                    u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            dataset:                 "movieqa".to_string(),
            paths:                   Paths::default(),
            cadence:                 Cadence::default(),
            max_checkpoints_to_keep: 5,
            seed:                    42,
        }
    }
}

impl Settings {
    /// Read a settings file; None gives the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let json = fs::read_to_string(path)
            .with_context(|| format!("Cannot read settings '{}'", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("Settings '{}' are not valid", path.display()))
    }
}

// ─── Config ───────────────────────────────────────────────────────────────────
/// Immutable description of one training run.
#[derive(Debug, Clone)]
pub struct Config {
    pub dataset:                 String,
    pub modality:                Modality,
    pub variant:                 ModelVariant,
    pub extra:                   Option<String>,
    pub hp:                      HyperParams,
    pub targets:                 LossTargets,
    pub paths:                   Paths,
    pub cadence:                 Cadence,
    pub max_checkpoints_to_keep: usize,
    pub seed:                    u64,
    /// Wipe checkpoints, logs and ledger progress before training
    pub reset:                   bool,
    /// Verbose logs and per-step parameter/gradient checks
    pub debug:                   bool,
    /// Restore from this checkpoint directory instead of the latest one
    pub checkpoint:              Option<PathBuf>,
}

impl Config {
    /// Config with default settings, for the given experiment record.
    #[cfg(test)]
    pub fn new(modality: Modality, variant: ModelVariant, hp: HyperParams) -> Self {
        Self::from_settings(Settings::default(), modality, variant, hp)
    }

    pub fn from_settings(
        settings: Settings,
        modality: Modality,
        variant:  ModelVariant,
        hp:       HyperParams,
    ) -> Self {
        Self {
            dataset:                 settings.dataset,
            modality,
            variant,
            extra:                   None,
            hp,
            targets:                 LossTargets::default(),
            paths:                   settings.paths,
            cadence:                 settings.cadence,
            max_checkpoints_to_keep: settings.max_checkpoints_to_keep,
            seed:                    settings.seed,
            reset:                   false,
            debug:                   false,
            checkpoint:              None,
        }
    }

    /// Namespace for the ledger entry, checkpoints and logs.
    pub fn identity(&self) -> String {
        experiment_identity(&ExperimentSpec {
            dataset:  &self.dataset,
            modality: self.modality,
            variant:  self.variant,
            extra:    self.extra.as_deref(),
            hp:       &self.hp,
        })
    }

    /// {log_root}/{identity}
    pub fn log_dir(&self) -> PathBuf {
        self.paths.log_root.join(self.identity())
    }

    pub fn validate(&self) -> Result<()> {
        self.hp.validate()?;
        if self.cadence.summary_every == 0 || self.cadence.checkpoint_every == 0 {
            anyhow::bail!("summary and checkpoint intervals must be positive");
        }
        if self.dataset.is_empty() || self.dataset.contains(['/', '\\']) {
            anyhow::bail!("dataset name '{}' cannot be used in a path", self.dataset);
        }
        if let Some(extra) = self.extra.as_deref().filter(|e| e.contains(['/', '\\'])) {
            return Err(TrainError::Config(format!(
                "extra tag '{extra}' cannot be used in a path"
            ))
            .into());
        }
        // attn alone reads subtitle relevance; without subtitles nothing would train
        if self.targets.attn && !self.targets.main && !self.modality.uses_subtitles() {
            return Err(TrainError::Config(format!(
                "loss target 'attn' needs subtitles, but modality '{}' has none",
                self.modality
            ))
            .into());
        }
        Ok(())
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_settings_file_keeps_defaults() {
        let tmp  = tempfile::tempdir().unwrap();
        let path = tmp.path().join("settings.json");
        fs::write(&path, r#"{ "cadence": { "summary_every": 10 }, "paths": { "log_root": "runs" } }"#)
            .unwrap();

        let s = Settings::load(Some(&path)).unwrap();
        assert_eq!(s.cadence.summary_every, 10);
        assert_eq!(s.cadence.checkpoint_every, 10_000);
        assert_eq!(s.paths.log_root, PathBuf::from("runs"));
        assert_eq!(s.paths.ledger, PathBuf::from("experiments.json"));
        assert_eq!(s.max_checkpoints_to_keep, 5);
    }

    #[test]
    fn test_identity_and_log_dir() {
        let mut cfg = Config::new(Modality::Subtitle, ModelVariant::Response, HyperParams::default());
        cfg.extra = Some("a".into());
        assert_eq!(cfg.identity(), "movieqa-subt-response-a");
        assert_eq!(cfg.log_dir(), PathBuf::from("logs/movieqa-subt-response-a"));
    }

    #[test]
    fn test_validate_rejects_zero_cadence() {
        let mut cfg = Config::new(Modality::Feature, ModelVariant::ConvAttn, HyperParams::default());
        assert!(cfg.validate().is_ok());
        cfg.cadence.summary_every = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_path_separator_in_extra() {
        let mut cfg = Config::new(Modality::Subtitle, ModelVariant::ConvAttn, HyperParams::default());
        cfg.extra = Some("v2".into());
        assert!(cfg.validate().is_ok());
        for bad in ["../v2", "a/b", "a\\b"] {
            cfg.extra = Some(bad.into());
            let err = cfg.validate().unwrap_err();
            assert!(matches!(err.downcast_ref::<TrainError>(), Some(TrainError::Config(_))), "{bad}");
        }
    }

    #[test]
    fn test_attn_only_target_needs_subtitles() {
        let attn_only = LossTargets { main: false, attn: true };

        let mut cfg = Config::new(Modality::Feature, ModelVariant::ConvAttn, HyperParams::default());
        cfg.targets = attn_only;
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err.downcast_ref::<TrainError>(), Some(TrainError::Config(_))));

        // With the answer loss there is still a signal
        cfg.targets = LossTargets { main: true, attn: true };
        assert!(cfg.validate().is_ok());

        for modality in [Modality::Subtitle, Modality::FeatureSubtitle] {
            let mut cfg = Config::new(modality, ModelVariant::ConvAttn, HyperParams::default());
            cfg.targets = attn_only;
            assert!(cfg.validate().is_ok(), "{modality}");
        }
    }
}
