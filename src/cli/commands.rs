// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the two subcommands: `train` and `experiments`.
//
// Flags that describe the experiment (model, hp, mode, extra,
// target) change its identity. Path flags only say where
// things live and override the settings file.
//
// Reference: Rust Book §12 (Building a CLI Program)

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Subcommand};

use crate::application::config::{Config, Settings};
use crate::domain::hparams::{HyperParams, LossTargets, Modality, ModelVariant};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train (or resume) one experiment
    Train(TrainArgs),

    /// List every experiment recorded in the ledger
    Experiments(ExperimentsArgs),
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Model variant: response, conv_attn or dilated_conv_attn
    #[arg(long = "model", default_value = "conv_attn")]
    pub model: ModelVariant,

    /// Hyperparameter preset (01-04)
    #[arg(long, default_value = "01")]
    pub hp: String,

    /// Story modality: subt, feat or feat+subt
    #[arg(long = "mode", default_value = "subt")]
    pub mode: Modality,

    /// Delete checkpoints and logs and start from epoch 0
    #[arg(long)]
    pub reset: bool,

    /// Debug logging and per-step parameter checks
    #[arg(long)]
    pub debug: bool,

    /// Restore from this checkpoint directory instead of the latest
    #[arg(long)]
    pub checkpoint: Option<PathBuf>,

    /// Extra tag appended to the experiment identity
    #[arg(long)]
    pub extra: Option<String>,

    /// Loss terms, e.g. main, attn or main+attn
    #[arg(long, default_value = "main")]
    pub target: LossTargets,

    /// JSON settings file (paths, cadence, seed)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory holding train.jsonl and val.jsonl
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    #[arg(long)]
    pub checkpoint_root: Option<PathBuf>,

    #[arg(long)]
    pub log_root: Option<PathBuf>,

    /// Ledger file shared by all experiments
    #[arg(long)]
    pub ledger: Option<PathBuf>,

    /// Override the preset's number of epochs
    #[arg(long)]
    pub epochs: Option<usize>,
}

impl TrainArgs {
    /// Convert CLI args into the application-layer Config.
    /// The application layer never sees clap types.
    pub fn into_config(self) -> Result<Config> {
        let settings = Settings::load(self.config.as_deref())?;

        let mut hp = HyperParams::preset(&self.hp)?;
        if let Some(epochs) = self.epochs {
            hp.num_epochs = epochs;
        }

        let mut cfg = Config::from_settings(settings, self.mode, self.model, hp);
        cfg.extra      = self.extra;
        cfg.targets    = self.target;
        cfg.reset      = self.reset;
        cfg.debug      = self.debug;
        cfg.checkpoint = self.checkpoint;

        if let Some(p) = self.data_dir {
            cfg.paths.data_dir = p;
        }
        if let Some(p) = self.checkpoint_root {
            cfg.paths.checkpoint_root = p;
        }
        if let Some(p) = self.log_root {
            cfg.paths.log_root = p;
        }
        if let Some(p) = self.ledger {
            cfg.paths.ledger = p;
        }

        cfg.validate()?;
        Ok(cfg)
    }
}

#[derive(Args, Debug)]
pub struct ExperimentsArgs {
    /// JSON settings file naming the ledger
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Ledger file (overrides the settings file)
    #[arg(long)]
    pub ledger: Option<PathBuf>,
}

impl ExperimentsArgs {
    pub fn ledger_path(&self) -> Result<PathBuf> {
        match &self.ledger {
            Some(p) => Ok(p.clone()),
            None    => Ok(Settings::load(self.config.as_deref())?.paths.ledger),
        }
    }
}
