// ============================================================
// Layer 3 — Hyperparameters and Experiment Identity
// ============================================================
// Every run is described by an explicit, immutable record:
//   - which data modality feeds the story encoder
//   - which model variant scores the answers
//   - the tunable hyperparameters (HyperParams)
//
// The experiment identity is a pure function of that record.
// It namespaces the checkpoint directory, the log directory and
// the ledger entry, so the same record must always produce the
// same string or a resumed run would not find its checkpoints.
//
// Only hyperparameters that differ from HyperParams::default()
// appear in the identity, in the fixed field order of fields().
//
// Example:
//   movieqa-subt-conv_attn                     (all defaults)
//   movieqa-feat+subt-response-emb_dim=512     (one override)
//
// Reference: Rust Book §6 (Enums), §10 (Traits)

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::error::TrainError;

/// Bump when a field is added to or removed from HyperParams.
/// Stored in every ledger entry next to the flattened fields.
pub const HPARAMS_VERSION: u32 = 1;

/// Number of candidate answers per question.
pub const NUM_ANSWERS: usize = 5;

// ─── Modality ─────────────────────────────────────────────────────────────────
/// Which story inputs the model reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Modality {
    /// Subtitle sentence embeddings only
    #[serde(rename = "subt")]
    Subtitle,
    /// Pooled CNN frame features only
    #[serde(rename = "feat")]
    Feature,
    /// Both, concatenated along the story axis
    #[serde(rename = "feat+subt")]
    FeatureSubtitle,
}

impl Modality {
    pub fn uses_subtitles(self) -> bool {
        matches!(self, Modality::Subtitle | Modality::FeatureSubtitle)
    }

    pub fn uses_features(self) -> bool {
        matches!(self, Modality::Feature | Modality::FeatureSubtitle)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Modality::Subtitle        => "subt",
            Modality::Feature         => "feat",
            Modality::FeatureSubtitle => "feat+subt",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Modality {
    type Err = TrainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "subt"                   => Ok(Modality::Subtitle),
            "feat"                   => Ok(Modality::Feature),
            "feat+subt" | "subt+feat" => Ok(Modality::FeatureSubtitle),
            other => Err(TrainError::Config(format!(
                "unknown modality '{other}' (expected subt, feat or feat+subt)"
            ))),
        }
    }
}

// ─── ModelVariant ─────────────────────────────────────────────────────────────
/// The competing answer-scoring architectures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelVariant {
    /// Story lines weighted by their question/answer relevance
    Response,
    /// Convolutional attention pooling over the story
    ConvAttn,
    /// Convolutional attention pooling with dilation 2
    DilatedConvAttn,
}

impl ModelVariant {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelVariant::Response        => "response",
            ModelVariant::ConvAttn        => "conv_attn",
            ModelVariant::DilatedConvAttn => "dilated_conv_attn",
        }
    }

    /// Dilation of the attention convolutions (unused by Response).
    pub fn dilation(self) -> usize {
        match self {
            ModelVariant::DilatedConvAttn => 2,
            _                             => 1,
        }
    }
}

impl fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelVariant {
    type Err = TrainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "response"          => Ok(ModelVariant::Response),
            "conv_attn"         => Ok(ModelVariant::ConvAttn),
            "dilated_conv_attn" => Ok(ModelVariant::DilatedConvAttn),
            other => Err(TrainError::Config(format!("unknown model variant '{other}'"))),
        }
    }
}

// ─── Optimizer / Decay ────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    Sgd,
    Momentum,
    Adam,
}

impl OptimizerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OptimizerKind::Sgd      => "sgd",
            OptimizerKind::Momentum => "momentum",
            OptimizerKind::Adam     => "adam",
        }
    }
}

/// Learning-rate decay applied every `decay_epoch` epochs worth of steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecayKind {
    Constant,
    Exponential,
    InverseTime,
}

impl DecayKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DecayKind::Constant    => "constant",
            DecayKind::Exponential => "exponential",
            DecayKind::InverseTime => "inverse_time",
        }
    }
}

// ─── Loss targets ─────────────────────────────────────────────────────────────
/// Which loss terms are summed into the training objective.
/// Parsed from strings such as "main", "attn" or "main+attn".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LossTargets {
    /// Cross-entropy over the candidate answers
    pub main: bool,
    /// Binary cross-entropy between story attention and subtitle relevance
    pub attn: bool,
}

impl Default for LossTargets {
    fn default() -> Self {
        Self { main: true, attn: false }
    }
}

impl FromStr for LossTargets {
    type Err = TrainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut targets = LossTargets { main: false, attn: false };
        for part in s.split('+').map(str::trim).filter(|p| !p.is_empty()) {
            match part {
                "main" => targets.main = true,
                "attn" => targets.attn = true,
                // Accepted for compatibility with older run scripts
                "target" => {}
                other => {
                    return Err(TrainError::Config(format!("unknown loss target '{other}'")))
                }
            }
        }
        if !targets.main && !targets.attn {
            return Err(TrainError::Config(format!("no loss term selected in '{s}'")));
        }
        Ok(targets)
    }
}

// ─── HyperParams ──────────────────────────────────────────────────────────────
/// All tunable hyperparameters of one experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperParams {
    pub emb_dim:         usize,
    pub min_filter_size: usize,
    pub max_filter_size: usize,
    pub dropout_rate:    f64,
    pub optimizer:       OptimizerKind,
    pub learning_rate:   f64,
    pub decay:           DecayKind,
    pub decay_rate:      f64,
    pub decay_epoch:     f64,
    pub clip_gradients:  f64,
    pub reg:             f64,
    pub batch_size:      usize,
    pub num_epochs:      usize,
}

impl Default for HyperParams {
    fn default() -> Self {
        Self {
            emb_dim:         256,
            min_filter_size: 3,
            max_filter_size: 5,
            dropout_rate:    0.1,
            optimizer:       OptimizerKind::Adam,
            learning_rate:   1e-3,
            decay:           DecayKind::Exponential,
            decay_rate:      0.5,
            decay_epoch:     8.0,
            clip_gradients:  5.0,
            reg:             0.0,
            batch_size:      2,
            num_epochs:      20,
        }
    }
}

impl HyperParams {
    /// Named presets selectable with `--hp`.
    pub fn preset(name: &str) -> Result<Self, TrainError> {
        let base = Self::default();
        match name {
            "01" => Ok(base),
            "02" => Ok(Self { emb_dim: 512, learning_rate: 1e-4, ..base }),
            "03" => Ok(Self {
                optimizer:     OptimizerKind::Sgd,
                learning_rate: 2.0,
                ..base
            }),
            "04" => Ok(Self { dropout_rate: 0.3, reg: 0.3, ..base }),
            other => Err(TrainError::Config(format!(
                "unknown hyperparameter preset '{other}' (expected 01-04)"
            ))),
        }
    }

    /// Odd convolution widths between the min and max filter size.
    /// Even widths cannot keep the story length under symmetric padding.
    pub fn filter_sizes(&self) -> Vec<usize> {
        (self.min_filter_size..=self.max_filter_size)
            .filter(|k| k % 2 == 1)
            .collect()
    }

    /// Flat (name, value) view in a fixed order.
    /// Used for the identity and for the ledger entry.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("emb_dim",         self.emb_dim.to_string()),
            ("min_filter_size", self.min_filter_size.to_string()),
            ("max_filter_size", self.max_filter_size.to_string()),
            ("dropout_rate",    self.dropout_rate.to_string()),
            ("optimizer",       self.optimizer.as_str().to_string()),
            ("learning_rate",   self.learning_rate.to_string()),
            ("decay",           self.decay.as_str().to_string()),
            ("decay_rate",      self.decay_rate.to_string()),
            ("decay_epoch",     self.decay_epoch.to_string()),
            ("clip_gradients",  self.clip_gradients.to_string()),
            ("reg",             self.reg.to_string()),
            ("batch_size",      self.batch_size.to_string()),
            ("num_epochs",      self.num_epochs.to_string()),
        ]
    }

    /// Fields whose value differs from the defaults, in fields() order.
    pub fn non_default_fields(&self) -> Vec<(&'static str, String)> {
        let defaults = Self::default().fields();
        self.fields()
            .into_iter()
            .zip(defaults)
            .filter(|((_, value), (_, default))| value != default)
            .map(|(field, _)| field)
            .collect()
    }

    pub fn validate(&self) -> Result<(), TrainError> {
        if self.emb_dim == 0 || self.batch_size == 0 || self.num_epochs == 0 {
            return Err(TrainError::Config(
                "emb_dim, batch_size and num_epochs must be positive".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.dropout_rate) {
            return Err(TrainError::Config(format!(
                "dropout_rate must be in [0, 1), got {}", self.dropout_rate
            )));
        }
        if self.filter_sizes().is_empty() {
            return Err(TrainError::Config(format!(
                "no odd filter size between {} and {}",
                self.min_filter_size, self.max_filter_size
            )));
        }
        if self.learning_rate <= 0.0 || self.clip_gradients <= 0.0 {
            return Err(TrainError::Config(
                "learning_rate and clip_gradients must be positive".into(),
            ));
        }
        Ok(())
    }
}

// ─── Experiment identity ──────────────────────────────────────────────────────
/// Everything that names one experiment.
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentSpec<'a> {
    pub dataset:  &'a str,
    pub modality: Modality,
    pub variant:  ModelVariant,
    /// Free-form tag to separate otherwise identical runs
    pub extra:    Option<&'a str>,
    pub hp:       &'a HyperParams,
}

/// Canonical identity string for an experiment.
pub fn experiment_identity(spec: &ExperimentSpec<'_>) -> String {
    let mut parts = vec![
        spec.dataset.to_string(),
        spec.modality.to_string(),
        spec.variant.to_string(),
    ];
    if let Some(extra) = spec.extra.filter(|e| !e.is_empty()) {
        parts.push(extra.to_string());
    }
    parts.extend(
        spec.hp
            .non_default_fields()
            .into_iter()
            .map(|(name, value)| format!("{name}={value}")),
    );
    parts.join("-")
}
