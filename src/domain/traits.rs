// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The orchestrator is written against three seams:
//
//   DataProvider  — yields batches of one split, in order
//   Learner       — owns the parameters, runs one step at a time
//   Checkpointable — anything whose state can go into a
//                    checkpoint directory and come back out
//
// The burn-backed implementations live in data/ and ml/.
// Tests drive the orchestrator with small in-memory fakes.
//
// Reference: Rust Book §10 (Traits: Defining Shared Behaviour)
//            Rust Book §17 (Object Oriented Patterns)

use std::path::Path;

use anyhow::Result;
use serde::Serialize;

// ─── Fetch ────────────────────────────────────────────────────────────────────
/// Result of asking a provider for its next batch.
///
/// Running out of data and a user interrupt are ordinary
/// outcomes of a pass, so they are values rather than errors.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetch<T> {
    Batch(T),
    /// No batch left in this pass
    EndOfSplit,
    /// Ctrl-C was observed before the batch was produced
    Interrupted,
}

// ─── DataProvider ─────────────────────────────────────────────────────────────
/// Source of batches for one split (train, eval-train or validation).
pub trait DataProvider {
    type Batch;

    /// Number of batches in one full pass
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rewind to the start of the split for `epoch`, then drop the
    /// first `skip` batches (used when resuming mid-epoch).
    fn initialize(&mut self, epoch: usize, skip: usize);

    fn next_batch(&mut self) -> Fetch<Self::Batch>;
}

// ─── StepOutput ───────────────────────────────────────────────────────────────
/// Scalars read back from one train or eval step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    pub loss:        f64,
    /// argmax over the answer axis, one per sample
    pub predictions: Vec<usize>,
    pub labels:      Vec<usize>,
}

// ─── Distribution ─────────────────────────────────────────────────────────────
/// Summary statistics of one parameter or gradient tensor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Distribution {
    pub name:  String,
    pub count: usize,
    pub min:   f64,
    pub max:   f64,
    pub mean:  f64,
    pub std:   f64,
}

impl Distribution {
    /// Population statistics of `values`. Empty input gives all zeros.
    pub fn from_values(name: impl Into<String>, values: impl IntoIterator<Item = f64>) -> Self {
        let mut count = 0usize;
        let mut sum   = 0.0;
        let mut sq    = 0.0;
        let mut min   = f64::INFINITY;
        let mut max   = f64::NEG_INFINITY;
        for v in values {
            count += 1;
            sum   += v;
            sq    += v * v;
            min    = min.min(v);
            max    = max.max(v);
        }
        if count == 0 {
            return Self { name: name.into(), count, min: 0.0, max: 0.0, mean: 0.0, std: 0.0 };
        }
        let mean = sum / count as f64;
        let var  = (sq / count as f64 - mean * mean).max(0.0);
        Self { name: name.into(), count, min, max, mean, std: var.sqrt() }
    }
}

// ─── Checkpointable ───────────────────────────────────────────────────────────
/// State that can be written into, and restored from, a checkpoint directory.
pub trait Checkpointable {
    /// Write everything needed to resume into `dir` (created by the caller).
    fn save_checkpoint(&self, dir: &Path) -> Result<()>;

    /// Replace the in-memory state with the contents of `dir`.
    fn restore_checkpoint(&mut self, dir: &Path) -> Result<()>;
}

// ─── Learner ──────────────────────────────────────────────────────────────────
/// One set of trainable parameters plus the optimizer driving them.
///
/// train_step updates the parameters; eval_step only reads them.
/// Both block until loss and predictions are on the host.
pub trait Learner: Checkpointable {
    type Batch;

    /// One optimisation step. When `capture` is set, parameter and
    /// gradient statistics are kept for distributions().
    fn train_step(&mut self, batch: Self::Batch, capture: bool) -> Result<StepOutput>;

    /// Forward pass in inference mode (no dropout, no update).
    fn eval_step(&self, batch: Self::Batch) -> Result<StepOutput>;

    /// Number of updates applied since the cold start.
    fn global_step(&self) -> usize;

    /// Learning rate that the next update will use.
    fn learning_rate(&self) -> f64;

    /// Statistics captured by the last train_step with `capture` set.
    fn distributions(&self) -> &[Distribution];
}
