// ============================================================
// Layer 5 — Burn Learner
// ============================================================
// Owns the one parameter set of an experiment and steps it.
//
// Key Burn 0.20 points:
//   - training batches are built on B (Autodiff<...>) so the
//     forward pass records a graph for loss.backward()
//   - evaluation uses model.valid(), the same weights on
//     B::InnerBackend: no graph, dropout disabled
//   - the optimizer is consumed/returned by step(), so the
//     model is swapped in place after each update
//   - argmax(1) returns [batch, 1]; it is flattened on the host
//   - every gradient is checked for NaN/inf before the update,
//     so a finite loss with a broken gradient never reaches the
//     weights (and therefore never reaches a checkpoint)
//
// Checkpoint contents (inside the directory chosen by the
// CheckpointManager):
//   model.mpk.gz   ← model record (CompactRecorder)
//   optim.mpk.gz   ← optimizer state (moments, momentum)
//   learner.json   ← global step
//
// The learning rate is not stored: it is recomputed from the
// restored step by the schedule.
//
// Reference: Burn Book §5, Kingma & Ba (2015) Adam

use std::{fs, path::Path};

use anyhow::{Context, Result};
use burn::{
    module::{AutodiffModule, ModuleVisitor, Param},
    optim::{GradientsParams, Optimizer},
    prelude::*,
    record::{CompactRecorder, Recorder},
    tensor::backend::AutodiffBackend,
};
use serde::{Deserialize, Serialize};

use crate::data::batcher::MovieQaBatcher;
use crate::domain::error::TrainError;
use crate::domain::hparams::LossTargets;
use crate::domain::sample::QaSample;
use crate::domain::traits::{Checkpointable, Distribution, Learner, StepOutput};
use crate::infra::write_atomic;
use crate::ml::model::{objective, MovieQaModel};
use crate::ml::schedule::LrSchedule;

#[derive(Debug, Serialize, Deserialize)]
struct LearnerState {
    step: usize,
}

/// Learner over MovieQaModel with any burn optimizer.
pub struct BurnLearner<B: AutodiffBackend, O> {
    model:    MovieQaModel<B>,
    optim:    O,
    batcher:  MovieQaBatcher,
    schedule: LrSchedule,
    targets:  LossTargets,
    step:     usize,
    device:   B::Device,
    captured: Vec<Distribution>,
}

impl<B, O> BurnLearner<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<MovieQaModel<B>, B>,
{
    pub fn new(
        model:    MovieQaModel<B>,
        optim:    O,
        batcher:  MovieQaBatcher,
        schedule: LrSchedule,
        targets:  LossTargets,
        device:   B::Device,
    ) -> Self {
        Self {
            model,
            optim,
            batcher,
            schedule,
            targets,
            step: 0,
            device,
            captured: Vec::new(),
        }
    }

    /// Parameter and gradient statistics for every weight of the model.
    fn capture(&self, grads: &GradientsParams) -> Result<Vec<Distribution>> {
        let m = &self.model;
        let mut out = Vec::new();

        let linear = |name: &str, l: &burn::nn::Linear<B>, out: &mut Vec<Distribution>| {
            param_stats(&format!("{name}.weight"), &l.weight, grads, out);
            if let Some(b) = &l.bias {
                param_stats(&format!("{name}.bias"), b, grads, out);
            }
        };
        linear("ques_proj", &m.ques_proj, &mut out);
        linear("ans_proj", &m.ans_proj, &mut out);
        if let Some(l) = &m.subt_proj {
            linear("subt_proj", l, &mut out);
        }
        if let Some(l) = &m.feat_proj {
            linear("feat_proj", l, &mut out);
        }
        for (i, conv) in m.attn_convs.iter().enumerate() {
            param_stats(&format!("attn_conv{i}.weight"), &conv.weight, grads, &mut out);
            if let Some(b) = &conv.bias {
                param_stats(&format!("attn_conv{i}.bias"), b, grads, &mut out);
            }
        }

        if let Some(bad) = out.iter().find(|d| !d.mean.is_finite() || !d.std.is_finite()) {
            return Err(TrainError::NonFinite {
                what:  bad.name.clone(),
                step:  self.step,
                value: bad.mean,
            }
            .into());
        }
        Ok(out)
    }
}

fn param_stats<B: AutodiffBackend, const D: usize>(
    name:  &str,
    param: &Param<Tensor<B, D>>,
    grads: &GradientsParams,
    out:   &mut Vec<Distribution>,
) {
    out.push(tensor_distribution(format!("param/{name}"), param.val()));
    if let Some(g) = grads.get::<B::InnerBackend, D>(param.id) {
        out.push(tensor_distribution(format!("grad/{name}"), g));
    }
}

/// Counts gradient tensors holding a NaN or an infinity.
struct NonFiniteGrads<'a> {
    grads: &'a GradientsParams,
    count: usize,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for NonFiniteGrads<'_> {
    fn visit_float<const D: usize>(&mut self, param: &Param<Tensor<B, D>>) {
        if let Some(g) = self.grads.get::<B::InnerBackend, D>(param.id) {
            if !all_finite(g) {
                self.count += 1;
            }
        }
    }
}

fn non_finite_grads<B: AutodiffBackend, M: Module<B>>(module: &M, grads: &GradientsParams) -> usize {
    let mut visitor = NonFiniteGrads { grads, count: 0 };
    module.visit(&mut visitor);
    visitor.count
}

fn all_finite<B: Backend, const D: usize>(t: Tensor<B, D>) -> bool {
    t.is_finite().all().into_data().iter::<bool>().all(|ok| ok)
}

fn tensor_distribution<B: Backend, const D: usize>(name: String, t: Tensor<B, D>) -> Distribution {
    let data = t.into_data();
    Distribution::from_values(name, data.iter::<f32>().map(f64::from))
}

/// Row-wise argmax of [batch, 5] scores, on the host.
fn argmax_rows<B: Backend>(scores: Tensor<B, 2>) -> Vec<usize> {
    scores
        .argmax(1)
        .into_data()
        .iter::<i64>()
        .map(|i| i as usize)
        .collect()
}

fn check_finite(what: &str, step: usize, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(TrainError::NonFinite { what: what.to_string(), step, value }.into())
    }
}

// ─── Learner ──────────────────────────────────────────────────────────────────
impl<B, O> Learner for BurnLearner<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<MovieQaModel<B>, B>,
{
    type Batch = Vec<QaSample>;

    fn train_step(&mut self, samples: Vec<QaSample>, capture: bool) -> Result<StepOutput> {
        let labels_host: Vec<usize> = samples.iter().map(|s| s.label).collect();
        let batch  = self.batcher.to_batch::<B>(&samples, &self.device);
        let labels = batch.labels.clone();
        let subt   = batch.subtitles.clone();

        let output = self.model.forward(batch);
        let loss   = objective(&output, labels, subt.as_ref(), self.targets);

        let loss_value: f64 = loss.clone().into_scalar().elem();
        check_finite("loss", self.step, loss_value)?;
        let predictions = argmax_rows(output.scores);

        let grads = GradientsParams::from_grads(loss.backward(), &self.model);
        let broken = non_finite_grads(&self.model, &grads);
        if broken > 0 {
            return Err(TrainError::NonFinite {
                what:  format!("{broken} gradient tensor(s)"),
                step:  self.step,
                value: f64::NAN,
            }
            .into());
        }
        if capture {
            self.captured = self.capture(&grads)?;
        }

        let lr = self.learning_rate();
        self.model = self.optim.step(lr, self.model.clone(), grads);
        self.step += 1;

        Ok(StepOutput { loss: loss_value, predictions, labels: labels_host })
    }

    fn eval_step(&self, samples: Vec<QaSample>) -> Result<StepOutput> {
        let labels_host: Vec<usize> = samples.iter().map(|s| s.label).collect();
        let model  = self.model.valid();
        let batch  = self.batcher.to_batch::<B::InnerBackend>(&samples, &self.device);
        let labels = batch.labels.clone();
        let subt   = batch.subtitles.clone();

        let output = model.forward(batch);
        let loss_value: f64 = objective(&output, labels, subt.as_ref(), self.targets)
            .into_scalar()
            .elem();
        check_finite("eval loss", self.step, loss_value)?;

        Ok(StepOutput {
            loss:        loss_value,
            predictions: argmax_rows(output.scores),
            labels:      labels_host,
        })
    }

    fn global_step(&self) -> usize {
        self.step
    }

    fn learning_rate(&self) -> f64 {
        self.schedule.at(self.step)
    }

    fn distributions(&self) -> &[Distribution] {
        &self.captured
    }
}

// ─── Checkpointable ───────────────────────────────────────────────────────────
impl<B, O> Checkpointable for BurnLearner<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<MovieQaModel<B>, B>,
{
    fn save_checkpoint(&self, dir: &Path) -> Result<()> {
        let recorder = CompactRecorder::new();

        // Recorder adds the file extension
        let model_path = dir.join("model");
        recorder
            .record(self.model.clone().into_record(), model_path.clone())
            .with_context(|| format!("Failed to save model to '{}'", model_path.display()))?;

        let optim_path = dir.join("optim");
        recorder
            .record(self.optim.to_record(), optim_path.clone())
            .with_context(|| format!("Failed to save optimizer to '{}'", optim_path.display()))?;

        let state = serde_json::to_string_pretty(&LearnerState { step: self.step })?;
        write_atomic(&dir.join("learner.json"), state.as_bytes())
    }

    fn restore_checkpoint(&mut self, dir: &Path) -> Result<()> {
        let recorder = CompactRecorder::new();

        let model_path = dir.join("model");
        let model_record: <MovieQaModel<B> as Module<B>>::Record = recorder
            .load(model_path.clone(), &self.device)
            .with_context(|| {
                format!(
                    "Cannot load model from '{}'. Does the checkpoint match this experiment?",
                    model_path.display()
                )
            })?;
        self.model = self.model.clone().load_record(model_record);

        let optim_path = dir.join("optim");
        let optim_record: O::Record = recorder
            .load(optim_path.clone(), &self.device)
            .with_context(|| format!("Cannot load optimizer from '{}'", optim_path.display()))?;
        self.optim = self.optim.clone().load_record(optim_record);

        let state_path = dir.join("learner.json");
        let json = fs::read_to_string(&state_path)
            .with_context(|| format!("Cannot read '{}'", state_path.display()))?;
        let state: LearnerState = serde_json::from_str(&json)?;
        self.step = state.step;
        self.captured.clear();

        tracing::info!("Restored learner at step {} from '{}'", self.step, dir.display());
        Ok(())
    }
}
