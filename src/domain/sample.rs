// ============================================================
// Layer 3 — MovieQA Sample
// ============================================================
// One multiple-choice question over a movie clip, already
// encoded by an upstream pipeline:
//
//   question   — sentence embedding of the question
//   answers    — one embedding per candidate (always 5)
//   subtitles  — one embedding per subtitle line of the clip
//   features   — pooled CNN vectors, one per sampled frame group
//   spec       — 1 if the subtitle line supports the answer
//   label      — index of the correct answer in 0..5
//
// All text vectors share one width, all feature vectors
// share another. validate() enforces this before a sample
// can enter a batch.

use serde::{Deserialize, Serialize};

use crate::domain::error::TrainError;
use crate::domain::hparams::NUM_ANSWERS;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaSample {
    pub question:  Vec<f32>,
    pub answers:   Vec<Vec<f32>>,
    #[serde(default)]
    pub subtitles: Vec<Vec<f32>>,
    #[serde(default)]
    pub features:  Vec<Vec<f32>>,
    #[serde(default)]
    pub spec:      Vec<u8>,
    pub label:     usize,
}

impl QaSample {
    /// Width of the question/answer/subtitle embeddings
    pub fn text_dim(&self) -> usize {
        self.question.len()
    }

    /// Width of the visual feature vectors (0 when absent)
    pub fn feature_dim(&self) -> usize {
        self.features.first().map_or(0, Vec::len)
    }

    /// Relevance flag of subtitle line `i`, 0 when not annotated
    pub fn relevance(&self, i: usize) -> f32 {
        self.spec.get(i).map_or(0.0, |&r| if r > 0 { 1.0 } else { 0.0 })
    }

    /// Check internal consistency. `source` and `index` only feed the error.
    pub fn validate(&self, source: &str, index: usize) -> Result<(), TrainError> {
        let fail = |reason: String| TrainError::InvalidSample {
            source_name: source.to_string(),
            index,
            reason,
        };

        let dim = self.text_dim();
        if dim == 0 {
            return Err(fail("empty question vector".into()));
        }
        if self.answers.len() != NUM_ANSWERS {
            return Err(fail(format!(
                "expected {NUM_ANSWERS} answers, found {}", self.answers.len()
            )));
        }
        if self.label >= NUM_ANSWERS {
            return Err(fail(format!("label {} out of range", self.label)));
        }
        if let Some(bad) = self.answers.iter().chain(&self.subtitles).find(|v| v.len() != dim) {
            return Err(fail(format!(
                "text vector of width {} does not match question width {dim}", bad.len()
            )));
        }
        let fdim = self.feature_dim();
        if self.features.iter().any(|v| v.len() != fdim) || (!self.features.is_empty() && fdim == 0) {
            return Err(fail("feature vectors have inconsistent widths".into()));
        }
        if !self.spec.is_empty() && self.spec.len() != self.subtitles.len() {
            return Err(fail(format!(
                "{} relevance flags for {} subtitle lines",
                self.spec.len(),
                self.subtitles.len()
            )));
        }
        Ok(())
    }
}
