// ============================================================
// Layer 4 — MovieQA Batcher
// ============================================================
// Implements Burn's Batcher trait to convert a Vec<QaSample>
// into tensors.
//
// Questions and answers have fixed shapes and are simply
// stacked. Stories do not: every clip has its own number of
// subtitle lines and feature vectors. Each story modality is
// padded to the longest story in the batch:
//
//   sample 0: [s0 s1 s2]          → [s0 s1 s2 0 ]  padding [F F F T]
//   sample 1: [s0 s1 s2 s3]       → [s0 s1 s2 s3]  padding [F F F F]
//
// A story with no lines still gets one (padded) slot, so every
// tensor has a non-zero length and softmax over it is defined.
//
// Reference: Burn Book §4 (Batcher)
//            Rust Book §8 (Vectors)

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
};

use crate::domain::hparams::{Modality, NUM_ANSWERS};
use crate::domain::sample::QaSample;

// ─── StoryBatch ───────────────────────────────────────────────────────────────
/// One padded story modality.
#[derive(Debug, Clone)]
pub struct StoryBatch<B: Backend> {
    /// [batch, len, dim]
    pub values:    Tensor<B, 3>,
    /// [batch, len], true on padded slots
    pub padding:   Tensor<B, 2, Bool>,
    /// [batch, len], 1.0 where the line supports the answer
    pub relevance: Tensor<B, 2>,
}

// ─── MovieQaBatch ─────────────────────────────────────────────────────────────
/// A batch ready for the model forward pass.
#[derive(Debug, Clone)]
pub struct MovieQaBatch<B: Backend> {
    /// [batch, text_dim]
    pub question:  Tensor<B, 2>,
    /// [batch, 5, text_dim]
    pub answers:   Tensor<B, 3>,
    /// Present when the modality reads subtitles
    pub subtitles: Option<StoryBatch<B>>,
    /// Present when the modality reads frame features
    pub features:  Option<StoryBatch<B>>,
    /// [batch]
    pub labels:    Tensor<B, 1, Int>,
}

// ─── MovieQaBatcher ───────────────────────────────────────────────────────────
#[derive(Clone, Debug)]
pub struct MovieQaBatcher {
    modality:    Modality,
    text_dim:    usize,
    feature_dim: usize,
}

impl MovieQaBatcher {
    pub fn new(modality: Modality, text_dim: usize, feature_dim: usize) -> Self {
        Self { modality, text_dim, feature_dim }
    }

    /// Build a batch on `device`. Used directly by the learner,
    /// which needs the same samples on two different backends.
    pub fn to_batch<B: Backend>(&self, items: &[QaSample], device: &B::Device) -> MovieQaBatch<B> {
        let n = items.len();
        let d = self.text_dim;

        let question: Vec<f32> = items.iter().flat_map(|s| s.question.iter().copied()).collect();
        let answers: Vec<f32> = items
            .iter()
            .flat_map(|s| s.answers.iter().flatten().copied())
            .collect();
        let labels: Vec<i64> = items.iter().map(|s| s.label as i64).collect();

        let subtitles = self.modality.uses_subtitles().then(|| {
            let stories: Vec<&[Vec<f32>]> = items.iter().map(|s| s.subtitles.as_slice()).collect();
            pad_story::<B>(&stories, d, |i, j| items[i].relevance(j), device)
        });
        let features = self.modality.uses_features().then(|| {
            let stories: Vec<&[Vec<f32>]> = items.iter().map(|s| s.features.as_slice()).collect();
            pad_story::<B>(&stories, self.feature_dim, |_, _| 0.0, device)
        });

        MovieQaBatch {
            question: Tensor::from_data(TensorData::new(question, [n, d]), device),
            answers:  Tensor::from_data(TensorData::new(answers, [n, NUM_ANSWERS, d]), device),
            subtitles,
            features,
            labels:   Tensor::from_data(TensorData::new(labels, [n]), device),
        }
    }
}

// ─── Burn Batcher Trait Implementation ────────────────────────────────────────
impl<B: Backend> Batcher<B, QaSample, MovieQaBatch<B>> for MovieQaBatcher {
    fn batch(&self, items: Vec<QaSample>, device: &B::Device) -> MovieQaBatch<B> {
        self.to_batch(&items, device)
    }
}

/// Pad variable-length stories to the longest one (at least 1 slot).
fn pad_story<B: Backend>(
    stories:   &[&[Vec<f32>]],
    dim:       usize,
    relevance: impl Fn(usize, usize) -> f32,
    device:    &B::Device,
) -> StoryBatch<B> {
    let n   = stories.len();
    let len = stories.iter().map(|s| s.len()).max().unwrap_or(0).max(1);

    let mut values  = vec![0.0f32; n * len * dim];
    let mut padding = vec![true; n * len];
    let mut rel     = vec![0.0f32; n * len];

    for (i, story) in stories.iter().enumerate() {
        for (j, line) in story.iter().enumerate() {
            let slot = i * len + j;
            values[slot * dim..(slot + 1) * dim].copy_from_slice(line);
            padding[slot] = false;
            rel[slot]     = relevance(i, j);
        }
    }

    StoryBatch {
        values:    Tensor::from_data(TensorData::new(values, [n, len, dim]), device),
        padding:   Tensor::from_data(TensorData::new(padding, [n, len]), device),
        relevance: Tensor::from_data(TensorData::new(rel, [n, len]), device),
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::sample::fixtures::sample;
    use burn::backend::NdArray;

    type TB = NdArray;

    #[test]
    fn test_shapes_follow_modality() {
        let device  = Default::default();
        let batcher = MovieQaBatcher::new(Modality::Subtitle, 4, 3);
        let batch: MovieQaBatch<TB> = batcher.to_batch(&[sample(1, 2), sample(4, 3)], &device);

        assert_eq!(batch.question.dims(), [2, 4]);
        assert_eq!(batch.answers.dims(), [2, NUM_ANSWERS, 4]);
        assert!(batch.features.is_none());
        let subt = batch.subtitles.unwrap();
        assert_eq!(subt.values.dims(), [2, 3, 4]);

        let padding: Vec<bool> = subt.padding.into_data().iter::<bool>().collect();
        assert_eq!(padding, vec![false, false, true, false, false, false]);

        let labels: Vec<i64> = batch.labels.into_data().iter::<i64>().collect();
        assert_eq!(labels, vec![1, 4]);
    }

    #[test]
    fn test_relevance_is_aligned_with_lines() {
        let device  = Default::default();
        let batcher = MovieQaBatcher::new(Modality::FeatureSubtitle, 4, 3);
        let batch: MovieQaBatch<TB> = batcher.to_batch(&[sample(0, 3)], &device);

        let rel: Vec<f32> = batch.subtitles.unwrap().relevance.into_data().iter::<f32>().collect();
        assert_eq!(rel, vec![1.0, 0.0, 0.0]);
        assert_eq!(batch.features.unwrap().values.dims(), [1, 2, 3]);
    }

    #[test]
    fn test_empty_story_gets_one_padded_slot() {
        let device  = Default::default();
        let batcher = MovieQaBatcher::new(Modality::Subtitle, 4, 0);
        let batch: MovieQaBatch<TB> = batcher.to_batch(&[sample(0, 0)], &device);

        let subt = batch.subtitles.unwrap();
        assert_eq!(subt.values.dims(), [1, 1, 4]);
        let padding: Vec<bool> = subt.padding.into_data().iter::<bool>().collect();
        assert_eq!(padding, vec![true]);
    }
}
