// ============================================================
// Layer 5 — Answer-Scoring Models
// ============================================================
// All variants share the same outline:
//
//   1. project question, answers and story lines into one
//      embedding space of width emb_dim (one Linear each,
//      story lines per modality), then l2-normalise
//   2. pool the story into a vector guided by the question
//   3. score each of the 5 candidate answers against it
//
// They differ in step 2:
//
//   response          — each line is weighted by its relevance
//                       to the question times its relevance to
//                       the answer, giving one pooled story per
//                       answer
//   conv_attn         — question-modulated story goes through
//                       1-channel convolutions (one per odd filter
//                       width); summed outputs are attention
//                       logits, softmax-pooled over the story
//   dilated_conv_attn — same with dilation 2
//
// The story attention logits are also returned, so the
// learner can supervise them with the per-line relevance flags.
//
// With feat+subt, the story is [features ; subtitles] along
// the line axis; only the subtitle part carries relevance flags.
//
// Reference: Burn Book §3 (Building Blocks)

use burn::{
    nn::{
        conv::{Conv1d, Conv1dConfig},
        Dropout, DropoutConfig,
        Linear, LinearConfig,
        PaddingConfig1d,
    },
    prelude::*,
    tensor::activation::{log_sigmoid, relu, softmax},
};

use crate::data::batcher::{MovieQaBatch, StoryBatch};
use crate::domain::hparams::{HyperParams, LossTargets, Modality, ModelVariant, NUM_ANSWERS};

/// Fill value for padded story slots before softmax
const MASK_VALUE: f64 = -1.0e9;

// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize.
#[derive(Config, Debug)]
pub struct MovieQaModelConfig {
    pub text_dim:      usize,
    pub feature_dim:   usize,
    pub emb_dim:       usize,
    pub use_subtitles: bool,
    pub use_features:  bool,
    /// Empty selects response attention
    pub filter_sizes:  Vec<usize>,
    #[config(default = 1)]
    pub dilation:      usize,
    #[config(default = 0.1)]
    pub dropout:       f64,
}

impl MovieQaModelConfig {
    pub fn from_hparams(
        hp:          &HyperParams,
        variant:     ModelVariant,
        modality:    Modality,
        text_dim:    usize,
        feature_dim: usize,
    ) -> Self {
        let filter_sizes = match variant {
            ModelVariant::Response => Vec::new(),
            _                      => hp.filter_sizes(),
        };
        Self::new(
            text_dim,
            feature_dim,
            hp.emb_dim,
            modality.uses_subtitles(),
            modality.uses_features(),
            filter_sizes,
        )
        .with_dilation(variant.dilation())
        .with_dropout(hp.dropout_rate)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> MovieQaModel<B> {
        let linear = |d_in: usize| LinearConfig::new(d_in, self.emb_dim).init(device);
        let attn_convs = self
            .filter_sizes
            .iter()
            .map(|&k| {
                Conv1dConfig::new(self.emb_dim, 1, k)
                    .with_dilation(self.dilation)
                    .with_padding(PaddingConfig1d::Explicit(self.dilation * (k - 1) / 2))
                    .init(device)
            })
            .collect();

        MovieQaModel {
            ques_proj: linear(self.text_dim),
            ans_proj:  linear(self.text_dim),
            subt_proj: self.use_subtitles.then(|| linear(self.text_dim)),
            feat_proj: self.use_features.then(|| linear(self.feature_dim)),
            attn_convs,
            dropout:   DropoutConfig::new(self.dropout).init(),
        }
    }
}

#[derive(Module, Debug)]
pub struct MovieQaModel<B: Backend> {
    pub ques_proj:  Linear<B>,
    pub ans_proj:   Linear<B>,
    pub subt_proj:  Option<Linear<B>>,
    pub feat_proj:  Option<Linear<B>>,
    pub attn_convs: Vec<Conv1d<B>>,
    pub dropout:    Dropout,
}

pub struct ModelOutput<B: Backend> {
    /// [batch, 5]
    pub scores:      Tensor<B, 2>,
    /// [batch, subtitle_len], only when subtitles are read
    pub subt_logits: Option<Tensor<B, 2>>,
}

impl<B: Backend> MovieQaModel<B> {
    pub fn forward(&self, batch: MovieQaBatch<B>) -> ModelOutput<B> {
        let [n, _] = batch.question.dims();

        let q = l2_normalize(self.dropout.forward(self.ques_proj.forward(batch.question)), 1);
        let a = l2_normalize(self.ans_proj.forward(batch.answers), 2);

        // ── Story: [features ; subtitles] ─────────────────────────────────────
        let mut parts: Vec<Tensor<B, 3>>       = Vec::new();
        let mut paddings: Vec<Tensor<B, 2, Bool>> = Vec::new();
        let mut subt_offset = None;
        if let (Some(proj), Some(feat)) = (&self.feat_proj, batch.features) {
            parts.push(self.embed_story(proj, feat.values));
            paddings.push(feat.padding);
        }
        if let (Some(proj), Some(subt)) = (&self.subt_proj, batch.subtitles) {
            let start: usize = parts.iter().map(|p| p.dims()[1]).sum();
            subt_offset = Some((start, subt.padding.dims()[1]));
            parts.push(self.embed_story(proj, subt.values));
            paddings.push(subt.padding);
        }
        let story   = Tensor::cat(parts, 1);    // [n, len, emb]
        let padding = Tensor::cat(paddings, 1); // [n, len]

        let (scores, logits) = if self.attn_convs.is_empty() {
            response_attention(q, a, story, padding)
        } else {
            self.conv_attention(q, a, story, padding)
        };

        let subt_logits = subt_offset.map(|(start, len)| logits.narrow(1, start, len));
        debug_assert_eq!(scores.dims(), [n, NUM_ANSWERS]);
        ModelOutput { scores, subt_logits }
    }

    fn embed_story(&self, proj: &Linear<B>, values: Tensor<B, 3>) -> Tensor<B, 3> {
        l2_normalize(self.dropout.forward(proj.forward(values)), 2)
    }

    /// Softmax pooling with logits from summed convolutions over q ⊙ story.
    fn conv_attention(
        &self,
        q:       Tensor<B, 2>,
        a:       Tensor<B, 3>,
        story:   Tensor<B, 3>,
        padding: Tensor<B, 2, Bool>,
    ) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let [n, len, _] = story.dims();

        // [n, emb, len] for Conv1d
        let modulated = (story.clone() * q.clone().unsqueeze_dim::<3>(1)).swap_dims(1, 2);
        let logits = self
            .attn_convs
            .iter()
            .map(|conv| conv.forward(modulated.clone()))
            .reduce(|acc, x| acc + x)
            .map(|x| x.reshape([n, len]))
            .unwrap_or_else(|| Tensor::zeros([n, len], &story.device()));

        let weights = softmax(logits.clone().mask_fill(padding, MASK_VALUE), 1);
        let pooled  = (weights.unsqueeze_dim::<3>(2) * story).sum_dim(1).squeeze_dim::<2>(1);
        let context = l2_normalize(q + pooled, 1);

        // [n, 5, emb] x [n, emb, 1] → [n, 5]
        let scores = a.matmul(context.unsqueeze_dim::<3>(2)).reshape([n, NUM_ANSWERS]);
        (scores, logits)
    }
}

/// Line weight = relu(line·q) * relu(line·answer), one pooled story per answer.
fn response_attention<B: Backend>(
    q:       Tensor<B, 2>,
    a:       Tensor<B, 3>,
    story:   Tensor<B, 3>,
    padding: Tensor<B, 2, Bool>,
) -> (Tensor<B, 2>, Tensor<B, 2>) {
    let [n, len, _] = story.dims();

    let logits = story.clone().matmul(q.unsqueeze_dim::<3>(2)).reshape([n, len]); // [n, len]
    let sq = relu(logits.clone().mask_fill(padding, 0.0));
    let sa = relu(story.clone().matmul(a.clone().swap_dims(1, 2)));               // [n, len, 5]

    let weights = sa * sq.unsqueeze_dim::<3>(2);                                    // [n, len, 5]
    let pooled  = l2_normalize(weights.swap_dims(1, 2).matmul(story), 2);           // [n, 5, emb]
    let scores  = (pooled * a).sum_dim(2).reshape([n, NUM_ANSWERS]);
    (scores, logits)
}

fn l2_normalize<B: Backend, const D: usize>(x: Tensor<B, D>, dim: usize) -> Tensor<B, D> {
    let norm = x.clone().powf_scalar(2.0).sum_dim(dim).add_scalar(1e-12).sqrt();
    x / norm
}

// ─── Objective ────────────────────────────────────────────────────────────────
/// Sum of the selected loss terms, shape [1].
///
/// The attention term is a masked binary cross-entropy between
/// the subtitle attention logits and the relevance flags; padded
/// slots do not count. It is skipped when the modality has no
/// subtitles.
pub fn objective<B: Backend>(
    output:    &ModelOutput<B>,
    labels:    Tensor<B, 1, Int>,
    subtitles: Option<&StoryBatch<B>>,
    targets:   LossTargets,
) -> Tensor<B, 1> {
    let device = output.scores.device();
    let mut loss = Tensor::<B, 1>::zeros([1], &device);

    if targets.main {
        let ce = burn::nn::loss::CrossEntropyLossConfig::new().init(&device);
        loss = loss + ce.forward(output.scores.clone(), labels);
    }

    if targets.attn {
        if let (Some(logits), Some(subt)) = (&output.subt_logits, subtitles) {
            let y     = subt.relevance.clone();
            let valid = subt.padding.clone().bool_not().float();
            let bce   = (y.clone() * log_sigmoid(logits.clone())
                + (y.neg() + 1.0) * log_sigmoid(logits.clone().neg()))
                .neg();
            let count = valid.clone().sum().clamp_min(1.0);
            loss = loss + (bce * valid).sum() / count;
        }
    }
    loss
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::batcher::MovieQaBatcher;
    use crate::domain::sample::fixtures::sample;
    use burn::backend::NdArray;

    type TB = NdArray;

    fn model_for(variant: ModelVariant, modality: Modality) -> MovieQaModel<TB> {
        let hp = HyperParams { emb_dim: 8, ..HyperParams::default() };
        MovieQaModelConfig::from_hparams(&hp, variant, modality, 4, 3).init(&Default::default())
    }

    fn batch(modality: Modality) -> MovieQaBatch<TB> {
        MovieQaBatcher::new(modality, 4, 3)
            .to_batch(&[sample(0, 3), sample(2, 1)], &Default::default())
    }

    #[test]
    fn test_every_variant_scores_five_answers() {
        for variant in [ModelVariant::Response, ModelVariant::ConvAttn, ModelVariant::DilatedConvAttn] {
            for modality in [Modality::Subtitle, Modality::Feature, Modality::FeatureSubtitle] {
                let out = model_for(variant, modality).forward(batch(modality));
                assert_eq!(out.scores.dims(), [2, NUM_ANSWERS], "{variant} {modality}");
                assert_eq!(out.subt_logits.is_some(), modality.uses_subtitles());
            }
        }
    }

    #[test]
    fn test_subtitle_logits_cover_only_subtitles() {
        let out = model_for(ModelVariant::ConvAttn, Modality::FeatureSubtitle)
            .forward(batch(Modality::FeatureSubtitle));
        // 2 feature slots precede 3 subtitle slots
        assert_eq!(out.subt_logits.unwrap().dims(), [2, 3]);
    }

    #[test]
    fn test_objective_is_finite_and_positive() {
        let modality = Modality::Subtitle;
        let model = model_for(ModelVariant::ConvAttn, modality);
        let b = batch(modality);
        let labels = b.labels.clone();
        let subt = b.subtitles.clone();
        let out = model.forward(b);
        let targets = LossTargets { main: true, attn: true };
        let loss: f64 = objective(&out, labels, subt.as_ref(), targets).into_scalar().elem();
        assert!(loss.is_finite());
        assert!(loss > 0.0);
    }

    #[test]
    fn test_attn_target_without_subtitles_is_zero() {
        let modality = Modality::Feature;
        let model = model_for(ModelVariant::Response, modality);
        let b = batch(modality);
        let labels = b.labels.clone();
        let out = model.forward(b);
        let targets = LossTargets { main: false, attn: true };
        let loss: f64 = objective(&out, labels, None, targets).into_scalar().elem();
        assert_eq!(loss, 0.0);
    }
}
