// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Builds everything a run needs, then hands over to the
// orchestrator:
//
//   Step 1: Load train / val splits     (Layer 4 - data)
//   Step 2: Install the Ctrl-C flag     (Layer 6 - infra)
//   Step 3: Build the three providers   (Layer 4 - data)
//   Step 4: Build model + optimizer     (Layer 5 - ml)
//   Step 5: Run the state machine       (Layer 2 - orchestrator)
//
// The backend is chosen at compile time: NdArray on the CPU by
// default, Wgpu with `--features wgpu`. The optimizer is chosen
// at run time, so each optimizer kind instantiates the generic
// run_with() once.
//
// Reference: Rust Book §10 (Generics)
//            Burn Book §5 (Training)

use std::sync::{atomic::AtomicBool, Arc};

use anyhow::Result;
use burn::{
    grad_clipping::GradientClippingConfig,
    optim::{decay::WeightDecayConfig, momentum::MomentumConfig, AdamConfig, Optimizer, SgdConfig},
    prelude::*,
};

use crate::application::config::Config;
use crate::application::orchestrator::{Providers, RunOutcome, TrainingOrchestrator};
use crate::data::{batcher::MovieQaBatcher, dataset::MovieQaDataset, provider::SplitProvider};
use crate::domain::error::TrainError;
use crate::domain::hparams::OptimizerKind;
use crate::domain::traits::DataProvider;
use crate::infra::interrupt::install_ctrlc_flag;
use crate::ml::{
    learner::BurnLearner,
    model::{MovieQaModel, MovieQaModelConfig},
    schedule::LrSchedule,
};

#[cfg(not(feature = "wgpu"))]
type TrainBackend = burn::backend::Autodiff<burn::backend::NdArray>;
#[cfg(feature = "wgpu")]
type TrainBackend = burn::backend::Autodiff<burn::backend::Wgpu>;

type Model = MovieQaModel<TrainBackend>;

pub struct TrainUseCase {
    config: Config,
}

impl TrainUseCase {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<RunOutcome> {
        let cfg = &self.config;
        cfg.validate()?;
        tracing::info!("Experiment '{}'", cfg.identity());

        // ── Step 1: Load splits ───────────────────────────────────────────────
        let train = Arc::new(MovieQaDataset::from_jsonl(&cfg.paths.data_dir, "train")?);
        let val   = Arc::new(MovieQaDataset::from_jsonl(&cfg.paths.data_dir, "val")?);
        check_compatible(cfg, &train, &val)?;
        for split in [&train, &val] {
            tracing::debug!(
                "Split '{}': text width {}, feature width {}",
                split.name(), split.text_dim(), split.feature_dim()
            );
        }

        // ── Step 2: Ctrl-C ────────────────────────────────────────────────────
        let interrupt = install_ctrlc_flag()?;

        // ── Step 3: Providers ─────────────────────────────────────────────────
        let providers = build_providers(cfg, &train, &val, interrupt);

        // ── Step 4 + 5: Model, optimizer, run ─────────────────────────────────
        let device = <TrainBackend as Backend>::Device::default();
        tracing::info!("Using device: {:?}", device);

        let hp = &cfg.hp;
        let weight_decay = (hp.reg > 0.0).then(|| WeightDecayConfig::new(hp.reg as f32));
        let clipping     = Some(GradientClippingConfig::Norm(hp.clip_gradients as f32));

        match hp.optimizer {
            OptimizerKind::Sgd => {
                let optim = SgdConfig::new()
                    .with_weight_decay(weight_decay)
                    .with_gradient_clipping(clipping)
                    .init::<TrainBackend, Model>();
                run_with(cfg, &train, providers, optim, device)
            }
            OptimizerKind::Momentum => {
                let optim = SgdConfig::new()
                    .with_weight_decay(weight_decay)
                    .with_momentum(Some(MomentumConfig::new()))
                    .with_gradient_clipping(clipping)
                    .init::<TrainBackend, Model>();
                run_with(cfg, &train, providers, optim, device)
            }
            OptimizerKind::Adam => {
                let optim = AdamConfig::new()
                    .with_epsilon(1e-8)
                    .with_weight_decay(weight_decay)
                    .with_grad_clipping(clipping)
                    .init::<TrainBackend, Model>();
                run_with(cfg, &train, providers, optim, device)
            }
        }
    }
}

fn run_with<O>(
    cfg:       &Config,
    train:     &MovieQaDataset,
    providers: Providers<SplitProvider>,
    optim:     O,
    device:    <TrainBackend as Backend>::Device,
) -> Result<RunOutcome>
where
    O: Optimizer<Model, TrainBackend>,
{
    let model = MovieQaModelConfig::from_hparams(
        &cfg.hp,
        cfg.variant,
        cfg.modality,
        train.text_dim(),
        train.feature_dim(),
    )
    .init::<TrainBackend>(&device);

    let learner = BurnLearner::new(
        model,
        optim,
        MovieQaBatcher::new(cfg.modality, train.text_dim(), train.feature_dim()),
        LrSchedule::new(&cfg.hp, providers.train.len()),
        cfg.targets,
        device,
    );

    let mut orchestrator = TrainingOrchestrator::new(cfg, learner, providers)?;
    orchestrator.run()
}

fn build_providers(
    cfg:       &Config,
    train:     &Arc<MovieQaDataset>,
    val:       &Arc<MovieQaDataset>,
    interrupt: Arc<AtomicBool>,
) -> Providers<SplitProvider> {
    let bs = cfg.hp.batch_size;
    Providers {
        train:      SplitProvider::new(train.clone(), bs, Some(cfg.seed), interrupt.clone()),
        eval_train: SplitProvider::new(train.clone(), bs, None, interrupt.clone()),
        validation: SplitProvider::new(val.clone(), bs, None, interrupt),
    }
}

/// Both splits must share widths, and the modality must have its inputs.
fn check_compatible(cfg: &Config, train: &MovieQaDataset, val: &MovieQaDataset) -> Result<()> {
    use burn::data::dataset::Dataset;

    if train.is_empty() {
        return Err(TrainError::Config("the train split is empty".into()).into());
    }
    if !val.is_empty() && val.text_dim() != train.text_dim() {
        return Err(TrainError::Config(format!(
            "val text width {} differs from train width {}",
            val.text_dim(),
            train.text_dim()
        ))
        .into());
    }
    if cfg.modality.uses_features() {
        if train.feature_dim() == 0 {
            return Err(TrainError::Config(format!(
                "modality '{}' needs frame features, but the train split has none",
                cfg.modality
            ))
            .into());
        }
        if val.feature_dim() != 0 && val.feature_dim() != train.feature_dim() {
            return Err(TrainError::Config("val feature width differs from train".into()).into());
        }
    }
    Ok(())
}
