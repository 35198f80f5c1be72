// ============================================================
// Layer 2 — Training Orchestrator
// ============================================================
// Drives one experiment through its epochs as a small state
// machine:
//
//   ResumeOrReset ──► TrainEpoch(e) ──► EvalTrain(e) ──► Validate(e)
//        │                ▲                                  │
//        │                └──────────── e + 1 < epochs ──────┤
//        ▼                                                   ▼
//   AlreadyFinished                                        Done
//
//   Any of the three loop phases ──(Ctrl-C)──► Interrupted
//
// ResumeOrReset
//   - reset: wipe checkpoints + logs, ledger back to epoch 0
//   - ledger says every epoch is done → AlreadyFinished
//   - otherwise restore the override or the latest checkpoint,
//     or warn and cold-start when there is none
//
// TrainEpoch(e)
//   - one update per batch, running train accuracy
//   - every `summary_every` steps: loss, accuracy, learning rate
//   - every `checkpoint_every` steps: distributions + checkpoint
//   - end of epoch: checkpoint tagged with the final step
//   - a resumed epoch skips the batches already applied:
//       skip = global_step - e * steps_per_epoch
//
// EvalTrain(e) / Validate(e)
//   - full pass in inference mode, one accuracy summary
//   - strictly better validation accuracy → best checkpoint
//   - ledger.now_epoch = e + 1, one row in epochs.csv
//
// Interrupted
//   - checkpoint at the current step; the ledger is untouched,
//     so the next run resumes inside the same epoch
//
// A non-finite loss propagates as an error and nothing is saved.
//
// Reference: Rust Book §6 (Enums and Pattern Matching)
//            Rust Book §18 (Patterns)

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};

use crate::application::config::Config;
use crate::domain::accuracy::StreamingAccuracy;
use crate::domain::traits::{DataProvider, Fetch, Learner};
use crate::infra::{
    checkpoint::{CheckpointManager, CheckpointMeta},
    ledger::ExperimentLedger,
    metrics::{EpochMetrics, SummaryWriter},
    remove_dir_if_exists,
};

/// How a call to run() ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Every epoch is now complete
    Finished { epochs: usize, best_val_acc: f64 },
    /// The ledger already recorded every epoch; nothing was done
    AlreadyFinished,
    /// Ctrl-C; a checkpoint was written at `step`
    Interrupted { step: usize },
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    ResumeOrReset,
    TrainEpoch(usize),
    EvalTrain(usize),
    Validate(usize),
    Done,
    AlreadyFinished,
    Interrupted,
}

/// The three providers of one run. They must all yield the
/// learner's batch type.
pub struct Providers<P> {
    /// Training split, shuffled per epoch
    pub train:      P,
    /// Training split again, file order, for inference-mode accuracy
    pub eval_train: P,
    pub validation: P,
}

/// Per-epoch figures collected while the phases run.
#[derive(Debug, Default)]
struct EpochStats {
    loss_sum:       f64,
    loss_count:     usize,
    train_acc:      f64,
    eval_train_acc: f64,
}

pub struct TrainingOrchestrator<'a, L, P> {
    config:      &'a Config,
    identity:    String,
    learner:     L,
    providers:   Providers<P>,
    ledger:      ExperimentLedger,
    checkpoints: CheckpointManager,
    summaries:   SummaryWriter,

    train_acc:      StreamingAccuracy,
    eval_train_acc: StreamingAccuracy,
    val_acc:        StreamingAccuracy,

    best_val_acc: f64,
    /// Batches to skip at the start of the first train epoch
    resume_skip:  usize,
    stats:        EpochStats,
}

impl<'a, L, P> TrainingOrchestrator<'a, L, P>
where
    L: Learner,
    P: DataProvider<Batch = L::Batch>,
{
    /// INIT: wire the learner, providers and file-system state together.
    pub fn new(config: &'a Config, learner: L, providers: Providers<P>) -> Result<Self> {
        config.validate()?;
        if providers.train.is_empty() {
            anyhow::bail!("the train provider yields no batches");
        }
        let identity = config.identity();

        let ledger = ExperimentLedger::load(&config.paths.ledger)?;
        let checkpoints = CheckpointManager::new(
            &config.paths.checkpoint_root,
            &identity,
            config.max_checkpoints_to_keep,
        )?;
        let summaries = SummaryWriter::new(config.log_dir())?;
        tracing::info!("Writing summaries to '{}'", summaries.dir().display());

        Ok(Self {
            config,
            identity,
            learner,
            providers,
            ledger,
            checkpoints,
            summaries,
            train_acc:      StreamingAccuracy::new("train_accuracy"),
            eval_train_acc: StreamingAccuracy::new("eval_train_accuracy"),
            val_acc:        StreamingAccuracy::new("val_accuracy"),
            best_val_acc:   0.0,
            resume_skip:    0,
            stats:          EpochStats::default(),
        })
    }

    /// Run until every epoch is done, or until interrupted.
    pub fn run(&mut self) -> Result<RunOutcome> {
        let mut phase = Phase::ResumeOrReset;
        loop {
            tracing::debug!("Phase {:?}", phase);
            phase = match phase {
                Phase::ResumeOrReset => self.resume_or_reset()?,
                Phase::TrainEpoch(e) => self.train_epoch(e)?,
                Phase::EvalTrain(e)  => self.eval_train(e)?,
                Phase::Validate(e)   => self.validate(e)?,
                Phase::Done => {
                    self.report_artifacts()?;
                    return Ok(RunOutcome::Finished {
                        epochs:       self.config.hp.num_epochs,
                        best_val_acc: self.best_val_acc,
                    })
                }
                Phase::AlreadyFinished => return Ok(RunOutcome::AlreadyFinished),
                Phase::Interrupted => {
                    return Ok(RunOutcome::Interrupted { step: self.learner.global_step() })
                }
            };
        }
    }

    // ─── ResumeOrReset ────────────────────────────────────────────────────────
    fn resume_or_reset(&mut self) -> Result<Phase> {
        self.ledger.ensure(&self.identity, &self.config.hp)?;

        if self.config.reset {
            tracing::info!("Resetting experiment '{}'", self.identity);
            self.checkpoints.reset()?;
            let log_dir = self.config.log_dir();
            remove_dir_if_exists(&log_dir)?;
            self.summaries = SummaryWriter::new(log_dir)?;
            self.ledger.reset(&self.identity)?;
        }

        let now_epoch  = self.ledger.now_epoch(&self.identity);
        let num_epochs = self.config.hp.num_epochs;
        if now_epoch >= num_epochs {
            println!("Experiment '{}' already finished ({num_epochs} epochs)", self.identity);
            return Ok(Phase::AlreadyFinished);
        }
        // The threshold is per process; earlier runs left their best on disk
        self.best_val_acc = 0.0;

        let source = match &self.config.checkpoint {
            Some(path) => Some(path.clone()),
            None       => self.checkpoints.latest()?,
        };
        match source {
            Some(dir) => {
                match CheckpointMeta::read(&dir) {
                    Ok(meta) if meta.identity != self.identity => tracing::warn!(
                        "Checkpoint '{}' was written by experiment '{}'",
                        dir.display(), meta.identity
                    ),
                    Ok(_)  => {}
                    Err(e) => tracing::debug!("No checkpoint metadata: {e:#}"),
                }
                self.learner.restore_checkpoint(&dir)?;
                tracing::info!(
                    "Resuming '{}' at epoch {} step {}",
                    self.identity, now_epoch, self.learner.global_step()
                );
            }
            None if now_epoch > 0 => tracing::warn!(
                "Ledger is at epoch {} but no checkpoint was found; starting from fresh weights",
                now_epoch
            ),
            None => tracing::info!("Starting '{}' from scratch", self.identity),
        }

        let steps_per_epoch = self.providers.train.len();
        self.resume_skip = self
            .learner
            .global_step()
            .saturating_sub(now_epoch * steps_per_epoch)
            .min(steps_per_epoch);

        Ok(Phase::TrainEpoch(now_epoch))
    }

    // ─── TrainEpoch ───────────────────────────────────────────────────────────
    fn train_epoch(&mut self, epoch: usize) -> Result<Phase> {
        let cadence = self.config.cadence;
        let skip = std::mem::take(&mut self.resume_skip);

        self.train_acc.reset();
        self.stats = EpochStats::default();
        self.providers.train.initialize(epoch, skip);
        if skip > 0 {
            tracing::info!("Skipping {} batches already applied in epoch {}", skip, epoch + 1);
        }

        let bar = progress_bar(self.providers.train.len(), &format!("epoch {}", epoch + 1));
        bar.set_position(skip as u64);

        loop {
            let batch = match self.providers.train.next_batch() {
                Fetch::Batch(batch) => batch,
                Fetch::EndOfSplit   => break,
                Fetch::Interrupted  => {
                    bar.abandon();
                    return self.interrupt();
                }
            };

            let lr      = self.learner.learning_rate();
            // --debug checks parameters and gradients on every step
            let capture = self.config.debug
                || (self.learner.global_step() + 1) % cadence.checkpoint_every == 0;
            let out     = self.learner.train_step(batch, capture)?;
            let acc     = self.train_acc.update(&out.predictions, &out.labels);
            let step    = self.learner.global_step();

            self.stats.loss_sum   += out.loss;
            self.stats.loss_count += 1;
            bar.set_message(format!("step {step} loss {:.4} acc {:.4}", out.loss, acc));
            bar.inc(1);

            if step % cadence.summary_every == 0 {
                self.summaries.scalars(step, &[
                    ("loss", out.loss),
                    (self.train_acc.name(), acc),
                    ("learning_rate", lr),
                ])?;
            }
            if step % cadence.checkpoint_every == 0 {
                self.summaries.distributions(step, self.learner.distributions())?;
                self.checkpoints.save_latest(&self.learner, step)?;
            }
        }
        bar.finish_and_clear();

        self.stats.train_acc = self.train_acc.value();
        let step = self.learner.global_step();
        self.checkpoints.save_latest(&self.learner, step)?;
        tracing::info!(
            "Epoch {} trained: step {} train_acc={:.4}",
            epoch + 1, step, self.stats.train_acc
        );
        Ok(Phase::EvalTrain(epoch))
    }

    // ─── EvalTrain ────────────────────────────────────────────────────────────
    fn eval_train(&mut self, epoch: usize) -> Result<Phase> {
        self.eval_train_acc.reset();
        self.providers.eval_train.initialize(epoch, 0);

        let bar = progress_bar(self.providers.eval_train.len(), "eval train");
        loop {
            match self.providers.eval_train.next_batch() {
                Fetch::Batch(batch) => {
                    let out = self.learner.eval_step(batch)?;
                    self.eval_train_acc.update(&out.predictions, &out.labels);
                    bar.inc(1);
                }
                Fetch::EndOfSplit  => break,
                Fetch::Interrupted => {
                    bar.abandon();
                    return self.interrupt();
                }
            }
        }
        bar.finish_and_clear();

        self.stats.eval_train_acc = self.eval_train_acc.value();
        let step = self.learner.global_step();
        self.summaries.scalar(step, self.eval_train_acc.name(), self.stats.eval_train_acc)?;
        Ok(Phase::Validate(epoch))
    }

    // ─── Validate ─────────────────────────────────────────────────────────────
    fn validate(&mut self, epoch: usize) -> Result<Phase> {
        self.val_acc.reset();
        self.providers.validation.initialize(epoch, 0);

        let bar = progress_bar(self.providers.validation.len(), "validate");
        loop {
            match self.providers.validation.next_batch() {
                Fetch::Batch(batch) => {
                    let out = self.learner.eval_step(batch)?;
                    let acc = self.val_acc.update(&out.predictions, &out.labels);
                    bar.set_message(format!("acc {acc:.4}"));
                    bar.inc(1);
                }
                Fetch::EndOfSplit  => break,
                Fetch::Interrupted => {
                    bar.abandon();
                    return self.interrupt();
                }
            }
        }
        bar.finish_and_clear();
        tracing::debug!("Validated on {} samples", self.val_acc.total());

        let step = self.learner.global_step();
        let metrics = EpochMetrics {
            epoch:          epoch + 1,
            step,
            train_loss:     if self.stats.loss_count > 0 {
                self.stats.loss_sum / self.stats.loss_count as f64
            } else {
                f64::NAN
            },
            train_acc:      self.stats.train_acc,
            eval_train_acc: self.stats.eval_train_acc,
            val_acc:        self.val_acc.value(),
            learning_rate:  self.learner.learning_rate(),
        };
        self.summaries.scalar(step, self.val_acc.name(), metrics.val_acc)?;

        if metrics.is_improvement(self.best_val_acc) {
            self.checkpoints.save_best(&self.learner, step)?;
            self.best_val_acc = metrics.val_acc;
        }

        self.ledger.save(&self.identity, epoch + 1)?;
        self.summaries.epoch(&metrics)?;

        println!(
            "Epoch {:>3}/{} | step {} | train_acc={:.1}% | eval_train_acc={:.1}% | val_acc={:.1}% | best={:.1}%",
            epoch + 1,
            self.config.hp.num_epochs,
            step,
            metrics.train_acc * 100.0,
            metrics.eval_train_acc * 100.0,
            metrics.val_acc * 100.0,
            self.best_val_acc * 100.0,
        );

        if epoch + 1 < self.config.hp.num_epochs {
            Ok(Phase::TrainEpoch(epoch + 1))
        } else {
            Ok(Phase::Done)
        }
    }

    fn report_artifacts(&self) -> Result<()> {
        match self.checkpoints.best()? {
            Some(best) => tracing::info!("Best checkpoint: '{}'", best.display()),
            None       => tracing::info!("No best checkpoint in '{}'", self.checkpoints.dir().display()),
        }
        tracing::info!("Summaries: '{}'", self.summaries.events_path().display());
        Ok(())
    }

    fn interrupt(&mut self) -> Result<Phase> {
        let step = self.learner.global_step();
        self.checkpoints.save_latest(&self.learner, step)?;
        tracing::warn!("Interrupted at step {}; checkpoint saved", step);
        Ok(Phase::Interrupted)
    }
}

fn progress_bar(len: usize, prefix: &str) -> ProgressBar {
    let bar = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{prefix} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
    {
        bar.set_style(style);
    }
    bar.set_prefix(prefix.to_string());
    bar
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::TrainError;
    use crate::domain::hparams::{HyperParams, Modality, ModelVariant};
    use crate::domain::traits::{Checkpointable, Distribution, StepOutput};
    use std::{
        cell::RefCell,
        fs,
        path::Path,
        rc::Rc,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
    };

    // ─── Fakes ────────────────────────────────────────────────────────────────
    /// Batches are lists of sample ids; the label of id i is i % 5.
    struct VecProvider {
        batches:     Vec<Vec<usize>>,
        cursor:      usize,
        flag:        Arc<AtomicBool>,
        /// Overrides len(), to model a source that runs dry early
        claimed_len: Option<usize>,
    }

    impl VecProvider {
        fn new(num_batches: usize, flag: Arc<AtomicBool>) -> Self {
            let batches = (0..num_batches).map(|b| vec![2 * b, 2 * b + 1]).collect();
            Self { batches, cursor: 0, flag, claimed_len: None }
        }
    }

    impl DataProvider for VecProvider {
        type Batch = Vec<usize>;

        fn len(&self) -> usize {
            self.claimed_len.unwrap_or(self.batches.len())
        }

        fn initialize(&mut self, _epoch: usize, skip: usize) {
            self.cursor = skip;
        }

        fn next_batch(&mut self) -> Fetch<Vec<usize>> {
            if self.flag.load(Ordering::SeqCst) {
                return Fetch::Interrupted;
            }
            match self.batches.get(self.cursor) {
                Some(b) => {
                    self.cursor += 1;
                    Fetch::Batch(b.clone())
                }
                None => Fetch::EndOfSplit,
            }
        }
    }

    /// Records every trained batch; predicts label 0 for everything.
    struct FakeLearner {
        step:           usize,
        trained:        Rc<RefCell<Vec<Vec<usize>>>>,
        interrupt_at:   Option<(usize, Arc<AtomicBool>)>,
        /// Raise the flag on the first inference-mode step
        eval_interrupt: Option<Arc<AtomicBool>>,
        fail_at:        Option<usize>,
    }

    impl FakeLearner {
        fn new(trained: Rc<RefCell<Vec<Vec<usize>>>>) -> Self {
            Self { step: 0, trained, interrupt_at: None, eval_interrupt: None, fail_at: None }
        }

        fn output(batch: &[usize]) -> StepOutput {
            StepOutput {
                loss:        1.0,
                predictions: vec![0; batch.len()],
                labels:      batch.iter().map(|i| i % 5).collect(),
            }
        }
    }

    impl Checkpointable for FakeLearner {
        fn save_checkpoint(&self, dir: &Path) -> anyhow::Result<()> {
            fs::write(dir.join("step"), self.step.to_string())?;
            Ok(())
        }

        fn restore_checkpoint(&mut self, dir: &Path) -> anyhow::Result<()> {
            self.step = fs::read_to_string(dir.join("step"))?.parse()?;
            Ok(())
        }
    }

    impl Learner for FakeLearner {
        type Batch = Vec<usize>;

        fn train_step(&mut self, batch: Vec<usize>, _capture: bool) -> anyhow::Result<StepOutput> {
            if self.fail_at == Some(self.step + 1) {
                return Err(TrainError::NonFinite {
                    what:  "loss".into(),
                    step:  self.step,
                    value: f64::NAN,
                }
                .into());
            }
            self.step += 1;
            self.trained.borrow_mut().push(batch.clone());
            if let Some((at, flag)) = &self.interrupt_at {
                if self.step == *at {
                    flag.store(true, Ordering::SeqCst);
                }
            }
            Ok(Self::output(&batch))
        }

        fn eval_step(&self, batch: Vec<usize>) -> anyhow::Result<StepOutput> {
            if let Some(flag) = &self.eval_interrupt {
                flag.store(true, Ordering::SeqCst);
            }
            Ok(Self::output(&batch))
        }

        fn global_step(&self) -> usize {
            self.step
        }

        fn learning_rate(&self) -> f64 {
            0.1
        }

        fn distributions(&self) -> &[Distribution] {
            &[]
        }
    }

    // ─── Harness ──────────────────────────────────────────────────────────────
    const STEPS_PER_EPOCH: usize = 5;

    fn config(root: &Path) -> Config {
        let hp = HyperParams { num_epochs: 2, ..HyperParams::default() };
        let mut cfg = Config::new(Modality::Subtitle, ModelVariant::ConvAttn, hp);
        cfg.paths.checkpoint_root = root.join("ckpt");
        cfg.paths.log_root        = root.join("logs");
        cfg.paths.ledger          = root.join("experiments.json");
        cfg
    }

    fn providers(flag: &Arc<AtomicBool>) -> Providers<VecProvider> {
        Providers {
            train:      VecProvider::new(STEPS_PER_EPOCH, flag.clone()),
            eval_train: VecProvider::new(STEPS_PER_EPOCH, flag.clone()),
            validation: VecProvider::new(2, flag.clone()),
        }
    }

    fn run(cfg: &Config, learner: FakeLearner, flag: &Arc<AtomicBool>) -> Result<RunOutcome> {
        TrainingOrchestrator::new(cfg, learner, providers(flag))?.run()
    }

    fn checkpoint_dirs(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .map(|rd| {
                rd.filter_map(|e| e.ok())
                    .filter(|e| e.path().is_dir() && e.file_name() != "best")
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    // ─── Tests ────────────────────────────────────────────────────────────────
    #[test]
    fn test_end_to_end_two_epochs() {
        let tmp  = tempfile::tempdir().unwrap();
        let cfg  = config(tmp.path());
        let id   = cfg.identity();
        let flag = Arc::new(AtomicBool::new(false));
        let log  = Rc::new(RefCell::new(Vec::new()));

        let outcome = run(&cfg, FakeLearner::new(log.clone()), &flag).unwrap();
        assert!(matches!(outcome, RunOutcome::Finished { epochs: 2, .. }));
        assert_eq!(log.borrow().len(), 2 * STEPS_PER_EPOCH);

        let ckpt_dir = cfg.paths.checkpoint_root.join(&id);
        assert_eq!(checkpoint_dirs(&ckpt_dir), vec![format!("{id}-10"), format!("{id}-5")]);
        assert!(checkpoint_dirs(&ckpt_dir.join("best")).len() <= 2);

        let ledger = ExperimentLedger::load(&cfg.paths.ledger).unwrap();
        assert_eq!(ledger.now_epoch(&id), 2);

        let epochs = fs::read_to_string(cfg.log_dir().join("epochs.csv")).unwrap();
        assert_eq!(epochs.lines().count(), 3);

        // Second run is a no-op
        let again = Rc::new(RefCell::new(Vec::new()));
        let outcome = run(&cfg, FakeLearner::new(again.clone()), &flag).unwrap();
        assert_eq!(outcome, RunOutcome::AlreadyFinished);
        assert!(again.borrow().is_empty());
        assert_eq!(ExperimentLedger::load(&cfg.paths.ledger).unwrap().now_epoch(&id), 2);
    }

    #[test]
    fn test_resume_after_interrupt_continues_with_next_batch() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config(tmp.path());
        let log = Rc::new(RefCell::new(Vec::new()));

        // Interrupt after step 3 of epoch 1
        let flag = Arc::new(AtomicBool::new(false));
        let mut learner = FakeLearner::new(log.clone());
        learner.interrupt_at = Some((3, flag.clone()));
        let outcome = run(&cfg, learner, &flag).unwrap();
        assert_eq!(outcome, RunOutcome::Interrupted { step: 3 });
        assert_eq!(log.borrow().len(), 3);
        assert_eq!(ExperimentLedger::load(&cfg.paths.ledger).unwrap().now_epoch(&cfg.identity()), 0);

        // Fresh process: resumes from the step-3 checkpoint with batch index 3
        let flag = Arc::new(AtomicBool::new(false));
        let resumed = Rc::new(RefCell::new(Vec::new()));
        let outcome = run(&cfg, FakeLearner::new(resumed.clone()), &flag).unwrap();
        assert!(matches!(outcome, RunOutcome::Finished { .. }));
        assert_eq!(resumed.borrow()[0], vec![6, 7]);
        // Remaining 2 batches of epoch 1, then all of epoch 2
        assert_eq!(resumed.borrow().len(), 2 + STEPS_PER_EPOCH);
    }

    #[test]
    fn test_reset_clears_artifacts_and_ledger() {
        let tmp  = tempfile::tempdir().unwrap();
        let mut cfg = config(tmp.path());
        let id   = cfg.identity();
        let flag = Arc::new(AtomicBool::new(false));

        run(&cfg, FakeLearner::new(Rc::new(RefCell::new(Vec::new()))), &flag).unwrap();
        let marker_ckpt = cfg.paths.checkpoint_root.join(&id).join("stale");
        let marker_log  = cfg.log_dir().join("stale");
        fs::write(&marker_ckpt, "x").unwrap();
        fs::write(&marker_log, "x").unwrap();

        cfg.reset = true;
        let log = Rc::new(RefCell::new(Vec::new()));
        let outcome = run(&cfg, FakeLearner::new(log.clone()), &flag).unwrap();

        assert!(matches!(outcome, RunOutcome::Finished { .. }));
        assert!(!marker_ckpt.exists());
        assert!(!marker_log.exists());
        // Retrained from scratch
        assert_eq!(log.borrow().len(), 2 * STEPS_PER_EPOCH);
        assert_eq!(ExperimentLedger::load(&cfg.paths.ledger).unwrap().now_epoch(&id), 2);
    }

    #[test]
    fn test_equal_accuracy_does_not_move_best() {
        let tmp  = tempfile::tempdir().unwrap();
        let cfg  = config(tmp.path());
        let id   = cfg.identity();
        let flag = Arc::new(AtomicBool::new(false));

        // Constant predictions give the same validation accuracy every epoch
        let outcome = run(&cfg, FakeLearner::new(Rc::new(RefCell::new(Vec::new()))), &flag).unwrap();
        let RunOutcome::Finished { best_val_acc, .. } = outcome else {
            panic!("expected a finished run");
        };
        // ids 0..4 have labels 0,1,2,3 → one correct of four
        assert_eq!(best_val_acc, 0.25);

        let best_dir = cfg.paths.checkpoint_root.join(&id).join("best");
        assert_eq!(checkpoint_dirs(&best_dir), vec![format!("{id}-5")]);
    }

    #[test]
    fn test_non_finite_loss_is_fatal_without_checkpoint() {
        let tmp  = tempfile::tempdir().unwrap();
        let cfg  = config(tmp.path());
        let flag = Arc::new(AtomicBool::new(false));

        let mut learner = FakeLearner::new(Rc::new(RefCell::new(Vec::new())));
        learner.fail_at = Some(3);
        let err = run(&cfg, learner, &flag).unwrap_err();
        assert!(matches!(err.downcast_ref::<TrainError>(), Some(TrainError::NonFinite { .. })));

        let mgr = CheckpointManager::new(&cfg.paths.checkpoint_root, &cfg.identity(), 5).unwrap();
        assert!(mgr.latest().unwrap().is_none());
    }

    #[test]
    fn test_summary_cadence() {
        let tmp  = tempfile::tempdir().unwrap();
        let mut cfg = config(tmp.path());
        cfg.cadence.summary_every    = 2;
        cfg.cadence.checkpoint_every = 4;
        let flag = Arc::new(AtomicBool::new(false));

        run(&cfg, FakeLearner::new(Rc::new(RefCell::new(Vec::new()))), &flag).unwrap();

        let events = fs::read_to_string(cfg.log_dir().join("events.csv")).unwrap();
        let loss_steps: Vec<&str> = events
            .lines()
            .filter(|l| l.contains(",loss,"))
            .map(|l| l.split(',').next().unwrap())
            .collect();
        assert_eq!(loss_steps, vec!["2", "4", "6", "8", "10"]);
        assert_eq!(events.lines().filter(|l| l.contains(",val_accuracy,")).count(), 2);

        // Periodic checkpoints at 4 and 8 plus epoch ends at 5 and 10
        let ckpt_dir = cfg.paths.checkpoint_root.join(cfg.identity());
        assert_eq!(checkpoint_dirs(&ckpt_dir).len(), 4);
    }

    #[test]
    fn test_best_threshold_restarts_in_each_process() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config(tmp.path());
        let id  = cfg.identity();

        // First process: epoch 1 sets the best (step 5), then Ctrl-C at step 6
        let flag = Arc::new(AtomicBool::new(false));
        let mut learner = FakeLearner::new(Rc::new(RefCell::new(Vec::new())));
        learner.interrupt_at = Some((6, flag.clone()));
        assert_eq!(run(&cfg, learner, &flag).unwrap(), RunOutcome::Interrupted { step: 6 });

        // Second process compares against 0, so the same accuracy is a new best
        let flag = Arc::new(AtomicBool::new(false));
        let outcome = run(&cfg, FakeLearner::new(Rc::new(RefCell::new(Vec::new()))), &flag).unwrap();
        assert!(matches!(outcome, RunOutcome::Finished { .. }));

        let best_dir = cfg.paths.checkpoint_root.join(&id).join("best");
        assert_eq!(checkpoint_dirs(&best_dir), vec![format!("{id}-10"), format!("{id}-5")]);
    }

    #[test]
    fn test_cold_start_when_ledger_is_ahead_of_checkpoints() {
        let tmp  = tempfile::tempdir().unwrap();
        let cfg  = config(tmp.path());
        let id   = cfg.identity();
        let flag = Arc::new(AtomicBool::new(false));

        let mut ledger = ExperimentLedger::load(&cfg.paths.ledger).unwrap();
        ledger.ensure(&id, &cfg.hp).unwrap();
        ledger.save(&id, 1).unwrap();

        let log = Rc::new(RefCell::new(Vec::new()));
        let outcome = run(&cfg, FakeLearner::new(log.clone()), &flag).unwrap();

        // Fresh weights, but only the remaining epoch is trained
        assert!(matches!(outcome, RunOutcome::Finished { .. }));
        assert_eq!(log.borrow().len(), STEPS_PER_EPOCH);
        assert_eq!(log.borrow()[0], vec![0, 1]);
        assert_eq!(ExperimentLedger::load(&cfg.paths.ledger).unwrap().now_epoch(&id), 2);
    }

    #[test]
    fn test_checkpoint_override_wins_over_latest() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = config(tmp.path());
        let id  = cfg.identity();

        // Checkpoints at step 3, then at step 4 (the latest)
        for at in [3, 4] {
            let flag = Arc::new(AtomicBool::new(false));
            let mut learner = FakeLearner::new(Rc::new(RefCell::new(Vec::new())));
            learner.interrupt_at = Some((at, flag.clone()));
            assert_eq!(run(&cfg, learner, &flag).unwrap(), RunOutcome::Interrupted { step: at });
        }

        cfg.checkpoint = Some(cfg.paths.checkpoint_root.join(&id).join(format!("{id}-3")));
        let flag = Arc::new(AtomicBool::new(false));
        let log  = Rc::new(RefCell::new(Vec::new()));
        run(&cfg, FakeLearner::new(log.clone()), &flag).unwrap();

        // Step 3 restored: batch index 3 comes next, not index 4
        assert_eq!(log.borrow()[0], vec![6, 7]);
        assert_eq!(log.borrow().len(), 2 + STEPS_PER_EPOCH);
    }

    #[test]
    fn test_interrupt_during_eval_resumes_without_retraining_the_epoch() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config(tmp.path());
        let id  = cfg.identity();

        let flag = Arc::new(AtomicBool::new(false));
        let first = Rc::new(RefCell::new(Vec::new()));
        let mut learner = FakeLearner::new(first.clone());
        learner.eval_interrupt = Some(flag.clone());
        assert_eq!(run(&cfg, learner, &flag).unwrap(), RunOutcome::Interrupted { step: 5 });
        assert_eq!(first.borrow().len(), STEPS_PER_EPOCH);
        assert_eq!(ExperimentLedger::load(&cfg.paths.ledger).unwrap().now_epoch(&id), 0);

        // Epoch 1 is fully applied: the resume skips all of it and re-runs
        // only its evaluation, then trains epoch 2
        let flag = Arc::new(AtomicBool::new(false));
        let resumed = Rc::new(RefCell::new(Vec::new()));
        let outcome = run(&cfg, FakeLearner::new(resumed.clone()), &flag).unwrap();
        assert!(matches!(outcome, RunOutcome::Finished { .. }));
        assert_eq!(resumed.borrow().len(), STEPS_PER_EPOCH);

        let mgr = CheckpointManager::new(&cfg.paths.checkpoint_root, &id, 5).unwrap();
        assert_eq!(mgr.latest().unwrap(), Some(mgr.dir().join(format!("{id}-10"))));
        assert_eq!(ExperimentLedger::load(&cfg.paths.ledger).unwrap().now_epoch(&id), 2);
    }

    #[test]
    fn test_provider_running_dry_early_is_not_an_error() {
        let tmp  = tempfile::tempdir().unwrap();
        let cfg  = config(tmp.path());
        let flag = Arc::new(AtomicBool::new(false));

        let mut providers = providers(&flag);
        providers.train.claimed_len      = Some(STEPS_PER_EPOCH + 2);
        providers.validation.claimed_len = Some(4);

        let log = Rc::new(RefCell::new(Vec::new()));
        let outcome = TrainingOrchestrator::new(&cfg, FakeLearner::new(log.clone()), providers)
            .unwrap()
            .run()
            .unwrap();
        assert!(matches!(outcome, RunOutcome::Finished { epochs: 2, .. }));
        assert_eq!(log.borrow().len(), 2 * STEPS_PER_EPOCH);
    }

    #[test]
    fn test_empty_train_provider_is_rejected() {
        let tmp  = tempfile::tempdir().unwrap();
        let cfg  = config(tmp.path());
        let flag = Arc::new(AtomicBool::new(false));

        let mut providers = providers(&flag);
        providers.train = VecProvider::new(0, flag.clone());
        let learner = FakeLearner::new(Rc::new(RefCell::new(Vec::new())));
        assert!(TrainingOrchestrator::new(&cfg, learner, providers).is_err());
    }
}
