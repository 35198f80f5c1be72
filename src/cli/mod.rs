// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Parses the command line with clap and routes to Layer 2.
//
// Two commands are supported:
//   1. `train`       — train or resume one experiment
//   2. `experiments` — print the ledger
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, ExperimentsArgs, TrainArgs};

use crate::application::orchestrator::RunOutcome;
use crate::infra::ledger::ExperimentLedger;

#[derive(Parser, Debug)]
#[command(
    name = "movieqa-train",
    version = "0.1.0",
    about = "Resumable training of multiple-choice video QA models."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Whether debug logging was requested.
    pub fn debug(&self) -> bool {
        matches!(&self.command, Commands::Train(args) if args.debug)
    }

    /// Dispatch to the matching handler; the CLI only routes.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args)       => run_train(args),
            Commands::Experiments(args) => run_experiments(args),
        }
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    use crate::application::train_use_case::TrainUseCase;

    let config = args.into_config()?;
    match TrainUseCase::new(config).execute()? {
        RunOutcome::Finished { epochs, best_val_acc } => {
            println!(
                "Training complete: {epochs} epochs, best val accuracy {:.1}%",
                best_val_acc * 100.0
            );
        }
        RunOutcome::AlreadyFinished => {}
        RunOutcome::Interrupted { step } => {
            println!("Stopped at step {step}. Run the same command again to resume.");
        }
    }
    Ok(())
}

fn run_experiments(args: ExperimentsArgs) -> Result<()> {
    let ledger = ExperimentLedger::load(args.ledger_path()?)?;
    let mut any = false;
    for (identity, entry) in ledger.entries() {
        any = true;
        println!(
            "{identity}\tnext epoch {}\thparams v{}",
            entry.now_epoch, entry.hparams_version
        );
    }
    if !any {
        println!("No experiments in '{}'", ledger.path().display());
    }
    Ok(())
}
