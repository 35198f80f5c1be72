// ============================================================
// Layer 6 — Summary Logs
// ============================================================
// Two append-only CSV files per experiment, under
// {log_root}/{id}/:
//
//   events.csv — one row per scalar, tagged by global step
//     step,tag,value
//     100,loss,1.604512
//     100,train_accuracy,0.215000
//     100,learning_rate,0.001000
//     10000,param/ques_proj.weight/mean,0.000132
//     ...
//
//   epochs.csv — one row per finished epoch
//     epoch,step,train_loss,train_acc,eval_train_acc,val_acc,learning_rate
//     1,4880,1.552300,0.301000,0.344000,0.312000,0.001000
//
// Files are opened in append mode for every write, so a
// resumed run continues the same logs and a crash loses at
// most the row being written. A reset deletes the whole
// {log_root}/{id}/ directory.
//
// Reference: Rust Book §9 (Error Handling)
//            Rust Book §12 (I/O and File Handling)

use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::traits::Distribution;

// ─── EpochMetrics ─────────────────────────────────────────────────────────────
/// One row of epochs.csv
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// 1-based epoch number
    pub epoch:          usize,
    /// Global step at the end of the epoch
    pub step:           usize,
    /// Mean loss over the train batches run in this process
    pub train_loss:     f64,
    pub train_acc:      f64,
    pub eval_train_acc: f64,
    pub val_acc:        f64,
    pub learning_rate:  f64,
}

impl EpochMetrics {
    /// Strictly better validation accuracy than `best_val_acc`.
    /// A tie is not an improvement.
    pub fn is_improvement(&self, best_val_acc: f64) -> bool {
        self.val_acc > best_val_acc
    }
}

// ─── SummaryWriter ────────────────────────────────────────────────────────────
/// Appends scalar events and epoch rows for one experiment.
pub struct SummaryWriter {
    dir:         PathBuf,
    events_path: PathBuf,
    epochs_path: PathBuf,
}

impl SummaryWriter {
    /// Create the log directory and write CSV headers for new files.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create log dir '{}'", dir.display()))?;

        let events_path = dir.join("events.csv");
        let epochs_path = dir.join("epochs.csv");
        write_header(&events_path, "step,tag,value")?;
        write_header(
            &epochs_path,
            "epoch,step,train_loss,train_acc,eval_train_acc,val_acc,learning_rate",
        )?;

        Ok(Self { dir, events_path, epochs_path })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn events_path(&self) -> &Path {
        &self.events_path
    }

    pub fn scalar(&self, step: usize, tag: &str, value: f64) -> Result<()> {
        let mut f = append(&self.events_path)?;
        writeln!(f, "{step},{tag},{value:.6}")?;
        Ok(())
    }

    /// Several scalars at the same step, one open for all of them.
    pub fn scalars(&self, step: usize, values: &[(&str, f64)]) -> Result<()> {
        let mut f = append(&self.events_path)?;
        for (tag, value) in values {
            writeln!(f, "{step},{tag},{value:.6}")?;
        }
        Ok(())
    }

    /// A distribution becomes four scalars: {name}/{min,max,mean,std}.
    pub fn distributions(&self, step: usize, dists: &[Distribution]) -> Result<()> {
        let mut f = append(&self.events_path)?;
        for d in dists {
            for (stat, value) in [("min", d.min), ("max", d.max), ("mean", d.mean), ("std", d.std)] {
                writeln!(f, "{step},{}/{stat},{value:.6}", d.name)?;
            }
        }
        Ok(())
    }

    pub fn epoch(&self, m: &EpochMetrics) -> Result<()> {
        let mut f = append(&self.epochs_path)?;
        writeln!(
            f,
            "{},{},{:.6},{:.6},{:.6},{:.6},{:.6}",
            m.epoch,
            m.step,
            m.train_loss,
            m.train_acc,
            m.eval_train_acc,
            m.val_acc,
            m.learning_rate,
        )?;

        tracing::debug!(
            "Logged epoch {} metrics: val_acc={:.4}",
            m.epoch,
            m.val_acc,
        );
        Ok(())
    }
}

fn write_header(path: &Path, header: &str) -> Result<()> {
    if !path.exists() {
        let mut f = fs::File::create(path)
            .with_context(|| format!("Cannot create '{}'", path.display()))?;
        writeln!(f, "{header}")?;
    }
    Ok(())
}

fn append(path: &Path) -> Result<fs::File> {
    OpenOptions::new()
        .append(true)
        .open(path)
        .with_context(|| format!("Cannot open '{}' for append", path.display()))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(val_acc: f64) -> EpochMetrics {
        EpochMetrics {
            epoch: 1,
            step: 10,
            train_loss: 1.2,
            train_acc: 0.3,
            eval_train_acc: 0.35,
            val_acc,
            learning_rate: 1e-3,
        }
    }

    #[test]
    fn test_is_improvement() {
        let m = metrics(0.4);
        assert!(m.is_improvement(0.3));
        // Equal accuracy does not count
        assert!(!m.is_improvement(0.4));
        assert!(!m.is_improvement(0.5));
    }

    #[test]
    fn test_events_are_appended() {
        let tmp = tempfile::tempdir().unwrap();
        let w = SummaryWriter::new(tmp.path().join("exp")).unwrap();
        w.scalar(100, "loss", 1.5).unwrap();
        w.scalars(200, &[("loss", 1.25), ("val_accuracy", 0.5)]).unwrap();

        let text = fs::read_to_string(w.events_path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "step,tag,value");
        assert_eq!(lines[1], "100,loss,1.500000");
        assert_eq!(lines[3], "200,val_accuracy,0.500000");
    }

    #[test]
    fn test_reopen_keeps_existing_rows() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("exp");
        SummaryWriter::new(&dir).unwrap().epoch(&metrics(0.2)).unwrap();
        SummaryWriter::new(&dir).unwrap().epoch(&metrics(0.3)).unwrap();

        let text = fs::read_to_string(dir.join("epochs.csv")).unwrap();
        // header + two rows
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn test_distribution_rows() {
        let tmp = tempfile::tempdir().unwrap();
        let w = SummaryWriter::new(tmp.path()).unwrap();
        let d = Distribution::from_values("param/w", [1.0, 3.0]);
        w.distributions(5, &[d]).unwrap();
        let text = fs::read_to_string(w.events_path()).unwrap();
        assert!(text.contains("5,param/w/mean,2.000000"));
        assert!(text.contains("5,param/w/max,3.000000"));
    }
}
