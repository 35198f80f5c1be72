// ============================================================
// Layer 3 — Streaming Accuracy Tracker
// ============================================================
// Accumulates (correct, total) over one pass of a split and
// reports the running fraction after every batch.
//
// Each pass owns its own tracker:
//   train_accuracy       — reset at the start of every train epoch
//   eval_train_accuracy  — full train split in inference mode
//   val_accuracy         — full validation split
//
// A batch contributes one unit to `total` per sample, and one
// unit to `correct` per exact prediction/label match.

/// Running accuracy over a single pass.
#[derive(Debug, Clone)]
pub struct StreamingAccuracy {
    name:    &'static str,
    correct: usize,
    total:   usize,
}

impl StreamingAccuracy {
    pub fn new(name: &'static str) -> Self {
        Self { name, correct: 0, total: 0 }
    }

    /// Summary tag, e.g. "val_accuracy"
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Forget everything seen so far.
    pub fn reset(&mut self) {
        self.correct = 0;
        self.total   = 0;
    }

    /// Fold one batch in and return the running accuracy.
    /// Pairs beyond the shorter slice are ignored.
    pub fn update(&mut self, predicted: &[usize], actual: &[usize]) -> f64 {
        for (p, a) in predicted.iter().zip(actual) {
            if p == a {
                self.correct += 1;
            }
            self.total += 1;
        }
        self.value()
    }

    /// Fraction correct, 0.0 before the first update.
    pub fn value(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }
}
