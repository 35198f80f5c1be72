// ============================================================
// Layer 4 — Split Provider
// ============================================================
// Hands out the batches of one split for one pass.
//
//   initialize(epoch, skip)
//     - rebuilds the index order: file order, or a shuffle
//       seeded with (seed + epoch) for the training pass, so a
//       resumed epoch sees exactly the same order again
//     - drops the first `skip` batches (already applied before
//       the interruption that is being resumed)
//
//   next_batch()
//     - Interrupted if Ctrl-C was pressed
//     - EndOfSplit once every index has been handed out
//     - otherwise the next batch_size samples, in order
//
// The last batch of a pass may be short.
//
// Reference: rand crate documentation (SeedableRng, SliceRandom)

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use burn::data::dataset::Dataset;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use crate::data::dataset::MovieQaDataset;
use crate::domain::sample::QaSample;
use crate::domain::traits::{DataProvider, Fetch};

pub struct SplitProvider {
    dataset:    Arc<MovieQaDataset>,
    batch_size: usize,
    /// Some(seed) shuffles every epoch; None keeps file order
    shuffle:    Option<u64>,
    order:      Vec<usize>,
    cursor:     usize,
    interrupt:  Arc<AtomicBool>,
}

impl SplitProvider {
    pub fn new(
        dataset:    Arc<MovieQaDataset>,
        batch_size: usize,
        shuffle:    Option<u64>,
        interrupt:  Arc<AtomicBool>,
    ) -> Self {
        let order = (0..dataset.len()).collect();
        Self {
            dataset,
            batch_size: batch_size.max(1),
            shuffle,
            order,
            cursor: 0,
            interrupt,
        }
    }
}

impl DataProvider for SplitProvider {
    type Batch = Vec<QaSample>;

    fn len(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    fn initialize(&mut self, epoch: usize, skip: usize) {
        self.order = (0..self.dataset.len()).collect();
        if let Some(seed) = self.shuffle {
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(epoch as u64));
            self.order.shuffle(&mut rng);
        }
        self.cursor = skip.saturating_mul(self.batch_size).min(self.order.len());
    }

    fn next_batch(&mut self) -> Fetch<Vec<QaSample>> {
        if self.interrupt.load(Ordering::SeqCst) {
            return Fetch::Interrupted;
        }
        if self.cursor >= self.order.len() {
            return Fetch::EndOfSplit;
        }

        let end = (self.cursor + self.batch_size).min(self.order.len());
        let batch = self.order[self.cursor..end]
            .iter()
            .filter_map(|&i| self.dataset.get(i))
            .collect();
        self.cursor = end;
        Fetch::Batch(batch)
    }
}
