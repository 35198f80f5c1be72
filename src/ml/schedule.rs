// ============================================================
// Layer 5 — Learning-Rate Schedule
// ============================================================
// The rate is a pure function of the global step, so a resumed
// run picks up exactly where the interrupted one was.
//
//   decay_steps = decay_epoch * steps_per_epoch
//   k           = floor(step / decay_steps)      (staircase)
//
//   constant     lr
//   exponential  lr * decay_rate^k
//   inverse_time lr / (1 + decay_rate * k)

use crate::domain::hparams::{DecayKind, HyperParams};

#[derive(Debug, Clone, PartialEq)]
pub struct LrSchedule {
    kind:        DecayKind,
    base:        f64,
    rate:        f64,
    decay_steps: f64,
}

impl LrSchedule {
    pub fn new(hp: &HyperParams, steps_per_epoch: usize) -> Self {
        Self {
            kind:        hp.decay,
            base:        hp.learning_rate,
            rate:        hp.decay_rate,
            decay_steps: (hp.decay_epoch * steps_per_epoch as f64).max(1.0),
        }
    }

    pub fn at(&self, step: usize) -> f64 {
        let k = (step as f64 / self.decay_steps).floor();
        match self.kind {
            DecayKind::Constant    => self.base,
            DecayKind::Exponential => self.base * self.rate.powf(k),
            DecayKind::InverseTime => self.base / (1.0 + self.rate * k),
        }
    }
}
