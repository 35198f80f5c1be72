// ============================================================
// Layer 3 — Training Errors
// ============================================================
// Most failures in this crate are plain anyhow errors with
// context attached at the I/O boundary. The cases below are the
// ones callers need to tell apart, so they get a real type.
//
// Data exhaustion and user interrupts are NOT errors: they are
// values of domain::traits::Fetch.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrainError {
    /// A loss or parameter became NaN/inf. Fatal: the state is not checkpointed.
    #[error("non-finite value in {what} at step {step}: {value}")]
    NonFinite {
        what:  String,
        step:  usize,
        value: f64,
    },

    /// A sample on disk does not match the expected layout.
    #[error("invalid sample {index} in {source_name}: {reason}")]
    InvalidSample {
        source_name: String,
        index:       usize,
        reason:      String,
    },

    /// Bad flag, preset or settings value.
    #[error("configuration error: {0}")]
    Config(String),
}
