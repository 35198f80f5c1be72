// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Pure Rust structs and traits that describe what the training
// pipeline works with:
//
//   hparams.rs  — the versioned hyperparameter record, its presets
//                 and the experiment identity derived from it
//   sample.rs   — one multiple-choice question over a movie clip
//   accuracy.rs — streaming accuracy tracker (one per split)
//   traits.rs   — the seams the orchestrator drives: data providers,
//                 learners and checkpointable state
//   error.rs    — the typed failures the orchestrator distinguishes
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O
//   - Only plain Rust structs, enums, and traits
//
// Reference: Rust Book §5 (Structs), §10 (Traits)

pub mod accuracy;

pub mod error;

pub mod hparams;

pub mod sample;

pub mod traits;
