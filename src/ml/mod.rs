// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// Everything that builds or steps a burn module lives here.
// The orchestrator only sees the Learner trait.
//
//   model.rs    — answer-scoring architectures
//                 • response attention
//                 • convolutional attention (plain / dilated)
//                 • shared loss: answer cross-entropy plus
//                   optional supervised story attention
//
//   schedule.rs — learning rate as a function of the step
//
//   learner.rs  — forward, backward, optimizer step, eval
//                 on the inner backend, checkpoint records
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)

/// MovieQA model variants and the training objective
pub mod model;

/// Step-based learning-rate decay
pub mod schedule;

/// Burn implementation of the Learner trait
pub mod learner;
