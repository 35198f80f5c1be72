// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Samples arrive pre-encoded (sentence embeddings and pooled
// frame features), one JSON object per line:
//
//   {data_dir}/train.jsonl
//   {data_dir}/val.jsonl
//       │
//       ▼
//   MovieQaDataset   → parses + validates, implements Burn's Dataset
//       │
//       ▼
//   SplitProvider    → orders indices for one pass, groups them
//       │              into batches, watches the Ctrl-C flag
//       ▼
//   MovieQaBatcher   → pads stories, builds masks, stacks tensors
//       │
//       ▼
//   Learner (ml/)
//
// The provider hands out host-side Vec<QaSample> batches. The
// learner turns them into tensors on whichever backend the
// step needs (autodiff for training, inner backend for eval).
//
// Reference: Burn Book §4 (Datasets and Dataloaders)
//            Rust Book §13 (Iterators and Closures)

/// Implements Burn's Dataset trait over a JSON-lines split
pub mod dataset;

/// Implements Burn's Batcher trait to create tensor batches
pub mod batcher;

/// DataProvider over one split: ordering, skipping, interrupts
pub mod provider;
