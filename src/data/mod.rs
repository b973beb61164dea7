// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything from JSON annotation files to tensor batches:
//
//   stack.json / dev.json / auxiliary files
//       │
//       ▼
//   Processor         → parses raw sentences into task examples
//       │
//       ▼
//   FeatureConverter  → per-char token ids, masks and labels
//       │
//       ▼
//   FeatureDataset    → implements Burn's Dataset trait
//       │
//       ▼
//   FeatureBatcher    → stacks features into tensor batches
//       │
//       ▼
//   DataLoader        → feeds batches to training / evaluation
//
// Reference: Burn Book §4 (Datasets and Dataloaders)

/// Reads annotation JSON into task examples
pub mod processor;

/// Converts examples into padded, labelled features
pub mod feature;

/// Implements Burn's Dataset trait for features
pub mod dataset;

/// Implements Burn's Batcher trait to create tensor batches
pub mod batcher;
