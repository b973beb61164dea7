// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Filesystem-facing concerns shared by the other layers:
//
//   checkpoint.rs      — checkpoint-<step> directories written
//                        with Burn's CompactRecorder, plus the
//                        saved run config
//
//   tokenizer_store.rs — encoder vocabulary from tokenizer.json
//                        or vocab.txt, exposed per character
//
//   label_info.rs      — polarity / tense label vocabularies
//                        for the attribution task
//
//   metrics.rs         — P/R/F1 counters, the append-only
//                        evaluation report and the training
//                        loss CSV
//
// Reference: Rust Book §7 (Modules)
//            Burn Book §5 (Checkpointing)

/// Checkpoint saving, discovery and loading
pub mod checkpoint;

/// Vocabulary loading and per-char lookup
pub mod tokenizer_store;

/// Attribution label vocabularies
pub mod label_info;

/// Evaluation report and loss logging
pub mod metrics;
