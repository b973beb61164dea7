// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// All model math lives here, generic over Burn backends.
//
//   model.rs     — shared transformer encoder plus the task
//                  heads (span pointers, BIO tags, polarity /
//                  tense classifiers) and their losses
//
//   trainer.rs   — AdamW loop with warmup/decay, gradient
//                  clipping, FGM/PGD adversarial passes and
//                  step checkpoints
//
//   evaluator.rs — decoding and scoring of one checkpoint on
//                  the dev set, per task
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)
//            Devlin et al. (2019) BERT

/// Encoder and task heads
pub mod model;

/// Training loop
pub mod trainer;

/// Checkpoint evaluation
pub mod evaluator;
