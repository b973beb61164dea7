// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// Workflow coordination only: this layer decides what runs in
// which order, the other layers do the work.
//
//   options.rs        — immutable run options and the derived
//                       output directory
//   train_use_case.rs — example loading, augmentation, training
//                       and checkpoint evaluation
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

/// Run configuration
pub mod options;

/// The training workflow
pub mod train_use_case;
