// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Pure Rust structs, enums and traits describing the
// event-extraction data this tool trains on.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O
//   - Only plain Rust structs, enums, and traits
//
//   task.rs    — the four task variants, adversarial-training
//                modes, and the auxiliary-data merge table
//   example.rs — raw annotation records, per-task examples
//                and the dev-time callback info
//   traits.rs  — the Processor capability shared by all tasks

/// Task variants and the augmentation source table
pub mod task;

/// Raw sentences, spans, examples and callback info
pub mod example;

/// Core abstractions (traits) that other layers implement
pub mod traits;
