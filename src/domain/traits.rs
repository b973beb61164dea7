// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// Every task reads the same raw annotation format but
// normalises it into its own example type:
//   - TriggerProcessor     → one example per sentence
//   - RoleProcessor        → one example per event (role1 + role2)
//   - AttributionProcessor → one example per labelled event
//
// The orchestrator only sees `Processor`, so selecting a task
// happens once at startup instead of at every call site.

use std::path::Path;

use anyhow::Result;

use crate::domain::example::RawSentence;

// ─── Processor ────────────────────────────────────────────────────────────────
/// A task-specific reader of annotation files.
pub trait Processor {
    /// Normalised training/dev record
    type Example: Clone + Send + Sync + 'static;

    /// Per-example data only the evaluator needs
    type Callback: Clone;

    /// Parse a JSON annotation file. Fails if the file is missing
    /// or is not a JSON array of sentences.
    fn read_json(&self, path: &Path) -> Result<Vec<RawSentence>>;

    /// Convert raw sentences to training examples, in file order
    fn get_train_examples(&self, raw: &[RawSentence]) -> Vec<Self::Example>;

    /// Convert raw sentences to dev examples and their callback info
    fn get_dev_examples(&self, raw: &[RawSentence]) -> (Vec<Self::Example>, Vec<Self::Callback>);
}
