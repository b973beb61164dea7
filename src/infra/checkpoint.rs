// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves and discovers model checkpoints with Burn's
// CompactRecorder.
//
// Layout under the run's output directory:
//
//   <output_dir>/
//     train_config.json        ← run options, written before training
//     checkpoint-100/model.mpk ← weights after global step 100
//     checkpoint-200/model.mpk
//     ...
//
// The step number is the part of the directory name after the
// last '-'. Evaluation walks the checkpoints in ascending step
// order; two directories resolving to the same step is an
// error because the report could not tell them apart.
//
// Reference: Burn Book §5 (Records and Checkpointing)

use anyhow::{bail, Context, Result};
use burn::{
    prelude::*,
    record::{CompactRecorder, Recorder},
};
use serde::Serialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::ml::model::ExtractionModel;

const CHECKPOINT_PREFIX: &str = "checkpoint-";
const MODEL_FILE:        &str = "model";
const CONFIG_FILE:       &str = "train_config.json";

/// Parse the step from a checkpoint directory name such as `checkpoint-300`.
pub fn parse_step(dir_name: &str) -> Option<usize> {
    if !dir_name.starts_with(CHECKPOINT_PREFIX) {
        return None;
    }
    dir_name.rsplit('-').next()?.parse().ok()
}

pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Create a manager rooted at the run output directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The run output directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Directory holding the checkpoint of `step`
    pub fn checkpoint_dir(&self, step: usize) -> PathBuf {
        self.dir.join(format!("{CHECKPOINT_PREFIX}{step}"))
    }

    /// Save weights to `checkpoint-<step>/model.mpk`.
    pub fn save_model<B: Backend>(&self, model: &ExtractionModel<B>, step: usize) -> Result<PathBuf> {
        let ckpt_dir = self.checkpoint_dir(step);
        fs::create_dir_all(&ckpt_dir)
            .with_context(|| format!("Cannot create '{}'", ckpt_dir.display()))?;

        // recorder adds the extension
        let path = ckpt_dir.join(MODEL_FILE);
        CompactRecorder::new()
            .record(model.clone().into_record(), path.clone())
            .with_context(|| format!("Failed to save checkpoint to '{}'", path.display()))?;

        tracing::info!("Saved model checkpoint to '{}'", ckpt_dir.display());
        Ok(ckpt_dir)
    }

    /// Load the weights stored in `ckpt_dir` into `model`.
    pub fn load_model<B: Backend>(
        &self,
        model:    ExtractionModel<B>,
        ckpt_dir: &Path,
        device:   &B::Device,
    ) -> Result<ExtractionModel<B>> {
        let path = ckpt_dir.join(MODEL_FILE);
        let record = CompactRecorder::new()
            .load(path.clone(), device)
            .with_context(|| format!("Cannot load checkpoint '{}'", path.display()))?;

        Ok(model.load_record(record))
    }

    /// All checkpoints under the output directory, sorted by step.
    pub fn list_checkpoints(&self) -> Result<Vec<(usize, PathBuf)>> {
        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("Cannot list checkpoints in '{}'", self.dir.display()))?;

        let mut found = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(step) = name.to_str().and_then(parse_step) else {
                continue;
            };
            found.push((step, entry.path()));
        }

        found.sort_by_key(|(step, _)| *step);
        for pair in found.windows(2) {
            if pair[0].0 == pair[1].0 {
                bail!(
                    "Checkpoints '{}' and '{}' share step {}",
                    pair[0].1.display(),
                    pair[1].1.display(),
                    pair[0].0
                );
            }
        }

        tracing::debug!("Found {} checkpoints in '{}'", found.len(), self.dir.display());
        Ok(found)
    }

    /// Write the run options to train_config.json.
    pub fn save_options<T: Serialize>(&self, options: &T) -> Result<()> {
        let path = self.dir.join(CONFIG_FILE);
        let json = serde_json::to_string_pretty(options)?;
        fs::write(&path, json)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;

        tracing::debug!("Saved run config to '{}'", path.display());
        Ok(())
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_step() {
        assert_eq!(parse_step("checkpoint-300"), Some(300));
        assert_eq!(parse_step("checkpoint-0"), Some(0));
        assert_eq!(parse_step("checkpoint-x"), None);
        assert_eq!(parse_step("final-300"), None);
    }

    #[test]
    fn test_list_checkpoints_sorted_numerically() {
        let dir = TempDir::new().unwrap();
        for name in ["checkpoint-1000", "checkpoint-200", "checkpoint-30", "logs"] {
            fs::create_dir(dir.path().join(name)).unwrap();
        }
        fs::write(dir.path().join("checkpoint-5"), "a file, not a dir").unwrap();

        let steps: Vec<usize> = CheckpointManager::new(dir.path())
            .list_checkpoints()
            .unwrap()
            .into_iter()
            .map(|(s, _)| s)
            .collect();
        assert_eq!(steps, vec![30, 200, 1000]);
    }

    #[test]
    fn test_duplicate_steps_are_rejected() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("checkpoint-100")).unwrap();
        fs::create_dir(dir.path().join("checkpoint-0100")).unwrap();

        let err = CheckpointManager::new(dir.path()).list_checkpoints().unwrap_err();
        assert!(err.to_string().contains("share step 100"));
    }

    #[test]
    fn test_options_saved_as_json() {
        let dir = TempDir::new().unwrap();
        let mgr = CheckpointManager::new(dir.path());
        mgr.save_options(&serde_json::json!({"task_type": "role2", "seed": 123})).unwrap();

        let json = fs::read_to_string(dir.path().join(CONFIG_FILE)).unwrap();
        let back: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back["seed"], 123);
    }
}
