// ============================================================
// Layer 2 — Run Options
// ============================================================
// Immutable configuration of one training run. Built once from
// the CLI (see cli/commands.rs), serialised next to the
// checkpoints as train_config.json, then only read.
//
// The output directory is derived from the base directory and
// the flags that change what gets trained:
//
//   <out>/final/<task>/<bert_type>
//       + _distant_trigger   trigger with distant triggers
//       + _distance          role1/role2 with trigger distance
//       + _<attack>          fgm / pgd
//       + _wd                weight decay
//       + _enhanced          augmented trigger/role1/role2

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::domain::task::{AttackTrain, TaskType};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Options {
    pub task_type:            TaskType,
    pub raw_data_dir:         PathBuf,
    pub mid_data_dir:         PathBuf,
    pub aux_data_dir:         PathBuf,
    pub output_dir:           PathBuf,
    pub bert_dir:             PathBuf,
    pub bert_type:            String,
    pub max_seq_len:          usize,
    pub train_epochs:         usize,
    pub train_batch_size:     usize,
    pub eval_batch_size:      usize,
    pub lr:                   f64,
    pub warmup_proportion:    f64,
    pub max_grad_norm:        f64,
    pub dropout_prob:         f64,
    pub weight_decay:         bool,
    pub start_threshold:      f64,
    pub end_threshold:        f64,
    pub use_distant_trigger:  bool,
    pub use_trigger_distance: bool,
    pub attack_train:         AttackTrain,
    pub enhance_data:         bool,
    pub eval_model:           bool,
    pub save_steps:           usize,
    pub log_steps:            usize,
    pub num_workers:          usize,
    pub seed:                 u64,
}

impl Options {
    /// Run directory for these options under `base`.
    pub fn run_dir(&self, base: &Path) -> PathBuf {
        let mut name = self.bert_type.clone();

        match self.task_type {
            TaskType::Trigger if self.use_distant_trigger => name.push_str("_distant_trigger"),
            TaskType::Role1 | TaskType::Role2 if self.use_trigger_distance => name.push_str("_distance"),
            _ => {}
        }
        if self.attack_train.is_enabled() {
            name.push('_');
            name.push_str(self.attack_train.as_str());
        }
        if self.weight_decay {
            name.push_str("_wd");
        }
        if self.enhance_data && self.task_type.is_augmentable() {
            name.push_str("_enhanced");
        }

        base.join("final").join(self.task_type.as_str()).join(name)
    }

    /// Whether the model gets an auxiliary input embedding
    pub fn uses_aux_input(&self) -> bool {
        match self.task_type {
            TaskType::Trigger              => self.use_distant_trigger,
            TaskType::Role1 | TaskType::Role2 => self.use_trigger_distance,
            TaskType::Attribution          => false,
        }
    }
}

/// Options rooted in `root` with small sizes, for tests.
#[cfg(test)]
pub fn test_options(task_type: TaskType, root: &Path) -> Options {
    Options {
        task_type,
        raw_data_dir:         root.join("raw"),
        mid_data_dir:         root.join("mid"),
        aux_data_dir:         root.join("aux"),
        output_dir:           root.join("out"),
        bert_dir:             root.join("bert"),
        bert_type:            "roberta_wwm".into(),
        max_seq_len:          16,
        train_epochs:         1,
        train_batch_size:     2,
        eval_batch_size:      2,
        lr:                   1e-3,
        warmup_proportion:    0.1,
        max_grad_norm:        1.0,
        dropout_prob:         0.0,
        weight_decay:         false,
        start_threshold:      0.5,
        end_threshold:        0.5,
        use_distant_trigger:  false,
        use_trigger_distance: false,
        attack_train:         AttackTrain::None,
        enhance_data:         false,
        eval_model:           false,
        save_steps:           0,
        log_steps:            1,
        num_workers:          1,
        seed:                 123,
    }
}
