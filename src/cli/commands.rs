// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the `train` subcommand and all of its flags.
//
// Mode and task type arrive as plain strings and are checked
// while converting into Options, before any file is touched.
//
// Reference: Rust Book §12 (Building a CLI Program)

use anyhow::{ensure, Result};
use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::application::options::Options;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train one task of the event-extraction pipeline
    Train(TrainArgs),
}

#[derive(Args, Debug, Clone)]
pub struct TrainArgs {
    /// Run mode; only `train` is supported
    #[arg(long, default_value = "train")]
    pub mode: String,

    /// trigger, role1, role2 or attribution
    #[arg(long)]
    pub task_type: String,

    #[arg(long, default_value = "./data/raw_data")]
    pub raw_data_dir: PathBuf,

    /// Label vocabularies (polarity2id.json, tense2id.json)
    #[arg(long, default_value = "./data/mid_data")]
    pub mid_data_dir: PathBuf,

    /// Auxiliary training files merged with --enhance-data
    #[arg(long, default_value = "./data/aux_data")]
    pub aux_data_dir: PathBuf,

    /// Base output directory; the run directory is derived from it
    #[arg(long, default_value = "./out")]
    pub output_dir: PathBuf,

    /// Encoder directory with config.json and tokenizer.json or vocab.txt
    #[arg(long, default_value = "./bert/roberta_wwm")]
    pub bert_dir: PathBuf,

    #[arg(long, default_value = "roberta_wwm")]
    pub bert_type: String,

    #[arg(long, default_value_t = 256)]
    pub max_seq_len: usize,

    #[arg(long, default_value_t = 10)]
    pub train_epochs: usize,

    #[arg(long, default_value_t = 24)]
    pub train_batch_size: usize,

    #[arg(long, default_value_t = 64)]
    pub eval_batch_size: usize,

    #[arg(long, default_value_t = 2e-5)]
    pub lr: f64,

    /// Fraction of total steps spent warming up the learning rate
    #[arg(long, default_value_t = 0.1)]
    pub warmup_proportion: f64,

    #[arg(long, default_value_t = 1.0)]
    pub max_grad_norm: f64,

    #[arg(long, default_value_t = 0.1)]
    pub dropout_prob: f64,

    /// Apply weight decay 0.01 in AdamW
    #[arg(long)]
    pub weight_decay: bool,

    #[arg(long, default_value_t = 0.5)]
    pub start_threshold: f64,

    #[arg(long, default_value_t = 0.5)]
    pub end_threshold: f64,

    /// Mark distant-supervision trigger words (trigger only)
    #[arg(long)]
    pub use_distant_trigger: bool,

    /// Feed token distance to the trigger (role1 / role2)
    #[arg(long)]
    pub use_trigger_distance: bool,

    /// Adversarial training: '', 'fgm' or 'pgd'
    #[arg(long, default_value = "")]
    pub attack_train: String,

    /// Merge the auxiliary training files
    #[arg(long)]
    pub enhance_data: bool,

    /// Score every checkpoint on dev.json after training
    #[arg(long)]
    pub eval_model: bool,

    /// Save a checkpoint every N steps (0 = only at epoch end)
    #[arg(long, default_value_t = 0)]
    pub save_steps: usize,

    #[arg(long, default_value_t = 20)]
    pub log_steps: usize,

    /// Data loader worker threads for training
    #[arg(long, default_value_t = 1)]
    pub num_workers: usize,

    #[arg(long, default_value_t = 123)]
    pub seed: u64,
}

/// Validate the raw arguments and derive the run directory.
impl TryFrom<TrainArgs> for Options {
    type Error = anyhow::Error;

    fn try_from(a: TrainArgs) -> Result<Self> {
        ensure!(a.mode == "train", "mode mismatch: '{}'", a.mode);
        let task_type = a.task_type.parse()?;
        let attack_train = a.attack_train.parse()?;

        let mut options = Options {
            task_type,
            raw_data_dir:         a.raw_data_dir,
            mid_data_dir:         a.mid_data_dir,
            aux_data_dir:         a.aux_data_dir,
            output_dir:           PathBuf::new(),
            bert_dir:             a.bert_dir,
            bert_type:            a.bert_type,
            max_seq_len:          a.max_seq_len,
            train_epochs:         a.train_epochs,
            train_batch_size:     a.train_batch_size,
            eval_batch_size:      a.eval_batch_size,
            lr:                   a.lr,
            warmup_proportion:    a.warmup_proportion,
            max_grad_norm:        a.max_grad_norm,
            dropout_prob:         a.dropout_prob,
            weight_decay:         a.weight_decay,
            start_threshold:      a.start_threshold,
            end_threshold:        a.end_threshold,
            use_distant_trigger:  a.use_distant_trigger,
            use_trigger_distance: a.use_trigger_distance,
            attack_train,
            enhance_data:         a.enhance_data,
            eval_model:           a.eval_model,
            save_steps:           a.save_steps,
            log_steps:            a.log_steps,
            num_workers:          a.num_workers,
            seed:                 a.seed,
        };
        options.output_dir = options.run_dir(&a.output_dir);
        Ok(options)
    }
}
