// ============================================================
// Layer 6 — Metrics
// ============================================================
// Counting, best-checkpoint selection and the files metrics
// end up in.
//
//   Prf          — true positive / predicted / gold counters
//   EvalReport   — per-checkpoint lines plus the best-F1 summary,
//                  appended to eval_metric.txt
//   LossLogger   — training loss rows appended to train_metrics.csv
//
// eval_metric.txt only ever grows: running evaluation twice
// leaves two complete reports one after the other.
//
// Example report:
//   In step 100: [MIRCO] precision: 0.5000, recall: 0.5000, f1: 0.5000
//
//   In step 200: [MIRCO] precision: 0.7000, recall: 0.7000, f1: 0.7000
//
//   Max f1 is: 0.7, in step 200

use anyhow::{Context, Result};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

pub const REPORT_FILE: &str = "eval_metric.txt";
pub const LOSS_FILE:   &str = "train_metrics.csv";

// ─── Prf ──────────────────────────────────────────────────────────────────────

/// Counts for precision / recall / F1
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Prf {
    pub tp:   usize,
    pub pred: usize,
    pub gold: usize,
}

impl Prf {
    /// Add one batch of counts.
    pub fn add(&mut self, tp: usize, pred: usize, gold: usize) {
        self.tp   += tp;
        self.pred += pred;
        self.gold += gold;
    }

    pub fn merge(&mut self, other: Prf) {
        self.add(other.tp, other.pred, other.gold);
    }

    /// tp / pred, or 0 when nothing was predicted.
    pub fn precision(&self) -> f64 {
        if self.pred == 0 { 0.0 } else { self.tp as f64 / self.pred as f64 }
    }

    /// tp / gold, or 0 when there is no gold.
    pub fn recall(&self) -> f64 {
        if self.gold == 0 { 0.0 } else { self.tp as f64 / self.gold as f64 }
    }

    pub fn f1(&self) -> f64 {
        let (p, r) = (self.precision(), self.recall());
        if p + r == 0.0 { 0.0 } else { 2.0 * p * r / (p + r) }
    }

    /// `precision: 0.5000, recall: 0.5000, f1: 0.5000`
    pub fn describe(&self) -> String {
        format!(
            "precision: {:.4}, recall: {:.4}, f1: {:.4}",
            self.precision(),
            self.recall(),
            self.f1()
        )
    }
}

// ─── EvalReport ───────────────────────────────────────────────────────────────

/// Accumulates checkpoint results. The first strictly greater F1
/// wins; ties keep the earlier step.
#[derive(Debug, Clone)]
pub struct EvalReport {
    text:        String,
    max_f1:      f64,
    max_f1_step: usize,
}

impl Default for EvalReport {
    fn default() -> Self {
        Self::new()
    }
}

impl EvalReport {
    /// Empty report with the best F1 at 0.0, step 0.
    pub fn new() -> Self {
        Self { text: String::new(), max_f1: 0.0, max_f1_step: 0 }
    }

    /// Add the line for one checkpoint and update the best F1.
    pub fn record(&mut self, step: usize, metric_str: &str, f1: f64) {
        self.text.push_str(&format!("In step {step}: {metric_str}\n\n"));
        if f1 > self.max_f1 {
            self.max_f1      = f1;
            self.max_f1_step = step;
        }
    }

    /// `(max_f1, max_f1_step)` so far.
    pub fn best(&self) -> (f64, usize) {
        (self.max_f1, self.max_f1_step)
    }

    /// Full report text including the summary line
    pub fn finish(&self) -> String {
        // {:?} keeps the decimal point on whole numbers (0.0). Below
        // 1e-4 it switches to a one-digit exponent: `1e-5`, not `1e-05`.
        format!(
            "{}Max f1 is: {:?}, in step {}\n",
            self.text, self.max_f1, self.max_f1_step
        )
    }

    /// Append the finished report to `<dir>/eval_metric.txt`.
    pub fn append_to(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(REPORT_FILE);
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Cannot open report '{}'", path.display()))?;
        f.write_all(self.finish().as_bytes())
            .with_context(|| format!("Cannot write report '{}'", path.display()))?;
        Ok(path)
    }
}

// ─── LossLogger ───────────────────────────────────────────────────────────────

/// Appends `step,epoch,loss,lr` rows to train_metrics.csv
pub struct LossLogger {
    csv_path: PathBuf,
}

impl LossLogger {
    /// Writes the header only when the file is new.
    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create '{}'", dir.display()))?;
        let csv_path = dir.join(LOSS_FILE);

        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)
                .with_context(|| format!("Cannot create '{}'", csv_path.display()))?;
            writeln!(f, "step,epoch,loss,lr")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    /// Append one row.
    pub fn log(&self, step: usize, epoch: usize, loss: f64, lr: f64) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("Cannot open '{}'", self.csv_path.display()))?;
        writeln!(f, "{step},{epoch},{loss:.6},{lr:.8}")?;
        Ok(())
    }
}
