// ============================================================
// Layer 3 — Task Types
// ============================================================
// The four task variants are parsed from their literal CLI
// names once at startup and then threaded through the run.
//
// The auxiliary merge table is deliberately irregular:
//   trigger     → aux/trigger_first.json, aux/trigger_third_new.json
//   role1       → aux/role1_first.json,   aux/role1_second.json
//   role2       → raw/preliminary_stack.json
//   attribution → nothing
// It is kept as data, not derived from a rule.

use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Which head of the pipeline a run trains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Trigger,
    Role1,
    Role2,
    Attribution,
}

impl TaskType {
    pub const ALL: [TaskType; 4] = [
        TaskType::Trigger,
        TaskType::Role1,
        TaskType::Role2,
        TaskType::Attribution,
    ];

    /// The literal name used on the command line and in paths
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Trigger     => "trigger",
            TaskType::Role1       => "role1",
            TaskType::Role2       => "role2",
            TaskType::Attribution => "attribution",
        }
    }

    /// Tasks that may merge auxiliary training data
    pub fn is_augmentable(&self) -> bool {
        !self.augmentation_sources().is_empty()
    }

    /// Tasks that condition on a known trigger span
    pub fn is_role(&self) -> bool {
        matches!(self, TaskType::Role1 | TaskType::Role2)
    }

    /// Extra training files merged when data enhancement is on,
    /// in the order they are appended.
    pub fn augmentation_sources(&self) -> Vec<AugmentSource> {
        match self {
            TaskType::Trigger => vec![
                AugmentSource::aux("trigger_first.json"),
                AugmentSource::aux("trigger_third_new.json"),
            ],
            TaskType::Role1 => vec![
                AugmentSource::aux("role1_first.json"),
                AugmentSource::aux("role1_second.json"),
            ],
            TaskType::Role2 => vec![
                AugmentSource::raw("preliminary_stack.json"),
            ],
            TaskType::Attribution => Vec::new(),
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "trigger"     => Ok(TaskType::Trigger),
            "role1"       => Ok(TaskType::Role1),
            "role2"       => Ok(TaskType::Role2),
            "attribution" => Ok(TaskType::Attribution),
            other         => bail!("task mismatch: '{other}' is not one of trigger, role1, role2, attribution"),
        }
    }
}

// ─── Augmentation Sources ─────────────────────────────────────────────────────

/// Which configured directory an auxiliary file lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataRoot {
    Raw,
    Aux,
}

/// One extra training file merged into the train examples
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AugmentSource {
    pub root:      DataRoot,
    pub file_name: &'static str,
}

impl AugmentSource {
    fn raw(file_name: &'static str) -> Self {
        Self { root: DataRoot::Raw, file_name }
    }

    fn aux(file_name: &'static str) -> Self {
        Self { root: DataRoot::Aux, file_name }
    }

    /// Join the file name onto whichever directory it belongs to
    pub fn resolve(&self, raw_data_dir: &Path, aux_data_dir: &Path) -> PathBuf {
        match self.root {
            DataRoot::Raw => raw_data_dir.join(self.file_name),
            DataRoot::Aux => aux_data_dir.join(self.file_name),
        }
    }
}

// ─── Adversarial Training ─────────────────────────────────────────────────────

/// Embedding-space adversarial training mode.
/// The empty string on the command line means no attack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttackTrain {
    #[default]
    None,
    Fgm,
    Pgd,
}

impl AttackTrain {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttackTrain::None => "",
            AttackTrain::Fgm  => "fgm",
            AttackTrain::Pgd  => "pgd",
        }
    }

    pub fn is_enabled(&self) -> bool {
        *self != AttackTrain::None
    }
}

impl FromStr for AttackTrain {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            ""    => Ok(AttackTrain::None),
            "fgm" => Ok(AttackTrain::Fgm),
            "pgd" => Ok(AttackTrain::Pgd),
            other => bail!("unsupported attack_train '{other}', expected '', 'fgm' or 'pgd'"),
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn names(task: TaskType) -> Vec<&'static str> {
        task.augmentation_sources().iter().map(|s| s.file_name).collect()
    }

    #[test]
    fn test_parse_round_trips_literal_names() {
        for task in TaskType::ALL {
            assert_eq!(task.as_str().parse::<TaskType>().unwrap(), task);
        }
    }

    #[test]
    fn test_unknown_task_is_rejected() {
        let err = "role3".parse::<TaskType>().unwrap_err();
        assert!(err.to_string().contains("task mismatch"));
    }

    #[test]
    fn test_augmentation_table() {
        assert_eq!(names(TaskType::Trigger), vec!["trigger_first.json", "trigger_third_new.json"]);
        assert_eq!(names(TaskType::Role1),   vec!["role1_first.json", "role1_second.json"]);
        assert_eq!(names(TaskType::Role2),   vec!["preliminary_stack.json"]);
        assert!(names(TaskType::Attribution).is_empty());
        assert!(!TaskType::Attribution.is_augmentable());
    }

    #[test]
    fn test_role2_merges_from_raw_dir() {
        let src = &TaskType::Role2.augmentation_sources()[0];
        let path = src.resolve(Path::new("raw"), Path::new("aux"));
        assert_eq!(path, Path::new("raw").join("preliminary_stack.json"));

        let src = &TaskType::Role1.augmentation_sources()[1];
        let path = src.resolve(Path::new("raw"), Path::new("aux"));
        assert_eq!(path, Path::new("aux").join("role1_second.json"));
    }

    #[test]
    fn test_attack_train_parse() {
        assert_eq!("".parse::<AttackTrain>().unwrap(), AttackTrain::None);
        assert_eq!("pgd".parse::<AttackTrain>().unwrap(), AttackTrain::Pgd);
        assert!("free".parse::<AttackTrain>().is_err());
    }
}
