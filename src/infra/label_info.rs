// ============================================================
// Layer 6 — Label Vocabularies
// ============================================================
// Loads the label-to-id maps a task needs from the mid-data
// directory. Only attribution has any:
//
//   <mid_data_dir>/polarity2id.json
//   <mid_data_dir>/tense2id.json
//
// Each file is either a flat object {"label": id} or the
// wrapped form {"map": {"label": id}}. Ids must be exactly
// 0..n with no gaps or repeats.

use anyhow::{ensure, Context, Result};
use serde::Deserialize;
use std::{collections::BTreeMap, fs, path::Path};

use crate::domain::task::TaskType;

pub type LabelMap = BTreeMap<String, usize>;

#[derive(Deserialize)]
#[serde(untagged)]
enum LabelFile {
    Wrapped { map: LabelMap },
    Flat(LabelMap),
}

/// Immutable label vocabularies for one run
#[derive(Debug, Clone, Default)]
pub struct LabelInfo {
    pub polarity2id: LabelMap,
    pub tense2id:    LabelMap,
}

impl LabelInfo {
    /// Load whatever vocabularies `task` needs
    pub fn load(task: TaskType, mid_data_dir: &Path) -> Result<Self> {
        if task != TaskType::Attribution {
            return Ok(Self::default());
        }

        let info = Self {
            polarity2id: read_label_map(&mid_data_dir.join("polarity2id.json"))?,
            tense2id:    read_label_map(&mid_data_dir.join("tense2id.json"))?,
        };
        tracing::info!(
            "Loaded {} polarity labels and {} tense labels",
            info.polarity2id.len(),
            info.tense2id.len()
        );
        Ok(info)
    }
}

/// Reverse a label map into an id-indexed list of names
pub fn id2label(map: &LabelMap) -> Vec<String> {
    let mut names = vec![String::new(); map.len()];
    for (label, &id) in map {
        if let Some(slot) = names.get_mut(id) {
            *slot = label.clone();
        }
    }
    names
}

fn read_label_map(path: &Path) -> Result<LabelMap> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("Cannot read label map '{}'", path.display()))?;

    let map = match serde_json::from_str::<LabelFile>(&json)
        .with_context(|| format!("Malformed label map in '{}'", path.display()))?
    {
        LabelFile::Wrapped { map } => map,
        LabelFile::Flat(map)       => map,
    };

    ensure!(!map.is_empty(), "Label map '{}' is empty", path.display());
    let mut ids: Vec<usize> = map.values().copied().collect();
    ids.sort_unstable();
    ensure!(
        ids.iter().enumerate().all(|(i, &id)| i == id),
        "Label ids in '{}' must be 0..{} without gaps or repeats",
        path.display(),
        map.len()
    );

    Ok(map)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_non_attribution_tasks_need_no_files() {
        let dir  = TempDir::new().unwrap();
        let info = LabelInfo::load(TaskType::Trigger, dir.path()).unwrap();
        assert!(info.polarity2id.is_empty());
    }

    #[test]
    fn test_flat_and_wrapped_forms() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("polarity2id.json"), r#"{"肯定": 0, "否定": 1, "可能": 2}"#).unwrap();
        fs::write(dir.path().join("tense2id.json"), r#"{"map": {"过去": 0, "将来": 1}}"#).unwrap();

        let info = LabelInfo::load(TaskType::Attribution, dir.path()).unwrap();
        assert_eq!(info.polarity2id["否定"], 1);
        assert_eq!(info.tense2id.len(), 2);
        assert_eq!(id2label(&info.tense2id), vec!["过去".to_string(), "将来".to_string()]);
    }

    #[test]
    fn test_gapped_ids_are_rejected() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("polarity2id.json"), r#"{"a": 0, "b": 2}"#).unwrap();
        fs::write(dir.path().join("tense2id.json"), r#"{"c": 0}"#).unwrap();
        assert!(LabelInfo::load(TaskType::Attribution, dir.path()).is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(LabelInfo::load(TaskType::Attribution, dir.path()).is_err());
    }
}
