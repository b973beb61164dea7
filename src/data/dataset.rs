use burn::data::dataset::Dataset;

use crate::data::feature::Feature;

/// Which split a dataset was built for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Dev,
}

pub struct FeatureDataset {
    features: Vec<Feature>,
    split:    Split,
}

impl FeatureDataset {
    /// Wrap converted features for one split.
    pub fn new(features: Vec<Feature>, split: Split) -> Self {
        tracing::debug!("Built {:?} dataset with {} features", split, features.len());
        Self { features, split }
    }

    /// Which split these features came from.
    pub fn split(&self) -> Split { self.split }
}

impl Dataset<Feature> for FeatureDataset {
    fn get(&self, index: usize) -> Option<Feature> {
        self.features.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.features.len()
    }
}
