// ============================================================
// Layer 4 — Feature Batcher
// ============================================================
// Implements Burn's Batcher trait to stack a Vec<Feature> into
// device tensors.
//
//   Input:  N features, each padded to seq_len S
//   Output: ExtractionBatch with [N, S] sequence tensors and
//           task-shaped targets:
//             pointer → [N, S, T] start/end indicators
//             tags    → [N, S]
//             classes → [N] polarity, [N] tense
//
// All features in a batch come from the same task, so the
// first item decides the target shape.
//
// Reference: Burn Book §4 (Batcher)

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
};

use crate::data::feature::{Feature, FeatureLabels};

/// Targets of a batch, shaped by task
#[derive(Debug, Clone)]
pub enum BatchTargets<B: Backend> {
    Pointer {
        start: Tensor<B, 3, Int>,
        end:   Tensor<B, 3, Int>,
    },
    Tags(Tensor<B, 2, Int>),
    Classes {
        polarity: Tensor<B, 1, Int>,
        tense:    Tensor<B, 1, Int>,
    },
}

#[derive(Debug, Clone)]
pub struct ExtractionBatch<B: Backend> {
    /// [batch_size, seq_len]
    pub token_ids:      Tensor<B, 2, Int>,
    /// [batch_size, seq_len], 1 = real token
    pub attention_mask: Tensor<B, 2, Int>,
    /// [batch_size, seq_len]
    pub aux_ids:        Tensor<B, 2, Int>,
    /// [batch_size, seq_len], 1 = trigger token
    pub trigger_mask:   Tensor<B, 2, Int>,
    pub targets:        BatchTargets<B>,
}

#[derive(Clone, Debug)]
pub struct FeatureBatcher<B: Backend> {
    pub device: B::Device,
}

impl<B: Backend> FeatureBatcher<B> {
    /// Create a batcher that places tensors on `device`.
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }

    fn stack(&self, rows: impl Iterator<Item = i32>, shape: [usize; 2]) -> Tensor<B, 2, Int> {
        let flat: Vec<i32> = rows.collect();
        Tensor::<B, 1, Int>::from_ints(flat.as_slice(), &self.device).reshape(shape)
    }

    /// Flatten one per-token field of every feature into [N, S]
    fn stack_field(
        &self,
        items: &[Feature],
        pick:  impl Fn(&Feature) -> &[u32],
        shape: [usize; 2],
    ) -> Tensor<B, 2, Int> {
        self.stack(items.iter().flat_map(|f| pick(f).iter().map(|&x| x as i32)), shape)
    }

    fn column(&self, values: Vec<i32>) -> Tensor<B, 1, Int> {
        Tensor::<B, 1, Int>::from_ints(values.as_slice(), &self.device)
    }
}

impl<B: Backend> Batcher<Feature, ExtractionBatch<B>> for FeatureBatcher<B> {
    fn batch(&self, items: Vec<Feature>) -> ExtractionBatch<B> {
        let batch_size = items.len();
        let seq_len    = items[0].seq_len();
        let shape      = [batch_size, seq_len];

        let token_ids      = self.stack_field(&items, |f| f.token_ids.as_slice(), shape);
        let attention_mask = self.stack_field(&items, |f| f.attention_mask.as_slice(), shape);
        let aux_ids        = self.stack_field(&items, |f| f.aux_ids.as_slice(), shape);
        let trigger_mask   = self.stack_field(&items, |f| f.trigger_mask.as_slice(), shape);

        let targets = match &items[0].labels {
            FeatureLabels::Pointer { span_types, .. } => {
                let span_types = *span_types;
                let mut starts = Vec::with_capacity(batch_size * seq_len * span_types);
                let mut ends   = Vec::with_capacity(batch_size * seq_len * span_types);
                for f in &items {
                    let FeatureLabels::Pointer { start, end, .. } = &f.labels else {
                        panic!("mixed label kinds in one batch");
                    };
                    starts.extend(start.iter().map(|&x| x as i32));
                    ends.extend(end.iter().map(|&x| x as i32));
                }
                let shape3 = [batch_size, seq_len, span_types];
                BatchTargets::Pointer {
                    start: self.column(starts).reshape(shape3),
                    end:   self.column(ends).reshape(shape3),
                }
            }
            FeatureLabels::Tags(_) => {
                let tags = items.iter().flat_map(|f| match &f.labels {
                    FeatureLabels::Tags(t) => t.iter().map(|&x| x as i32),
                    _ => panic!("mixed label kinds in one batch"),
                });
                BatchTargets::Tags(self.stack(tags, shape))
            }
            FeatureLabels::Classes { .. } => {
                let (polarity, tense): (Vec<i32>, Vec<i32>) = items
                    .iter()
                    .map(|f| match f.labels {
                        FeatureLabels::Classes { polarity, tense } => (polarity as i32, tense as i32),
                        _ => panic!("mixed label kinds in one batch"),
                    })
                    .unzip();
                BatchTargets::Classes {
                    polarity: self.column(polarity),
                    tense:    self.column(tense),
                }
            }
        };

        ExtractionBatch { token_ids, attention_mask, aux_ids, trigger_mask, targets }
    }
}
