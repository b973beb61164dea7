// ============================================================
// Layer 4 — Feature Conversion
// ============================================================
// Turns task examples into fixed-length, model-ready features.
//
// Every feature starts from the same sequence layout:
//
//   [CLS] c_0 c_1 ... c_{n-1} [SEP] [PAD] ... [PAD]
//
// with at most max_seq_len - 2 chars kept, so char i always
// sits at token i + 1. On top of that each task adds:
//
//   trigger     → pointer labels (1 span type), optional
//                 distant-trigger marks in aux_ids
//   role1       → pointer labels (subject, object) + trigger mask,
//                 optional trigger distance in aux_ids
//   role2       → BIO tags (time, location) + trigger mask,
//                 optional trigger distance in aux_ids
//   attribution → polarity / tense class ids + trigger mask
//
// Spans cut off by truncation are dropped from the labels.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::example::{AttributionExample, RoleExample, RoleKind, Span, TriggerExample};
use crate::domain::task::TaskType;
use crate::domain::traits::Processor;
use crate::data::processor::{AttributionProcessor, RoleProcessor, TriggerProcessor};
use crate::infra::label_info::LabelMap;
use crate::infra::tokenizer_store::CharVocab;

/// BIO tag ids for role2: O, B-time, I-time, B-loc, I-loc
pub const NUM_TAGS: usize = 5;

pub fn begin_tag(kind: RoleKind) -> Option<u32> {
    match kind {
        RoleKind::Time     => Some(1),
        RoleKind::Location => Some(3),
        _                  => None,
    }
}

/// Labels carried by a feature; the variant depends on the task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FeatureLabels {
    /// Flattened `[seq_len, span_types]` start/end indicators
    Pointer {
        span_types: usize,
        start:      Vec<u32>,
        end:        Vec<u32>,
    },
    /// One BIO tag per token
    Tags(Vec<u32>),
    /// Sentence-level classes
    Classes { polarity: u32, tense: u32 },
}

/// One fully tokenised and padded sample
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feature {
    pub token_ids:      Vec<u32>,
    pub attention_mask: Vec<u32>,
    /// Distant-trigger marks or trigger-distance buckets, 0 elsewhere
    pub aux_ids:        Vec<u32>,
    /// 1 on trigger tokens
    pub trigger_mask:   Vec<u32>,
    pub labels:         FeatureLabels,
}

impl Feature {
    /// Number of token positions, padding included.
    pub fn seq_len(&self) -> usize {
        self.token_ids.len()
    }
}

/// Conversion parameters shared by all tasks
#[derive(Debug, Clone)]
pub struct FeatureParams {
    pub max_seq_len:          usize,
    pub use_distant_trigger:  bool,
    pub use_trigger_distance: bool,
    pub polarity2id:          LabelMap,
    pub tense2id:             LabelMap,
}

impl FeatureParams {
    /// Number of distinct aux ids a feature can hold
    pub fn aux_vocab_size(&self) -> usize {
        self.max_seq_len.max(2)
    }
}

// ─── Shared Sequence Layout ───────────────────────────────────────────────────

/// Token ids, attention mask and number of chars that survived truncation
fn encode_text(text: &str, vocab: &CharVocab, max_seq_len: usize) -> (Vec<u32>, Vec<u32>, usize) {
    let mut char_ids = vocab.encode_chars(text);
    char_ids.truncate(max_seq_len.saturating_sub(2));
    let kept = char_ids.len();

    let mut token_ids = Vec::with_capacity(max_seq_len);
    token_ids.push(vocab.cls_id);
    token_ids.extend_from_slice(&char_ids);
    token_ids.push(vocab.sep_id);

    let mut attention_mask = vec![1u32; token_ids.len()];
    while token_ids.len() < max_seq_len {
        token_ids.push(vocab.pad_id);
        attention_mask.push(0);
    }

    (token_ids, attention_mask, kept)
}

/// Token range of a char span, if it survived truncation
fn token_range(span: Span, kept: usize) -> Option<(usize, usize)> {
    (span.end < kept).then(|| (span.start + 1, span.end + 1))
}

fn mark_trigger(trigger: Span, kept: usize, seq_len: usize) -> Vec<u32> {
    let mut mask = vec![0u32; seq_len];
    if let Some((s, e)) = token_range(trigger, kept) {
        mask[s..=e].iter_mut().for_each(|m| *m = 1);
    }
    mask
}

/// Distance of each char token to the trigger, shifted by one so
/// that 0 stays free for [CLS]/[SEP]/padding.
fn trigger_distance(trigger: Span, kept: usize, seq_len: usize, max_id: u32) -> Vec<u32> {
    let mut ids = vec![0u32; seq_len];
    for pos in 0..kept {
        let dist = if trigger.contains(pos) {
            0
        } else if pos < trigger.start {
            trigger.start - pos
        } else {
            pos - trigger.end
        };
        ids[pos + 1] = (dist as u32 + 1).min(max_id);
    }
    ids
}

/// Mark every occurrence of every distant trigger word
fn distant_marks(text: &str, words: &[String], kept: usize, seq_len: usize) -> Vec<u32> {
    let chars: Vec<char> = text.chars().collect();
    let mut marks = vec![0u32; seq_len];

    for word in words {
        let w: Vec<char> = word.chars().collect();
        if w.is_empty() || w.len() > chars.len() {
            continue;
        }
        for start in 0..=(chars.len() - w.len()) {
            let end = start + w.len() - 1;
            if end < kept && chars[start..=end] == w[..] {
                marks[start + 1..=end + 1].iter_mut().for_each(|m| *m = 1);
            }
        }
    }
    marks
}

fn pointer_labels(spans: &[(usize, Span)], span_types: usize, kept: usize, seq_len: usize) -> FeatureLabels {
    let mut start = vec![0u32; seq_len * span_types];
    let mut end   = vec![0u32; seq_len * span_types];

    for &(t, span) in spans {
        if let Some((s, e)) = token_range(span, kept) {
            start[s * span_types + t] = 1;
            end[e * span_types + t]   = 1;
        }
    }
    FeatureLabels::Pointer { span_types, start, end }
}

// ─── FeatureConverter ─────────────────────────────────────────────────────────
/// Converts a processor's examples into features
pub trait FeatureConverter: Processor {
    fn convert_example(
        &self,
        example: &Self::Example,
        vocab:   &CharVocab,
        params:  &FeatureParams,
    ) -> Result<Feature>;

    fn convert_examples(
        &self,
        examples: &[Self::Example],
        vocab:    &CharVocab,
        params:   &FeatureParams,
    ) -> Result<Vec<Feature>> {
        let features = examples
            .iter()
            .enumerate()
            .map(|(i, ex)| {
                self.convert_example(ex, vocab, params)
                    .with_context(|| format!("Cannot convert example #{i}"))
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::info!("Converted {} examples to features", features.len());
        Ok(features)
    }
}

impl FeatureConverter for TriggerProcessor {
    fn convert_example(
        &self,
        ex:     &TriggerExample,
        vocab:  &CharVocab,
        params: &FeatureParams,
    ) -> Result<Feature> {
        let (token_ids, attention_mask, kept) = encode_text(&ex.text, vocab, params.max_seq_len);
        let seq_len = token_ids.len();

        let aux_ids = if params.use_distant_trigger {
            distant_marks(&ex.text, &ex.distant_triggers, kept, seq_len)
        } else {
            vec![0; seq_len]
        };

        let spans: Vec<(usize, Span)> = ex.triggers.iter().map(|&s| (0, s)).collect();

        Ok(Feature {
            token_ids,
            attention_mask,
            aux_ids,
            trigger_mask: vec![0; seq_len],
            labels: pointer_labels(&spans, 1, kept, seq_len),
        })
    }
}

impl FeatureConverter for RoleProcessor {
    fn convert_example(
        &self,
        ex:     &RoleExample,
        vocab:  &CharVocab,
        params: &FeatureParams,
    ) -> Result<Feature> {
        let (token_ids, attention_mask, kept) = encode_text(&ex.text, vocab, params.max_seq_len);
        let seq_len = token_ids.len();

        if ex.trigger.end >= kept {
            tracing::debug!("Trigger at {:?} truncated away", ex.trigger);
        }
        let trigger_mask = mark_trigger(ex.trigger, kept, seq_len);

        let aux_ids = if params.use_trigger_distance {
            let max_id = params.aux_vocab_size() as u32 - 1;
            trigger_distance(ex.trigger, kept, seq_len, max_id)
        } else {
            vec![0; seq_len]
        };

        let labels = match self.task() {
            TaskType::Role2 => {
                let mut tags = vec![0u32; seq_len];
                for arg in &ex.arguments {
                    let (Some(b), Some((s, e))) = (begin_tag(arg.kind), token_range(arg.span, kept)) else {
                        continue;
                    };
                    tags[s] = b;
                    tags[s + 1..=e].iter_mut().for_each(|t| *t = b + 1);
                }
                FeatureLabels::Tags(tags)
            }
            _ => {
                let kinds = self.kinds();
                let spans: Vec<(usize, Span)> = ex
                    .arguments
                    .iter()
                    .filter_map(|a| kinds.iter().position(|k| *k == a.kind).map(|t| (t, a.span)))
                    .collect();
                pointer_labels(&spans, kinds.len(), kept, seq_len)
            }
        };

        Ok(Feature { token_ids, attention_mask, aux_ids, trigger_mask, labels })
    }
}

impl FeatureConverter for AttributionProcessor {
    fn convert_example(
        &self,
        ex:     &AttributionExample,
        vocab:  &CharVocab,
        params: &FeatureParams,
    ) -> Result<Feature> {
        let (token_ids, attention_mask, kept) = encode_text(&ex.text, vocab, params.max_seq_len);
        let seq_len = token_ids.len();

        let polarity = *params
            .polarity2id
            .get(&ex.polarity)
            .with_context(|| format!("Unknown polarity label '{}'", ex.polarity))?;
        let tense = *params
            .tense2id
            .get(&ex.tense)
            .with_context(|| format!("Unknown tense label '{}'", ex.tense))?;

        Ok(Feature {
            token_ids,
            attention_mask,
            aux_ids:      vec![0; seq_len],
            trigger_mask: mark_trigger(ex.trigger, kept, seq_len),
            labels:       FeatureLabels::Classes { polarity: polarity as u32, tense: tense as u32 },
        })
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::example::Argument;
    use crate::infra::tokenizer_store::test_vocab;

    const TEXT: &str = "公司昨日在北京收购了工厂";

    fn params(max_seq_len: usize) -> FeatureParams {
        FeatureParams {
            max_seq_len,
            use_distant_trigger:  true,
            use_trigger_distance: true,
            polarity2id: [("肯定".to_string(), 0), ("否定".to_string(), 1)].into(),
            tense2id:    [("过去".to_string(), 0)].into(),
        }
    }

    fn role_example() -> RoleExample {
        RoleExample {
            text:    TEXT.into(),
            trigger: Span::new(7, 8),
            arguments: vec![
                Argument { kind: RoleKind::Subject,  span: Span::new(0, 1) },
                Argument { kind: RoleKind::Object,   span: Span::new(10, 11) },
                Argument { kind: RoleKind::Time,     span: Span::new(2, 3) },
                Argument { kind: RoleKind::Location, span: Span::new(5, 6) },
            ],
        }
    }

    #[test]
    fn test_layout_and_padding() {
        let vocab = test_vocab(TEXT);
        let (ids, mask, kept) = encode_text("公司", &vocab, 6);
        assert_eq!(kept, 2);
        assert_eq!(ids, vec![vocab.cls_id, 5, 6, vocab.sep_id, vocab.pad_id, vocab.pad_id]);
        assert_eq!(mask, vec![1, 1, 1, 1, 0, 0]);
    }

    #[test]
    fn test_trigger_pointer_labels_and_distant_marks() {
        let vocab = test_vocab(TEXT);
        let ex = TriggerExample {
            text:             TEXT.into(),
            triggers:         vec![Span::new(7, 8)],
            distant_triggers: vec!["工厂".into()],
        };
        let f = TriggerProcessor::new().convert_example(&ex, &vocab, &params(16)).unwrap();

        let FeatureLabels::Pointer { span_types, start, end } = &f.labels else {
            panic!("expected pointer labels");
        };
        assert_eq!(*span_types, 1);
        assert_eq!(start[8], 1);
        assert_eq!(end[9], 1);
        assert_eq!(start.iter().sum::<u32>(), 1);
        assert_eq!(&f.aux_ids[11..13], &[1, 1]);
        assert_eq!(f.aux_ids.iter().sum::<u32>(), 2);
    }

    #[test]
    fn test_truncated_spans_are_dropped() {
        let vocab = test_vocab(TEXT);
        let ex = TriggerExample {
            text:             TEXT.into(),
            triggers:         vec![Span::new(10, 11)],
            distant_triggers: Vec::new(),
        };
        // 8 tokens → only 6 chars kept
        let f = TriggerProcessor::new().convert_example(&ex, &vocab, &params(8)).unwrap();
        let FeatureLabels::Pointer { start, .. } = &f.labels else { panic!() };
        assert!(start.iter().all(|&x| x == 0));
    }

    #[test]
    fn test_role1_uses_subject_object_types() {
        let vocab = test_vocab(TEXT);
        let f = RoleProcessor::new(TaskType::Role1)
            .convert_example(&role_example(), &vocab, &params(16))
            .unwrap();

        let FeatureLabels::Pointer { span_types, start, end } = &f.labels else { panic!() };
        assert_eq!(*span_types, 2);
        assert_eq!(start[1 * 2], 1);      // subject starts at token 1
        assert_eq!(end[12 * 2 + 1], 1);   // object ends at token 12
        assert_eq!(start.iter().sum::<u32>(), 2);

        assert_eq!(&f.trigger_mask[8..10], &[1, 1]);
        // distance: trigger tokens get 1, neighbours 2
        assert_eq!(f.aux_ids[8], 1);
        assert_eq!(f.aux_ids[7], 2);
        assert_eq!(f.aux_ids[0], 0);
    }

    #[test]
    fn test_role2_bio_tags() {
        let vocab = test_vocab(TEXT);
        let f = RoleProcessor::new(TaskType::Role2)
            .convert_example(&role_example(), &vocab, &params(16))
            .unwrap();

        let FeatureLabels::Tags(tags) = &f.labels else { panic!() };
        assert_eq!(&tags[3..5], &[1, 2]);
        assert_eq!(&tags[6..8], &[3, 4]);
        assert_eq!(tags[1], 0);
    }

    #[test]
    fn test_attribution_unknown_label_fails() {
        let vocab = test_vocab(TEXT);
        let mut ex = AttributionExample {
            text:     TEXT.into(),
            trigger:  Span::new(7, 8),
            polarity: "否定".into(),
            tense:    "过去".into(),
        };
        let f = AttributionProcessor::new().convert_example(&ex, &vocab, &params(16)).unwrap();
        assert!(matches!(f.labels, FeatureLabels::Classes { polarity: 1, tense: 0 }));

        ex.tense = "将来".into();
        assert!(AttributionProcessor::new().convert_example(&ex, &vocab, &params(16)).is_err());
    }
}
