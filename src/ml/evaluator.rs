// ============================================================
// Layer 5 — Checkpoint Evaluation
// ============================================================
// Runs a loaded model over the dev loader and scores the
// predictions against the callbacks built with the dev
// examples. Dev batches are never shuffled, so the n-th
// prediction belongs to the n-th callback.
//
//   trigger     → pointer decoding → micro P/R/F1 over spans
//   role1       → pointer decoding per role → per-role + micro
//   role2       → BIO decoding → per-type + micro
//   attribution → argmax → accuracy and macro F1 per head,
//                 score = mean of the two macro F1 values
//
// Every evaluation returns (metric_str, score).

use anyhow::{ensure, Result};
use burn::{
    data::dataloader::DataLoader,
    prelude::*,
    tensor::activation::sigmoid,
};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use crate::data::batcher::ExtractionBatch;
use crate::data::processor::{AttributionProcessor, RoleProcessor, TriggerProcessor};
use crate::domain::example::{
    Argument, AttributionCallback, RoleCallback, RoleKind, Span, TriggerCallback,
};
use crate::domain::task::TaskType;
use crate::domain::traits::Processor;
use crate::infra::metrics::Prf;
use crate::ml::model::{ExtractionModel, ModelOutput};

/// Decoding knobs shared by the evaluators
#[derive(Debug, Clone)]
pub struct EvalSettings {
    pub max_seq_len:     usize,
    pub start_threshold: f32,
    pub end_threshold:   f32,
    pub polarity_labels: Vec<String>,
    pub tense_labels:    Vec<String>,
}

// ─── Decoding ─────────────────────────────────────────────────────────────────

/// Pointer decoding over char positions: every start at or above
/// `start_th` is closed by the nearest end at or after it.
pub fn decode_pointer_spans(starts: &[f32], ends: &[f32], start_th: f32, end_th: f32) -> Vec<Span> {
    let len = starts.len().min(ends.len());
    let mut spans = Vec::new();
    for i in 0..len {
        if starts[i] < start_th {
            continue;
        }
        if let Some(j) = (i..len).find(|&j| ends[j] >= end_th) {
            spans.push(Span::new(i, j));
        }
    }
    spans
}

/// Turn per-char BIO tags into typed arguments. An I tag that
/// does not continue a span of its own type is treated as O.
pub fn decode_bio(tags: &[u32]) -> Vec<Argument> {
    let kind_of = |begin: u32| match begin {
        1 => Some(RoleKind::Time),
        3 => Some(RoleKind::Location),
        _ => None,
    };

    let mut args = Vec::new();
    let mut open: Option<(u32, usize)> = None;

    for (i, &tag) in tags.iter().enumerate() {
        let continues = matches!(open, Some((b, _)) if tag == b + 1);
        if continues {
            continue;
        }
        if let Some((b, s)) = open.take() {
            if let Some(kind) = kind_of(b) {
                args.push(Argument { kind, span: Span::new(s, i - 1) });
            }
        }
        if kind_of(tag).is_some() {
            open = Some((tag, i));
        }
    }
    if let Some((b, s)) = open {
        if let Some(kind) = kind_of(b) {
            args.push(Argument { kind, span: Span::new(s, tags.len() - 1) });
        }
    }
    args
}

// ─── Scoring ──────────────────────────────────────────────────────────────────

fn count<T: Ord + Copy>(pred: &[T], gold: &[T]) -> Prf {
    let pred: BTreeSet<T> = pred.iter().copied().collect();
    let gold: BTreeSet<T> = gold.iter().copied().collect();
    Prf {
        tp:   pred.intersection(&gold).count(),
        pred: pred.len(),
        gold: gold.len(),
    }
}

pub fn score_triggers(preds: &[Vec<Span>], callbacks: &[TriggerCallback]) -> (String, f64) {
    let mut micro = Prf::default();
    for (pred, cb) in preds.iter().zip(callbacks) {
        micro.merge(count(pred, &cb.gold));
    }
    (format!("[MIRCO] {}", micro.describe()), micro.f1())
}

pub fn score_arguments(
    preds:     &[Vec<Argument>],
    callbacks: &[RoleCallback],
    kinds:     &[RoleKind],
) -> (String, f64) {
    let mut micro    = Prf::default();
    let mut per_kind = vec![Prf::default(); kinds.len()];

    for (pred, cb) in preds.iter().zip(callbacks) {
        for (k, kind) in kinds.iter().enumerate() {
            let p: Vec<Span> = pred.iter().filter(|a| a.kind == *kind).map(|a| a.span).collect();
            let g: Vec<Span> = cb.gold.iter().filter(|a| a.kind == *kind).map(|a| a.span).collect();
            let prf = count(&p, &g);
            per_kind[k].merge(prf);
            micro.merge(prf);
        }
    }

    let mut metric = format!("[MIRCO] {}", micro.describe());
    for (kind, prf) in kinds.iter().zip(&per_kind) {
        metric.push_str(&format!("\n[{}] {}", kind.as_str(), prf.describe()));
    }
    (metric, micro.f1())
}

/// Accuracy and macro F1 over the classes seen in gold or predictions
pub fn classification_scores(pred: &[String], gold: &[String]) -> (f64, f64) {
    if gold.is_empty() {
        return (0.0, 0.0);
    }
    let correct = pred.iter().zip(gold).filter(|(p, g)| p == g).count();
    let accuracy = correct as f64 / gold.len() as f64;

    let mut per_class: BTreeMap<&str, Prf> = BTreeMap::new();
    for (p, g) in pred.iter().zip(gold) {
        per_class.entry(p.as_str()).or_default().pred += 1;
        per_class.entry(g.as_str()).or_default().gold += 1;
        if p == g {
            per_class.entry(g.as_str()).or_default().tp += 1;
        }
    }
    let macro_f1 = per_class.values().map(Prf::f1).sum::<f64>() / per_class.len() as f64;
    (accuracy, macro_f1)
}

pub fn score_attribution(
    polarity:  &[String],
    tense:     &[String],
    callbacks: &[AttributionCallback],
) -> (String, f64) {
    let gold_p: Vec<String> = callbacks.iter().map(|c| c.polarity.clone()).collect();
    let gold_t: Vec<String> = callbacks.iter().map(|c| c.tense.clone()).collect();

    let (p_acc, p_f1) = classification_scores(polarity, &gold_p);
    let (t_acc, t_f1) = classification_scores(tense, &gold_t);

    let metric = format!(
        "[polarity] accuracy: {p_acc:.4}, macro f1: {p_f1:.4}\n[tense] accuracy: {t_acc:.4}, macro f1: {t_f1:.4}"
    );
    (metric, (p_f1 + t_f1) / 2.0)
}

// ─── Tensor Helpers ───────────────────────────────────────────────────────────

/// Number of chars of `text` that fit in the sequence
fn kept_chars(text: &str, max_seq_len: usize) -> usize {
    text.chars().count().min(max_seq_len.saturating_sub(2))
}

/// Per-char probabilities of span type `t` for batch row `n`
fn char_probs(flat: &[f32], n: usize, t: usize, seq_len: usize, types: usize, kept: usize) -> Vec<f32> {
    (0..kept)
        .map(|i| flat[(n * seq_len + i + 1) * types + t])
        .collect()
}

fn argmax_rows<B: Backend>(logits: Tensor<B, 2>) -> Vec<usize> {
    let [rows, _] = logits.dims();
    logits
        .argmax(1)
        .reshape([rows])
        .into_data()
        .iter::<i64>()
        .map(|x| x as usize)
        .collect()
}

fn pointer_outputs<B: Backend>(output: ModelOutput<B>) -> Result<(Vec<f32>, Vec<f32>, [usize; 3])> {
    let ModelOutput::Pointer { start_logits, end_logits } = output else {
        anyhow::bail!("expected pointer logits from the model");
    };
    let dims = start_logits.dims();
    let starts = sigmoid(start_logits).into_data().iter::<f32>().collect();
    let ends   = sigmoid(end_logits).into_data().iter::<f32>().collect();
    Ok((starts, ends, dims))
}

// ─── TaskEvaluator ────────────────────────────────────────────────────────────

/// Scores one checkpoint of a task on the dev loader
pub trait TaskEvaluator: Processor {
    fn evaluate<B: Backend>(
        &self,
        model:     &ExtractionModel<B>,
        loader:    &Arc<dyn DataLoader<ExtractionBatch<B>>>,
        callbacks: &[Self::Callback],
        settings:  &EvalSettings,
    ) -> Result<(String, f64)>;
}

fn ensure_aligned(seen: usize, callbacks: usize) -> Result<()> {
    ensure!(
        seen == callbacks,
        "dev loader produced {} predictions for {} callbacks",
        seen,
        callbacks
    );
    Ok(())
}

impl TaskEvaluator for TriggerProcessor {
    fn evaluate<B: Backend>(
        &self,
        model:     &ExtractionModel<B>,
        loader:    &Arc<dyn DataLoader<ExtractionBatch<B>>>,
        callbacks: &[TriggerCallback],
        settings:  &EvalSettings,
    ) -> Result<(String, f64)> {
        let mut preds = Vec::with_capacity(callbacks.len());

        for batch in loader.iter() {
            let (starts, ends, [n_rows, seq_len, types]) = pointer_outputs(model.forward(&batch))?;
            for n in 0..n_rows {
                let Some(cb) = callbacks.get(preds.len()) else { break };
                let kept = kept_chars(&cb.text, settings.max_seq_len);
                preds.push(decode_pointer_spans(
                    &char_probs(&starts, n, 0, seq_len, types, kept),
                    &char_probs(&ends, n, 0, seq_len, types, kept),
                    settings.start_threshold,
                    settings.end_threshold,
                ));
            }
        }

        ensure_aligned(preds.len(), callbacks.len())?;
        Ok(score_triggers(&preds, callbacks))
    }
}

impl TaskEvaluator for RoleProcessor {
    fn evaluate<B: Backend>(
        &self,
        model:     &ExtractionModel<B>,
        loader:    &Arc<dyn DataLoader<ExtractionBatch<B>>>,
        callbacks: &[RoleCallback],
        settings:  &EvalSettings,
    ) -> Result<(String, f64)> {
        let kinds = self.kinds();
        let mut preds: Vec<Vec<Argument>> = Vec::with_capacity(callbacks.len());

        for batch in loader.iter() {
            match (self.task(), model.forward(&batch)) {
                (TaskType::Role2, ModelOutput::Tags(logits)) => {
                    let [n_rows, seq_len, _] = logits.dims();
                    let tags: Vec<u32> = logits
                        .argmax(2)
                        .reshape([n_rows * seq_len])
                        .into_data()
                        .iter::<i64>()
                        .map(|x| x as u32)
                        .collect();
                    for n in 0..n_rows {
                        let Some(cb) = callbacks.get(preds.len()) else { break };
                        let kept = kept_chars(&cb.text, settings.max_seq_len);
                        let row  = &tags[n * seq_len + 1..n * seq_len + 1 + kept];
                        preds.push(decode_bio(row));
                    }
                }
                (_, output) => {
                    let (starts, ends, [n_rows, seq_len, types]) = pointer_outputs(output)?;
                    for n in 0..n_rows {
                        let Some(cb) = callbacks.get(preds.len()) else { break };
                        let kept = kept_chars(&cb.text, settings.max_seq_len);
                        let mut args = Vec::new();
                        for (t, kind) in kinds.iter().enumerate() {
                            let spans = decode_pointer_spans(
                                &char_probs(&starts, n, t, seq_len, types, kept),
                                &char_probs(&ends, n, t, seq_len, types, kept),
                                settings.start_threshold,
                                settings.end_threshold,
                            );
                            args.extend(spans.into_iter().map(|span| Argument { kind: *kind, span }));
                        }
                        preds.push(args);
                    }
                }
            }
        }

        ensure_aligned(preds.len(), callbacks.len())?;
        Ok(score_arguments(&preds, callbacks, kinds))
    }
}

impl TaskEvaluator for AttributionProcessor {
    fn evaluate<B: Backend>(
        &self,
        model:     &ExtractionModel<B>,
        loader:    &Arc<dyn DataLoader<ExtractionBatch<B>>>,
        callbacks: &[AttributionCallback],
        settings:  &EvalSettings,
    ) -> Result<(String, f64)> {
        let label = |labels: &[String], id: usize| labels.get(id).cloned().unwrap_or_default();
        let mut polarity = Vec::with_capacity(callbacks.len());
        let mut tense    = Vec::with_capacity(callbacks.len());

        for batch in loader.iter() {
            let ModelOutput::Classes { polarity_logits, tense_logits } = model.forward(&batch) else {
                anyhow::bail!("expected class logits from the model");
            };
            polarity.extend(argmax_rows(polarity_logits).into_iter().map(|i| label(&settings.polarity_labels, i)));
            tense.extend(argmax_rows(tense_logits).into_iter().map(|i| label(&settings.tense_labels, i)));
        }

        ensure_aligned(polarity.len(), callbacks.len())?;
        Ok(score_attribution(&polarity, &tense, callbacks))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pointer_decoding_uses_nearest_end() {
        let starts = [0.9, 0.1, 0.1, 0.8, 0.1];
        let ends   = [0.1, 0.7, 0.1, 0.1, 0.9];
        let spans  = decode_pointer_spans(&starts, &ends, 0.5, 0.5);
        assert_eq!(spans, vec![Span::new(0, 1), Span::new(3, 4)]);
    }

    #[test]
    fn test_pointer_start_without_end_is_dropped() {
        let spans = decode_pointer_spans(&[0.1, 0.9], &[0.9, 0.1], 0.5, 0.5);
        assert!(spans.is_empty());
    }

    #[test]
    fn test_bio_decoding() {
        // O B-time I-time O B-loc I-loc I-time B-time
        let args = decode_bio(&[0, 1, 2, 0, 3, 4, 2, 1]);
        assert_eq!(args, vec![
            Argument { kind: RoleKind::Time,     span: Span::new(1, 2) },
            Argument { kind: RoleKind::Location, span: Span::new(4, 5) },
            Argument { kind: RoleKind::Time,     span: Span::new(7, 7) },
        ]);
    }

    #[test]
    fn test_trigger_scores() {
        let callbacks = vec![
            TriggerCallback { text: "abcdef".into(), gold: vec![Span::new(0, 1), Span::new(3, 4)] },
            TriggerCallback { text: "xyz".into(),    gold: vec![] },
        ];
        let preds = vec![vec![Span::new(0, 1)], vec![Span::new(1, 1)]];
        let (metric, f1) = score_triggers(&preds, &callbacks);
        assert_eq!(metric, "[MIRCO] precision: 0.5000, recall: 0.5000, f1: 0.5000");
        assert!((f1 - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_argument_scores_per_kind() {
        let kinds = [RoleKind::Subject, RoleKind::Object];
        let callbacks = vec![RoleCallback {
            text:    "公司收购了工厂".into(),
            trigger: Span::new(2, 3),
            gold: vec![
                Argument { kind: RoleKind::Subject, span: Span::new(0, 1) },
                Argument { kind: RoleKind::Object,  span: Span::new(5, 6) },
            ],
        }];
        // right span, wrong kind for the object
        let preds = vec![vec![
            Argument { kind: RoleKind::Subject, span: Span::new(0, 1) },
            Argument { kind: RoleKind::Subject, span: Span::new(5, 6) },
        ]];
        let (metric, f1) = score_arguments(&preds, &callbacks, &kinds);
        assert!(metric.starts_with("[MIRCO] precision: 0.5000, recall: 0.5000"));
        assert!(metric.contains("[object] precision: 0.0000"));
        assert!((f1 - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_attribution_macro_f1() {
        let s = |v: &[&str]| v.iter().map(|x| x.to_string()).collect::<Vec<_>>();
        let (acc, macro_f1) = classification_scores(&s(&["a", "a", "b", "b"]), &s(&["a", "b", "b", "b"]));
        assert_eq!(acc, 0.75);
        // a: p=0.5 r=1 f1=2/3; b: p=1 r=2/3 f1=0.8
        assert!((macro_f1 - (2.0 / 3.0 + 0.8) / 2.0).abs() < 1e-12);

        let callbacks = vec![
            AttributionCallback { polarity: "a".into(), tense: "x".into() },
            AttributionCallback { polarity: "b".into(), tense: "x".into() },
        ];
        let (_, score) = score_attribution(&s(&["a", "b"]), &s(&["x", "x"]), &callbacks);
        assert_eq!(score, 1.0);
    }

    #[test]
    fn test_evaluate_trigger_on_tiny_model() {
        use burn::backend::NdArray;
        use burn::data::dataloader::DataLoaderBuilder;
        use crate::data::batcher::FeatureBatcher;
        use crate::data::dataset::{FeatureDataset, Split};
        use crate::data::feature::{FeatureConverter, FeatureParams};
        use crate::domain::example::TriggerExample;
        use crate::infra::tokenizer_store::test_vocab;
        use crate::ml::model::{build_model, EncoderSettings, ModelParams};

        type TestBackend = NdArray;
        let device = Default::default();

        let text = "公司收购了工厂";
        let examples: Vec<TriggerExample> = (0..3)
            .map(|_| TriggerExample { text: text.into(), triggers: vec![Span::new(2, 3)], distant_triggers: vec![] })
            .collect();
        let callbacks: Vec<TriggerCallback> = examples
            .iter()
            .map(|e| TriggerCallback { text: e.text.clone(), gold: e.triggers.clone() })
            .collect();

        let params = FeatureParams {
            max_seq_len: 12, use_distant_trigger: false, use_trigger_distance: false,
            polarity2id: Default::default(), tense2id: Default::default(),
        };
        let features = TriggerProcessor::new()
            .convert_examples(&examples, &test_vocab(text), &params)
            .unwrap();

        let loader = DataLoaderBuilder::new(FeatureBatcher::<TestBackend>::new(device))
            .batch_size(2)
            .build(FeatureDataset::new(features, Split::Dev));

        let enc = EncoderSettings {
            vocab_size: 16, hidden_size: 8, num_hidden_layers: 1, num_attention_heads: 2,
            intermediate_size: 16, max_position_embeddings: 12, hidden_dropout_prob: 0.0,
        };
        let model_params = ModelParams { dropout_prob: 0.0, aux_vocab_size: 0, num_polarities: 0, num_tenses: 0 };
        let model = build_model::<TestBackend>(TaskType::Trigger, &enc, 12, &model_params, &device).unwrap();

        let settings = EvalSettings {
            max_seq_len: 12, start_threshold: 0.5, end_threshold: 0.5,
            polarity_labels: vec![], tense_labels: vec![],
        };
        let (metric, f1) = TriggerProcessor::new()
            .evaluate(&model, &loader, &callbacks, &settings)
            .unwrap();
        assert!(metric.starts_with("[MIRCO] precision: "));
        assert!((0.0..=1.0).contains(&f1));
    }
}
