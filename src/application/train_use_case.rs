// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates one training run end to end:
//
//   Step 1: Pick the task pipeline from the task type (once)
//   Step 2: Load label vocabularies        (Layer 6 - infra)
//   Step 3: Read stack.json + aux sources  (Layer 4 - data)
//   Step 4: Read dev.json when evaluating  (Layer 4 - data)
//   Step 5: Convert to features / datasets (Layer 4 - data)
//   Step 6: Build the model                (Layer 5 - ml)
//   Step 7: Train, writing checkpoints     (Layer 5 - ml)
//   Step 8: Score every checkpoint on dev and append the
//           report naming the best step    (Layer 5/6)
//
// Reference: Burn Book §5 (Training)

use anyhow::{ensure, Context, Result};
use burn::{
    backend::{wgpu::WgpuDevice, Autodiff, Wgpu},
    data::dataloader::DataLoaderBuilder,
    module::AutodiffModule,
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use std::fs;

use crate::application::options::Options;
use crate::data::{
    batcher::FeatureBatcher,
    dataset::{FeatureDataset, Split},
    feature::{FeatureConverter, FeatureParams},
    processor::{AttributionProcessor, RoleProcessor, TriggerProcessor},
};
use crate::domain::task::TaskType;
use crate::domain::traits::Processor;
use crate::infra::{
    checkpoint::CheckpointManager,
    label_info::{id2label, LabelInfo},
    metrics::EvalReport,
    tokenizer_store::TokenizerStore,
};
use crate::ml::{
    evaluator::{EvalSettings, TaskEvaluator},
    model::{build_model, load_pretrained_encoder, EncoderSettings, ModelParams},
    trainer::{train, TrainSettings},
};

type TrainBackend = Autodiff<Wgpu>;

/// Everything a task needs from reading files to scoring checkpoints
pub trait TaskPipeline: FeatureConverter + TaskEvaluator {}

impl<T: FeatureConverter + TaskEvaluator> TaskPipeline for T {}

/// Dev examples paired with their callbacks
pub type DevInfo<P> = (Vec<<P as Processor>::Example>, Vec<<P as Processor>::Callback>);

// ─── TrainUseCase ─────────────────────────────────────────────────────────────

pub struct TrainUseCase {
    options: Options,
}

impl TrainUseCase {
    /// Create a use case for one validated set of options.
    pub fn new(options: Options) -> Self {
        Self { options }
    }

    /// Run on the default WGPU device
    pub fn execute(&self) -> Result<()> {
        let device = WgpuDevice::default();
        tracing::info!("Using WGPU device: {:?}", device);
        self.run::<TrainBackend>(&device)
    }

    /// Run on `device`: save the options, then train and evaluate the selected task.
    pub fn run<B: AutodiffBackend>(&self, device: &B::Device) -> Result<()> {
        let opts = &self.options;
        fs::create_dir_all(&opts.output_dir)
            .with_context(|| format!("Cannot create output dir '{}'", opts.output_dir.display()))?;
        CheckpointManager::new(&opts.output_dir).save_options(opts)?;

        tracing::info!("Task {} → '{}'", opts.task_type, opts.output_dir.display());
        match opts.task_type {
            TaskType::Trigger => training::<TriggerProcessor, B>(opts, &TriggerProcessor::new(), device),
            TaskType::Role1 | TaskType::Role2 => {
                training::<RoleProcessor, B>(opts, &RoleProcessor::new(opts.task_type), device)
            }
            TaskType::Attribution => {
                training::<AttributionProcessor, B>(opts, &AttributionProcessor::new(), device)
            }
        }
    }
}

// ─── Example Loading ──────────────────────────────────────────────────────────

/// stack.json followed by the task's auxiliary sources when
/// enhancement is on, in read order.
pub fn load_train_examples<P: Processor>(processor: &P, opts: &Options) -> Result<Vec<P::Example>> {
    let raw = processor.read_json(&opts.raw_data_dir.join("stack.json"))?;
    let mut examples = processor.get_train_examples(&raw);
    tracing::info!("Loaded {} train examples from stack.json", examples.len());

    if opts.enhance_data {
        for source in opts.task_type.augmentation_sources() {
            let path = source.resolve(&opts.raw_data_dir, &opts.aux_data_dir);
            let raw  = processor.read_json(&path)?;
            let extra = processor.get_train_examples(&raw);
            tracing::info!("Merged {} examples from '{}'", extra.len(), path.display());
            examples.extend(extra);
        }
    }

    Ok(examples)
}

/// Read dev.json into examples and their callbacks.
pub fn load_dev_info<P: Processor>(processor: &P, opts: &Options) -> Result<DevInfo<P>> {
    let raw = processor.read_json(&opts.raw_data_dir.join("dev.json"))?;
    let dev = processor.get_dev_examples(&raw);
    tracing::info!("Loaded {} dev examples", dev.0.len());
    Ok(dev)
}

fn training<P: TaskPipeline, B: AutodiffBackend>(
    opts:      &Options,
    processor: &P,
    device:    &B::Device,
) -> Result<()> {
    let info = LabelInfo::load(opts.task_type, &opts.mid_data_dir)?;
    let train_examples = load_train_examples(processor, opts)?;

    let dev_info = if opts.eval_model {
        Some(load_dev_info(processor, opts)?)
    } else {
        None
    };

    train_base::<P, B>(opts, processor, &info, train_examples, dev_info, device)
}

// ─── train_base ───────────────────────────────────────────────────────────────

/// Features → model → training → (optional) checkpoint evaluation.
pub fn train_base<P: TaskPipeline, B: AutodiffBackend>(
    opts:           &Options,
    processor:      &P,
    info:           &LabelInfo,
    train_examples: Vec<P::Example>,
    dev_info:       Option<DevInfo<P>>,
    device:         &B::Device,
) -> Result<()> {
    B::seed(opts.seed);

    let vocab  = TokenizerStore::new(&opts.bert_dir).load_vocab()?;
    let params = FeatureParams {
        max_seq_len:          opts.max_seq_len,
        use_distant_trigger:  opts.use_distant_trigger,
        use_trigger_distance: opts.use_trigger_distance,
        polarity2id:          info.polarity2id.clone(),
        tense2id:             info.tense2id.clone(),
    };

    let train_features = processor.convert_examples(&train_examples, &vocab, &params)?;
    let train_dataset  = FeatureDataset::new(train_features, Split::Train);

    let encoder = EncoderSettings::load(&opts.bert_dir)?;
    ensure!(
        (vocab.max_id() as usize) < encoder.vocab_size,
        "vocabulary ids reach {} but the encoder only embeds {} tokens",
        vocab.max_id(),
        encoder.vocab_size
    );
    let model_params = ModelParams {
        dropout_prob:   opts.dropout_prob,
        aux_vocab_size: if opts.uses_aux_input() { params.aux_vocab_size() } else { 0 },
        num_polarities: info.polarity2id.len(),
        num_tenses:     info.tense2id.len(),
    };
    let model = build_model::<B>(opts.task_type, &encoder, opts.max_seq_len, &model_params, device)?;
    let model = load_pretrained_encoder(model, &opts.bert_dir, device)?;

    let ckpt  = CheckpointManager::new(&opts.output_dir);
    let model = train(&TrainSettings::from(opts), model, train_dataset, &ckpt, device)?;

    let Some((dev_examples, callbacks)) = dev_info else {
        return Ok(());
    };

    // ── Checkpoint evaluation ─────────────────────────────────────────────────
    let dev_features = processor.convert_examples(&dev_examples, &vocab, &params)?;
    // single worker keeps batches in callback order
    let dev_loader = DataLoaderBuilder::new(FeatureBatcher::<B::InnerBackend>::new(device.clone()))
        .batch_size(opts.eval_batch_size.max(1))
        .build(FeatureDataset::new(dev_features, Split::Dev));

    let settings = EvalSettings {
        max_seq_len:     opts.max_seq_len,
        start_threshold: opts.start_threshold as f32,
        end_threshold:   opts.end_threshold as f32,
        polarity_labels: id2label(&info.polarity2id),
        tense_labels:    id2label(&info.tense2id),
    };

    let template = model.valid();
    let mut report = EvalReport::new();

    for (step, ckpt_dir) in ckpt.list_checkpoints()? {
        let model = ckpt.load_model(template.clone(), &ckpt_dir, device)?;
        let (metric_str, f1) = processor.evaluate(&model, &dev_loader, &callbacks, &settings)?;
        tracing::info!("In step {}: {}", step, metric_str);
        report.record(step, &metric_str, f1);
    }

    let (max_f1, max_f1_step) = report.best();
    let path = report.append_to(&opts.output_dir)?;
    tracing::info!("Max f1 is: {:?}, in step {} (report in '{}')", max_f1, max_f1_step, path.display());
    Ok(())
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::options::test_options;
    use burn::backend::NdArray;
    use std::path::Path;
    use tempfile::TempDir;

    fn sentence(text: &str) -> String {
        format!(
            r#"{{"sentence": "{text}公司收购了工厂",
                 "events": [{{"trigger": {{"text": "收购", "offset": 4}},
                              "arguments": [{{"role": "subject", "text": "公司", "offset": 2}},
                                            {{"role": "time",    "text": "{text}", "offset": 0}}],
                              "polarity": "肯定", "tense": "过去"}}]}}"#
        )
    }

    fn write_file(path: &Path, sentences: &[&str]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let body: Vec<String> = sentences.iter().map(|s| sentence(s)).collect();
        fs::write(path, format!("[{}]", body.join(","))).unwrap();
    }

    /// stack.json has 2 sentences, every auxiliary file has 1
    fn fixture(root: &Path) {
        write_file(&root.join("raw/stack.json"), &["今天", "昨天"]);
        write_file(&root.join("raw/dev.json"), &["明天"]);
        write_file(&root.join("raw/preliminary_stack.json"), &["前天"]);
        for name in ["trigger_first", "trigger_third_new", "role1_first", "role1_second"] {
            write_file(&root.join(format!("aux/{name}.json")), &["后天"]);
        }
        fs::create_dir_all(root.join("mid")).unwrap();
        fs::write(root.join("mid/polarity2id.json"), r#"{"肯定": 0, "否定": 1}"#).unwrap();
        fs::write(root.join("mid/tense2id.json"), r#"{"map": {"过去": 0, "将来": 1}}"#).unwrap();

        fs::create_dir_all(root.join("bert")).unwrap();
        let chars = "[PAD]\n[UNK]\n[CLS]\n[SEP]\n今\n天\n昨\n明\n前\n后\n公\n司\n收\n购\n了\n工\n厂\n";
        fs::write(root.join("bert/vocab.txt"), chars).unwrap();
        fs::write(
            root.join("bert/config.json"),
            r#"{"vocab_size": 24, "hidden_size": 8, "num_hidden_layers": 1,
                "num_attention_heads": 2, "intermediate_size": 16,
                "max_position_embeddings": 32, "hidden_dropout_prob": 0.0}"#,
        ).unwrap();
    }

    fn count(task: TaskType, root: &Path) -> usize {
        let mut opts = test_options(task, root);
        opts.enhance_data = true;
        match task {
            TaskType::Trigger     => load_train_examples(&TriggerProcessor::new(), &opts).unwrap().len(),
            TaskType::Attribution => load_train_examples(&AttributionProcessor::new(), &opts).unwrap().len(),
            _                     => load_train_examples(&RoleProcessor::new(task), &opts).unwrap().len(),
        }
    }

    #[test]
    fn test_augmented_example_counts() {
        let dir = TempDir::new().unwrap();
        fixture(dir.path());

        assert_eq!(count(TaskType::Trigger, dir.path()), 2 + 1 + 1);
        assert_eq!(count(TaskType::Role1, dir.path()), 2 + 1 + 1);
        assert_eq!(count(TaskType::Role2, dir.path()), 2 + 1);
        assert_eq!(count(TaskType::Attribution, dir.path()), 2);
    }

    #[test]
    fn test_examples_keep_read_order() {
        let dir = TempDir::new().unwrap();
        fixture(dir.path());
        let mut opts = test_options(TaskType::Role2, dir.path());
        opts.enhance_data = true;

        let examples = load_train_examples(&RoleProcessor::new(TaskType::Role2), &opts).unwrap();
        let heads: Vec<String> = examples.iter().map(|e| e.text.chars().take(2).collect()).collect();
        assert_eq!(heads, vec!["今天", "昨天", "前天"]);
    }

    #[test]
    fn test_missing_aux_file_fails() {
        let dir = TempDir::new().unwrap();
        fixture(dir.path());
        fs::remove_file(dir.path().join("aux/role1_second.json")).unwrap();

        let mut opts = test_options(TaskType::Role1, dir.path());
        assert!(load_train_examples(&RoleProcessor::new(TaskType::Role1), &opts).is_ok());
        opts.enhance_data = true;
        assert!(load_train_examples(&RoleProcessor::new(TaskType::Role1), &opts).is_err());
    }

    #[test]
    fn test_full_run_appends_report() {
        let dir = TempDir::new().unwrap();
        fixture(dir.path());
        let device = Default::default();

        for task in TaskType::ALL {
            let mut opts = test_options(task, dir.path());
            opts.eval_model  = true;
            opts.output_dir  = opts.run_dir(&dir.path().join("out"));

            TrainUseCase::new(opts.clone()).run::<Autodiff<NdArray>>(&device).unwrap();

            let report = fs::read_to_string(opts.output_dir.join("eval_metric.txt")).unwrap();
            assert!(report.starts_with("In step 1: "), "{task}: {report}");
            assert!(report.contains("Max f1 is: "));
            assert!(opts.output_dir.join("train_config.json").exists());
        }
    }

    fn eval_options(task: TaskType, root: &Path) -> Options {
        let mut opts = test_options(task, root);
        opts.eval_model = true;
        opts.output_dir = opts.run_dir(&root.join("out"));
        opts
    }

    #[test]
    fn test_corrupt_checkpoint_fails_without_report() {
        let dir = TempDir::new().unwrap();
        fixture(dir.path());
        let opts = eval_options(TaskType::Trigger, dir.path());

        let planted = opts.output_dir.join("checkpoint-9999");
        fs::create_dir_all(&planted).unwrap();
        fs::write(planted.join("model.mpk"), b"not a record").unwrap();

        let result = TrainUseCase::new(opts.clone()).run::<Autodiff<NdArray>>(&Default::default());
        assert!(result.is_err());
        assert!(!opts.output_dir.join("eval_metric.txt").exists());
    }

    #[test]
    fn test_missing_dev_file_fails_without_report() {
        let dir = TempDir::new().unwrap();
        fixture(dir.path());
        fs::remove_file(dir.path().join("raw/dev.json")).unwrap();
        let opts = eval_options(TaskType::Role1, dir.path());

        let result = TrainUseCase::new(opts.clone()).run::<Autodiff<NdArray>>(&Default::default());
        assert!(result.is_err());
        assert!(!opts.output_dir.join("eval_metric.txt").exists());
    }

    #[test]
    fn test_vocab_without_cls_is_an_error() {
        let dir = TempDir::new().unwrap();
        fixture(dir.path());
        let vocab = fs::read_to_string(dir.path().join("bert/vocab.txt")).unwrap();
        fs::write(dir.path().join("bert/vocab.txt"), vocab.replace("[CLS]\n", "")).unwrap();
        let opts = eval_options(TaskType::Trigger, dir.path());

        let err = TrainUseCase::new(opts).run::<Autodiff<NdArray>>(&Default::default()).unwrap_err();
        assert!(format!("{err:#}").contains("[CLS]"));
    }

    #[test]
    fn test_vocab_ids_beyond_encoder_are_an_error() {
        let dir = TempDir::new().unwrap();
        fixture(dir.path());
        fs::write(
            dir.path().join("bert/config.json"),
            r#"{"vocab_size": 8, "hidden_size": 8, "num_hidden_layers": 1,
                "num_attention_heads": 2, "intermediate_size": 16,
                "max_position_embeddings": 32, "hidden_dropout_prob": 0.0}"#,
        ).unwrap();
        let opts = eval_options(TaskType::Trigger, dir.path());

        let err = TrainUseCase::new(opts).run::<Autodiff<NdArray>>(&Default::default()).unwrap_err();
        assert!(err.to_string().contains("only embeds 8"));
    }
}
