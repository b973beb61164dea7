// ============================================================
// Layer 5 — Shared Encoder and Task Heads
// ============================================================
// One transformer encoder is shared by all tasks; each run
// attaches the head its task needs:
//
//   trigger     → span_head, 2 logits per token (start, end)
//   role1       → span_head, 4 logits per token (start/end × subject/object)
//   role2       → tag_head, 5 BIO logits per token
//   attribution → polarity_head + tense_head over [CLS] ‖ mean(trigger)
//
// Role and attribution runs add a learned trigger-mark
// embedding; runs with distant triggers or trigger distance add
// an auxiliary embedding. Both are summed into the input.
//
// Encoder shape comes from a BERT-style config.json in the
// encoder directory; encoder.mpk, when present, provides
// pretrained encoder weights.
//
// Reference: Vaswani et al. (2017), Devlin et al. (2019)

use anyhow::{ensure, Context, Result};
use burn::{
    nn::{
        attention::{MhaInput, MultiHeadAttention, MultiHeadAttentionConfig},
        loss::CrossEntropyLossConfig,
        Dropout, DropoutConfig,
        Embedding, EmbeddingConfig,
        LayerNorm, LayerNormConfig,
        Linear, LinearConfig,
    },
    prelude::*,
    record::{CompactRecorder, Recorder},
    tensor::activation::{gelu, log_softmax},
};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::data::batcher::{BatchTargets, ExtractionBatch};
use crate::data::feature::NUM_TAGS;
use crate::domain::task::TaskType;

// ─── Encoder Settings ─────────────────────────────────────────────────────────

fn default_dropout() -> f64 {
    0.1
}

/// The subset of a BERT config.json the encoder needs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderSettings {
    pub vocab_size:              usize,
    pub hidden_size:             usize,
    pub num_hidden_layers:       usize,
    pub num_attention_heads:     usize,
    pub intermediate_size:       usize,
    pub max_position_embeddings: usize,
    #[serde(default = "default_dropout")]
    pub hidden_dropout_prob:     f64,
}

impl EncoderSettings {
    /// Read `config.json` from the encoder directory.
    pub fn load(bert_dir: &Path) -> Result<Self> {
        let path = bert_dir.join("config.json");
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Cannot read encoder config '{}'", path.display()))?;
        let settings: Self = serde_json::from_str(&json)
            .with_context(|| format!("Malformed encoder config '{}'", path.display()))?;

        ensure!(
            settings.num_attention_heads > 0
                && settings.hidden_size % settings.num_attention_heads == 0,
            "hidden_size {} is not divisible by num_attention_heads {}",
            settings.hidden_size,
            settings.num_attention_heads
        );
        Ok(settings)
    }
}

/// Task-dependent knobs for the model builder
#[derive(Debug, Clone)]
pub struct ModelParams {
    pub dropout_prob:   f64,
    /// 0 disables the auxiliary embedding
    pub aux_vocab_size: usize,
    pub num_polarities: usize,
    pub num_tenses:     usize,
}

// ─── Config ───────────────────────────────────────────────────────────────────

#[derive(Config, Debug)]
pub struct ExtractionModelConfig {
    pub task:           TaskType,
    pub vocab_size:     usize,
    pub max_positions:  usize,
    pub d_model:        usize,
    pub num_heads:      usize,
    pub num_layers:     usize,
    pub d_ff:           usize,
    pub dropout:        f64,
    pub aux_vocab_size: usize,
    pub num_polarities: usize,
    pub num_tenses:     usize,
}

impl ExtractionModelConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ExtractionModel<B> {
        let d = self.d_model;
        let linear = |d_in: usize, d_out: usize| LinearConfig::new(d_in, d_out).init(device);

        let span_types = match self.task {
            TaskType::Trigger => 1,
            TaskType::Role1   => 2,
            _                 => 0,
        };

        let encoder = Encoder {
            token_embedding:    EmbeddingConfig::new(self.vocab_size, d).init(device),
            position_embedding: EmbeddingConfig::new(self.max_positions, d).init(device),
            layers: (0..self.num_layers).map(|_| self.build_encoder_block(device)).collect(),
            embedding_norm:     LayerNormConfig::new(d).init(device),
            dropout:            DropoutConfig::new(self.dropout).init(),
        };

        let conditioned = self.task != TaskType::Trigger;
        let attribution = self.task == TaskType::Attribution;

        ExtractionModel {
            encoder,
            aux_embedding: (self.aux_vocab_size > 0)
                .then(|| EmbeddingConfig::new(self.aux_vocab_size, d).init(device)),
            trigger_embedding: conditioned.then(|| EmbeddingConfig::new(2, d).init(device)),
            span_head:     (span_types > 0).then(|| linear(d, 2 * span_types)),
            tag_head:      (self.task == TaskType::Role2).then(|| linear(d, NUM_TAGS)),
            polarity_head: attribution.then(|| linear(2 * d, self.num_polarities)),
            tense_head:    attribution.then(|| linear(2 * d, self.num_tenses)),
            dropout:       DropoutConfig::new(self.dropout).init(),
            span_types,
        }
    }

    fn build_encoder_block<B: Backend>(&self, device: &B::Device) -> EncoderBlock<B> {
        let self_attn   = MultiHeadAttentionConfig::new(self.d_model, self.num_heads)
            .with_dropout(self.dropout)
            .init(device);
        let ffn_linear1 = LinearConfig::new(self.d_model, self.d_ff).init(device);
        let ffn_linear2 = LinearConfig::new(self.d_ff, self.d_model).init(device);
        let norm1   = LayerNormConfig::new(self.d_model).init(device);
        let norm2   = LayerNormConfig::new(self.d_model).init(device);
        let dropout = DropoutConfig::new(self.dropout).init();
        EncoderBlock { self_attn, ffn_linear1, ffn_linear2, norm1, norm2, dropout }
    }
}

/// Instantiate the task head on top of a fresh encoder shaped by `settings`.
pub fn build_model<B: Backend>(
    task:        TaskType,
    settings:    &EncoderSettings,
    max_seq_len: usize,
    params:      &ModelParams,
    device:      &B::Device,
) -> Result<ExtractionModel<B>> {
    ensure!(
        max_seq_len <= settings.max_position_embeddings,
        "max_seq_len {} exceeds the encoder's {} position embeddings",
        max_seq_len,
        settings.max_position_embeddings
    );

    let config = ExtractionModelConfig::new(
        task,
        settings.vocab_size,
        settings.max_position_embeddings,
        settings.hidden_size,
        settings.num_attention_heads,
        settings.num_hidden_layers,
        settings.intermediate_size,
        params.dropout_prob,
        params.aux_vocab_size,
        params.num_polarities,
        params.num_tenses,
    );
    tracing::info!(
        "Model ready: task={}, {} layers, d_model={}",
        task,
        settings.num_hidden_layers,
        settings.hidden_size
    );
    Ok(config.init(device))
}

/// Load `<bert_dir>/encoder.mpk` into the shared encoder if it exists.
pub fn load_pretrained_encoder<B: Backend>(
    mut model: ExtractionModel<B>,
    bert_dir:  &Path,
    device:    &B::Device,
) -> Result<ExtractionModel<B>> {
    let path = bert_dir.join("encoder");
    if !path.with_extension("mpk").exists() {
        tracing::info!("No pretrained encoder weights in '{}', training from scratch", bert_dir.display());
        return Ok(model);
    }

    let record = CompactRecorder::new()
        .load(path.clone(), device)
        .with_context(|| format!("Cannot load encoder weights '{}'", path.display()))?;
    model.encoder = model.encoder.load_record(record);
    tracing::info!("Loaded pretrained encoder from '{}'", path.display());
    Ok(model)
}

// ─── Encoder ──────────────────────────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct EncoderBlock<B: Backend> {
    pub self_attn:   MultiHeadAttention<B>,
    pub ffn_linear1: Linear<B>,
    pub ffn_linear2: Linear<B>,
    pub norm1:       LayerNorm<B>,
    pub norm2:       LayerNorm<B>,
    pub dropout:     Dropout,
}

impl<B: Backend> EncoderBlock<B> {
    /// `pad_mask` is true on padding positions
    pub fn forward(&self, x: Tensor<B, 3>, pad_mask: Tensor<B, 2, Bool>) -> Tensor<B, 3> {
        let attn_output = self
            .self_attn
            .forward(MhaInput::self_attn(x.clone()).mask_pad(pad_mask))
            .context;
        let x = self.norm1.forward(x + self.dropout.forward(attn_output));
        let ffn_out = self.ffn_linear2.forward(gelu(self.ffn_linear1.forward(x.clone())));
        self.norm2.forward(x + self.dropout.forward(ffn_out))
    }
}

#[derive(Module, Debug)]
pub struct Encoder<B: Backend> {
    pub token_embedding:    Embedding<B>,
    pub position_embedding: Embedding<B>,
    pub layers:             Vec<EncoderBlock<B>>,
    pub embedding_norm:     LayerNorm<B>,
    pub dropout:            Dropout,
}

impl<B: Backend> Encoder<B> {
    /// [batch, seq_len] → [batch, seq_len, d_model]
    pub fn embed_tokens(&self, token_ids: Tensor<B, 2, Int>) -> Tensor<B, 3> {
        self.token_embedding.forward(token_ids)
    }

    /// Add positions, normalise, then run every block
    pub fn encode(&self, embeddings: Tensor<B, 3>, attention_mask: Tensor<B, 2, Int>) -> Tensor<B, 3> {
        let [batch_size, seq_len, _] = embeddings.dims();

        let positions = Tensor::<B, 1, Int>::arange(0..seq_len as i64, &embeddings.device())
            .unsqueeze::<2>()
            .expand([batch_size, seq_len]);
        let pos_emb = self.position_embedding.forward(positions);

        let mut x = self.dropout.forward(self.embedding_norm.forward(embeddings + pos_emb));
        let pad_mask = attention_mask.equal_elem(0);
        for layer in &self.layers {
            x = layer.forward(x, pad_mask.clone());
        }
        x
    }
}

// ─── Extraction Model ─────────────────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct ExtractionModel<B: Backend> {
    pub encoder:           Encoder<B>,
    pub aux_embedding:     Option<Embedding<B>>,
    pub trigger_embedding: Option<Embedding<B>>,
    pub span_head:         Option<Linear<B>>,
    pub tag_head:          Option<Linear<B>>,
    pub polarity_head:     Option<Linear<B>>,
    pub tense_head:        Option<Linear<B>>,
    pub dropout:           Dropout,
    pub span_types:        usize,
}

/// Raw head outputs, shaped by task
#[derive(Debug, Clone)]
pub enum ModelOutput<B: Backend> {
    /// [batch, seq_len, span_types] each
    Pointer {
        start_logits: Tensor<B, 3>,
        end_logits:   Tensor<B, 3>,
    },
    /// [batch, seq_len, NUM_TAGS]
    Tags(Tensor<B, 3>),
    /// [batch, num_polarities], [batch, num_tenses]
    Classes {
        polarity_logits: Tensor<B, 2>,
        tense_logits:    Tensor<B, 2>,
    },
}

impl<B: Backend> ExtractionModel<B> {
    /// Hidden size of the encoder.
    pub fn d_model(&self) -> usize {
        self.encoder.token_embedding.weight.val().dims()[1]
    }

    /// Run the encoder and the task head on a batch.
    pub fn forward(&self, batch: &ExtractionBatch<B>) -> ModelOutput<B> {
        self.forward_perturbed(batch, None)
    }

    /// Forward pass with an optional additive perturbation of the
    /// token embeddings, shaped [batch, seq_len, d_model].
    pub fn forward_perturbed(
        &self,
        batch: &ExtractionBatch<B>,
        delta: Option<Tensor<B, 3>>,
    ) -> ModelOutput<B> {
        let mut emb = self.encoder.embed_tokens(batch.token_ids.clone());
        if let Some(delta) = delta {
            emb = emb + delta;
        }
        if let Some(aux) = &self.aux_embedding {
            emb = emb + aux.forward(batch.aux_ids.clone());
        }
        if let Some(trig) = &self.trigger_embedding {
            emb = emb + trig.forward(batch.trigger_mask.clone());
        }

        let x = self.encoder.encode(emb, batch.attention_mask.clone());
        let x = self.dropout.forward(x);
        let [batch_size, seq_len, d_model] = x.dims();

        if let Some(head) = &self.span_head {
            let t = self.span_types;
            let logits = head.forward(x); // [batch, seq_len, 2T]
            let start_logits = logits.clone().slice([0..batch_size, 0..seq_len, 0..t]);
            let end_logits   = logits.slice([0..batch_size, 0..seq_len, t..2 * t]);
            return ModelOutput::Pointer { start_logits, end_logits };
        }

        if let Some(head) = &self.tag_head {
            return ModelOutput::Tags(head.forward(x));
        }

        // Attribution: [CLS] ‖ mean of trigger tokens
        let cls = x
            .clone()
            .slice([0..batch_size, 0..1, 0..d_model])
            .reshape([batch_size, d_model]);
        let mask  = batch.trigger_mask.clone().float().unsqueeze_dim::<3>(2); // [batch, seq_len, 1]
        let count = mask.clone().sum_dim(1).reshape([batch_size, 1]).clamp_min(1.0);
        let trig  = (x * mask).sum_dim(1).reshape([batch_size, d_model]) / count;
        let pooled = Tensor::cat(vec![cls, trig], 1);

        let (Some(polarity), Some(tense)) = (&self.polarity_head, &self.tense_head) else {
            unreachable!("model built without any task head");
        };
        ModelOutput::Classes {
            polarity_logits: polarity.forward(pooled.clone()),
            tense_logits:    tense.forward(pooled),
        }
    }

    /// Loss of one batch; the perturbation is forwarded unchanged.
    pub fn forward_loss(
        &self,
        batch: &ExtractionBatch<B>,
        delta: Option<Tensor<B, 3>>,
    ) -> (Tensor<B, 1>, ModelOutput<B>) {
        let output = self.forward_perturbed(batch, delta);
        let mask   = batch.attention_mask.clone().float(); // [batch, seq_len]

        let loss = match (&output, &batch.targets) {
            (
                ModelOutput::Pointer { start_logits, end_logits },
                BatchTargets::Pointer { start, end },
            ) => {
                let s = masked_bce(start_logits.clone(), start.clone(), mask.clone());
                let e = masked_bce(end_logits.clone(), end.clone(), mask);
                (s + e) / 2.0
            }
            (ModelOutput::Tags(logits), BatchTargets::Tags(tags)) => {
                let [batch_size, seq_len, _] = logits.dims();
                let nll = log_softmax(logits.clone(), 2)
                    .gather(2, tags.clone().unsqueeze_dim::<3>(2))
                    .reshape([batch_size, seq_len])
                    .neg();
                (nll * mask.clone()).sum() / mask.sum().clamp_min(1.0)
            }
            (
                ModelOutput::Classes { polarity_logits, tense_logits },
                BatchTargets::Classes { polarity, tense },
            ) => {
                let ce = CrossEntropyLossConfig::new().init(&polarity_logits.device());
                let p  = ce.forward(polarity_logits.clone(), polarity.clone());
                let t  = ce.forward(tense_logits.clone(), tense.clone());
                (p + t) / 2.0
            }
            _ => panic!("batch targets do not match the model head"),
        };

        (loss, output)
    }
}

/// Numerically stable binary cross-entropy on logits, averaged
/// over non-padding positions and span types.
fn masked_bce<B: Backend>(
    logits:  Tensor<B, 3>,
    targets: Tensor<B, 3, Int>,
    mask:    Tensor<B, 2>,
) -> Tensor<B, 1> {
    let [_, _, span_types] = logits.dims();
    let y = targets.float();

    // max(x, 0) - x*y + log(1 + exp(-|x|))
    let loss = logits.clone().clamp_min(0.0) - logits.clone() * y
        + logits.abs().neg().exp().log1p();

    let mask = mask.unsqueeze_dim::<3>(2);
    let denom = mask.clone().sum().mul_scalar(span_types as f64).clamp_min(1.0);
    (loss * mask).sum() / denom
}
