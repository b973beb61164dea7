// ============================================================
// Layer 5 — Training Loop
// ============================================================
// Generic over any AutodiffBackend: the binary runs on
// Autodiff<Wgpu>, tests on Autodiff<NdArray>.
//
// Per batch:
//   1. clean forward/backward
//   2. optional adversarial pass on the token embeddings
//        fgm → one step of size ε along g/‖g‖
//        pgd → K steps of size α, projected to the ε-ball
//      adversarial gradients are accumulated onto the clean ones
//   3. AdamW step with global-norm clipping and a linear
//      warmup / linear decay learning rate
//
// Checkpoints land in <output_dir>/checkpoint-<step> every
// save_steps steps and at the end of every epoch.
//
// Reference: Burn Book §5, Loshchilov & Hutter (2019) AdamW,
//            Miyato et al. (2017) FGM, Madry et al. (2018) PGD

use anyhow::Result;
use burn::{
    data::{dataloader::DataLoaderBuilder, dataset::Dataset},
    grad_clipping::GradientClippingConfig,
    optim::{AdamWConfig, GradientsAccumulator, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use crate::application::options::Options;
use crate::data::{
    batcher::{ExtractionBatch, FeatureBatcher},
    dataset::FeatureDataset,
};
use crate::domain::task::AttackTrain;
use crate::infra::{checkpoint::CheckpointManager, metrics::LossLogger};
use crate::ml::model::ExtractionModel;

const ADV_EPSILON: f64   = 1.0;
const PGD_ALPHA:   f64   = 0.3;
const PGD_STEPS:   usize = 3;

/// Optimisation knobs taken from the run options
#[derive(Debug, Clone)]
pub struct TrainSettings {
    pub epochs:            usize,
    pub batch_size:        usize,
    pub lr:                f64,
    pub warmup_proportion: f64,
    pub max_grad_norm:     f64,
    pub weight_decay:      f64,
    pub attack:            AttackTrain,
    pub save_steps:        usize,
    pub log_steps:         usize,
    pub num_workers:       usize,
    pub seed:              u64,
}

impl From<&Options> for TrainSettings {
    fn from(opts: &Options) -> Self {
        Self {
            epochs:            opts.train_epochs,
            batch_size:        opts.train_batch_size,
            lr:                opts.lr,
            warmup_proportion: opts.warmup_proportion,
            max_grad_norm:     opts.max_grad_norm,
            weight_decay:      if opts.weight_decay { 0.01 } else { 0.0 },
            attack:            opts.attack_train,
            save_steps:        opts.save_steps,
            log_steps:         opts.log_steps,
            num_workers:       opts.num_workers,
            seed:              opts.seed,
        }
    }
}

/// Linear warmup to `base_lr`, then linear decay to zero at `total_steps`.
pub fn scheduled_lr(base_lr: f64, step: usize, warmup_steps: usize, total_steps: usize) -> f64 {
    if step < warmup_steps {
        return base_lr * step as f64 / warmup_steps as f64;
    }
    let remaining = total_steps.saturating_sub(step) as f64;
    let decay     = total_steps.saturating_sub(warmup_steps).max(1) as f64;
    base_lr * (remaining / decay).max(0.0)
}

// ─── Adversarial Passes ───────────────────────────────────────────────────────

fn l2_norm<B: Backend, const D: usize>(t: &Tensor<B, D>) -> f64 {
    let sq = t.clone() * t.clone();
    sq.sum().sqrt().into_scalar().elem::<f64>()
}

/// Scale `g` to length `step`; None when the gradient vanished
fn step_along<B: Backend>(g: Tensor<B, 3>, step: f64) -> Option<Tensor<B, 3>> {
    let norm = l2_norm(&g);
    (norm > 0.0 && norm.is_finite()).then(|| g.mul_scalar(step / norm))
}

fn project<B: Backend>(r: Tensor<B, 3>, epsilon: f64) -> Tensor<B, 3> {
    let norm = l2_norm(&r);
    if norm > epsilon { r.mul_scalar(epsilon / norm) } else { r }
}

/// Gradients of one batch, including the adversarial pass if enabled.
fn batch_gradients<B: AutodiffBackend>(
    model:  &ExtractionModel<B>,
    batch:  &ExtractionBatch<B>,
    attack: AttackTrain,
) -> (f64, GradientsParams) {
    if !attack.is_enabled() {
        let (loss, _) = model.forward_loss(batch, None);
        let loss_val  = loss.clone().into_scalar().elem::<f64>();
        return (loss_val, GradientsParams::from_grads(loss.backward(), model));
    }

    let device = batch.token_ids.device();
    let [batch_size, seq_len] = batch.token_ids.dims();
    let shape = [batch_size, seq_len, model.d_model()];

    // Clean pass through a zero perturbation leaf to expose ∂L/∂emb
    let delta = Tensor::<B, 3>::zeros(shape, &device).require_grad();
    let (loss, _) = model.forward_loss(batch, Some(delta.clone()));
    let loss_val  = loss.clone().into_scalar().elem::<f64>();
    let grads     = loss.backward();
    let emb_grad  = delta.grad(&grads);
    let clean     = GradientsParams::from_grads(grads, model);

    let Some(mut g) = emb_grad else {
        return (loss_val, clean);
    };

    let adversarial = match attack {
        AttackTrain::Fgm => {
            let Some(r) = step_along(g, ADV_EPSILON) else {
                return (loss_val, clean);
            };
            let (adv_loss, _) = model.forward_loss(batch, Some(Tensor::<B, 3>::from_inner(r)));
            GradientsParams::from_grads(adv_loss.backward(), model)
        }
        AttackTrain::Pgd => {
            let mut r = g.zeros_like();
            let mut last = None;
            for k in 0..PGD_STEPS {
                let Some(step) = step_along(g.clone(), PGD_ALPHA) else {
                    break;
                };
                r = project(r + step, ADV_EPSILON);

                let leaf = Tensor::<B, 3>::from_inner(r.clone()).require_grad();
                let (adv_loss, _) = model.forward_loss(batch, Some(leaf.clone()));
                let adv_grads = adv_loss.backward();

                if k + 1 < PGD_STEPS {
                    match leaf.grad(&adv_grads) {
                        Some(next) => g = next,
                        None => break,
                    }
                } else {
                    // only the final attack contributes parameter gradients
                    last = Some(GradientsParams::from_grads(adv_grads, model));
                }
            }
            match last {
                Some(adv) => adv,
                None => return (loss_val, clean),
            }
        }
        AttackTrain::None => unreachable!(),
    };

    let mut acc = GradientsAccumulator::new();
    acc.accumulate(model, clean);
    acc.accumulate(model, adversarial);
    (loss_val, acc.grads())
}

// ─── Training Loop ────────────────────────────────────────────────────────────

/// Train `model` on `dataset`, writing checkpoints through `ckpt`.
pub fn train<B: AutodiffBackend>(
    settings: &TrainSettings,
    mut model: ExtractionModel<B>,
    dataset:  FeatureDataset,
    ckpt:     &CheckpointManager,
    device:   &B::Device,
) -> Result<ExtractionModel<B>> {
    let num_examples = dataset.len();
    let batch_size   = settings.batch_size.max(1);
    let steps_per_epoch = num_examples.div_ceil(batch_size);
    let total_steps  = steps_per_epoch * settings.epochs;
    let warmup_steps = (total_steps as f64 * settings.warmup_proportion) as usize;

    tracing::info!("***** Running training *****");
    tracing::info!("  Num examples = {} ({:?})", num_examples, dataset.split());
    tracing::info!("  Num epochs = {}", settings.epochs);
    tracing::info!("  Total optimization steps = {}", total_steps);
    if settings.attack.is_enabled() {
        tracing::info!("  Adversarial training = {}", settings.attack.as_str());
    }

    let mut optim = AdamWConfig::new()
        .with_weight_decay(settings.weight_decay as f32)
        .with_grad_clipping(Some(GradientClippingConfig::Norm(settings.max_grad_norm as f32)))
        .init();

    let loader = DataLoaderBuilder::new(FeatureBatcher::<B>::new(device.clone()))
        .batch_size(batch_size)
        .shuffle(settings.seed)
        .num_workers(settings.num_workers.max(1))
        .build(dataset);

    let logger = LossLogger::new(ckpt.dir())?;
    let mut global_step = 0usize;
    let mut last_saved  = None;
    let mut window_loss = 0.0f64;
    let mut window_len  = 0usize;

    for epoch in 1..=settings.epochs {
        for batch in loader.iter() {
            let (loss, grads) = batch_gradients(&model, &batch, settings.attack);

            let lr = scheduled_lr(settings.lr, global_step, warmup_steps, total_steps);
            model = optim.step(lr, model, grads);
            global_step += 1;

            window_loss += loss;
            window_len  += 1;
            if settings.log_steps > 0 && global_step % settings.log_steps == 0 {
                let avg = window_loss / window_len as f64;
                tracing::info!("Step {}/{} | epoch {} | loss={:.4} | lr={:.2e}", global_step, total_steps, epoch, avg, lr);
                logger.log(global_step, epoch, avg, lr)?;
                window_loss = 0.0;
                window_len  = 0;
            }

            if settings.save_steps > 0 && global_step % settings.save_steps == 0 {
                ckpt.save_model(&model, global_step)?;
                last_saved = Some(global_step);
            }
        }

        if last_saved != Some(global_step) {
            ckpt.save_model(&model, global_step)?;
            last_saved = Some(global_step);
        }
    }

    tracing::info!("Training complete!");
    Ok(model)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use tempfile::TempDir;

    use crate::data::dataset::Split;
    use crate::data::feature::{Feature, FeatureLabels};
    use crate::domain::task::TaskType;
    use crate::ml::model::{build_model, EncoderSettings, ModelParams};

    type TestBackend = Autodiff<NdArray>;

    fn settings(attack: AttackTrain) -> TrainSettings {
        TrainSettings {
            epochs:            2,
            batch_size:        2,
            lr:                1e-3,
            warmup_proportion: 0.1,
            max_grad_norm:     1.0,
            weight_decay:      0.01,
            attack,
            save_steps:        2,
            log_steps:         1,
            num_workers:       1,
            seed:              123,
        }
    }

    fn tiny_model(device: &<TestBackend as Backend>::Device) -> ExtractionModel<TestBackend> {
        let enc = EncoderSettings {
            vocab_size:              16,
            hidden_size:             8,
            num_hidden_layers:       1,
            num_attention_heads:     2,
            intermediate_size:       16,
            max_position_embeddings: 8,
            hidden_dropout_prob:     0.0,
        };
        let params = ModelParams { dropout_prob: 0.0, aux_vocab_size: 0, num_polarities: 0, num_tenses: 0 };
        build_model(TaskType::Trigger, &enc, 6, &params, device).unwrap()
    }

    fn dataset(n: usize) -> FeatureDataset {
        let feature = Feature {
            token_ids:      vec![2, 5, 6, 7, 3, 0],
            attention_mask: vec![1, 1, 1, 1, 1, 0],
            aux_ids:        vec![0; 6],
            trigger_mask:   vec![0; 6],
            labels: FeatureLabels::Pointer {
                span_types: 1,
                start: vec![0, 0, 1, 0, 0, 0],
                end:   vec![0, 0, 0, 1, 0, 0],
            },
        };
        FeatureDataset::new(vec![feature; n], Split::Train)
    }

    #[test]
    fn test_schedule_warms_up_then_decays() {
        assert_eq!(scheduled_lr(1.0, 0, 10, 110), 0.0);
        assert_eq!(scheduled_lr(1.0, 5, 10, 110), 0.5);
        assert_eq!(scheduled_lr(1.0, 10, 10, 110), 1.0);
        assert_eq!(scheduled_lr(1.0, 60, 10, 110), 0.5);
        assert_eq!(scheduled_lr(1.0, 110, 10, 110), 0.0);
        // no warmup
        assert_eq!(scheduled_lr(2.0, 0, 0, 4), 2.0);
    }

    #[test]
    fn test_project_clips_to_epsilon_ball() {
        let device = Default::default();
        let r = Tensor::<NdArray, 1>::from_floats([3.0, 4.0], &device).reshape([1, 1, 2]);
        let p = project(r.clone(), 1.0);
        assert!((l2_norm(&p) - 1.0).abs() < 1e-5);
        let same = project(r, 10.0);
        assert!((l2_norm(&same) - 5.0).abs() < 1e-5);
    }

    #[test]
    fn test_train_writes_step_and_epoch_checkpoints() {
        let dir    = TempDir::new().unwrap();
        let device = Default::default();
        let ckpt   = CheckpointManager::new(dir.path());

        // 3 examples, batch 2 → 2 steps per epoch, 4 total
        train(&settings(AttackTrain::None), tiny_model(&device), dataset(3), &ckpt, &device).unwrap();

        let steps: Vec<usize> = ckpt.list_checkpoints().unwrap().into_iter().map(|(s, _)| s).collect();
        assert_eq!(steps, vec![2, 4]);
        assert!(dir.path().join("train_metrics.csv").exists());
    }

    #[test]
    fn test_adversarial_training_runs() {
        let device = Default::default();
        for attack in [AttackTrain::Fgm, AttackTrain::Pgd] {
            let dir  = TempDir::new().unwrap();
            let ckpt = CheckpointManager::new(dir.path());
            let mut s = settings(attack);
            s.epochs     = 1;
            s.save_steps = 0;

            train(&s, tiny_model(&device), dataset(2), &ckpt, &device).unwrap();
            assert_eq!(ckpt.list_checkpoints().unwrap().len(), 1);
        }
    }
}
