//! Training orchestrator: random-split or k-fold training of the U-Net.
//!
//! Every split trains a fresh network with its own optimizer, checkpoints
//! on strict validation-F2 improvement, then reloads the best checkpoint
//! and evaluates it on fresh training batches and the validation batch.

use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use burn::module::AutodiffModule;
use burn::optim::momentum::MomentumConfig;
use burn::optim::{AdamConfig, GradientsParams, Optimizer, SgdConfig};
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::backend::AutodiffBackend;
use calcium_data::DatasetReader;
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::TrainError;
use crate::model::bridge::tensor_to_f64;
use crate::model::{KernelInit, UNet1d, UNet1dConfig};
use crate::registry::{Registry, TRAINING_LOSS, TRAINING_METRICS};
use crate::training::config::{FitConfig, OptimizerKind, ValidationStrategy};
use crate::training::data::WindowGenerator;
use crate::training::hooks::{builtin_hooks, EpochContext, PostEpochHook, RunPaths};
use crate::training::loss::weighted_binary_cross_entropy;
use crate::training::metrics::{summarize, MetricSummary, MetricsHistory, SpikeMetrics};
use crate::training::splits::{cross_validation_splits, fold_partition, random_split, Split};

/// Metadata saved next to each checkpoint (`<stem>.json`).
///
/// Holds everything needed to rebuild a compatible network and the names of
/// the custom metrics and loss it was trained with.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CheckpointMeta {
    pub epoch: usize,
    pub val_f2: f64,
    pub window_len: usize,
    pub error_margin: usize,
    pub nb_filters_base: usize,
    pub dropout: f64,
    pub kernel_init: KernelInit,
    pub pos_weight: f64,
    pub metrics: Vec<String>,
    pub loss: String,
}

impl CheckpointMeta {
    fn new(config: &FitConfig, epoch: usize, val_f2: f64) -> Self {
        Self {
            epoch,
            val_f2,
            window_len: config.window_len,
            error_margin: config.error_margin,
            nb_filters_base: config.nb_filters_base,
            dropout: config.dropout,
            kernel_init: config.kernel_init,
            pos_weight: config.pos_weight,
            metrics: TRAINING_METRICS.iter().map(|s| s.to_string()).collect(),
            loss: TRAINING_LOSS.to_string(),
        }
    }

    /// Path of the metadata sidecar for a checkpoint.
    pub fn sidecar(checkpoint: &Path) -> PathBuf {
        checkpoint.with_extension("json")
    }

    pub fn load(checkpoint: &Path) -> anyhow::Result<Self> {
        let path = Self::sidecar(checkpoint);
        let file = std::fs::File::open(&path)
            .map_err(|e| anyhow::anyhow!("Failed to open {}: {e}", path.display()))?;
        serde_json::from_reader(file)
            .map_err(|e| anyhow::anyhow!("Failed to parse {}: {e}", path.display()))
    }

    fn save(&self, checkpoint: &Path) -> anyhow::Result<()> {
        serde_json::to_writer_pretty(std::fs::File::create(Self::sidecar(checkpoint))?, self)?;
        Ok(())
    }

    /// Network configuration for an arbitrary input window.
    pub fn unet_config(&self, window_len: usize) -> UNet1dConfig {
        UNet1dConfig::new(window_len)
            .with_nb_filters_base(self.nb_filters_base)
            .with_kernel_init(self.kernel_init)
            .with_dropout(self.dropout)
            .with_margin(self.error_margin)
    }
}

/// Load a checkpoint into a network built for `window_len` frames.
///
/// Every metric and loss name in the metadata must resolve in `registry`.
/// Weights that do not fit the rebuilt network are an error.
pub fn load_checkpoint<B: Backend>(
    path: &Path,
    window_len: usize,
    registry: &Registry<B>,
    device: &B::Device,
) -> anyhow::Result<(UNet1d<B>, CheckpointMeta)> {
    let meta = CheckpointMeta::load(path)?;
    registry.resolve_all(meta.metrics.iter().map(String::as_str), &meta.loss)?;
    let fresh = meta.unet_config(window_len).init::<B>(device);
    let expected = fresh.num_params();
    let model = fresh
        .load_file(
            path.to_path_buf(),
            &NamedMpkFileRecorder::<FullPrecisionSettings>::new(),
            device,
        )
        .map_err(|e| anyhow::anyhow!("Failed to load checkpoint from {}: {e}", path.display()))?;
    let found = model.num_params();
    anyhow::ensure!(
        found == expected,
        "checkpoint {} holds {found} parameters but the rebuilt network has {expected}",
        path.display()
    );
    Ok((model, meta))
}

/// Result of training on one split.
#[derive(Debug, Clone, Serialize)]
pub struct SplitReport {
    /// Best model evaluated on fresh training batches.
    pub train: SpikeMetrics,
    /// Best model evaluated on the validation batch.
    pub val: SpikeMetrics,
    pub best_model_path: PathBuf,
    pub history: MetricsHistory,
}

#[derive(Debug, Clone, Serialize)]
pub struct CrossValidationReport {
    pub folds: Vec<SplitReport>,
    pub summary: Vec<MetricSummary>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum FitOutcome {
    RandomSplit(SplitReport),
    CrossValidation(CrossValidationReport),
}

impl FitOutcome {
    /// The retained model of a random-split run. Cross-validation has no
    /// single canonical model.
    pub fn best_model_path(&self) -> Option<&Path> {
        match self {
            FitOutcome::RandomSplit(report) => Some(&report.best_model_path),
            FitOutcome::CrossValidation(_) => None,
        }
    }
}

/// Steps per epoch: one window from every training trace.
pub fn steps_per_epoch(train_size: usize, batch_size: usize) -> usize {
    train_size.div_ceil(batch_size)
}

/// Load and concatenate normalized traces and raw labels from every dataset.
pub fn load_training_data(paths: &[PathBuf]) -> anyhow::Result<(Vec<Vec<f32>>, Vec<Vec<u8>>)> {
    let mut traces = Vec::new();
    let mut spikes = Vec::new();
    for path in paths {
        let ds = DatasetReader::read(path)?;
        tracing::info!(
            name = %ds.attrs.name,
            rois = ds.len(),
            frames = ds.frames(),
            "Loaded dataset"
        );
        traces.extend(ds.traces);
        spikes.extend(ds.spikes);
    }
    if traces.len() != spikes.len() {
        return Err(TrainError::LengthMismatch {
            traces: traces.len(),
            labels: spikes.len(),
        }
        .into());
    }
    Ok((traces, spikes))
}

/// Train U-Nets on the given datasets.
///
/// `hooks` run after the built-in hooks at the end of every epoch.
pub fn fit<B: AutodiffBackend>(
    config: &FitConfig,
    dataset_paths: &[PathBuf],
    device: &B::Device,
    hooks: &mut [PostEpochHook<B::InnerBackend>],
) -> anyhow::Result<FitOutcome> {
    config.validate()?;
    anyhow::ensure!(!dataset_paths.is_empty(), "no dataset paths given");

    let (traces, spikes) = load_training_data(dataset_paths)?;
    std::fs::create_dir_all(&config.checkpoint_dir)?;

    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let stamp = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();

    tracing::info!(
        rois = traces.len(),
        validation = %config.validation,
        optimizer = %config.optimizer,
        lr = config.learning_rate,
        window = config.window_len,
        margin = config.error_margin,
        "Starting fit"
    );

    let session: Session<'_, B> = Session {
        config,
        traces: &traces,
        spikes: &spikes,
        stamp,
        device,
    };
    match config.optimizer {
        OptimizerKind::Adam => session.run(&mut rng, hooks, || {
            AdamConfig::new().init::<B, UNet1d<B>>()
        }),
        OptimizerKind::Sgd => session.run(&mut rng, hooks, || {
            SgdConfig::new()
                .with_momentum(Some(MomentumConfig::new().with_momentum(config.momentum)))
                .init::<B, UNet1d<B>>()
        }),
    }
}

/// Shared inputs of every split in one `fit` call.
struct Session<'a, B: AutodiffBackend> {
    config: &'a FitConfig,
    traces: &'a [Vec<f32>],
    spikes: &'a [Vec<u8>],
    stamp: u64,
    device: &'a B::Device,
}

impl<B: AutodiffBackend> Session<'_, B> {
    fn run<O, F>(
        &self,
        rng: &mut StdRng,
        hooks: &mut [PostEpochHook<B::InnerBackend>],
        make_optimizer: F,
    ) -> anyhow::Result<FitOutcome>
    where
        O: Optimizer<UNet1d<B>, B>,
        F: Fn() -> O,
    {
        let config = self.config;
        let n = self.traces.len();
        match config.validation {
            ValidationStrategy::RandomSplit => {
                let split = random_split(n, config.prop_train, config.prop_val, rng)?;
                let run = RunPaths::new(&config.checkpoint_dir, self.stamp.to_string());
                let report = self.fit_split(&split, &run, make_optimizer(), rng, hooks)?;
                log_comparison(&report.train, &report.val);
                tracing::info!(path = %report.best_model_path.display(), "Best model path");
                Ok(FitOutcome::RandomSplit(report))
            }
            ValidationStrategy::CrossValidate => {
                let folds = fold_partition(n, config.nb_folds, rng)?;
                let splits = cross_validation_splits(&folds)?;
                let mut reports = Vec::with_capacity(splits.len());
                for (k, split) in splits.iter().enumerate() {
                    tracing::info!(fold = k, train = split.train.len(), val = split.val.len(), "Cross validation fold");
                    let run = RunPaths::new(&config.checkpoint_dir, format!("{}_fold{k}", self.stamp));
                    let report = self.fit_split(split, &run, make_optimizer(), rng, hooks)?;
                    log_comparison(&report.train, &report.val);
                    reports.push(report);
                }

                let train: Vec<SpikeMetrics> = reports.iter().map(|r| r.train).collect();
                let val: Vec<SpikeMetrics> = reports.iter().map(|r| r.val).collect();
                let summary = summarize(&train, &val);
                tracing::info!("Cross validation summary");
                for s in &summary {
                    tracing::info!(
                        "{:<20} trn={:<9.4} ({:.4}) val={:<9.4} ({:.4})",
                        s.name,
                        s.train_mean,
                        s.train_std,
                        s.val_mean,
                        s.val_std
                    );
                }
                Ok(FitOutcome::CrossValidation(CrossValidationReport {
                    folds: reports,
                    summary,
                }))
            }
        }
    }

    fn fit_split<O: Optimizer<UNet1d<B>, B>>(
        &self,
        split: &Split,
        run: &RunPaths,
        mut optimizer: O,
        rng: &mut StdRng,
        hooks: &mut [PostEpochHook<B::InnerBackend>],
    ) -> anyhow::Result<SplitReport> {
        let config = self.config;
        let device = self.device;
        let pick = |idxs: &[usize]| -> (Vec<Vec<f32>>, Vec<Vec<u8>>) {
            (
                idxs.iter().map(|&i| self.traces[i].clone()).collect(),
                idxs.iter().map(|&i| self.spikes[i].clone()).collect(),
            )
        };
        let (tr_trn, sp_trn) = pick(&split.train);
        let (tr_val, sp_val) = pick(&split.val);
        let steps = steps_per_epoch(tr_trn.len(), config.batch_size);
        let val_size = 2 * tr_val.len();

        let mut gen_trn = WindowGenerator::new(
            tr_trn,
            sp_trn,
            config.window_len,
            config.batch_size,
            config.error_margin,
            StdRng::seed_from_u64(rng.gen()),
        )?;
        let mut gen_val = WindowGenerator::new(
            tr_val,
            sp_val,
            config.window_len,
            val_size,
            config.error_margin,
            StdRng::seed_from_u64(rng.gen()),
        )?;
        let val_batch = gen_val.next_batch();
        let train_sample = gen_trn.next_batch();
        if val_batch.labels.iter().all(|row| row.iter().all(|&v| v == 0)) {
            tracing::warn!(run = %run.run_id, "Validation batch contains no spikes; F2 will stay at 0");
        }
        let (x_val, y_val) = val_batch.to_tensors::<B::InnerBackend>(device)?;

        let registry = Registry::<B::InnerBackend>::standard();
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        let mut model: UNet1d<B> = config.unet_config().init(device);
        let mut builtins = builtin_hooks::<B::InnerBackend>();
        let mut history = MetricsHistory::new();
        let mut best: Option<(f64, PathBuf)> = None;
        let split_start = Instant::now();

        tracing::info!(
            run = %run.run_id,
            train = split.train.len(),
            val = split.val.len(),
            steps_per_epoch = steps,
            val_windows = val_size,
            "Training split"
        );

        for epoch in 1..=config.epochs {
            let pb = ProgressBar::new(steps as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("=> "),
            );
            pb.set_message(format!("epoch {epoch}/{}", config.epochs));

            let mut step_metrics = Vec::with_capacity(steps);
            for batch in gen_trn.by_ref().take(steps) {
                let (x, y) = batch.to_tensors::<B>(device)?;
                let yp = model.forward(x);
                let loss = weighted_binary_cross_entropy(y.clone(), yp.clone(), config.pos_weight);
                let loss_val = tensor_to_f64(loss.clone().inner());
                step_metrics.push(SpikeMetrics::compute(&registry, y.inner(), yp.inner(), loss_val)?);

                let grads = GradientsParams::from_grads(loss.backward(), &model);
                model = optimizer.step(config.learning_rate, model, grads);
                pb.inc(1);
            }
            pb.finish_and_clear();

            let train = SpikeMetrics::mean(&step_metrics).unwrap_or_default();
            let eval_model = model.valid();
            let val = evaluate(&eval_model, &registry, x_val.clone(), y_val.clone(), config.pos_weight)?;

            tracing::info!(
                run = %run.run_id,
                epoch,
                "trn: {} | val: {}",
                train.display(),
                val.display()
            );

            let improved = best.as_ref().map_or(true, |(f2, _)| val.f2 > *f2);
            if improved {
                let path = run.checkpoint(val.f2, epoch);
                model
                    .clone()
                    .save_file(path.clone(), &recorder)
                    .map_err(|e| anyhow::anyhow!("Failed to save model at epoch {epoch}: {e}"))?;
                CheckpointMeta::new(config, epoch, val.f2).save(&path)?;
                tracing::info!(epoch, val_f2 = val.f2, path = %path.display(), "val_F2 improved, checkpoint saved");
                best = Some((val.f2, path));
            }

            history.push(epoch, train, val);

            let ctx = EpochContext {
                epoch,
                train: &train,
                val: &val,
                run,
                model: &eval_model,
                train_sample: &train_sample,
                val_batch: &val_batch,
                sample_count: config.sample_count,
                device,
            };
            for hook in builtins.iter_mut().chain(hooks.iter_mut()) {
                hook(&ctx)?;
            }
        }

        let (_, best_model_path) = best.ok_or(TrainError::NoCheckpoint)?;
        let (best_model, meta) =
            load_checkpoint::<B::InnerBackend>(&best_model_path, config.window_len, &registry, device)?;

        let mut trn = Vec::with_capacity(steps);
        for batch in gen_trn.by_ref().take(steps) {
            let (x, y) = batch.to_tensors::<B::InnerBackend>(device)?;
            trn.push(evaluate(&best_model, &registry, x, y, config.pos_weight)?);
        }
        let train = SpikeMetrics::mean(&trn).unwrap_or_default();
        let val = evaluate(&best_model, &registry, x_val, y_val, config.pos_weight)?;

        tracing::info!(
            run = %run.run_id,
            best_epoch = meta.epoch,
            elapsed_secs = format!("{:.1}", split_start.elapsed().as_secs_f64()),
            "Split finished"
        );

        Ok(SplitReport {
            train,
            val,
            best_model_path,
            history,
        })
    }
}

/// Loss and metrics of `model` on one batch.
fn evaluate<B: Backend>(
    model: &UNet1d<B>,
    registry: &Registry<B>,
    x: Tensor<B, 2>,
    y: Tensor<B, 2>,
    pos_weight: f64,
) -> anyhow::Result<SpikeMetrics> {
    let yp = model.forward(x);
    let loss = tensor_to_f64(weighted_binary_cross_entropy(y.clone(), yp.clone(), pos_weight));
    Ok(SpikeMetrics::compute(registry, y, yp, loss)?)
}

/// One line per metric: training vs validation.
fn log_comparison(train: &SpikeMetrics, val: &SpikeMetrics) {
    for ((name, t), (_, v)) in train.named().into_iter().zip(val.named()) {
        tracing::info!("{name:<20} trn={t:<9.4} val={v:<9.4}");
    }
}
