//! Post-epoch hooks and the per-run artifact layout.
//!
//! After every epoch the trainer calls each hook in order with an
//! [`EpochContext`]. The built-in hooks write the metrics time series and
//! the sample predictions; callers may append their own.

use std::io::Write;
use std::path::{Path, PathBuf};

use burn::prelude::*;
use serde::Serialize;

use crate::model::bridge::tensor_to_rows;
use crate::model::UNet1d;
use crate::training::data::WindowBatch;
use crate::training::metrics::{EpochRecord, SpikeMetrics};

/// File layout of one training run inside the checkpoint directory.
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub dir: PathBuf,
    pub run_id: String,
}

impl RunPaths {
    pub fn new(dir: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            run_id: run_id.into(),
        }
    }

    /// JSON-lines metrics time series, one line per epoch.
    pub fn metrics_log(&self) -> PathBuf {
        self.dir.join(format!("{}_metrics.jsonl", self.run_id))
    }

    /// Sample predictions for `split` (`"trn"` or `"val"`) at `epoch`.
    pub fn samples(&self, epoch: usize, split: &str) -> PathBuf {
        self.dir
            .join(format!("{}_samples_{epoch:03}_{split}.json", self.run_id))
    }

    /// Model weights; the metadata sidecar shares the stem with a `.json` extension.
    pub fn checkpoint(&self, val_f2: f64, epoch: usize) -> PathBuf {
        self.dir.join(format!(
            "{}_model_val_F2_{val_f2:.3}_{epoch:03}.mpk",
            self.run_id
        ))
    }
}

/// Everything a hook may look at after an epoch.
pub struct EpochContext<'a, B: Backend> {
    /// 1-based epoch number.
    pub epoch: usize,
    pub train: &'a SpikeMetrics,
    pub val: &'a SpikeMetrics,
    pub run: &'a RunPaths,
    /// Model in evaluation mode.
    pub model: &'a UNet1d<B>,
    /// A fixed training batch drawn before the first epoch.
    pub train_sample: &'a WindowBatch,
    pub val_batch: &'a WindowBatch,
    pub sample_count: usize,
    pub device: &'a B::Device,
}

pub type PostEpochHook<B> = Box<dyn FnMut(&EpochContext<'_, B>) -> anyhow::Result<()>>;

/// The hooks every run gets, in invocation order.
pub fn builtin_hooks<B: Backend>() -> Vec<PostEpochHook<B>> {
    vec![Box::new(append_metrics::<B>), Box::new(write_samples::<B>)]
}

/// Append this epoch's metrics to the run's JSON-lines log.
pub fn append_metrics<B: Backend>(ctx: &EpochContext<'_, B>) -> anyhow::Result<()> {
    let record = EpochRecord {
        epoch: ctx.epoch,
        train: *ctx.train,
        val: *ctx.val,
    };
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(ctx.run.metrics_log())?;
    serde_json::to_writer(&mut file, &record)?;
    writeln!(file)?;
    Ok(())
}

#[derive(Serialize)]
struct SampleRow {
    index: usize,
    offset: usize,
    trace: Vec<f32>,
    spikes_true: Vec<u8>,
    spikes_pred: Vec<f32>,
}

#[derive(Serialize)]
struct SampleFile {
    epoch: usize,
    split: &'static str,
    val_f2: f64,
    rows: Vec<SampleRow>,
}

/// Write predictions on the first `sample_count` rows of the training
/// sample and of the validation batch.
pub fn write_samples<B: Backend>(ctx: &EpochContext<'_, B>) -> anyhow::Result<()> {
    for (split, batch) in [("trn", ctx.train_sample), ("val", ctx.val_batch)] {
        let batch = batch.head(ctx.sample_count);
        if batch.is_empty() {
            continue;
        }
        let (x, _) = batch.to_tensors::<B>(ctx.device)?;
        let preds = tensor_to_rows(ctx.model.forward(x))?;
        let rows = batch
            .traces
            .into_iter()
            .zip(batch.labels)
            .zip(preds)
            .enumerate()
            .map(|(i, ((trace, spikes_true), spikes_pred))| SampleRow {
                index: batch.indices[i],
                offset: batch.offsets[i],
                trace,
                spikes_true,
                spikes_pred,
            })
            .collect();
        let file = SampleFile {
            epoch: ctx.epoch,
            split,
            val_f2: ctx.val.f2,
            rows,
        };
        write_json(&ctx.run.samples(ctx.epoch, split), &file)?;
    }
    Ok(())
}

fn write_json(path: &Path, value: &impl Serialize) -> anyhow::Result<()> {
    let file = std::fs::File::create(path)?;
    serde_json::to_writer(std::io::BufWriter::new(file), value)?;
    Ok(())
}
