//! Spike inference on whole traces.
//!
//! Provides `SpikePredictor<B>` for running a trained U-Net over full-length
//! traces, and `predict` for segmenting whole dataset files.

use std::path::{Path, PathBuf};

use burn::prelude::*;
use calcium_data::DatasetReader;

use crate::model::bridge::{rows_to_tensor, tensor_to_rows};
use crate::model::unet::DEPTH;
use crate::model::UNet1d;
use crate::registry::Registry;
use crate::training::trainer::{load_checkpoint, CheckpointMeta};

/// Smallest length ≥ `len` that the network accepts.
pub fn padded_len(len: usize) -> usize {
    let multiple = 1usize << DEPTH;
    len.div_ceil(multiple) * multiple
}

/// A loaded U-Net paired with a device and a forward batch size.
pub struct SpikePredictor<B: Backend> {
    model: UNet1d<B>,
    meta: CheckpointMeta,
    batch_size: usize,
    device: B::Device,
}

impl<B: Backend> SpikePredictor<B> {
    /// Load a checkpoint for traces of `trace_len` frames.
    ///
    /// Fails if the weights do not fit the rebuilt network.
    pub fn load(
        path: &Path,
        trace_len: usize,
        batch_size: usize,
        device: B::Device,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(batch_size > 0, "batch size must be > 0");
        let registry = Registry::<B>::standard();
        let (model, meta) = load_checkpoint::<B>(path, padded_len(trace_len), &registry, &device)?;
        Ok(Self {
            model,
            meta,
            batch_size,
            device,
        })
    }

    pub fn meta(&self) -> &CheckpointMeta {
        &self.meta
    }

    /// Spike probabilities for every frame of every trace.
    ///
    /// Traces are zero-padded on the right to a multiple of 16 frames and
    /// the output is cropped back.
    pub fn predict_proba(&self, traces: &[Vec<f32>]) -> anyhow::Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(traces.len());
        for chunk in traces.chunks(self.batch_size) {
            let len = chunk.iter().map(Vec::len).max().unwrap_or(0);
            let padded = padded_len(len);
            let rows: Vec<Vec<f32>> = chunk
                .iter()
                .map(|t| {
                    let mut row = t.clone();
                    row.resize(padded, 0.0);
                    row
                })
                .collect();
            let probs = tensor_to_rows(self.model.forward(rows_to_tensor::<B>(&rows, &self.device)?))?;
            out.extend(
                probs
                    .into_iter()
                    .zip(chunk)
                    .map(|(p, t)| p[..t.len()].to_vec()),
            );
        }
        Ok(out)
    }

    /// Binary predictions: 1 where the probability exceeds `threshold`.
    pub fn predict(&self, traces: &[Vec<f32>], threshold: f32) -> anyhow::Result<Vec<Vec<u8>>> {
        Ok(self
            .predict_proba(traces)?
            .into_iter()
            .map(|row| row.into_iter().map(|p| u8::from(p > threshold)).collect())
            .collect())
    }
}

/// Predictions for a list of datasets, in input order.
#[derive(Debug, Clone)]
pub struct Prediction {
    /// One `(rois, frames)` binary matrix per dataset.
    pub spikes: Vec<Vec<Vec<u8>>>,
    /// Dataset names from their attributes.
    pub names: Vec<String>,
}

/// Segment every dataset with the model at `model_path`.
///
/// The network is rebuilt per dataset with a window equal to that
/// dataset's (padded) trace length.
pub fn predict<B: Backend>(
    dataset_paths: &[PathBuf],
    model_path: &Path,
    batch_size: usize,
    threshold: f32,
    device: &B::Device,
) -> anyhow::Result<Prediction> {
    let mut prediction = Prediction {
        spikes: Vec::with_capacity(dataset_paths.len()),
        names: Vec::with_capacity(dataset_paths.len()),
    };
    for path in dataset_paths {
        let attrs = DatasetReader::attrs(path)?;
        let traces = DatasetReader::traces(path)?;
        let frames = traces.first().map(Vec::len).unwrap_or(0);

        let spikes = if traces.is_empty() {
            Vec::new()
        } else {
            let predictor = SpikePredictor::<B>::load(model_path, frames, batch_size, device.clone())?;
            predictor.predict(&traces, threshold)?
        };

        tracing::info!(
            name = %attrs.name,
            rois = traces.len(),
            frames,
            predicted_spikes = spikes.iter().flatten().filter(|&&s| s > 0).count(),
            "Predicted dataset"
        );
        prediction.names.push(attrs.name);
        prediction.spikes.push(spikes);
    }
    Ok(prediction)
}

/// Centre frame of each run of consecutive positive frames.
///
/// Margin-pooled predictions mark a spike as a stripe; this recovers one
/// frame per stripe (the left of the two middle frames for even runs).
pub fn stripe_centers(row: &[u8]) -> Vec<usize> {
    let mut centers = Vec::new();
    let mut start = None;
    for (i, &v) in row.iter().chain(std::iter::once(&0)).enumerate() {
        match (v > 0, start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                centers.push(s + (i - 1 - s) / 2);
                start = None;
            }
            _ => {}
        }
    }
    centers
}
