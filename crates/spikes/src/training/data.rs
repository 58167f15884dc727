//! Windowed batch generator for training and validation.
//!
//! Labels are margin-dilated once, up front, when the generator is built.
//! After that the generator hands out an endless stream of fixed-length
//! windows: trace indices are drawn from a permutation that is reshuffled
//! only when exhausted, and each window starts at a uniformly random offset.

use std::collections::BTreeMap;

use burn::backend::NdArray;
use burn::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::TrainError;
use crate::metrics::margin_pool;
use crate::model::bridge::{labels_to_tensor, rows_to_tensor, tensor_to_rows};

/// Host backend used for label dilation.
type HostBackend = NdArray<f32>;

/// Widen every spike in `labels` to a stripe of `2 * margin + 1` frames.
///
/// Rows are grouped by length and each group is pooled as one matrix.
/// Not idempotent: dilating twice with `margin > 0` widens stripes again.
pub fn dilate_labels(labels: &mut [Vec<u8>], margin: usize) -> anyhow::Result<()> {
    if margin == 0 {
        return Ok(());
    }
    let device = Default::default();

    let mut by_len: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, row) in labels.iter().enumerate() {
        by_len.entry(row.len()).or_default().push(i);
    }

    for (len, idxs) in by_len {
        if len == 0 {
            continue;
        }
        let group: Vec<Vec<u8>> = idxs.iter().map(|&i| labels[i].clone()).collect();
        let stacked = labels_to_tensor::<HostBackend>(&group, &device)?;
        let pooled = tensor_to_rows(margin_pool(stacked, margin))?;
        for (&i, row) in idxs.iter().zip(pooled) {
            labels[i] = row.iter().map(|&v| u8::from(v > 0.5)).collect();
        }
        tracing::debug!(len, rows = idxs.len(), margin, "Dilated label group");
    }
    Ok(())
}

/// One batch of windows, with the provenance of every row.
#[derive(Debug, Clone)]
pub struct WindowBatch {
    pub traces: Vec<Vec<f32>>,
    pub labels: Vec<Vec<u8>>,
    /// Source sequence of each row.
    pub indices: Vec<usize>,
    /// Start frame of each row within its source sequence.
    pub offsets: Vec<usize>,
}

impl WindowBatch {
    pub fn len(&self) -> usize {
        self.traces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }

    /// `(traces, labels)` as `(batch, window)` tensors.
    pub fn to_tensors<B: Backend>(&self, device: &B::Device) -> anyhow::Result<(Tensor<B, 2>, Tensor<B, 2>)> {
        Ok((
            rows_to_tensor(&self.traces, device)?,
            labels_to_tensor(&self.labels, device)?,
        ))
    }

    /// The first `n` rows.
    pub fn head(&self, n: usize) -> WindowBatch {
        let n = n.min(self.len());
        WindowBatch {
            traces: self.traces[..n].to_vec(),
            labels: self.labels[..n].to_vec(),
            indices: self.indices[..n].to_vec(),
            offsets: self.offsets[..n].to_vec(),
        }
    }
}

/// Endless producer of `(batch_size, window)` batches.
///
/// Never terminates on its own; bound it with `take`.
pub struct WindowGenerator {
    traces: Vec<Vec<f32>>,
    labels: Vec<Vec<u8>>,
    window: usize,
    batch_size: usize,
    rng: StdRng,
    order: Vec<usize>,
    cursor: usize,
}

impl WindowGenerator {
    /// Build a generator and dilate its labels by `margin`.
    ///
    /// Every sequence must be at least `window` frames long.
    pub fn new(
        traces: Vec<Vec<f32>>,
        mut labels: Vec<Vec<u8>>,
        window: usize,
        batch_size: usize,
        margin: usize,
        mut rng: StdRng,
    ) -> anyhow::Result<Self> {
        if traces.len() != labels.len() {
            return Err(TrainError::LengthMismatch {
                traces: traces.len(),
                labels: labels.len(),
            }
            .into());
        }
        if traces.is_empty() {
            return Err(TrainError::EmptySplit { which: "generator" }.into());
        }
        if window == 0 || batch_size == 0 {
            return Err(TrainError::InvalidConfig(format!(
                "window ({window}) and batch size ({batch_size}) must be positive"
            ))
            .into());
        }
        for (index, (t, l)) in traces.iter().zip(&labels).enumerate() {
            anyhow::ensure!(
                t.len() == l.len(),
                "sequence {index}: trace has {} frames, labels have {}",
                t.len(),
                l.len()
            );
            if t.len() < window {
                return Err(TrainError::WindowTooLong {
                    index,
                    len: t.len(),
                    window,
                }
                .into());
            }
        }

        dilate_labels(&mut labels, margin)?;

        let mut order: Vec<usize> = (0..traces.len()).collect();
        order.shuffle(&mut rng);

        Ok(Self {
            traces,
            labels,
            window,
            batch_size,
            rng,
            order,
            cursor: 0,
        })
    }

    /// Number of source sequences.
    pub fn num_sequences(&self) -> usize {
        self.traces.len()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Dilated labels, one row per source sequence.
    pub fn labels(&self) -> &[Vec<u8>] {
        &self.labels
    }

    fn next_index(&mut self) -> usize {
        if self.cursor == self.order.len() {
            self.order.shuffle(&mut self.rng);
            self.cursor = 0;
        }
        let idx = self.order[self.cursor];
        self.cursor += 1;
        idx
    }

    /// Materialize the next batch.
    pub fn next_batch(&mut self) -> WindowBatch {
        let mut batch = WindowBatch {
            traces: Vec::with_capacity(self.batch_size),
            labels: Vec::with_capacity(self.batch_size),
            indices: Vec::with_capacity(self.batch_size),
            offsets: Vec::with_capacity(self.batch_size),
        };
        for _ in 0..self.batch_size {
            let idx = self.next_index();
            let len = self.traces[idx].len();
            let offset = self.rng.gen_range(0..=len - self.window);
            let end = offset + self.window;
            batch.traces.push(self.traces[idx][offset..end].to_vec());
            batch.labels.push(self.labels[idx][offset..end].to_vec());
            batch.indices.push(idx);
            batch.offsets.push(offset);
        }
        batch
    }
}

impl Iterator for WindowGenerator {
    type Item = WindowBatch;

    fn next(&mut self) -> Option<WindowBatch> {
        Some(self.next_batch())
    }
}
