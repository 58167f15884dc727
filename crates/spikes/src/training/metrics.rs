use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::TrainError;
use crate::model::bridge::tensor_to_f64;
use crate::registry::{Registry, TRAINING_METRICS};

/// Loss and metric values for one evaluation (a batch, an epoch average,
/// or a post-training evaluation).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SpikeMetrics {
    pub loss: f64,
    pub f2: f64,
    pub precision: f64,
    pub recall: f64,
    /// Mean true spike frames per window.
    pub yt_spikes: f64,
    /// Mean predicted spike frames per window.
    pub yp_spikes: f64,
}

impl SpikeMetrics {
    /// Metric names in report order.
    pub const NAMES: [&'static str; 6] = ["F2", "loss", "prec", "reca", "ypspks", "ytspks"];

    /// Compute every training metric through the registry.
    pub fn compute<B: Backend>(
        registry: &Registry<B>,
        yt: Tensor<B, 2>,
        yp: Tensor<B, 2>,
        loss: f64,
    ) -> Result<Self, TrainError> {
        let mut metrics = SpikeMetrics {
            loss,
            ..Default::default()
        };
        for name in TRAINING_METRICS {
            let metric = registry.metric(name)?;
            metrics.set(name, tensor_to_f64(metric(yt.clone(), yp.clone())))?;
        }
        Ok(metrics)
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        match name {
            "loss" => Some(self.loss),
            "F2" => Some(self.f2),
            "prec" => Some(self.precision),
            "reca" => Some(self.recall),
            "ytspks" => Some(self.yt_spikes),
            "ypspks" => Some(self.yp_spikes),
            _ => None,
        }
    }

    fn set(&mut self, name: &str, value: f64) -> Result<(), TrainError> {
        let slot = match name {
            "loss" => &mut self.loss,
            "F2" => &mut self.f2,
            "prec" => &mut self.precision,
            "reca" => &mut self.recall,
            "ytspks" => &mut self.yt_spikes,
            "ypspks" => &mut self.yp_spikes,
            other => return Err(TrainError::UnknownName(other.to_string())),
        };
        *slot = value;
        Ok(())
    }

    /// `(name, value)` pairs in report order.
    pub fn named(&self) -> Vec<(&'static str, f64)> {
        Self::NAMES
            .iter()
            .map(|&n| (n, self.get(n).unwrap_or(f64::NAN)))
            .collect()
    }

    /// Field-wise mean, `None` for an empty slice.
    pub fn mean(items: &[SpikeMetrics]) -> Option<SpikeMetrics> {
        if items.is_empty() {
            return None;
        }
        let n = items.len() as f64;
        let avg = |f: fn(&SpikeMetrics) -> f64| items.iter().map(f).sum::<f64>() / n;
        Some(SpikeMetrics {
            loss: avg(|m| m.loss),
            f2: avg(|m| m.f2),
            precision: avg(|m| m.precision),
            recall: avg(|m| m.recall),
            yt_spikes: avg(|m| m.yt_spikes),
            yp_spikes: avg(|m| m.yp_spikes),
        })
    }

    pub fn display(&self) -> String {
        format!(
            "loss={:.4} F2={:.3} prec={:.3} reca={:.3} ytspks={:.1} ypspks={:.1}",
            self.loss, self.f2, self.precision, self.recall, self.yt_spikes, self.yp_spikes
        )
    }
}

/// Train and validation metrics at the end of one epoch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub train: SpikeMetrics,
    pub val: SpikeMetrics,
}

/// Per-epoch metrics of one training run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsHistory {
    pub epochs: Vec<EpochRecord>,
}

impl MetricsHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, epoch: usize, train: SpikeMetrics, val: SpikeMetrics) {
        self.epochs.push(EpochRecord { epoch, train, val });
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    /// Epoch with the highest validation F2 (earliest on ties).
    pub fn best_val_f2(&self) -> Option<&EpochRecord> {
        self.epochs.iter().fold(None, |best: Option<&EpochRecord>, r| match best {
            Some(b) if b.val.f2 >= r.val.f2 => Some(b),
            _ => Some(r),
        })
    }
}

/// Mean and population std of one metric across folds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub name: String,
    pub train_mean: f64,
    pub train_std: f64,
    pub val_mean: f64,
    pub val_std: f64,
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Aggregate per-fold metrics, one summary per metric name.
pub fn summarize(train: &[SpikeMetrics], val: &[SpikeMetrics]) -> Vec<MetricSummary> {
    SpikeMetrics::NAMES
        .iter()
        .map(|&name| {
            let pick = |ms: &[SpikeMetrics]| -> Vec<f64> {
                ms.iter().filter_map(|m| m.get(name)).collect()
            };
            let (train_mean, train_std) = mean_std(&pick(train));
            let (val_mean, val_std) = mean_std(&pick(val));
            MetricSummary {
                name: name.to_string(),
                train_mean,
                train_std,
                val_mean,
                val_std,
            }
        })
        .collect()
}
