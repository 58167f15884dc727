//! Static name → function table for the custom metrics and loss.
//!
//! Checkpoints record the names they were trained with; loading a
//! checkpoint resolves every name here and fails on anything unknown.

use std::collections::BTreeMap;

use burn::prelude::*;

use crate::error::TrainError;
use crate::metrics;
use crate::training::loss;

/// Metric or loss over `(yt, yp)`, returning a single-element tensor.
pub type MetricFn<B> = fn(Tensor<B, 2>, Tensor<B, 2>) -> Tensor<B, 1>;

/// Metrics reported during training, in report order.
pub const TRAINING_METRICS: [&str; 5] = ["F2", "prec", "reca", "ytspks", "ypspks"];

/// Loss used during training.
pub const TRAINING_LOSS: &str = "weighted_bce";

pub struct Registry<B: Backend> {
    metrics: BTreeMap<&'static str, MetricFn<B>>,
    losses: BTreeMap<&'static str, MetricFn<B>>,
}

impl<B: Backend> Registry<B> {
    /// Every metric and loss this crate defines.
    pub fn standard() -> Self {
        let mut metric_fns: BTreeMap<&'static str, MetricFn<B>> = BTreeMap::new();
        metric_fns.insert("F2", metrics::f2);
        metric_fns.insert("prec", metrics::precision);
        metric_fns.insert("reca", metrics::recall);
        metric_fns.insert("ytspks", metrics::yt_spikes);
        metric_fns.insert("ypspks", metrics::yp_spikes);
        metric_fns.insert("F2_margin", |yt, yp| metrics::f2_margin(yt, yp, 1));
        metric_fns.insert("prec_margin", |yt, yp| metrics::precision_margin(yt, yp, 1));
        metric_fns.insert("reca_margin", |yt, yp| metrics::recall_margin(yt, yp, 1));

        let mut losses: BTreeMap<&'static str, MetricFn<B>> = BTreeMap::new();
        losses.insert(TRAINING_LOSS, loss::weighted_bce);

        Self {
            metrics: metric_fns,
            losses,
        }
    }

    pub fn metric(&self, name: &str) -> Result<MetricFn<B>, TrainError> {
        self.metrics
            .get(name)
            .copied()
            .ok_or_else(|| TrainError::UnknownName(name.to_string()))
    }

    pub fn loss(&self, name: &str) -> Result<MetricFn<B>, TrainError> {
        self.losses
            .get(name)
            .copied()
            .ok_or_else(|| TrainError::UnknownName(name.to_string()))
    }

    /// Check that every metric name and the loss name resolve.
    pub fn resolve_all<'a>(
        &self,
        metric_names: impl IntoIterator<Item = &'a str>,
        loss_name: &str,
    ) -> Result<(), TrainError> {
        for name in metric_names {
            self.metric(name)?;
        }
        self.loss(loss_name)?;
        Ok(())
    }

    /// Registered metric names, sorted.
    pub fn metric_names(&self) -> Vec<&'static str> {
        self.metrics.keys().copied().collect()
    }
}
