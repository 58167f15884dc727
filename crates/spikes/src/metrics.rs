//! Spike-segmentation metrics over `(batch, length)` tensors.
//!
//! Ground truth `yt` is binary. Predictions `yp` are probabilities in [0, 1]
//! and are rounded at 0.5 before counting (0.5 itself rounds down, matching
//! round-half-to-even). Every metric returns a single-element tensor.

use burn::prelude::*;
use burn::tensor::module::max_pool1d;

/// Keeps the denominators away from zero.
pub const EPSILON: f64 = 1e-7;

/// Widen every positive frame to `2 * margin + 1` frames with a stride-1,
/// length-preserving max-pool along the time axis.
pub fn margin_pool<B: Backend>(x: Tensor<B, 2>, margin: usize) -> Tensor<B, 2> {
    if margin == 0 {
        return x;
    }
    let [batch, len] = x.dims();
    let pooled = max_pool1d(x.unsqueeze_dim::<3>(1), 2 * margin + 1, 1, margin, 1);
    pooled.reshape([batch, len])
}

/// Binarize probabilities at 0.5.
pub fn round<B: Backend>(yp: Tensor<B, 2>) -> Tensor<B, 2> {
    yp.greater_elem(0.5).float()
}

pub fn precision<B: Backend>(yt: Tensor<B, 2>, yp: Tensor<B, 2>) -> Tensor<B, 1> {
    let yp = round(yp);
    let tp = (yp.clone() * yt).sum();
    tp / yp.sum().add_scalar(EPSILON)
}

pub fn recall<B: Backend>(yt: Tensor<B, 2>, yp: Tensor<B, 2>) -> Tensor<B, 1> {
    let yp = round(yp);
    let tp = (yp.clone() * yt.clone()).sum();
    let fn_ = (yt - yp).clamp(0.0, 1.0).sum();
    tp.clone() / (tp + fn_).add_scalar(EPSILON)
}

/// F-beta score from precision and recall.
pub fn f_beta<B: Backend>(yt: Tensor<B, 2>, yp: Tensor<B, 2>, beta: f64) -> Tensor<B, 1> {
    let p = precision(yt.clone(), yp.clone());
    let r = recall(yt, yp);
    let b2 = beta * beta;
    (p.clone() * r.clone()).mul_scalar(1.0 + b2) / (p.mul_scalar(b2) + r).add_scalar(EPSILON)
}

pub fn f2<B: Backend>(yt: Tensor<B, 2>, yp: Tensor<B, 2>) -> Tensor<B, 1> {
    f_beta(yt, yp, 2.0)
}

pub fn precision_margin<B: Backend>(yt: Tensor<B, 2>, yp: Tensor<B, 2>, margin: usize) -> Tensor<B, 1> {
    precision(margin_pool(yt, margin), margin_pool(yp, margin))
}

pub fn recall_margin<B: Backend>(yt: Tensor<B, 2>, yp: Tensor<B, 2>, margin: usize) -> Tensor<B, 1> {
    recall(margin_pool(yt, margin), margin_pool(yp, margin))
}

pub fn f2_margin<B: Backend>(yt: Tensor<B, 2>, yp: Tensor<B, 2>, margin: usize) -> Tensor<B, 1> {
    f2(margin_pool(yt, margin), margin_pool(yp, margin))
}

/// Mean number of true spike frames per row.
pub fn yt_spikes<B: Backend>(yt: Tensor<B, 2>, _yp: Tensor<B, 2>) -> Tensor<B, 1> {
    yt.sum_dim(1).mean()
}

/// Mean number of predicted (rounded) spike frames per row.
pub fn yp_spikes<B: Backend>(_yt: Tensor<B, 2>, yp: Tensor<B, 2>) -> Tensor<B, 1> {
    round(yp).sum_dim(1).mean()
}
