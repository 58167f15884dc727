//! Weighted binary cross-entropy for sparse spike labels.

use burn::prelude::*;

/// Positive-class weight used when none is configured.
pub const DEFAULT_POS_WEIGHT: f64 = 2.0;

/// Probabilities are clamped to `[CLAMP_EPS, 1 - CLAMP_EPS]` before the log.
const CLAMP_EPS: f64 = 1e-7;

/// Binary cross-entropy with the positive term scaled by `pos_weight`.
///
/// `loss = mean(-(w * yt * ln(yp) + (1 - yt) * ln(1 - yp)))`
///
/// # Arguments
/// - `yt`: shape `(batch, len)`, binary ground truth
/// - `yp`: shape `(batch, len)`, predicted probabilities
///
/// # Returns
/// Scalar loss tensor of shape `(1,)`.
pub fn weighted_binary_cross_entropy<B: Backend>(
    yt: Tensor<B, 2>,
    yp: Tensor<B, 2>,
    pos_weight: f64,
) -> Tensor<B, 1> {
    let yp = yp.clamp(CLAMP_EPS, 1.0 - CLAMP_EPS);
    let pos = yt.clone() * yp.clone().log();
    let neg = yt.neg().add_scalar(1.0) * yp.neg().add_scalar(1.0).log();
    (pos.mul_scalar(pos_weight) + neg).neg().mean()
}

/// Loss with the default positive weight, in the `(yt, yp)` shape shared
/// with the metric functions.
pub fn weighted_bce<B: Backend>(yt: Tensor<B, 2>, yp: Tensor<B, 2>) -> Tensor<B, 1> {
    weighted_binary_cross_entropy(yt, yp, DEFAULT_POS_WEIGHT)
}
