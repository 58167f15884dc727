//! Tensor bridge: conversions between host rows (`Vec<f32>` / `Vec<u8>`)
//! and burn `(batch, len)` tensors.

use burn::prelude::*;
use burn::tensor::TensorData;

/// Stack equal-length rows into a `(rows, len)` float tensor.
pub fn rows_to_tensor<B: Backend>(rows: &[Vec<f32>], device: &B::Device) -> anyhow::Result<Tensor<B, 2>> {
    let len = rows.first().map(Vec::len).unwrap_or(0);
    anyhow::ensure!(!rows.is_empty() && len > 0, "cannot build a tensor from empty rows");
    if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != len) {
        anyhow::bail!("row {i} has length {}, expected {len}", row.len());
    }
    let flat: Vec<f32> = rows.iter().flat_map(|r| r.iter().copied()).collect();
    Ok(Tensor::from_data(TensorData::new(flat, [rows.len(), len]), device))
}

/// Stack binary label rows into a `(rows, len)` float tensor of 0.0 / 1.0.
pub fn labels_to_tensor<B: Backend>(rows: &[Vec<u8>], device: &B::Device) -> anyhow::Result<Tensor<B, 2>> {
    let as_f32: Vec<Vec<f32>> = rows
        .iter()
        .map(|r| r.iter().map(|&v| v as f32).collect())
        .collect();
    rows_to_tensor(&as_f32, device)
}

/// Unstack a `(rows, len)` tensor into host rows.
pub fn tensor_to_rows<B: Backend>(tensor: Tensor<B, 2>) -> anyhow::Result<Vec<Vec<f32>>> {
    let [_, len] = tensor.dims();
    let flat = tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| anyhow::anyhow!("Failed to read tensor data: {e:?}"))?;
    if len == 0 {
        return Ok(Vec::new());
    }
    Ok(flat.chunks(len).map(<[f32]>::to_vec).collect())
}

/// Extract a single f64 scalar from a one-element tensor.
pub fn tensor_to_f64<B: Backend>(tensor: Tensor<B, 1>) -> f64 {
    tensor.into_scalar().elem::<f64>()
}
