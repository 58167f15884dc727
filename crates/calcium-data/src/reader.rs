//! Reads calcium datasets from Parquet files.

use crate::error::DatasetError;
use crate::types::{Dataset, DatasetAttrs, DatasetSummary, NAME_ATTR};
use arrow::array::*;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::path::Path;

/// Bounds for the global mean and std of a normalized trace matrix.
const SANITY_BOUND: f64 = 5.0;

/// Static methods for reading dataset files.
pub struct DatasetReader;

impl DatasetReader {
    /// Dataset-level attributes stored in the schema metadata.
    pub fn attrs(path: &Path) -> anyhow::Result<DatasetAttrs> {
        let file = std::fs::File::open(path)?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
        attrs_from_metadata(path, builder.schema().metadata())
    }

    /// Z-normalized traces, one row per ROI.
    pub fn traces(path: &Path) -> anyhow::Result<Vec<Vec<f32>>> {
        let (_, traces, _) = read_columns(path)?;
        Ok(normalize_traces(traces)?)
    }

    /// Traces exactly as stored.
    pub fn raw_traces(path: &Path) -> anyhow::Result<Vec<Vec<f32>>> {
        let (_, traces, _) = read_columns(path)?;
        Ok(traces)
    }

    /// Raw binary spike labels, one row per ROI.
    pub fn spikes(path: &Path) -> anyhow::Result<Vec<Vec<u8>>> {
        let (_, _, spikes) = read_columns(path)?;
        Ok(spikes)
    }

    /// Load a whole dataset with normalized traces.
    pub fn read(path: &Path) -> anyhow::Result<Dataset> {
        let (attrs, traces, spikes) = read_columns(path)?;
        let traces = normalize_traces(traces)?;
        Ok(Dataset {
            attrs,
            traces,
            spikes,
        })
    }

    /// Quick statistics without normalizing traces.
    pub fn summary(path: &Path) -> anyhow::Result<DatasetSummary> {
        let (attrs, traces, spikes) = read_columns(path)?;
        let frames = traces.first().map(Vec::len).unwrap_or(0);
        let per_roi: Vec<usize> = spikes
            .iter()
            .map(|row| row.iter().filter(|&&s| s > 0).count())
            .collect();
        let total_spikes: usize = per_roi.iter().sum();
        let cells = traces.len() * frames;

        Ok(DatasetSummary {
            name: attrs.name,
            rois: traces.len(),
            frames,
            total_spikes,
            silent_rois: per_roi.iter().filter(|&&n| n == 0).count(),
            spike_rate: if cells > 0 {
                total_spikes as f64 / cells as f64
            } else {
                0.0
            },
        })
    }
}

/// Normalize every row to zero mean and unit variance, then check that the
/// global mean and std of the result are finite and within (-5, 5).
///
/// A near-constant row produces non-finite values and fails the check.
pub fn normalize_traces(mut traces: Vec<Vec<f32>>) -> Result<Vec<Vec<f32>>, DatasetError> {
    for row in traces.iter_mut() {
        if row.is_empty() {
            continue;
        }
        let n = row.len() as f64;
        let mean = row.iter().map(|&x| x as f64).sum::<f64>() / n;
        let var = row.iter().map(|&x| (x as f64 - mean).powi(2)).sum::<f64>() / n;
        let std = var.sqrt();
        for x in row.iter_mut() {
            *x = ((*x as f64 - mean) / std) as f32;
        }
    }

    let count = traces.iter().map(Vec::len).sum::<usize>();
    if count == 0 {
        return Ok(traces);
    }
    let values = || traces.iter().flatten().map(|&x| x as f64);
    let mean = values().sum::<f64>() / count as f64;
    let std = (values().map(|x| (x - mean).powi(2)).sum::<f64>() / count as f64).sqrt();

    for (stat, value) in [("mean", mean), ("std", std)] {
        if !value.is_finite() || value <= -SANITY_BOUND || value >= SANITY_BOUND {
            return Err(DatasetError::Normalization { stat, value });
        }
    }
    Ok(traces)
}

fn attrs_from_metadata(
    path: &Path,
    metadata: &std::collections::HashMap<String, String>,
) -> anyhow::Result<DatasetAttrs> {
    let name = metadata
        .get(NAME_ATTR)
        .ok_or_else(|| DatasetError::MissingName(path.display().to_string()))?;
    let mut attrs = DatasetAttrs::new(name.clone());
    for (k, v) in metadata {
        // Arrow stashes its own IPC schema under this key.
        if k != NAME_ATTR && k != "ARROW:schema" {
            attrs.extra.insert(k.clone(), v.clone());
        }
    }
    Ok(attrs)
}

type Columns = (DatasetAttrs, Vec<Vec<f32>>, Vec<Vec<u8>>);

/// Read and validate all columns of a dataset file.
fn read_columns(path: &Path) -> anyhow::Result<Columns> {
    let file = std::fs::File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let attrs = attrs_from_metadata(path, builder.schema().metadata())?;
    let reader = builder.build()?;

    let mut traces = Vec::new();
    let mut spikes = Vec::new();
    for batch_result in reader {
        let batch = batch_result?;
        extract_rows(path, &batch, &mut traces, &mut spikes)?;
    }

    check_shapes(&traces, &spikes)?;

    tracing::debug!(
        name = %attrs.name,
        rois = traces.len(),
        path = %path.display(),
        "Read dataset"
    );

    Ok((attrs, traces, spikes))
}

fn list_column<'a>(
    path: &Path,
    batch: &'a RecordBatch,
    column: &'static str,
) -> Result<&'a ListArray, DatasetError> {
    batch
        .column_by_name(column)
        .ok_or_else(|| DatasetError::Column {
            path: path.display().to_string(),
            column,
            reason: "missing".to_string(),
        })?
        .as_any()
        .downcast_ref::<ListArray>()
        .ok_or_else(|| DatasetError::Column {
            path: path.display().to_string(),
            column,
            reason: "not a list column".to_string(),
        })
}

fn primitive_rows<T: ArrowPrimitiveType>(
    path: &Path,
    lists: &ListArray,
    column: &'static str,
) -> Result<Vec<Vec<T::Native>>, DatasetError> {
    (0..lists.len())
        .map(|i| {
            let values = lists.value(i);
            let values = values
                .as_any()
                .downcast_ref::<PrimitiveArray<T>>()
                .ok_or_else(|| DatasetError::Column {
                    path: path.display().to_string(),
                    column,
                    reason: format!("unexpected item type {}", values.data_type()),
                })?;
            Ok(values.values().to_vec())
        })
        .collect()
}

fn extract_rows(
    path: &Path,
    batch: &RecordBatch,
    traces: &mut Vec<Vec<f32>>,
    spikes: &mut Vec<Vec<u8>>,
) -> Result<(), DatasetError> {
    let trace_lists = list_column(path, batch, "trace")?;
    let spike_lists = list_column(path, batch, "spikes")?;
    traces.extend(primitive_rows::<arrow::datatypes::Float32Type>(
        path,
        trace_lists,
        "trace",
    )?);
    spikes.extend(primitive_rows::<arrow::datatypes::UInt8Type>(
        path,
        spike_lists,
        "spikes",
    )?);
    Ok(())
}

fn check_shapes(traces: &[Vec<f32>], spikes: &[Vec<u8>]) -> Result<(), DatasetError> {
    let expected = traces.first().map(Vec::len).unwrap_or(0);
    if let Some((row, t)) = traces.iter().enumerate().find(|(_, t)| t.len() != expected) {
        return Err(DatasetError::Ragged {
            row,
            len: t.len(),
            expected,
        });
    }
    let spike_frames = spikes.first().map(Vec::len).unwrap_or(0);
    let aligned = spikes.len() == traces.len() && spikes.iter().all(|s| s.len() == expected);
    if !aligned {
        return Err(DatasetError::ShapeMismatch {
            traces: (traces.len(), expected),
            spikes: (spikes.len(), spike_frames),
        });
    }
    Ok(())
}
