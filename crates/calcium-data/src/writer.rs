//! Writes calcium datasets to Parquet files using Arrow.

use crate::types::{DatasetAttrs, RoiRecord, NAME_ATTR};
use arrow::array::*;
use arrow::buffer::OffsetBuffer;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Arrow schema for dataset Parquet files, carrying `attrs` as metadata.
pub fn dataset_schema(attrs: &DatasetAttrs) -> Schema {
    let mut metadata: HashMap<String, String> = attrs
        .extra
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    metadata.insert(NAME_ATTR.to_string(), attrs.name.clone());

    Schema::new(vec![
        Field::new("roi", DataType::UInt32, false),
        Field::new(
            "trace",
            DataType::List(Arc::new(Field::new("item", DataType::Float32, false))),
            false,
        ),
        Field::new(
            "spikes",
            DataType::List(Arc::new(Field::new("item", DataType::UInt8, false))),
            false,
        ),
    ])
    .with_metadata(metadata)
}

/// Buffers ROI rows and writes them to a single dataset file.
pub struct DatasetWriter {
    attrs: DatasetAttrs,
    rows: Vec<RoiRecord>,
    output_path: PathBuf,
}

impl DatasetWriter {
    /// Create a new writer that will write to the given path.
    pub fn new(output_path: PathBuf, attrs: DatasetAttrs) -> Self {
        Self {
            attrs,
            rows: Vec::new(),
            output_path,
        }
    }

    /// Buffer a single ROI.
    pub fn record(&mut self, row: RoiRecord) {
        self.rows.push(row);
    }

    /// Buffer multiple ROIs.
    pub fn record_all(&mut self, rows: impl IntoIterator<Item = RoiRecord>) {
        self.rows.extend(rows);
    }

    /// Number of buffered ROIs.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Write all buffered rows to the Parquet file and return the output path.
    pub fn finish(self) -> anyhow::Result<PathBuf> {
        let schema = Arc::new(dataset_schema(&self.attrs));
        for (i, row) in self.rows.iter().enumerate() {
            anyhow::ensure!(
                row.trace.len() == row.spikes.len(),
                "ROI {i}: trace has {} frames but spikes has {}",
                row.trace.len(),
                row.spikes.len()
            );
        }

        let batch = if self.rows.is_empty() {
            RecordBatch::new_empty(schema.clone())
        } else {
            build_record_batch(schema.clone(), &self.rows)?
        };

        let file = std::fs::File::create(&self.output_path)?;
        let mut writer = ArrowWriter::try_new(file, schema, None)?;
        writer.write(&batch)?;
        writer.close()?;

        tracing::info!(
            name = %self.attrs.name,
            rois = self.rows.len(),
            path = %self.output_path.display(),
            "Wrote dataset Parquet file"
        );

        Ok(self.output_path)
    }
}

fn list_array<T: ArrowPrimitiveType>(
    item: DataType,
    rows: impl Iterator<Item = Vec<T::Native>>,
) -> ListArray {
    let mut values = Vec::new();
    let mut offsets = vec![0i32];
    for row in rows {
        values.extend(row);
        offsets.push(values.len() as i32);
    }
    ListArray::new(
        Arc::new(Field::new("item", item, false)),
        OffsetBuffer::new(offsets.into()),
        Arc::new(PrimitiveArray::<T>::from_iter_values(values)),
        None,
    )
}

/// Build an Arrow RecordBatch from ROI rows.
fn build_record_batch(
    schema: Arc<Schema>,
    rows: &[RoiRecord],
) -> anyhow::Result<RecordBatch> {
    let rois: UInt32Array = (0..rows.len() as u32).map(Some).collect();
    let traces = list_array::<arrow::datatypes::Float32Type>(
        DataType::Float32,
        rows.iter().map(|r| r.trace.clone()),
    );
    let spikes = list_array::<arrow::datatypes::UInt8Type>(
        DataType::UInt8,
        rows.iter().map(|r| r.spikes.clone()),
    );

    let columns: Vec<Arc<dyn arrow::array::Array>> =
        vec![Arc::new(rois), Arc::new(traces), Arc::new(spikes)];

    Ok(RecordBatch::try_new(schema, columns)?)
}
