//! In-memory types for calcium datasets.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Schema-metadata key holding the dataset name.
pub const NAME_ATTR: &str = "name";

/// Dataset-level attributes. `name` is always present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetAttrs {
    /// Identifier for the dataset, e.g. `"experiment-001"`.
    pub name: String,
    /// Any further attributes stored alongside the name.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl DatasetAttrs {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            extra: BTreeMap::new(),
        }
    }

    /// Add a free-form attribute.
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Look up an attribute by key, including `name`.
    pub fn get(&self, key: &str) -> Option<&str> {
        if key == NAME_ATTR {
            Some(&self.name)
        } else {
            self.extra.get(key).map(String::as_str)
        }
    }
}

/// One ROI row: a raw trace and its binary spike labels.
#[derive(Debug, Clone, PartialEq)]
pub struct RoiRecord {
    pub trace: Vec<f32>,
    pub spikes: Vec<u8>,
}

/// A whole dataset loaded into memory. Read-only after load.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub attrs: DatasetAttrs,
    /// Z-normalized traces, one row per ROI.
    pub traces: Vec<Vec<f32>>,
    /// Raw binary spike labels, same shape as `traces`.
    pub spikes: Vec<Vec<u8>>,
}

impl Dataset {
    /// Number of ROIs.
    pub fn len(&self) -> usize {
        self.traces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }

    /// Number of frames per trace (0 for an empty dataset).
    pub fn frames(&self) -> usize {
        self.traces.first().map(Vec::len).unwrap_or(0)
    }
}

/// Quick statistics from a dataset file.
#[derive(Debug, Clone, Serialize)]
pub struct DatasetSummary {
    pub name: String,
    pub rois: usize,
    pub frames: usize,
    pub total_spikes: usize,
    /// ROIs without a single labelled spike.
    pub silent_rois: usize,
    /// Spikes per frame across the whole dataset.
    pub spike_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attrs_get_includes_name() {
        let attrs = DatasetAttrs::new("exp-1").with_attr("rate_hz", "30");
        assert_eq!(attrs.get("name"), Some("exp-1"));
        assert_eq!(attrs.get("rate_hz"), Some("30"));
        assert_eq!(attrs.get("missing"), None);
    }

    #[test]
    fn test_attrs_serde_roundtrip() {
        let attrs = DatasetAttrs::new("exp-2").with_attr("indicator", "GCaMP6s");
        let json = serde_json::to_string(&attrs).unwrap();
        let parsed: DatasetAttrs = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, attrs);
    }

    #[test]
    fn test_dataset_frames() {
        let ds = Dataset {
            attrs: DatasetAttrs::new("d"),
            traces: vec![vec![0.0; 7], vec![0.0; 7]],
            spikes: vec![vec![0; 7], vec![0; 7]],
        };
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.frames(), 7);
        assert!(!ds.is_empty());
    }
}
