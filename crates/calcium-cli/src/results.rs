//! Result types written by the `predict` subcommand.

use std::path::Path;

use serde::{Deserialize, Serialize};
use spikes::stripe_centers;

/// Everything a prediction run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionReport {
    /// Path to the checkpoint used.
    pub model: String,
    /// Probability above which a frame counts as a spike.
    pub threshold: f32,
    pub batch_size: usize,
    /// Per-dataset results, in input order.
    pub datasets: Vec<DatasetPrediction>,
}

/// Predictions for one dataset file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetPrediction {
    /// Dataset name from its attributes.
    pub name: String,
    /// Source Parquet path.
    pub source: String,
    pub rois: usize,
    pub frames: usize,
    /// Positive frames over all ROIs.
    pub predicted_frames: usize,
    /// Number of predicted spikes (positive stripes) over all ROIs.
    pub predicted_spikes: usize,
    pub per_roi: Vec<RoiPrediction>,
}

/// Predictions for one ROI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoiPrediction {
    pub roi: usize,
    /// Center frame of every positive stripe.
    pub spike_frames: Vec<usize>,
}

impl DatasetPrediction {
    /// Summarize a binary `(rois, frames)` prediction matrix.
    pub fn from_spikes(name: &str, source: &Path, spikes: &[Vec<u8>]) -> Self {
        let per_roi: Vec<RoiPrediction> = spikes
            .iter()
            .enumerate()
            .map(|(roi, row)| RoiPrediction {
                roi,
                spike_frames: stripe_centers(row),
            })
            .collect();
        Self {
            name: name.to_string(),
            source: source.display().to_string(),
            rois: spikes.len(),
            frames: spikes.first().map(Vec::len).unwrap_or(0),
            predicted_frames: spikes.iter().flatten().filter(|&&s| s > 0).count(),
            predicted_spikes: per_roi.iter().map(|r| r.spike_frames.len()).sum(),
            per_roi,
        }
    }

    /// Predicted spikes per ROI per 1000 frames.
    pub fn spikes_per_kiloframe(&self) -> f64 {
        let cells = self.rois * self.frames;
        if cells == 0 {
            return 0.0;
        }
        self.predicted_spikes as f64 * 1000.0 / cells as f64
    }
}

impl PredictionReport {
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .map_err(|e| anyhow::anyhow!("Failed to write {}: {e}", path.display()))
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", path.display()))?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn total_spikes(&self) -> usize {
        self.datasets.iter().map(|d| d.predicted_spikes).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_spikes_counts_stripes() {
        let spikes = vec![
            vec![0, 1, 1, 1, 0, 0, 1, 0],
            vec![0, 0, 0, 0, 0, 0, 0, 0],
        ];
        let pred = DatasetPrediction::from_spikes("ds", Path::new("ds.parquet"), &spikes);
        assert_eq!(pred.rois, 2);
        assert_eq!(pred.frames, 8);
        assert_eq!(pred.predicted_frames, 4);
        assert_eq!(pred.predicted_spikes, 2);
        assert_eq!(pred.per_roi[0].spike_frames, vec![2, 6]);
        assert!(pred.per_roi[1].spike_frames.is_empty());
        assert!((pred.spikes_per_kiloframe() - 125.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_dataset() {
        let pred = DatasetPrediction::from_spikes("empty", Path::new("e.parquet"), &[]);
        assert_eq!(pred.rois, 0);
        assert_eq!(pred.frames, 0);
        assert_eq!(pred.spikes_per_kiloframe(), 0.0);
    }

    #[test]
    fn test_report_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("pred.json");
        let report = PredictionReport {
            model: "m.mpk".to_string(),
            threshold: 0.5,
            batch_size: 4,
            datasets: vec![DatasetPrediction::from_spikes(
                "a",
                Path::new("a.parquet"),
                &[vec![1, 0, 0, 1]],
            )],
        };
        report.save(&path).unwrap();
        let loaded = PredictionReport::load(&path).unwrap();
        assert_eq!(loaded.datasets.len(), 1);
        assert_eq!(loaded.total_spikes(), 2);
        assert_eq!(loaded.datasets[0].name, "a");
    }
}
