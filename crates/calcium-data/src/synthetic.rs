//! Synthetic calcium datasets for tests and smoke runs.
//!
//! Spikes are drawn from a Poisson process per frame. Each spike adds a
//! jump to an exponentially decaying calcium concentration, and Gaussian
//! noise is added on top of a constant baseline.

use crate::types::{DatasetAttrs, RoiRecord};
use crate::writer::DatasetWriter;
use rand::Rng;
use rand_distr::{Distribution, Normal, Poisson};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Parameters of the synthetic generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticConfig {
    pub name: String,
    pub rois: usize,
    pub frames: usize,
    /// Expected spikes per frame.
    pub spike_rate: f64,
    /// Decay time constant of the calcium kernel, in frames.
    pub tau: f64,
    /// Fluorescence jump per spike.
    pub amplitude: f64,
    pub baseline: f64,
    pub noise_std: f64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            name: "synthetic".to_string(),
            rois: 16,
            frames: 2048,
            spike_rate: 0.01,
            tau: 12.0,
            amplitude: 1.0,
            baseline: 0.5,
            noise_std: 0.1,
        }
    }
}

/// Generate one ROI row per configured ROI.
pub fn generate(config: &SyntheticConfig, rng: &mut impl Rng) -> anyhow::Result<Vec<RoiRecord>> {
    anyhow::ensure!(config.spike_rate > 0.0, "spike_rate must be positive");
    anyhow::ensure!(config.tau > 0.0, "tau must be positive");

    let poisson = Poisson::new(config.spike_rate)?;
    let noise = Normal::new(0.0, config.noise_std)?;
    let decay = (-1.0 / config.tau).exp();

    let rows = (0..config.rois)
        .map(|_| {
            let mut calcium = 0.0f64;
            let mut trace = Vec::with_capacity(config.frames);
            let mut spikes = Vec::with_capacity(config.frames);
            for _ in 0..config.frames {
                let count: f64 = poisson.sample(rng);
                calcium = calcium * decay + config.amplitude * count;
                trace.push((config.baseline + calcium + noise.sample(rng)) as f32);
                spikes.push(u8::from(count > 0.0));
            }
            RoiRecord { trace, spikes }
        })
        .collect();

    Ok(rows)
}

/// Generate a dataset and write it to `path`.
pub fn write_synthetic(
    path: PathBuf,
    config: &SyntheticConfig,
    rng: &mut impl Rng,
) -> anyhow::Result<PathBuf> {
    let attrs = DatasetAttrs::new(config.name.clone())
        .with_attr("synthetic", "true")
        .with_attr("tau", config.tau.to_string());
    let mut writer = DatasetWriter::new(path, attrs);
    writer.record_all(generate(config, rng)?);
    writer.finish()
}
