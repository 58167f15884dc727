//! 1D U-Net spike segmentation for calcium-imaging traces.
//!
//! A trace goes in, a per-frame spike probability comes out. Training
//! samples fixed-length windows from margin-dilated labels, scores with
//! margin-tolerant precision/recall/F2, and validates by random split or
//! k-fold cross-validation. Checkpoints are burn `.mpk` records with a JSON
//! metadata sidecar.

pub mod error;
pub mod inference;
pub mod metrics;
pub mod model;
pub mod registry;
pub mod training;

pub use error::TrainError;
pub use inference::{predict, stripe_centers, Prediction, SpikePredictor};
pub use model::{KernelInit, UNet1d, UNet1dConfig};
pub use registry::Registry;
pub use training::config::{FitConfig, OptimizerKind, ValidationStrategy};
pub use training::hooks::{EpochContext, PostEpochHook, RunPaths};
pub use training::metrics::{MetricSummary, MetricsHistory, SpikeMetrics};
pub use training::trainer::{fit, load_checkpoint, CheckpointMeta, FitOutcome, SplitReport};
