use burn::prelude::*;

use crate::error::TrainError;
use crate::model::{KernelInit, UNet1dConfig};

/// How the trace set is divided for validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStrategy {
    /// One shuffled head/tail split by `prop_train` / `prop_val`.
    RandomSplit,
    /// `nb_folds`-fold cross-validation.
    CrossValidate,
}

impl std::fmt::Display for ValidationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationStrategy::RandomSplit => write!(f, "random_split"),
            ValidationStrategy::CrossValidate => write!(f, "cross_validate"),
        }
    }
}

impl std::str::FromStr for ValidationStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "random_split" => Ok(ValidationStrategy::RandomSplit),
            "cross_validate" => Ok(ValidationStrategy::CrossValidate),
            other => Err(format!(
                "unknown validation strategy `{other}` (expected random_split or cross_validate)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    Adam,
    /// SGD with momentum.
    Sgd,
}

impl std::fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptimizerKind::Adam => write!(f, "adam"),
            OptimizerKind::Sgd => write!(f, "sgd"),
        }
    }
}

impl std::str::FromStr for OptimizerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "adam" => Ok(OptimizerKind::Adam),
            "sgd" => Ok(OptimizerKind::Sgd),
            other => Err(format!("unknown optimizer `{other}` (expected adam or sgd)")),
        }
    }
}

/// Configuration for `fit`.
#[derive(Config, Debug)]
pub struct FitConfig {
    /// Training window length in frames. Must be a multiple of 16.
    #[config(default = 4096)]
    pub window_len: usize,
    /// Frames within which a prediction still counts as a hit.
    #[config(default = 4)]
    pub error_margin: usize,
    #[config(default = 20)]
    pub batch_size: usize,
    #[config(default = 20)]
    pub epochs: usize,
    #[config(default = "ValidationStrategy::RandomSplit")]
    pub validation: ValidationStrategy,
    #[config(default = 0.8)]
    pub prop_train: f64,
    #[config(default = 0.2)]
    pub prop_val: f64,
    #[config(default = 5)]
    pub nb_folds: usize,
    #[config(default = "OptimizerKind::Adam")]
    pub optimizer: OptimizerKind,
    #[config(default = 0.002)]
    pub learning_rate: f64,
    /// Only used by SGD.
    #[config(default = 0.9)]
    pub momentum: f64,
    /// Weight of the positive class in the cross-entropy loss.
    #[config(default = 2.0)]
    pub pos_weight: f64,
    #[config(default = 32)]
    pub nb_filters_base: usize,
    #[config(default = 0.05)]
    pub dropout: f64,
    #[config(default = "KernelInit::HeNormal")]
    pub kernel_init: KernelInit,
    /// Directory for checkpoints, metric logs and sample predictions.
    #[config(default = "String::from(\"checkpoints/spikes_unet1d\")")]
    pub checkpoint_dir: String,
    /// Rows written per sample-prediction artifact.
    #[config(default = 30)]
    pub sample_count: usize,
    /// Seed for every random choice in a run. Entropy when unset.
    pub seed: Option<u64>,
}

impl FitConfig {
    /// Check every precondition before any work begins.
    pub fn validate(&self) -> Result<(), TrainError> {
        let invalid = |msg: String| Err(TrainError::InvalidConfig(msg));
        if self.nb_folds <= 1 {
            return invalid(format!("nb_folds must be > 1, got {}", self.nb_folds));
        }
        if (self.prop_train + self.prop_val - 1.0).abs() > 1e-9 {
            return invalid(format!(
                "prop_train + prop_val must equal 1, got {} + {}",
                self.prop_train, self.prop_val
            ));
        }
        if !(0.0..=1.0).contains(&self.prop_train) || !(0.0..=1.0).contains(&self.prop_val) {
            return invalid("proportions must lie in [0, 1]".to_string());
        }
        if self.batch_size == 0 {
            return invalid("batch_size must be > 0".to_string());
        }
        if self.epochs == 0 {
            return invalid("epochs must be > 0".to_string());
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return invalid(format!("dropout must lie in [0, 1), got {}", self.dropout));
        }
        self.unet_config().check_window()
    }

    /// Network configuration for a training window.
    pub fn unet_config(&self) -> UNet1dConfig {
        UNet1dConfig::new(self.window_len)
            .with_nb_filters_base(self.nb_filters_base)
            .with_kernel_init(self.kernel_init)
            .with_dropout(self.dropout)
            .with_margin(self.error_margin)
    }
}
