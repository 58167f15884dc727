//! TOML configuration for the `train` subcommand.
//!
//! Values are layered: `FitConfig` defaults, then the `[train]` table of an
//! optional TOML file, then command-line flags.

use std::path::Path;

use serde::Deserialize;
use spikes::{FitConfig, KernelInit, OptimizerKind, ValidationStrategy};

/// Top-level TOML file.
#[derive(Debug, Default, Deserialize)]
pub struct TrainToml {
    #[serde(default)]
    pub train: TrainOverrides,
}

/// Optional overrides for every `FitConfig` field.
///
/// Shared by the TOML `[train]` table and the CLI flags.
#[derive(Debug, Clone, Default, Deserialize, clap::Args)]
#[serde(deny_unknown_fields)]
pub struct TrainOverrides {
    /// Training window length in frames (multiple of 16).
    #[arg(long)]
    pub window_len: Option<usize>,
    /// Frames within which a prediction still counts as a hit.
    #[arg(long)]
    pub error_margin: Option<usize>,
    #[arg(long)]
    pub batch_size: Option<usize>,
    #[arg(long)]
    pub epochs: Option<usize>,
    /// random_split or cross_validate.
    #[arg(long)]
    pub validation: Option<ValidationStrategy>,
    #[arg(long)]
    pub prop_train: Option<f64>,
    #[arg(long)]
    pub prop_val: Option<f64>,
    /// Folds for cross_validate.
    #[arg(long)]
    pub nb_folds: Option<usize>,
    /// adam or sgd.
    #[arg(long)]
    pub optimizer: Option<OptimizerKind>,
    #[arg(long)]
    pub learning_rate: Option<f64>,
    /// SGD momentum.
    #[arg(long)]
    pub momentum: Option<f64>,
    /// Weight of the positive class in the loss.
    #[arg(long)]
    pub pos_weight: Option<f64>,
    /// Filters in the first U-Net stage.
    #[arg(long)]
    pub nb_filters_base: Option<usize>,
    #[arg(long)]
    pub dropout: Option<f64>,
    /// he_normal, he_uniform or glorot_uniform.
    #[arg(long)]
    pub kernel_init: Option<KernelInit>,
    /// Directory for checkpoints, logs and samples.
    #[arg(long)]
    pub checkpoint_dir: Option<String>,
    /// Rows written per sample-prediction file.
    #[arg(long)]
    pub sample_count: Option<usize>,
    #[arg(long)]
    pub seed: Option<u64>,
}

impl TrainOverrides {
    /// Write every set field into `config`.
    pub fn apply(&self, config: &mut FitConfig) {
        macro_rules! set {
            ($src:ident => $dst:ident; $($field:ident),* $(,)?) => {
                $(if let Some(value) = &$src.$field {
                    $dst.$field = value.clone();
                })*
            };
        }
        set!(
            self => config;
            window_len,
            error_margin,
            batch_size,
            epochs,
            validation,
            prop_train,
            prop_val,
            nb_folds,
            optimizer,
            learning_rate,
            momentum,
            pos_weight,
            nb_filters_base,
            dropout,
            kernel_init,
            checkpoint_dir,
            sample_count,
        );
        if self.seed.is_some() {
            config.seed = self.seed;
        }
    }
}

/// Load and parse a training TOML file.
pub fn load_train_toml(path: &Path) -> anyhow::Result<TrainToml> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config {}: {e}", path.display()))?;
    let config: TrainToml = toml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("Failed to parse config {}: {e}", path.display()))?;
    Ok(config)
}

/// Build a `FitConfig` with priority: defaults < TOML < CLI.
///
/// The result is validated so bad combinations fail before any data is read.
pub fn build_fit_config(
    toml: Option<&TrainOverrides>,
    cli: &TrainOverrides,
) -> anyhow::Result<FitConfig> {
    let mut config = FitConfig::new();
    if let Some(toml) = toml {
        toml.apply(&mut config);
    }
    cli.apply(&mut config);
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_train_section() {
        let toml_str = r#"
[train]
window_len = 1024
error_margin = 2
batch_size = 8
epochs = 5
validation = "cross_validate"
nb_folds = 4
optimizer = "sgd"
learning_rate = 0.01
momentum = 0.8
kernel_init = "glorot_uniform"
checkpoint_dir = "runs/test"
seed = 42
"#;
        let parsed: TrainToml = toml::from_str(toml_str).unwrap();
        let train = parsed.train;
        assert_eq!(train.window_len, Some(1024));
        assert_eq!(train.validation, Some(ValidationStrategy::CrossValidate));
        assert_eq!(train.optimizer, Some(OptimizerKind::Sgd));
        assert_eq!(train.kernel_init, Some(KernelInit::GlorotUniform));
        assert_eq!(train.checkpoint_dir.as_deref(), Some("runs/test"));
        assert_eq!(train.seed, Some(42));
        assert!(train.prop_train.is_none());
    }

    #[test]
    fn test_missing_section_uses_defaults() {
        let parsed: TrainToml = toml::from_str("").unwrap();
        let config = build_fit_config(Some(&parsed.train), &TrainOverrides::default()).unwrap();
        assert_eq!(config.window_len, 4096);
        assert_eq!(config.batch_size, 20);
        assert_eq!(config.optimizer, OptimizerKind::Adam);
        assert!(config.seed.is_none());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let result: Result<TrainToml, _> = toml::from_str("[train]\nwindow = 64\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_overrides_toml() {
        let toml = TrainOverrides {
            epochs: Some(7),
            batch_size: Some(4),
            ..Default::default()
        };
        let cli = TrainOverrides {
            epochs: Some(3),
            ..Default::default()
        };
        let config = build_fit_config(Some(&toml), &cli).unwrap();
        assert_eq!(config.epochs, 3);
        assert_eq!(config.batch_size, 4);
    }

    #[test]
    fn test_invalid_combination_rejected() {
        let cli = TrainOverrides {
            prop_train: Some(0.9),
            prop_val: Some(0.2),
            ..Default::default()
        };
        assert!(build_fit_config(None, &cli).is_err());

        let cli = TrainOverrides {
            window_len: Some(100),
            ..Default::default()
        };
        assert!(build_fit_config(None, &cli).is_err());
    }

    #[test]
    fn test_load_train_toml_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.toml");
        std::fs::write(&path, "[train]\nnb_folds = 3\n").unwrap();
        let parsed = load_train_toml(&path).unwrap();
        assert_eq!(parsed.train.nb_folds, Some(3));

        assert!(load_train_toml(&dir.path().join("missing.toml")).is_err());
    }
}
