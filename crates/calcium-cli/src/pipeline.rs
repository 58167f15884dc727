//! Subcommand implementations: training, prediction, dataset summaries and
//! synthetic data generation.

use std::path::{Path, PathBuf};
use std::time::Instant;

use burn::backend::{Autodiff, NdArray};
use calcium_data::synthetic::{write_synthetic, SyntheticConfig};
use calcium_data::{DatasetReader, DatasetWriter, RoiRecord};
use rand::rngs::StdRng;
use rand::SeedableRng;
use spikes::{FitOutcome, SplitReport};

use crate::config::{build_fit_config, load_train_toml, TrainOverrides};
use crate::results::{DatasetPrediction, PredictionReport};

type InferBackend = NdArray<f32>;
type TrainBackend = Autodiff<InferBackend>;

/// Arguments for the `train` subcommand.
#[derive(Debug)]
pub struct TrainArgs {
    /// Dataset Parquet files to train on.
    pub datasets: Vec<PathBuf>,
    /// Optional TOML file with a `[train]` table.
    pub config: Option<PathBuf>,
    /// CLI overrides, applied last.
    pub overrides: TrainOverrides,
    /// Where to write the JSON fit report. Defaults to the checkpoint directory.
    pub report: Option<PathBuf>,
}

/// Arguments for the `predict` subcommand.
#[derive(Debug)]
pub struct PredictArgs {
    pub datasets: Vec<PathBuf>,
    /// Checkpoint (`.mpk`) with its JSON sidecar next to it.
    pub model: PathBuf,
    pub batch_size: usize,
    pub threshold: f32,
    /// JSON report path.
    pub output: PathBuf,
    /// If set, one Parquet per dataset with the predicted spikes as labels.
    pub output_dir: Option<PathBuf>,
}

/// Arguments for the `summary` subcommand.
#[derive(Debug)]
pub struct SummaryArgs {
    pub inputs: Vec<PathBuf>,
    /// Print JSON instead of text.
    pub json: bool,
}

/// Arguments for the `synthesize` subcommand.
#[derive(Debug)]
pub struct SynthesizeArgs {
    pub output: PathBuf,
    pub name: String,
    pub rois: usize,
    pub frames: usize,
    pub spike_rate: f64,
    pub tau: f64,
    pub noise_std: f64,
    pub seed: u64,
}

/// Train on the given datasets and write a JSON report of the outcome.
pub fn run_train(args: TrainArgs) -> anyhow::Result<FitOutcome> {
    let start = Instant::now();
    anyhow::ensure!(!args.datasets.is_empty(), "no datasets given");

    let toml = args.config.as_deref().map(load_train_toml).transpose()?;
    let config = build_fit_config(toml.as_ref().map(|t| &t.train), &args.overrides)?;
    tracing::info!(
        datasets = args.datasets.len(),
        checkpoint_dir = %config.checkpoint_dir,
        epochs = config.epochs,
        "Training"
    );

    let device = Default::default();
    let outcome = spikes::fit::<TrainBackend>(&config, &args.datasets, &device, &mut [])?;

    let report_path = args
        .report
        .unwrap_or_else(|| Path::new(&config.checkpoint_dir).join("fit_report.json"));
    std::fs::write(&report_path, serde_json::to_string_pretty(&outcome)?)
        .map_err(|e| anyhow::anyhow!("Failed to write {}: {e}", report_path.display()))?;

    println!("\n--- Training Summary ---");
    match &outcome {
        FitOutcome::RandomSplit(report) => print_split(report),
        FitOutcome::CrossValidation(cv) => {
            for (i, fold) in cv.folds.iter().enumerate() {
                println!("Fold {}:", i + 1);
                print_split(fold);
            }
            println!("{:<8} {:>20} {:>20}", "metric", "train", "val");
            for s in &cv.summary {
                println!(
                    "{:<8} {:>11.4} ± {:<6.4} {:>11.4} ± {:<6.4}",
                    s.name, s.train_mean, s.train_std, s.val_mean, s.val_std
                );
            }
        }
    }
    println!("Report: {}", report_path.display());
    println!("Elapsed: {:.1}s", start.elapsed().as_secs_f64());
    Ok(outcome)
}

fn print_split(report: &SplitReport) {
    println!("  train: {}", report.train.display());
    println!("  val:   {}", report.val.display());
    println!("  best:  {}", report.best_model_path.display());
}

/// Segment every dataset and write the JSON report, plus optional Parquet
/// copies with predicted labels.
pub fn run_predict(args: PredictArgs) -> anyhow::Result<PredictionReport> {
    let start = Instant::now();
    anyhow::ensure!(!args.datasets.is_empty(), "no datasets given");
    anyhow::ensure!(
        (0.0..=1.0).contains(&args.threshold),
        "threshold must lie in [0, 1], got {}",
        args.threshold
    );

    let device = Default::default();
    let prediction = spikes::predict::<InferBackend>(
        &args.datasets,
        &args.model,
        args.batch_size,
        args.threshold,
        &device,
    )?;

    let datasets: Vec<DatasetPrediction> = prediction
        .names
        .iter()
        .zip(&prediction.spikes)
        .zip(&args.datasets)
        .map(|((name, spikes), path)| DatasetPrediction::from_spikes(name, path, spikes))
        .collect();

    if let Some(dir) = &args.output_dir {
        std::fs::create_dir_all(dir)?;
        for (path, spikes) in args.datasets.iter().zip(prediction.spikes) {
            let written = write_predicted(path, spikes, &args.model, dir)?;
            tracing::info!(output = %written.display(), "Wrote predicted dataset");
        }
    }

    let report = PredictionReport {
        model: args.model.display().to_string(),
        threshold: args.threshold,
        batch_size: args.batch_size,
        datasets,
    };
    report.save(&args.output)?;

    println!("\n--- Prediction Summary ---");
    for d in &report.datasets {
        println!(
            "{:<24} rois={:<5} frames={:<7} spikes={:<6} ({:.2}/kframe)",
            d.name,
            d.rois,
            d.frames,
            d.predicted_spikes,
            d.spikes_per_kiloframe()
        );
    }
    println!("Output: {}", args.output.display());
    println!("Elapsed: {:.1}s", start.elapsed().as_secs_f64());
    Ok(report)
}

/// Copy a dataset's raw traces next to predicted labels.
fn write_predicted(
    source: &Path,
    spikes: Vec<Vec<u8>>,
    model: &Path,
    dir: &Path,
) -> anyhow::Result<PathBuf> {
    let attrs = DatasetReader::attrs(source)?
        .with_attr("predicted_by", model.display().to_string());
    let traces = DatasetReader::raw_traces(source)?;
    let file_name = source
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("not a file path: {}", source.display()))?;

    let mut writer = DatasetWriter::new(dir.join(file_name), attrs);
    writer.record_all(
        traces
            .into_iter()
            .zip(spikes)
            .map(|(trace, spikes)| RoiRecord { trace, spikes }),
    );
    writer.finish()
}

/// Print per-dataset statistics.
pub fn run_summary(args: SummaryArgs) -> anyhow::Result<()> {
    let summaries = args
        .inputs
        .iter()
        .map(|p| DatasetReader::summary(p))
        .collect::<anyhow::Result<Vec<_>>>()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    for (path, s) in args.inputs.iter().zip(&summaries) {
        println!("--- Dataset Summary ---");
        println!("File: {}", path.display());
        println!("Name: {}", s.name);
        println!("ROIs: {}", s.rois);
        println!("Frames: {}", s.frames);
        println!("Spikes: {}", s.total_spikes);
        println!("Silent ROIs: {}", s.silent_rois);
        println!("Spike rate: {:.5} per frame", s.spike_rate);
    }
    Ok(())
}

/// Write a synthetic dataset.
pub fn run_synthesize(args: SynthesizeArgs) -> anyhow::Result<PathBuf> {
    let config = SyntheticConfig {
        name: args.name,
        rois: args.rois,
        frames: args.frames,
        spike_rate: args.spike_rate,
        tau: args.tau,
        noise_std: args.noise_std,
        ..Default::default()
    };
    let mut rng = StdRng::seed_from_u64(args.seed);
    let path = write_synthetic(args.output, &config, &mut rng)?;
    println!("Wrote {} ROIs x {} frames to {}", config.rois, config.frames, path.display());
    Ok(path)
}
