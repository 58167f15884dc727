use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use calcium_cli::config::TrainOverrides;
use calcium_cli::pipeline::{self, PredictArgs, SummaryArgs, SynthesizeArgs, TrainArgs};

/// deep-calcium: spike segmentation for calcium-imaging traces.
#[derive(Parser)]
#[command(name = "deep-calcium", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Train a 1D U-Net on one or more datasets.
    Train {
        /// Dataset Parquet files.
        #[arg(long, required = true, num_args = 1..)]
        datasets: Vec<PathBuf>,
        /// TOML file with a `[train]` table of overrides.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Path for the JSON fit report (default: <checkpoint-dir>/fit_report.json).
        #[arg(long)]
        report: Option<PathBuf>,
        #[command(flatten)]
        overrides: TrainOverrides,
    },
    /// Segment spikes with a trained checkpoint.
    Predict {
        #[arg(long, required = true, num_args = 1..)]
        datasets: Vec<PathBuf>,
        /// Checkpoint `.mpk` file.
        #[arg(long)]
        model: PathBuf,
        #[arg(long, default_value_t = 20)]
        batch_size: usize,
        /// Probability above which a frame is a spike.
        #[arg(long, default_value_t = 0.5)]
        threshold: f32,
        /// JSON report path.
        #[arg(long, default_value = "predictions.json")]
        output: PathBuf,
        /// Also write each dataset with predicted labels into this directory.
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Print statistics for dataset files.
    Summary {
        #[arg(required = true, num_args = 1..)]
        input: Vec<PathBuf>,
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Write a synthetic dataset with known spikes.
    Synthesize {
        #[arg(long)]
        output: PathBuf,
        #[arg(long, default_value = "synthetic")]
        name: String,
        #[arg(long, default_value_t = 16)]
        rois: usize,
        #[arg(long, default_value_t = 2048)]
        frames: usize,
        /// Expected spikes per frame.
        #[arg(long, default_value_t = 0.01)]
        spike_rate: f64,
        /// Calcium decay constant in frames.
        #[arg(long, default_value_t = 12.0)]
        tau: f64,
        #[arg(long, default_value_t = 0.1)]
        noise_std: f64,
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Train {
            datasets,
            config,
            report,
            overrides,
        } => pipeline::run_train(TrainArgs {
            datasets,
            config,
            overrides,
            report,
        })
        .map(|_| ()),
        Command::Predict {
            datasets,
            model,
            batch_size,
            threshold,
            output,
            output_dir,
        } => pipeline::run_predict(PredictArgs {
            datasets,
            model,
            batch_size,
            threshold,
            output,
            output_dir,
        })
        .map(|_| ()),
        Command::Summary { input, json } => pipeline::run_summary(SummaryArgs {
            inputs: input,
            json,
        }),
        Command::Synthesize {
            output,
            name,
            rois,
            frames,
            spike_rate,
            tau,
            noise_std,
            seed,
        } => pipeline::run_synthesize(SynthesizeArgs {
            output,
            name,
            rois,
            frames,
            spike_rate,
            tau,
            noise_std,
            seed,
        })
        .map(|_| ()),
    }
}
