//! End-to-end tests for the deep-calcium pipelines on small synthetic data.

use std::path::{Path, PathBuf};
use std::process::Command;

use calcium_cli::config::TrainOverrides;
use calcium_cli::pipeline::{
    run_predict, run_summary, run_synthesize, run_train, PredictArgs, SummaryArgs,
    SynthesizeArgs, TrainArgs,
};
use calcium_cli::results::PredictionReport;
use calcium_data::DatasetReader;
use spikes::FitOutcome;

fn synthesize(dir: &Path, name: &str, frames: usize, seed: u64) -> PathBuf {
    run_synthesize(SynthesizeArgs {
        output: dir.join(format!("{name}.parquet")),
        name: name.to_string(),
        rois: 8,
        frames,
        spike_rate: 0.05,
        tau: 6.0,
        noise_std: 0.1,
        seed,
    })
    .unwrap()
}

fn tiny_overrides(checkpoint_dir: &Path) -> TrainOverrides {
    TrainOverrides {
        window_len: Some(32),
        error_margin: Some(1),
        batch_size: Some(4),
        epochs: Some(2),
        nb_filters_base: Some(2),
        sample_count: Some(2),
        checkpoint_dir: Some(checkpoint_dir.display().to_string()),
        seed: Some(11),
        ..Default::default()
    }
}

#[test]
fn test_synthesize_then_summary() {
    let tmp = tempfile::tempdir().unwrap();
    let path = synthesize(tmp.path(), "ds_a", 128, 1);

    let summary = DatasetReader::summary(&path).unwrap();
    assert_eq!(summary.name, "ds_a");
    assert_eq!(summary.rois, 8);
    assert_eq!(summary.frames, 128);

    run_summary(SummaryArgs {
        inputs: vec![path],
        json: true,
    })
    .unwrap();
}

#[test]
fn test_train_then_predict() {
    let tmp = tempfile::tempdir().unwrap();
    let data = synthesize(tmp.path(), "train_set", 64, 2);
    let odd = synthesize(tmp.path(), "odd_len", 50, 3);
    let ckpt_dir = tmp.path().join("ckpt");

    let outcome = run_train(TrainArgs {
        datasets: vec![data.clone()],
        config: None,
        overrides: tiny_overrides(&ckpt_dir),
        report: None,
    })
    .unwrap();
    assert!(matches!(outcome, FitOutcome::RandomSplit(_)));
    assert!(ckpt_dir.join("fit_report.json").exists());
    let model = outcome.best_model_path().unwrap().to_path_buf();
    assert!(model.exists());

    let out_dir = tmp.path().join("predicted");
    let report_path = tmp.path().join("pred.json");
    let report = run_predict(PredictArgs {
        datasets: vec![data, odd.clone()],
        model: model.clone(),
        batch_size: 3,
        threshold: 0.5,
        output: report_path.clone(),
        output_dir: Some(out_dir.clone()),
    })
    .unwrap();

    assert_eq!(report.datasets.len(), 2);
    assert_eq!(report.datasets[1].name, "odd_len");
    assert_eq!(report.datasets[1].frames, 50);
    assert_eq!(report.datasets[1].per_roi.len(), 8);

    let loaded = PredictionReport::load(&report_path).unwrap();
    assert_eq!(loaded.total_spikes(), report.total_spikes());

    // Predicted copy keeps the raw traces and records the model.
    let copy = out_dir.join("odd_len.parquet");
    let attrs = DatasetReader::attrs(&copy).unwrap();
    assert_eq!(attrs.name, "odd_len");
    assert!(attrs.get("predicted_by").is_some());
    assert_eq!(
        DatasetReader::raw_traces(&copy).unwrap(),
        DatasetReader::raw_traces(&odd).unwrap()
    );
    let spikes = DatasetReader::spikes(&copy).unwrap();
    assert!(spikes.iter().all(|row| row.len() == 50));
}

#[test]
fn test_train_with_toml_cross_validation() {
    let tmp = tempfile::tempdir().unwrap();
    let data = synthesize(tmp.path(), "cv_set", 64, 4);
    let ckpt_dir = tmp.path().join("cv");
    let toml_path = tmp.path().join("train.toml");
    std::fs::write(
        &toml_path,
        "[train]\nvalidation = \"cross_validate\"\nnb_folds = 2\nepochs = 5\n",
    )
    .unwrap();

    let mut overrides = tiny_overrides(&ckpt_dir);
    overrides.epochs = Some(1);
    let report = tmp.path().join("cv_report.json");
    let outcome = run_train(TrainArgs {
        datasets: vec![data],
        config: Some(toml_path),
        overrides,
        report: Some(report.clone()),
    })
    .unwrap();

    match outcome {
        FitOutcome::CrossValidation(cv) => {
            assert_eq!(cv.folds.len(), 2);
            assert!(cv.folds.iter().all(|f| f.history.len() == 1));
        }
        other => panic!("expected cross-validation, got {other:?}"),
    }
    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(json["strategy"], "cross_validation");
}

#[test]
fn test_predict_rejects_bad_threshold() {
    let tmp = tempfile::tempdir().unwrap();
    let data = synthesize(tmp.path(), "ds", 32, 5);
    let result = run_predict(PredictArgs {
        datasets: vec![data],
        model: tmp.path().join("missing.mpk"),
        batch_size: 4,
        threshold: 1.5,
        output: tmp.path().join("out.json"),
        output_dir: None,
    });
    assert!(result.is_err());
    assert!(!tmp.path().join("out.json").exists());
}

#[test]
fn test_binary_summary_json() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("bin.parquet");
    let status = Command::new(env!("CARGO_BIN_EXE_deep-calcium"))
        .args(["synthesize", "--output"])
        .arg(&path)
        .args(["--rois", "3", "--frames", "40", "--seed", "9"])
        .status()
        .unwrap();
    assert!(status.success());

    let output = Command::new(env!("CARGO_BIN_EXE_deep-calcium"))
        .arg("summary")
        .arg(&path)
        .arg("--json")
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json[0]["rois"], 3);
    assert_eq!(json[0]["frames"], 40);
}

#[test]
fn test_binary_rejects_bad_validation_flag() {
    let tmp = tempfile::tempdir().unwrap();
    let data = synthesize(tmp.path(), "ds", 32, 6);
    let output = Command::new(env!("CARGO_BIN_EXE_deep-calcium"))
        .args(["train", "--datasets"])
        .arg(&data)
        .args(["--validation", "leave_one_out"])
        .output()
        .unwrap();
    assert!(!output.status.success());
}
