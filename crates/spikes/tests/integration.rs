//! Integration tests for the spikes crate.
//!
//! These exercise the whole pipeline on synthetic Parquet datasets: fit with
//! both validation strategies, checkpoint artifacts, hooks, and predict.
//! All use the NdArray backend with a tiny network.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use burn::backend::ndarray::NdArray;
use burn::backend::Autodiff;
use calcium_data::synthetic::{write_synthetic, SyntheticConfig};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tempfile::TempDir;

use spikes::training::data::WindowGenerator;
use spikes::{
    fit, predict, CheckpointMeta, EpochContext, FitConfig, FitOutcome, PostEpochHook, SpikePredictor,
    TrainError, ValidationStrategy,
};

type TestBackend = NdArray<f32>;
type TestAutodiffBackend = Autodiff<NdArray<f32>>;

fn synthetic_dataset(dir: &Path, name: &str, rois: usize, frames: usize, seed: u64) -> PathBuf {
    let config = SyntheticConfig {
        name: name.to_string(),
        rois,
        frames,
        spike_rate: 0.05,
        ..Default::default()
    };
    write_synthetic(
        dir.join(format!("{name}.parquet")),
        &config,
        &mut StdRng::seed_from_u64(seed),
    )
    .unwrap()
}

fn tiny_config(checkpoint_dir: &Path) -> FitConfig {
    FitConfig::new()
        .with_window_len(32)
        .with_error_margin(1)
        .with_batch_size(4)
        .with_epochs(2)
        .with_nb_filters_base(2)
        .with_sample_count(3)
        .with_seed(Some(7))
        .with_checkpoint_dir(checkpoint_dir.display().to_string())
}

fn files_with_suffix(dir: &Path, suffix: &str) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.to_string_lossy().ends_with(suffix))
        .collect();
    files.sort();
    files
}

#[test]
fn test_fit_random_split_end_to_end() {
    let tmp = TempDir::new().unwrap();
    let data = synthetic_dataset(tmp.path(), "train", 10, 64, 1);
    let cpdir = tmp.path().join("checkpoints");
    let config = tiny_config(&cpdir);

    let epochs_seen = Rc::new(RefCell::new(Vec::new()));
    let seen = epochs_seen.clone();
    let mut hooks: Vec<PostEpochHook<TestBackend>> = vec![Box::new(move |ctx: &EpochContext<'_, TestBackend>| {
        seen.borrow_mut().push((ctx.epoch, ctx.val.f2));
        Ok(())
    })];

    let outcome = fit::<TestAutodiffBackend>(&config, &[data], &Default::default(), &mut hooks).unwrap();

    let report = match &outcome {
        FitOutcome::RandomSplit(report) => report,
        other => panic!("expected random split outcome, got {other:?}"),
    };
    assert_eq!(report.history.len(), 2);
    assert_eq!(
        epochs_seen.borrow().iter().map(|(e, _)| *e).collect::<Vec<_>>(),
        vec![1, 2]
    );

    let best = outcome.best_model_path().unwrap();
    assert!(best.exists());
    assert!(CheckpointMeta::sidecar(best).exists());
    assert_eq!(best.extension().unwrap(), "mpk");

    for m in [report.train, report.val] {
        assert!((0.0..=1.0).contains(&m.f2));
        assert!((0.0..=1.0).contains(&m.precision));
        assert!((0.0..=1.0).contains(&m.recall));
        assert!(m.loss.is_finite());
    }

    let logs = files_with_suffix(&cpdir, "_metrics.jsonl");
    assert_eq!(logs.len(), 1);
    let lines = std::fs::read_to_string(&logs[0]).unwrap();
    assert_eq!(lines.lines().count(), 2);
    let first: serde_json::Value = serde_json::from_str(lines.lines().next().unwrap()).unwrap();
    assert_eq!(first["epoch"], 1);

    assert_eq!(files_with_suffix(&cpdir, "_trn.json").len(), 2);
    let val_samples = files_with_suffix(&cpdir, "_samples_001_val.json");
    assert_eq!(val_samples.len(), 1);
    let sample: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&val_samples[0]).unwrap()).unwrap();
    assert_eq!(sample["split"], "val");
    assert_eq!(sample["rows"].as_array().unwrap().len(), 3);
}

#[test]
fn test_checkpoints_only_on_strict_improvement() {
    let tmp = TempDir::new().unwrap();
    let data = synthetic_dataset(tmp.path(), "strict", 10, 64, 2);
    let cpdir = tmp.path().join("cp");
    let config = tiny_config(&cpdir).with_epochs(3);

    let outcome = fit::<TestAutodiffBackend>(&config, &[data], &Default::default(), &mut []).unwrap();
    let FitOutcome::RandomSplit(report) = &outcome else {
        panic!("expected random split outcome");
    };

    let mut best = f64::NEG_INFINITY;
    let mut expected = 0;
    for record in &report.history.epochs {
        if record.val.f2 > best {
            best = record.val.f2;
            expected += 1;
        }
    }
    assert_eq!(files_with_suffix(&cpdir, ".mpk").len(), expected);

    let meta = CheckpointMeta::load(&report.best_model_path).unwrap();
    assert_eq!(meta.val_f2, best);
}

#[test]
fn test_fit_cross_validation() {
    let tmp = TempDir::new().unwrap();
    let a = synthetic_dataset(tmp.path(), "a", 6, 64, 3);
    let b = synthetic_dataset(tmp.path(), "b", 4, 48, 4);
    let cpdir = tmp.path().join("cv");
    let config = tiny_config(&cpdir)
        .with_epochs(1)
        .with_validation(ValidationStrategy::CrossValidate)
        .with_nb_folds(2);

    let outcome = fit::<TestAutodiffBackend>(&config, &[a, b], &Default::default(), &mut []).unwrap();
    assert!(outcome.best_model_path().is_none());
    let FitOutcome::CrossValidation(cv) = outcome else {
        panic!("expected cross-validation outcome");
    };
    assert_eq!(cv.folds.len(), 2);
    assert_eq!(cv.summary.len(), 6);
    assert!(cv.folds[0].best_model_path != cv.folds[1].best_model_path);

    let f2 = cv.summary.iter().find(|s| s.name == "F2").unwrap();
    let mean = (cv.folds[0].val.f2 + cv.folds[1].val.f2) / 2.0;
    assert!((f2.val_mean - mean).abs() < 1e-12);
    assert!(f2.val_std >= 0.0);

    assert_eq!(files_with_suffix(&cpdir, "_metrics.jsonl").len(), 2);
    assert_eq!(files_with_suffix(&cpdir, "_fold0_metrics.jsonl").len(), 1);
}

#[test]
fn test_invalid_config_fails_before_any_work() {
    let tmp = TempDir::new().unwrap();
    let data = synthetic_dataset(tmp.path(), "x", 4, 64, 5);
    let cpdir = tmp.path().join("never");
    let config = tiny_config(&cpdir).with_nb_folds(1);

    let err = fit::<TestAutodiffBackend>(&config, &[data], &Default::default(), &mut []).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<TrainError>(),
        Some(TrainError::InvalidConfig(_))
    ));
    assert!(!cpdir.exists());
}

#[test]
fn test_traces_shorter_than_window_fail() {
    let tmp = TempDir::new().unwrap();
    let data = synthetic_dataset(tmp.path(), "short", 10, 24, 6);
    let config = tiny_config(&tmp.path().join("cp"));

    let err = fit::<TestAutodiffBackend>(&config, &[data], &Default::default(), &mut []).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<TrainError>(),
        Some(TrainError::WindowTooLong { window: 32, .. })
    ));
}

#[test]
fn test_predict_any_length() {
    let tmp = TempDir::new().unwrap();
    let train = synthetic_dataset(tmp.path(), "train", 10, 64, 7);
    let config = tiny_config(&tmp.path().join("cp")).with_epochs(1);
    let outcome = fit::<TestAutodiffBackend>(&config, &[train], &Default::default(), &mut []).unwrap();
    let model = outcome.best_model_path().unwrap().to_path_buf();

    let odd = synthetic_dataset(tmp.path(), "odd", 5, 50, 8);
    let long = synthetic_dataset(tmp.path(), "long", 3, 96, 9);
    let prediction =
        predict::<TestBackend>(&[odd, long], &model, 2, 0.5, &Default::default()).unwrap();

    assert_eq!(prediction.names, vec!["odd", "long"]);
    assert_eq!(prediction.spikes[0].len(), 5);
    assert!(prediction.spikes[0].iter().all(|row| row.len() == 50));
    assert_eq!(prediction.spikes[1].len(), 3);
    assert!(prediction.spikes[1].iter().all(|row| row.len() == 96));
    assert!(prediction.spikes.iter().flatten().flatten().all(|&s| s <= 1));
}

#[test]
fn test_predict_rejects_incompatible_weights() {
    let tmp = TempDir::new().unwrap();
    let train = synthetic_dataset(tmp.path(), "train", 10, 64, 10);
    let config = tiny_config(&tmp.path().join("cp")).with_epochs(1);
    let outcome = fit::<TestAutodiffBackend>(&config, &[train], &Default::default(), &mut []).unwrap();
    let model = outcome.best_model_path().unwrap().to_path_buf();

    let sidecar = CheckpointMeta::sidecar(&model);
    let mut meta = CheckpointMeta::load(&model).unwrap();
    meta.nb_filters_base = 4;
    std::fs::write(&sidecar, serde_json::to_string(&meta).unwrap()).unwrap();
    assert!(SpikePredictor::<TestBackend>::load(&model, 64, 4, Default::default()).is_err());

    meta.nb_filters_base = 2;
    meta.metrics.push("accuracy".to_string());
    std::fs::write(&sidecar, serde_json::to_string(&meta).unwrap()).unwrap();
    let err = SpikePredictor::<TestBackend>::load(&model, 64, 4, Default::default())
        .err()
        .unwrap();
    assert!(matches!(
        err.downcast_ref::<TrainError>(),
        Some(TrainError::UnknownName(name)) if name == "accuracy"
    ));
}

#[test]
fn test_generator_draws_every_trace_per_cycle() {
    let tmp = TempDir::new().unwrap();
    let data = synthetic_dataset(tmp.path(), "cycle", 9, 64, 11);
    let ds = calcium_data::DatasetReader::read(&data).unwrap();
    let mut batches = WindowGenerator::new(
        ds.traces,
        ds.spikes,
        32,
        3,
        2,
        StdRng::seed_from_u64(12),
    )
    .unwrap();

    for _ in 0..4 {
        let mut drawn: Vec<usize> = batches.by_ref().take(3).flat_map(|b| b.indices).collect();
        drawn.sort();
        assert_eq!(drawn, (0..9).collect::<Vec<_>>());
    }
}
