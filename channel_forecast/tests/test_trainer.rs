use channel_forecast::config::{SequenceInputs, TrainerConfig};
use channel_forecast::data::{generate_synthetic_events, write_events_csv, SyntheticConfig};
use channel_forecast::error::ForecastError;
use channel_forecast::models::recurrent::NetworkConfig;
use channel_forecast::store::ModelStore;
use channel_forecast::trainer::{ContinuousTrainer, TrainerPhase};
use pretty_assertions::assert_eq;
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};

struct Workspace {
    _dir: TempDir,
    data: PathBuf,
    root: PathBuf,
}

fn write_events(path: &Path, days: usize, channels: &[&str], seed: u64) {
    let config = SyntheticConfig {
        days,
        channels: channels.iter().map(|c| c.to_string()).collect(),
        seed,
        ..SyntheticConfig::default()
    };
    write_events_csv(path, &generate_synthetic_events(&config).unwrap()).unwrap();
}

fn create_workspace(days: usize, channels: &[&str]) -> Workspace {
    let dir = tempdir().unwrap();
    let data = dir.path().join("events.csv");
    write_events(&data, days, channels, 42);
    let root = dir.path().join("models");
    Workspace {
        _dir: dir,
        data,
        root,
    }
}

fn trainer_config(iterations: usize) -> TrainerConfig {
    TrainerConfig {
        batch_size: 100,
        num_iterations: iterations,
        sequence_length: 5,
        epochs_per_iteration: 1,
        fit_batch_size: 16,
        test_size: 0.2,
        validation_split: 0.0,
        continuous: true,
        seed: 7,
        sequence_inputs: SequenceInputs::Features,
    }
}

fn create_trainer(root: &Path, iterations: usize) -> ContinuousTrainer {
    ContinuousTrainer::new(trainer_config(iterations), ModelStore::new(root))
        .unwrap()
        .with_network(NetworkConfig {
            hidden_units: 4,
            ..NetworkConfig::default()
        })
}

#[test]
fn test_fresh_run_writes_every_checkpoint() {
    let ws = create_workspace(120, &["Facebook"]);
    let mut trainer = create_trainer(&ws.root, 3);

    let state = trainer.train_channel(&ws.data, "Facebook").unwrap();
    assert_eq!(state.last_iteration, 2);
    assert_eq!(state.metrics.len(), 3);
    assert_eq!(trainer.phase(), TrainerPhase::Complete);

    let store = ModelStore::new(&ws.root);
    assert_eq!(store.list_checkpoints("Facebook").unwrap(), vec![0, 1, 2]);
    for i in 0..3 {
        let (_, checkpoint_state) = store.load_checkpoint("Facebook", i).unwrap();
        assert_eq!(checkpoint_state.last_iteration, i as i64);
    }

    let current = store.load_current("Facebook").unwrap();
    assert_eq!(current.sequence.input_shape(), (5, 6));
    assert_eq!(current.scaler.len(), 6);
    assert_eq!(store.load_state("Facebook").unwrap().unwrap(), state);

    for metrics in &state.metrics {
        assert_eq!(metrics.train_rows, 80);
        assert_eq!(metrics.test_rows, 20);
        assert!(metrics.ensemble.mse.is_finite());
        assert!(metrics.lstm_loss.is_some());
    }
}

#[test]
fn test_resume_runs_remaining_iterations() {
    let ws = create_workspace(120, &["Facebook"]);
    create_trainer(&ws.root, 3)
        .train_channel(&ws.data, "Facebook")
        .unwrap();
    let store = ModelStore::new(&ws.root);
    let before = store.load_state("Facebook").unwrap().unwrap();

    let resumed = create_trainer(&ws.root, 5)
        .train_channel(&ws.data, "Facebook")
        .unwrap();
    assert_eq!(resumed.last_iteration, 4);
    assert_eq!(resumed.metrics.len(), 5);
    assert_eq!(&resumed.metrics[..3], &before.metrics[..]);
    let iterations: Vec<usize> = resumed.metrics.iter().map(|m| m.iteration).collect();
    assert_eq!(iterations, vec![0, 1, 2, 3, 4]);
    assert_eq!(store.list_checkpoints("Facebook").unwrap(), vec![0, 1, 2, 3, 4]);
}

#[test]
fn test_completed_channel_is_left_alone() {
    let ws = create_workspace(120, &["Facebook"]);
    let first = create_trainer(&ws.root, 1)
        .train_channel(&ws.data, "Facebook")
        .unwrap();

    let mut trainer = create_trainer(&ws.root, 1);
    let second = trainer.train_channel(&ws.data, "Facebook").unwrap();
    assert_eq!(second, ModelStore::new(&ws.root).load_state("Facebook").unwrap().unwrap());
    assert_eq!(second.metrics.len(), first.metrics.len());
    assert_eq!(trainer.phase(), TrainerPhase::Complete);
}

#[test]
fn test_non_continuous_run_starts_over() {
    let ws = create_workspace(120, &["Facebook"]);
    create_trainer(&ws.root, 2)
        .train_channel(&ws.data, "Facebook")
        .unwrap();

    let config = TrainerConfig {
        continuous: false,
        ..trainer_config(1)
    };
    let mut trainer = ContinuousTrainer::new(config, ModelStore::new(&ws.root))
        .unwrap()
        .with_network(NetworkConfig {
            hidden_units: 4,
            ..NetworkConfig::default()
        });
    let state = trainer.train_channel(&ws.data, "Facebook").unwrap();
    assert_eq!(state.last_iteration, 0);
    assert_eq!(state.metrics.len(), 1);

    // checkpoints of the earlier run are gone
    let store = ModelStore::new(&ws.root);
    assert_eq!(store.list_checkpoints("Facebook").unwrap(), vec![0]);
    assert_eq!(store.load_state("Facebook").unwrap().unwrap(), state);
}

#[test]
fn test_resume_keeps_stored_scaler_params() {
    let ws = create_workspace(120, &["Facebook"]);
    create_trainer(&ws.root, 1)
        .train_channel(&ws.data, "Facebook")
        .unwrap();
    let store = ModelStore::new(&ws.root);
    let before = store.load_current("Facebook").unwrap().scaler;

    // a longer history drawn from a different seed has other ranges
    let newer = ws.root.with_file_name("newer_events.csv");
    write_events(&newer, 160, &["Facebook"], 99);
    let state = create_trainer(&ws.root, 2)
        .train_channel(&newer, "Facebook")
        .unwrap();
    assert_eq!(state.last_iteration, 1);

    assert_eq!(store.load_current("Facebook").unwrap().scaler, before);
    let (checkpoint, _) = store.load_checkpoint("Facebook", 1).unwrap();
    assert_eq!(checkpoint.scaler, before);
}

#[test]
fn test_target_inputs_build_single_feature_model() {
    let ws = create_workspace(120, &["Facebook"]);
    let config = TrainerConfig {
        sequence_inputs: SequenceInputs::Target,
        ..trainer_config(1)
    };
    let mut trainer = ContinuousTrainer::new(config, ModelStore::new(&ws.root))
        .unwrap()
        .with_network(NetworkConfig {
            hidden_units: 4,
            ..NetworkConfig::default()
        });
    trainer.train_channel(&ws.data, "Facebook").unwrap();

    let current = ModelStore::new(&ws.root).load_current("Facebook").unwrap();
    assert_eq!(current.sequence.input_shape(), (5, 1));
    assert_eq!(current.scaler.len(), 6);

    // resuming with the other input mode no longer fits the stored model
    let mut features = create_trainer(&ws.root, 2);
    assert!(matches!(
        features.train_channel(&ws.data, "Facebook"),
        Err(ForecastError::ConfigurationMismatch(_))
    ));
}

#[test]
fn test_batch_collects_failures() {
    let ws = create_workspace(120, &["Facebook", "Twitter"]);
    let mut trainer = create_trainer(&ws.root, 1);

    let channels = vec![
        "Facebook".to_string(),
        "Myspace".to_string(),
        "Twitter".to_string(),
    ];
    let report = trainer.train_channels(&ws.data, &channels);
    assert_eq!(report.succeeded, vec!["Facebook", "Twitter"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].channel, "Myspace");
    assert!(!report.all_succeeded());
}

#[test]
fn test_train_all_discovers_channels() {
    let ws = create_workspace(120, &["Instagram", "Facebook"]);
    let report = create_trainer(&ws.root, 1).train_all(&ws.data).unwrap();
    assert_eq!(report.succeeded, vec!["Facebook", "Instagram"]);
    assert!(report.all_succeeded());
}

#[test]
fn test_short_history_is_rejected() {
    let ws = create_workspace(40, &["Facebook"]);
    let config = TrainerConfig {
        sequence_length: 10,
        ..trainer_config(1)
    };
    let mut trainer = ContinuousTrainer::new(config, ModelStore::new(&ws.root)).unwrap();
    let err = trainer.train_channel(&ws.data, "Facebook").unwrap_err();
    assert!(matches!(err, ForecastError::InsufficientData { rows: 40, .. }));
    assert!(ModelStore::new(&ws.root).load_state("Facebook").unwrap().is_none());
}

#[test]
fn test_invalid_config_rejected() {
    let config = TrainerConfig {
        test_size: 1.5,
        ..TrainerConfig::default()
    };
    assert!(ContinuousTrainer::new(config, ModelStore::new("unused")).is_err());
}
