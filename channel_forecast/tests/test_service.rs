use channel_forecast::config::{SequenceInputs, ServiceConfig, ServingWindows, TrainerConfig};
use channel_forecast::data::{generate_synthetic_events, write_events_csv, SyntheticConfig};
use channel_forecast::error::ForecastError;
use channel_forecast::models::recurrent::NetworkConfig;
use channel_forecast::service::{InferenceService, PredictionParams, RegressorOverride};
use channel_forecast::store::ModelStore;
use channel_forecast::trainer::ContinuousTrainer;
use chrono::{Duration, NaiveDate};
use pretty_assertions::assert_eq;
use rstest::{fixture, rstest};
use std::fs;
use std::sync::Arc;
use std::thread;
use tempfile::{tempdir, TempDir};

const SEQUENCE_LENGTH: usize = 5;

fn train_root(sequence_inputs: SequenceInputs) -> TempDir {
    let dir = tempdir().unwrap();
    let data = dir.path().join("events.csv");
    let synthetic = SyntheticConfig {
        days: 120,
        channels: vec!["Facebook".to_string()],
        ..SyntheticConfig::default()
    };
    write_events_csv(&data, &generate_synthetic_events(&synthetic).unwrap()).unwrap();

    let config = TrainerConfig {
        batch_size: 100,
        num_iterations: 1,
        sequence_length: SEQUENCE_LENGTH,
        epochs_per_iteration: 1,
        sequence_inputs,
        ..TrainerConfig::default()
    };
    let mut trainer = ContinuousTrainer::new(config, ModelStore::new(dir.path().join("models")))
        .unwrap()
        .with_network(NetworkConfig {
            hidden_units: 4,
            ..NetworkConfig::default()
        });
    trainer.train_channel(&data, "Facebook").unwrap();
    dir
}

/// Model root with one trained channel, `Facebook`
#[fixture]
fn trained_root() -> TempDir {
    train_root(SequenceInputs::Features)
}

fn service(dir: &TempDir) -> InferenceService {
    InferenceService::new(ServiceConfig::new(dir.path().join("models")))
}

fn params(start: NaiveDate, days: i64) -> PredictionParams {
    PredictionParams::new(start, start + Duration::days(days - 1))
}

fn forecast_start() -> NaiveDate {
    // synthetic history starts 2023-01-01 and covers 120 days
    NaiveDate::from_ymd_opt(2023, 5, 1).unwrap()
}

#[rstest]
fn test_short_horizon_is_statistical_only(trained_root: TempDir) {
    let service = service(&trained_root);
    let result = service
        .predict("Facebook", &params(forecast_start(), 3))
        .unwrap();

    assert_eq!(result.predictions.len(), 3);
    assert_eq!(result.dates, vec!["2023-05-01", "2023-05-02", "2023-05-03"]);
    assert_eq!(result.plot, None);
}

#[rstest]
#[case(5)]
#[case(12)]
fn test_long_horizon_is_blended(trained_root: TempDir, #[case] days: i64) {
    let service = service(&trained_root);
    let result = service
        .predict("Facebook", &params(forecast_start(), days))
        .unwrap();

    let expected = days as usize - SEQUENCE_LENGTH + 1;
    assert_eq!(result.predictions.len(), expected);
    assert_eq!(result.dates.len(), expected);
    let last = forecast_start() + Duration::days(days - 1);
    assert_eq!(result.dates.last().unwrap(), &last.format("%Y-%m-%d").to_string());
    assert!(result.predictions.iter().all(|p| p.is_finite()));
}

#[rstest]
fn test_regressor_overrides(trained_root: TempDir) {
    let service = service(&trained_root);
    let base = params(forecast_start(), 3);
    let baseline = service.predict("Facebook", &base).unwrap();

    let raised = base
        .clone()
        .with_regressor("clicks", RegressorOverride::Series(vec![9.0, 9.5, 10.0]))
        .with_regressor("roi", RegressorOverride::Constant(1.0));
    let changed = service.predict("Facebook", &raised).unwrap();
    assert_eq!(changed.predictions.len(), 3);
    assert_ne!(changed.predictions, baseline.predictions);

    let wrong_length = base
        .clone()
        .with_regressor("clicks", RegressorOverride::Series(vec![1.0]));
    assert!(matches!(
        service.predict("Facebook", &wrong_length),
        Err(ForecastError::InvalidParameter(_))
    ));

    let unknown = base.with_regressor("reach", RegressorOverride::Constant(1.0));
    assert!(matches!(
        service.predict("Facebook", &unknown),
        Err(ForecastError::InvalidParameter(_))
    ));
}

#[rstest]
fn test_unknown_and_broken_channels(trained_root: TempDir) {
    fs::create_dir_all(trained_root.path().join("models").join("Broken")).unwrap();
    let service = service(&trained_root);

    assert_eq!(service.channels().unwrap(), vec!["Facebook"]);
    assert_eq!(service.failed_channels().unwrap(), vec!["Broken"]);

    let err = service
        .predict("Myspace", &params(forecast_start(), 3))
        .unwrap_err();
    assert!(err.is_data_validation());

    assert!(matches!(
        service.predict("Broken", &params(forecast_start(), 3)),
        Err(ForecastError::ArtifactNotFound(_))
    ));
}

#[rstest]
fn test_reversed_dates_rejected(trained_root: TempDir) {
    let service = service(&trained_root);
    let reversed = PredictionParams::new(forecast_start(), forecast_start() - Duration::days(1));
    assert!(matches!(
        service.predict("Facebook", &reversed),
        Err(ForecastError::InvalidParameter(_))
    ));
}

#[rstest]
fn test_statistical_feedback_needs_single_feature(trained_root: TempDir) {
    let config = ServiceConfig {
        serving_windows: ServingWindows::StatisticalFeedback,
        ..ServiceConfig::new(trained_root.path().join("models"))
    };
    let service = InferenceService::new(config);

    // short horizons never build windows
    assert!(service
        .predict("Facebook", &params(forecast_start(), 3))
        .is_ok());
    assert!(matches!(
        service.predict("Facebook", &params(forecast_start(), 10)),
        Err(ForecastError::ConfigurationMismatch(_))
    ));
}

#[test]
fn test_statistical_feedback_with_target_model() {
    let root = train_root(SequenceInputs::Target);
    let config = ServiceConfig {
        serving_windows: ServingWindows::StatisticalFeedback,
        ..ServiceConfig::new(root.path().join("models"))
    };
    let result = InferenceService::new(config)
        .predict("Facebook", &params(forecast_start(), 10))
        .unwrap();

    assert_eq!(result.predictions.len(), 10 - SEQUENCE_LENGTH + 1);
    assert_eq!(result.dates.first().unwrap(), "2023-05-05");
    assert!(result.predictions.iter().all(|p| p.is_finite()));

    // the default window mode needs every scaled feature
    assert!(matches!(
        service(&root).predict("Facebook", &params(forecast_start(), 10)),
        Err(ForecastError::ConfigurationMismatch(_))
    ));
}

#[rstest]
fn test_concurrent_requests_share_one_registry(trained_root: TempDir) {
    let service = Arc::new(service(&trained_root));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let service = Arc::clone(&service);
            thread::spawn(move || {
                service
                    .predict("Facebook", &params(forecast_start(), 8))
                    .unwrap()
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    for result in &results[1..] {
        assert_eq!(result, &results[0]);
    }
}

#[test]
fn test_prediction_result_json_shape() {
    let dir = tempdir().unwrap();
    let service = InferenceService::new(ServiceConfig::new(dir.path()));
    assert!(service.channels().unwrap().is_empty());

    let json = serde_json::to_value(channel_forecast::PredictionResult {
        predictions: vec![1.5],
        dates: vec!["2024-01-01".to_string()],
        plot: None,
    })
    .unwrap();
    assert_eq!(
        json,
        serde_json::json!({"predictions": [1.5], "dates": ["2024-01-01"], "plot": null})
    );
}
