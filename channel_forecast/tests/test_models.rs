use assert_approx_eq::assert_approx_eq;
use channel_forecast::data::{
    generate_synthetic_events, write_events_csv, FeatureEngineer, FeatureTable, SyntheticConfig,
};
use channel_forecast::error::ForecastError;
use channel_forecast::models::blender::MetaBlender;
use channel_forecast::models::recurrent::{FitOptions, NetworkConfig, RecurrentForecaster};
use channel_forecast::models::seasonal::{
    future_dates, RegressorSpec, SeasonalConfig, SeasonalForecaster, SeasonalityMode,
};
use channel_forecast::models::Forecaster;
use channel_forecast::window::SequenceWindower;
use chrono::{Duration, NaiveDate};
use forecast_math::RegressionMetrics;
use ndarray::Array3;
use pretty_assertions::assert_eq;
use std::f64::consts::PI;
use std::fs;
use tempfile::tempdir;

fn start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
}

fn clicks_at(t: usize) -> f64 {
    ((t * 37) % 11) as f64 / 10.0
}

fn seasonal_table(offset: usize, rows: usize) -> FeatureTable {
    let dates: Vec<NaiveDate> = (offset..offset + rows)
        .map(|t| start_date() + Duration::days(t as i64))
        .collect();
    let y = (offset..offset + rows)
        .map(|t| 50.0 + 0.1 * t as f64 + 5.0 * (2.0 * PI * t as f64 / 7.0).sin() + 2.0 * clicks_at(t))
        .collect();
    let clicks = (offset..offset + rows).map(clicks_at).collect();
    FeatureTable::from_columns(&dates, vec![("y", y), ("clicks", clicks)]).unwrap()
}

fn additive_config() -> SeasonalConfig {
    SeasonalConfig {
        seasonality_mode: SeasonalityMode::Additive,
        yearly_seasonality: false,
        daily_seasonality: false,
        holidays: false,
        regressors: vec![RegressorSpec::new("clicks", SeasonalityMode::Additive)],
        ..SeasonalConfig::default()
    }
}

fn synthetic_table(days: usize) -> FeatureTable {
    let dir = tempdir().unwrap();
    let path = dir.path().join("events.csv");
    let config = SyntheticConfig {
        days,
        channels: vec!["Facebook".to_string()],
        ..SyntheticConfig::default()
    };
    write_events_csv(&path, &generate_synthetic_events(&config).unwrap()).unwrap();
    FeatureEngineer::new().prepare(&path, Some("Facebook")).unwrap()
}

fn small_network() -> NetworkConfig {
    NetworkConfig {
        hidden_units: 4,
        dropout_rate: 0.0,
        learning_rate: 0.01,
        ..NetworkConfig::default()
    }
}

#[test]
fn test_artifact_directories() {
    assert_eq!(SeasonalForecaster::ARTIFACT_DIR, "prophet");
    assert_eq!(RecurrentForecaster::ARTIFACT_DIR, "lstm");
    assert_eq!(MetaBlender::ARTIFACT_DIR, "meta_model");
    assert_eq!(SeasonalForecaster::default().name(), "prophet");
}

#[test]
fn test_seasonal_fits_trend_weekly_and_regressor() {
    let history = seasonal_table(0, 120);
    let mut model = SeasonalForecaster::new(additive_config());
    let report = model.fit(&history).unwrap();
    assert_eq!(report.rows, 120);

    let in_sample = model.predict(&history).unwrap();
    let metrics = RegressionMetrics::evaluate(&history.target().unwrap(), &in_sample.yhat).unwrap();
    assert!(metrics.rmse < 1.0, "in-sample {}", metrics);

    let future = seasonal_table(120, 14);
    let forecast = model.predict(&future).unwrap();
    assert_eq!(forecast.yhat.len(), 14);
    assert_eq!(forecast.dates, future.dates().unwrap());
    for k in 0..14 {
        assert!(forecast.yhat_lower[k] < forecast.yhat[k]);
        assert!(forecast.yhat[k] < forecast.yhat_upper[k]);
    }
    let metrics = RegressionMetrics::evaluate(&future.target().unwrap(), &forecast.yhat).unwrap();
    assert!(metrics.rmse < 3.0, "out-of-sample {}", metrics);
}

#[test]
fn test_seasonal_requires_fitted_regressors() {
    let mut model = SeasonalForecaster::new(additive_config());
    model.fit(&seasonal_table(0, 60)).unwrap();

    let dates: Vec<NaiveDate> = (0..5).map(|d| start_date() + Duration::days(60 + d)).collect();
    let bare = FeatureTable::from_columns(&dates, vec![]).unwrap();
    assert!(matches!(
        model.predict(&bare),
        Err(ForecastError::ConfigurationMismatch(_))
    ));
}

#[test]
fn test_seasonal_keeps_only_present_regressors() {
    let mut model = SeasonalForecaster::default();
    model.fit(&seasonal_table(0, 60)).unwrap();
    assert_eq!(model.regressor_names(), vec!["clicks".to_string()]);

    let defaults = model.regressor_defaults().unwrap();
    let mean = (0..60).map(clicks_at).sum::<f64>() / 60.0;
    assert_approx_eq!(defaults["clicks"], mean);
}

#[test]
fn test_seasonal_unfitted_errors() {
    let model = SeasonalForecaster::default();
    assert!(model.predict(&seasonal_table(0, 5)).is_err());
    assert!(model.snapshot().is_err());
    assert!(future_dates(&model, 3).is_err());
}

#[test]
fn test_seasonal_snapshot_round_trip() {
    let table = synthetic_table(90);
    let config = SeasonalConfig::default();
    let mut model = SeasonalForecaster::new(config.clone());
    model.fit(&table).unwrap();

    let dir = tempdir().unwrap();
    model.save(dir.path()).unwrap();

    let loaded = SeasonalForecaster::load(dir.path()).unwrap();
    assert_eq!(loaded.config(), &config);
    assert_eq!(SeasonalConfig::from_snapshot(&loaded.snapshot().unwrap()), config);
    assert_eq!(
        loaded.predict(&table).unwrap().yhat,
        model.predict(&table).unwrap().yhat
    );

    let snapshot: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("model.json")).unwrap()).unwrap();
    assert_eq!(snapshot["seasonality_mode"], "multiplicative");
    assert_eq!(snapshot["extra_regressors"].as_array().unwrap().len(), 6);
    assert_eq!(snapshot["holidays"].as_array().unwrap().len(), 11);
    assert!(!snapshot["changepoints"].as_array().unwrap().is_empty());
}

#[test]
fn test_seasonal_detects_edited_snapshot() {
    let mut model = SeasonalForecaster::new(additive_config());
    model.fit(&seasonal_table(0, 60)).unwrap();
    let dir = tempdir().unwrap();
    model.save(dir.path()).unwrap();

    let path = dir.path().join("model.json");
    let mut snapshot: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    snapshot["n_changepoints"] = serde_json::json!(3);
    fs::write(&path, snapshot.to_string()).unwrap();

    assert!(matches!(
        SeasonalForecaster::load(dir.path()),
        Err(ForecastError::ConfigurationMismatch(_))
    ));
}

#[test]
fn test_seasonal_missing_artifact() {
    let dir = tempdir().unwrap();
    assert!(matches!(
        SeasonalForecaster::load(dir.path()),
        Err(ForecastError::ArtifactNotFound(_))
    ));
}

#[test]
fn test_future_dates_follow_history() {
    let mut model = SeasonalForecaster::new(additive_config());
    model.fit(&seasonal_table(0, 30)).unwrap();
    let dates = future_dates(&model, 3).unwrap();
    assert_eq!(dates[0], start_date() + Duration::days(30));
    assert_eq!(dates.len(), 3);
}

#[test]
fn test_recurrent_learns_and_persists() {
    let table = seasonal_table(0, 80);
    let columns = vec!["clicks".to_string()];
    let windows = SequenceWindower::new(5).unwrap().window(&table, &columns).unwrap();

    let mut model = RecurrentForecaster::new(5, 1, small_network()).unwrap();
    let options = FitOptions {
        epochs: 5,
        batch_size: 8,
        validation_split: 0.2,
        shuffle: true,
        seed: 3,
    };
    let history = model.fit_windows(&windows, &options).unwrap();
    assert_eq!(history.loss.len(), 5);
    assert_eq!(history.val_loss.len(), 5);
    assert!(history.loss.iter().all(|l| l.is_finite()));

    let dir = tempdir().unwrap();
    model.save(dir.path()).unwrap();
    let loaded = RecurrentForecaster::load(dir.path()).unwrap();
    assert_eq!(loaded.input_shape(), (5, 1));
    assert_eq!(
        loaded.predict(&windows.inputs).unwrap(),
        model.predict(&windows.inputs).unwrap()
    );

    let description: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("config.json")).unwrap()).unwrap();
    assert_eq!(description["input_shape"], serde_json::json!([5, 1]));
}

#[test]
fn test_recurrent_continues_training() {
    let table = seasonal_table(0, 60);
    let columns = vec!["clicks".to_string()];
    let windows = SequenceWindower::new(4).unwrap().window(&table, &columns).unwrap();
    let options = FitOptions {
        epochs: 2,
        validation_split: 0.0,
        ..FitOptions::default()
    };

    let mut model = RecurrentForecaster::new(4, 1, small_network()).unwrap();
    model.fit_windows(&windows, &options).unwrap();
    let dir = tempdir().unwrap();
    model.save(dir.path()).unwrap();

    let mut resumed = RecurrentForecaster::load(dir.path()).unwrap();
    model.fit_windows(&windows, &options).unwrap();
    resumed.fit_windows(&windows, &options).unwrap();
    assert_eq!(
        resumed.predict(&windows.inputs).unwrap(),
        model.predict(&windows.inputs).unwrap()
    );
}

#[test]
fn test_recurrent_rejects_wrong_shape() {
    let model = RecurrentForecaster::new(5, 2, small_network()).unwrap();
    let inputs = Array3::<f64>::zeros((3, 4, 2));
    assert!(matches!(
        model.predict(&inputs),
        Err(ForecastError::ConfigurationMismatch(_))
    ));
    assert!(RecurrentForecaster::new(0, 2, small_network()).is_err());
}
