//! Seasonal regression forecaster
//!
//! A decomposable model in the style of Prophet:
//!
//! ```text
//! yhat(t) = trend(t) * (1 + X_mult(t) · β_mult) + X_add(t) · β_add
//! ```
//!
//! `trend` is piecewise linear with changepoints spread over the first part
//! of the history. The feature blocks are Fourier seasonality terms, US
//! federal holiday indicators and standardized exogenous regressors, each
//! placed on the additive or multiplicative side by its mode. Prior scales
//! become ridge penalties and the two sides are fitted by alternating
//! regularized least squares.

use super::holidays::{holiday_on, US_FEDERAL_HOLIDAYS};
use super::{artifact_timestamp, require_file, Forecaster};
use crate::data::{format_date, parse_date, FeatureTable};
use crate::error::{ForecastError, Result};
use chrono::{Duration, NaiveDate};
use forecast_math::fourier::fourier_terms;
use forecast_math::linalg::ridge_solve;
use ndarray::{s, Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Structured snapshot file
pub const SNAPSHOT_FILE: &str = "model.json";
/// Binary fitted state file
pub const STATE_FILE: &str = "model.pkl";

const FIT_ROUNDS: usize = 10;
const FIT_TOLERANCE: f64 = 1e-8;
const TREND_PRIOR_SCALE: f64 = 5.0;

/// Whether a component scales the trend or adds to it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeasonalityMode {
    Additive,
    #[default]
    Multiplicative,
}

/// One Fourier seasonal component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Seasonality {
    pub name: String,
    /// Period in days
    pub period: f64,
    pub fourier_order: usize,
    pub prior_scale: f64,
    pub mode: SeasonalityMode,
}

/// An exogenous regressor column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressorSpec {
    pub name: String,
    pub mode: SeasonalityMode,
    pub prior_scale: f64,
}

impl RegressorSpec {
    pub fn new(name: &str, mode: SeasonalityMode) -> Self {
        Self {
            name: name.to_string(),
            mode,
            prior_scale: 10.0,
        }
    }
}

/// Hyperparameters of the seasonal model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonalConfig {
    pub seasonality_mode: SeasonalityMode,
    pub yearly_seasonality: bool,
    pub weekly_seasonality: bool,
    pub daily_seasonality: bool,
    pub n_changepoints: usize,
    /// Fraction of the history in which changepoints may be placed
    pub changepoint_range: f64,
    pub changepoint_prior_scale: f64,
    pub seasonality_prior_scale: f64,
    pub holidays_prior_scale: f64,
    /// Coverage of the uncertainty interval
    pub interval_width: f64,
    /// Include the US federal holiday calendar
    pub holidays: bool,
    pub regressors: Vec<RegressorSpec>,
}

impl Default for SeasonalConfig {
    fn default() -> Self {
        use SeasonalityMode::{Additive, Multiplicative};
        Self {
            seasonality_mode: Multiplicative,
            yearly_seasonality: true,
            weekly_seasonality: true,
            daily_seasonality: true,
            n_changepoints: 25,
            changepoint_range: 0.8,
            changepoint_prior_scale: 0.05,
            seasonality_prior_scale: 10.0,
            holidays_prior_scale: 10.0,
            interval_width: 0.8,
            holidays: true,
            regressors: vec![
                RegressorSpec::new("clicks", Multiplicative),
                RegressorSpec::new("impressions", Multiplicative),
                RegressorSpec::new("ctr", Multiplicative),
                RegressorSpec::new("cost_per_click", Additive),
                RegressorSpec::new("conversion_rate", Multiplicative),
                RegressorSpec::new("roi", Multiplicative),
            ],
        }
    }
}

impl SeasonalConfig {
    /// Enabled seasonal components.
    pub fn seasonalities(&self) -> Vec<Seasonality> {
        let component = |name: &str, period: f64, fourier_order: usize| Seasonality {
            name: name.to_string(),
            period,
            fourier_order,
            prior_scale: self.seasonality_prior_scale,
            mode: self.seasonality_mode,
        };

        let mut components = Vec::new();
        if self.yearly_seasonality {
            components.push(component("yearly", 365.25, 10));
        }
        if self.weekly_seasonality {
            components.push(component("weekly", 7.0, 3));
        }
        if self.daily_seasonality {
            components.push(component("daily", 1.0, 4));
        }
        components
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.changepoint_range > 0.0 && self.changepoint_range <= 1.0) {
            return Err(ForecastError::InvalidParameter(format!(
                "changepoint_range must be in (0, 1], got {}",
                self.changepoint_range
            )));
        }
        if !(self.interval_width > 0.0 && self.interval_width < 1.0) {
            return Err(ForecastError::InvalidParameter(format!(
                "interval_width must be in (0, 1), got {}",
                self.interval_width
            )));
        }
        let scales = [
            self.changepoint_prior_scale,
            self.seasonality_prior_scale,
            self.holidays_prior_scale,
        ];
        if scales
            .iter()
            .chain(self.regressors.iter().map(|r| &r.prior_scale))
            .any(|s| *s <= 0.0 || !s.is_finite())
        {
            return Err(ForecastError::InvalidParameter(
                "Prior scales must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Rebuild the configuration a snapshot was written from.
    pub fn from_snapshot(snapshot: &SeasonalSnapshot) -> Self {
        Self {
            seasonality_mode: snapshot.seasonality_mode,
            yearly_seasonality: snapshot.yearly_seasonality,
            weekly_seasonality: snapshot.weekly_seasonality,
            daily_seasonality: snapshot.daily_seasonality,
            n_changepoints: snapshot.n_changepoints,
            changepoint_range: snapshot.changepoint_range,
            changepoint_prior_scale: snapshot.changepoint_prior_scale,
            seasonality_prior_scale: snapshot.seasonality_prior_scale,
            holidays_prior_scale: snapshot.holidays_prior_scale,
            interval_width: snapshot.interval_width,
            holidays: !snapshot.holidays.is_empty(),
            regressors: snapshot
                .extra_regressors
                .iter()
                .map(|r| RegressorSpec {
                    name: r.name.clone(),
                    mode: r.mode,
                    prior_scale: r.prior_scale,
                })
                .collect(),
        }
    }
}

/// Standardization of one fitted regressor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedRegressor {
    pub name: String,
    pub mode: SeasonalityMode,
    pub prior_scale: f64,
    /// False for 0/1 indicator columns
    pub standardize: bool,
    pub mu: f64,
    pub std: f64,
}

impl FittedRegressor {
    fn transform(&self, value: f64) -> f64 {
        (value - self.mu) / self.std
    }
}

/// Date coverage of the fitted history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySummary {
    pub start: String,
    pub end: String,
    pub rows: usize,
}

/// Human-readable description of a fitted model, written as `model.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonalSnapshot {
    pub growth: String,
    pub seasonality_mode: SeasonalityMode,
    pub yearly_seasonality: bool,
    pub weekly_seasonality: bool,
    pub daily_seasonality: bool,
    pub n_changepoints: usize,
    pub changepoint_range: f64,
    pub changepoint_prior_scale: f64,
    pub seasonality_prior_scale: f64,
    pub holidays_prior_scale: f64,
    pub interval_width: f64,
    /// Changepoint dates actually used
    pub changepoints: Vec<String>,
    pub seasonalities: Vec<Seasonality>,
    pub extra_regressors: Vec<FittedRegressor>,
    pub holidays: Vec<String>,
    pub history: HistorySummary,
    pub timestamp: String,
}

/// Point forecast with uncertainty bounds
#[derive(Debug, Clone, PartialEq)]
pub struct SeasonalForecast {
    pub dates: Vec<NaiveDate>,
    pub yhat: Vec<f64>,
    pub yhat_lower: Vec<f64>,
    pub yhat_upper: Vec<f64>,
}

/// Outcome of a seasonal fit
#[derive(Debug, Clone, PartialEq)]
pub struct SeasonalFit {
    pub rows: usize,
    pub changepoints: usize,
    /// In-sample residual standard deviation
    pub sigma: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FittedState {
    start: NaiveDate,
    end: NaiveDate,
    rows: usize,
    span_days: f64,
    changepoints: Vec<f64>,
    changepoint_dates: Vec<NaiveDate>,
    theta: Vec<f64>,
    beta_additive: Vec<f64>,
    beta_multiplicative: Vec<f64>,
    regressors: Vec<FittedRegressor>,
    regressor_defaults: BTreeMap<String, f64>,
    y_scale: f64,
    sigma: f64,
}

#[derive(Serialize, Deserialize)]
struct PersistedModel {
    config: SeasonalConfig,
    state: FittedState,
}

/// Feature blocks split by mode, with their ridge penalties
struct Design {
    additive: Array2<f64>,
    additive_penalty: Vec<f64>,
    multiplicative: Array2<f64>,
    multiplicative_penalty: Vec<f64>,
}

/// The statistical base forecaster
#[derive(Debug, Clone, PartialEq)]
pub struct SeasonalForecaster {
    config: SeasonalConfig,
    state: Option<FittedState>,
}

impl Default for SeasonalForecaster {
    fn default() -> Self {
        Self::new(SeasonalConfig::default())
    }
}

impl SeasonalForecaster {
    pub fn new(config: SeasonalConfig) -> Self {
        Self {
            config,
            state: None,
        }
    }

    pub fn config(&self) -> &SeasonalConfig {
        &self.config
    }

    pub fn is_fitted(&self) -> bool {
        self.state.is_some()
    }

    /// Regressor columns the fitted model needs at prediction time.
    pub fn regressor_names(&self) -> Vec<String> {
        self.config.regressors.iter().map(|r| r.name.clone()).collect()
    }

    /// Training means of each regressor, in feature space.
    pub fn regressor_defaults(&self) -> Option<&BTreeMap<String, f64>> {
        self.state.as_ref().map(|s| &s.regressor_defaults)
    }

    /// Last date of the fitted history.
    pub fn history_end(&self) -> Option<NaiveDate> {
        self.state.as_ref().map(|s| s.end)
    }

    /// Structured description of the fitted model.
    pub fn snapshot(&self) -> Result<SeasonalSnapshot> {
        let state = self.fitted_state()?;
        Ok(SeasonalSnapshot {
            growth: "linear".to_string(),
            seasonality_mode: self.config.seasonality_mode,
            yearly_seasonality: self.config.yearly_seasonality,
            weekly_seasonality: self.config.weekly_seasonality,
            daily_seasonality: self.config.daily_seasonality,
            n_changepoints: self.config.n_changepoints,
            changepoint_range: self.config.changepoint_range,
            changepoint_prior_scale: self.config.changepoint_prior_scale,
            seasonality_prior_scale: self.config.seasonality_prior_scale,
            holidays_prior_scale: self.config.holidays_prior_scale,
            interval_width: self.config.interval_width,
            changepoints: state.changepoint_dates.iter().map(format_date).collect(),
            seasonalities: self.config.seasonalities(),
            extra_regressors: state.regressors.clone(),
            holidays: if self.config.holidays {
                US_FEDERAL_HOLIDAYS.iter().map(|h| h.to_string()).collect()
            } else {
                Vec::new()
            },
            history: HistorySummary {
                start: format_date(&state.start),
                end: format_date(&state.end),
                rows: state.rows,
            },
            timestamp: artifact_timestamp(),
        })
    }

    fn fitted_state(&self) -> Result<&FittedState> {
        self.state
            .as_ref()
            .ok_or_else(|| ForecastError::Model("Seasonal model has not been fitted".to_string()))
    }

    fn fit_table(&mut self, table: &FeatureTable) -> Result<SeasonalFit> {
        self.config.validate()?;
        let dates = table.dates()?;
        let y = Array1::from(table.target()?);
        let n = dates.len();
        if n < 2 {
            return Err(ForecastError::DataValidation(format!(
                "Seasonal model needs at least 2 rows, got {}",
                n
            )));
        }

        let start = dates[0];
        let end = dates[n - 1];
        let span_days = ((end - start).num_days() as f64).max(1.0);
        let t: Vec<f64> = dates
            .iter()
            .map(|d| (*d - start).num_days() as f64 / span_days)
            .collect();

        let changepoint_rows =
            changepoint_rows(n, self.config.n_changepoints, self.config.changepoint_range);
        let changepoints: Vec<f64> = changepoint_rows.iter().map(|&i| t[i]).collect();
        let changepoint_dates: Vec<NaiveDate> = changepoint_rows.iter().map(|&i| dates[i]).collect();

        // Only regressors present in the table take part in the fit.
        let (present, absent): (Vec<RegressorSpec>, Vec<RegressorSpec>) = self
            .config
            .regressors
            .iter()
            .cloned()
            .partition(|r| table.has_column(&r.name));
        if !absent.is_empty() {
            debug!(
                skipped = ?absent.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(),
                "Regressor columns not present, fitting without them"
            );
        }
        self.config.regressors = present;

        let mut regressors = Vec::with_capacity(self.config.regressors.len());
        let mut regressor_defaults = BTreeMap::new();
        for spec in &self.config.regressors {
            let values = table.column(&spec.name)?;
            regressor_defaults.insert(spec.name.clone(), mean(&values));
            regressors.push(fit_standardization(spec, &values));
        }

        let y_scale = y.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
        let y_scale = if y_scale > 0.0 { y_scale } else { 1.0 };
        let y_scaled = &y / y_scale;

        let trend = trend_matrix(&t, &changepoints);
        let design = self.design(&dates, start, table, &regressors)?;
        let mut trend_penalty = vec![1.0 / TREND_PRIOR_SCALE.powi(2); 2];
        trend_penalty.extend(vec![
            1.0 / self.config.changepoint_prior_scale.powi(2);
            changepoints.len()
        ]);

        let (theta, beta_additive, beta_multiplicative) =
            alternating_fit(&trend, &trend_penalty, &design, &y_scaled)?;

        let fitted = combine(&trend, &design, &theta, &beta_additive, &beta_multiplicative) * y_scale;
        let sigma = ((&y - &fitted).mapv(|r| r * r).sum() / n as f64).sqrt();

        info!(
            rows = n,
            changepoints = changepoints.len(),
            regressors = regressors.len(),
            sigma = sigma,
            "Fitted seasonal model"
        );

        let report = SeasonalFit {
            rows: n,
            changepoints: changepoints.len(),
            sigma,
        };
        self.state = Some(FittedState {
            start,
            end,
            rows: n,
            span_days,
            changepoints,
            changepoint_dates,
            theta: theta.to_vec(),
            beta_additive: beta_additive.to_vec(),
            beta_multiplicative: beta_multiplicative.to_vec(),
            regressors,
            regressor_defaults,
            y_scale,
            sigma,
        });
        Ok(report)
    }

    fn predict_table(&self, table: &FeatureTable) -> Result<SeasonalForecast> {
        let state = self.fitted_state()?;
        let missing: Vec<&str> = state
            .regressors
            .iter()
            .filter(|r| !table.has_column(&r.name))
            .map(|r| r.name.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(ForecastError::ConfigurationMismatch(format!(
                "Prediction input is missing regressor columns: {}",
                missing.join(", ")
            )));
        }

        let dates = table.dates()?;
        let t: Vec<f64> = dates
            .iter()
            .map(|d| (*d - state.start).num_days() as f64 / state.span_days)
            .collect();
        let trend = trend_matrix(&t, &state.changepoints);
        let design = self.design(&dates, state.start, table, &state.regressors)?;

        let yhat = combine(
            &trend,
            &design,
            &Array1::from(state.theta.clone()),
            &Array1::from(state.beta_additive.clone()),
            &Array1::from(state.beta_multiplicative.clone()),
        ) * state.y_scale;

        let z = interval_z(self.config.interval_width)?;
        let margin = z * state.sigma;
        Ok(SeasonalForecast {
            yhat_lower: yhat.iter().map(|v| v - margin).collect(),
            yhat_upper: yhat.iter().map(|v| v + margin).collect(),
            yhat: yhat.to_vec(),
            dates,
        })
    }

    fn design(
        &self,
        dates: &[NaiveDate],
        start: NaiveDate,
        table: &FeatureTable,
        regressors: &[FittedRegressor],
    ) -> Result<Design> {
        let n = dates.len();
        let t_days: Vec<f64> = dates.iter().map(|d| (*d - start).num_days() as f64).collect();

        let mut additive: Vec<Array1<f64>> = Vec::new();
        let mut additive_penalty = Vec::new();
        let mut multiplicative: Vec<Array1<f64>> = Vec::new();
        let mut multiplicative_penalty = Vec::new();
        let mut push = |column: Array1<f64>, mode: SeasonalityMode, prior_scale: f64| {
            let penalty = 1.0 / prior_scale.powi(2);
            match mode {
                SeasonalityMode::Additive => {
                    additive.push(column);
                    additive_penalty.push(penalty);
                }
                SeasonalityMode::Multiplicative => {
                    multiplicative.push(column);
                    multiplicative_penalty.push(penalty);
                }
            }
        };

        for seasonality in self.config.seasonalities() {
            let terms = fourier_terms(&t_days, seasonality.period, seasonality.fourier_order)?;
            for column in terms.columns() {
                push(column.to_owned(), seasonality.mode, seasonality.prior_scale);
            }
        }

        if self.config.holidays {
            let observed: Vec<Option<&str>> = dates.iter().map(|d| holiday_on(*d)).collect();
            for name in US_FEDERAL_HOLIDAYS {
                let column = Array1::from_iter(
                    observed
                        .iter()
                        .map(|h| if *h == Some(name) { 1.0 } else { 0.0 }),
                );
                push(
                    column,
                    self.config.seasonality_mode,
                    self.config.holidays_prior_scale,
                );
            }
        }

        for regressor in regressors {
            let values = table.column(&regressor.name)?;
            let column = Array1::from_iter(values.iter().map(|v| regressor.transform(*v)));
            push(column, regressor.mode, regressor.prior_scale);
        }

        Ok(Design {
            additive: stack_columns(n, &additive),
            additive_penalty,
            multiplicative: stack_columns(n, &multiplicative),
            multiplicative_penalty,
        })
    }
}

impl Forecaster for SeasonalForecaster {
    type TrainInput = FeatureTable;
    type PredictInput = FeatureTable;
    type Prediction = SeasonalForecast;
    type FitReport = SeasonalFit;

    const ARTIFACT_DIR: &'static str = "prophet";

    /// Fit on every row of `data`, replacing any earlier fit.
    fn fit(&mut self, data: &FeatureTable) -> Result<SeasonalFit> {
        self.fit_table(data)
    }

    fn predict(&self, data: &FeatureTable) -> Result<SeasonalForecast> {
        self.predict_table(data)
    }

    fn save(&self, dir: &Path) -> Result<()> {
        let state = self.fitted_state()?;
        let snapshot = self.snapshot()?;
        fs::write(dir.join(SNAPSHOT_FILE), serde_json::to_string_pretty(&snapshot)?)?;

        let persisted = PersistedModel {
            config: self.config.clone(),
            state: state.clone(),
        };
        fs::write(dir.join(STATE_FILE), bincode::serialize(&persisted)?)?;
        Ok(())
    }

    fn load(dir: &Path) -> Result<Self> {
        let snapshot_path = dir.join(SNAPSHOT_FILE);
        let state_path = dir.join(STATE_FILE);
        require_file(&snapshot_path)?;
        require_file(&state_path)?;

        let snapshot: SeasonalSnapshot = serde_json::from_str(&fs::read_to_string(&snapshot_path)?)?;
        let persisted: PersistedModel = bincode::deserialize(&fs::read(&state_path)?)?;

        if SeasonalConfig::from_snapshot(&snapshot) != persisted.config {
            return Err(ForecastError::ConfigurationMismatch(format!(
                "{} and {} describe different configurations",
                snapshot_path.display(),
                state_path.display()
            )));
        }
        if parse_date(&snapshot.history.end)? != persisted.state.end {
            return Err(ForecastError::ConfigurationMismatch(format!(
                "{} does not describe the fitted history in {}",
                snapshot_path.display(),
                state_path.display()
            )));
        }

        Ok(Self {
            config: persisted.config,
            state: Some(persisted.state),
        })
    }
}

/// History rows at which changepoints are placed.
///
/// Evenly spaced over the first `range` fraction of the history, skipping
/// the first row.
fn changepoint_rows(n: usize, requested: usize, range: f64) -> Vec<usize> {
    let hist_size = (n as f64 * range).floor() as usize;
    if hist_size < 2 || requested == 0 {
        return Vec::new();
    }
    let count = requested.min(hist_size - 1);
    let step = (hist_size - 1) as f64 / count as f64;
    let mut rows: Vec<usize> = (1..=count).map(|i| (i as f64 * step).round() as usize).collect();
    rows.dedup();
    rows
}

/// `[1, t, max(t - s_j, 0)...]`
fn trend_matrix(t: &[f64], changepoints: &[f64]) -> Array2<f64> {
    Array2::from_shape_fn((t.len(), 2 + changepoints.len()), |(row, col)| match col {
        0 => 1.0,
        1 => t[row],
        j => (t[row] - changepoints[j - 2]).max(0.0),
    })
}

fn stack_columns(rows: usize, columns: &[Array1<f64>]) -> Array2<f64> {
    Array2::from_shape_fn((rows, columns.len()), |(row, col)| columns[col][row])
}

fn combine(
    trend: &Array2<f64>,
    design: &Design,
    theta: &Array1<f64>,
    beta_additive: &Array1<f64>,
    beta_multiplicative: &Array1<f64>,
) -> Array1<f64> {
    let base = trend.dot(theta);
    let multiplier = design.multiplicative.dot(beta_multiplicative) + 1.0;
    base * multiplier + design.additive.dot(beta_additive)
}

// Alternate between the trend plus additive block (linear given the
// multiplier) and the multiplicative block (linear given the trend).
fn alternating_fit(
    trend: &Array2<f64>,
    trend_penalty: &[f64],
    design: &Design,
    y: &Array1<f64>,
) -> Result<(Array1<f64>, Array1<f64>, Array1<f64>)> {
    let n = y.len();
    let p_trend = trend.ncols();
    let p_add = design.additive.ncols();
    let p_mult = design.multiplicative.ncols();

    let mut penalties = trend_penalty.to_vec();
    penalties.extend_from_slice(&design.additive_penalty);
    let penalties = Array1::from(penalties);
    let mult_penalties = Array1::from(design.multiplicative_penalty.clone());

    let mut theta = Array1::<f64>::zeros(p_trend);
    let mut beta_additive = Array1::<f64>::zeros(p_add);
    let mut beta_multiplicative = Array1::<f64>::zeros(p_mult);

    for round in 0..FIT_ROUNDS {
        let multiplier = design.multiplicative.dot(&beta_multiplicative) + 1.0;
        let mut joint = Array2::<f64>::zeros((n, p_trend + p_add));
        joint
            .slice_mut(s![.., ..p_trend])
            .assign(&(trend * &multiplier.view().insert_axis(Axis(1))));
        joint.slice_mut(s![.., p_trend..]).assign(&design.additive);

        let solution = ridge_solve(joint.view(), y.view(), penalties.view())?;
        theta = solution.slice(s![..p_trend]).to_owned();
        beta_additive = solution.slice(s![p_trend..]).to_owned();

        if p_mult == 0 {
            break;
        }

        let base = trend.dot(&theta);
        let residual = y - &base - design.additive.dot(&beta_additive);
        let scaled = &design.multiplicative * &base.view().insert_axis(Axis(1));
        let updated = ridge_solve(scaled.view(), residual.view(), mult_penalties.view())?;

        let change = (&updated - &beta_multiplicative)
            .iter()
            .fold(0.0_f64, |acc, d| acc.max(d.abs()));
        beta_multiplicative = updated;
        debug!(round = round, change = change, "Seasonal fit round");
        if change < FIT_TOLERANCE {
            break;
        }
    }

    Ok((theta, beta_additive, beta_multiplicative))
}

fn fit_standardization(spec: &RegressorSpec, values: &[f64]) -> FittedRegressor {
    let binary = values.iter().all(|v| *v == 0.0 || *v == 1.0);
    let (standardize, mu, std) = if binary {
        (false, 0.0, 1.0)
    } else {
        let mu = mean(values);
        let std = sample_std(values, mu);
        (true, mu, if std > 0.0 { std } else { 1.0 })
    };
    FittedRegressor {
        name: spec.name.clone(),
        mode: spec.mode,
        prior_scale: spec.prior_scale,
        standardize,
        mu,
        std,
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn sample_std(values: &[f64], mu: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let ss: f64 = values.iter().map(|v| (v - mu).powi(2)).sum();
    (ss / (values.len() - 1) as f64).sqrt()
}

/// Two-sided standard normal quantile for the interval width.
fn interval_z(width: f64) -> Result<f64> {
    let normal = Normal::new(0.0, 1.0).map_err(|e| ForecastError::Model(e.to_string()))?;
    Ok(normal.inverse_cdf(0.5 + width / 2.0))
}

/// Dates `days` after the end of the fitted history.
pub fn future_dates(model: &SeasonalForecaster, days: usize) -> Result<Vec<NaiveDate>> {
    let end = model
        .history_end()
        .ok_or_else(|| ForecastError::Model("Seasonal model has not been fitted".to_string()))?;
    Ok((1..=days as i64).map(|d| end + Duration::days(d)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_changepoint_rows() {
        let rows = changepoint_rows(100, 25, 0.8);
        assert_eq!(rows.len(), 25);
        assert!(rows.iter().all(|&r| r > 0 && r < 80));
        assert!(rows.windows(2).all(|w| w[0] < w[1]));

        // short histories get fewer changepoints
        assert_eq!(changepoint_rows(10, 25, 0.8).len(), 7);
        assert!(changepoint_rows(2, 25, 0.8).is_empty());
    }

    #[test]
    fn test_trend_matrix_hinges() {
        let m = trend_matrix(&[0.0, 0.5, 1.0], &[0.5]);
        assert_eq!(m.dim(), (3, 3));
        assert_eq!(m[[0, 2]], 0.0);
        assert_eq!(m[[1, 2]], 0.0);
        assert_approx_eq!(m[[2, 2]], 0.5);
    }

    #[test]
    fn test_interval_z_for_80_percent() {
        assert_approx_eq!(interval_z(0.8).unwrap(), 1.2816, 1e-3);
    }

    #[test]
    fn test_binary_regressor_not_standardized() {
        let spec = RegressorSpec::new("promo", SeasonalityMode::Additive);
        let fitted = fit_standardization(&spec, &[0.0, 1.0, 1.0, 0.0]);
        assert!(!fitted.standardize);
        assert_eq!(fitted.transform(1.0), 1.0);

        let constant = fit_standardization(&spec, &[3.0, 3.0, 3.0]);
        assert!(constant.standardize);
        assert_eq!(constant.std, 1.0);
    }
}
