//! Raw event ingestion and daily feature tables
//!
//! Raw marketing events are read with polars, filtered to one channel and
//! aggregated into one row per date. The resulting [`FeatureTable`] always
//! carries the `ds` date column, the `y` target and the six regressor
//! columns in [`REGRESSOR_COLUMNS`].

use crate::config::MIN_CHANNEL_ROWS;
use crate::error::{ForecastError, Result};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use polars::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;
use tracing::{debug, info};

/// Columns every raw event file must provide
pub const REQUIRED_COLUMNS: [&str; 9] = [
    "Date",
    "Channel_Used",
    "Engagement_Score",
    "Clicks",
    "Impressions",
    "Conversion_Rate",
    "Acquisition_Cost",
    "ROI",
    "Target_Audience",
];

/// Date column of a feature table
pub const DATE_COLUMN: &str = "ds";

/// Target column of a feature table
pub const TARGET_COLUMN: &str = "y";

/// Regressor columns produced by the feature engineer, in table order
pub const REGRESSOR_COLUMNS: [&str; 6] = [
    "clicks",
    "impressions",
    "ctr",
    "cost_per_click",
    "conversion_rate",
    "roi",
];

/// Raw numeric columns carried into the per-date aggregation
const NUMERIC_COLUMNS: [&str; 6] = [
    "Engagement_Score",
    "Clicks",
    "Impressions",
    "Conversion_Rate",
    "Acquisition_Cost",
    "ROI",
];

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];
const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// One aggregated day of activity for a channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRecord {
    pub date: NaiveDate,
    /// Mean engagement score
    pub engagement: f64,
    /// Summed clicks
    pub clicks: f64,
    /// Summed impressions
    pub impressions: f64,
    /// Mean conversion rate
    pub conversion_rate: f64,
    /// Mean acquisition cost
    pub acquisition_cost: f64,
    /// Mean ROI
    pub roi: f64,
    pub ctr: f64,
    pub cost_per_click: f64,
}

/// Date-indexed table of a target and its regressors
#[derive(Debug, Clone)]
pub struct FeatureTable {
    df: DataFrame,
}

impl FeatureTable {
    /// Wrap a DataFrame that already has a Utf8 `ds` column.
    pub fn new(df: DataFrame) -> Result<Self> {
        let ds = df
            .column(DATE_COLUMN)
            .map_err(|_| ForecastError::DataValidation("Missing 'ds' column".to_string()))?;
        if ds.dtype() != &DataType::Utf8 {
            return Err(ForecastError::DataValidation(format!(
                "Column 'ds' must hold ISO date strings, found {}",
                ds.dtype()
            )));
        }
        Ok(Self { df })
    }

    /// Build a table from dates and named numeric columns.
    pub fn from_columns(dates: &[NaiveDate], columns: Vec<(&str, Vec<f64>)>) -> Result<Self> {
        let mut series = Vec::with_capacity(columns.len() + 1);
        series.push(Series::new(
            DATE_COLUMN,
            dates.iter().map(format_date).collect::<Vec<String>>(),
        ));
        for (name, values) in columns {
            if values.len() != dates.len() {
                return Err(ForecastError::DataValidation(format!(
                    "Column '{}' has {} values for {} dates",
                    name,
                    values.len(),
                    dates.len()
                )));
            }
            series.push(Series::new(name, values));
        }
        Self::new(DataFrame::new(series)?)
    }

    /// Underlying DataFrame
    pub fn dataframe(&self) -> &DataFrame {
        &self.df
    }

    pub fn into_dataframe(self) -> DataFrame {
        self.df
    }

    pub fn len(&self) -> usize {
        self.df.height()
    }

    pub fn is_empty(&self) -> bool {
        self.df.height() == 0
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.df.get_column_names().contains(&name)
    }

    /// Names of every column other than `ds`.
    pub fn value_columns(&self) -> Vec<String> {
        self.df
            .get_column_names()
            .into_iter()
            .filter(|name| *name != DATE_COLUMN)
            .map(str::to_string)
            .collect()
    }

    /// Names of every column other than `ds` and `y`.
    pub fn feature_columns(&self) -> Vec<String> {
        self.value_columns()
            .into_iter()
            .filter(|name| name != TARGET_COLUMN)
            .collect()
    }

    /// Parsed dates of the `ds` column.
    pub fn dates(&self) -> Result<Vec<NaiveDate>> {
        let ds = self.df.column(DATE_COLUMN)?.utf8()?;
        ds.into_iter()
            .enumerate()
            .map(|(row, value)| match value {
                Some(raw) => parse_date(raw),
                None => Err(ForecastError::DataValidation(format!(
                    "Missing date at row {}",
                    row
                ))),
            })
            .collect()
    }

    /// Values of a numeric column; nulls are rejected.
    pub fn column(&self, name: &str) -> Result<Vec<f64>> {
        let series = self.df.column(name).map_err(|_| {
            ForecastError::DataValidation(format!("Missing column '{}'", name))
        })?;
        let cast = series.cast(&DataType::Float64)?;
        cast.f64()?
            .into_iter()
            .enumerate()
            .map(|(row, value)| {
                value.ok_or_else(|| {
                    ForecastError::DataValidation(format!(
                        "Null value in column '{}' at row {}",
                        name, row
                    ))
                })
            })
            .collect()
    }

    /// The `y` column.
    pub fn target(&self) -> Result<Vec<f64>> {
        self.column(TARGET_COLUMN)
    }

    /// Add or replace a numeric column.
    pub fn set_column(&mut self, name: &str, values: Vec<f64>) -> Result<()> {
        if values.len() != self.len() {
            return Err(ForecastError::DataValidation(format!(
                "Column '{}' has {} values for {} rows",
                name,
                values.len(),
                self.len()
            )));
        }
        self.df.with_column(Series::new(name, values))?;
        Ok(())
    }

    /// Contiguous rows `[offset, offset + len)`.
    pub fn slice(&self, offset: usize, len: usize) -> Self {
        Self {
            df: self.df.slice(offset as i64, len),
        }
    }

    /// Rows at `indices`, in the given order.
    pub fn select_rows(&self, indices: &[usize]) -> Result<Self> {
        let dates = self.dates()?;
        if let Some(&bad) = indices.iter().find(|&&i| i >= dates.len()) {
            return Err(ForecastError::InvalidParameter(format!(
                "Row index {} out of range for {} rows",
                bad,
                dates.len()
            )));
        }

        let picked_dates: Vec<NaiveDate> = indices.iter().map(|&i| dates[i]).collect();
        let mut columns = Vec::new();
        let names = self.value_columns();
        for name in &names {
            let values = self.column(name)?;
            columns.push((name.as_str(), indices.iter().map(|&i| values[i]).collect()));
        }
        Self::from_columns(&picked_dates, columns)
    }

    /// Build the standard feature table from aggregated days.
    ///
    /// Clicks and impressions are log1p transformed, the rate columns are
    /// min-max normalized over the given records.
    pub fn from_records(records: &[DailyRecord]) -> Result<Self> {
        let dates: Vec<NaiveDate> = records.iter().map(|r| r.date).collect();
        let pick = |f: fn(&DailyRecord) -> f64| records.iter().map(f).collect::<Vec<f64>>();

        let columns = vec![
            (TARGET_COLUMN, pick(|r| r.engagement)),
            ("clicks", pick(|r| r.clicks.ln_1p())),
            ("impressions", pick(|r| r.impressions.ln_1p())),
            ("ctr", min_max(&pick(|r| r.ctr))),
            ("cost_per_click", min_max(&pick(|r| r.cost_per_click))),
            ("conversion_rate", min_max(&pick(|r| r.conversion_rate))),
            ("roi", min_max(&pick(|r| r.roi))),
        ];
        Self::from_columns(&dates, columns)
    }
}

/// Loads raw event files and turns them into per-channel feature tables
#[derive(Debug, Clone)]
pub struct FeatureEngineer {
    min_rows: usize,
}

impl Default for FeatureEngineer {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureEngineer {
    pub fn new() -> Self {
        Self {
            min_rows: MIN_CHANNEL_ROWS,
        }
    }

    /// Override the minimum aggregated rows a single channel needs.
    pub fn with_min_rows(mut self, min_rows: usize) -> Self {
        self.min_rows = min_rows;
        self
    }

    /// Read a raw event CSV and check its columns.
    pub fn load_csv<P: AsRef<Path>>(&self, path: P) -> Result<DataFrame> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ForecastError::DataValidation(format!(
                "Data file not found: {}",
                path.display()
            )));
        }
        if std::fs::metadata(path)?.len() == 0 {
            return Err(ForecastError::DataValidation(format!(
                "Data file is empty: {}",
                path.display()
            )));
        }

        info!(path = %path.display(), "Loading raw events");
        let file = File::open(path)?;
        let df = CsvReader::new(file)
            .infer_schema(None)
            .has_header(true)
            .finish()?;

        validate_columns(&df)?;
        Ok(df)
    }

    /// Load, filter, aggregate and derive features in one step.
    pub fn prepare<P: AsRef<Path>>(&self, path: P, channel: Option<&str>) -> Result<FeatureTable> {
        let raw = self.load_csv(path)?;
        self.prepare_frame(raw, channel)
    }

    /// Same as [`FeatureEngineer::prepare`] for an in-memory frame.
    pub fn prepare_frame(&self, raw: DataFrame, channel: Option<&str>) -> Result<FeatureTable> {
        let records = self.aggregate(raw, channel)?;
        let table = FeatureTable::from_records(&records)?;

        if let (Some(first), Some(last)) = (records.first(), records.last()) {
            info!(
                channel = channel.unwrap_or("all"),
                rows = table.len(),
                start = %first.date,
                end = %last.date,
                "Prepared feature table"
            );
        }
        Ok(table)
    }

    /// Aggregate raw events into one record per date, sorted by date.
    pub fn aggregate(&self, raw: DataFrame, channel: Option<&str>) -> Result<Vec<DailyRecord>> {
        validate_columns(&raw)?;
        if raw.height() == 0 {
            return Err(ForecastError::DataValidation(
                "Input contains no rows".to_string(),
            ));
        }
        date_values(raw.column("Date")?)?;

        let frame = match channel {
            Some(name) => {
                let filtered = raw
                    .lazy()
                    .filter(col("Channel_Used").eq(lit(name)))
                    .collect()?;
                if filtered.height() == 0 {
                    return Err(ForecastError::UnknownChannel(name.to_string()));
                }
                filtered
            }
            None => raw,
        };

        let dates = date_values(frame.column("Date")?)?;
        let mut cleaned = vec![Series::new(
            "Date",
            dates.iter().map(format_date).collect::<Vec<String>>(),
        )];
        for name in NUMERIC_COLUMNS {
            cleaned.push(Series::new(name, numeric_values(frame.column(name)?)?));
        }

        // ISO date strings sort chronologically
        let daily = DataFrame::new(cleaned)?
            .lazy()
            .groupby([col("Date")])
            .agg([
                col("Engagement_Score").mean(),
                col("Clicks").sum(),
                col("Impressions").sum(),
                col("Conversion_Rate").mean(),
                col("Acquisition_Cost").mean(),
                col("ROI").mean(),
            ])
            .sort("Date", SortOptions::default())
            .collect()?;

        let days = date_values(daily.column("Date")?)?;
        let engagement = aggregated(&daily, "Engagement_Score")?;
        let clicks = aggregated(&daily, "Clicks")?;
        let impressions = aggregated(&daily, "Impressions")?;
        let conversion = aggregated(&daily, "Conversion_Rate")?;
        let cost = aggregated(&daily, "Acquisition_Cost")?;
        let roi = aggregated(&daily, "ROI")?;

        let records: Vec<DailyRecord> = days
            .into_iter()
            .enumerate()
            .map(|(row, date)| DailyRecord {
                date,
                engagement: engagement[row],
                clicks: clicks[row],
                impressions: impressions[row],
                conversion_rate: conversion[row],
                acquisition_cost: cost[row],
                roi: roi[row],
                ctr: safe_ratio(clicks[row], impressions[row]),
                cost_per_click: safe_ratio(cost[row], clicks[row]),
            })
            .collect();
        debug!(rows = records.len(), "Aggregated raw events by date");

        if let Some(name) = channel {
            if records.len() < self.min_rows {
                return Err(ForecastError::InsufficientData {
                    channel: name.to_string(),
                    rows: records.len(),
                    required: self.min_rows,
                });
            }
        }
        Ok(records)
    }
}

/// Sorted unique channel names in a raw event file.
pub fn get_channels<P: AsRef<Path>>(data_source: P) -> Result<Vec<String>> {
    let raw = FeatureEngineer::new().load_csv(data_source)?;
    let unique = raw.column("Channel_Used")?.cast(&DataType::Utf8)?.unique()?;
    let mut channels: Vec<String> = unique
        .utf8()?
        .into_iter()
        .flatten()
        .map(str::to_string)
        .collect();
    channels.sort();
    Ok(channels)
}

/// Parse a date in any of the accepted input formats.
pub fn parse_date(raw: &str) -> Result<NaiveDate> {
    let trimmed = raw.trim();
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Ok(date);
        }
    }
    for format in DATETIME_FORMATS {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(datetime.date());
        }
    }
    Err(ForecastError::DataValidation(format!(
        "Unparseable date: '{}'",
        raw
    )))
}

/// ISO `YYYY-MM-DD` representation.
pub fn format_date(date: &NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Every day from `start` to `end` inclusive.
pub fn daily_range(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start
        .iter_days()
        .take_while(|day| *day <= end)
        .collect()
}

/// Min-max normalize; a constant column maps to zeros.
pub(crate) fn min_max(values: &[f64]) -> Vec<f64> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max > min {
        values.iter().map(|v| (v - min) / (max - min)).collect()
    } else {
        vec![0.0; values.len()]
    }
}

// Per-date aggregate; a day whose values were all missing becomes 0.
fn aggregated(daily: &DataFrame, name: &str) -> Result<Vec<f64>> {
    let cast = daily.column(name)?.cast(&DataType::Float64)?;
    let values = cast.f64()?.into_iter().map(|v| v.unwrap_or(0.0)).collect();
    Ok(values)
}

fn safe_ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

fn validate_columns(df: &DataFrame) -> Result<()> {
    let names = df.get_column_names();
    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|required| !names.contains(required))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ForecastError::DataValidation(format!(
            "Missing required columns: {}",
            missing.join(", ")
        )))
    }
}

fn date_values(series: &Series) -> Result<Vec<NaiveDate>> {
    let as_text = series.cast(&DataType::Utf8)?;
    as_text
        .utf8()?
        .into_iter()
        .enumerate()
        .map(|(row, value)| match value {
            Some(raw) if !raw.trim().is_empty() => parse_date(raw),
            _ => Err(ForecastError::DataValidation(format!(
                "Missing date at row {}",
                row
            ))),
        })
        .collect()
}

// Currency strings such as "$1,234.50" are accepted for any numeric column.
fn numeric_values(series: &Series) -> Result<Vec<Option<f64>>> {
    if series.dtype() == &DataType::Utf8 {
        return series
            .utf8()?
            .into_iter()
            .map(|value| match value {
                None => Ok(None),
                Some(raw) => {
                    let cleaned: String =
                        raw.chars().filter(|c| *c != '$' && *c != ',').collect();
                    let cleaned = cleaned.trim();
                    if cleaned.is_empty() {
                        Ok(None)
                    } else {
                        cleaned.parse::<f64>().map(Some).map_err(|_| {
                            ForecastError::DataValidation(format!(
                                "Non-numeric value '{}' in column '{}'",
                                raw,
                                series.name()
                            ))
                        })
                    }
                }
            })
            .collect();
    }

    let cast = series.cast(&DataType::Float64)?;
    Ok(cast.f64()?.into_iter().collect())
}

/// Parameters of the synthetic event generator
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticConfig {
    /// Days of history per channel
    pub days: usize,
    /// Events emitted per channel and day
    pub events_per_day: usize,
    pub channels: Vec<String>,
    pub start: NaiveDate,
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            days: 1000,
            events_per_day: 1,
            channels: ["Facebook", "Instagram", "Twitter", "Pinterest"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
            start: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap_or_default(),
            seed: 42,
        }
    }
}

/// One raw event row in the input CSV layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(rename = "Date")]
    pub date: String,
    #[serde(rename = "Channel_Used")]
    pub channel: String,
    #[serde(rename = "Engagement_Score")]
    pub engagement_score: f64,
    #[serde(rename = "Clicks")]
    pub clicks: i64,
    #[serde(rename = "Impressions")]
    pub impressions: i64,
    #[serde(rename = "Conversion_Rate")]
    pub conversion_rate: f64,
    #[serde(rename = "Acquisition_Cost")]
    pub acquisition_cost: String,
    #[serde(rename = "ROI")]
    pub roi: f64,
    #[serde(rename = "Target_Audience")]
    pub target_audience: String,
}

/// Generate raw events with a trend, weekly and monthly cycles, and
/// engagement driven by clicks and impressions.
pub fn generate_synthetic_events(config: &SyntheticConfig) -> Result<Vec<RawEvent>> {
    if config.days == 0 || config.events_per_day == 0 || config.channels.is_empty() {
        return Err(ForecastError::InvalidParameter(
            "Synthetic data needs at least one day, event and channel".to_string(),
        ));
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let normal = |mean: f64, std: f64| {
        Normal::new(mean, std).map_err(|e| ForecastError::InvalidParameter(e.to_string()))
    };
    let clicks_dist = normal(1000.0, 200.0)?;
    let ratio_dist = normal(10.0, 2.0)?;
    let noise_dist = normal(0.0, 2.0)?;
    let conversion_dist = normal(0.08, 0.02)?;
    let cost_dist = normal(5000.0, 1200.0)?;
    let roi_dist = normal(3.0, 1.0)?;
    let audiences = ["Men 18-24", "Women 25-34", "All Ages"];
    let per_event = config.events_per_day as f64;

    let mut events = Vec::with_capacity(config.days * config.events_per_day * config.channels.len());
    for channel in &config.channels {
        for day in 0..config.days {
            let date = config.start + Duration::days(day as i64);
            let t = day as f64;
            let trend = 10.0 * t / (config.days.max(2) - 1) as f64;
            let weekly = 7.0 * (2.0 * std::f64::consts::PI * t / 7.0).sin();
            let monthly = 15.0 * (2.0 * std::f64::consts::PI * t / 30.0).sin();

            for event in 0..config.events_per_day {
                let clicks = clicks_dist.sample(&mut rng).max(0.0) / per_event;
                let impressions = (clicks * ratio_dist.sample(&mut rng)).max(0.0);
                let engagement = (trend
                    + weekly
                    + monthly
                    + 0.001 * clicks * per_event
                    + 0.0001 * impressions * per_event
                    + noise_dist.sample(&mut rng))
                .max(0.0);

                events.push(RawEvent {
                    date: format_date(&date),
                    channel: channel.clone(),
                    engagement_score: engagement,
                    clicks: clicks.round() as i64,
                    impressions: impressions.round() as i64,
                    conversion_rate: conversion_dist.sample(&mut rng).clamp(0.0, 1.0),
                    acquisition_cost: format!("${:.2}", cost_dist.sample(&mut rng).max(0.0)),
                    roi: roi_dist.sample(&mut rng),
                    target_audience: audiences[event % audiences.len()].to_string(),
                });
            }
        }
    }

    info!(
        channels = config.channels.len(),
        days = config.days,
        events = events.len(),
        "Generated synthetic events"
    );
    Ok(events)
}

/// Write raw events as a CSV in the input layout.
pub fn write_events_csv<P: AsRef<Path>>(path: P, events: &[RawEvent]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for event in events {
        writer.serialize(event)?;
    }
    writer.flush()?;
    Ok(())
}
