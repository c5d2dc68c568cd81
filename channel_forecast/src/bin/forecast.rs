/// Forecast one channel from trained artifacts
///
/// Usage:
///   forecast --channel Facebook --start 2025-01-01 --end 2025-03-01
///   forecast --channel Facebook --days 30
use channel_forecast::config::{init_logging, ServiceConfig, ServingWindows};
use channel_forecast::data::parse_date;
use channel_forecast::models::seasonal::future_dates;
use channel_forecast::service::{InferenceService, PredictionParams, RegressorOverride};
use channel_forecast::store::ModelStore;
use clap::Parser;
use std::error::Error;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "forecast")]
#[command(about = "Predict engagement for a channel")]
struct Args {
    #[arg(long)]
    channel: String,

    /// First forecast day; defaults to the day after the training history
    #[arg(long)]
    start: Option<String>,

    /// Last forecast day
    #[arg(long)]
    end: Option<String>,

    /// Horizon in days after the training history when --start/--end are omitted
    #[arg(long, default_value_t = 30)]
    days: usize,

    /// Regressor override as name=value, in feature space
    #[arg(long = "regressor", value_parser = parse_override)]
    regressors: Vec<(String, f64)>,

    #[arg(long)]
    model_root: Option<PathBuf>,

    /// feature_rows or statistical_feedback
    #[arg(long)]
    serving_windows: Option<ServingWindows>,

    #[arg(long)]
    log_level: Option<String>,
}

fn parse_override(raw: &str) -> Result<(String, f64), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got {}", raw))?;
    let value = value
        .parse::<f64>()
        .map_err(|e| format!("invalid value for {}: {}", name, e))?;
    Ok((name.to_string(), value))
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let mut config = ServiceConfig::from_env()?;
    if let Some(root) = args.model_root {
        config.model_root = root;
    }
    if let Some(mode) = args.serving_windows {
        config.serving_windows = mode;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    init_logging(&config.log_level);

    let (start, end) = match (args.start, args.end) {
        (Some(start), Some(end)) => (parse_date(&start)?, parse_date(&end)?),
        _ => {
            let store = ModelStore::new(&config.model_root);
            let artifacts = store.load_current(&args.channel)?;
            let dates = future_dates(&artifacts.statistical, args.days.max(1))?;
            match (dates.first(), dates.last()) {
                (Some(first), Some(last)) => (*first, *last),
                _ => return Err("empty forecast horizon".into()),
            }
        }
    };

    let mut params = PredictionParams::new(start, end);
    for (name, value) in args.regressors {
        params = params.with_regressor(name, RegressorOverride::Constant(value));
    }

    let service = InferenceService::new(config);
    let result = service.predict(&args.channel, &params)?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
