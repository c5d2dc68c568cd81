/// Continuous per-channel training
///
/// Usage:
///   train_channels --data events.csv --platforms Facebook Twitter --iterations 10
///   train_channels --synthetic --records 1000 --model-root ml_models/post_schedule
use channel_forecast::config::{init_logging, SequenceInputs, TrainerConfig, DEFAULT_MODEL_ROOT};
use channel_forecast::data::{generate_synthetic_events, write_events_csv, SyntheticConfig};
use channel_forecast::store::ModelStore;
use channel_forecast::trainer::ContinuousTrainer;
use clap::Parser;
use std::error::Error;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "train_channels")]
#[command(about = "Train the hybrid forecaster for each channel")]
struct Args {
    /// Raw events CSV; with --synthetic the generated events are written here
    #[arg(long, default_value = "data/synthetic_events.csv")]
    data: PathBuf,

    /// Generate synthetic events instead of reading existing data
    #[arg(long)]
    synthetic: bool,

    /// Days of synthetic history per channel
    #[arg(long, default_value_t = 1000)]
    records: usize,

    /// Channels to train; all channels in the data when omitted
    #[arg(long, num_args = 1..)]
    platforms: Vec<String>,

    /// Resume from stored training state (`--continuous false` starts over)
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    continuous: Option<bool>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    iterations: Option<usize>,

    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    sequence_length: Option<usize>,

    /// Sequence model inputs: `features` or `target`
    #[arg(long)]
    sequence_inputs: Option<SequenceInputs>,

    #[arg(long, default_value = DEFAULT_MODEL_ROOT)]
    model_root: PathBuf,

    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let mut config = TrainerConfig::from_env()?;
    if let Some(continuous) = args.continuous {
        config.continuous = continuous;
    }
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(iterations) = args.iterations {
        config.num_iterations = iterations;
    }
    if let Some(epochs) = args.epochs {
        config.epochs_per_iteration = epochs;
    }
    if let Some(length) = args.sequence_length {
        config.sequence_length = length;
    }
    if let Some(inputs) = args.sequence_inputs {
        config.sequence_inputs = inputs;
    }

    if args.synthetic {
        let mut synthetic = SyntheticConfig {
            days: args.records,
            ..SyntheticConfig::default()
        };
        if !args.platforms.is_empty() {
            synthetic.channels = args.platforms.clone();
        }
        if let Some(parent) = args.data.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let events = generate_synthetic_events(&synthetic)?;
        write_events_csv(&args.data, &events)?;
        info!(path = %args.data.display(), events = events.len(), "Wrote synthetic events");
    }

    let mut trainer = ContinuousTrainer::new(config, ModelStore::new(&args.model_root))?;
    let report = if args.platforms.is_empty() {
        trainer.train_all(&args.data)?
    } else {
        trainer.train_channels(&args.data, &args.platforms)
    };

    if !report.all_succeeded() {
        info!(failed = report.failed.len(), "Some channels failed, see the report");
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
