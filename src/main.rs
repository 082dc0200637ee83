use autoprocess::config::{
    GatewayConfig, DEFAULT_MAX_ITERATIONS, DEFAULT_MODEL, DEFAULT_SAMPLE_SIZE, MODEL_ENV,
};
use autoprocess::gateway::{CompletionBackend, GeminiBackend, ModelGateway};
use autoprocess::pipelines::{
    CleaningTask, DataCleaningPipeline, DataTransformationPipeline, FeatureEngineeringPipeline,
    FeatureTask, PipelineOutcome, SkewCorrectionPipeline, SkewTask, TransformationTask,
};
use autoprocess::profiler::profile_dataset;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use polars::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "autoprocess")]
#[command(about = "LLM-driven generation of data preprocessing code")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Flags shared by every model-backed subcommand.
#[derive(Args)]
struct Common {
    /// Gemini API key (or set GEMINI_API_KEY env var)
    #[arg(long)]
    api_key: Option<String>,

    /// Write the generated code here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Write a JSON record of every model call here
    #[arg(long)]
    transcript: Option<PathBuf>,

    /// Maximum refinement rounds
    #[arg(long, default_value_t = DEFAULT_MAX_ITERATIONS)]
    max_iterations: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the dataset profile that is sent to the model
    Profile {
        /// CSV or Parquet file
        dataset: PathBuf,

        /// Number of sample rows to include
        #[arg(long, default_value_t = DEFAULT_SAMPLE_SIZE)]
        sample_size: usize,
    },
    /// Generate cleaning code (missing values, outliers, duplicates)
    Clean {
        dataset: PathBuf,

        #[arg(long)]
        target: Option<String>,

        /// Do not handle missing values
        #[arg(long)]
        no_missing: bool,

        /// Do not handle outliers
        #[arg(long)]
        no_outliers: bool,

        /// Do not handle duplicate rows
        #[arg(long)]
        no_duplicates: bool,

        #[command(flatten)]
        common: Common,
    },
    /// Generate transformation code (dtypes, encoding, scaling)
    Transform {
        dataset: PathBuf,

        #[arg(long)]
        target: Option<String>,

        /// Columns to leave out of categorical encoding
        #[arg(long, value_delimiter = ',')]
        skip_encoding: Vec<String>,

        /// Columns to leave out of normalisation
        #[arg(long, value_delimiter = ',')]
        skip_normalisation: Vec<String>,

        #[command(flatten)]
        common: Common,
    },
    /// Generate feature engineering code
    Features {
        dataset: PathBuf,

        #[arg(long)]
        target: String,

        /// Keep columns the model considers irrelevant
        #[arg(long)]
        keep_columns: bool,

        #[command(flatten)]
        common: Common,
    },
    /// Generate skew correction code for one column
    Unskew {
        dataset: PathBuf,

        #[arg(long)]
        column: String,

        /// Model to use (default: GEMINI_MODEL or gemini-1.5-flash)
        #[arg(long)]
        model: Option<String>,

        #[command(flatten)]
        common: Common,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("autoprocess=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Profile { dataset, sample_size } => {
            let df = load_dataset(&dataset)?;
            let profile = profile_dataset(&df, sample_size)?;
            println!("{}", serde_json::to_string_pretty(&profile)?);
            Ok(())
        }
        Commands::Clean { dataset, target, no_missing, no_outliers, no_duplicates, common } => {
            let df = load_dataset(&dataset)?;
            let pipeline = DataCleaningPipeline::with_backend(backend(&common, None)?).await;
            let task = CleaningTask {
                target,
                missing: !no_missing,
                outlier: !no_outliers,
                duplicate: !no_duplicates,
                max_iterations: common.max_iterations,
            };
            let outcome = pipeline.clean(&df, &task).await;
            write_transcript(&common, pipeline.gateway())?;
            finish(&common, outcome?)
        }
        Commands::Transform { dataset, target, skip_encoding, skip_normalisation, common } => {
            let df = load_dataset(&dataset)?;
            let pipeline = DataTransformationPipeline::with_backend(backend(&common, None)?).await;
            let task = TransformationTask {
                target,
                skip_encoding,
                skip_normalisation,
                max_iterations: common.max_iterations,
            };
            let outcome = pipeline.transform(&df, &task).await;
            write_transcript(&common, pipeline.gateway())?;
            finish(&common, outcome?)
        }
        Commands::Features { dataset, target, keep_columns, common } => {
            let df = load_dataset(&dataset)?;
            let pipeline = FeatureEngineeringPipeline::with_backend(backend(&common, None)?).await?;
            let task = FeatureTask {
                drop_irrelevant: !keep_columns,
                max_iterations: common.max_iterations,
                ..FeatureTask::new(target)
            };
            let outcome = pipeline.engineer_features(&df, &task).await;
            write_transcript(&common, Some(pipeline.gateway()))?;
            finish(&common, outcome)
        }
        Commands::Unskew { dataset, column, model, common } => {
            let df = load_dataset(&dataset)?;
            let model = model.or_else(|| std::env::var(MODEL_ENV).ok());
            let completion = backend(&common, model)?;
            let pipeline = SkewCorrectionPipeline::with_backend(completion).await?;
            let task = SkewTask {
                max_iterations: common.max_iterations,
                ..SkewTask::new(column)
            };
            let outcome = pipeline.correct_skew(&df, &task).await;
            write_transcript(&common, Some(pipeline.gateway()))?;
            finish(&common, PipelineOutcome::Code(outcome?))
        }
    }
}

/// Only skew correction picks a model; everything else runs on the default.
fn backend(common: &Common, model: Option<String>) -> Result<Arc<dyn CompletionBackend>> {
    let config = GatewayConfig::from_env(common.api_key.clone())?
        .with_model(model.unwrap_or_else(|| DEFAULT_MODEL.to_string()));
    info!("Using model {}", config.model);
    Ok(Arc::new(GeminiBackend::new(&config)))
}

/// CSV by default, Parquet for `.parquet` / `.pq` files.
fn load_dataset(path: &Path) -> Result<DataFrame> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let df = match extension.as_str() {
        "parquet" | "pq" => LazyFrame::scan_parquet(path, ScanArgsParquet::default())?.collect()?,
        _ => LazyCsvReader::new(path).with_has_header(true).finish()?.collect()?,
    };

    info!("Loaded {:?}: {} rows, {} columns", path, df.height(), df.width());
    Ok(df)
}

fn write_transcript(common: &Common, gateway: Option<&ModelGateway>) -> Result<()> {
    let (Some(path), Some(gateway)) = (&common.transcript, gateway) else {
        return Ok(());
    };
    let json = serde_json::to_string_pretty(&gateway.transcript())?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write transcript to {:?}", path))?;
    info!("Transcript written to {:?}", path);
    Ok(())
}

fn finish(common: &Common, outcome: PipelineOutcome) -> Result<()> {
    match outcome {
        PipelineOutcome::Code(code) => {
            match &common.output {
                Some(path) => {
                    std::fs::write(path, &code)
                        .with_context(|| format!("Failed to write code to {:?}", path))?;
                    info!("Code written to {:?}", path);
                }
                None => println!("{}", code),
            }
            Ok(())
        }
        PipelineOutcome::Error(reason) => {
            error!("{}", reason);
            println!("{}", serde_json::to_string(&PipelineOutcome::Error(reason.clone()))?);
            anyhow::bail!(reason)
        }
    }
}
