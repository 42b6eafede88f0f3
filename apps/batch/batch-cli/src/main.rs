//! Batch CLI
//!
//! Drives the batch runner against a simulated paged data source.
//! `plan` shows how a range is split; `run` processes it with a worker pool
//! and prints every outcome followed by a run summary.

use std::time::Duration;

use batch_runner::{
    Backoff, BatchConfig, BatchProcessor, Outcome, RunSummary, init_metrics, partition,
    render_metrics,
};
use clap::{Args, Parser, Subcommand};
use eyre::{Result, WrapErr};
use futures::StreamExt;
use tracing::info;

mod simulated;
mod telemetry;

use simulated::{RowRange, SessionSource, SimulatedPages};
use telemetry::{Environment, init_tracing, install_color_eyre};

#[derive(Parser)]
#[command(name = "batch-cli")]
#[command(about = "Process a row range in offset batches with a bounded worker pool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the batches a range splits into
    Plan {
        /// Rows in the range
        #[arg(short, long)]
        total_rows: u64,

        /// Rows per batch
        #[arg(short, long, default_value_t = batch_runner::DEFAULT_BATCH_SIZE)]
        batch_size: u64,
    },

    /// Process a range against the simulated source
    Run(RunArgs),
}

/// Flags for `run`. Unset flags fall back to the `BATCH_*` environment.
#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Rows in the range
    #[arg(short, long)]
    total_rows: Option<u64>,

    /// Rows per batch
    #[arg(short, long)]
    batch_size: Option<u64>,

    /// Concurrent workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Attempts per batch
    #[arg(short = 'r', long)]
    max_retries: Option<u32>,

    /// Initial delay between attempts, doubled per failure
    #[arg(long)]
    backoff_ms: Option<u64>,

    /// Offsets that fail on every attempt
    #[arg(long = "fail-offset", value_delimiter = ',')]
    fail_offsets: Vec<u64>,

    /// Fail the first K attempts of every batch
    #[arg(long, default_value_t = 0)]
    flaky_attempts: u32,

    /// Simulated work per attempt, in milliseconds
    #[arg(long, default_value_t = 0)]
    work_ms: u64,

    /// Print outcomes and the summary as JSON lines
    #[arg(long)]
    json: bool,

    /// Print Prometheus metrics after the run
    #[arg(long)]
    metrics: bool,
}

impl RunArgs {
    /// Layer the flags over `config`.
    fn apply(&self, mut config: BatchConfig) -> BatchConfig {
        if let Some(total_rows) = self.total_rows {
            config = config.with_total_rows(total_rows);
        }
        if let Some(batch_size) = self.batch_size {
            config = config.with_batch_size(batch_size);
        }
        if let Some(workers) = self.workers {
            config = config.with_num_workers(workers);
        }
        if let Some(max_retries) = self.max_retries {
            config = config.with_max_retries(max_retries);
        }
        if let Some(initial) = self.backoff_ms {
            config = config.with_backoff(Backoff::exponential(initial, initial.saturating_mul(32)));
        }
        config
    }

    fn pages(&self, total_rows: u64) -> SimulatedPages {
        SimulatedPages::new(total_rows)
            .with_fail_offsets(self.fail_offsets.iter().copied())
            .with_flaky_attempts(self.flaky_attempts)
            .with_work_delay(Duration::from_millis(self.work_ms))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    install_color_eyre();

    let environment = Environment::from_env();
    init_tracing(&environment);

    let cli = Cli::parse();

    match cli.command {
        Commands::Plan {
            total_rows,
            batch_size,
        } => {
            let units = partition(total_rows, batch_size)?;
            println!("{}", serde_json::to_string_pretty(&units)?);
        }

        Commands::Run(args) => {
            let config = BatchConfig::from_env().wrap_err("Invalid BATCH_* environment")?;
            let config = args.apply(config);
            let summary = run(&args, &config).await?;

            if args.json {
                println!("{}", serde_json::to_string(&summary)?);
            } else {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
            if args.metrics {
                print!("{}", render_metrics());
            }
        }
    }

    Ok(())
}

async fn run(args: &RunArgs, config: &BatchConfig) -> Result<RunSummary> {
    if args.metrics {
        init_metrics();
    }

    let processor = BatchProcessor::new(SessionSource::new(), args.pages(config.total_rows));
    let mut stream = processor
        .stream_batches::<RowRange>(config)
        .wrap_err("Failed to start batch run")?;

    info!(run_id = %stream.run_id(), units = stream.total_units(), "Processing");

    while let Some(outcome) = stream.next().await {
        if args.json {
            println!("{}", serde_json::to_string(&outcome)?);
        } else {
            println!("{}", describe(&outcome));
        }
    }

    Ok(stream.finish().await)
}

fn describe(outcome: &Outcome<RowRange>) -> String {
    match outcome {
        Outcome::Success(range) => format!(
            "ok     offset={:<8} rows={:<6} ids=[{}, {}) session={}",
            range.offset, range.rows, range.first_id, range.end_id, range.session_id
        ),
        Outcome::Failure(failed) => format!(
            "FAILED offset={:<8} limit={:<5} error={}",
            failed.offset,
            failed.limit,
            failed.last_error.as_deref().unwrap_or("-")
        ),
    }
}
