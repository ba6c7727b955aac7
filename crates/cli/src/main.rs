use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use colored::Colorize;
use data_loader::{check_input_schema, find_duplicate_item_ids, RecordSet};
use orchestrator::{BatchOrchestrator, BatchStatus, PipelineConfig, RunReport, RunState};
use pipeline::plan_batches;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

/// recs-batch - nearest-neighbor recommendation batch runner
#[derive(Parser)]
#[command(name = "recs-batch")]
#[command(about = "Runs product records through the embedding and neighbor endpoints", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, back up, process and upload one batch run
    Run {
        /// Path to the TOML configuration file
        #[arg(short, long)]
        config: PathBuf,

        /// Date used for `{date}` in the output key (YYYY-MM-DD, defaults to today)
        #[arg(long)]
        run_date: Option<NaiveDate>,
    },

    /// Validate local CSV files against the input schema and routing table
    CheckInput {
        /// Path to the TOML configuration file
        #[arg(short, long)]
        config: PathBuf,

        /// CSV files to check
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let exit_code = match cli.command {
        Commands::Run { config, run_date } => handle_run(&config, run_date).await?,
        Commands::CheckInput { config, files } => handle_check_input(&config, &files)?,
    };

    std::process::exit(exit_code);
}

fn load_config(path: &Path) -> Result<PipelineConfig> {
    PipelineConfig::load(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

/// Handle the 'run' command
async fn handle_run(config_path: &Path, run_date: Option<NaiveDate>) -> Result<i32> {
    let config = load_config(config_path)?;
    info!(
        "Loaded configuration from {} (batch size {}, concurrency {}, policy {:?})",
        config_path.display(),
        config.run.batch_size,
        config.run.concurrency,
        config.run.failure_policy
    );

    let mut orchestrator = BatchOrchestrator::connect(config).await;
    if let Some(date) = run_date {
        orchestrator = orchestrator.with_run_date(date);
    }

    // Ctrl-C stops the run before its next batch
    let cancel = orchestrator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after in-flight batches");
            cancel.cancel();
        }
    });

    let report = orchestrator.run().await;
    print_report(&report);
    Ok(report.exit_code())
}

/// Handle the 'check-input' command
fn handle_check_input(config_path: &Path, files: &[PathBuf]) -> Result<i32> {
    let config = load_config(config_path)?;
    let start = Instant::now();

    let mut contents = Vec::with_capacity(files.len());
    for path in files {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        contents.push((path.display().to_string(), bytes));
    }

    let mut problems = Vec::new();
    for (name, bytes) in &contents {
        if let Err(e) = check_input_schema(name, bytes) {
            problems.push(e.to_string());
        }
    }
    if !problems.is_empty() {
        print_problems(&problems);
        return Ok(1);
    }

    let records = RecordSet::from_files(
        contents
            .iter()
            .map(|(name, bytes)| (name.as_str(), bytes.as_slice())),
    )
    .context("Failed to parse input files")?;

    let duplicates = find_duplicate_item_ids(records.records());
    if !duplicates.is_empty() {
        problems.push(format!("Duplicate item ids: {}", duplicates.join(", ")));
    }
    for marketplace in records.marketplaces() {
        if config.route(marketplace).is_none() {
            problems.push(format!("Marketplace {} has no configured route", marketplace));
        }
    }

    let batches = plan_batches(records.records(), config.run.batch_size)
        .context("Failed to plan batches")?;

    println!(
        "{} {} records in {} files, {} batches of up to {} ({:.2?})",
        "•".cyan(),
        records.len(),
        records.file_count(),
        batches.len(),
        config.run.batch_size,
        start.elapsed()
    );

    if problems.is_empty() {
        println!("{} Input is valid", "✓".green());
        Ok(0)
    } else {
        print_problems(&problems);
        Ok(1)
    }
}

fn print_problems(problems: &[String]) {
    println!("{}", "Input check failed:".bold().red());
    for problem in problems {
        println!("  {} {}", "✗".red(), problem);
    }
}

/// Helper function to format and print the run summary
fn print_report(report: &RunReport) {
    let summary = &report.summary;
    println!("{}", "Run summary:".bold().blue());

    for batch in &summary.batches {
        let status = match batch.status {
            BatchStatus::Succeeded => batch.status.to_string().green(),
            BatchStatus::Failed => batch.status.to_string().red(),
        };
        println!(
            "  batch {:>4} [{} / {}] {:>3} records  {}  ({} retries){}",
            batch.index,
            batch.marketplace_id,
            batch.product_type,
            batch.records,
            status,
            batch.retries(),
            batch
                .reason
                .as_ref()
                .map(|r| format!(": {}", r))
                .unwrap_or_default()
        );
    }

    println!(
        "{}Batches: {} succeeded, {} failed, {} retried ({} retries)",
        "• ".cyan(),
        summary.succeeded_batches(),
        summary.failed_batches(),
        summary.retried_batches(),
        summary.total_retries()
    );
    println!(
        "{}Rows: {} in, {} out ({} failed)",
        "• ".cyan(),
        summary.input_rows,
        summary.output_rows,
        summary.failed_rows()
    );
    println!("{}Elapsed: {:.2?}", "• ".cyan(), summary.elapsed);

    match (&report.state, &report.output_location) {
        (RunState::Uploaded, Some(location)) if report.is_success() => {
            println!("{} Uploaded to {}", "✓".green(), location);
        }
        (RunState::Uploaded, Some(location)) => {
            println!(
                "{} Uploaded to {} with failed rows",
                "!".yellow(),
                location
            );
        }
        (RunState::Failed { stage, reason }, _) => {
            println!("{} Run failed during {}: {}", "✗".red(), stage, reason);
        }
        (state, _) => {
            println!("{} Run ended in state {:?}", "✗".red(), state);
        }
    }
}
