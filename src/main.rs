//! Liquidity Forecast CLI
//!
//! Thin command layer over the `forecast` pipeline: import logs, build
//! datasets, train, score and backtest against a SQLite artifact store.
//!
//! Usage:
//!   liquidity-forecast import-logs --file logs.csv --date 2025-03-01
//!   liquidity-forecast generate-from-rolling --lookback 3D
//!   liquidity-forecast train-model --lookback 3D
//!   liquidity-forecast infer-multi --windows 1D,3D,1W --top-k 20
//!   liquidity-forecast walk-forward --start 2025-03-01 --validation-days 1

use anyhow::{anyhow, bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use liquidity_forecast::forecast::{
    export::{best_record, RankedContract},
    generate_dated_dataset, generate_rolling_dataset, infer_multi, infer_single,
    predict_with_walk_forward, train_single_window, BacktestEvaluator, InferenceOutput, LogTable,
    LogWindow, Lookback, PipelineConfig, PipelineContext, PipelineError, SqliteBlobStore,
    SystemClock, WalkForwardTrainer,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Liquidity contract activity forecaster
#[derive(Parser, Debug)]
#[command(name = "liquidity-forecast")]
#[command(about = "Rank liquidity contracts by forecast forward activity")]
struct Cli {
    /// SQLite artifact store (defaults to the configured path)
    #[arg(long, env = "PIPELINE_DB", global = true)]
    db: Option<PathBuf>,

    /// Pipeline config TOML (defaults to PIPELINE_CONFIG_PATH or pipeline.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Store a local log CSV under a dated or rolling window
    ImportLogs {
        #[arg(short, long)]
        file: PathBuf,

        /// Calendar day (YYYY-MM-DD)
        #[arg(long, conflicts_with = "lookback")]
        date: Option<NaiveDate>,

        /// Rolling lookback tag (1D, 3D, 1W, 3W, 1M)
        #[arg(long)]
        lookback: Option<String>,
    },

    /// Build a growth-labelled dataset from rolling logs
    GenerateFromRolling {
        #[arg(short, long, default_value = "3D")]
        lookback: String,

        /// Window supplying forward volume (defaults to the lookback)
        #[arg(long)]
        outcome: Option<String>,
    },

    /// Build an activity-labelled dataset from dated logs
    GenerateData {
        #[arg(long)]
        start: NaiveDate,

        #[arg(long)]
        end: NaiveDate,
    },

    /// Train a single-window model (unscoped default without --lookback)
    TrainModel {
        #[arg(short, long)]
        lookback: Option<String>,
    },

    /// Rank current contracts with one lookback model
    InferTop {
        #[arg(short, long, default_value = "3D")]
        lookback: String,

        #[arg(short = 'k', long, default_value = "20")]
        top_k: usize,

        /// Skip the token allow-list
        #[arg(long)]
        no_filter: bool,
    },

    /// Rank current contracts with the weighted multi-window ensemble
    InferMulti {
        /// Comma-separated lookback tags (defaults to the configured windows)
        #[arg(short, long, value_delimiter = ',')]
        windows: Vec<String>,

        #[arg(short = 'k', long, default_value = "20")]
        top_k: usize,

        #[arg(long)]
        no_filter: bool,
    },

    /// Precision@K backtest over one rolling window of logs
    #[command(name = "backtest-1w")]
    Backtest1w {
        #[arg(short, long, default_value = "1W")]
        lookback: String,
    },

    /// Sequential train/validate cycles over a date range
    WalkForward {
        #[arg(long)]
        start: NaiveDate,

        /// Last training day (defaults to today, UTC)
        #[arg(long)]
        end: Option<NaiveDate>,

        #[arg(long, default_value = "1")]
        validation_days: u32,
    },

    /// Rank current contracts with a walk-forward model
    PredictRolling {
        #[arg(short = 'k', long, default_value = "20")]
        top_k: usize,

        /// Cycle index (defaults to the best F1 on record)
        #[arg(long)]
        model_day: Option<u32>,
    },

    /// Print the walk-forward performance history
    History,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "liquidity_forecast=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn parse_lookback(tag: &str) -> Result<Lookback> {
    Lookback::parse(tag).ok_or_else(|| anyhow!("unknown lookback '{}' (expected 1D, 3D, 1W, 3W or 1M)", tag))
}

fn build_context(cli: &Cli) -> Result<PipelineContext> {
    let config = match &cli.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("Failed to load config: {:?}", path))?,
        None => PipelineConfig::from_env(),
    };
    let db_path = cli
        .db
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.store.db_path));
    let store = SqliteBlobStore::new(&db_path, config.store.busy_timeout())
        .with_context(|| format!("Failed to open artifact store: {:?}", db_path))?;
    info!("Artifact store: {:?}", db_path);

    Ok(PipelineContext::new(
        config,
        Arc::new(store),
        Arc::new(SystemClock::new()),
    ))
}

fn print_ranked(title: &str, rows: &[RankedContract]) {
    println!("\n=== {} ===\n", title);
    if rows.is_empty() {
        println!("(no contracts)");
        return;
    }
    println!(
        "{:>4}  {:<44} {:>8} {:>8} {:>9}  {:<24} {}",
        "rank", "contract", "score", "txs", "span", "tokens", "windows"
    );
    println!("{}", "-".repeat(120));
    for r in rows {
        println!(
            "{:>4}  {:<44} {:>8.4} {:>8} {:>9}  {:<24} {}",
            r.rank,
            r.contract_address,
            r.combined_score,
            r.tx_count,
            r.activity_span,
            r.token_display,
            r.contributing_windows()
        );
    }
}

fn report_inference(title: &str, output: &InferenceOutput) {
    print_ranked(title, &output.top);
    println!(
        "\nModels: {} | {} contracts scored | snapshot: {}",
        output.models.join(", "),
        output.ranked.len(),
        output.predictions_key
    );
}

fn run(cli: Cli) -> Result<()> {
    let ctx = build_context(&cli)?;

    match cli.command {
        Commands::ImportLogs {
            file,
            date,
            lookback,
        } => {
            let window = match (date, lookback) {
                (Some(day), None) => LogWindow::Day(day),
                (None, Some(tag)) => LogWindow::Rolling(parse_lookback(&tag)?),
                _ => bail!("import-logs needs exactly one of --date or --lookback"),
            };
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {:?}", file))?;
            let table = LogTable::from_csv(&text).with_context(|| format!("Invalid log file {:?}", file))?;
            let key = window.storage_key();
            ctx.artifacts.put(&key, text.as_bytes())?;
            println!("Imported {} events into {}", table.len(), key);
        }

        Commands::GenerateFromRolling { lookback, outcome } => {
            let outcome = outcome.as_deref().map(parse_lookback).transpose()?;
            let summary = generate_rolling_dataset(&ctx, parse_lookback(&lookback)?, outcome)?;
            println!(
                "Wrote {} ({} rows, {} positive)",
                summary.key, summary.rows, summary.positives
            );
        }

        Commands::GenerateData { start, end } => {
            if end < start {
                bail!("--end {} is before --start {}", end, start);
            }
            let summary = generate_dated_dataset(&ctx, start, end)?;
            println!(
                "Wrote {} ({} rows, {} positive, {} days skipped)",
                summary.key,
                summary.rows,
                summary.positives,
                summary.skipped_days.len()
            );
        }

        Commands::TrainModel { lookback } => {
            let lookback = lookback.as_deref().map(parse_lookback).transpose()?;
            let summary = train_single_window(&ctx, lookback)?;
            println!(
                "Trained {} from {} ({} rows, holdout accuracy {:.4} on {} rows)",
                summary.model_key,
                summary.dataset_key,
                summary.training_rows,
                summary.holdout.accuracy,
                summary.holdout_rows
            );
        }

        Commands::InferTop {
            lookback,
            top_k,
            no_filter,
        } => {
            let lookback = parse_lookback(&lookback)?;
            let output = infer_single(&ctx, lookback, top_k, !no_filter)?;
            report_inference(&format!("Top {} contracts ({} model)", top_k, lookback), &output);
        }

        Commands::InferMulti {
            windows,
            top_k,
            no_filter,
        } => {
            let output = infer_multi(&ctx, &windows, top_k, !no_filter)?;
            report_inference(&format!("Top {} contracts (ensemble)", top_k), &output);
        }

        Commands::Backtest1w { lookback } => {
            let logs = ctx.fetch(LogWindow::Rolling(parse_lookback(&lookback)?))?;
            let report = BacktestEvaluator::from_context(&ctx).run(&logs)?;
            println!("\n=== Precision@{} backtest ===\n", ctx.config.backtest.top_k);
            for s in &report.segments {
                println!(
                    "segment {} [{}-{}]  P@{} = {:.3}  ({} training rows, {} positives)",
                    s.segment, s.first_block, s.last_block, s.k, s.precision_at_k, s.training_rows, s.positives
                );
            }
            for s in &report.skipped {
                println!("segment {} skipped: {}", s.segment, s.reason);
            }
            match report.mean_precision() {
                Some(mean) => println!("\nMean Precision@{}: {:.3}", ctx.config.backtest.top_k, mean),
                None => println!("\nNo evaluable segments"),
            }
        }

        Commands::WalkForward {
            start,
            end,
            validation_days,
        } => {
            let end = end.unwrap_or_else(|| Utc::now().date_naive());
            let report = WalkForwardTrainer::new(&ctx, validation_days).run(start, end)?;
            println!(
                "\nWalk-forward: {} cycles trained, {} skipped",
                report.cycles.len(),
                report.skipped.len()
            );
            for s in &report.skipped {
                println!("  day {} ({}): {}", s.day, s.date, s.reason);
            }
            if let Some(mean) = report.mean_metrics() {
                println!(
                    "Mean accuracy {:.4}  precision {:.4}  recall {:.4}  f1 {:.4}",
                    mean.accuracy, mean.precision, mean.recall, mean.f1
                );
            }
        }

        Commands::PredictRolling { top_k, model_day } => {
            let output = predict_with_walk_forward(&ctx, top_k, model_day)?;
            report_inference(&format!("Top {} contracts (walk-forward)", top_k), &output);
        }

        Commands::History => {
            let history = ctx.artifacts.load_performance()?;
            if history.is_empty() {
                println!("No walk-forward history yet (run walk-forward first)");
                return Ok(());
            }
            println!(
                "{:>4}  {:<10}  {:<10}  {:>7}  {:>7}  {:>8}  {:>7}  {:>7}  {:>7}  {:>7}",
                "day", "trained", "validated", "train", "valid", "labelled", "acc", "prec", "recall", "f1"
            );
            for r in &history {
                println!(
                    "{:>4}  {:<10}  {:<10}  {:>7}  {:>7}  {:>8}  {:>7.4}  {:>7.4}  {:>7.4}  {:>7.4}",
                    r.day,
                    r.training_date,
                    r.validation_date,
                    r.training_samples,
                    r.validation_samples,
                    r.labeled_validation_samples,
                    r.accuracy,
                    r.precision,
                    r.recall,
                    r.f1_score
                );
            }
            if let Some(best) = best_record(&history) {
                println!("\nBest model: day {} (f1 {:.4})", best.day, best.f1_score);
            }
        }
    }

    Ok(())
}

/// 0 on success, 2 when data or a model is missing, 1 otherwise.
fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<PipelineError>() {
        Some(PipelineError::ArtifactNotFound(_)) | Some(PipelineError::MissingWindowData(_)) => 2,
        _ => 1,
    }
}

fn main() {
    let _ = dotenv();
    init_tracing();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(exit_code(&e));
    }
}
