//! Importer - bulk loads a billing usage export into Postgres
//!
//! Usage:
//!   importer --file Reconfile.xlsx
//!   importer --file usage.csv --replace --batch-size 1000
//!   importer --file usage.tsv --dry-run --json

use anyhow::{Context, Result};
use billing_importer::{
    dry_run, prepare, run_cancellable, run_import, Config, HeaderMode, ImportOptions,
    ImportStore, ImportSummary, LoadMode, OnParseFailure, PgStore,
};
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_CLI_BATCH_SIZE: usize = 1000;

#[derive(Parser, Debug)]
#[command(name = "importer", about = "Imports billing usage exports into the reporting database")]
struct Args {
    /// File to import (.csv, .tsv, .txt, .xlsx, .xlsm, .xlsb, .xls, .ods)
    #[arg(long)]
    file: PathBuf,

    /// Delete all existing usages, products, customers and partners first
    #[arg(long, default_value = "false")]
    replace: bool,

    /// Parse and aggregate only - don't touch the database
    #[arg(long, default_value = "false")]
    dry_run: bool,

    /// Reject rows with unparsable numbers or dates instead of defaulting them
    #[arg(long, default_value = "false")]
    strict: bool,

    /// Fall back to substring matching for required columns the alias table misses
    #[arg(long, default_value = "false")]
    best_effort_headers: bool,

    /// Facts per load batch (0 = whole file in one batch)
    #[arg(long)]
    batch_size: Option<usize>,

    /// Row-parsing threads (capped at 8)
    #[arg(long)]
    workers: Option<usize>,

    /// Print the summary as JSON
    #[arg(long, default_value = "false")]
    json: bool,
}

impl Args {
    fn import_options(&self, config: &Config) -> ImportOptions {
        let batch_size = self
            .batch_size
            .or((config.batch_size > 0).then_some(config.batch_size))
            .unwrap_or(DEFAULT_CLI_BATCH_SIZE);

        ImportOptions {
            header_mode: if self.best_effort_headers {
                HeaderMode::BestEffort
            } else {
                HeaderMode::Strict
            },
            on_parse_failure: if self.strict {
                OnParseFailure::RejectRow
            } else {
                OnParseFailure::SubstituteDefault
            },
            load_mode: if self.replace {
                LoadMode::Replace
            } else {
                LoadMode::Append
            },
            workers: self.workers.unwrap_or(config.workers),
            batch_size,
        }
    }
}

fn init_logging() {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();
}

fn print_summary(summary: &ImportSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    println!("\n=== Import Summary ===");
    println!("Run:           {}", summary.run_id);
    println!("File:          {}", summary.file_name);
    println!("Content hash:  {}", summary.content_hash);
    if summary.dry_run {
        println!("Mode:          dry run (nothing written)");
    }
    println!("{:-<60}", "");
    println!("Rows read:     {}", summary.rows_read);
    println!("  blank:       {}", summary.blank_rows);
    println!("  rejected:    {}", summary.rejected_rows);
    println!("Partners:      {}", summary.partners);
    println!("Customers:     {}", summary.customers);
    println!("Products:      {}", summary.products);
    println!("Facts parsed:  {}", summary.facts_parsed);
    if !summary.dry_run {
        println!("  accepted:    {}", summary.facts_accepted);
        println!("  dropped:     {}", summary.facts_dropped);
        println!("Ref. failures: {}", summary.reference_failures);
        println!("Batches:       {}", summary.batches);
    }
    println!("Elapsed:       {} ms", summary.elapsed_ms);
    println!("{:-<60}", "");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_logging();
    let args = Args::parse();
    let config = Config::from_env()?;
    let options = args.import_options(&config);

    if !args.json {
        println!("=== Billing Usage Importer ===");
        println!("File: {}", args.file.display());
    }

    let file_name = args
        .file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .context("--file must name a file")?;
    let bytes = fs::read(&args.file)
        .await
        .with_context(|| format!("Failed to read {}", args.file.display()))?;

    let prepared = {
        let options = options.clone();
        tokio::task::spawn_blocking(move || prepare(&file_name, &bytes, &options))
            .await
            .context("Row parsing task failed")??
    };

    if args.dry_run {
        let summary = dry_run(prepared);
        return print_summary(&summary, args.json);
    }

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(config.require_db_url()?)
        .await
        .context("Failed to connect to database")?;
    let store = PgStore::new(pool);

    let cancel = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("cannot listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
        info!("ctrl-c received; rolling back the open batch");
    };

    let summary = match run_cancellable(
        run_import(&store, prepared, &options),
        Duration::from_secs(config.timeout_secs),
        cancel,
    )
    .await
    {
        Ok(summary) => summary,
        Err(e) => {
            error!("import failed: {}", e);
            return Err(e).context("Import failed");
        }
    };

    print_summary(&summary, args.json)?;

    if !args.json {
        let counts = store
            .table_counts()
            .await
            .context("Failed to count tables")?;
        println!(
            "Database now holds {} partners, {} customers, {} products, {} usages",
            counts.partners, counts.customers, counts.products, counts.usages
        );
    }

    Ok(())
}
