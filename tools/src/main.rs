//! arrears-runner: runs the loan arrears aging recompute from the
//! command line.
//!
//! Usage:
//!   arrears-runner --db book.db --business-date 2024-03-15
//!   arrears-runner --db demo.db --demo-loans 5000 --seed 7 --threads 8
//!   arrears-runner --db book.db --events events.jsonl --json

mod demo;

use anyhow::{anyhow, Context, Result};
use arrears_core::{
    bridge::{EventBridge, SubscriptionTable},
    clock::{BusinessClock, ManualBusinessDate, SystemBusinessDate},
    config::ArrearsJobConfig,
    error::ArrearsError,
    event::BusinessEvent,
    orchestrator::{JobReport, RecomputeJob},
    store::ArrearsStore,
    types::BusinessDate,
};
use chrono::NaiveDate;
use std::env;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::sync::Arc;

#[derive(serde::Serialize)]
struct RunOutput<'a> {
    report: &'a JobReport,
    failed: bool,
    events_replayed: usize,
    aggregate_rows: i64,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let db = string_arg(&args, "--db").unwrap_or("arrears.db");
    let data_dir = string_arg(&args, "--data-dir");
    let business_date = match string_arg(&args, "--business-date") {
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .with_context(|| format!("--business-date expects YYYY-MM-DD, got {s}"))?,
        None => SystemBusinessDate.business_date(),
    };
    let json = args.iter().any(|a| a == "--json");

    let mut config = match data_dir {
        Some(dir) => ArrearsJobConfig::load(dir)?,
        None => ArrearsJobConfig::default(),
    };
    config.thread_pool_size = parse_arg(&args, "--threads", config.thread_pool_size);
    config.batch_size = parse_arg(&args, "--batch-size", config.batch_size);
    config.retry.max_retries = parse_arg(&args, "--max-retries", config.retry.max_retries);
    let demo_loans = parse_arg(&args, "--demo-loans", 0usize);
    let seed = parse_arg(&args, "--seed", 42u64);

    if !json {
        println!("arrears-runner: loan arrears aging recompute");
        println!("  db:            {db}");
        println!("  business date: {business_date}");
        println!("  threads:       {}", config.thread_pool_size);
        println!("  batch size:    {}", config.batch_size);
        println!("  max retries:   {}", config.retry.max_retries);
        println!();
    }

    let store = ArrearsStore::open(db)?;
    store.migrate()?;

    if demo_loans > 0 {
        if store.loan_count()? > 0 {
            log::warn!("{db} already holds loans; --demo-loans ignored");
        } else {
            demo::populate(&store, demo_loans, seed, business_date)?;
        }
    }

    let mut job = RecomputeJob::new(config, business_date, ArrearsStore::connector(db))?;
    let (report, errors) = match job.run() {
        Ok(report) => (report, Vec::new()),
        Err(ArrearsError::JobFailed { report, errors, .. }) => (*report, errors),
        Err(e) => return Err(e.into()),
    };

    let events_replayed = match string_arg(&args, "--events") {
        Some(path) => replay_events(&store, path, business_date)?,
        None => 0,
    };

    let aggregate_rows = store.aggregate_count()?;
    if json {
        let output = RunOutput {
            report: &report,
            failed: !errors.is_empty(),
            events_replayed,
            aggregate_rows,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_summary(&store, &report, events_replayed, aggregate_rows)?;
        for error in &errors {
            println!("  FAILED: {error}");
        }
    }

    if !errors.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}

/// Feed a JSON-lines file of business events through the event bridge.
/// Each event commits on its own; the first failure stops the replay.
fn replay_events(store: &ArrearsStore, path: &str, business_date: BusinessDate) -> Result<usize> {
    let file = File::open(path).with_context(|| format!("Cannot read {path}"))?;
    let table = SubscriptionTable::with_arrears_aging(Arc::new(ManualBusinessDate::new(business_date)));
    let bridge = EventBridge::new(&table);

    let mut replayed = 0;
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let event: BusinessEvent = serde_json::from_str(&line)
            .map_err(|e| anyhow!("{path}:{}: invalid event: {e}", idx + 1))?;
        store
            .in_transaction(|s| bridge.dispatch(s, &event))
            .with_context(|| format!("{path}:{}: {} for loan {}", idx + 1, event.kind().name(), event.loan_id()))?;
        replayed += 1;
    }
    log::info!("Replayed {replayed} event(s) from {path}");
    Ok(replayed)
}

fn print_summary(store: &ArrearsStore, report: &JobReport, events: usize, rows: i64) -> Result<()> {
    println!("=== ARREARS RUN SUMMARY ===");
    println!("  run_id:          {}", report.run_id);
    println!("  business date:   {}", report.business_date);
    println!("  result:          {}", if report.succeeded() { "ok" } else { "FAILED" });
    println!("  active loans:    {}", store.active_loan_count()?);
    println!("  rows cleared:    {}", report.rows_cleared);
    println!("  bulk rows:       {}", report.bulk_rows);
    println!("  pages:           {}", report.pages);
    println!("  sub-batches:     {}", report.sub_batches);
    println!("  loans streamed:  {}", report.loans_streamed);
    println!("  upserted:        {}", report.upserted);
    println!("  deleted:         {}", report.deleted);
    println!("  retries:         {}", report.retries);
    println!("  skipped loans:   {}", report.skipped_loans.len());
    println!("  failed batches:  {}", report.error_count());
    println!("  events replayed: {events}");
    println!("  rows in table:   {rows}");
    println!("  elapsed:         {} ms", report.elapsed_ms);
    for skipped in report.skipped_loans.iter().take(10) {
        println!("  skipped loan {}: {}", skipped.loan_id, skipped.reason);
    }
    Ok(())
}

fn string_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
