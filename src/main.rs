use anyhow::{Context, Result};
use chrono::Duration;
use clap::Parser;
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::{BufRead, BufReader};
use tracing::{debug, info, warn};

mod config;
mod db;
mod engine;
mod error;

use config::Config;
use db::models::{OutcomeRecord, PriceQuote, SituationalEvent};
use db::Database;
use engine::EdgeEngine;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    info!(
        "Engine configured: bankroll=${:.2}, kelly_multiplier={}, caps={}/{} single/aggregate",
        config.bankroll,
        config.kelly_multiplier,
        config.max_single_position_fraction,
        config.max_aggregate_exposure_fraction
    );

    let db = Database::open(&config.database_path)?;
    info!("Archive opened: {}", config.database_path);

    let engine = EdgeEngine::with_archive(config.clone(), db.clone());

    // 1. Situational events: validated at the boundary, rejects logged and
    //    counted rather than aborting the run.
    if let Some(path) = &config.events_file {
        let events: Vec<SituationalEvent> = read_jsonl(path)?;
        let mut accepted = 0usize;
        let mut rejected = 0usize;
        for event in events {
            match engine.ingest_event(event) {
                Ok(()) => accepted += 1,
                Err(e) => {
                    warn!("Rejected situational event: {}", e);
                    rejected += 1;
                }
            }
        }
        info!(
            "Ingested {} situational event(s) from {} ({} rejected)",
            accepted, path, rejected
        );
    }

    // 2. Price quotes: subjects are independent, so chunks fan out across
    //    blocking worker tasks. Per-subject failures stay inside their batch.
    if let Some(path) = &config.quotes_file {
        let quotes: Vec<PriceQuote> = read_jsonl(path)?;
        info!("Evaluating {} quote(s) from {}", quotes.len(), path);

        let handles: Vec<_> = quotes
            .chunks(32)
            .map(|chunk| {
                let engine = engine.clone();
                let chunk = chunk.to_vec();
                tokio::task::spawn_blocking(move || engine.evaluate_batch(&chunk))
            })
            .collect();

        let mut evaluated = 0usize;
        let mut failed = 0usize;
        for joined in futures_util::future::join_all(handles).await {
            for result in joined.context("evaluation task panicked")? {
                match result {
                    Ok(evaluation) => {
                        println!("{}", serde_json::to_string(&evaluation)?);
                        evaluated += 1;
                    }
                    Err(_) => failed += 1, // already logged by the engine
                }
            }
        }
        info!(
            "Evaluated {} quote(s), {} failed; open exposure {:.3} of bankroll",
            evaluated,
            failed,
            engine.open_exposure_fraction()
        );
    }

    // 3. Resolved outcomes close the calibration loop.
    if let Some(path) = &config.outcomes_file {
        let outcomes: Vec<OutcomeRecord> = read_jsonl(path)?;
        let mut recorded = 0usize;
        let mut rejected = 0usize;
        for outcome in outcomes {
            match engine.record_outcome(outcome) {
                Ok(()) => recorded += 1,
                Err(e) => {
                    warn!("Rejected outcome: {}", e);
                    rejected += 1;
                }
            }
        }
        info!(
            "Recorded {} outcome(s) from {} ({} rejected)",
            recorded, path, rejected
        );
    }

    // 4. Calibration report over the requested window.
    let window = config.report_window_hours.map(Duration::hours);
    let report = engine.report(window);
    println!("{}", serde_json::to_string_pretty(&report)?);

    let stats = db.get_archive_stats()?;
    info!(
        "Archive totals: {} edge record(s), {} prediction(s), {} outcome(s), {} source score(s)",
        stats.edge_records, stats.predictions, stats.outcomes, stats.source_scores
    );
    for rec in db.list_recent_edge_records(5)? {
        debug!(
            "Recent edge: {} raw_edge={:+.2} tier={:?} at {}",
            rec.subject_id, rec.raw_edge, rec.tier, rec.evaluated_at
        );
    }

    Ok(())
}

/// Read a newline-delimited JSON file of typed records. Malformed lines fail
/// the whole load with their line number; this is a boundary where silently
/// coerced input must not slip through.
fn read_jsonl<T: DeserializeOwned>(path: &str) -> Result<Vec<T>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path))?;
    let mut records = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("failed to read {}:{}", path, idx + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line)
            .with_context(|| format!("malformed record at {}:{}", path, idx + 1))?;
        records.push(record);
    }
    Ok(records)
}
