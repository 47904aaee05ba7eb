//! Thin wiring binary for the B3 COTAHIST consolidation pipeline.
//!
//! Argument parsing, a CLI surface, and a presentation layer are explicit
//! collaborators the core library does not provide (§1's out-of-scope
//! list); this binary exists only to exercise the wiring end to end via
//! environment variables, the way a deployment script would invoke it.

use std::collections::BTreeSet;
use std::env;

use datafinance::cotahist::{CotahistOrchestrator, ExtractionRequest, ProcessingMode};
use datafinance::resource_monitor::ResourceMonitor;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let source_directory = env::var("DATAFINANCE_SOURCE_DIR")
        .map_err(|_| anyhow::anyhow!("DATAFINANCE_SOURCE_DIR must be set"))?;
    let destination_directory = env::var("DATAFINANCE_DEST_DIR")
        .map_err(|_| anyhow::anyhow!("DATAFINANCE_DEST_DIR must be set"))?;
    let output_filename = env::var("DATAFINANCE_OUTPUT_NAME").unwrap_or_else(|_| "consolidated".to_string());

    let asset_classes: BTreeSet<String> = env::var("DATAFINANCE_ASSET_CLASSES")
        .unwrap_or_else(|_| "ações".to_string())
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    let first_year: i32 = env::var("DATAFINANCE_YEAR_FIRST")
        .ok()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| anyhow::anyhow!("DATAFINANCE_YEAR_FIRST must be set to an integer year"))?;
    let last_year: i32 = env::var("DATAFINANCE_YEAR_LAST")
        .ok()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| anyhow::anyhow!("DATAFINANCE_YEAR_LAST must be set to an integer year"))?;

    let processing_mode = match env::var("DATAFINANCE_MODE").as_deref() {
        Ok("SLOW") => ProcessingMode::Slow,
        _ => ProcessingMode::Fast,
    };

    let current_year = chrono::Utc::now().date_naive().format("%Y").to_string().parse()?;

    let request = ExtractionRequest::build(
        source_directory,
        destination_directory,
        asset_classes,
        (first_year, last_year),
        output_filename,
        processing_mode,
        current_year,
    )?;

    tracing::info!(
        files = request.discovered_zip_files.len(),
        mode = ?request.processing_mode,
        "starting COTAHIST consolidation"
    );

    let monitor = ResourceMonitor::global();
    let orchestrator = CotahistOrchestrator::new(monitor);
    let report = orchestrator.execute(&request)?;

    tracing::info!(
        total_files = report.total_files,
        success_count = report.success_count,
        error_count = report.error_count,
        total_records = report.total_records,
        output = %report.output_file.display(),
        "COTAHIST consolidation complete"
    );

    for (file, reason) in &report.errors {
        tracing::warn!(file = %file, reason = %reason, "per-file failure");
    }

    // Machine-readable summary line, for deployments that scrape stdout
    // rather than the structured log stream.
    println!("{}", serde_json::to_string(&report)?);

    Ok(())
}
