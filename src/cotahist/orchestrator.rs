//! COTAHIST Extraction Orchestrator (§4.6)
//!
//! Reads every discovered ZIP, streams its single inner fixed-width TXT
//! through the parser, and appends the resulting records to one
//! consolidated Parquet output. ZIP-level concurrency and (in FAST mode)
//! parser-pool concurrency are both CPU/disk-bound, so both are modeled
//! as Rayon thread pools rather than async tasks (§9's "I/O-bound vs
//! CPU-bound concurrency kinds" redesign note) — the Download Engine is
//! the async, I/O-bound half of that split.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::mpsc::sync_channel;
use std::sync::Mutex;

use arrow::array::RecordBatch;
use rayon::prelude::*;
use zip::ZipArchive;

use super::arrow_batch::{build_record_batch, cotahist_schema};
use super::parser::{CotahistParser, LineOutcome};
use super::request::{ExtractionRequest, ProcessingMode};
use crate::error::{DataFinanceError, Result};
use crate::parquet_writer;
use crate::resource_monitor::{ResourceMonitor, ResourceState};

const PARSE_BATCH_SIZE: usize = 10_000;
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Result of a single COTAHIST consolidation run.
#[derive(Debug, serde::Serialize)]
pub struct ExtractionReport {
    pub total_files: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub total_records: usize,
    pub batches_written: usize,
    pub errors: BTreeMap<String, String>,
    pub output_file: PathBuf,
}

pub struct CotahistOrchestrator<'a> {
    monitor: &'a ResourceMonitor,
}

impl<'a> CotahistOrchestrator<'a> {
    pub fn new(monitor: &'a ResourceMonitor) -> Self {
        Self { monitor }
    }

    pub fn execute(&self, request: &ExtractionRequest) -> Result<ExtractionReport> {
        std::fs::create_dir_all(&request.destination_directory)?;
        let output_path = request
            .destination_directory
            .join(format!("{}.parquet", request.output_filename));

        let total_files = request.discovered_zip_files.len();
        if total_files == 0 {
            parquet_writer::write_empty(cotahist_schema(), &output_path)?;
            return Ok(ExtractionReport {
                total_files: 0,
                success_count: 0,
                error_count: 0,
                total_records: 0,
                batches_written: 0,
                errors: BTreeMap::new(),
                output_file: output_path,
            });
        }

        let max_parallel_zips = match request.processing_mode {
            ProcessingMode::Fast => 10,
            ProcessingMode::Slow => 2,
        };
        let n_zip_workers = self.monitor.safe_worker_count(max_parallel_zips);

        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        let n_parser_workers = self.monitor.safe_worker_count(cpu_count);

        let zip_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(n_zip_workers)
            .build()
            .map_err(|e| DataFinanceError::Extraction(format!("failed to build zip worker pool: {e}")))?;
        let parser_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(n_parser_workers)
            .build()
            .map_err(|e| DataFinanceError::Extraction(format!("failed to build parser worker pool: {e}")))?;

        // Backpressure: the writer is the single sequential consumer;
        // the channel capacity bounds how many completed batches can
        // queue up before a producer blocks on send (§5).
        let channel_capacity = (n_zip_workers.max(n_parser_workers)) * 2;
        let (sender, receiver) = sync_channel::<RecordBatch>(channel_capacity);

        let errors: Mutex<BTreeMap<String, String>> = Mutex::new(BTreeMap::new());
        let success_count = Mutex::new(0usize);
        let monitor = self.monitor;

        let (total_records, batches_written) = std::thread::scope(|scope| -> Result<(usize, usize)> {
            let writer_handle = scope.spawn(|| -> Result<(usize, usize)> {
                let mut total_records = 0usize;
                let mut batches_written = 0usize;
                while let Ok(batch) = receiver.recv() {
                    if batch.num_rows() == 0 {
                        continue;
                    }
                    parquet_writer::write(&batch, &output_path, monitor)?;
                    total_records += batch.num_rows();
                    batches_written += 1;
                }
                Ok((total_records, batches_written))
            });

            zip_pool.install(|| {
                request.discovered_zip_files.par_iter().for_each(|zip_path| {
                    if monitor.circuit_breaker_active() {
                        monitor.wait_for(ResourceState::Critical, std::time::Duration::from_secs(30));
                    }

                    let file_name = zip_path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .unwrap_or("<unknown>")
                        .to_string();

                    match process_one_zip(zip_path, request, &parser_pool, monitor, &sender) {
                        Ok(_row_count) => {
                            *success_count.lock().unwrap() += 1;
                        }
                        Err(reason) => {
                            errors.lock().unwrap().insert(file_name, reason);
                        }
                    }
                });
            });

            drop(sender);
            writer_handle
                .join()
                .map_err(|_| DataFinanceError::Extraction("writer thread panicked".to_string()))?
        })?;

        let errors = errors.into_inner().unwrap();
        let success_count = success_count.into_inner().unwrap();
        let error_count = errors.len();

        if total_records == 0 {
            if error_count == total_files {
                return Err(DataFinanceError::Extraction(format!(
                    "all {total_files} COTAHIST file(s) failed: {}",
                    errors
                        .iter()
                        .map(|(k, v)| format!("{k}: {v}"))
                        .collect::<Vec<_>>()
                        .join("; ")
                )));
            }
            // At least one ZIP succeeded but produced no matching rows
            // (Scenario B) — still emit a well-formed, zero-row Parquet.
            parquet_writer::write_empty(cotahist_schema(), &output_path)?;
        }

        Ok(ExtractionReport {
            total_files,
            success_count,
            error_count,
            total_records,
            batches_written,
            errors,
            output_file: output_path,
        })
    }
}

/// Opens one ZIP, locates its single inner TXT, streams it line by line,
/// parses (batched in FAST mode, inline in SLOW mode), and periodically
/// flushes to the writer channel. Returns the number of emitted rows, or
/// a per-file failure reason.
fn process_one_zip(
    zip_path: &Path,
    request: &ExtractionRequest,
    parser_pool: &rayon::ThreadPool,
    monitor: &ResourceMonitor,
    sender: &std::sync::mpsc::SyncSender<RecordBatch>,
) -> std::result::Result<usize, String> {
    let file = std::fs::File::open(zip_path).map_err(|e| format!("cannot open zip: {e}"))?;
    let mut archive = ZipArchive::new(file).map_err(|e| format!("corrupted zip: {e}"))?;

    let data_indices: Vec<usize> = (0..archive.len())
        .filter(|&i| {
            archive
                .by_index(i)
                .map(|entry| !entry.is_dir())
                .unwrap_or(false)
        })
        .collect();

    if data_indices.is_empty() {
        return Err("missing-txt".to_string());
    }
    if data_indices.len() > 1 {
        return Err("multiple-entries".to_string());
    }

    let parser = CotahistParser::new(request.target_market_codes.clone());
    let flush_size = monitor.safe_batch_size(PARSE_BATCH_SIZE);

    let mut entry = archive
        .by_index(data_indices[0])
        .map_err(|e| format!("corrupted zip entry: {e}"))?;

    let mut remainder: Vec<u8> = Vec::new();
    let mut read_buf = vec![0u8; READ_BUFFER_SIZE];
    let mut line_batch: Vec<Vec<u8>> = Vec::new();
    let mut pending_records = Vec::new();
    let mut total_rows = 0usize;

    loop {
        let n = entry.read(&mut read_buf).map_err(|e| format!("read error: {e}"))?;
        if n == 0 {
            break;
        }
        remainder.extend_from_slice(&read_buf[..n]);

        while let Some(pos) = remainder.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = remainder.drain(..=pos).collect();
            line.pop(); // drop '\n'
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            line_batch.push(line);

            if line_batch.len() >= PARSE_BATCH_SIZE {
                let parsed = parse_lines(&parser, &line_batch, request.processing_mode, parser_pool);
                line_batch.clear();
                pending_records.extend(parsed);
                flush_if_needed(&mut pending_records, flush_size, sender, &mut total_rows)?;
            }
        }
    }
    if !remainder.is_empty() {
        line_batch.push(std::mem::take(&mut remainder));
    }
    if !line_batch.is_empty() {
        let parsed = parse_lines(&parser, &line_batch, request.processing_mode, parser_pool);
        pending_records.extend(parsed);
    }
    flush_all(&mut pending_records, sender, &mut total_rows)?;

    Ok(total_rows)
}

fn parse_lines(
    parser: &CotahistParser,
    lines: &[Vec<u8>],
    mode: ProcessingMode,
    parser_pool: &rayon::ThreadPool,
) -> Vec<super::record::CotahistRecord> {
    match mode {
        ProcessingMode::Fast => parser_pool.install(|| {
            lines
                .par_iter()
                .filter_map(|line| match parser.parse_line_bytes(line) {
                    LineOutcome::Record(r) => Some(r),
                    _ => None,
                })
                .collect()
        }),
        ProcessingMode::Slow => lines
            .iter()
            .filter_map(|line| match parser.parse_line_bytes(line) {
                LineOutcome::Record(r) => Some(r),
                _ => None,
            })
            .collect(),
    }
}

fn flush_if_needed(
    pending: &mut Vec<super::record::CotahistRecord>,
    flush_size: usize,
    sender: &std::sync::mpsc::SyncSender<RecordBatch>,
    total_rows: &mut usize,
) -> std::result::Result<(), String> {
    while pending.len() >= flush_size {
        let chunk: Vec<_> = pending.drain(..flush_size).collect();
        send_chunk(chunk, sender, total_rows)?;
    }
    Ok(())
}

fn flush_all(
    pending: &mut Vec<super::record::CotahistRecord>,
    sender: &std::sync::mpsc::SyncSender<RecordBatch>,
    total_rows: &mut usize,
) -> std::result::Result<(), String> {
    if !pending.is_empty() {
        let chunk = std::mem::take(pending);
        send_chunk(chunk, sender, total_rows)?;
    }
    Ok(())
}

fn send_chunk(
    chunk: Vec<super::record::CotahistRecord>,
    sender: &std::sync::mpsc::SyncSender<RecordBatch>,
    total_rows: &mut usize,
) -> std::result::Result<(), String> {
    let n = chunk.len();
    let batch = build_record_batch(&chunk).map_err(|e| format!("failed to build batch: {e}"))?;
    sender
        .send(batch)
        .map_err(|_| "writer channel closed unexpectedly".to_string())?;
    *total_rows += n;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceLimits;
    use std::io::Write;
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    fn write_cotahist_zip(dir: &Path, year: i32, lines: &[String]) -> PathBuf {
        let zip_path = dir.join(format!("COTAHIST_A{year}.ZIP"));
        let file = std::fs::File::create(&zip_path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        zip.start_file(format!("COTAHIST_A{year}.TXT"), SimpleFileOptions::default())
            .unwrap();
        for line in lines {
            writeln!(zip, "{line}").unwrap();
        }
        zip.finish().unwrap();
        zip_path
    }

    fn quote_line(market_type: &str, closing_price_raw: &str) -> String {
        let mut line = vec![' '; 245];
        let set = |line: &mut Vec<char>, start_1: usize, value: &str| {
            for (i, c) in value.chars().enumerate() {
                line[start_1 - 1 + i] = c;
            }
        };
        set(&mut line, 1, "01");
        set(&mut line, 3, "20230102");
        set(&mut line, 11, "02");
        set(&mut line, 13, "PETR4");
        set(&mut line, 25, market_type);
        set(&mut line, 28, "PETROBRAS");
        set(&mut line, 40, "PN");
        set(&mut line, 57, "0000000000000");
        set(&mut line, 70, "0000000000000");
        set(&mut line, 83, "0000000000000");
        set(&mut line, 96, "0000000000000");
        set(&mut line, 109, closing_price_raw);
        set(&mut line, 122, "0000000000000");
        set(&mut line, 135, "0000000000000");
        set(&mut line, 148, "00001");
        set(&mut line, 153, "00000000000000001");
        set(&mut line, 171, "000000000000000100");
        set(&mut line, 203, "00000000");
        set(&mut line, 211, "0000001");
        set(&mut line, 231, "BRPETRACNPR6");
        set(&mut line, 243, "119");
        line.into_iter().collect()
    }

    fn build_request(
        src: &Path,
        dest: &Path,
        market_matches: bool,
    ) -> ExtractionRequest {
        let lines = vec![
            "00header".to_string() + &" ".repeat(237),
            quote_line(if market_matches { "010" } else { "070" }, "0000000002776"),
            "99trailer".to_string() + &" ".repeat(236),
        ];
        write_cotahist_zip(src, 2023, &lines);

        ExtractionRequest::build(
            src,
            dest,
            ["ações".to_string()].into_iter().collect(),
            (2023, 2023),
            "consolidated",
            ProcessingMode::Fast,
            2026,
        )
        .unwrap()
    }

    #[test]
    fn scenario_a_happy_path() {
        let src = tempdir().unwrap();
        let dest = tempdir().unwrap();
        let request = build_request(src.path(), dest.path(), true);

        let monitor = ResourceMonitor::with_limits(ResourceLimits::default());
        let orchestrator = CotahistOrchestrator::new(&monitor);
        let report = orchestrator.execute(&request).unwrap();

        assert_eq!(report.total_files, 1);
        assert_eq!(report.success_count, 1);
        assert_eq!(report.error_count, 0);
        assert_eq!(report.total_records, 1);
        assert!(report.output_file.exists());
        assert_eq!(parquet_writer::read_row_count(&report.output_file).unwrap(), 1);
    }

    #[test]
    fn scenario_b_filtered_out_produces_empty_parquet() {
        let src = tempdir().unwrap();
        let dest = tempdir().unwrap();
        let request = build_request(src.path(), dest.path(), false);

        let monitor = ResourceMonitor::with_limits(ResourceLimits::default());
        let orchestrator = CotahistOrchestrator::new(&monitor);
        let report = orchestrator.execute(&request).unwrap();

        assert_eq!(report.total_records, 0);
        assert!(report.output_file.exists());
        assert_eq!(parquet_writer::read_row_count(&report.output_file).unwrap(), 0);
    }

    #[test]
    fn missing_inner_txt_is_a_per_zip_failure() {
        let src = tempdir().unwrap();
        let dest = tempdir().unwrap();

        let zip_path = src.path().join("COTAHIST_A2023.ZIP");
        let file = std::fs::File::create(&zip_path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        zip.add_directory("empty/", SimpleFileOptions::default()).unwrap();
        zip.finish().unwrap();

        let request = ExtractionRequest::build(
            src.path(),
            dest.path(),
            ["ações".to_string()].into_iter().collect(),
            (2023, 2023),
            "consolidated",
            ProcessingMode::Fast,
            2026,
        )
        .unwrap();

        let monitor = ResourceMonitor::with_limits(ResourceLimits::default());
        let orchestrator = CotahistOrchestrator::new(&monitor);
        let result = orchestrator.execute(&request);
        assert!(result.is_err());
    }
}
