//! Parquet Writer (§4.7), shared by the CVM extractor and the COTAHIST
//! orchestrator.
//!
//! Two modes, selected automatically by the Resource Monitor's state at
//! the moment of the call: Bulk (HEALTHY — read+concat+rewrite, simple
//! and fast for small outputs) and Streaming (non-HEALTHY — bounded
//! memory regardless of file size). Every write goes through
//! `sibling.tmp` then an atomic rename; a failure anywhere before the
//! rename leaves the final path untouched (§9's atomic-file-writes note).

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::RecordBatch;
use arrow::datatypes::SchemaRef;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

use crate::error::{DataFinanceError, Result};
use crate::resource_monitor::{ResourceMonitor, ResourceState};

pub const ROW_GROUP_SIZE: usize = 50_000;

fn writer_properties() -> WriterProperties {
    WriterProperties::builder()
        .set_compression(Compression::ZSTD(Default::default()))
        .set_max_row_group_size(ROW_GROUP_SIZE)
        .build()
}

/// Rough size estimate used for the pre-write free-space check: Arrow's
/// in-memory `get_array_memory_size` is a reasonable proxy for the
/// on-disk footprint before compression, and erring large is safe here.
fn estimate_bytes(batches: &[RecordBatch]) -> u64 {
    batches
        .iter()
        .map(|b| b.get_array_memory_size() as u64)
        .sum()
}

fn ensure_free_space(output_path: &Path, size_estimate: u64) -> Result<()> {
    let parent = output_path.parent().unwrap_or_else(|| Path::new("."));
    let required = (size_estimate as f64 * 1.3) as u64;
    match fs4::available_space(parent) {
        Ok(available) if available < required => Err(DataFinanceError::DiskFull(format!(
            "{} bytes required (with margin), only {} available at {}",
            required,
            available,
            parent.display()
        ))),
        Ok(_) => Ok(()),
        Err(e) => {
            // Can't determine free space (e.g. unsupported filesystem);
            // degrade to "proceed" rather than block all writes.
            tracing::warn!("could not determine free space at {}: {e}", parent.display());
            Ok(())
        }
    }
}

fn tmp_path(output_path: &Path) -> std::path::PathBuf {
    let mut tmp = output_path.as_os_str().to_owned();
    tmp.push(".tmp");
    std::path::PathBuf::from(tmp)
}

/// Writes `batch` to `output_path`, creating the file if absent or
/// appending (per §4.7's Bulk/Streaming modes) if it already exists.
pub fn write(batch: &RecordBatch, output_path: &Path, monitor: &ResourceMonitor) -> Result<()> {
    write_many(std::slice::from_ref(batch), output_path, monitor)
}

pub fn write_many(
    new_batches: &[RecordBatch],
    output_path: &Path,
    monitor: &ResourceMonitor,
) -> Result<()> {
    if new_batches.is_empty() {
        return Ok(());
    }
    let schema = new_batches[0].schema();

    ensure_free_space(output_path, estimate_bytes(new_batches))?;

    let tmp = tmp_path(output_path);
    let result = if output_path.exists() {
        match monitor.snapshot().state {
            ResourceState::Healthy => write_bulk_append(schema, new_batches, output_path, &tmp),
            _ => write_streaming_append(schema, new_batches, output_path, &tmp),
        }
    } else {
        write_fresh(schema, new_batches, &tmp)
    };

    match result {
        Ok(()) => {
            std::fs::rename(&tmp, output_path)?;
            Ok(())
        }
        Err(e) => {
            let _ = std::fs::remove_file(&tmp);
            Err(e)
        }
    }
}

/// Writes a brand-new file: one shot, no existing data to merge.
fn write_fresh(schema: SchemaRef, batches: &[RecordBatch], tmp: &Path) -> Result<()> {
    let file = File::create(tmp)?;
    let mut writer = ArrowWriter::try_new(file, schema, Some(writer_properties()))
        .map_err(|e| DataFinanceError::Extraction(format!("failed to open parquet writer: {e}")))?;
    for batch in batches {
        writer
            .write(batch)
            .map_err(|e| DataFinanceError::Extraction(format!("failed to write batch: {e}")))?;
    }
    writer
        .close()
        .map_err(|e| DataFinanceError::Extraction(format!("failed to close parquet writer: {e}")))?;
    Ok(())
}

/// Bulk mode: read the existing file fully, concatenate with the new
/// batches in memory, write once.
fn write_bulk_append(
    schema: SchemaRef,
    new_batches: &[RecordBatch],
    existing_path: &Path,
    tmp: &Path,
) -> Result<()> {
    let existing = read_all_batches(existing_path)?;
    let mut all: Vec<&RecordBatch> = existing.iter().collect();
    all.extend(new_batches.iter());

    let combined = arrow::compute::concat_batches(&schema, all)
        .map_err(|e| DataFinanceError::Extraction(format!("failed to concatenate batches: {e}")))?;
    write_fresh(schema, &[combined], tmp)
}

/// Streaming mode: re-emit the existing file's row groups and the new
/// batches' rows through a fresh writer, 50,000 rows at a time, so peak
/// memory never exceeds a bounded window regardless of total file size.
fn write_streaming_append(
    schema: SchemaRef,
    new_batches: &[RecordBatch],
    existing_path: &Path,
    tmp: &Path,
) -> Result<()> {
    let file = File::create(tmp)?;
    let mut writer = ArrowWriter::try_new(file, schema.clone(), Some(writer_properties()))
        .map_err(|e| DataFinanceError::Extraction(format!("failed to open parquet writer: {e}")))?;

    let existing_file = File::open(existing_path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(existing_file)
        .map_err(|e| DataFinanceError::Extraction(format!("failed to open existing parquet: {e}")))?
        .with_batch_size(ROW_GROUP_SIZE)
        .build()
        .map_err(|e| DataFinanceError::Extraction(format!("failed to build parquet reader: {e}")))?;
    for batch in reader {
        let batch = batch
            .map_err(|e| DataFinanceError::Extraction(format!("failed to read existing batch: {e}")))?;
        writer
            .write(&batch)
            .map_err(|e| DataFinanceError::Extraction(format!("failed to re-write batch: {e}")))?;
    }

    for batch in new_batches {
        for chunk_start in (0..batch.num_rows()).step_by(ROW_GROUP_SIZE) {
            let len = ROW_GROUP_SIZE.min(batch.num_rows() - chunk_start);
            let slice = batch.slice(chunk_start, len);
            writer
                .write(&slice)
                .map_err(|e| DataFinanceError::Extraction(format!("failed to write new batch: {e}")))?;
        }
    }

    writer
        .close()
        .map_err(|e| DataFinanceError::Extraction(format!("failed to close parquet writer: {e}")))?;
    Ok(())
}

fn read_all_batches(path: &Path) -> Result<Vec<RecordBatch>> {
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| DataFinanceError::Extraction(format!("failed to open existing parquet: {e}")))?
        .build()
        .map_err(|e| DataFinanceError::Extraction(format!("failed to build parquet reader: {e}")))?;
    let mut batches = Vec::new();
    for batch in reader {
        batches.push(batch.map_err(|e| {
            DataFinanceError::Extraction(format!("failed to read existing batch: {e}"))
        })?);
    }
    Ok(batches)
}

/// Writes an empty file with the given schema and zero rows (used for
/// Scenario B: a successful run whose filter matched nothing still
/// produces a well-formed Parquet).
pub fn write_empty(schema: SchemaRef, output_path: &Path) -> Result<()> {
    let batch = RecordBatch::new_empty(schema.clone());
    let tmp = tmp_path(output_path);
    write_fresh(schema, &[batch], &tmp)?;
    std::fs::rename(&tmp, output_path)?;
    Ok(())
}

/// Reads back every row of a Parquet file (used by tests verifying the
/// CSV/COTAHIST → Parquet → read round-trip law).
pub fn read_row_count(path: &Path) -> Result<usize> {
    let batches = read_all_batches(path)?;
    Ok(batches.iter().map(|b| b.num_rows()).sum())
}
