//! Atomic ZIP→Parquet Extractor (§4.4)
//!
//! Converts every `.csv` entry inside a ZIP into a sibling `.parquet` file,
//! transactionally: either every CSV produced a Parquet, or none remain on
//! disk and a single aggregated `ExtractionError` names the offending
//! entry (§9's "batched all-or-nothing" framing, grounded the same way as
//! the COTAHIST orchestrator's per-ZIP rollback).

use std::io::Read;
use std::path::{Path, PathBuf};

use csv::StringRecord;
use encoding_rs::WINDOWS_1252;
use zip::ZipArchive;

use super::schema::{build_schema, infer_column_types, rows_to_batch};
use crate::error::{DataFinanceError, Result};
use crate::parquet_writer;
use crate::resource_monitor::ResourceMonitor;

const DEFAULT_BATCH_SIZE: usize = 50_000;

pub struct AtomicExtractor<'a> {
    monitor: &'a ResourceMonitor,
}

impl<'a> AtomicExtractor<'a> {
    pub fn new(monitor: &'a ResourceMonitor) -> Self {
        Self { monitor }
    }

    /// Converts every inner `.csv` entry of `zip_path` into a sibling
    /// `.parquet` file under `output_dir`. Returns the list of produced
    /// paths, or an empty list if the ZIP has no CSV entries.
    pub fn extract(&self, zip_path: &Path, output_dir: &Path) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(output_dir)?;

        let file = std::fs::File::open(zip_path)?;
        let mut archive = ZipArchive::new(file)
            .map_err(|e| DataFinanceError::CorruptedZip(format!("{}: {e}", zip_path.display())))?;

        let csv_indices: Vec<usize> = (0..archive.len())
            .filter(|&i| {
                archive
                    .by_index(i)
                    .map(|entry| !entry.is_dir() && entry.name().to_lowercase().ends_with(".csv"))
                    .unwrap_or(false)
            })
            .collect();

        if csv_indices.is_empty() {
            return Ok(Vec::new());
        }

        let mut created: Vec<PathBuf> = Vec::new();

        for &index in &csv_indices {
            let entry_name = archive
                .by_index(index)
                .map_err(|e| DataFinanceError::CorruptedZip(e.to_string()))?
                .name()
                .to_string();

            match self.convert_one(&mut archive, index, &entry_name, output_dir) {
                Ok(target) => created.push(target),
                Err(err) => {
                    rollback(&created);
                    return Err(DataFinanceError::Extraction(format!(
                        "{entry_name}: {err}"
                    )));
                }
            }
        }

        Ok(created)
    }

    fn convert_one(
        &self,
        archive: &mut ZipArchive<std::fs::File>,
        index: usize,
        entry_name: &str,
        output_dir: &Path,
    ) -> Result<PathBuf> {
        let mut raw = Vec::new();
        archive
            .by_index(index)
            .map_err(|e| DataFinanceError::CorruptedZip(e.to_string()))?
            .read_to_end(&mut raw)?;

        let (decoded, _enc, _had_errors) = WINDOWS_1252.decode(&raw);

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b';')
            .has_headers(true)
            .from_reader(decoded.as_bytes());

        let headers = reader
            .headers()
            .map_err(|e| DataFinanceError::Extraction(format!("malformed CSV header: {e}")))?
            .clone();

        let mut all_rows: Vec<StringRecord> = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| DataFinanceError::Extraction(format!("malformed CSV row: {e}")))?;
            all_rows.push(record);
        }

        let column_types = infer_column_types(&headers, &all_rows);
        let schema = build_schema(&headers, &column_types);

        let batch_size = self.monitor.safe_batch_size(DEFAULT_BATCH_SIZE);
        let mut batches = Vec::new();
        let mut total_skipped = 0usize;
        let mut total_accepted = 0usize;

        for chunk in all_rows.chunks(batch_size.max(1)) {
            let (batch, skipped) = rows_to_batch(schema.clone(), &column_types, chunk)?;
            total_skipped += skipped;
            total_accepted += batch.num_rows();
            if batch.num_rows() > 0 {
                batches.push(batch);
            }
        }

        if total_accepted == 0 && !all_rows.is_empty() {
            return Err(DataFinanceError::Extraction(format!(
                "all {total_skipped} row(s) failed type conversion"
            )));
        }

        let stem = Path::new(entry_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("output");
        let target = output_dir.join(format!("{stem}.parquet"));

        if batches.is_empty() {
            parquet_writer::write_empty(schema, &target)?;
        } else {
            parquet_writer::write_many(&batches, &target, self.monitor)?;
        }

        Ok(target)
    }
}

/// Deletes every previously produced Parquet for this ZIP; failures to
/// delete are logged, never propagated (the rollback itself must not fail
/// the caller with a different error than the original one).
fn rollback(created: &[PathBuf]) {
    for path in created {
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!("rollback: failed to remove {}: {e}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceLimits;
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    fn write_zip(dir: &Path, name: &str, entries: &[(&str, &str)]) -> PathBuf {
        let path = dir.join(name);
        let file = std::fs::File::create(&path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        for (entry_name, content) in entries {
            zip.start_file(*entry_name, SimpleFileOptions::default()).unwrap();
            std::io::Write::write_all(&mut zip, content.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
        path
    }

    #[test]
    fn empty_csv_list_returns_empty_no_error() {
        let dir = tempdir().unwrap();
        let zip_path = write_zip(dir.path(), "empty.zip", &[("readme.txt", "hello")]);
        let out_dir = tempdir().unwrap();

        let monitor = ResourceMonitor::with_limits(ResourceLimits::default());
        let extractor = AtomicExtractor::new(&monitor);
        let result = extractor.extract(&zip_path, out_dir.path()).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn converts_every_csv_to_a_sibling_parquet() {
        let dir = tempdir().unwrap();
        let csv_a = "id;value;name\n1;10,5;alpha\n2;20,25;beta\n";
        let csv_b = "id;flag\n1;S\n2;N\n";
        let zip_path = write_zip(dir.path(), "docs.zip", &[("a.csv", csv_a), ("b.csv", csv_b)]);
        let out_dir = tempdir().unwrap();

        let monitor = ResourceMonitor::with_limits(ResourceLimits::default());
        let extractor = AtomicExtractor::new(&monitor);
        let created = extractor.extract(&zip_path, out_dir.path()).unwrap();

        assert_eq!(created.len(), 2);
        for path in &created {
            assert!(path.exists());
            assert_eq!(parquet_writer::read_row_count(path).unwrap(), 2);
        }
    }

    #[test]
    fn malformed_csv_is_a_per_file_failure_that_rolls_back() {
        let dir = tempdir().unwrap();
        let csv_a = "id;value\n1;10\n2;20\n";
        // a ragged row (3 fields against a 2-column header) is a structural
        // CSV error under strict (non-flexible) parsing.
        let csv_c = "id;value\n1;10\n2;20;extra\n";
        let zip_path = write_zip(dir.path(), "docs.zip", &[("a.csv", csv_a), ("c.csv", csv_c)]);
        let out_dir = tempdir().unwrap();

        let monitor = ResourceMonitor::with_limits(ResourceLimits::default());
        let extractor = AtomicExtractor::new(&monitor);
        let result = extractor.extract(&zip_path, out_dir.path());

        assert!(result.is_err());
        let remaining: Vec<_> = std::fs::read_dir(out_dir.path()).unwrap().collect();
        assert!(remaining.is_empty());
    }

    #[test]
    fn all_rows_failing_type_conversion_is_a_per_file_failure_that_rolls_back() {
        let dir = tempdir().unwrap();
        let csv_a = "id;value\n1;10\n2;20\n";
        let csv_b = "id;value\n1;30\n2;40\n";
        // every row is syntactically well-formed (uniform field count, no
        // csv::Error), but VL_CONTA's declared type (Float64, from the
        // CVM naming convention) disagrees with every sampled value.
        let csv_c = "id;VL_CONTA\n1;not-a-number\n2;also-not-a-number\n";
        let zip_path = write_zip(
            dir.path(),
            "docs.zip",
            &[("a.csv", csv_a), ("b.csv", csv_b), ("c.csv", csv_c)],
        );
        let out_dir = tempdir().unwrap();

        let monitor = ResourceMonitor::with_limits(ResourceLimits::default());
        let extractor = AtomicExtractor::new(&monitor);
        let result = extractor.extract(&zip_path, out_dir.path());

        let err = result.unwrap_err();
        assert!(err.to_string().contains("c.csv"));
        assert!(err.to_string().contains("row(s) failed type conversion"));

        let remaining: Vec<_> = std::fs::read_dir(out_dir.path()).unwrap().collect();
        assert!(remaining.is_empty(), "a.parquet/b.parquet must be rolled back");
    }

    #[test]
    fn corrupted_zip_is_reported_without_rollback() {
        let dir = tempdir().unwrap();
        let bogus_path = dir.path().join("bogus.zip");
        std::fs::write(&bogus_path, b"not a zip file").unwrap();
        let out_dir = tempdir().unwrap();

        let monitor = ResourceMonitor::with_limits(ResourceLimits::default());
        let extractor = AtomicExtractor::new(&monitor);
        let result = extractor.extract(&bogus_path, out_dir.path());
        assert!(matches!(result, Err(DataFinanceError::CorruptedZip(_))));
    }
}
