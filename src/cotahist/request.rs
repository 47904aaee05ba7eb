//! ExtractionRequest (§3) and its construction/validation

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::{DataFinanceError, Result};
use crate::validators::{asset_classes_to_market_codes, validate_b3_year_range};

/// Concurrency/memory tradeoff point selected at construction (§9's
/// "fast vs slow as a flag" redesign note — encoded as an enum, never
/// leaking into per-record code paths).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingMode {
    Fast,
    Slow,
}

/// Parameters for a single COTAHIST consolidation run.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub source_directory: PathBuf,
    pub destination_directory: PathBuf,
    pub asset_classes: BTreeSet<String>,
    pub year_range: (i32, i32),
    pub target_market_codes: BTreeSet<String>,
    pub discovered_zip_files: Vec<PathBuf>,
    pub output_filename: String,
    pub processing_mode: ProcessingMode,
}

impl ExtractionRequest {
    /// Validates inputs, derives `target_market_codes`, and discovers the
    /// `COTAHIST_A{yyyy}.ZIP` files within `[first, last]` present in
    /// `source_directory`. Validators run before any other side effect
    /// (§4.8).
    pub fn build(
        source_directory: impl Into<PathBuf>,
        destination_directory: impl Into<PathBuf>,
        asset_classes: BTreeSet<String>,
        year_range: (i32, i32),
        output_filename: impl Into<String>,
        processing_mode: ProcessingMode,
        current_year: i32,
    ) -> Result<Self> {
        let (first, last) = year_range;
        validate_b3_year_range(first, last, current_year)?;
        let target_market_codes = asset_classes_to_market_codes(&asset_classes)?;

        let source_directory = source_directory.into();
        let discovered_zip_files = discover_zip_files(&source_directory, first, last)?;

        Ok(Self {
            source_directory,
            destination_directory: destination_directory.into(),
            asset_classes,
            year_range,
            target_market_codes,
            discovered_zip_files,
            output_filename: output_filename.into(),
            processing_mode,
        })
    }
}

/// Lists `COTAHIST_A{yyyy}.ZIP` files in `dir` whose year falls in
/// `[first, last]`, in filename order.
fn discover_zip_files(dir: &Path, first: i32, last: i32) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    if !dir.exists() {
        return Err(DataFinanceError::Validation(format!(
            "source directory does not exist: {}",
            dir.display()
        )));
    }

    let entries = std::fs::read_dir(dir)?;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if let Some(year) = parse_cotahist_filename_year(name) {
                if year >= first && year <= last {
                    found.push(path);
                }
            }
        }
    }
    found.sort();
    Ok(found)
}

/// Parses `COTAHIST_A{yyyy}.ZIP` (case-insensitive extension) and returns
/// the embedded year, or `None` if the name doesn't match the convention.
pub fn parse_cotahist_filename_year(name: &str) -> Option<i32> {
    let upper = name.to_uppercase();
    if !upper.starts_with("COTAHIST_A") || !upper.ends_with(".ZIP") {
        return None;
    }
    let digits = &upper["COTAHIST_A".len()..upper.len() - ".ZIP".len()];
    if digits.len() != 4 {
        return None;
    }
    digits.parse().ok()
}
