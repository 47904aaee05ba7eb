//! Per-file CSV schema inference for the Atomic ZIP→Parquet Extractor.
//!
//! CVM CSVs vary in column set across document types and years, so the
//! schema is inferred per file rather than declared statically (unlike
//! the COTAHIST schema, which is fixed — see `cotahist::arrow_batch`).

use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int64Array, RecordBatch, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use csv::StringRecord;

use crate::error::{DataFinanceError, Result};

const INFERENCE_SAMPLE_SIZE: usize = 100;

/// Column-level type, inferred by sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Int64,
    Float64,
    Utf8,
}

fn looks_like_int(cell: &str) -> bool {
    !cell.is_empty() && cell.parse::<i64>().is_ok()
}

fn looks_like_float(cell: &str) -> bool {
    !cell.is_empty() && normalize_decimal(cell).parse::<f64>().is_ok()
}

/// CVM CSVs commonly use a comma decimal separator; normalize before
/// attempting a float parse.
fn normalize_decimal(cell: &str) -> String {
    cell.replace(',', ".")
}

/// CVM's published data dictionary prefixes monetary columns `VL_`
/// (e.g. `VL_CONTA`) and quantity columns `QTDE_`/`QTD_` (e.g.
/// `QTDE_ACOES`) across every DFP/ITR document type. When a header
/// matches one of these conventions the column's declared type is taken
/// from the name rather than sampled, since a name-declared column can
/// disagree with its own file's data (a malformed export, a wrong
/// delimiter upstream) in a way a self-sampled column never can.
fn declared_type_from_name(name: &str) -> Option<ColumnType> {
    let upper = name.trim().to_uppercase();
    if upper.starts_with("VL_") {
        Some(ColumnType::Float64)
    } else if upper.starts_with("QTDE_") || upper.starts_with("QTD_") {
        Some(ColumnType::Int64)
    } else {
        None
    }
}

/// Infers one `ColumnType` per header column. A column whose header
/// matches a known CVM naming convention (see `declared_type_from_name`)
/// keeps that declared type unconditionally; otherwise the type is
/// inferred from up to the first `INFERENCE_SAMPLE_SIZE` sampled rows: a
/// column is `Int64` only if every sampled non-empty cell parses as an
/// integer, `Float64` if every sampled non-empty cell parses as a float,
/// else `Utf8`.
pub fn infer_column_types(headers: &StringRecord, sample_rows: &[StringRecord]) -> Vec<ColumnType> {
    let n_cols = headers.len();
    let sample: Vec<&StringRecord> = sample_rows.iter().take(INFERENCE_SAMPLE_SIZE).collect();

    (0..n_cols)
        .map(|col| {
            if let Some(declared) = headers.get(col).and_then(declared_type_from_name) {
                return declared;
            }
            let cells: Vec<&str> = sample.iter().filter_map(|r| r.get(col)).collect();
            if cells.iter().all(|c| looks_like_int(c) || c.is_empty()) && cells.iter().any(|c| !c.is_empty()) {
                ColumnType::Int64
            } else if cells.iter().all(|c| looks_like_float(c) || c.is_empty()) && cells.iter().any(|c| !c.is_empty()) {
                ColumnType::Float64
            } else {
                ColumnType::Utf8
            }
        })
        .collect()
}

pub fn build_schema(headers: &StringRecord, column_types: &[ColumnType]) -> SchemaRef {
    let fields: Vec<Field> = headers
        .iter()
        .zip(column_types.iter())
        .map(|(name, ty)| {
            let data_type = match ty {
                ColumnType::Int64 => DataType::Int64,
                ColumnType::Float64 => DataType::Float64,
                ColumnType::Utf8 => DataType::Utf8,
            };
            Field::new(name, data_type, true)
        })
        .collect();
    Arc::new(Schema::new(fields))
}

/// Converts one chunk of CSV rows into a typed `RecordBatch`, per the
/// inferred schema. Rows with a cell that fails to parse under its
/// column's inferred type are dropped; the caller tracks how many.
pub fn rows_to_batch(
    schema: SchemaRef,
    column_types: &[ColumnType],
    rows: &[StringRecord],
) -> Result<(RecordBatch, usize)> {
    let n_cols = column_types.len();
    let mut accepted_rows: Vec<&StringRecord> = Vec::with_capacity(rows.len());

    'row: for row in rows {
        for (col, ty) in column_types.iter().enumerate() {
            let cell = row.get(col).unwrap_or("");
            let valid = match ty {
                ColumnType::Int64 => cell.is_empty() || looks_like_int(cell),
                ColumnType::Float64 => cell.is_empty() || looks_like_float(cell),
                ColumnType::Utf8 => true,
            };
            if !valid {
                continue 'row;
            }
        }
        accepted_rows.push(row);
    }

    let skipped = rows.len() - accepted_rows.len();

    let columns: Result<Vec<ArrayRef>> = (0..n_cols)
        .map(|col| -> Result<ArrayRef> {
            let array: ArrayRef = match column_types[col] {
                ColumnType::Int64 => Arc::new(
                    accepted_rows
                        .iter()
                        .map(|r| r.get(col).filter(|c| !c.is_empty()).map(|c| c.parse::<i64>().unwrap()))
                        .collect::<Int64Array>(),
                ),
                ColumnType::Float64 => Arc::new(
                    accepted_rows
                        .iter()
                        .map(|r| {
                            r.get(col)
                                .filter(|c| !c.is_empty())
                                .map(|c| normalize_decimal(c).parse::<f64>().unwrap())
                        })
                        .collect::<Float64Array>(),
                ),
                ColumnType::Utf8 => Arc::new(
                    accepted_rows
                        .iter()
                        .map(|r| r.get(col).filter(|c| !c.is_empty()))
                        .collect::<StringArray>(),
                ),
            };
            Ok(array)
        })
        .collect();

    let batch = RecordBatch::try_new(schema, columns?)
        .map_err(|e| DataFinanceError::Extraction(format!("failed to build CSV record batch: {e}")))?;
    Ok((batch, skipped))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(fields: &[&str]) -> StringRecord {
        StringRecord::from(fields.to_vec())
    }

    #[test]
    fn infers_int_float_and_string_columns() {
        let headers = record(&["id", "value", "name"]);
        let rows = vec![record(&["1", "1,50", "alpha"]), record(&["2", "2,75", "beta"])];
        let types = infer_column_types(&headers, &rows);
        assert_eq!(types, vec![ColumnType::Int64, ColumnType::Float64, ColumnType::Utf8]);
    }

    #[test]
    fn every_row_rejected_when_declared_type_mismatches_all_data() {
        let headers = record(&["id"]);
        let schema = build_schema(&headers, &[ColumnType::Int64]);
        let rows = vec![record(&["abc"]), record(&["def"])];
        let (batch, skipped) = rows_to_batch(schema, &[ColumnType::Int64], &rows).unwrap();
        assert_eq!(skipped, 2);
        assert_eq!(batch.num_rows(), 0);
    }

    #[test]
    fn vl_prefixed_header_is_declared_float_regardless_of_sampled_data() {
        let headers = record(&["COD", "VL_CONTA"]);
        // every VL_CONTA cell is non-numeric text; sampling alone would
        // have inferred Utf8 (and accepted every row), but the name
        // convention declares it Float64.
        let rows = vec![record(&["1", "abc"]), record(&["2", "def"])];
        let types = infer_column_types(&headers, &rows);
        assert_eq!(types, vec![ColumnType::Int64, ColumnType::Float64]);

        let schema = build_schema(&headers, &types);
        let (batch, skipped) = rows_to_batch(schema, &types, &rows).unwrap();
        assert_eq!(skipped, 2);
        assert_eq!(batch.num_rows(), 0);
    }

    #[test]
    fn rows_with_bad_cells_are_skipped_not_fatal() {
        let headers = record(&["id", "value"]);
        let rows = vec![record(&["1", "10"]), record(&["1", "10"])];
        let types = infer_column_types(&headers, &rows);
        let schema = build_schema(&headers, &types);

        let bad_row = record(&["not-an-int", "10"]);
        let all_rows = vec![rows[0].clone(), bad_row, rows[1].clone()];
        let (batch, skipped) = rows_to_batch(schema, &types, &all_rows).unwrap();

        assert_eq!(skipped, 1);
        assert_eq!(batch.num_rows(), 2);
    }
}
