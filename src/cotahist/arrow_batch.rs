//! CotahistRecord <-> Arrow RecordBatch conversion
//!
//! The schema is declared once and matches `CotahistRecord` exactly
//! (§4.7's schema contract): fields, types and nullability never vary
//! across batches written to the same consolidated output.

use std::sync::Arc;

use arrow::array::{
    Date32Array, Decimal128Array, Int16Array, Int32Array, Int64Array, RecordBatch, StringArray,
};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;

use super::record::CotahistRecord;
use crate::error::{DataFinanceError, Result};

const PRICE_PRECISION: u8 = 18;
const PRICE_SCALE: i8 = 2;

pub fn cotahist_schema() -> SchemaRef {
    let price = DataType::Decimal128(PRICE_PRECISION, PRICE_SCALE);
    Arc::new(Schema::new(vec![
        Field::new("trading_date", DataType::Date32, false),
        Field::new("bdi_code", DataType::Utf8, false),
        Field::new("ticker", DataType::Utf8, false),
        Field::new("market_type", DataType::Utf8, false),
        Field::new("short_name", DataType::Utf8, false),
        Field::new("specification", DataType::Utf8, false),
        Field::new("opening_price", price.clone(), false),
        Field::new("high_price", price.clone(), false),
        Field::new("low_price", price.clone(), false),
        Field::new("avg_price", price.clone(), false),
        Field::new("closing_price", price.clone(), false),
        Field::new("best_bid_price", price.clone(), false),
        Field::new("best_ask_price", price.clone(), false),
        Field::new("trade_count", DataType::Int32, false),
        Field::new("total_quantity", DataType::Int64, false),
        Field::new("total_volume", price, false),
        Field::new("expiration_date", DataType::Date32, true),
        Field::new("quote_factor", DataType::Int32, false),
        Field::new("isin_code", DataType::Utf8, false),
        Field::new("distribution_number", DataType::Int16, false),
    ]))
}

fn days_since_epoch(date: NaiveDate) -> i32 {
    (date - epoch()).num_days() as i32
}

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).expect("1970-01-01 is a valid date")
}

fn decimal_to_i128(value: Decimal) -> Result<i128> {
    let rescaled = value.round_dp(PRICE_SCALE as u32);
    if rescaled.scale() != PRICE_SCALE as u32 {
        return Err(DataFinanceError::Extraction(format!(
            "decimal {value} does not fit the declared scale {PRICE_SCALE}"
        )));
    }
    Ok(rescaled.mantissa())
}

/// Builds one Arrow `RecordBatch` from a slice of records, in order.
pub fn build_record_batch(records: &[CotahistRecord]) -> Result<RecordBatch> {
    let schema = cotahist_schema();

    let trading_date: Date32Array = records.iter().map(|r| Some(days_since_epoch(r.trading_date))).collect();
    let bdi_code: StringArray = records.iter().map(|r| Some(r.bdi_code.as_str())).collect();
    let ticker: StringArray = records.iter().map(|r| Some(r.ticker.as_str())).collect();
    let market_type: StringArray = records.iter().map(|r| Some(r.market_type.as_str())).collect();
    let short_name: StringArray = records.iter().map(|r| Some(r.short_name.as_str())).collect();
    let specification: StringArray = records.iter().map(|r| Some(r.specification.as_str())).collect();

    let price_col = |f: fn(&CotahistRecord) -> Decimal| -> Result<Decimal128Array> {
        let values: Result<Vec<i128>> = records.iter().map(|r| decimal_to_i128(f(r))).collect();
        Decimal128Array::from(values?)
            .with_precision_and_scale(PRICE_PRECISION, PRICE_SCALE)
            .map_err(|e| DataFinanceError::Extraction(format!("invalid decimal array: {e}")))
    };

    let opening_price = price_col(|r| r.opening_price)?;
    let high_price = price_col(|r| r.high_price)?;
    let low_price = price_col(|r| r.low_price)?;
    let avg_price = price_col(|r| r.avg_price)?;
    let closing_price = price_col(|r| r.closing_price)?;
    let best_bid_price = price_col(|r| r.best_bid_price)?;
    let best_ask_price = price_col(|r| r.best_ask_price)?;
    let total_volume = price_col(|r| r.total_volume)?;

    let trade_count: Int32Array = records.iter().map(|r| Some(r.trade_count)).collect();
    let total_quantity: Int64Array = records.iter().map(|r| Some(r.total_quantity)).collect();
    let expiration_date: Date32Array = records
        .iter()
        .map(|r| r.expiration_date.map(days_since_epoch))
        .collect();
    let quote_factor: Int32Array = records.iter().map(|r| Some(r.quote_factor)).collect();
    let isin_code: StringArray = records.iter().map(|r| Some(r.isin_code.as_str())).collect();
    let distribution_number: Int16Array = records.iter().map(|r| Some(r.distribution_number)).collect();

    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(trading_date),
            Arc::new(bdi_code),
            Arc::new(ticker),
            Arc::new(market_type),
            Arc::new(short_name),
            Arc::new(specification),
            Arc::new(opening_price),
            Arc::new(high_price),
            Arc::new(low_price),
            Arc::new(avg_price),
            Arc::new(closing_price),
            Arc::new(best_bid_price),
            Arc::new(best_ask_price),
            Arc::new(trade_count),
            Arc::new(total_quantity),
            Arc::new(total_volume),
            Arc::new(expiration_date),
            Arc::new(quote_factor),
            Arc::new(isin_code),
            Arc::new(distribution_number),
        ],
    )
    .map_err(|e| DataFinanceError::Extraction(format!("failed to build record batch: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_record() -> CotahistRecord {
        CotahistRecord {
            trading_date: NaiveDate::from_ymd_opt(2023, 1, 2).unwrap(),
            bdi_code: "02".to_string(),
            ticker: "PETR4".to_string(),
            market_type: "010".to_string(),
            short_name: "PETROBRAS".to_string(),
            specification: "PN".to_string(),
            opening_price: dec!(27.50),
            high_price: dec!(28.00),
            low_price: dec!(27.00),
            avg_price: dec!(27.60),
            closing_price: dec!(27.76),
            best_bid_price: dec!(27.75),
            best_ask_price: dec!(27.77),
            trade_count: 100,
            total_quantity: 100_000,
            total_volume: dec!(2_760_000.00),
            expiration_date: None,
            quote_factor: 1,
            isin_code: "BRPETRACNPR6".to_string(),
            distribution_number: 119,
        }
    }

    #[test]
    fn batch_round_trips_row_count_and_schema() {
        let records = vec![sample_record(), sample_record()];
        let batch = build_record_batch(&records).unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.schema(), cotahist_schema());
    }

    #[test]
    fn null_expiration_date_is_preserved() {
        let batch = build_record_batch(&[sample_record()]).unwrap();
        let col = batch
            .column(16)
            .as_any()
            .downcast_ref::<Date32Array>()
            .unwrap();
        assert!(col.is_null(0));
    }
}
