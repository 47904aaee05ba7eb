//! COTAHIST record shape and field-level decoding primitives (§3, §4.5)

use chrono::NaiveDate;
use rust_decimal::Decimal;

/// One row extracted from a `TIPREG=01` COTAHIST line.
#[derive(Debug, Clone, PartialEq)]
pub struct CotahistRecord {
    pub trading_date: NaiveDate,
    pub bdi_code: String,
    pub ticker: String,
    pub market_type: String,
    pub short_name: String,
    pub specification: String,
    pub opening_price: Decimal,
    pub high_price: Decimal,
    pub low_price: Decimal,
    pub avg_price: Decimal,
    pub closing_price: Decimal,
    pub best_bid_price: Decimal,
    pub best_ask_price: Decimal,
    pub trade_count: i32,
    pub total_quantity: i64,
    pub total_volume: Decimal,
    pub expiration_date: Option<NaiveDate>,
    pub quote_factor: i32,
    pub isin_code: String,
    pub distribution_number: i16,
}

/// Why a line produced no record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// `TIPREG` was `"00"` or `"99"` (header/trailer).
    HeaderOrTrailer,
    /// `TIPREG` was neither `"00"`, `"01"` nor `"99"`.
    Malformed,
    /// Line exceeded 1,000 characters.
    TooLong,
    /// `market_type` was not in the requested filter set.
    FilteredOut,
}

/// Per-line decode failure (counted, never raised further up).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    pub reason: String,
}

/// A fixed-width slice addressed by 1-based inclusive start / inclusive
/// end positions, as COTAHIST documentation numbers its columns.
pub struct FixedWidthLine<'a> {
    chars: &'a [char],
}

impl<'a> FixedWidthLine<'a> {
    pub fn new(chars: &'a [char]) -> Self {
        Self { chars }
    }

    /// Bounded slice: out-of-range requests yield an empty string rather
    /// than panicking (§4.5's bounded-slice rule).
    pub fn field(&self, start_1based: usize, end_1based_inclusive: usize) -> String {
        let start = start_1based.saturating_sub(1);
        let end = end_1based_inclusive.min(self.chars.len());
        if start >= end || start >= self.chars.len() {
            return String::new();
        }
        self.chars[start..end].iter().collect()
    }

    pub fn trimmed(&self, start_1based: usize, end_1based_inclusive: usize) -> String {
        self.field(start_1based, end_1based_inclusive)
            .trim()
            .to_string()
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }
}

/// Decodes an implied-decimal field: the raw digits form an integer that
/// must be divided by `10^scale`. Always routed through `Decimal`'s
/// integer constructor — never through a float — so the conversion is
/// bit-exact.
pub fn decode_implied_decimal(raw: &str, scale: u32) -> Result<Decimal, DecodeError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Decimal::new(0, scale));
    }
    let value: i128 = trimmed.parse().map_err(|_| DecodeError {
        reason: format!("not an integer: {raw:?}"),
    })?;
    let value: i64 = i64::try_from(value).map_err(|_| DecodeError {
        reason: format!("implied-decimal value out of range: {raw:?}"),
    })?;
    Ok(Decimal::new(value, scale))
}

/// Decodes a `YYYYMMDD` date field. `"00000000"` or an empty field is
/// `Ok(None)` (used for the optional `expiration_date`); callers that
/// need a *required* date treat `Ok(None)` as a reason to skip the line.
pub fn decode_optional_date(raw: &str) -> Result<Option<NaiveDate>, DecodeError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "00000000" {
        return Ok(None);
    }
    NaiveDate::parse_from_str(trimmed, "%Y%m%d")
        .map(Some)
        .map_err(|e| DecodeError {
            reason: format!("invalid date {raw:?}: {e}"),
        })
}

/// Decodes a required `YYYYMMDD` date field; `"00000000"` is an error.
pub fn decode_required_date(raw: &str) -> Result<NaiveDate, DecodeError> {
    decode_optional_date(raw)?.ok_or_else(|| DecodeError {
        reason: format!("required date field was empty/zero: {raw:?}"),
    })
}

fn decode_int<T: std::str::FromStr>(raw: &str) -> Result<T, DecodeError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        // Empty numeric fields default to zero (§4.5 bounded-slice rule).
        return "0".parse().map_err(|_| DecodeError {
            reason: "unreachable: zero must parse".to_string(),
        });
    }
    trimmed.parse().map_err(|_| DecodeError {
        reason: format!("not an integer: {raw:?}"),
    })
}

pub fn decode_i32(raw: &str) -> Result<i32, DecodeError> {
    decode_int(raw)
}

pub fn decode_i64(raw: &str) -> Result<i64, DecodeError> {
    decode_int(raw)
}

pub fn decode_i16(raw: &str) -> Result<i16, DecodeError> {
    decode_int(raw)
}
