//! Streaming Fixed-Width Parser (§4.5)
//!
//! Decodes one 245-byte COTAHIST line into a `CotahistRecord`, or a typed
//! skip/error outcome — never by raising an exception for control flow
//! (§9's "exceptions for control flow during parsing" redesign note).

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use encoding_rs::WINDOWS_1252;

use super::record::{
    decode_i16, decode_i32, decode_i64, decode_implied_decimal, decode_optional_date,
    decode_required_date, CotahistRecord, FixedWidthLine, SkipReason,
};

const MAX_LINE_CHARS: usize = 1000;
const MAX_LOGGED_ERRORS: usize = 10;

/// Outcome of decoding a single raw line.
pub enum LineOutcome {
    Record(CotahistRecord),
    Skip(SkipReason),
    Error(String),
}

/// Stateless aside from error counters; safe to share across parser-pool
/// workers (§4.5 concurrency note).
pub struct CotahistParser {
    target_market_codes: BTreeSet<String>,
    error_count: AtomicUsize,
    logged_errors: AtomicUsize,
}

/// Aggregated result of parsing a batch of lines.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub records: Vec<CotahistRecord>,
    pub skip_count: usize,
    pub error_count: usize,
}

impl CotahistParser {
    pub fn new(target_market_codes: BTreeSet<String>) -> Self {
        Self {
            target_market_codes,
            error_count: AtomicUsize::new(0),
            logged_errors: AtomicUsize::new(0),
        }
    }

    pub fn error_count(&self) -> usize {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Decodes a raw byte line as Latin-1 (B3/CVM convention) and parses it.
    pub fn parse_line_bytes(&self, raw: &[u8]) -> LineOutcome {
        let (decoded, _enc, _had_errors) = WINDOWS_1252.decode(raw);
        self.parse_line(&decoded)
    }

    /// Parses an already-decoded line.
    pub fn parse_line(&self, raw: &str) -> LineOutcome {
        if raw.chars().count() > MAX_LINE_CHARS {
            return LineOutcome::Skip(SkipReason::TooLong);
        }

        let chars: Vec<char> = raw.chars().collect();
        let line = FixedWidthLine::new(&chars);

        let record_type = line.field(1, 2);
        match record_type.as_str() {
            "00" | "99" => return LineOutcome::Skip(SkipReason::HeaderOrTrailer),
            "01" => {}
            _ => return LineOutcome::Skip(SkipReason::Malformed),
        }

        // market_type is parsed (positions 1-27) before the rest of the
        // line so rows that won't pass the post-filter skip the
        // remaining decode work (§4.5's ordering note).
        let market_type = line.field(25, 27);
        if !self.target_market_codes.contains(&market_type) {
            return LineOutcome::Skip(SkipReason::FilteredOut);
        }

        match self.decode_full(&line, market_type) {
            Ok(record) => LineOutcome::Record(record),
            Err(reason) => {
                let logged = self.logged_errors.fetch_add(1, Ordering::Relaxed);
                self.error_count.fetch_add(1, Ordering::Relaxed);
                if logged < MAX_LOGGED_ERRORS {
                    tracing::warn!("COTAHIST line decode error: {reason}");
                } else if logged == MAX_LOGGED_ERRORS {
                    tracing::warn!(
                        "COTAHIST decode errors now exceeding {MAX_LOGGED_ERRORS}; suppressing further detail, still counting"
                    );
                }
                LineOutcome::Error(reason)
            }
        }
    }

    fn decode_full(
        &self,
        line: &FixedWidthLine,
        market_type: String,
    ) -> Result<CotahistRecord, String> {
        let trading_date = decode_required_date(&line.field(3, 10)).map_err(|e| e.reason)?;
        let bdi_code = line.field(11, 12);
        let ticker = line.trimmed(13, 24);
        let short_name = line.trimmed(28, 39);
        let specification = line.trimmed(40, 49);

        let opening_price =
            decode_implied_decimal(&line.field(57, 69), 2).map_err(|e| e.reason)?;
        let high_price = decode_implied_decimal(&line.field(70, 82), 2).map_err(|e| e.reason)?;
        let low_price = decode_implied_decimal(&line.field(83, 95), 2).map_err(|e| e.reason)?;
        let avg_price = decode_implied_decimal(&line.field(96, 108), 2).map_err(|e| e.reason)?;
        let closing_price =
            decode_implied_decimal(&line.field(109, 121), 2).map_err(|e| e.reason)?;
        let best_bid_price =
            decode_implied_decimal(&line.field(122, 134), 2).map_err(|e| e.reason)?;
        let best_ask_price =
            decode_implied_decimal(&line.field(135, 147), 2).map_err(|e| e.reason)?;

        let trade_count = decode_i32(&line.field(148, 152)).map_err(|e| e.reason)?;
        let total_quantity = decode_i64(&line.field(153, 170)).map_err(|e| e.reason)?;
        let total_volume =
            decode_implied_decimal(&line.field(171, 188), 2).map_err(|e| e.reason)?;

        let expiration_date =
            decode_optional_date(&line.field(203, 210)).map_err(|e| e.reason)?;
        let quote_factor = decode_i32(&line.field(211, 217)).map_err(|e| e.reason)?;
        let isin_code = line.trimmed(231, 242);
        let distribution_number = decode_i16(&line.field(243, 245)).map_err(|e| e.reason)?;

        Ok(CotahistRecord {
            trading_date,
            bdi_code,
            ticker,
            market_type,
            short_name,
            specification,
            opening_price,
            high_price,
            low_price,
            avg_price,
            closing_price,
            best_bid_price,
            best_ask_price,
            trade_count,
            total_quantity,
            total_volume,
            expiration_date,
            quote_factor,
            isin_code,
            distribution_number,
        })
    }

    /// Parses a batch of already-split lines; skips and errors are
    /// counted, never raised.
    pub fn parse_batch(&self, lines: &[Vec<u8>]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for raw in lines {
            match self.parse_line_bytes(raw) {
                LineOutcome::Record(r) => outcome.records.push(r),
                LineOutcome::Skip(_) => outcome.skip_count += 1,
                LineOutcome::Error(_) => outcome.error_count += 1,
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_line(market_type: &str, closing_price_raw: &str) -> String {
        // Builds a syntactically valid 245-char line with the fields the
        // tests care about and zero-filled/space-filled defaults
        // elsewhere, matching COTAHIST column positions exactly.
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

    #[test]
    fn happy_path_parses_and_filters() {
        let parser = CotahistParser::new(["010".to_string()].into_iter().collect());
        let line = sample_line("010", "0000000002776");
        match parser.parse_line(&line) {
            LineOutcome::Record(r) => {
                assert_eq!(r.ticker, "PETR4");
                assert_eq!(r.market_type, "010");
                assert_eq!(r.closing_price.to_string(), "27.76");
            }
            _ => panic!("expected a record"),
        }
    }

    #[test]
    fn filtered_out_market_type_is_skipped() {
        let parser = CotahistParser::new(["010".to_string()].into_iter().collect());
        let line = sample_line("070", "0000000002776");
        match parser.parse_line(&line) {
            LineOutcome::Skip(SkipReason::FilteredOut) => {}
            _ => panic!("expected FilteredOut"),
        }
    }

    #[test]
    fn header_and_trailer_are_skipped() {
        let parser = CotahistParser::new(["010".to_string()].into_iter().collect());
        let mut header = vec!['0'; 245];
        header[0] = '0';
        header[1] = '0';
        let header: String = header.into_iter().collect();
        match parser.parse_line(&header) {
            LineOutcome::Skip(SkipReason::HeaderOrTrailer) => {}
            _ => panic!("expected header/trailer skip"),
        }

        let mut trailer = vec!['0'; 245];
        trailer[0] = '9';
        trailer[1] = '9';
        let trailer: String = trailer.into_iter().collect();
        match parser.parse_line(&trailer) {
            LineOutcome::Skip(SkipReason::HeaderOrTrailer) => {}
            _ => panic!("expected header/trailer skip"),
        }
    }

    #[test]
    fn line_over_1000_chars_is_skipped() {
        let parser = CotahistParser::new(["010".to_string()].into_iter().collect());
        let long_line = "0".repeat(1001);
        match parser.parse_line(&long_line) {
            LineOutcome::Skip(SkipReason::TooLong) => {}
            _ => panic!("expected TooLong skip"),
        }
    }

    #[test]
    fn line_exactly_245_is_accepted() {
        let parser = CotahistParser::new(["010".to_string()].into_iter().collect());
        let line = sample_line("010", "0000000002776");
        assert_eq!(line.chars().count(), 245);
        assert!(matches!(parser.parse_line(&line), LineOutcome::Record(_)));
    }

    #[test]
    fn field_slice_beyond_line_end_defaults_and_still_emits() {
        let parser = CotahistParser::new(["010".to_string()].into_iter().collect());
        let full = sample_line("010", "0000000002776");
        // Truncate past the ISIN/distribution-number fields.
        let short: String = full.chars().take(220).collect();
        match parser.parse_line(&short) {
            LineOutcome::Record(r) => {
                assert_eq!(r.isin_code, "");
                assert_eq!(r.distribution_number, 0);
            }
            other => panic!("expected a record with defaults, got a different outcome: {}",
                matches!(other, LineOutcome::Record(_))),
        }
    }
}
