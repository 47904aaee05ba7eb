//! Domain Validators (§4.8)
//!
//! Static tables governing allowed CVM document types, allowed B3 asset
//! classes, the asset→market-code mapping, and year bounds. These run
//! before any side-effecting work; a `ValidationError` here never reaches
//! the caller as a partial result.

use std::collections::BTreeSet;

use crate::error::{DataFinanceError, Result};

/// Allowed CVM document types.
pub const CVM_DOC_TYPES: &[&str] = &["DFP", "ITR", "FRE", "FCA", "CGVN", "VLMO", "IPE"];

/// Allowed B3 asset classes.
pub const B3_ASSET_CLASSES: &[&str] = &[
    "ações",
    "etf",
    "opções",
    "termo",
    "exercicio_opcoes",
    "forward",
    "leilao",
];

/// Minimum supported year for a CVM document type. `ITR` and `CGVN`/`VLMO`
/// have later minimums than the general CVM floor.
pub fn cvm_min_year(doc_type: &str) -> Result<i32> {
    match doc_type {
        "ITR" => Ok(2011),
        "CGVN" | "VLMO" => Ok(2018),
        "DFP" | "FRE" | "FCA" | "IPE" => Ok(2010),
        other => Err(DataFinanceError::Validation(format!(
            "invalid document type: {other}"
        ))),
    }
}

/// B3's market history floor.
pub const B3_MIN_YEAR: i32 = 1986;

/// Validates a CVM document type against the static table.
pub fn validate_doc_type(doc_type: &str) -> Result<()> {
    if CVM_DOC_TYPES.contains(&doc_type) {
        Ok(())
    } else {
        Err(DataFinanceError::Validation(format!(
            "invalid document type: {doc_type}"
        )))
    }
}

/// Validates a CVM doc_type + year pair against its minimum supported
/// year and the current year ceiling.
pub fn validate_cvm_year(doc_type: &str, year: i32, current_year: i32) -> Result<()> {
    let min_year = cvm_min_year(doc_type)?;
    if year < min_year {
        return Err(DataFinanceError::Validation(format!(
            "year {year} precedes the minimum supported year {min_year} for {doc_type}"
        )));
    }
    if year > current_year {
        return Err(DataFinanceError::Validation(format!(
            "year {year} is in the future (current year is {current_year})"
        )));
    }
    Ok(())
}

/// Validates a B3 asset class against the static table.
pub fn validate_asset_class(asset_class: &str) -> Result<()> {
    if B3_ASSET_CLASSES.contains(&asset_class) {
        Ok(())
    } else {
        Err(DataFinanceError::Validation(format!(
            "invalid asset class: {asset_class}"
        )))
    }
}

/// Validates a B3 year range: both bounds within `[1986, current_year]`
/// and `first <= last`.
pub fn validate_b3_year_range(first: i32, last: i32, current_year: i32) -> Result<()> {
    if first > last {
        return Err(DataFinanceError::Validation(format!(
            "year range is inverted: first={first} > last={last}"
        )));
    }
    if first < B3_MIN_YEAR || last > current_year {
        return Err(DataFinanceError::Validation(format!(
            "year range [{first}, {last}] is outside the supported bounds [{B3_MIN_YEAR}, {current_year}]"
        )));
    }
    Ok(())
}

/// Maps a set of user-friendly asset classes to the 3-digit B3 market
/// type codes that filter COTAHIST rows.
pub fn asset_classes_to_market_codes(asset_classes: &BTreeSet<String>) -> Result<BTreeSet<String>> {
    if asset_classes.is_empty() {
        return Err(DataFinanceError::Validation(
            "asset_classes must not be empty".to_string(),
        ));
    }

    let mut codes = BTreeSet::new();
    for class in asset_classes {
        validate_asset_class(class)?;
        let mapped: &[&str] = match class.as_str() {
            "ações" => &["010", "020"],
            "etf" => &["010", "020"],
            "opções" => &["070", "080"],
            "termo" => &["030"],
            "exercicio_opcoes" => &["012", "013"],
            "forward" => &["050", "060"],
            "leilao" => &["017"],
            _ => unreachable!("validate_asset_class already rejected unknown classes"),
        };
        codes.extend(mapped.iter().map(|s| s.to_string()));
    }
    Ok(codes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_known_doc_types() {
        for dt in CVM_DOC_TYPES {
            assert!(validate_doc_type(dt).is_ok());
        }
    }

    #[test]
    fn rejects_unknown_doc_type() {
        assert!(validate_doc_type("XYZ").is_err());
    }

    #[test]
    fn year_bounds_are_enforced_per_doc_type() {
        assert!(validate_cvm_year("DFP", 2010, 2026).is_ok());
        assert!(validate_cvm_year("DFP", 2009, 2026).is_err());
        assert!(validate_cvm_year("ITR", 2011, 2026).is_ok());
        assert!(validate_cvm_year("ITR", 2010, 2026).is_err());
        assert!(validate_cvm_year("CGVN", 2018, 2026).is_ok());
        assert!(validate_cvm_year("CGVN", 2017, 2026).is_err());
        assert!(validate_cvm_year("DFP", 2027, 2026).is_err());
    }

    #[test]
    fn b3_year_range_rejects_inversion_and_out_of_bounds() {
        assert!(validate_b3_year_range(2020, 2023, 2026).is_ok());
        assert!(validate_b3_year_range(2023, 2020, 2026).is_err());
        assert!(validate_b3_year_range(1985, 2023, 2026).is_err());
        assert!(validate_b3_year_range(2020, 2027, 2026).is_err());
        assert!(validate_b3_year_range(B3_MIN_YEAR, B3_MIN_YEAR, 2026).is_ok());
    }

    #[test]
    fn asset_class_mapping_matches_spec_table() {
        let classes: BTreeSet<String> = ["ações".to_string()].into_iter().collect();
        let codes = asset_classes_to_market_codes(&classes).unwrap();
        assert_eq!(
            codes,
            ["010", "020"].iter().map(|s| s.to_string()).collect()
        );

        let classes: BTreeSet<String> = ["opções".to_string(), "termo".to_string()]
            .into_iter()
            .collect();
        let codes = asset_classes_to_market_codes(&classes).unwrap();
        assert_eq!(
            codes,
            ["070", "080", "030"].iter().map(|s| s.to_string()).collect()
        );
    }

    #[test]
    fn empty_asset_classes_is_rejected() {
        assert!(asset_classes_to_market_codes(&BTreeSet::new()).is_err());
    }
}
