//! DownloadPlan / DownloadOutcome (§3) and the `UrlCatalog` collaborator
//! that turns `(doc_type, year)` into a concrete URL.

use std::collections::{BTreeMap, BTreeSet};

use crate::validators::{cvm_min_year, validate_doc_type, CVM_DOC_TYPES};
use crate::error::Result;

/// One file to fetch: the year it covers, its source URL, and the local
/// filename it should be written under.
#[derive(Debug, Clone)]
pub struct PlanEntry {
    pub year: i32,
    pub url: String,
    pub local_filename: String,
}

/// Immutable, built-once-per-invocation mapping from document type to the
/// ordered set of files to fetch for it.
#[derive(Debug, Clone, Default)]
pub struct DownloadPlan {
    entries: BTreeMap<String, Vec<PlanEntry>>,
}

impl DownloadPlan {
    pub fn entries(&self) -> impl Iterator<Item = (&str, &[PlanEntry])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn total_entries(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// Builds a plan for `doc_types x [first_year, last_year]` using
    /// `catalog` to resolve each `(doc_type, year)` pair to a URL. Skips
    /// years below the document type's validated minimum rather than
    /// failing the whole plan.
    pub fn build(
        doc_types: &[&str],
        first_year: i32,
        last_year: i32,
        current_year: i32,
        catalog: &dyn UrlCatalog,
    ) -> Result<Self> {
        let mut entries: BTreeMap<String, Vec<PlanEntry>> = BTreeMap::new();
        for &doc_type in doc_types {
            validate_doc_type(doc_type)?;
            let min_year = cvm_min_year(doc_type)?;
            let mut years = Vec::new();
            for year in first_year.max(min_year)..=last_year.min(current_year) {
                let url = catalog.url_for(doc_type, year);
                years.push(PlanEntry {
                    year,
                    url,
                    local_filename: format!("{}_cia_aberta_{year}.zip", doc_type.to_lowercase()),
                });
            }
            entries.insert(doc_type.to_string(), years);
        }
        Ok(Self { entries })
    }
}

/// Resolves a `(doc_type, year)` pair to a concrete source URL. The core
/// engine is agnostic to the URL shape; a default CVM implementation is
/// provided for convenience.
pub trait UrlCatalog: Send + Sync {
    fn url_for(&self, doc_type: &str, year: i32) -> String;
}

/// Default catalog implementing the CVM base URL pattern from §6.
pub struct CvmUrlCatalog {
    pub base_url: String,
}

impl CvmUrlCatalog {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into() }
    }
}

impl Default for CvmUrlCatalog {
    fn default() -> Self {
        Self::new("https://dados.cvm.gov.br")
    }
}

impl UrlCatalog for CvmUrlCatalog {
    fn url_for(&self, doc_type: &str, year: i32) -> String {
        format!(
            "{}/dados/CIA_ABERTA/DOC/{}/DADOS/{}_cia_aberta_{year}.zip",
            self.base_url,
            doc_type,
            doc_type.to_lowercase(),
        )
    }
}

/// Aggregate result of a download batch (§3). `successful` groups years by
/// document type; `failed` maps a `{doc_type}/{year}` identifier to its
/// error message.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct DownloadOutcome {
    pub successful: BTreeMap<String, BTreeSet<i32>>,
    pub failed: BTreeMap<String, String>,
}

impl DownloadOutcome {
    pub fn success_count(&self) -> usize {
        self.successful.values().map(BTreeSet::len).sum()
    }

    pub fn error_count(&self) -> usize {
        self.failed.len()
    }

    pub fn record_success(&mut self, doc_type: &str, year: i32) {
        self.successful.entry(doc_type.to_string()).or_default().insert(year);
    }

    pub fn record_failure(&mut self, identifier: impl Into<String>, message: impl Into<String>) {
        self.failed.insert(identifier.into(), message.into());
    }
}

pub fn known_doc_types() -> &'static [&'static str] {
    CVM_DOC_TYPES
}
