//! Parallel Download Engine (§4.3) and its supporting value types (§3).

pub mod engine;
pub mod plan;

pub use engine::DownloadEngine;
pub use plan::{CvmUrlCatalog, DownloadOutcome, DownloadPlan, PlanEntry, UrlCatalog};
