//! Atomic ZIP→Parquet Extractor (§4.4) for CVM regulatory document ZIPs.

pub mod extractor;
pub mod schema;

pub use extractor::AtomicExtractor;
