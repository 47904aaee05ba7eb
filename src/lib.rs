//! Data Finance — ingests Brazilian public financial data (CVM regulatory
//! document ZIPs and B3 COTAHIST historical quote files) and materializes
//! it as Parquet, with bounded concurrency, retries, and adaptive
//! resource management.

pub mod config;
pub mod cotahist;
pub mod cvm;
pub mod download;
pub mod error;
pub mod http_client;
pub mod parquet_writer;
pub mod resource_monitor;
pub mod retry;
pub mod validators;

// Re-export common result type
pub use error::Result;
