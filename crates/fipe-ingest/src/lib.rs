//! FIPE Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Crawls the FIPE vehicle price catalog (brand → model → year → detail) and
//! upserts the normalized records into PostgreSQL.
//!
//! # Components
//!
//! - **[`fetcher`]**: HTTP GET with bounded exponential backoff and jitter
//! - **[`parser`]**: upstream payloads, price and month-reference normalization
//! - **[`pipeline`]**: three concurrent stages per brand, coupled by bounded queues
//! - **[`orchestrator`]**: brand enumeration and chunked concurrent execution
//! - **[`export`]**: per-table transactional upserts
//!
//! # Example
//!
//! ```no_run
//! use fipe_ingest::config::IngestConfig;
//! use fipe_ingest::export::DryRunSink;
//! use fipe_ingest::orchestrator::Orchestrator;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = IngestConfig::default();
//!     config.pipeline.limit = Some(10);
//!
//!     let summary = Orchestrator::new(&config, DryRunSink)?.run().await?;
//!     println!("{}", summary);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod fetcher;
pub mod orchestrator;
pub mod parser;
pub mod pipeline;

pub use config::IngestConfig;
pub use error::{IngestError, Result};
pub use orchestrator::{Orchestrator, RunSummary};
