//! FIPE Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared record types, error handling and logging for the FIPE ETL workspace.
//!
//! # Overview
//!
//! - **Types**: catalog records (brand → model → year → detail) and the
//!   per-brand [`ExtractionResult`](types::ExtractionResult)
//! - **Error Handling**: [`FipeError`] and the [`Result`] alias
//! - **Logging**: `tracing` subscriber setup shared by every binary
//!
//! # Example
//!
//! ```
//! use fipe_common::types::{Brand, ExtractionResult};
//!
//! let brand = Brand::new("59", "VW - VolksWagen");
//! let result = ExtractionResult::for_brand(brand);
//! let unified = ExtractionResult::unify(vec![result.clone(), result]);
//! assert_eq!(unified.brand.len(), 2);
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{FipeError, Result};
