//! Dolar Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types and logging setup for the dolar ingestion workspace.
//!
//! # Overview
//!
//! - **Logging**: one place to configure `tracing` for every binary
//! - **Types**: the normalized exchange-rate record and the handler response
//!   contract returned by both pipeline stages
//!
//! # Example
//!
//! ```no_run
//! use dolar_common::logging::{init_logging, LogConfig};
//! use dolar_common::types::HandlerResponse;
//!
//! fn main() -> anyhow::Result<()> {
//!     let _guard = init_logging(&LogConfig::from_env()?)?;
//!     let response = HandlerResponse::ok("nothing to do");
//!     assert!(!response.is_failure());
//!     Ok(())
//! }
//! ```

pub mod logging;
pub mod types;

// Re-export commonly used types
pub use types::{ExchangeRateRecord, HandlerResponse};
