//! Tickload Common Library
//!
//! Ambient plumbing shared by the tickload workspace members:
//!
//! - **Logging**: `tracing` subscriber setup (console, rotating files, JSON)
//! - **Env**: typed environment-variable lookups with defaults
//!
//! # Example
//!
//! ```no_run
//! use tickload_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     init_logging(&LogConfig::from_env()?)?;
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod env;
pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat, LogLevel, LogOutput};
