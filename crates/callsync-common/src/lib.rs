//! Callsync Common Library
//!
//! Shared error handling, logging initialisation and time helpers for the
//! callsync workspace.
//!
//! # Example
//!
//! ```no_run
//! use callsync_common::logging::{init_logging, LogConfig};
//! use callsync_common::time::parse_utc;
//!
//! fn main() -> callsync_common::Result<()> {
//!     let _guard = init_logging(&LogConfig::from_env()?)?;
//!     let since = parse_utc("2025-10-23T16:00:00Z")?;
//!     tracing::info!(%since, "window start");
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod error;
pub mod logging;
pub mod time;

// Re-export commonly used types
pub use error::{CallsyncError, Result};
