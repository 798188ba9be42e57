//! # usage-lens core
//!
//! Data model and aggregation logic for gateway usage telemetry.
//!
//! This crate does no I/O and provides:
//! - The trace/span data model and span field extraction
//! - Heuristic identity mining over unstructured log text
//! - Per-identity activity aggregation with a mergeable record type
//! - Parsing of exported account rows
//!
//! ## Feature Flags
//!
//! - `parallel` (default): Mine log lines on the rayon pool
//! - `telemetry`: Emit `tracing` diagnostics

pub mod aggregation;
pub mod logmine;
pub mod span;
pub mod users;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::aggregation::*;
    pub use crate::logmine::*;
    pub use crate::span::*;
    pub use crate::users::*;
}

/// Result type for usage-lens core operations
pub type Result<T> = core::result::Result<T, Error>;

/// Error type for usage-lens core operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A log pattern failed to compile or names a missing capture group
    InvalidPattern { pattern: String, reason: String },
}

impl std::error::Error for Error {}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::InvalidPattern { pattern, reason } => {
                write!(f, "invalid log pattern `{pattern}`: {reason}")
            }
        }
    }
}
