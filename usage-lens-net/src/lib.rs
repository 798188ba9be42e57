//! # usage-lens Network
//!
//! Ingestion adapters for usage-lens.
//!
//! This crate provides:
//! - The `TraceSource` trait and the query/transport types it takes
//! - A Jaeger query API source with bounded retry
//! - Decoding of the Jaeger trace response into the core data model
//! - `LogSource` adapters for log files and log-emitting commands
//! - `UserSource` for exported account rows
//! - A scripted mock source for tests

pub mod jaeger;
pub mod logs;
pub mod protocol;
pub mod traits;
pub mod users;

mod mock;
pub use mock::MockTraceSource;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::jaeger::*;
    pub use crate::logs::*;
    pub use crate::traits::*;
    pub use crate::users::*;
    pub use crate::{FetchError, IngestError, ParseError, QueryError};
}

use core::time::Duration;

/// Result type for trace ingestion
pub type Result<T> = core::result::Result<T, IngestError>;

/// Failure to retrieve a trace response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The HTTP client could not be constructed
    #[error("failed to build HTTP client: {0}")]
    Client(String),
    /// Connection or body-read failure
    #[error("request to {url} failed after {attempts} attempt(s): {message}")]
    Transport {
        url: String,
        attempts: u32,
        message: String,
    },
    /// The request did not complete within the configured timeout
    #[error("request to {url} timed out after {timeout:?} ({attempts} attempt(s))")]
    Timeout {
        url: String,
        attempts: u32,
        timeout: Duration,
    },
    /// The server answered with a non-success status
    #[error("request to {url} returned HTTP {status} after {attempts} attempt(s)")]
    Status {
        url: String,
        attempts: u32,
        status: u16,
    },
}

impl FetchError {
    /// Number of attempts made before giving up
    pub fn attempts(&self) -> u32 {
        match self {
            FetchError::Client(_) => 0,
            FetchError::Transport { attempts, .. }
            | FetchError::Timeout { attempts, .. }
            | FetchError::Status { attempts, .. } => *attempts,
        }
    }
}

/// A trace response that does not have the expected shape.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// The body is not JSON or does not match the response layout
    #[error("malformed trace response: {0}")]
    Malformed(String),
    /// A tag value is neither a string, number, nor boolean
    #[error("tag `{key}` has unsupported value type {kind}")]
    TagValue { key: String, kind: &'static str },
}

/// Invalid trace query parameters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("invalid lookback `{value}`: {reason}")]
    InvalidLookback { value: String, reason: String },
    #[error("lookback must be greater than zero")]
    ZeroLookback,
    #[error("limit must be greater than zero")]
    ZeroLimit,
    #[error("shard count must be greater than zero")]
    ZeroShards,
}

/// Ingestion error: either the fetch or the decode failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}
