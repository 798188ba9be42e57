//! # usage-lens
//!
//! **Per-user usage reports for an LLM gateway, built from distributed traces
//! and service logs.**
//!
//! usage-lens queries a Jaeger endpoint for the gateway's spans, attributes
//! each span to the user named in its tags, and aggregates request counts,
//! latency, error rates and provider usage per user. Free-text service logs
//! can be mined for user identities as a secondary, lower-confidence source.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use usage_lens::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = UsageLens::builder()
//!         .jaeger_url("http://localhost:16686")
//!         .lookback("24h")
//!         .shards(4)
//!         .build();
//!
//!     let source = JaegerSource::new(&config.jaeger_url, config.transport.clone())?;
//!     let now_us = default_runtime().now_unix_micros();
//!     let run = Pipeline::new(&config)?
//!         .run(&source, LogInputs::default(), now_us)
//!         .await?;
//!     print!("{}", render_text(&run.report_input()));
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! - `parallel` (default): Mine log lines on the rayon pool
//! - `telemetry`: Core crate diagnostics
//!
//! ## Crate Structure
//!
//! - [`usage_lens_core`]: Data model, span extraction, log mining, aggregation
//! - [`usage_lens_net`]: Trace and log sources
//! - [`usage_lens_runtime`]: Async runtime glue (Tokio/mock)

#![forbid(unsafe_code)]

// Re-export sub-crates
pub use usage_lens_core as core;
pub use usage_lens_net as net;
pub use usage_lens_runtime as runtime;

// Re-export async-trait for source implementors
pub use async_trait::async_trait;

// Re-export commonly used items at the top level
pub use usage_lens_core::{
    aggregation::{ActivityAggregator, ActivityRecord, Snapshot},
    logmine::{GatewayLogStats, LogPatternMiner, PatternSpec},
    span::{ExtractedSignal, FieldKeys, Span, SpanFieldExtractor, TraceBatch},
    users::UserRecord,
};

pub use usage_lens_net::{
    jaeger::JaegerSource,
    logs::{CommandLogSource, FileLogSource, LogSource},
    traits::{TraceQuery, TraceSource, TransportConfig},
    users::{RowUserSource, UserSource},
    IngestError,
};

pub mod logging;
pub mod pipeline;
pub mod report;
pub mod settings;

use std::time::Duration;

use usage_lens_net::jaeger::DEFAULT_JAEGER_URL;
use usage_lens_net::logs::DEFAULT_COMMAND_TIMEOUT;
use usage_lens_core::users::DEFAULT_USER_LIMIT;
use usage_lens_net::QueryError;

/// Prelude module for convenient imports
///
/// ```rust,ignore
/// use usage_lens::prelude::*;
/// ```
pub mod prelude {
    pub use crate::core::prelude::*;
    pub use crate::net::prelude::*;

    pub use crate::pipeline::{LogInputs, Pipeline, PipelineError, PipelineRun};
    pub use crate::runtime::{default_runtime, LensRuntime};
    pub use crate::report::{render_structured, render_text, ReportInput, StructuredReport};
    pub use crate::{UsageLens, UsageLensConfig};
}

/// Default service whose traces are analyzed
pub const DEFAULT_SERVICE: &str = "agentgateway";

/// Default lookback
pub const DEFAULT_LOOKBACK: &str = "24h";

/// Default maximum traces per request
pub const DEFAULT_LIMIT: u32 = 1000;

/// Configuration for one usage-lens run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageLensConfig {
    /// Jaeger query service base URL
    pub jaeger_url: String,
    /// Service whose traces are analyzed
    pub service: String,
    /// Lookback duration string (`"24h"`, `"7d"`)
    pub lookback: String,
    /// Maximum traces per request (per shard when sharded)
    pub limit: u32,
    /// Number of adjacent windows fetched concurrently
    pub shards: usize,
    /// Timeout and retry policy for the trace query
    pub transport: TransportConfig,
    /// Span tag keys
    pub field_keys: FieldKeys,
    /// Route separator for provider derivation
    pub route_separator: char,
    /// Identity patterns in priority order; empty means the built-in set
    pub log_patterns: Vec<PatternSpec>,
    /// Timestamp pattern for mined log lines; `None` means the built-in one
    pub timestamp_pattern: Option<String>,
    /// Timeout for log-emitting commands
    pub command_timeout: Duration,
    /// Maximum account records kept from the user source
    pub user_limit: usize,
}

impl Default for UsageLensConfig {
    fn default() -> Self {
        Self {
            jaeger_url: DEFAULT_JAEGER_URL.to_string(),
            service: DEFAULT_SERVICE.to_string(),
            lookback: DEFAULT_LOOKBACK.to_string(),
            limit: DEFAULT_LIMIT,
            shards: 1,
            transport: TransportConfig::default(),
            field_keys: FieldKeys::default(),
            route_separator: SpanFieldExtractor::DEFAULT_SEPARATOR,
            log_patterns: Vec::new(),
            timestamp_pattern: None,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            user_limit: DEFAULT_USER_LIMIT,
        }
    }
}

impl UsageLensConfig {
    /// The trace query this configuration describes.
    pub fn query(&self) -> Result<TraceQuery, QueryError> {
        TraceQuery::new(&self.service, &self.lookback, self.limit)
    }

    /// Span extractor for the configured keys and separator.
    pub fn extractor(&self) -> SpanFieldExtractor {
        SpanFieldExtractor::new(self.field_keys.clone()).with_separator(self.route_separator)
    }

    /// Log miner for the configured patterns.
    pub fn miner(&self) -> usage_lens_core::Result<LogPatternMiner> {
        let miner = if self.log_patterns.is_empty() {
            LogPatternMiner::with_defaults()?
        } else {
            LogPatternMiner::from_specs(&self.log_patterns)?
                .with_timestamp_pattern(usage_lens_core::logmine::TIMESTAMP_PATTERN)?
        };
        match &self.timestamp_pattern {
            Some(pattern) => miner.with_timestamp_pattern(pattern),
            None => Ok(miner),
        }
    }
}

/// Builder for UsageLensConfig
#[derive(Debug, Default)]
pub struct UsageLensConfigBuilder {
    config: UsageLensConfig,
}

impl UsageLensConfigBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration
    pub fn from_config(config: UsageLensConfig) -> Self {
        Self { config }
    }

    /// The configuration built so far
    pub fn peek(&self) -> &UsageLensConfig {
        &self.config
    }

    /// Set the Jaeger query service URL
    pub fn jaeger_url(mut self, url: impl Into<String>) -> Self {
        self.config.jaeger_url = url.into();
        self
    }

    /// Set the service whose traces are analyzed
    pub fn service(mut self, service: impl Into<String>) -> Self {
        self.config.service = service.into();
        self
    }

    /// Set the lookback duration string
    pub fn lookback(mut self, lookback: impl Into<String>) -> Self {
        self.config.lookback = lookback.into();
        self
    }

    /// Set the maximum traces per request
    pub fn limit(mut self, limit: u32) -> Self {
        self.config.limit = limit;
        self
    }

    /// Set the number of concurrently fetched windows
    pub fn shards(mut self, shards: usize) -> Self {
        self.config.shards = shards;
        self
    }

    /// Set the transport policy
    pub fn transport(mut self, transport: TransportConfig) -> Self {
        self.config.transport = transport;
        self
    }

    /// Set the span tag keys
    pub fn field_keys(mut self, keys: FieldKeys) -> Self {
        self.config.field_keys = keys;
        self
    }

    /// Set the route separator
    pub fn route_separator(mut self, separator: char) -> Self {
        self.config.route_separator = separator;
        self
    }

    /// Replace the identity patterns
    pub fn log_patterns(mut self, patterns: Vec<PatternSpec>) -> Self {
        self.config.log_patterns = patterns;
        self
    }

    /// Set the timestamp pattern for mined log lines
    pub fn timestamp_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.config.timestamp_pattern = Some(pattern.into());
        self
    }

    /// Set the log command timeout
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.config.command_timeout = timeout;
        self
    }

    /// Set the maximum number of account records kept
    pub fn user_limit(mut self, limit: usize) -> Self {
        self.config.user_limit = limit;
        self
    }

    /// Build the configuration
    pub fn build(self) -> UsageLensConfig {
        self.config
    }
}

/// Entry point for building a run configuration
#[derive(Debug)]
pub struct UsageLens;

impl UsageLens {
    /// Create a new configuration builder
    pub fn builder() -> UsageLensConfigBuilder {
        UsageLensConfigBuilder::new()
    }
}
