//! Ingest, extract, aggregate.
//!
//! One [`Pipeline::run`] fetches every shard window concurrently, aggregates
//! each window into its own [`ActivityAggregator`] and merges them. A trace
//! returned by more than one window is counted once. Log input is mined into
//! a separate aggregator; a failing log or user source is reported and
//! skipped.

use std::collections::HashSet;

use futures::future::join_all;
use tracing::{debug, info, warn};

use usage_lens_core::aggregation::ActivityAggregator;
use usage_lens_core::logmine::{GatewayLogScanner, GatewayLogStats, LogPatternMiner};
use usage_lens_core::span::{SpanFieldExtractor, TraceBatch};
use usage_lens_core::users::UserRecord;
use usage_lens_net::logs::LogSource;
use usage_lens_net::protocol::trace_count;
use usage_lens_net::traits::{TraceQuery, TraceSource};
use usage_lens_net::users::UserSource;
use usage_lens_net::{IngestError, QueryError};

use crate::report::ReportInput;
use crate::UsageLensConfig;

/// Pipeline failure.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid trace query: {0}")]
    Query(#[from] QueryError),
    #[error(transparent)]
    Pattern(#[from] usage_lens_core::Error),
    #[error("trace ingestion failed: {0}")]
    Ingest(#[from] IngestError),
}

/// Optional log inputs for one run.
#[derive(Clone, Copy, Default)]
pub struct LogInputs<'a> {
    /// Service logs mined for identities
    pub identities: Option<&'a dyn LogSource>,
    /// Gateway access logs summarized per provider and status
    pub gateway: Option<&'a dyn LogSource>,
    /// Recently active account records
    pub users: Option<&'a dyn UserSource>,
}

/// Result of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineRun {
    pub lookback: String,
    pub total_traces: usize,
    /// Trace-derived activity
    pub traces: ActivityAggregator,
    /// Log-derived activity, when service logs were read
    pub log_users: Option<ActivityAggregator>,
    /// Gateway log summary, when gateway logs were read
    pub gateway: Option<GatewayLogStats>,
    /// Account records, when a user source was read
    pub users: Option<Vec<UserRecord>>,
}

impl PipelineRun {
    pub fn report_input(&self) -> ReportInput<'_> {
        ReportInput {
            lookback: &self.lookback,
            total_traces: self.total_traces,
            traces: &self.traces,
            log_users: self.log_users.as_ref(),
            gateway: self.gateway.as_ref(),
            active_users: self.users.as_deref(),
        }
    }
}

/// Trace and log processing for one configuration.
#[derive(Debug, Clone)]
pub struct Pipeline {
    query: TraceQuery,
    shards: usize,
    extractor: SpanFieldExtractor,
    miner: LogPatternMiner,
    gateway: GatewayLogScanner,
}

impl Pipeline {
    /// Validate `config` and compile its patterns.
    pub fn new(config: &UsageLensConfig) -> Result<Self, PipelineError> {
        if config.shards == 0 {
            return Err(QueryError::ZeroShards.into());
        }
        Ok(Self {
            query: config.query()?,
            shards: config.shards,
            extractor: config.extractor(),
            miner: config.miner()?,
            gateway: GatewayLogScanner::new()?,
        })
    }

    pub fn query(&self) -> &TraceQuery {
        &self.query
    }

    /// Shard queries for a run ending at `now_us`.
    pub fn queries(&self, now_us: u64) -> Result<Vec<TraceQuery>, QueryError> {
        self.query.split(self.shards, now_us)
    }

    /// Aggregate the spans of `batches`.
    pub fn aggregate_batches(&self, batches: &[TraceBatch]) -> ActivityAggregator {
        let mut agg = ActivityAggregator::new();
        for batch in batches {
            for signal in self.extractor.extract_batch(batch) {
                agg.record(&signal);
            }
        }
        agg
    }

    /// Fetch every shard concurrently and merge the per-shard aggregates.
    /// Returns the merged aggregate and the number of distinct traces fetched.
    pub async fn ingest<S>(
        &self,
        source: &S,
        now_us: u64,
    ) -> Result<(ActivityAggregator, usize), PipelineError>
    where
        S: TraceSource + ?Sized,
    {
        let queries = self.queries(now_us)?;
        debug!(source = %source.describe(), windows = queries.len(), "Fetching traces");

        let mut windows = join_all(queries.iter().map(|query| source.fetch(query)))
            .await
            .into_iter()
            .collect::<Result<Vec<_>, IngestError>>()?;
        let repeated = drop_repeated_traces(&mut windows);
        if repeated > 0 {
            debug!(repeated, "Dropped traces returned by more than one window");
        }

        let total_traces: usize = windows.iter().map(|batches| trace_count(batches)).sum();
        let merged = ActivityAggregator::merge_all(
            windows.iter().map(|batches| self.aggregate_batches(batches)),
        );
        info!(
            traces = total_traces,
            users = merged.len(),
            signals = merged.signals_seen(),
            dropped = merged.signals_dropped(),
            "Aggregated trace activity"
        );
        Ok((merged, total_traces))
    }

    /// Mine `text` for identities.
    pub fn mine_text(&self, text: &str) -> ActivityAggregator {
        #[cfg(feature = "parallel")]
        let signals = self.miner.mine_parallel(text);
        #[cfg(not(feature = "parallel"))]
        let signals = self.miner.mine(text);
        ActivityAggregator::from_signals(&signals)
    }

    /// Read and mine a log source. A failing source is logged and skipped.
    pub async fn mine_logs(&self, source: &dyn LogSource) -> Option<ActivityAggregator> {
        let text = read_or_warn(source).await?;
        let agg = self.mine_text(&text);
        info!(source = %source.describe(), users = agg.len(), "Mined log identities");
        Some(agg)
    }

    /// Read and summarize gateway access logs. A failing source is logged
    /// and skipped.
    pub async fn scan_gateway_logs(&self, source: &dyn LogSource) -> Option<GatewayLogStats> {
        let text = read_or_warn(source).await?;
        let stats = self.gateway.scan(&text);
        info!(
            source = %source.describe(),
            requests = stats.total_requests,
            "Scanned gateway logs"
        );
        Some(stats)
    }

    /// Read account records. A failing source is logged and skipped.
    pub async fn read_users(&self, source: &dyn UserSource) -> Option<Vec<UserRecord>> {
        match source.users().await {
            Ok(users) => {
                info!(source = %source.describe(), users = users.len(), "Read user records");
                Some(users)
            }
            Err(e) => {
                warn!(source = %source.describe(), error = %e, "User source failed, continuing without it");
                None
            }
        }
    }

    /// Run the whole pipeline for a window ending at `now_us`.
    pub async fn run<S>(
        &self,
        traces: &S,
        logs: LogInputs<'_>,
        now_us: u64,
    ) -> Result<PipelineRun, PipelineError>
    where
        S: TraceSource + ?Sized,
    {
        let (aggregate, total_traces) = self.ingest(traces, now_us).await?;

        let log_users = match logs.identities {
            Some(source) => self.mine_logs(source).await,
            None => None,
        };
        let gateway = match logs.gateway {
            Some(source) => self.scan_gateway_logs(source).await,
            None => None,
        };
        let users = match logs.users {
            Some(source) => self.read_users(source).await,
            None => None,
        };

        Ok(PipelineRun {
            lookback: self.query.lookback.clone(),
            total_traces,
            traces: aggregate,
            log_users,
            gateway,
            users,
        })
    }
}

/// Drop traces whose ID already appeared in an earlier window or batch.
/// Traces without an ID are always kept. Returns the number dropped.
fn drop_repeated_traces(windows: &mut [Vec<TraceBatch>]) -> usize {
    let mut seen = HashSet::new();
    let mut dropped = 0;
    for batch in windows.iter_mut().flatten() {
        batch.traces.retain(|trace| match &trace.trace_id {
            Some(id) if !seen.insert(id.clone()) => {
                dropped += 1;
                false
            }
            _ => true,
        });
    }
    dropped
}

async fn read_or_warn(source: &dyn LogSource) -> Option<String> {
    match source.read().await {
        Ok(text) => Some(text),
        Err(e) => {
            warn!(source = %source.describe(), error = %e, "Log source failed, continuing without it");
            None
        }
    }
}
