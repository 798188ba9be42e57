//! Source traits and query types
//!
//! This module defines the ingestion abstraction: a [`TraceSource`] answers a
//! [`TraceQuery`] with a list of trace batches.

use core::time::Duration;

use usage_lens_core::span::TraceBatch;

use crate::{QueryError, Result};

/// Explicit time window in microseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeWindow {
    /// Inclusive start
    pub start_us: u64,
    /// Exclusive end
    pub end_us: u64,
}

impl TimeWindow {
    pub fn new(start_us: u64, end_us: u64) -> Self {
        Self { start_us, end_us }
    }

    pub fn len_us(&self) -> u64 {
        self.end_us.saturating_sub(self.start_us)
    }
}

/// Parameters of one trace query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceQuery {
    /// Service whose traces to retrieve
    pub service: String,
    /// Lookback as given by the user (`"24h"`, `"7d"`)
    pub lookback: String,
    /// Maximum traces per request
    pub limit: u32,
    /// Explicit window; replaces `lookback` on the wire when set
    pub window: Option<TimeWindow>,
    lookback_duration: Duration,
}

impl TraceQuery {
    /// Build a query, validating the lookback and limit.
    pub fn new(
        service: impl Into<String>,
        lookback: impl Into<String>,
        limit: u32,
    ) -> core::result::Result<Self, QueryError> {
        let lookback = lookback.into();
        let lookback_duration =
            humantime::parse_duration(&lookback).map_err(|e| QueryError::InvalidLookback {
                value: lookback.clone(),
                reason: e.to_string(),
            })?;
        if lookback_duration.is_zero() {
            return Err(QueryError::ZeroLookback);
        }
        if limit == 0 {
            return Err(QueryError::ZeroLimit);
        }
        Ok(Self {
            service: service.into(),
            lookback,
            limit,
            window: None,
            lookback_duration,
        })
    }

    /// Pin the query to an explicit window.
    pub fn with_window(mut self, window: TimeWindow) -> Self {
        self.window = Some(window);
        self
    }

    pub fn lookback_duration(&self) -> Duration {
        self.lookback_duration
    }

    /// Split into `shards` adjacent windows covering the lookback ending at
    /// `now_us`, or covering the existing window if one is set.
    ///
    /// The last window absorbs the remainder so the union is exact. A single
    /// shard without a window returns the query unchanged.
    pub fn split(
        &self,
        shards: usize,
        now_us: u64,
    ) -> core::result::Result<Vec<TraceQuery>, QueryError> {
        if shards == 0 {
            return Err(QueryError::ZeroShards);
        }
        if shards == 1 && self.window.is_none() {
            return Ok(vec![self.clone()]);
        }

        let whole = self.window.unwrap_or_else(|| {
            let span = self.lookback_duration.as_micros().min(u64::MAX as u128) as u64;
            TimeWindow::new(now_us.saturating_sub(span), now_us)
        });
        let step = whole.len_us() / shards as u64;

        Ok((0..shards as u64)
            .map(|i| {
                let start_us = whole.start_us + i * step;
                let end_us = if i + 1 == shards as u64 {
                    whole.end_us
                } else {
                    start_us + step
                };
                self.clone().with_window(TimeWindow::new(start_us, end_us))
            })
            .collect())
    }

    /// Query string parameters in request order.
    pub fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("service", self.service.clone())];
        match self.window {
            Some(window) => {
                params.push(("start", window.start_us.to_string()));
                params.push(("end", window.end_us.to_string()));
            }
            None => params.push(("lookback", self.lookback.clone())),
        }
        params.push(("limit", self.limit.to_string()));
        params
    }
}

/// Timeout and retry policy for the trace query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Per-request timeout
    pub timeout: Duration,
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Fixed delay between attempts
    pub retry_delay: Duration,
    /// Response statuses that trigger a retry
    pub retryable_statuses: Vec<u16>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_attempts: 3,
            retry_delay: Duration::from_secs(1),
            retryable_statuses: vec![502, 503, 504],
        }
    }
}

impl TransportConfig {
    /// A single attempt with the given timeout.
    pub fn no_retry(timeout: Duration) -> Self {
        Self {
            timeout,
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_statuses.contains(&status)
    }

    /// Attempt budget, never below one.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// A source of trace batches.
#[async_trait::async_trait]
pub trait TraceSource: Send + Sync {
    /// Run one query.
    async fn fetch(&self, query: &TraceQuery) -> Result<Vec<TraceBatch>>;

    /// Human-readable description for logs
    fn describe(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookback_is_validated() {
        assert!(TraceQuery::new("svc", "24h", 1000).is_ok());
        assert!(TraceQuery::new("svc", "7days", 10).is_ok());
        assert!(matches!(
            TraceQuery::new("svc", "yesterday", 10),
            Err(QueryError::InvalidLookback { .. })
        ));
        assert_eq!(
            TraceQuery::new("svc", "0s", 10),
            Err(QueryError::ZeroLookback)
        );
        assert_eq!(TraceQuery::new("svc", "1h", 0), Err(QueryError::ZeroLimit));
    }

    #[test]
    fn params_use_lookback_without_window() {
        let q = TraceQuery::new("agentgateway", "24h", 1000).unwrap();
        assert_eq!(
            q.params(),
            vec![
                ("service", "agentgateway".to_string()),
                ("lookback", "24h".to_string()),
                ("limit", "1000".to_string()),
            ]
        );
    }

    #[test]
    fn params_use_window_when_set() {
        let q = TraceQuery::new("svc", "1h", 5)
            .unwrap()
            .with_window(TimeWindow::new(10, 20));
        assert_eq!(
            q.params(),
            vec![
                ("service", "svc".to_string()),
                ("start", "10".to_string()),
                ("end", "20".to_string()),
                ("limit", "5".to_string()),
            ]
        );
    }

    #[test]
    fn split_covers_lookback_with_adjacent_windows() {
        let q = TraceQuery::new("svc", "1h", 100).unwrap();
        let now = 10_000_000_000;
        let shards = q.split(4, now).unwrap();
        assert_eq!(shards.len(), 4);

        let windows: Vec<_> = shards.iter().map(|s| s.window.unwrap()).collect();
        assert_eq!(windows[0].start_us, now - 3_600_000_000);
        assert_eq!(windows[3].end_us, now);
        for pair in windows.windows(2) {
            assert_eq!(pair[0].end_us, pair[1].start_us);
        }
        assert!(shards.iter().all(|s| s.limit == 100 && s.service == "svc"));
    }

    #[test]
    fn split_remainder_goes_to_last_window() {
        let q = TraceQuery::new("svc", "1h", 1)
            .unwrap()
            .with_window(TimeWindow::new(0, 10));
        let windows: Vec<_> = q
            .split(3, 999)
            .unwrap()
            .into_iter()
            .map(|s| s.window.unwrap())
            .collect();
        assert_eq!(
            windows,
            vec![
                TimeWindow::new(0, 3),
                TimeWindow::new(3, 6),
                TimeWindow::new(6, 10)
            ]
        );
    }

    #[test]
    fn single_shard_keeps_lookback() {
        let q = TraceQuery::new("svc", "2h", 1).unwrap();
        assert_eq!(q.split(1, 42).unwrap(), vec![q.clone()]);
        assert_eq!(q.split(0, 42), Err(QueryError::ZeroShards));
    }

    #[test]
    fn transport_defaults() {
        let t = TransportConfig::default();
        assert_eq!(t.timeout, Duration::from_secs(10));
        assert_eq!(t.attempts(), 3);
        assert_eq!(t.retry_delay, Duration::from_secs(1));
        assert!(t.is_retryable_status(503));
        assert!(!t.is_retryable_status(500));
        assert_eq!(TransportConfig::no_retry(Duration::from_secs(1)).attempts(), 1);
    }
}
