//! Mock trace source for testing
//!
//! This module provides a scripted source for pipeline tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use usage_lens_core::span::TraceBatch;

use crate::traits::{TraceQuery, TraceSource};
use crate::Result;

/// Trace source that replays scripted responses without networking.
///
/// Scripted responses are consumed in call order. Once they run out, every
/// call returns the fallback batches.
#[derive(Debug, Default)]
pub struct MockTraceSource {
    scripted: Mutex<VecDeque<Result<Vec<TraceBatch>>>>,
    fallback: Vec<TraceBatch>,
    queries: Mutex<Vec<TraceQuery>>,
}

impl MockTraceSource {
    /// Create a mock source that returns nothing
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `batches` for every query
    pub fn with_batches(mut self, batches: Vec<TraceBatch>) -> Self {
        self.fallback = batches;
        self
    }

    /// Queue one response ahead of the fallback
    pub fn push_response(self, response: Result<Vec<TraceBatch>>) -> Self {
        lock(&self.scripted).push_back(response);
        self
    }

    /// Every query received so far, in call order
    pub fn queries(&self) -> Vec<TraceQuery> {
        lock(&self.queries).clone()
    }

    /// Number of fetch calls
    pub fn call_count(&self) -> usize {
        lock(&self.queries).len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[async_trait::async_trait]
impl TraceSource for MockTraceSource {
    async fn fetch(&self, query: &TraceQuery) -> Result<Vec<TraceBatch>> {
        lock(&self.queries).push(query.clone());
        let scripted = lock(&self.scripted).pop_front();
        scripted.unwrap_or_else(|| Ok(self.fallback.clone()))
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FetchError, IngestError};
    use usage_lens_core::span::{Span, Trace};

    fn batch() -> TraceBatch {
        TraceBatch {
            traces: vec![Trace::new(vec![Span::new(
                [("http.header.x-user-email", "a")],
                1,
            )])],
        }
    }

    #[tokio::test]
    async fn scripted_then_fallback() {
        let err = IngestError::Fetch(FetchError::Client("boom".into()));
        let source = MockTraceSource::new()
            .with_batches(vec![batch()])
            .push_response(Err(err.clone()));
        let query = TraceQuery::new("svc", "1h", 10).unwrap();

        assert_eq!(source.fetch(&query).await, Err(err));
        assert_eq!(source.fetch(&query).await, Ok(vec![batch()]));
        assert_eq!(source.fetch(&query).await, Ok(vec![batch()]));
        assert_eq!(source.call_count(), 3);
        assert_eq!(source.queries()[0], query);
    }
}
