//! Jaeger query API trace source
//!
//! Issues `GET {base}/api/traces` with the query parameters of a
//! [`TraceQuery`], retrying transport failures and retryable statuses with a
//! fixed delay. Delays go through the [`LensRuntime`] so tests never wait.

use tracing::{debug, warn};

use usage_lens_core::span::TraceBatch;
use usage_lens_runtime::tokio_runtime::TokioRuntime;
use usage_lens_runtime::LensRuntime;

use crate::protocol::{parse_response, trace_count};
use crate::traits::{TraceQuery, TraceSource, TransportConfig};
use crate::{FetchError, IngestError, Result};

/// Default Jaeger query endpoint
pub const DEFAULT_JAEGER_URL: &str = "http://localhost:16686";

/// Path of the trace search endpoint
pub const TRACES_PATH: &str = "/api/traces";

/// Trace source backed by a Jaeger query service.
#[derive(Debug)]
pub struct JaegerSource<R: LensRuntime = TokioRuntime> {
    traces_url: String,
    client: reqwest::Client,
    transport: TransportConfig,
    runtime: R,
}

impl JaegerSource<TokioRuntime> {
    /// Create a source for `base_url` on the Tokio runtime.
    pub fn new(
        base_url: impl AsRef<str>,
        transport: TransportConfig,
    ) -> core::result::Result<Self, FetchError> {
        Self::with_runtime(base_url, transport, TokioRuntime::new())
    }
}

impl<R: LensRuntime> JaegerSource<R> {
    /// Create a source that sleeps between attempts on `runtime`.
    pub fn with_runtime(
        base_url: impl AsRef<str>,
        transport: TransportConfig,
        runtime: R,
    ) -> core::result::Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(transport.timeout)
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;
        Ok(Self {
            traces_url: format!("{}{}", base_url.as_ref().trim_end_matches('/'), TRACES_PATH),
            client,
            transport,
            runtime,
        })
    }

    pub fn traces_url(&self) -> &str {
        &self.traces_url
    }

    pub fn transport(&self) -> &TransportConfig {
        &self.transport
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    /// One request. `Ok` carries the body of a 2xx response.
    async fn attempt(
        &self,
        query: &TraceQuery,
        attempt: u32,
    ) -> core::result::Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(&self.traces_url)
            .query(&query.params())
            .send()
            .await
            .map_err(|e| self.request_error(e, attempt))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: self.traces_url.clone(),
                attempts: attempt,
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| self.request_error(e, attempt))?;
        Ok(body.to_vec())
    }

    fn request_error(&self, err: reqwest::Error, attempt: u32) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout {
                url: self.traces_url.clone(),
                attempts: attempt,
                timeout: self.transport.timeout,
            }
        } else {
            FetchError::Transport {
                url: self.traces_url.clone(),
                attempts: attempt,
                message: err.to_string(),
            }
        }
    }

    fn should_retry(&self, err: &FetchError) -> bool {
        match err {
            FetchError::Client(_) => false,
            FetchError::Transport { .. } | FetchError::Timeout { .. } => true,
            FetchError::Status { status, .. } => self.transport.is_retryable_status(*status),
        }
    }
}

#[async_trait::async_trait]
impl<R: LensRuntime> TraceSource for JaegerSource<R> {
    async fn fetch(&self, query: &TraceQuery) -> Result<Vec<TraceBatch>> {
        let max_attempts = self.transport.attempts();
        let mut attempt = 1;
        loop {
            match self.attempt(query, attempt).await {
                Ok(body) => {
                    let batches = parse_response(&body).map_err(IngestError::from)?;
                    debug!(
                        url = %self.traces_url,
                        service = %query.service,
                        attempt,
                        traces = trace_count(&batches),
                        "Fetched traces"
                    );
                    return Ok(batches);
                }
                Err(err) if attempt < max_attempts && self.should_retry(&err) => {
                    warn!(
                        error = %err,
                        attempt,
                        max_attempts,
                        delay = ?self.transport.retry_delay,
                        "Trace query failed, retrying"
                    );
                    self.runtime.sleep(self.transport.retry_delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn describe(&self) -> String {
        format!("jaeger {}", self.traces_url)
    }
}
