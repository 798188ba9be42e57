//! Trace response wire format
//!
//! This module decodes the Jaeger query API response:
//!
//! ```json
//! {"data": [{"traces": [{"traceID": "t1", "spans": [{"tags": [{"key": "k", "value": "v"}], "duration": 12}]}]}]}
//! ```
//!
//! A trace's identifier is its own `traceID`, else the first span's.
//! Unknown fields are ignored. Missing `traces`, `spans`, `tags` and
//! `duration` default to empty or zero; a missing or non-array `data` is
//! malformed.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use usage_lens_core::span::{Span, Tag, Trace, TraceBatch};

use crate::ParseError;

/// Top-level response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireResponse {
    pub data: Vec<WireBatch>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WireBatch {
    #[serde(default)]
    pub traces: Vec<WireTrace>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WireTrace {
    #[serde(default, rename = "traceID")]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub spans: Vec<WireSpan>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WireSpan {
    #[serde(default, rename = "traceID")]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<WireTag>,
    /// Microseconds
    #[serde(default)]
    pub duration: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireTag {
    pub key: String,
    #[serde(default)]
    pub value: Value,
}

impl WireTag {
    /// Tag value as text. Numbers and booleans are stringified, null is empty.
    fn value_text(&self) -> Result<String, ParseError> {
        match &self.value {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            Value::Null => Ok(String::new()),
            Value::Array(_) => Err(self.unsupported("array")),
            Value::Object(_) => Err(self.unsupported("object")),
        }
    }

    fn unsupported(&self, kind: &'static str) -> ParseError {
        ParseError::TagValue {
            key: self.key.clone(),
            kind,
        }
    }
}

impl WireSpan {
    fn into_span(self) -> Result<Span, ParseError> {
        let tags = self
            .tags
            .iter()
            .map(|t| Ok(Tag::new(t.key.clone(), t.value_text()?)))
            .collect::<Result<Vec<_>, ParseError>>()?;
        Ok(Span {
            tags,
            duration_us: self.duration,
        })
    }
}

impl WireResponse {
    /// Convert into the core data model.
    pub fn into_batches(self) -> Result<Vec<TraceBatch>, ParseError> {
        self.data
            .into_iter()
            .map(|batch| {
                let traces = batch
                    .traces
                    .into_iter()
                    .map(|trace| {
                        let trace_id = trace
                            .trace_id
                            .or_else(|| trace.spans.first().and_then(|s| s.trace_id.clone()))
                            .filter(|id| !id.is_empty());
                        let spans = trace
                            .spans
                            .into_iter()
                            .map(WireSpan::into_span)
                            .collect::<Result<Vec<_>, _>>()?;
                        Ok(Trace { trace_id, spans })
                    })
                    .collect::<Result<Vec<_>, ParseError>>()?;
                Ok(TraceBatch { traces })
            })
            .collect()
    }
}

/// Decode a response body into trace batches.
pub fn parse_response(body: &[u8]) -> Result<Vec<TraceBatch>, ParseError> {
    let response: WireResponse =
        serde_json::from_slice(body).map_err(|e| ParseError::Malformed(e.to_string()))?;
    response.into_batches()
}

/// Number of traces across batches.
pub fn trace_count(batches: &[TraceBatch]) -> usize {
    batches.iter().map(|b| b.traces.len()).sum()
}
