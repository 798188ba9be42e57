//! Trace data model and span field extraction.
//!
//! A [`TraceBatch`] is what one trace query returns per result group. Spans
//! carry their tags in arrival order; lookups take the *last* occurrence of a
//! key so a re-tagged attribute overrides the earlier value.

use serde::{Deserialize, Serialize};

/// A key/value tag attached to a span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// One timed unit of work within a trace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    /// Tags in arrival order.
    pub tags: Vec<Tag>,
    /// Span duration in microseconds.
    pub duration_us: u64,
}

impl Span {
    /// Create a span from `(key, value)` pairs.
    pub fn new<K, V>(tags: impl IntoIterator<Item = (K, V)>, duration_us: u64) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            tags: tags.into_iter().map(|(k, v)| Tag::new(k, v)).collect(),
            duration_us,
        }
    }

    /// Value of the last tag named `key`, if any.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .rev()
            .find(|t| t.key == key)
            .map(|t| t.value.as_str())
    }
}

/// An ordered sequence of spans representing one logical request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trace {
    /// Backend trace identifier, when the backend reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    pub spans: Vec<Span>,
}

impl Trace {
    pub fn new(spans: Vec<Span>) -> Self {
        Self {
            trace_id: None,
            spans,
        }
    }

    pub fn with_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }
}

/// An ordered sequence of traces, as returned by one result group of a query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceBatch {
    pub traces: Vec<Trace>,
}

impl TraceBatch {
    /// Iterate every span of every trace in order.
    pub fn spans(&self) -> impl Iterator<Item = &Span> {
        self.traces.iter().flat_map(|t| t.spans.iter())
    }
}

/// Fields pulled out of one span or one log line.
///
/// Every field is optional; the aggregator decides what to do with a signal
/// that lacks an identity (it drops it).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedSignal {
    pub identity: Option<String>,
    pub provider: Option<String>,
    pub method: Option<String>,
    /// HTTP status as received. Only numeric values are counted.
    pub status: Option<String>,
    /// Duration in microseconds, 0 when the source has none.
    pub duration_us: u64,
    /// Timestamp token attached by the log miner.
    pub timestamp: Option<String>,
}

impl ExtractedSignal {
    /// A signal carrying only an identity.
    pub fn for_identity(identity: impl Into<String>) -> Self {
        Self {
            identity: Some(identity.into()),
            ..Self::default()
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_duration_us(mut self, duration_us: u64) -> Self {
        self.duration_us = duration_us;
        self
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    /// Identity if present and non-empty.
    pub fn recordable_identity(&self) -> Option<&str> {
        self.identity.as_deref().filter(|id| !id.is_empty())
    }
}

/// Tag keys the extractor recognizes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldKeys {
    pub identity: String,
    pub route: String,
    pub method: String,
    pub status: String,
}

impl Default for FieldKeys {
    fn default() -> Self {
        Self {
            identity: "http.header.x-user-email".to_string(),
            route: "route.name".to_string(),
            method: "http.method".to_string(),
            status: "http.status".to_string(),
        }
    }
}

/// Pulls recognized attributes out of a span. Never fails.
#[derive(Debug, Clone)]
pub struct SpanFieldExtractor {
    keys: FieldKeys,
    separator: char,
}

impl Default for SpanFieldExtractor {
    fn default() -> Self {
        Self::new(FieldKeys::default())
    }
}

impl SpanFieldExtractor {
    /// Default route separator (`"anthropic-claude"` routes to `"anthropic"`).
    pub const DEFAULT_SEPARATOR: char = '-';

    pub fn new(keys: FieldKeys) -> Self {
        Self {
            keys,
            separator: Self::DEFAULT_SEPARATOR,
        }
    }

    /// Use a different route separator.
    pub fn with_separator(mut self, separator: char) -> Self {
        self.separator = separator;
        self
    }

    pub fn keys(&self) -> &FieldKeys {
        &self.keys
    }

    /// Extract a signal from one span.
    pub fn extract(&self, span: &Span) -> ExtractedSignal {
        let mut signal = ExtractedSignal {
            duration_us: span.duration_us,
            ..ExtractedSignal::default()
        };

        // Forward scan with overwrite gives last-occurrence-wins per key.
        for tag in &span.tags {
            let key = tag.key.as_str();
            if key == self.keys.identity {
                signal.identity = Some(tag.value.clone());
            } else if key == self.keys.route {
                signal.provider = provider_from_route(&tag.value, self.separator);
            } else if key == self.keys.method {
                signal.method = Some(tag.value.clone());
            } else if key == self.keys.status {
                signal.status = Some(tag.value.clone());
            }
        }

        signal
    }

    /// Extract signals from every span of a batch.
    pub fn extract_batch<'a>(
        &'a self,
        batch: &'a TraceBatch,
    ) -> impl Iterator<Item = ExtractedSignal> + 'a {
        batch.spans().map(move |span| self.extract(span))
    }
}

/// Provider token of a route value: the text before the first separator,
/// or the whole value when there is none.
///
/// An empty token (empty route, or a route starting with the separator)
/// yields no provider.
pub fn provider_from_route(route: &str, separator: char) -> Option<String> {
    let provider = match route.split_once(separator) {
        Some((head, _)) => head,
        None => route,
    };
    (!provider.is_empty()).then(|| provider.to_string())
}
