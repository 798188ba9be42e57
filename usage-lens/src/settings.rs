//! TOML settings file.
//!
//! Every key is optional; absent keys keep the value already in the builder.
//! Command line flags are applied after the file and win.
//!
//! ```toml
//! [jaeger]
//! url = "http://jaeger:16686"
//! service = "agentgateway"
//! lookback = "24h"
//! limit = 1000
//! shards = 4
//!
//! [transport]
//! timeout = "10s"
//! max_attempts = 3
//! retry_delay = "1s"
//! retryable_statuses = [502, 503, 504]
//!
//! [fields]
//! identity = "http.header.x-user-email"
//! route = "route.name"
//! separator = "-"
//!
//! [logs]
//! command_timeout = "30s"
//! timestamp_pattern = '(\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2})'
//!
//! [[logs.patterns]]
//! pattern = '(?i)user=(\S+)'
//! group = 1
//!
//! [users]
//! limit = 10
//!
//! [logging]
//! level = "info"
//! json = false
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use usage_lens_core::logmine::PatternSpec;

use crate::logging::{parse_level, LoggingConfig};
use crate::UsageLensConfigBuilder;

/// Settings file or value error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid duration for `{field}`: `{value}` ({reason})")]
    InvalidDuration {
        field: &'static str,
        value: String,
        reason: String,
    },
    #[error("route separator must be exactly one character, got `{0}`")]
    InvalidSeparator(String),
    #[error("unknown log level `{0}`")]
    InvalidLevel(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JaegerSettings {
    pub url: Option<String>,
    pub service: Option<String>,
    pub lookback: Option<String>,
    pub limit: Option<u32>,
    pub shards: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransportSettings {
    pub timeout: Option<String>,
    pub max_attempts: Option<u32>,
    pub retry_delay: Option<String>,
    pub retryable_statuses: Option<Vec<u16>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldSettings {
    pub identity: Option<String>,
    pub route: Option<String>,
    pub method: Option<String>,
    pub status: Option<String>,
    pub separator: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogSettings {
    pub command_timeout: Option<String>,
    pub timestamp_pattern: Option<String>,
    #[serde(default)]
    pub patterns: Vec<PatternSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserSettings {
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingSettings {
    pub level: Option<String>,
    pub json: Option<bool>,
}

/// Parsed settings file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub jaeger: JaegerSettings,
    pub transport: TransportSettings,
    pub fields: FieldSettings,
    pub logs: LogSettings,
    pub users: UserSettings,
    pub logging: LoggingSettings,
}

fn duration(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value).map_err(|e| ConfigError::InvalidDuration {
        field,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

impl Settings {
    /// Read and parse a settings file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply the file's values on top of `builder`.
    pub fn apply(
        &self,
        mut builder: UsageLensConfigBuilder,
    ) -> Result<UsageLensConfigBuilder, ConfigError> {
        let jaeger = &self.jaeger;
        if let Some(url) = &jaeger.url {
            builder = builder.jaeger_url(url);
        }
        if let Some(service) = &jaeger.service {
            builder = builder.service(service);
        }
        if let Some(lookback) = &jaeger.lookback {
            builder = builder.lookback(lookback);
        }
        if let Some(limit) = jaeger.limit {
            builder = builder.limit(limit);
        }
        if let Some(shards) = jaeger.shards {
            builder = builder.shards(shards);
        }

        let current = builder.peek();
        let mut transport = current.transport.clone();
        let t = &self.transport;
        if let Some(timeout) = &t.timeout {
            transport.timeout = duration("transport.timeout", timeout)?;
        }
        if let Some(max_attempts) = t.max_attempts {
            transport.max_attempts = max_attempts;
        }
        if let Some(delay) = &t.retry_delay {
            transport.retry_delay = duration("transport.retry_delay", delay)?;
        }
        if let Some(statuses) = &t.retryable_statuses {
            transport.retryable_statuses = statuses.clone();
        }

        let mut keys = current.field_keys.clone();
        let f = &self.fields;
        if let Some(identity) = &f.identity {
            keys.identity = identity.clone();
        }
        if let Some(route) = &f.route {
            keys.route = route.clone();
        }
        if let Some(method) = &f.method {
            keys.method = method.clone();
        }
        if let Some(status) = &f.status {
            keys.status = status.clone();
        }
        builder = builder.transport(transport).field_keys(keys);

        if let Some(separator) = &f.separator {
            let mut chars = separator.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => builder = builder.route_separator(c),
                _ => return Err(ConfigError::InvalidSeparator(separator.clone())),
            }
        }

        let logs = &self.logs;
        if let Some(timeout) = &logs.command_timeout {
            builder = builder.command_timeout(duration("logs.command_timeout", timeout)?);
        }
        if let Some(pattern) = &logs.timestamp_pattern {
            builder = builder.timestamp_pattern(pattern);
        }
        if !logs.patterns.is_empty() {
            builder = builder.log_patterns(logs.patterns.clone());
        }
        if let Some(limit) = self.users.limit {
            builder = builder.user_limit(limit);
        }

        Ok(builder)
    }

    /// Apply the `[logging]` table on top of `config`.
    pub fn apply_logging(&self, mut config: LoggingConfig) -> Result<LoggingConfig, ConfigError> {
        if let Some(level) = &self.logging.level {
            config.level =
                parse_level(level).ok_or_else(|| ConfigError::InvalidLevel(level.clone()))?;
        }
        if let Some(json) = self.logging.json {
            config.json_format = json;
        }
        Ok(config)
    }
}
