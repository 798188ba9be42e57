//! Diagnostic logging setup.
//!
//! Diagnostics always go to stderr; stdout carries only the report.

use std::io::IsTerminal;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Crate targets that receive the configured level.
const LOG_TARGETS: [&str; 4] = [
    "usage_lens",
    "usage_lens_core",
    "usage_lens_net",
    "usage_lens_report",
];

/// Configuration for the logging system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Log level for usage-lens crates (default: WARN)
    pub level: Level,
    /// Emit one JSON object per event (default: false)
    pub json_format: bool,
    /// Allow colors; they are only emitted when stderr is a terminal
    /// (default: true)
    pub colorize: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::WARN,
            json_format: false,
            colorize: true,
        }
    }
}

/// Parse a level name (`"trace"` .. `"error"`, case-insensitive).
pub fn parse_level(name: &str) -> Option<Level> {
    name.trim().parse().ok()
}

/// Filter directives for `config`, e.g. `usage_lens=info,usage_lens_net=info`.
fn filter_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    LOG_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Whether the text layer writes ANSI colors.
fn use_ansi(colorize: bool, stderr_is_terminal: bool) -> bool {
    colorize && stderr_is_terminal
}

/// Initialize the global subscriber. `RUST_LOG` overrides the configured
/// level. Calling this more than once is a no-op.
pub fn init_logging(config: LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(config.level)));

    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    let layer = if config.json_format {
        layer.json().flatten_event(true).boxed()
    } else {
        layer
            .with_ansi(use_ansi(config.colorize, std::io::stderr().is_terminal()))
            .boxed()
    };

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(layer)
        .try_init();
}
