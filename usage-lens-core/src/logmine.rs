//! Heuristic identity extraction from unstructured service logs.
//!
//! Log mining is a corroboration source only. Each line is mined on its own:
//! identity patterns are tried in priority order and the first one that
//! matches decides the line. When that pattern's identity group is empty or
//! did not participate the line yields nothing; lower-priority patterns are
//! not consulted. Lines no pattern matches contribute nothing.

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::span::ExtractedSignal;
use crate::{Error, Result};

/// `user: alice@example.com`, `user="bob"`, `user=carol.d`
pub const USER_ASSIGNMENT_PATTERN: &str =
    r#"(?i)user['"]?\s*[:=]\s*['"]?(\S+@\S+\.\S+|[\w\.]+)['"]?"#;

/// `User 'mike.chen' requested chat`
pub const QUOTED_USER_PATTERN: &str = r#"(?i)User\s+['"](\w+\.?\w*)['"]"#;

/// `INFO ... auth ... user=dave`
pub const AUTH_USER_PATTERN: &str = r"(?i)INFO.*auth.*user=(\S+)";

/// ISO-like date and time, `T` or space separated.
pub const TIMESTAMP_PATTERN: &str = r"(\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2})";

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| Error::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

/// A match pattern plus the index of the capture group holding the identity.
#[derive(Debug, Clone)]
pub struct IdentityPattern {
    regex: Regex,
    group: usize,
}

impl IdentityPattern {
    /// Compile `pattern`. Fails when the pattern is invalid or has no group
    /// with index `group`.
    pub fn new(pattern: &str, group: usize) -> Result<Self> {
        let regex = compile(pattern)?;
        if group >= regex.captures_len() {
            return Err(Error::InvalidPattern {
                pattern: pattern.to_string(),
                reason: format!(
                    "capture group {group} out of range ({} groups)",
                    regex.captures_len() - 1
                ),
            });
        }
        Ok(Self { regex, group })
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    pub fn group(&self) -> usize {
        self.group
    }

    /// The identity group's text when this pattern matches `line`. A
    /// non-participating group reads as `""`.
    pub fn capture<'l>(&self, line: &'l str) -> Option<&'l str> {
        let caps = self.regex.captures(line)?;
        Some(caps.get(self.group).map_or("", |m| m.as_str()))
    }
}

/// Pattern specification as it appears in configuration files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternSpec {
    pub pattern: String,
    #[serde(default = "default_group")]
    pub group: usize,
}

fn default_group() -> usize {
    1
}

impl PatternSpec {
    pub fn compile(&self) -> Result<IdentityPattern> {
        IdentityPattern::new(&self.pattern, self.group)
    }
}

/// Extracts identity tokens from raw multi-line log text.
#[derive(Debug, Clone)]
pub struct LogPatternMiner {
    patterns: Vec<IdentityPattern>,
    timestamp: Option<Regex>,
}

impl LogPatternMiner {
    /// Miner over `patterns` in priority order, without timestamp extraction.
    pub fn new(patterns: Vec<IdentityPattern>) -> Self {
        Self {
            patterns,
            timestamp: None,
        }
    }

    /// Miner with the built-in pattern set and timestamp pattern.
    pub fn with_defaults() -> Result<Self> {
        let patterns = vec![
            IdentityPattern::new(USER_ASSIGNMENT_PATTERN, 1)?,
            IdentityPattern::new(QUOTED_USER_PATTERN, 1)?,
            IdentityPattern::new(AUTH_USER_PATTERN, 1)?,
        ];
        Self::new(patterns).with_timestamp_pattern(TIMESTAMP_PATTERN)
    }

    /// Compile a miner from configuration entries.
    pub fn from_specs(specs: &[PatternSpec]) -> Result<Self> {
        let patterns = specs
            .iter()
            .map(PatternSpec::compile)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(patterns))
    }

    /// Attach a timestamp pattern. Its first capture group (or the whole
    /// match when it has none) becomes the signal's timestamp token.
    pub fn with_timestamp_pattern(mut self, pattern: &str) -> Result<Self> {
        self.timestamp = Some(compile(pattern)?);
        Ok(self)
    }

    pub fn patterns(&self) -> &[IdentityPattern] {
        &self.patterns
    }

    /// Mine one line. Returns `None` when no identity pattern matches, or
    /// when the first matching pattern captured nothing.
    pub fn mine_line(&self, line: &str) -> Option<ExtractedSignal> {
        let identity = self.patterns.iter().find_map(|p| p.capture(line))?;
        if identity.is_empty() {
            return None;
        }
        let mut signal = ExtractedSignal::for_identity(identity);
        if let Some(ts) = self.timestamp_of(line) {
            signal.timestamp = Some(ts.to_string());
        }
        Some(signal)
    }

    fn timestamp_of<'l>(&self, line: &'l str) -> Option<&'l str> {
        let caps = self.timestamp.as_ref()?.captures(line)?;
        caps.get(1).or_else(|| caps.get(0)).map(|m| m.as_str())
    }

    /// Mine every line of `text` in order.
    pub fn mine(&self, text: &str) -> Vec<ExtractedSignal> {
        let signals: Vec<_> = text.lines().filter_map(|l| self.mine_line(l)).collect();
        #[cfg(feature = "telemetry")]
        tracing::debug!(signals = signals.len(), "mined log text");
        signals
    }

    /// Mine lines on the rayon pool. Yields the same signals as [`Self::mine`]
    /// in unspecified order.
    #[cfg(feature = "parallel")]
    pub fn mine_parallel(&self, text: &str) -> Vec<ExtractedSignal> {
        use rayon::prelude::*;

        text.par_lines()
            .filter_map(|l| self.mine_line(l))
            .collect()
    }
}

/// Request summary mined from gateway access-log lines.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayLogStats {
    pub total_requests: u64,
    pub successful: u64,
    pub errors: u64,
    pub by_provider: BTreeMap<String, u64>,
    pub by_status: BTreeMap<String, u64>,
}

/// Scans gateway access logs for routed requests.
///
/// A line is a request when it carries both `route_rule=` and `http.status=`.
#[derive(Debug, Clone)]
pub struct GatewayLogScanner {
    provider: Regex,
    status: Regex,
}

impl GatewayLogScanner {
    pub fn new() -> Result<Self> {
        Ok(Self {
            provider: compile(r"gen_ai\.provider\.name=(\w+)")?,
            status: compile(r"http\.status=(\d+)")?,
        })
    }

    pub fn scan(&self, text: &str) -> GatewayLogStats {
        let mut stats = GatewayLogStats::default();
        for line in text.lines() {
            if !(line.contains("route_rule=") && line.contains("http.status=")) {
                continue;
            }
            stats.total_requests += 1;

            if let Some(provider) = self.provider.captures(line).and_then(|c| c.get(1)) {
                *stats
                    .by_provider
                    .entry(provider.as_str().to_string())
                    .or_default() += 1;
            }

            if let Some(status) = self.status.captures(line).and_then(|c| c.get(1)) {
                let status = status.as_str();
                *stats.by_status.entry(status.to_string()).or_default() += 1;
                match status.as_bytes().first() {
                    Some(b'2') => stats.successful += 1,
                    Some(b'4') | Some(b'5') => stats.errors += 1,
                    _ => {}
                }
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn miner(patterns: &[(&str, usize)]) -> LogPatternMiner {
        LogPatternMiner::new(
            patterns
                .iter()
                .map(|(p, g)| IdentityPattern::new(p, *g).unwrap())
                .collect(),
        )
    }

    #[test]
    fn first_matching_pattern_wins() {
        let line = "request id=alpha name=beta";
        let ab = miner(&[(r"id=(\w+)", 1), (r"name=(\w+)", 1)]);
        assert_eq!(
            ab.mine_line(line).unwrap().identity.as_deref(),
            Some("alpha")
        );

        let ba = miner(&[(r"name=(\w+)", 1), (r"id=(\w+)", 1)]);
        assert_eq!(ba.mine_line(line).unwrap().identity.as_deref(), Some("beta"));
    }

    #[test]
    fn falls_through_to_lower_priority_pattern() {
        let m = miner(&[(r"id=(\w+)", 1), (r"name=(\w+)", 1)]);
        let signal = m.mine_line("only name=gamma here").unwrap();
        assert_eq!(signal.identity.as_deref(), Some("gamma"));
    }

    #[test]
    fn unmatched_lines_contribute_nothing() {
        let m = miner(&[(r"id=(\w+)", 1)]);
        let text = "id=a\nnothing to see\n\nid=b\n";
        let ids: Vec<_> = m.mine(text).into_iter().filter_map(|s| s.identity).collect();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn first_match_decides_even_without_capture() {
        let m = miner(&[(r"(?:id=(\w*))|(?:anon)", 1), (r"name=(\w+)", 1)]);
        assert!(m.mine_line("anon name=delta").is_none());

        let m = miner(&[(r"user=(\w*)", 1), (r"name=(\w+)", 1)]);
        assert!(m.mine_line("user= name=eve").is_none());
        assert_eq!(
            m.mine_line("user=frank name=eve").unwrap().identity.as_deref(),
            Some("frank")
        );
        assert!(m.mine("anon\nuser= name=eve\n").is_empty());
    }

    #[test]
    fn default_patterns_cover_common_shapes() {
        let m = LogPatternMiner::with_defaults().unwrap();
        let cases = [
            ("2024-05-01 10:00:00 user: alice@example.com logged in", "alice@example.com"),
            ("INFO:     User 'mike.chen' requested chat", "mike.chen"),
            ("INFO auth ok user=bob", "bob"),
        ];
        for (line, expected) in cases {
            let signal = m.mine_line(line).unwrap_or_else(|| panic!("no match: {line}"));
            assert_eq!(signal.identity.as_deref(), Some(expected), "line: {line}");
        }
    }

    #[test]
    fn timestamp_attaches_when_present() {
        let m = LogPatternMiner::with_defaults().unwrap();
        let with_ts = m.mine_line("2024-05-01T10:00:00Z user=carol").unwrap();
        assert_eq!(with_ts.timestamp.as_deref(), Some("2024-05-01T10:00:00"));
        assert_eq!(with_ts.duration_us, 0);

        let without_ts = m.mine_line("user=carol").unwrap();
        assert_eq!(without_ts.timestamp, None);
    }

    #[test]
    fn timestamp_alone_is_not_a_signal() {
        let m = LogPatternMiner::with_defaults().unwrap();
        assert!(m.mine_line("2024-05-01 10:00:00 healthcheck ok").is_none());
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        assert!(matches!(
            IdentityPattern::new("(unclosed", 1),
            Err(Error::InvalidPattern { .. })
        ));
        assert!(matches!(
            IdentityPattern::new(r"id=\w+", 1),
            Err(Error::InvalidPattern { .. })
        ));
    }

    #[test]
    fn specs_compile_in_order() {
        let specs = vec![
            PatternSpec {
                pattern: r"sub=(\w+)".to_string(),
                group: 1,
            },
            PatternSpec {
                pattern: r"uid:(\d+)".to_string(),
                group: 1,
            },
        ];
        let m = LogPatternMiner::from_specs(&specs).unwrap();
        assert_eq!(m.patterns().len(), 2);
        assert_eq!(
            m.mine_line("uid:7 sub=eve").unwrap().identity.as_deref(),
            Some("eve")
        );
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn parallel_mining_matches_sequential() {
        let m = LogPatternMiner::with_defaults().unwrap();
        let text = (0..200)
            .map(|i| {
                if i % 3 == 0 {
                    format!("noise line {i}")
                } else {
                    format!("user=u{}", i % 7)
                }
            })
            .collect::<Vec<_>>()
            .join("\n");

        let mut seq: Vec<_> = m.mine(&text).into_iter().filter_map(|s| s.identity).collect();
        let mut par: Vec<_> = m
            .mine_parallel(&text)
            .into_iter()
            .filter_map(|s| s.identity)
            .collect();
        seq.sort();
        par.sort();
        assert_eq!(seq, par);
    }

    #[test]
    fn gateway_scanner_counts_routed_requests() {
        let logs = "\
info request route_rule=default gen_ai.provider.name=anthropic http.status=200
info request route_rule=default gen_ai.provider.name=openai http.status=503
info request route_rule=default http.status=404
info startup complete
warn route_rule=default missing status";
        let stats = GatewayLogScanner::new().unwrap().scan(logs);
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.successful, 1);
        assert_eq!(stats.errors, 2);
        assert_eq!(stats.by_provider.get("anthropic"), Some(&1));
        assert_eq!(stats.by_provider.get("openai"), Some(&1));
        assert_eq!(stats.by_status.get("404"), Some(&1));
    }
}
