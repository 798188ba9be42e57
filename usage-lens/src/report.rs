//! Usage report rendering.
//!
//! Two renditions of the same aggregation: a structured JSON document
//! ([`StructuredReport`]) and a human-readable ranked listing
//! ([`render_text`]). Both are deterministic for a given input.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use usage_lens_core::aggregation::{percentage, rank_counts, ActivityAggregator, ActivityRecord};
use usage_lens_core::logmine::GatewayLogStats;
use usage_lens_core::users::UserRecord;

/// Width of the section rules.
const RULE_WIDTH: usize = 70;

/// Users listed in the summary.
const TOP_USERS: usize = 5;

/// Everything a report is rendered from.
#[derive(Debug, Clone, Copy)]
pub struct ReportInput<'a> {
    pub lookback: &'a str,
    pub total_traces: usize,
    pub traces: &'a ActivityAggregator,
    /// Identities mined from service logs, when log input was supplied
    pub log_users: Option<&'a ActivityAggregator>,
    /// Gateway access-log summary, when gateway logs were supplied
    pub gateway: Option<&'a GatewayLogStats>,
    /// Account records, when a user source was supplied
    pub active_users: Option<&'a [UserRecord]>,
}

impl<'a> ReportInput<'a> {
    pub fn new(lookback: &'a str, total_traces: usize, traces: &'a ActivityAggregator) -> Self {
        Self {
            lookback,
            total_traces,
            traces,
            log_users: None,
            gateway: None,
            active_users: None,
        }
    }

    pub fn with_log_users(mut self, log_users: &'a ActivityAggregator) -> Self {
        self.log_users = Some(log_users);
        self
    }

    pub fn with_gateway(mut self, gateway: &'a GatewayLogStats) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn with_active_users(mut self, users: &'a [UserRecord]) -> Self {
        self.active_users = Some(users);
        self
    }

    fn has_secondary(&self) -> bool {
        self.log_users.is_some() || self.gateway.is_some() || self.active_users.is_some()
    }
}

/// Structured report document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredReport {
    pub lookback: String,
    pub total_traces: usize,
    pub unique_users: usize,
    pub users: BTreeMap<String, ActivityRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_users: Option<BTreeMap<String, ActivityRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayLogStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_users: Option<Vec<UserRecord>>,
}

fn record_map(agg: &ActivityAggregator) -> BTreeMap<String, ActivityRecord> {
    agg.snapshot().into_iter().collect()
}

impl StructuredReport {
    pub fn from_input(input: &ReportInput<'_>) -> Self {
        Self {
            lookback: input.lookback.to_string(),
            total_traces: input.total_traces,
            unique_users: input.traces.len(),
            users: record_map(input.traces),
            log_users: input.log_users.map(record_map),
            gateway: input.gateway.cloned(),
            active_users: input.active_users.map(<[UserRecord]>::to_vec),
        }
    }

    /// Parse a report previously produced by [`render_structured`].
    pub fn parse(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// Render the structured report as pretty-printed JSON.
pub fn render_structured(input: &ReportInput<'_>) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&StructuredReport::from_input(input))
}

/// First character uppercased, the rest lowercased.
fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

/// Bar of `floor(pct / 2)` glyphs.
fn bar(pct: f64) -> String {
    "█".repeat((pct / 2.0).floor().max(0.0) as usize)
}

fn rule(ch: char) -> String {
    ch.to_string().repeat(RULE_WIDTH)
}

fn render_empty_notice(out: &mut String, lookback: &str) {
    out.push_str("\nNo user activity found in traces\n");
    out.push_str("   This could mean:\n");
    out.push_str("   - Spans are not tagged with the caller identity header\n");
    out.push_str("   - No requests have been made recently\n");
    out.push_str(&format!("   - Traces might be older than {lookback}\n"));
}

fn render_user(out: &mut String, rank: usize, identity: &str, record: &ActivityRecord) {
    out.push_str(&format!("{rank}. {identity}\n"));
    out.push_str(&format!("   {}\n", "─".repeat(RULE_WIDTH - 4)));
    out.push_str(&format!("   Total Requests:     {}\n", record.request_count));
    out.push_str(&format!(
        "   Avg Response Time:  {:.2}ms\n",
        record.avg_duration_ms()
    ));
    out.push_str(&format!(
        "   Errors:             {} ({:.1}%)\n",
        record.error_count,
        record.error_percentage()
    ));
    if let (Some(first), Some(last)) = (&record.first_seen, &record.last_seen) {
        out.push_str(&format!("   Seen:               {first} .. {last}\n"));
    }

    if !record.provider_counts.is_empty() {
        out.push_str("   Providers Used:\n");
        for (provider, count) in record.ranked_providers() {
            out.push_str(&format!(
                "     • {}: {} requests ({:.1}%)\n",
                capitalize(provider),
                count,
                record.provider_percentage(provider)
            ));
        }
    }

    if !record.status_counts.is_empty() {
        out.push_str("   Status Codes:\n");
        for (code, count) in &record.status_counts {
            out.push_str(&format!("     • {code}: {count} requests\n"));
        }
    }

    out.push('\n');
}

fn render_summary(out: &mut String, traces: &ActivityAggregator) {
    out.push_str(&format!("{}\n", rule('=')));
    out.push_str("SUMMARY\n");
    out.push_str(&format!("{}\n\n", rule('=')));

    let totals = traces.provider_totals();
    if !totals.is_empty() {
        let all: u64 = totals.values().sum();
        out.push_str("Provider Usage Distribution:\n");
        for (provider, count) in rank_counts(&totals) {
            let pct = percentage(count, all);
            out.push_str(&format!(
                "  {:12} {} {:4} ({:.1}%)\n",
                capitalize(provider),
                bar(pct),
                count,
                pct
            ));
        }
    }

    out.push_str(&format!("\nTop {TOP_USERS} Most Active Users:\n"));
    for (idx, (identity, record)) in traces.snapshot().iter().take(TOP_USERS).enumerate() {
        out.push_str(&format!(
            "  {}. {} - {} requests\n",
            idx + 1,
            identity,
            record.request_count
        ));
    }
    out.push('\n');
}

fn render_active_users(out: &mut String, users: &[UserRecord]) {
    out.push_str("Recently Active Users:\n");
    out.push_str(&format!("{}\n", rule('-')));
    if users.is_empty() {
        out.push_str("  No user records available\n\n");
        return;
    }
    for (idx, user) in users.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", idx + 1, user.email));
        if !user.name.is_empty() {
            out.push_str(&format!("   Name: {}\n", user.name));
        }
        out.push_str(&format!("   Role: {}\n", user.role));
        if let Some(last) = &user.last_active {
            out.push_str(&format!("   Last Active: {last}\n"));
        }
    }
    out.push('\n');
}

fn render_log_users(out: &mut String, log_users: &ActivityAggregator) {
    out.push_str("Log Activity (identities mined from service logs):\n");
    out.push_str(&format!("{}\n", rule('-')));
    if log_users.is_empty() {
        out.push_str("  No identities found in log input\n\n");
        return;
    }
    for (identity, record) in log_users.snapshot() {
        match &record.last_seen {
            Some(last) => out.push_str(&format!(
                "  • {identity}: {} events (last {last})\n",
                record.request_count
            )),
            None => out.push_str(&format!("  • {identity}: {} events\n", record.request_count)),
        }
    }
    out.push('\n');
}

fn render_gateway(out: &mut String, stats: &GatewayLogStats) {
    out.push_str("Gateway Log Statistics:\n");
    out.push_str(&format!("{}\n", rule('-')));
    out.push_str(&format!("Total Requests:  {}\n", stats.total_requests));
    out.push_str(&format!("Successful:      {}\n", stats.successful));
    out.push_str(&format!("Errors:          {}\n", stats.errors));

    if !stats.by_provider.is_empty() {
        out.push_str("\nBy Provider:\n");
        for (provider, count) in rank_counts(&stats.by_provider) {
            out.push_str(&format!(
                "  • {}: {} requests ({:.1}%)\n",
                capitalize(provider),
                count,
                percentage(count, stats.total_requests)
            ));
        }
    }

    if !stats.by_status.is_empty() {
        out.push_str("\nBy Status Code:\n");
        for (status, count) in &stats.by_status {
            out.push_str(&format!("  • HTTP {status}: {count} requests\n"));
        }
    }
    out.push('\n');
}

fn render_secondary(out: &mut String, input: &ReportInput<'_>) {
    if !input.has_secondary() {
        return;
    }
    out.push_str(&format!("{}\n", rule('=')));
    out.push_str("LOG CORROBORATION\n");
    out.push_str(&format!("{}\n\n", rule('=')));
    if let Some(users) = input.active_users {
        render_active_users(out, users);
    }
    if let Some(log_users) = input.log_users {
        render_log_users(out, log_users);
    }
    if let Some(stats) = input.gateway {
        render_gateway(out, stats);
    }
}

/// Render the human-readable report.
pub fn render_text(input: &ReportInput<'_>) -> String {
    let mut out = String::new();

    if input.traces.is_empty() {
        render_empty_notice(&mut out, input.lookback);
        if input.has_secondary() {
            out.push('\n');
        }
        render_secondary(&mut out, input);
        return out;
    }

    out.push_str(&format!("\n{}\n", rule('=')));
    out.push_str(&format!("USER ACTIVITY REPORT - Last {}\n", input.lookback));
    out.push_str(&format!("{}\n", rule('=')));
    out.push_str(&format!("Total Traces: {}\n", input.total_traces));
    out.push_str(&format!("Unique Users: {}\n", input.traces.len()));
    out.push_str(&format!("{}\n\n", rule('=')));

    for (idx, (identity, record)) in input.traces.snapshot().iter().enumerate() {
        render_user(&mut out, idx + 1, identity, record);
    }

    render_summary(&mut out, input.traces);
    render_secondary(&mut out, input);
    out.push_str(&format!("{}\n", rule('=')));
    out
}
