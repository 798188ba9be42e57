//! Per-identity activity aggregation.
//!
//! Records form a commutative monoid under [`ActivityRecord::merge`]: the
//! default record is the identity element and merging sums every counter
//! field-wise. Partial aggregators built from disjoint slices of the input can
//! therefore be reduced in any order and grouping with identical results.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::span::ExtractedSignal;

/// HTTP statuses at or above this value count as errors.
pub const ERROR_STATUS_THRESHOLD: i64 = 400;

/// Count map with deterministic iteration order.
pub type CountMap = BTreeMap<String, u64>;

/// Aggregated statistics for one identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub request_count: u64,
    pub total_duration_us: u64,
    /// Requests whose numeric status was >= 400.
    pub error_count: u64,
    pub provider_counts: CountMap,
    pub method_counts: CountMap,
    pub status_counts: CountMap,
    /// Smallest timestamp token seen (lexicographic).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_seen: Option<String>,
    /// Largest timestamp token seen (lexicographic).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<String>,
}

fn bump(map: &mut CountMap, key: &str, by: u64) {
    if let Some(count) = map.get_mut(key) {
        *count += by;
    } else {
        map.insert(key.to_string(), by);
    }
}

fn min_token(a: Option<String>, b: Option<&String>) -> Option<String> {
    match (a, b) {
        (Some(a), Some(b)) if b < &a => Some(b.clone()),
        (None, Some(b)) => Some(b.clone()),
        (a, _) => a,
    }
}

fn max_token(a: Option<String>, b: Option<&String>) -> Option<String> {
    match (a, b) {
        (Some(a), Some(b)) if b > &a => Some(b.clone()),
        (None, Some(b)) => Some(b.clone()),
        (a, _) => a,
    }
}

impl ActivityRecord {
    /// Fold one signal into this record. The caller has already checked the
    /// identity.
    fn apply(&mut self, signal: &ExtractedSignal) {
        self.request_count += 1;
        self.total_duration_us += signal.duration_us;

        if let Some(provider) = &signal.provider {
            bump(&mut self.provider_counts, provider, 1);
        }
        if let Some(method) = &signal.method {
            bump(&mut self.method_counts, method, 1);
        }
        if let Some(status) = &signal.status {
            // Non-numeric statuses are ignored rather than treated as errors.
            let status = status.trim();
            if let Ok(code) = status.parse::<i64>() {
                bump(&mut self.status_counts, status, 1);
                if code >= ERROR_STATUS_THRESHOLD {
                    self.error_count += 1;
                }
            }
        }
        if let Some(ts) = &signal.timestamp {
            self.first_seen = min_token(self.first_seen.take(), Some(ts));
            self.last_seen = max_token(self.last_seen.take(), Some(ts));
        }
    }

    /// Field-wise sum of `other` into `self`.
    pub fn merge(&mut self, other: &ActivityRecord) {
        self.request_count += other.request_count;
        self.total_duration_us += other.total_duration_us;
        self.error_count += other.error_count;
        for (k, v) in &other.provider_counts {
            bump(&mut self.provider_counts, k, *v);
        }
        for (k, v) in &other.method_counts {
            bump(&mut self.method_counts, k, *v);
        }
        for (k, v) in &other.status_counts {
            bump(&mut self.status_counts, k, *v);
        }
        self.first_seen = min_token(self.first_seen.take(), other.first_seen.as_ref());
        self.last_seen = max_token(self.last_seen.take(), other.last_seen.as_ref());
    }

    /// Consuming form of [`Self::merge`].
    pub fn merged(mut self, other: &ActivityRecord) -> Self {
        self.merge(other);
        self
    }

    /// Mean duration in milliseconds, 0 when there are no requests.
    pub fn avg_duration_ms(&self) -> f64 {
        if self.request_count == 0 {
            return 0.0;
        }
        self.total_duration_us as f64 / self.request_count as f64 / 1000.0
    }

    /// Share of requests that errored, in percent. 0 when there are no
    /// requests.
    pub fn error_percentage(&self) -> f64 {
        percentage(self.error_count, self.request_count)
    }

    /// Share of requests routed to `provider`, in percent.
    pub fn provider_percentage(&self, provider: &str) -> f64 {
        let count = self.provider_counts.get(provider).copied().unwrap_or(0);
        percentage(count, self.request_count)
    }

    /// Providers by count descending, name ascending on ties.
    pub fn ranked_providers(&self) -> Vec<(&str, u64)> {
        rank_counts(&self.provider_counts)
    }
}

/// `100 * part / whole`, 0 when `whole` is 0.
pub fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    100.0 * part as f64 / whole as f64
}

/// Entries of a count map by count descending, key ascending on ties.
pub fn rank_counts(counts: &CountMap) -> Vec<(&str, u64)> {
    let mut ranked: Vec<_> = counts.iter().map(|(k, v)| (k.as_str(), *v)).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked
}

/// Ordered `(identity, record)` pairs produced by [`ActivityAggregator::snapshot`].
pub type Snapshot = Vec<(String, ActivityRecord)>;

fn snapshot_order(a: &(String, ActivityRecord), b: &(String, ActivityRecord)) -> Ordering {
    b.1.request_count
        .cmp(&a.1.request_count)
        .then_with(|| a.0.cmp(&b.0))
}

/// Accumulates extracted signals into per-identity records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivityAggregator {
    records: BTreeMap<String, ActivityRecord>,
    signals_seen: u64,
    signals_dropped: u64,
}

impl ActivityAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Aggregate an iterator of signals.
    pub fn from_signals<'a>(signals: impl IntoIterator<Item = &'a ExtractedSignal>) -> Self {
        let mut agg = Self::new();
        agg.record_all(signals);
        agg
    }

    /// Record one signal. Signals without a non-empty identity are dropped.
    pub fn record(&mut self, signal: &ExtractedSignal) {
        self.signals_seen += 1;
        let Some(identity) = signal.recordable_identity() else {
            self.signals_dropped += 1;
            return;
        };

        if let Some(record) = self.records.get_mut(identity) {
            record.apply(signal);
        } else {
            let mut record = ActivityRecord::default();
            record.apply(signal);
            self.records.insert(identity.to_string(), record);
        }
    }

    pub fn record_all<'a>(&mut self, signals: impl IntoIterator<Item = &'a ExtractedSignal>) {
        for signal in signals {
            self.record(signal);
        }
    }

    /// Fold another aggregator into this one.
    pub fn merge(&mut self, other: &ActivityAggregator) {
        self.signals_seen += other.signals_seen;
        self.signals_dropped += other.signals_dropped;
        for (identity, record) in &other.records {
            self.records
                .entry(identity.clone())
                .or_default()
                .merge(record);
        }
    }

    /// Reduce partial aggregators into one.
    pub fn merge_all(parts: impl IntoIterator<Item = ActivityAggregator>) -> Self {
        parts.into_iter().fold(Self::new(), |mut acc, part| {
            acc.merge(&part);
            acc
        })
    }

    /// Records sorted by request count descending, identity ascending on ties.
    pub fn snapshot(&self) -> Snapshot {
        let mut entries: Snapshot = self
            .records
            .iter()
            .map(|(id, rec)| (id.clone(), rec.clone()))
            .collect();
        entries.sort_by(snapshot_order);
        entries
    }

    pub fn get(&self, identity: &str) -> Option<&ActivityRecord> {
        self.records.get(identity)
    }

    /// Number of identities with at least one recorded signal.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Signals offered to [`Self::record`], recorded or not.
    pub fn signals_seen(&self) -> u64 {
        self.signals_seen
    }

    /// Signals dropped for lacking an identity.
    pub fn signals_dropped(&self) -> u64 {
        self.signals_dropped
    }

    /// Provider totals across every identity.
    pub fn provider_totals(&self) -> CountMap {
        let mut totals = CountMap::new();
        for record in self.records.values() {
            for (provider, count) in &record.provider_counts {
                bump(&mut totals, provider, *count);
            }
        }
        totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(id: &str, provider: &str, status: &str, dur: u64) -> ExtractedSignal {
        ExtractedSignal::for_identity(id)
            .with_provider(provider)
            .with_status(status)
            .with_duration_us(dur)
    }

    fn example_signals() -> Vec<ExtractedSignal> {
        vec![
            sig("alice", "anthropic", "200", 100),
            sig("alice", "anthropic", "500", 200),
            sig("bob", "openai", "200", 50),
        ]
    }

    #[test]
    fn end_to_end_example() {
        let agg = ActivityAggregator::from_signals(&example_signals());
        let snap = agg.snapshot();

        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].0, "alice");
        assert_eq!(snap[1].0, "bob");

        let alice = &snap[0].1;
        assert_eq!(alice.request_count, 2);
        assert_eq!(alice.error_count, 1);
        assert!((alice.error_percentage() - 50.0).abs() < 1e-9);
        assert_eq!(alice.provider_counts.get("anthropic"), Some(&2));
        assert!((alice.avg_duration_ms() - 0.15).abs() < 1e-9);

        let bob = &snap[1].1;
        assert_eq!(bob.request_count, 1);
        assert_eq!(bob.error_count, 0);
        assert_eq!(bob.error_percentage(), 0.0);
        assert_eq!(bob.provider_counts.get("openai"), Some(&1));
        assert!((bob.avg_duration_ms() - 0.05).abs() < 1e-9);
    }

    #[test]
    fn request_count_equals_signals_for_identity() {
        let mut agg = ActivityAggregator::new();
        for i in 0..17 {
            agg.record(&ExtractedSignal::for_identity("carol").with_duration_us(i));
        }
        agg.record(&ExtractedSignal::for_identity("dave"));
        assert_eq!(agg.get("carol").unwrap().request_count, 17);
        assert_eq!(agg.get("dave").unwrap().request_count, 1);
        assert_eq!(agg.signals_seen(), 18);
    }

    #[test]
    fn empty_or_missing_identity_is_not_recorded() {
        let mut agg = ActivityAggregator::new();
        agg.record(&ExtractedSignal::for_identity("").with_provider("openai"));
        agg.record(&ExtractedSignal::default().with_status("500"));
        assert!(agg.is_empty());
        assert_eq!(agg.signals_dropped(), 2);
        assert!(agg.snapshot().is_empty());
    }

    #[test]
    fn non_numeric_status_is_ignored() {
        let mut agg = ActivityAggregator::new();
        agg.record(&ExtractedSignal::for_identity("erin").with_status("OK"));
        agg.record(&ExtractedSignal::for_identity("erin").with_status("404"));
        let rec = agg.get("erin").unwrap();
        assert_eq!(rec.request_count, 2);
        assert_eq!(rec.error_count, 1);
        assert_eq!(rec.status_counts.len(), 1);
        assert_eq!(rec.status_counts.get("404"), Some(&1));
        assert!(rec.status_counts.get("OK").is_none());
    }

    #[test]
    fn padded_status_shares_bucket() {
        let mut agg = ActivityAggregator::new();
        agg.record(&ExtractedSignal::for_identity("finn").with_status("200 "));
        agg.record(&ExtractedSignal::for_identity("finn").with_status("200"));
        agg.record(&ExtractedSignal::for_identity("finn").with_status(" 502"));
        let rec = agg.get("finn").unwrap();
        assert_eq!(rec.status_counts.len(), 2);
        assert_eq!(rec.status_counts.get("200"), Some(&2));
        assert_eq!(rec.status_counts.get("502"), Some(&1));
        assert_eq!(rec.error_count, 1);
    }

    #[test]
    fn zero_requests_guard_divisions() {
        let rec = ActivityRecord::default();
        assert_eq!(rec.avg_duration_ms(), 0.0);
        assert_eq!(rec.error_percentage(), 0.0);
        assert_eq!(rec.provider_percentage("openai"), 0.0);
    }

    #[test]
    fn snapshot_is_independent_of_insertion_order() {
        let mut signals = example_signals();
        signals.push(sig("zed", "gemini", "200", 10));
        signals.push(sig("amy", "gemini", "200", 10));

        let forward = ActivityAggregator::from_signals(&signals).snapshot();
        signals.reverse();
        let reversed = ActivityAggregator::from_signals(&signals).snapshot();
        signals.rotate_left(2);
        let rotated = ActivityAggregator::from_signals(&signals).snapshot();

        assert_eq!(forward, reversed);
        assert_eq!(forward, rotated);
        let order: Vec<_> = forward.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(order, vec!["alice", "amy", "bob", "zed"]);
    }

    #[test]
    fn merge_is_associative_and_commutative() {
        let a = ActivityAggregator::from_signals(&[
            sig("alice", "anthropic", "200", 10),
            sig("bob", "openai", "503", 20),
        ]);
        let b = ActivityAggregator::from_signals(&[
            sig("alice", "openai", "429", 30),
            ExtractedSignal::for_identity("carol").with_method("GET"),
        ]);
        let c = ActivityAggregator::from_signals(&[
            sig("bob", "gemini", "200", 40),
            ExtractedSignal::default(),
        ]);

        let mut ab_c = a.clone();
        ab_c.merge(&b);
        ab_c.merge(&c);

        let mut bc = b.clone();
        bc.merge(&c);
        let mut a_bc = a.clone();
        a_bc.merge(&bc);

        let c_b_a = ActivityAggregator::merge_all(vec![c.clone(), b.clone(), a.clone()]);

        assert_eq!(ab_c, a_bc);
        assert_eq!(ab_c, c_b_a);

        let mut all = Vec::new();
        for s in [
            sig("alice", "anthropic", "200", 10),
            sig("bob", "openai", "503", 20),
            sig("alice", "openai", "429", 30),
            ExtractedSignal::for_identity("carol").with_method("GET"),
            sig("bob", "gemini", "200", 40),
            ExtractedSignal::default(),
        ] {
            all.push(s);
        }
        assert_eq!(ab_c, ActivityAggregator::from_signals(&all));
    }

    #[test]
    fn record_merge_with_default_is_identity() {
        let rec = ActivityAggregator::from_signals(&example_signals())
            .get("alice")
            .cloned()
            .unwrap();
        assert_eq!(rec.clone().merged(&ActivityRecord::default()), rec);
        assert_eq!(ActivityRecord::default().merged(&rec), rec);
    }

    #[test]
    fn timestamps_track_first_and_last_seen() {
        let mut agg = ActivityAggregator::new();
        for ts in ["2024-05-02 09:00:00", "2024-05-01 10:00:00", "2024-05-03 08:00:00"] {
            agg.record(&ExtractedSignal::for_identity("frank").with_timestamp(ts));
        }
        agg.record(&ExtractedSignal::for_identity("frank"));
        let rec = agg.get("frank").unwrap();
        assert_eq!(rec.first_seen.as_deref(), Some("2024-05-01 10:00:00"));
        assert_eq!(rec.last_seen.as_deref(), Some("2024-05-03 08:00:00"));
        assert_eq!(rec.request_count, 4);
    }

    #[test]
    fn provider_totals_and_ranking() {
        let agg = ActivityAggregator::from_signals(&[
            sig("a", "openai", "200", 0),
            sig("b", "openai", "200", 0),
            sig("b", "anthropic", "200", 0),
            sig("c", "gemini", "200", 0),
        ]);
        let totals = agg.provider_totals();
        assert_eq!(totals.get("openai"), Some(&2));
        assert_eq!(
            rank_counts(&totals),
            vec![("openai", 2), ("anthropic", 1), ("gemini", 1)]
        );
    }

    #[test]
    fn record_serde_roundtrip_preserves_counters() {
        let agg = ActivityAggregator::from_signals(&example_signals());
        let json = serde_json::to_string(&agg.snapshot()).unwrap();
        let parsed: Snapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, agg.snapshot());
    }
}
