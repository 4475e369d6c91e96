//! Metrics collection utilities.
//!
//! Global and per-host counters for attempts, retries, cache hits and
//! give-ups, plus latency average and p95 over a bounded sample window.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Aggregated metrics across all hosts.
#[derive(Debug, Clone)]
pub struct GlobalStats {
    pub started_at: DateTime<Utc>,
    pub total_requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub retries: u64,
    pub cache_hits: u64,
    pub give_ups: u64,
    pub average_latency: Option<Duration>,
    pub p95_latency: Option<Duration>,
}

impl Default for GlobalStats {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            total_requests: 0,
            successes: 0,
            failures: 0,
            retries: 0,
            cache_hits: 0,
            give_ups: 0,
            average_latency: None,
            p95_latency: None,
        }
    }
}

/// Host-scoped metrics snapshot.
#[derive(Debug, Clone)]
pub struct HostStats {
    pub host: String,
    pub total_requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub retries: u64,
    pub cache_hits: u64,
    pub average_latency: Option<Duration>,
    pub p95_latency: Option<Duration>,
    pub consecutive_failures: u32,
    pub last_status: Option<u16>,
}

impl HostStats {
    fn from_accumulator(host: &str, acc: &HostAccumulator) -> Self {
        let (avg, p95) = latency_stats(acc.latencies.iter().copied());
        Self {
            host: host.to_string(),
            total_requests: acc.total_requests,
            successes: acc.successes,
            failures: acc.failures,
            retries: acc.retries,
            cache_hits: acc.cache_hits,
            average_latency: avg,
            p95_latency: p95,
            consecutive_failures: acc.consecutive_failures,
            last_status: acc.last_status,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub global: GlobalStats,
    pub hosts: Vec<HostStats>,
}

impl MetricsSnapshot {
    pub fn host(&self, host: &str) -> Option<&HostStats> {
        self.hosts.iter().find(|stats| stats.host == host)
    }
}

/// 2xx, 3xx and 404 count as success; 404 is data.
fn is_success(status: u16) -> bool {
    (200..400).contains(&status) || status == 404
}

#[derive(Debug)]
struct HostAccumulator {
    total_requests: u64,
    successes: u64,
    failures: u64,
    retries: u64,
    cache_hits: u64,
    latencies: VecDeque<Duration>,
    max_window: usize,
    consecutive_failures: u32,
    last_status: Option<u16>,
}

impl HostAccumulator {
    fn new(max_window: usize) -> Self {
        Self {
            total_requests: 0,
            successes: 0,
            failures: 0,
            retries: 0,
            cache_hits: 0,
            latencies: VecDeque::with_capacity(max_window),
            max_window,
            consecutive_failures: 0,
            last_status: None,
        }
    }

    fn record(&mut self, status: Option<u16>, latency: Duration) {
        self.total_requests += 1;
        self.last_status = status;

        if status.is_some_and(is_success) {
            self.successes += 1;
            self.consecutive_failures = 0;
        } else {
            self.failures += 1;
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        }

        if self.latencies.len() == self.max_window {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency);
    }
}

fn latency_stats(samples: impl Iterator<Item = Duration>) -> (Option<Duration>, Option<Duration>) {
    let mut samples: Vec<_> = samples.collect();
    if samples.is_empty() {
        return (None, None);
    }
    samples.sort_unstable();
    let avg = samples.iter().map(|d| d.as_secs_f64()).sum::<f64>() / samples.len() as f64;
    let p95_index = ((samples.len() as f64 * 0.95).ceil() as usize).saturating_sub(1);
    (Some(Duration::from_secs_f64(avg)), Some(samples[p95_index]))
}

#[derive(Debug)]
struct MetricsState {
    global: GlobalStats,
    max_window: usize,
    hosts: HashMap<String, HostAccumulator>,
}

impl MetricsState {
    fn new(max_window: usize) -> Self {
        Self {
            global: GlobalStats::default(),
            max_window,
            hosts: HashMap::new(),
        }
    }

    fn accumulator_mut(&mut self, host: &str) -> &mut HostAccumulator {
        let window = self.max_window;
        self.hosts
            .entry(host.to_string())
            .or_insert_with(|| HostAccumulator::new(window))
    }

    fn record_attempt(&mut self, host: &str, status: Option<u16>, latency: Duration) {
        self.global.total_requests += 1;
        if status.is_some_and(is_success) {
            self.global.successes += 1;
        } else {
            self.global.failures += 1;
        }
        self.accumulator_mut(host).record(status, latency);

        let (avg, p95) = latency_stats(
            self.hosts
                .values()
                .flat_map(|host| host.latencies.iter().copied()),
        );
        self.global.average_latency = avg;
        self.global.p95_latency = p95;
    }
}

/// Thread-safe metrics collector shared by fetchers.
#[derive(Clone, Debug)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsState>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::with_window(128)
    }

    pub fn with_window(window: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsState::new(window.max(16)))),
        }
    }

    fn state(&self) -> MutexGuard<'_, MetricsState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record_response(&self, host: &str, status: u16, latency: Duration) {
        self.state().record_attempt(host, Some(status), latency);
    }

    /// Attempt that produced no HTTP status.
    pub fn record_error(&self, host: &str, latency: Duration) {
        self.state().record_attempt(host, None, latency);
    }

    pub fn record_retry(&self, host: &str) {
        let mut state = self.state();
        state.global.retries += 1;
        state.accumulator_mut(host).retries += 1;
    }

    pub fn record_cache_hit(&self, host: &str) {
        let mut state = self.state();
        state.global.cache_hits += 1;
        state.accumulator_mut(host).cache_hits += 1;
    }

    pub fn record_give_up(&self, _host: &str) {
        self.state().global.give_ups += 1;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.state();
        let hosts = state
            .hosts
            .iter()
            .map(|(host, acc)| HostStats::from_accumulator(host, acc))
            .collect();
        MetricsSnapshot {
            global: state.global.clone(),
            hosts,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_success_and_failure() {
        let metrics = MetricsCollector::new();
        metrics.record_response("api.jikan.moe", 200, Duration::from_millis(150));
        metrics.record_response("api.jikan.moe", 404, Duration::from_millis(90));
        metrics.record_response("api.jikan.moe", 503, Duration::from_millis(800));
        metrics.record_error("api.jikan.moe", Duration::from_millis(5));

        let snapshot = metrics.snapshot();
        let host = snapshot.host("api.jikan.moe").unwrap();
        assert_eq!(host.total_requests, 4);
        assert_eq!(host.successes, 2);
        assert_eq!(host.failures, 2);
        assert_eq!(host.consecutive_failures, 2);
        assert_eq!(host.last_status, None);
        assert_eq!(snapshot.global.p95_latency, Some(Duration::from_millis(800)));
    }

    #[test]
    fn counts_cache_hits_per_host() {
        let metrics = MetricsCollector::new();
        metrics.record_cache_hit("api.aniskip.com");
        metrics.record_cache_hit("api.aniskip.com");
        metrics.record_give_up("kitsu.io");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.global.cache_hits, 2);
        assert_eq!(snapshot.global.give_ups, 1);
        assert_eq!(snapshot.host("api.aniskip.com").unwrap().cache_hits, 2);
    }
}
