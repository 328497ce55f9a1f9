//! ZNS metrics collection
//!
//! Owned collector (no global registry): query counters, fixed-window moving
//! averages, resource gauges, health computation, and Prometheus text export
//! with HELP/TYPE headers.

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Instant;
use sysinfo::System;

use crate::types::ZnsErrorCode;

/// Sample count for latency / hit-rate / error-rate windows.
const WIDE_WINDOW: usize = 100;

/// Sample count for the QPS window (one sample per periodic tick).
const QPS_WINDOW: usize = 60;

/// Health thresholds from the service contract.
const MEMORY_UNHEALTHY_FRACTION: f64 = 0.90;
const ERROR_RATE_DEGRADED: f64 = 0.10;
const CPU_DEGRADED_PERCENT: f64 = 80.0;
const RESPONSE_TIME_DEGRADED_MS: f64 = 5_000.0;

/// Service health, computed on demand from current metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Fixed-size sliding sample window.
struct Window {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl Window {
    fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, value: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    fn average(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }
}

/// Point-in-time view used for status reports, health, and alerting.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_queries: u64,
    pub successful_queries: u64,
    pub failed_queries: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub rate_limited: u64,
    pub qps: f64,
    pub avg_resolution_ms: f64,
    pub cache_hit_rate: f64,
    pub error_rate: f64,
    pub memory_bytes: u64,
    pub memory_limit_bytes: u64,
    pub cpu_percent: f64,
    pub open_connections: i64,
    pub active_subscriptions: i64,
    pub uptime_secs: u64,
    pub per_resolver: HashMap<String, u64>,
    pub per_error: HashMap<String, u64>,
    pub per_tld: HashMap<String, u64>,
}

struct Windows {
    latency_ms: Window,
    hit: Window,
    error: Window,
    qps: Window,
    queries_at_last_sample: u64,
    last_sample: Instant,
}

/// Metrics collector for the ZNS subsystem.
pub struct ZnsMetrics {
    registry: Registry,
    queries_total: IntCounter,
    queries_success: IntCounter,
    queries_failed: IntCounter,
    cache_hits: IntCounter,
    cache_misses: IntCounter,
    rate_limited: IntCounter,
    resolver_queries: IntCounterVec,
    error_kinds: IntCounterVec,
    tld_queries: IntCounterVec,
    memory_bytes: IntGauge,
    cpu_percent_x100: IntGauge,
    open_connections: IntGauge,
    active_subscriptions: IntGauge,
    uptime_seconds: IntGauge,

    windows: Mutex<Windows>,
    system: Mutex<System>,
    memory_limit_bytes: u64,
    started_at: Instant,
}

impl ZnsMetrics {
    pub fn new(memory_limit_bytes: u64) -> Self {
        let registry = Registry::new();

        let queries_total = IntCounter::new("zns_queries_total", "Total resolution queries")
            .expect("metric can be created");
        let queries_success =
            IntCounter::new("zns_queries_success_total", "Successful resolution queries")
                .expect("metric can be created");
        let queries_failed =
            IntCounter::new("zns_queries_failed_total", "Failed resolution queries")
                .expect("metric can be created");
        let cache_hits = IntCounter::new("zns_cache_hits_total", "Domain cache hits")
            .expect("metric can be created");
        let cache_misses = IntCounter::new("zns_cache_misses_total", "Domain cache misses")
            .expect("metric can be created");
        let rate_limited =
            IntCounter::new("zns_rate_limited_total", "Queries rejected by the rate limiter")
                .expect("metric can be created");
        let resolver_queries = IntCounterVec::new(
            Opts::new("zns_resolver_queries_total", "Queries dispatched per upstream resolver"),
            &["resolver"],
        )
        .expect("metric can be created");
        let error_kinds = IntCounterVec::new(
            Opts::new("zns_errors_total", "Errors by wire-level code"),
            &["code"],
        )
        .expect("metric can be created");
        let tld_queries = IntCounterVec::new(
            Opts::new("zns_tld_queries_total", "Queries per top-level domain"),
            &["tld"],
        )
        .expect("metric can be created");
        let memory_bytes = IntGauge::new("zns_memory_bytes", "Resident memory of the process")
            .expect("metric can be created");
        let cpu_percent_x100 = IntGauge::new(
            "zns_cpu_percent_x100",
            "Process CPU usage, percent times 100",
        )
        .expect("metric can be created");
        let open_connections = IntGauge::new("zns_open_connections", "Open transport connections")
            .expect("metric can be created");
        let active_subscriptions =
            IntGauge::new("zns_active_subscriptions", "Active subscriptions")
                .expect("metric can be created");
        let uptime_seconds = IntGauge::new("zns_uptime_seconds", "Process uptime in seconds")
            .expect("metric can be created");

        for collector in [
            Box::new(queries_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(queries_success.clone()),
            Box::new(queries_failed.clone()),
            Box::new(cache_hits.clone()),
            Box::new(cache_misses.clone()),
            Box::new(rate_limited.clone()),
            Box::new(resolver_queries.clone()),
            Box::new(error_kinds.clone()),
            Box::new(tld_queries.clone()),
            Box::new(memory_bytes.clone()),
            Box::new(cpu_percent_x100.clone()),
            Box::new(open_connections.clone()),
            Box::new(active_subscriptions.clone()),
            Box::new(uptime_seconds.clone()),
        ] {
            registry
                .register(collector)
                .expect("metric can be registered");
        }

        Self {
            registry,
            queries_total,
            queries_success,
            queries_failed,
            cache_hits,
            cache_misses,
            rate_limited,
            resolver_queries,
            error_kinds,
            tld_queries,
            memory_bytes,
            cpu_percent_x100,
            open_connections,
            active_subscriptions,
            uptime_seconds,
            windows: Mutex::new(Windows {
                latency_ms: Window::new(WIDE_WINDOW),
                hit: Window::new(WIDE_WINDOW),
                error: Window::new(WIDE_WINDOW),
                qps: Window::new(QPS_WINDOW),
                queries_at_last_sample: 0,
                last_sample: Instant::now(),
            }),
            system: Mutex::new(System::new()),
            memory_limit_bytes,
            started_at: Instant::now(),
        }
    }

    // --- recording ---

    pub fn record_query(&self) {
        self.queries_total.inc();
    }

    pub fn record_rate_limited(&self) {
        self.rate_limited.inc();
        self.error_kinds
            .with_label_values(&[ZnsErrorCode::RateLimited.as_str()])
            .inc();
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.inc();
        self.lock_windows().hit.push(1.0);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.inc();
        self.lock_windows().hit.push(0.0);
    }

    pub fn record_resolver_query(&self, resolver: &str) {
        self.resolver_queries.with_label_values(&[resolver]).inc();
    }

    pub fn record_tld(&self, tld: &str) {
        self.tld_queries.with_label_values(&[tld]).inc();
    }

    pub fn record_success(&self, latency_ms: f64) {
        self.queries_success.inc();
        let mut windows = self.lock_windows();
        windows.latency_ms.push(latency_ms);
        windows.error.push(0.0);
    }

    pub fn record_failure(&self, code: ZnsErrorCode, latency_ms: f64) {
        self.queries_failed.inc();
        self.error_kinds.with_label_values(&[code.as_str()]).inc();
        let mut windows = self.lock_windows();
        windows.latency_ms.push(latency_ms);
        windows.error.push(1.0);
    }

    // --- gauges ---

    pub fn set_open_connections(&self, count: i64) {
        self.open_connections.set(count);
    }

    pub fn set_active_subscriptions(&self, count: i64) {
        self.active_subscriptions.set(count);
    }

    /// Refresh process memory and CPU gauges and push a QPS sample. Called
    /// from the periodic task.
    pub fn update_resource_usage(&self) {
        let mut system = self
            .system
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Ok(pid) = sysinfo::get_current_pid() {
            system.refresh_process(pid);
            if let Some(process) = system.process(pid) {
                self.memory_bytes.set(process.memory() as i64);
                self.cpu_percent_x100
                    .set((process.cpu_usage() as f64 * 100.0) as i64);
            }
        }
        drop(system);

        self.uptime_seconds
            .set(self.started_at.elapsed().as_secs() as i64);

        let total = self.queries_total.get();
        let mut windows = self.lock_windows();
        let elapsed = windows.last_sample.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            let delta = total.saturating_sub(windows.queries_at_last_sample);
            let qps = delta as f64 / elapsed;
            windows.qps.push(qps);
        }
        windows.queries_at_last_sample = total;
        windows.last_sample = Instant::now();
    }

    // --- reading ---

    pub fn snapshot(&self) -> MetricsSnapshot {
        let windows = self.lock_windows();
        MetricsSnapshot {
            total_queries: self.queries_total.get(),
            successful_queries: self.queries_success.get(),
            failed_queries: self.queries_failed.get(),
            cache_hits: self.cache_hits.get(),
            cache_misses: self.cache_misses.get(),
            rate_limited: self.rate_limited.get(),
            qps: windows.qps.average(),
            avg_resolution_ms: windows.latency_ms.average(),
            cache_hit_rate: windows.hit.average(),
            error_rate: windows.error.average(),
            memory_bytes: self.memory_bytes.get() as u64,
            memory_limit_bytes: self.memory_limit_bytes,
            cpu_percent: self.cpu_percent_x100.get() as f64 / 100.0,
            open_connections: self.open_connections.get(),
            active_subscriptions: self.active_subscriptions.get(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            per_resolver: self.labelled_counts("zns_resolver_queries_total", "resolver"),
            per_error: self.labelled_counts("zns_errors_total", "code"),
            per_tld: self.labelled_counts("zns_tld_queries_total", "tld"),
        }
    }

    /// Health per the service contract: memory pressure trumps everything,
    /// then error rate / CPU / latency degrade the service.
    pub fn health(&self) -> HealthStatus {
        let snapshot = self.snapshot();
        Self::health_for(&snapshot)
    }

    pub fn health_for(snapshot: &MetricsSnapshot) -> HealthStatus {
        if snapshot.memory_limit_bytes > 0
            && snapshot.memory_bytes as f64
                > snapshot.memory_limit_bytes as f64 * MEMORY_UNHEALTHY_FRACTION
        {
            return HealthStatus::Unhealthy;
        }
        if snapshot.error_rate > ERROR_RATE_DEGRADED
            || snapshot.cpu_percent > CPU_DEGRADED_PERCENT
            || snapshot.avg_resolution_ms > RESPONSE_TIME_DEGRADED_MS
        {
            return HealthStatus::Degraded;
        }
        HealthStatus::Healthy
    }

    /// Prometheus text exposition of all registered metrics.
    pub fn prometheus_text(&self) -> String {
        self.uptime_seconds
            .set(self.started_at.elapsed().as_secs() as i64);
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        if encoder.encode(&families, &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }

    // --- internals ---

    fn lock_windows(&self) -> std::sync::MutexGuard<'_, Windows> {
        self.windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn labelled_counts(&self, family: &str, label: &str) -> HashMap<String, u64> {
        let mut out = HashMap::new();
        for mf in self.registry.gather() {
            if mf.get_name() != family {
                continue;
            }
            for metric in mf.get_metric() {
                let key = metric
                    .get_label()
                    .iter()
                    .find(|l| l.get_name() == label)
                    .map(|l| l.get_value().to_string())
                    .unwrap_or_default();
                out.insert(key, metric.get_counter().get_value() as u64);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_feed_snapshot() {
        let metrics = ZnsMetrics::new(1024 * 1024 * 1024);
        metrics.record_query();
        metrics.record_query();
        metrics.record_success(12.0);
        metrics.record_failure(ZnsErrorCode::DomainNotFound, 30.0);
        metrics.record_cache_hit();
        metrics.record_cache_miss();
        metrics.record_resolver_query("native");
        metrics.record_tld("ghost");

        let snap = metrics.snapshot();
        assert_eq!(snap.total_queries, 2);
        assert_eq!(snap.successful_queries, 1);
        assert_eq!(snap.failed_queries, 1);
        assert_eq!(snap.cache_hits, 1);
        assert_eq!(snap.cache_misses, 1);
        assert_eq!(snap.per_resolver.get("native"), Some(&1));
        assert_eq!(snap.per_error.get("DOMAIN_NOT_FOUND"), Some(&1));
        assert_eq!(snap.per_tld.get("ghost"), Some(&1));
        assert!((snap.avg_resolution_ms - 21.0).abs() < f64::EPSILON);
        assert!((snap.error_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn window_rolls_over() {
        let mut window = Window::new(3);
        for v in [1.0, 2.0, 3.0, 4.0] {
            window.push(v);
        }
        // Oldest sample (1.0) dropped
        assert!((window.average() - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn health_thresholds() {
        let metrics = ZnsMetrics::new(1000);
        let mut snap = metrics.snapshot();
        assert_eq!(ZnsMetrics::health_for(&snap), HealthStatus::Healthy);

        snap.error_rate = 0.2;
        assert_eq!(ZnsMetrics::health_for(&snap), HealthStatus::Degraded);

        snap.error_rate = 0.0;
        snap.cpu_percent = 95.0;
        assert_eq!(ZnsMetrics::health_for(&snap), HealthStatus::Degraded);

        snap.cpu_percent = 0.0;
        snap.avg_resolution_ms = 9_000.0;
        assert_eq!(ZnsMetrics::health_for(&snap), HealthStatus::Degraded);

        // Memory pressure dominates
        snap.memory_bytes = 950;
        snap.memory_limit_bytes = 1000;
        assert_eq!(ZnsMetrics::health_for(&snap), HealthStatus::Unhealthy);
    }

    #[test]
    fn prometheus_export_has_help_and_type() {
        let metrics = ZnsMetrics::new(0);
        metrics.record_query();
        let text = metrics.prometheus_text();
        assert!(text.contains("# HELP zns_queries_total"));
        assert!(text.contains("# TYPE zns_queries_total counter"));
        assert!(text.contains("zns_queries_total 1"));
    }

    #[test]
    fn rate_limited_feeds_error_counter() {
        let metrics = ZnsMetrics::new(0);
        metrics.record_rate_limited();
        let snap = metrics.snapshot();
        assert_eq!(snap.rate_limited, 1);
        assert_eq!(snap.per_error.get("RATE_LIMITED"), Some(&1));
    }
}
