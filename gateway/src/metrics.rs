//! Prometheus metrics for the GhostBridge gateway
//!
//! Transport- and dispatch-level counters. The ZNS subsystem carries its own
//! collector; both surfaces are concatenated by the metrics endpoint.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("gateway_requests_total", "Requests dispatched, by channel and status"),
        &["channel", "status"]
    ).expect("metric can be created");

    pub static ref REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "gateway_request_duration_seconds",
            "Dispatch latency in seconds"
        ).buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]),
        &["channel"]
    ).expect("metric can be created");

    pub static ref OPEN_CONNECTIONS: IntGaugeVec = IntGaugeVec::new(
        Opts::new("gateway_open_connections", "Open connections per transport"),
        &["transport"]
    ).expect("metric can be created");

    pub static ref CONNECTIONS_REFUSED_TOTAL: IntCounter = IntCounter::new(
        "gateway_connections_refused_total",
        "Connections refused at the connection cap"
    ).expect("metric can be created");

    pub static ref RESPONSE_CACHE_HITS_TOTAL: IntCounter = IntCounter::new(
        "gateway_response_cache_hits_total",
        "Backend responses served from the response cache"
    ).expect("metric can be created");

    pub static ref RESPONSE_CACHE_MISSES_TOTAL: IntCounter = IntCounter::new(
        "gateway_response_cache_misses_total",
        "Backend requests that missed the response cache"
    ).expect("metric can be created");

    pub static ref DISPATCH_TIMEOUTS_TOTAL: IntCounter = IntCounter::new(
        "gateway_dispatch_timeouts_total",
        "Dispatches abandoned at the per-request deadline"
    ).expect("metric can be created");

    pub static ref DISPATCH_PANICS_TOTAL: IntCounter = IntCounter::new(
        "gateway_dispatch_panics_total",
        "Handler panics converted into internal errors"
    ).expect("metric can be created");
}

/// Register all gateway metrics. Call once at startup.
pub fn register_metrics() {
    REGISTRY
        .register(Box::new(REQUESTS_TOTAL.clone()))
        .expect("metric can be registered");
    REGISTRY
        .register(Box::new(REQUEST_DURATION_SECONDS.clone()))
        .expect("metric can be registered");
    REGISTRY
        .register(Box::new(OPEN_CONNECTIONS.clone()))
        .expect("metric can be registered");
    REGISTRY
        .register(Box::new(CONNECTIONS_REFUSED_TOTAL.clone()))
        .expect("metric can be registered");
    REGISTRY
        .register(Box::new(RESPONSE_CACHE_HITS_TOTAL.clone()))
        .expect("metric can be registered");
    REGISTRY
        .register(Box::new(RESPONSE_CACHE_MISSES_TOTAL.clone()))
        .expect("metric can be registered");
    REGISTRY
        .register(Box::new(DISPATCH_TIMEOUTS_TOTAL.clone()))
        .expect("metric can be registered");
    REGISTRY
        .register(Box::new(DISPATCH_PANICS_TOTAL.clone()))
        .expect("metric can be registered");
}

/// Encode gateway metrics in Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if encoder.encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

pub fn record_request(channel: &str, status: u16, duration_secs: f64) {
    REQUESTS_TOTAL
        .with_label_values(&[channel, &status.to_string()])
        .inc();
    REQUEST_DURATION_SECONDS
        .with_label_values(&[channel])
        .observe(duration_secs);
}

pub fn set_open_connections(transport: &str, count: i64) {
    OPEN_CONNECTIONS.with_label_values(&[transport]).set(count);
}

pub fn record_connection_refused() {
    CONNECTIONS_REFUSED_TOTAL.inc();
}

pub fn record_response_cache_hit() {
    RESPONSE_CACHE_HITS_TOTAL.inc();
}

pub fn record_response_cache_miss() {
    RESPONSE_CACHE_MISSES_TOTAL.inc();
}

pub fn record_dispatch_timeout() {
    DISPATCH_TIMEOUTS_TOTAL.inc();
}

pub fn record_dispatch_panic() {
    DISPATCH_PANICS_TOTAL.inc();
}
