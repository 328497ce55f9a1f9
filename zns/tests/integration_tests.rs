//! Integration tests for the ZNS subsystem
//!
//! Tests verify the full resolution workflow across the facade:
//! - Ordered fan-out over multiple upstream resolvers
//! - Cache fill and attribution on repeat queries
//! - Rate-limit window reset through the periodic task
//! - Subscription fan-out end to end
//! - TTL clamping at the cache boundary

use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use zns::alerts::AlertManager;
use zns::cache::CacheConfig;
use zns::metrics::ZnsMetrics;
use zns::resolver::{RegistrarBackend, ResolverSet, UpstreamResolver};
use zns::resolver_core::{ResolverConfig, ResolverCore};
use zns::service::ServiceConfig;
use zns::types::{
    ChangeEventType, DnsRecord, RecordType, RegisterRequest, RegisterResponse, ResolutionSource,
    ResolveRequest, ResolveResponse, SubscriptionRequest, UpdateRequest, UpdateResponse, ZnsError,
    ZnsErrorCode,
};
use zns::ZnsService;

// ============================================================================
// Test doubles
// ============================================================================

/// Upstream that answers only the domains it is seeded with.
struct SeededResolver {
    name: &'static str,
    source: ResolutionSource,
    answers: Vec<(String, Vec<DnsRecord>)>,
    calls: AtomicUsize,
}

impl SeededResolver {
    fn new(
        name: &'static str,
        source: ResolutionSource,
        answers: Vec<(String, Vec<DnsRecord>)>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            source,
            answers,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpstreamResolver for SeededResolver {
    fn name(&self) -> &'static str {
        self.name
    }
    fn source(&self) -> ResolutionSource {
        self.source
    }
    async fn resolve(&self, domain: &str, _: &[RecordType]) -> Option<ResolveResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answers
            .iter()
            .find(|(d, _)| d == domain)
            .map(|(_, records)| ResolveResponse::ok(domain, records.clone(), self.source))
    }
}

struct OkRegistrar;

#[async_trait]
impl RegistrarBackend for OkRegistrar {
    async fn register(&self, req: &RegisterRequest) -> Result<RegisterResponse, ZnsError> {
        Ok(RegisterResponse {
            domain: req.domain.clone(),
            transaction_hash: "0xabc123".to_string(),
            registered_at: Utc::now(),
            expiry: None,
            error: None,
        })
    }
    async fn update(&self, req: &UpdateRequest) -> Result<UpdateResponse, ZnsError> {
        Ok(UpdateResponse {
            domain: req.domain.clone(),
            transaction_hash: "0xdef456".to_string(),
            updated_at: Utc::now(),
            error: None,
        })
    }
}

fn a_record(domain: &str, ip: &str, ttl: u32) -> DnsRecord {
    DnsRecord::new(RecordType::A, domain, ip, ttl)
}

struct Harness {
    service: ZnsService,
    native: Arc<SeededResolver>,
    dns: Arc<SeededResolver>,
}

fn harness(rate_limit: u32, cache: CacheConfig) -> Harness {
    let native = SeededResolver::new(
        "native",
        ResolutionSource::ZnsNative,
        vec![("alice.ghost".to_string(), vec![a_record("alice.ghost", "10.0.0.1", 600)])],
    );
    let dns = SeededResolver::new(
        "dns_fallback",
        ResolutionSource::TraditionalDns,
        vec![("lab.web3".to_string(), vec![a_record("lab.web3", "203.0.113.9", 120)])],
    );
    let metrics = Arc::new(ZnsMetrics::new(0));
    let set = ResolverSet {
        native: native.clone(),
        registrar: Arc::new(OkRegistrar),
        ens: None,
        ud: None,
        dns_fallback: Some(dns.clone()),
    };
    let core = ResolverCore::new(
        ResolverConfig {
            enable_cache: true,
            verify_signatures: false,
            max_resolution_time: Duration::from_secs(2),
            rate_limit_per_window: rate_limit,
        },
        cache,
        set,
        metrics.clone(),
    );
    let alerts = AlertManager::new(AlertManager::default_rules(), reqwest::Client::new());
    Harness {
        service: ZnsService::new(ServiceConfig::default(), core, metrics, alerts),
        native,
        dns,
    }
}

// ============================================================================
// Resolution workflow
// ============================================================================

#[tokio::test]
async fn native_miss_falls_through_to_dns() {
    let h = harness(100, CacheConfig::default());

    // lab.web3 is experimental: native declines, fallback answers
    let response = h
        .service
        .resolve(&ResolveRequest::new("lab.web3"), "c1")
        .await;
    assert!(response.is_success());
    assert_eq!(
        response.resolution_info.source,
        ResolutionSource::TraditionalDns
    );
    assert_eq!(
        response.resolution_info.resolver_chain,
        vec!["native", "dns_fallback"]
    );
    assert_eq!(h.native.calls(), 1);
    assert_eq!(h.dns.calls(), 1);
}

#[tokio::test]
async fn second_query_is_served_from_cache() {
    let h = harness(100, CacheConfig::default());
    let request = ResolveRequest::new("alice.ghost");

    let first = h.service.resolve(&request, "c1").await;
    assert_eq!(first.resolution_info.source, ResolutionSource::ZnsNative);

    let second = h.service.resolve(&request, "c1").await;
    assert!(second.resolution_info.was_cached);
    assert_eq!(second.resolution_info.source, ResolutionSource::Cache);
    assert_eq!(second.records, first.records);
    assert_eq!(h.native.calls(), 1);

    let snapshot = h.service.metrics_report();
    assert_eq!(snapshot.cache_hits, 1);
    assert_eq!(snapshot.cache_misses, 1);
}

#[tokio::test]
async fn unknown_domain_reports_full_chain() {
    let h = harness(100, CacheConfig::default());
    let response = h
        .service
        .resolve(&ResolveRequest::new("missing.web3"), "c1")
        .await;
    let error = response.error.unwrap();
    assert_eq!(error.code, ZnsErrorCode::DomainNotFound);
    assert_eq!(error.resolution_chain, vec!["native", "dns_fallback"]);
}

// ============================================================================
// Rate limiting through the periodic task
// ============================================================================

#[tokio::test]
async fn rate_window_blocks_then_recovers_after_reset() {
    let h = harness(2, CacheConfig::default());
    let request = ResolveRequest {
        use_cache: false,
        ..ResolveRequest::new("alice.ghost")
    };

    assert!(h.service.resolve(&request, "c1").await.is_success());
    assert!(h.service.resolve(&request, "c1").await.is_success());
    let limited = h.service.resolve(&request, "c1").await;
    assert_eq!(limited.error.unwrap().code, ZnsErrorCode::RateLimited);

    // Another client is unaffected
    assert!(h.service.resolve(&request, "c2").await.is_success());

    // The periodic task resets windows only once the window has aged; a
    // fresh window stays closed
    h.service.run_periodic_tasks().await;
    let still_limited = h.service.resolve(&request, "c1").await;
    assert_eq!(still_limited.error.unwrap().code, ZnsErrorCode::RateLimited);
}

// ============================================================================
// TTL clamping
// ============================================================================

#[tokio::test]
async fn short_record_ttl_is_clamped_to_minimum() {
    // Upstream answers with a 1-second record TTL; min_ttl is 60 s, so the
    // cached entry must still be alive after the raw TTL would have expired
    let native = SeededResolver::new(
        "native",
        ResolutionSource::ZnsNative,
        vec![("flash.ghost".to_string(), vec![a_record("flash.ghost", "10.0.0.2", 1)])],
    );
    let metrics = Arc::new(ZnsMetrics::new(0));
    let set = ResolverSet {
        native,
        registrar: Arc::new(OkRegistrar),
        ens: None,
        ud: None,
        dns_fallback: None,
    };
    let core = ResolverCore::new(
        ResolverConfig {
            enable_cache: true,
            verify_signatures: false,
            max_resolution_time: Duration::from_secs(2),
            rate_limit_per_window: 100,
        },
        CacheConfig {
            min_ttl_secs: 60,
            ..CacheConfig::default()
        },
        set,
        metrics.clone(),
    );
    let service = ZnsService::new(
        ServiceConfig::default(),
        core,
        metrics,
        AlertManager::new(vec![], reqwest::Client::new()),
    );

    let request = ResolveRequest::new("flash.ghost");
    service.resolve(&request, "c1").await;
    tokio::time::sleep(Duration::from_millis(1_100)).await;

    let second = service.resolve(&request, "c1").await;
    assert!(second.resolution_info.was_cached);
}

// ============================================================================
// Subscriptions end to end
// ============================================================================

#[tokio::test]
async fn register_update_fan_out_to_subscribers() {
    let h = harness(100, CacheConfig::default());

    let specific = h
        .service
        .create_domain_subscription(
            &SubscriptionRequest {
                domains: vec!["alice.ghost".to_string()],
                record_types: vec![],
                include_metadata: false,
            },
            "watcher-1",
        )
        .unwrap();
    let wildcard = h
        .service
        .create_domain_subscription(
            &SubscriptionRequest {
                domains: vec![],
                record_types: vec![],
                include_metadata: false,
            },
            "watcher-2",
        )
        .unwrap();

    let register = RegisterRequest {
        domain: "alice.ghost".to_string(),
        owner: "00".repeat(32),
        records: vec![a_record("alice.ghost", "10.0.0.1", 600)],
        metadata: None,
        last_updated: Utc::now(),
        signature: String::new(),
    };
    assert!(h.service.register(&register, "c1").await.error.is_none());

    let update = UpdateRequest {
        domain: "alice.ghost".to_string(),
        records: vec![a_record("alice.ghost", "10.0.0.9", 600)],
        last_updated: Utc::now(),
        signature: String::new(),
    };
    assert!(h.service.update(&update, "c1").await.error.is_none());

    let specific_events = h.service.get_subscription_events(&specific, 10);
    assert_eq!(specific_events.len(), 2);
    assert_eq!(specific_events[0].event_type, ChangeEventType::Registered);
    assert_eq!(specific_events[1].event_type, ChangeEventType::Updated);

    let wildcard_events = h.service.get_subscription_events(&wildcard, 10);
    assert_eq!(wildcard_events.len(), 2);

    // Queues drain exactly once
    assert!(h.service.get_subscription_events(&specific, 10).is_empty());
}

#[tokio::test]
async fn update_invalidates_cached_entry() {
    let h = harness(100, CacheConfig::default());
    let request = ResolveRequest::new("alice.ghost");

    h.service.resolve(&request, "c1").await;
    assert_eq!(h.service.status().cache.entries, 1);

    let update = UpdateRequest {
        domain: "alice.ghost".to_string(),
        records: vec![a_record("alice.ghost", "10.0.0.9", 600)],
        last_updated: Utc::now(),
        signature: String::new(),
    };
    h.service.update(&update, "c1").await;
    assert_eq!(h.service.status().cache.entries, 0);

    // Next resolve consults the upstream again
    let fresh = h.service.resolve(&request, "c1").await;
    assert!(!fresh.resolution_info.was_cached);
    assert_eq!(h.native.calls(), 2);
}
