//! ZNS service facade
//!
//! The public surface of the resolution subsystem. Owns the resolver core,
//! both subscription managers, the metrics collector, and the alert manager;
//! the gateway dispatcher talks only to this type.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::alerts::AlertManager;
use crate::cache::CacheStatistics;
use crate::metrics::{HealthStatus, MetricsSnapshot, ZnsMetrics};
use crate::resolver_core::ResolverCore;
use crate::subscription::{CacheSubscriptionManager, DomainSubscriptionManager};
use crate::types::{
    CacheEvent, CacheEventKind, ChangeEvent, ChangeEventType, RegisterRequest, RegisterResponse,
    ResolveRequest, ResolveResponse, SubscriptionRequest, UpdateRequest, UpdateResponse, ZnsError,
    ZnsErrorCode,
};

/// Fixed rate-limit window length.
const RATE_WINDOW_SECS: u64 = 60;

/// Feature toggles for the service facade.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub enable_subscriptions: bool,
    pub enable_cache_events: bool,
    pub enable_metrics: bool,
    pub enable_alerts: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            enable_subscriptions: true,
            enable_cache_events: true,
            enable_metrics: true,
            enable_alerts: true,
        }
    }
}

/// Service status surface returned by `/zns/status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub health: HealthStatus,
    pub uptime_secs: u64,
    pub cache: CacheStatistics,
    pub domain_subscriptions: usize,
    pub cache_subscriptions: usize,
    pub active_alerts: Vec<String>,
    pub version: &'static str,
}

/// The ZNS service. One instance per process.
pub struct ZnsService {
    config: ServiceConfig,
    resolver: ResolverCore,
    domain_subs: DomainSubscriptionManager,
    cache_subs: CacheSubscriptionManager,
    metrics: Arc<ZnsMetrics>,
    alerts: AlertManager,
}

impl ZnsService {
    pub fn new(
        config: ServiceConfig,
        resolver: ResolverCore,
        metrics: Arc<ZnsMetrics>,
        alerts: AlertManager,
    ) -> Self {
        Self {
            config,
            resolver,
            domain_subs: DomainSubscriptionManager::new(),
            cache_subs: CacheSubscriptionManager::new(),
            metrics,
            alerts,
        }
    }

    // --- resolution ---

    /// Resolve a domain. Cache events are published after the response is
    /// built, so subscribers may observe them slightly after the client
    /// receives the reply.
    pub async fn resolve(&self, request: &ResolveRequest, client_id: &str) -> ResolveResponse {
        let response = self.resolver.resolve(request, client_id).await;

        if self.config.enable_cache_events {
            let kind = if response.resolution_info.was_cached {
                CacheEventKind::Hit
            } else {
                CacheEventKind::Miss
            };
            if self.cache_subs.wants(kind) {
                self.cache_subs
                    .publish(&CacheEvent::new(kind, Some(&request.domain)));
            }
        }

        response
    }

    /// Register a domain; emits a `Registered` change event on success.
    pub async fn register(&self, request: &RegisterRequest, client_id: &str) -> RegisterResponse {
        match self.resolver.register_domain(request, client_id).await {
            Ok(response) => {
                self.publish_change(ChangeEvent {
                    domain: request.domain.clone(),
                    event_type: ChangeEventType::Registered,
                    old_records: Vec::new(),
                    new_records: request.records.clone(),
                    timestamp: Utc::now(),
                    transaction_hash: Some(response.transaction_hash.clone()),
                });
                response
            }
            Err(error) => RegisterResponse {
                domain: request.domain.clone(),
                transaction_hash: String::new(),
                registered_at: Utc::now(),
                expiry: None,
                error: Some(error),
            },
        }
    }

    /// Update a domain's records; emits an `Updated` change event on success.
    pub async fn update(&self, request: &UpdateRequest, client_id: &str) -> UpdateResponse {
        match self.resolver.update_domain(request, client_id).await {
            Ok(response) => {
                self.publish_change(ChangeEvent {
                    domain: request.domain.clone(),
                    event_type: ChangeEventType::Updated,
                    old_records: Vec::new(),
                    new_records: request.records.clone(),
                    timestamp: Utc::now(),
                    transaction_hash: Some(response.transaction_hash.clone()),
                });
                response
            }
            Err(error) => UpdateResponse {
                domain: request.domain.clone(),
                transaction_hash: String::new(),
                updated_at: Utc::now(),
                error: Some(error),
            },
        }
    }

    /// Publish a change event to domain subscribers. Publish failures never
    /// affect the originating request.
    pub fn publish_change(&self, event: ChangeEvent) {
        if !self.config.enable_subscriptions {
            return;
        }
        self.domain_subs.publish_change(&event);
    }

    // --- subscriptions ---

    pub fn create_domain_subscription(
        &self,
        request: &SubscriptionRequest,
        client_id: &str,
    ) -> Result<String, ZnsError> {
        if !self.config.enable_subscriptions {
            return Err(ZnsError::new(
                ZnsErrorCode::PermissionDenied,
                "subscriptions are disabled",
            ));
        }
        Ok(self.domain_subs.create(request, client_id))
    }

    pub fn create_cache_subscription(
        &self,
        hits: bool,
        misses: bool,
        evictions: bool,
        client_id: &str,
    ) -> Result<String, ZnsError> {
        if !self.config.enable_cache_events {
            return Err(ZnsError::new(
                ZnsErrorCode::PermissionDenied,
                "cache events are disabled",
            ));
        }
        Ok(self.cache_subs.create(hits, misses, evictions, client_id))
    }

    /// Cancel a subscription of either kind.
    pub fn cancel_subscription(&self, id: &str) -> bool {
        self.domain_subs.cancel(id) || self.cache_subs.cancel(id)
    }

    pub fn get_subscription_events(&self, id: &str, max: usize) -> Vec<ChangeEvent> {
        self.domain_subs.get_events(id, max)
    }

    pub fn get_cache_events(&self, id: &str, max: usize) -> Vec<CacheEvent> {
        self.cache_subs.get_events(id, max)
    }

    // --- cache management ---

    /// Clear the domain cache and broadcast a flush event.
    pub fn flush_cache(&self) {
        self.resolver.flush_cache();
        if self.config.enable_cache_events {
            self.cache_subs
                .publish(&CacheEvent::new(CacheEventKind::Flush, None));
        }
        info!("domain cache flushed");
    }

    pub fn invalidate(&self, domain: &str) -> bool {
        self.resolver.invalidate(domain)
    }

    // --- observability ---

    pub fn status(&self) -> StatusReport {
        StatusReport {
            health: self.metrics.health(),
            uptime_secs: self.metrics.snapshot().uptime_secs,
            cache: self.resolver.cache_stats(),
            domain_subscriptions: self.domain_subs.count(),
            cache_subscriptions: self.cache_subs.count(),
            active_alerts: self.alerts.active_alerts(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    pub fn metrics_report(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn prometheus(&self) -> String {
        self.metrics.prometheus_text()
    }

    pub fn health(&self) -> HealthStatus {
        self.metrics.health()
    }

    // --- background work ---

    /// One pass of the periodic maintenance work: expired-entry cleanup,
    /// rate-window reset, resource sampling, and alert evaluation. Safe to
    /// call concurrently with request processing; every step is idempotent.
    pub async fn run_periodic_tasks(&self) {
        let dropped = self.resolver.cleanup_expired();
        if dropped > 0 {
            debug!(dropped, "periodic cache cleanup");
            if self.config.enable_cache_events && self.cache_subs.wants(CacheEventKind::Eviction)
            {
                self.cache_subs
                    .publish(&CacheEvent::new(CacheEventKind::Eviction, None));
            }
        }

        if self.resolver.rate_window_age_secs() >= RATE_WINDOW_SECS {
            self.resolver.reset_rate_windows();
        }

        if self.config.enable_metrics {
            self.metrics.update_resource_usage();
            self.metrics.set_active_subscriptions(
                (self.domain_subs.count() + self.cache_subs.count()) as i64,
            );
        }

        if self.config.enable_alerts {
            let snapshot = self.metrics.snapshot();
            self.alerts.evaluate(&snapshot).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::resolver::{RegistrarBackend, ResolverSet, UpstreamResolver};
    use crate::resolver_core::ResolverConfig;
    use crate::types::{DnsRecord, RecordType, ResolutionSource};
    use async_trait::async_trait;

    struct StubNative;

    #[async_trait]
    impl UpstreamResolver for StubNative {
        fn name(&self) -> &'static str {
            "native"
        }
        fn source(&self) -> ResolutionSource {
            ResolutionSource::ZnsNative
        }
        async fn resolve(&self, domain: &str, _: &[RecordType]) -> Option<ResolveResponse> {
            Some(ResolveResponse::ok(
                domain,
                vec![DnsRecord::new(RecordType::A, domain, "10.0.0.1", 600)],
                ResolutionSource::ZnsNative,
            ))
        }
    }

    #[async_trait]
    impl RegistrarBackend for StubNative {
        async fn register(&self, req: &RegisterRequest) -> Result<RegisterResponse, ZnsError> {
            Ok(RegisterResponse {
                domain: req.domain.clone(),
                transaction_hash: "0xreg".to_string(),
                registered_at: Utc::now(),
                expiry: None,
                error: None,
            })
        }
        async fn update(&self, req: &UpdateRequest) -> Result<UpdateResponse, ZnsError> {
            Ok(UpdateResponse {
                domain: req.domain.clone(),
                transaction_hash: "0xupd".to_string(),
                updated_at: Utc::now(),
                error: None,
            })
        }
    }

    fn service() -> ZnsService {
        let metrics = Arc::new(ZnsMetrics::new(0));
        let native = Arc::new(StubNative);
        let set = ResolverSet {
            native: native.clone(),
            registrar: native,
            ens: None,
            ud: None,
            dns_fallback: None,
        };
        let core = ResolverCore::new(
            ResolverConfig {
                verify_signatures: false,
                ..ResolverConfig::default()
            },
            CacheConfig::default(),
            set,
            metrics.clone(),
        );
        let alerts = AlertManager::new(AlertManager::default_rules(), reqwest::Client::new());
        ZnsService::new(ServiceConfig::default(), core, metrics, alerts)
    }

    #[tokio::test]
    async fn register_emits_change_event() {
        let service = service();
        let sub = service
            .create_domain_subscription(
                &SubscriptionRequest {
                    domains: vec![],
                    record_types: vec![],
                    include_metadata: false,
                },
                "watcher",
            )
            .unwrap();

        let response = service
            .register(
                &RegisterRequest {
                    domain: "alice.ghost".to_string(),
                    owner: "00".repeat(32),
                    records: vec![DnsRecord::new(RecordType::A, "alice.ghost", "10.0.0.1", 600)],
                    metadata: None,
                    last_updated: Utc::now(),
                    signature: String::new(),
                },
                "c1",
            )
            .await;
        assert!(response.error.is_none());

        let events = service.get_subscription_events(&sub, 10);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, ChangeEventType::Registered);
        assert_eq!(events[0].transaction_hash.as_deref(), Some("0xreg"));
    }

    #[tokio::test]
    async fn register_failure_returns_envelope() {
        let service = service();
        let response = service
            .register(
                &RegisterRequest {
                    domain: "vitalik.eth".to_string(),
                    owner: String::new(),
                    records: vec![],
                    metadata: None,
                    last_updated: Utc::now(),
                    signature: String::new(),
                },
                "c1",
            )
            .await;
        assert_eq!(
            response.error.unwrap().code,
            ZnsErrorCode::PermissionDenied
        );
    }

    #[tokio::test]
    async fn cache_events_hit_and_miss() {
        let service = service();
        let sub = service
            .create_cache_subscription(true, true, false, "c1")
            .unwrap();

        let request = ResolveRequest::new("alice.ghost");
        service.resolve(&request, "c1").await; // miss
        service.resolve(&request, "c1").await; // hit

        let events = service.get_cache_events(&sub, 10);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, CacheEventKind::Miss);
        assert_eq!(events[1].kind, CacheEventKind::Hit);
    }

    #[tokio::test]
    async fn flush_clears_and_broadcasts() {
        let service = service();
        let sub = service
            .create_cache_subscription(false, false, false, "c1")
            .unwrap();

        service.resolve(&ResolveRequest::new("alice.ghost"), "c1").await;
        assert_eq!(service.status().cache.entries, 1);

        service.flush_cache();
        assert_eq!(service.status().cache.entries, 0);

        let events = service.get_cache_events(&sub, 10);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, CacheEventKind::Flush);
    }

    #[tokio::test]
    async fn cancel_subscription_of_either_kind() {
        let service = service();
        let d = service
            .create_domain_subscription(
                &SubscriptionRequest {
                    domains: vec!["alice.ghost".to_string()],
                    record_types: vec![],
                    include_metadata: false,
                },
                "c1",
            )
            .unwrap();
        let c = service
            .create_cache_subscription(true, false, false, "c1")
            .unwrap();
        assert!(service.cancel_subscription(&d));
        assert!(service.cancel_subscription(&c));
        assert!(!service.cancel_subscription(&d));
    }

    #[tokio::test]
    async fn status_reflects_state() {
        let service = service();
        service.resolve(&ResolveRequest::new("alice.ghost"), "c1").await;
        let status = service.status();
        assert_eq!(status.cache.entries, 1);
        assert_eq!(status.health, HealthStatus::Healthy);
        assert!(status.active_alerts.is_empty());
    }

    #[tokio::test]
    async fn periodic_tasks_run_cleanly() {
        let service = service();
        service.resolve(&ResolveRequest::new("alice.ghost"), "c1").await;
        service.run_periodic_tasks().await;
        // Nothing expired, nothing limited; state unchanged
        assert_eq!(service.status().cache.entries, 1);
    }
}
