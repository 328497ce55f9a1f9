//! Resolution engine
//!
//! Routes queries by domain category through the ordered resolver chain,
//! integrates the domain cache, enforces the per-client rate limit, and
//! records per-query metrics. Owns the cache, validator state, rate limiter,
//! and upstream adapters.

use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::cache::{CacheConfig, CacheStatistics, DomainCache};
use crate::metrics::ZnsMetrics;
use crate::resolver::ResolverSet;
use crate::types::{
    DomainCategory, DomainData, RegisterRequest, RegisterResponse, ResolutionSource,
    ResolveRequest, ResolveResponse, UpdateRequest, UpdateResponse, ZnsError, ZnsErrorCode,
};
use crate::validator::{
    self, domain_category, is_valid_domain, validate_record, RateLimiter,
};

/// Resolver engine tuning.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub enable_cache: bool,
    /// Verify Ed25519 signatures on register/update requests.
    pub verify_signatures: bool,
    /// Backstop deadline applied around every upstream call.
    pub max_resolution_time: Duration,
    /// Per-client ceiling within one rate-limit window.
    pub rate_limit_per_window: u32,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            enable_cache: true,
            verify_signatures: true,
            max_resolution_time: Duration::from_secs(5),
            rate_limit_per_window: 600,
        }
    }
}

/// The resolution engine. One instance per process, owned by the service
/// facade.
pub struct ResolverCore {
    config: ResolverConfig,
    resolvers: ResolverSet,
    cache: DomainCache,
    rate_limiter: RateLimiter,
    metrics: Arc<ZnsMetrics>,
}

impl ResolverCore {
    pub fn new(
        config: ResolverConfig,
        cache_config: CacheConfig,
        resolvers: ResolverSet,
        metrics: Arc<ZnsMetrics>,
    ) -> Self {
        let rate_limiter = RateLimiter::new(config.rate_limit_per_window);
        Self {
            config,
            resolvers,
            cache: DomainCache::new(cache_config),
            rate_limiter,
            metrics,
        }
    }

    /// Resolve a domain for a client. Never panics and never returns an
    /// envelope with both records and an error.
    pub async fn resolve(&self, request: &ResolveRequest, client_id: &str) -> ResolveResponse {
        let started = Instant::now();
        self.metrics.record_query();

        if !self.rate_limiter.is_allowed(client_id) {
            self.metrics.record_rate_limited();
            return ResolveResponse::failed(
                &request.domain,
                ResolutionSource::ZnsNative,
                ZnsError::new(ZnsErrorCode::RateLimited, "client request budget exhausted"),
            );
        }

        if !is_valid_domain(&request.domain) {
            self.metrics
                .record_failure(ZnsErrorCode::InvalidDomain, elapsed_ms(started));
            return ResolveResponse::failed(
                &request.domain,
                ResolutionSource::ZnsNative,
                ZnsError::new(
                    ZnsErrorCode::InvalidDomain,
                    format!("'{}' is not a resolvable domain", request.domain),
                ),
            );
        }

        if let Some(tld) = request.domain.rsplit('.').next() {
            self.metrics.record_tld(tld);
        }

        // Category is safe to unwrap after validation, but stay defensive
        let Some(category) = domain_category(&request.domain) else {
            self.metrics
                .record_failure(ZnsErrorCode::InvalidDomain, elapsed_ms(started));
            return ResolveResponse::failed(
                &request.domain,
                ResolutionSource::ZnsNative,
                ZnsError::new(ZnsErrorCode::InvalidDomain, "unsupported domain suffix"),
            );
        };

        if request.use_cache && self.config.enable_cache {
            if let Some(hit) = self.cache.get(&request.domain) {
                self.metrics.record_cache_hit();
                self.metrics.record_success(elapsed_ms(started));
                let records =
                    crate::resolver::filter_records(hit.data.records.clone(), &request.record_types);
                let mut response =
                    ResolveResponse::ok(&request.domain, records, ResolutionSource::Cache);
                if request.include_metadata {
                    response.metadata = Some(hit.data.metadata.clone());
                }
                response.resolution_info.was_cached = true;
                response.resolution_info.resolution_time_ms = elapsed_ms(started) as u64;
                return response;
            }
            self.metrics.record_cache_miss();
        }

        self.resolve_upstream(request, category, started).await
    }

    async fn resolve_upstream(
        &self,
        request: &ResolveRequest,
        category: DomainCategory,
        started: Instant,
    ) -> ResolveResponse {
        let chain = self.resolvers.ordered_for(category);
        let mut consulted: Vec<String> = Vec::with_capacity(chain.len());
        let mut owned_error: Option<ZnsError> = None;

        for resolver in &chain {
            consulted.push(resolver.name().to_string());
            self.metrics.record_resolver_query(resolver.name());

            let attempt = resolver.resolve(&request.domain, &request.record_types);
            let outcome =
                match tokio::time::timeout(self.config.max_resolution_time, attempt).await {
                    Ok(outcome) => outcome,
                    Err(_) => Some(ResolveResponse::failed(
                        &request.domain,
                        resolver.source(),
                        ZnsError::new(
                            ZnsErrorCode::Timeout,
                            format!(
                                "{} exceeded {} ms",
                                resolver.name(),
                                self.config.max_resolution_time.as_millis()
                            ),
                        ),
                    )),
                };

            match outcome {
                None => continue,
                Some(response) => match response.error {
                    Some(error) => {
                        // Resolver owns this namespace; do not try the next
                        owned_error = Some(error);
                        break;
                    }
                    None => {
                        if !response.records.is_empty() {
                            self.cache_response(request, &response);
                        }
                        self.metrics.record_success(elapsed_ms(started));
                        let mut response = response;
                        response.resolution_info.resolution_time_ms =
                            elapsed_ms(started) as u64;
                        response.resolution_info.resolver_chain = consulted;
                        if !request.include_metadata {
                            response.metadata = None;
                        }
                        return response;
                    }
                },
            }
        }

        let error = owned_error.unwrap_or_else(|| {
            ZnsError::new(
                ZnsErrorCode::DomainNotFound,
                format!("'{}' not found in any namespace", request.domain),
            )
        });
        self.metrics.record_failure(error.code, elapsed_ms(started));
        let mut response = ResolveResponse::failed(
            &request.domain,
            ResolutionSource::ZnsNative,
            error.with_chain(consulted.clone()),
        );
        response.resolution_info.resolver_chain = consulted;
        response.resolution_info.resolution_time_ms = elapsed_ms(started) as u64;
        response
    }

    /// Insert a successful upstream response into the cache. TTL is the
    /// minimum record TTL, further capped by the request's `max_ttl`;
    /// failures are logged and dropped, never fatal.
    fn cache_response(&self, request: &ResolveRequest, response: &ResolveResponse) {
        if !self.config.enable_cache {
            return;
        }
        let mut min_ttl = response.records.iter().map(|r| r.ttl).min();
        if request.max_ttl > 0 {
            min_ttl = min_ttl.map(|ttl| ttl.min(request.max_ttl));
        }
        let data = DomainData {
            domain: response.domain.clone(),
            owner: String::new(),
            records: response.records.clone(),
            contract_address: None,
            metadata: response.metadata.clone().unwrap_or_default(),
            last_updated: Utc::now(),
            expiry: None,
            signature: String::new(),
        };
        if let Err(e) = self
            .cache
            .put(data, min_ttl, response.resolution_info.source)
        {
            warn!(domain = %response.domain, error = %e, "cache insert dropped");
        }
    }

    /// Register a domain through the native chain. Only native categories
    /// may be registered here.
    pub async fn register_domain(
        &self,
        request: &RegisterRequest,
        client_id: &str,
    ) -> Result<RegisterResponse, ZnsError> {
        self.metrics.record_query();

        if !self.rate_limiter.is_allowed(client_id) {
            self.metrics.record_rate_limited();
            return Err(ZnsError::new(
                ZnsErrorCode::RateLimited,
                "client request budget exhausted",
            ));
        }

        if !is_valid_domain(&request.domain) {
            return Err(ZnsError::new(
                ZnsErrorCode::InvalidDomain,
                format!("'{}' is not a registrable domain", request.domain),
            ));
        }

        match domain_category(&request.domain) {
            Some(DomainCategory::Identity) | Some(DomainCategory::Infrastructure) => {}
            _ => {
                return Err(ZnsError::new(
                    ZnsErrorCode::PermissionDenied,
                    "only identity and infrastructure domains are registrable here",
                ))
            }
        }

        if self.config.verify_signatures {
            self.verify_register_signature(request)?;
        }

        let response = self.resolvers.registrar.register(request).await?;
        debug!(domain = %request.domain, tx = %response.transaction_hash, "domain registered");
        Ok(response)
    }

    /// Update a domain's records through the native chain. Invalidates the
    /// cached entry on success.
    pub async fn update_domain(
        &self,
        request: &UpdateRequest,
        client_id: &str,
    ) -> Result<UpdateResponse, ZnsError> {
        self.metrics.record_query();

        if !self.rate_limiter.is_allowed(client_id) {
            self.metrics.record_rate_limited();
            return Err(ZnsError::new(
                ZnsErrorCode::RateLimited,
                "client request budget exhausted",
            ));
        }

        match domain_category(&request.domain) {
            Some(DomainCategory::Identity) | Some(DomainCategory::Infrastructure) => {}
            _ => {
                return Err(ZnsError::new(
                    ZnsErrorCode::PermissionDenied,
                    "only identity and infrastructure domains are updatable here",
                ))
            }
        }

        for record in &request.records {
            let verdict = validate_record(record);
            if !verdict.is_valid() {
                return Err(ZnsError::new(
                    ZnsErrorCode::InvalidRecordType,
                    format!(
                        "record '{}' of type {} failed validation ({verdict:?})",
                        record.name, record.record_type
                    ),
                ));
            }
        }

        let response = self.resolvers.registrar.update(request).await?;
        self.cache.remove(&request.domain);
        debug!(domain = %request.domain, tx = %response.transaction_hash, "domain updated");
        Ok(response)
    }

    fn verify_register_signature(&self, request: &RegisterRequest) -> Result<(), ZnsError> {
        let key_bytes: [u8; 32] = hex::decode(&request.owner)
            .ok()
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(|| {
                ZnsError::new(
                    ZnsErrorCode::SignatureInvalid,
                    "owner is not a hex-encoded Ed25519 public key",
                )
            })?;
        let key = ed25519_dalek::VerifyingKey::from_bytes(&key_bytes).map_err(|_| {
            ZnsError::new(ZnsErrorCode::SignatureInvalid, "owner key is not on the curve")
        })?;

        let data = DomainData {
            domain: request.domain.clone(),
            owner: request.owner.clone(),
            records: request.records.clone(),
            contract_address: None,
            metadata: request.metadata.clone().unwrap_or_default(),
            last_updated: request.last_updated,
            expiry: None,
            signature: request.signature.clone(),
        };
        validator::verify_domain_signature(&data, &key)
    }

    // --- cache + limiter surface for the facade ---

    pub fn cache_stats(&self) -> CacheStatistics {
        self.cache.stats()
    }

    pub fn cleanup_expired(&self) -> usize {
        self.cache.cleanup_expired()
    }

    pub fn flush_cache(&self) {
        self.cache.clear();
    }

    pub fn invalidate(&self, domain: &str) -> bool {
        self.cache.remove(domain)
    }

    /// Reset the fixed rate-limit window. Scheduled by the periodic task.
    pub fn reset_rate_windows(&self) {
        self.rate_limiter.reset_counters();
    }

    pub fn rate_window_age_secs(&self) -> u64 {
        self.rate_limiter.window_age_secs()
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1_000.0
}
