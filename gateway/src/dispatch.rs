//! Multiplexer / dispatch layer
//!
//! Both transport listeners hand framed `(path, body)` units to the
//! dispatcher, which selects a channel from the first path segment, invokes
//! the ZNS facade for `/zns/*`, and forwards everything else to the
//! channel's backend endpoint. Panics and deadline overruns are absorbed
//! here and converted into error envelopes; nothing below the dispatcher can
//! take a connection down.

use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use zns::types::{
    RegisterRequest, ResolveRequest, SubscriptionRequest, UpdateRequest, ZnsErrorCode,
};
use zns::ZnsService;

use crate::channel::{ChannelRegistry, ChannelType};
use crate::error::GatewayError;
use crate::metrics;
use crate::response_cache::ResponseCache;

/// Largest request body the dispatcher accepts.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Default event batch for subscription drains.
const DEFAULT_EVENT_BATCH: usize = 100;

/// One dispatched response.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub status: u16,
    pub body: Bytes,
}

impl DispatchOutcome {
    fn new(status: u16, body: Vec<u8>) -> Self {
        Self {
            status,
            body: Bytes::from(body),
        }
    }

    fn json(status: u16, value: serde_json::Value) -> Self {
        Self::new(status, value.to_string().into_bytes())
    }

    fn error(status: u16, code: ZnsErrorCode, message: &str) -> Self {
        Self::json(
            status,
            json!({
                "error": {
                    "code": code.as_str(),
                    "message": message,
                    "details": null,
                    "resolution_chain": [],
                }
            }),
        )
    }
}

impl From<GatewayError> for DispatchOutcome {
    fn from(err: GatewayError) -> Self {
        DispatchOutcome::error(
            err.status_code().as_u16(),
            err.code(),
            &err.public_message(),
        )
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct EventsRequest {
    subscription_id: String,
    #[serde(default)]
    max_events: Option<usize>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CancelRequest {
    subscription_id: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CacheSubscribeRequest {
    #[serde(default)]
    hits: bool,
    #[serde(default)]
    misses: bool,
    #[serde(default)]
    evictions: bool,
}

/// The dispatch engine shared by both listeners.
pub struct Dispatcher {
    channels: ChannelRegistry,
    zns: Arc<ZnsService>,
    response_cache: ResponseCache,
    http: reqwest::Client,
    request_timeout: Duration,
    concurrency: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(
        channels: ChannelRegistry,
        zns: Arc<ZnsService>,
        response_cache: ResponseCache,
        http: reqwest::Client,
        request_timeout: Duration,
        max_concurrent_requests: usize,
    ) -> Self {
        Self {
            channels,
            zns,
            response_cache,
            http,
            request_timeout,
            concurrency: Arc::new(Semaphore::new(max_concurrent_requests)),
        }
    }

    pub fn zns(&self) -> &Arc<ZnsService> {
        &self.zns
    }

    /// Dispatch one framed request. Applies the per-request deadline and the
    /// panic boundary; always returns a well-formed response.
    pub async fn dispatch(
        self: &Arc<Self>,
        path: String,
        body: Bytes,
        client_id: String,
    ) -> DispatchOutcome {
        let started = Instant::now();
        let channel_label = first_segment(&path).unwrap_or("unknown").to_string();

        if body.len() > MAX_BODY_BYTES {
            let outcome = DispatchOutcome::from(GatewayError::PayloadTooLarge);
            metrics::record_request(&channel_label, outcome.status, started.elapsed().as_secs_f64());
            return outcome;
        }

        let this = Arc::clone(self);
        let task_path = path.clone();
        let handler = tokio::spawn(async move {
            let _permit = this
                .concurrency
                .acquire()
                .await
                .expect("dispatcher semaphore never closes");
            this.handle(&task_path, body, &client_id).await
        });
        let abort = handler.abort_handle();

        let outcome = match tokio::time::timeout(self.request_timeout, handler).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_error)) => {
                if join_error.is_panic() {
                    metrics::record_dispatch_panic();
                }
                DispatchOutcome::from(GatewayError::Internal(format!(
                    "request handler failed for {path}: {join_error}"
                )))
            }
            Err(_) => {
                abort.abort();
                metrics::record_dispatch_timeout();
                warn!(path = %path, timeout_ms = self.request_timeout.as_millis() as u64,
                    "dispatch deadline exceeded");
                DispatchOutcome::from(GatewayError::Timeout)
            }
        };

        metrics::record_request(&channel_label, outcome.status, started.elapsed().as_secs_f64());
        outcome
    }

    async fn handle(&self, path: &str, body: Bytes, client_id: &str) -> DispatchOutcome {
        let Some(head) = first_segment(path) else {
            return GatewayError::UnknownChannel(path.to_string()).into();
        };

        if head == "zns" {
            let after = path.find("zns").map(|i| i + 3).unwrap_or(path.len());
            return self.handle_zns(&path[after..], body, client_id).await;
        }

        let Some(channel_type) = ChannelType::from_path_segment(head) else {
            return GatewayError::UnknownChannel(head.to_string()).into();
        };

        // DNS queries naming a ZNS domain are answered locally
        if channel_type == ChannelType::Dns {
            if let Some(domain) = find_zns_domain(&body) {
                debug!(domain = %domain, "redirecting DNS query to ZNS");
                return self.zns_resolve_from(body, Some(domain), client_id).await;
            }
        }

        self.forward(channel_type, path, body).await
    }

    // --- ZNS surface ---

    async fn handle_zns(&self, tail: &str, body: Bytes, client_id: &str) -> DispatchOutcome {
        match tail {
            "/resolve" => self.zns_resolve_from(body, None, client_id).await,
            "/register" => {
                let request: RegisterRequest = match parse_body(&body) {
                    Ok(r) => r,
                    Err(outcome) => return outcome,
                };
                let response = self.zns.register(&request, client_id).await;
                let status = response
                    .error
                    .as_ref()
                    .map(|e| status_for(e.code))
                    .unwrap_or(200);
                DispatchOutcome::new(status, serde_json::to_vec(&response).unwrap_or_default())
            }
            "/update" => {
                let request: UpdateRequest = match parse_body(&body) {
                    Ok(r) => r,
                    Err(outcome) => return outcome,
                };
                let response = self.zns.update(&request, client_id).await;
                let status = response
                    .error
                    .as_ref()
                    .map(|e| status_for(e.code))
                    .unwrap_or(200);
                DispatchOutcome::new(status, serde_json::to_vec(&response).unwrap_or_default())
            }
            "/subscribe" => {
                let request: SubscriptionRequest = match parse_body(&body) {
                    Ok(r) => r,
                    Err(outcome) => return outcome,
                };
                match self.zns.create_domain_subscription(&request, client_id) {
                    Ok(id) => DispatchOutcome::json(200, json!({ "subscription_id": id })),
                    Err(e) => DispatchOutcome::error(status_for(e.code), e.code, &e.message),
                }
            }
            "/subscribe/cache" => {
                let request: CacheSubscribeRequest = match parse_body(&body) {
                    Ok(r) => r,
                    Err(outcome) => return outcome,
                };
                match self.zns.create_cache_subscription(
                    request.hits,
                    request.misses,
                    request.evictions,
                    client_id,
                ) {
                    Ok(id) => DispatchOutcome::json(200, json!({ "subscription_id": id })),
                    Err(e) => DispatchOutcome::error(status_for(e.code), e.code, &e.message),
                }
            }
            "/subscribe/events" => {
                let request: EventsRequest = match parse_body(&body) {
                    Ok(r) => r,
                    Err(outcome) => return outcome,
                };
                let max = request.max_events.unwrap_or(DEFAULT_EVENT_BATCH);
                let events = self
                    .zns
                    .get_subscription_events(&request.subscription_id, max);
                let cache_events = self.zns.get_cache_events(&request.subscription_id, max);
                DispatchOutcome::json(
                    200,
                    json!({ "events": events, "cache_events": cache_events }),
                )
            }
            "/subscribe/cancel" => {
                let request: CancelRequest = match parse_body(&body) {
                    Ok(r) => r,
                    Err(outcome) => return outcome,
                };
                let cancelled = self.zns.cancel_subscription(&request.subscription_id);
                DispatchOutcome::json(200, json!({ "cancelled": cancelled }))
            }
            "/status" => {
                let status = self.zns.status();
                DispatchOutcome::new(200, serde_json::to_vec(&status).unwrap_or_default())
            }
            "/metrics" => {
                let report = self.zns.metrics_report();
                DispatchOutcome::new(200, serde_json::to_vec(&report).unwrap_or_default())
            }
            "/metrics/prometheus" => {
                let mut text = self.zns.prometheus();
                text.push_str(&metrics::encode_metrics());
                DispatchOutcome::new(200, text.into_bytes())
            }
            "/flush" => {
                self.zns.flush_cache();
                DispatchOutcome::json(200, json!({ "flushed": true }))
            }
            other => DispatchOutcome::error(
                404,
                ZnsErrorCode::Unspecified,
                &format!("unknown ZNS operation '{other}'"),
            ),
        }
    }

    /// Run a resolve from a raw body. `redirect_domain` carries the domain
    /// found by the DNS special case when the body is not a ResolveRequest.
    async fn zns_resolve_from(
        &self,
        body: Bytes,
        redirect_domain: Option<String>,
        client_id: &str,
    ) -> DispatchOutcome {
        let request = match serde_json::from_slice::<ResolveRequest>(&body) {
            Ok(request) => request,
            Err(e) => match redirect_domain {
                Some(domain) => ResolveRequest::new(&domain),
                None => {
                    return DispatchOutcome::error(
                        400,
                        ZnsErrorCode::Unspecified,
                        &format!("malformed resolve request: {e}"),
                    )
                }
            },
        };

        let response = self.zns.resolve(&request, client_id).await;
        let status = response
            .error
            .as_ref()
            .map(|e| status_for(e.code))
            .unwrap_or(200);
        DispatchOutcome::new(status, serde_json::to_vec(&response).unwrap_or_default())
    }

    // --- backend forwarding ---

    async fn forward(
        &self,
        channel_type: ChannelType,
        path: &str,
        body: Bytes,
    ) -> DispatchOutcome {
        let Some(channel) = self.channels.get(channel_type) else {
            return GatewayError::UnknownChannel(channel_type.to_string()).into();
        };

        let key = ResponseCache::key(path, &body);
        if let Some((status, cached)) = self.response_cache.get(key) {
            metrics::record_response_cache_hit();
            return DispatchOutcome { status, body: cached };
        }
        metrics::record_response_cache_miss();

        // Forward the verbatim body to base_url + path tail
        let tail = path
            .strip_prefix(&format!("/{}", channel_type.as_str()))
            .unwrap_or("");
        let url = format!(
            "{}{}",
            channel.service_endpoint.trim_end_matches('/'),
            tail
        );

        let result = self
            .http
            .post(&url)
            .body(body)
            .timeout(channel.timeout)
            .send()
            .await;

        match result {
            Ok(response) => {
                let status = response.status().as_u16();
                let bytes = response.bytes().await.unwrap_or_default();
                if status == 200 {
                    self.response_cache.put(key, status, bytes.clone());
                }
                DispatchOutcome { status, body: bytes }
            }
            Err(e) => {
                warn!(channel = %channel_type, url = %url, error = %e, "backend call failed");
                let err = if e.is_timeout() {
                    GatewayError::Timeout
                } else {
                    GatewayError::BackendUnavailable(channel_type.to_string())
                };
                err.into()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn first_segment(path: &str) -> Option<&str> {
    path.trim_start_matches('/').split('/').find(|s| !s.is_empty())
}

fn parse_body<T: for<'de> Deserialize<'de>>(body: &Bytes) -> Result<T, DispatchOutcome> {
    serde_json::from_slice(body).map_err(|e| {
        DispatchOutcome::error(
            400,
            ZnsErrorCode::Unspecified,
            &format!("malformed request body: {e}"),
        )
    })
}

/// Map wire error codes to HTTP status codes.
fn status_for(code: ZnsErrorCode) -> u16 {
    match code {
        ZnsErrorCode::Unspecified => 400,
        ZnsErrorCode::DomainNotFound => 404,
        ZnsErrorCode::InvalidDomain | ZnsErrorCode::InvalidRecordType => 400,
        ZnsErrorCode::PermissionDenied => 403,
        ZnsErrorCode::SignatureInvalid => 401,
        ZnsErrorCode::DomainExpired => 410,
        ZnsErrorCode::ResolverUnavailable => 502,
        ZnsErrorCode::Timeout => 504,
        ZnsErrorCode::RateLimited => 429,
        ZnsErrorCode::InternalError => 500,
    }
}

/// Scan a request body for a domain whose suffix belongs to a ZNS category.
/// Prefers a JSON `domain` field; falls back to a token scan for non-JSON
/// payloads.
fn find_zns_domain(body: &[u8]) -> Option<String> {
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) {
        if let Some(domain) = value.get("domain").and_then(|d| d.as_str()) {
            if zns::validator::domain_category(domain).is_some() {
                return Some(domain.to_string());
            }
        }
    }

    let text = String::from_utf8_lossy(body);
    text.split(|c: char| !(c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_'))
        .filter(|token| token.contains('.'))
        .find(|token| zns::validator::domain_category(token).is_some())
        .map(|token| token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_segment_extraction() {
        assert_eq!(first_segment("/zns/resolve"), Some("zns"));
        assert_eq!(first_segment("/wallet/balance"), Some("wallet"));
        assert_eq!(first_segment("//wallet"), Some("wallet"));
        assert_eq!(first_segment("/"), None);
        assert_eq!(first_segment(""), None);
    }

    #[test]
    fn status_mapping() {
        assert_eq!(status_for(ZnsErrorCode::DomainNotFound), 404);
        assert_eq!(status_for(ZnsErrorCode::RateLimited), 429);
        assert_eq!(status_for(ZnsErrorCode::Timeout), 504);
        assert_eq!(status_for(ZnsErrorCode::SignatureInvalid), 401);
    }

    #[test]
    fn gateway_errors_render_the_shared_envelope() {
        let outcome = DispatchOutcome::from(GatewayError::BackendUnavailable("wallet".to_string()));
        assert_eq!(outcome.status, 502);
        let body: serde_json::Value = serde_json::from_slice(&outcome.body).unwrap();
        assert_eq!(body["error"]["code"], "RESOLVER_UNAVAILABLE");
        assert_eq!(body["error"]["message"], "backend 'wallet' unreachable");

        let outcome = DispatchOutcome::from(GatewayError::UnknownChannel("nope".to_string()));
        assert_eq!(outcome.status, 404);
    }

    #[test]
    fn finds_domain_in_json_body() {
        let body = br#"{"domain":"alice.ghost","record_types":["A"]}"#;
        assert_eq!(find_zns_domain(body), Some("alice.ghost".to_string()));
    }

    #[test]
    fn finds_domain_in_raw_body() {
        let body = b"lookup name=alice.ghost type=A";
        assert_eq!(find_zns_domain(body), Some("alice.ghost".to_string()));
    }

    #[test]
    fn ignores_foreign_domains() {
        let body = br#"{"domain":"example.com"}"#;
        assert_eq!(find_zns_domain(body), None);
        assert_eq!(find_zns_domain(b"query example.com"), None);
    }
}
