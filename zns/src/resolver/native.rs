//! Native chain resolver
//!
//! Speaks length-delimited JSON over a quinn bidirectional stream to a
//! GhostChain node. Each call opens one stream, writes a single request
//! object, and reads a single response object. When no backend endpoint is
//! configured the adapter declines every namespace (`resolve` returns
//! `None`) and write operations report `RESOLVER_UNAVAILABLE`.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{filter_records, RegistrarBackend, UpstreamResolver};
use crate::types::{
    DnsRecord, DomainMetadata, RecordType, RegisterRequest, RegisterResponse, ResolutionSource,
    ResolveResponse, UpdateRequest, UpdateResponse, ZnsError, ZnsErrorCode,
};

/// Maximum response size accepted from the chain node (1 MiB).
const MAX_RESPONSE_BYTES: usize = 1024 * 1024;

/// Server name presented during the TLS handshake with the chain node.
const CHAIN_SERVER_NAME: &str = "ghostchain-node";

/// Configuration for the native resolver.
#[derive(Debug, Clone, Default)]
pub struct NativeConfig {
    /// Chain node QUIC endpoint; `None` leaves the resolver in declined mode.
    pub endpoint: Option<SocketAddr>,
    /// PEM bundle trusted for the chain node's certificate.
    pub trust_anchor: Option<PathBuf>,
    /// Per-call deadline.
    pub timeout: Duration,
}

#[derive(Deserialize)]
struct ChainResolveReply {
    #[serde(default)]
    records: Vec<ChainRecord>,
    #[serde(default)]
    metadata: Option<DomainMetadata>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct ChainRecord {
    #[serde(rename = "type")]
    record_type: String,
    name: String,
    value: String,
    ttl: u32,
    #[serde(default)]
    priority: Option<u16>,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    weight: Option<u16>,
    #[serde(default)]
    target: Option<String>,
}

#[derive(Deserialize)]
struct ChainWriteReply {
    #[serde(default)]
    transaction_hash: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Resolver and registrar backed by a GhostChain node over QUIC.
pub struct NativeResolver {
    config: NativeConfig,
    endpoint: Option<quinn::Endpoint>,
}

impl NativeResolver {
    /// Build the resolver. Endpoint construction is infallible when no
    /// backend is configured; with a backend, a local UDP socket is bound
    /// eagerly so misconfiguration fails at startup.
    pub fn new(config: NativeConfig) -> Result<Self, ZnsError> {
        let endpoint = match config.endpoint {
            Some(_) => Some(Self::build_endpoint(&config)?),
            None => None,
        };
        Ok(Self { config, endpoint })
    }

    /// Declined-mode resolver used when the chain backend is absent.
    pub fn disconnected() -> Self {
        Self {
            config: NativeConfig {
                timeout: Duration::from_secs(5),
                ..NativeConfig::default()
            },
            endpoint: None,
        }
    }

    fn build_endpoint(config: &NativeConfig) -> Result<quinn::Endpoint, ZnsError> {
        let mut roots = rustls::RootCertStore::empty();
        if let Some(path) = &config.trust_anchor {
            let pem = std::fs::read(path).map_err(|e| {
                ZnsError::new(
                    ZnsErrorCode::ResolverUnavailable,
                    format!("cannot read chain trust anchor: {e}"),
                )
            })?;
            for cert in rustls_pemfile_certs(&pem) {
                roots.add(cert).map_err(|e| {
                    ZnsError::new(
                        ZnsErrorCode::ResolverUnavailable,
                        format!("invalid chain trust anchor: {e}"),
                    )
                })?;
            }
        }

        let crypto = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let quic_crypto = quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
            .map_err(|e| {
                ZnsError::new(
                    ZnsErrorCode::ResolverUnavailable,
                    format!("chain TLS configuration rejected: {e}"),
                )
            })?;
        let client_config = quinn::ClientConfig::new(Arc::new(quic_crypto));

        let bind: SocketAddr = "0.0.0.0:0".parse().expect("static bind address");
        let mut endpoint = quinn::Endpoint::client(bind).map_err(|e| {
            ZnsError::new(
                ZnsErrorCode::ResolverUnavailable,
                format!("cannot bind chain client socket: {e}"),
            )
        })?;
        endpoint.set_default_client_config(client_config);
        Ok(endpoint)
    }

    /// One request/response exchange with the chain node.
    async fn exchange(&self, request: serde_json::Value) -> Result<Vec<u8>, ZnsError> {
        let (endpoint, addr) = match (&self.endpoint, self.config.endpoint) {
            (Some(ep), Some(addr)) => (ep, addr),
            _ => {
                return Err(ZnsError::new(
                    ZnsErrorCode::ResolverUnavailable,
                    "no chain backend configured",
                ))
            }
        };

        let io = async {
            let conn = endpoint
                .connect(addr, CHAIN_SERVER_NAME)
                .map_err(|e| unavailable(format!("chain connect: {e}")))?
                .await
                .map_err(|e| unavailable(format!("chain handshake: {e}")))?;

            let (mut send, mut recv) = conn
                .open_bi()
                .await
                .map_err(|e| unavailable(format!("chain stream: {e}")))?;

            let payload = serde_json::to_vec(&request)
                .map_err(|e| ZnsError::new(ZnsErrorCode::InternalError, e.to_string()))?;
            send.write_all(&payload)
                .await
                .map_err(|e| unavailable(format!("chain send: {e}")))?;
            send.finish()
                .map_err(|e| unavailable(format!("chain finish: {e}")))?;

            recv.read_to_end(MAX_RESPONSE_BYTES)
                .await
                .map_err(|e| unavailable(format!("chain recv: {e}")))
        };

        match tokio::time::timeout(self.config.timeout, io).await {
            Ok(result) => result,
            Err(_) => Err(ZnsError::new(
                ZnsErrorCode::Timeout,
                format!(
                    "chain call exceeded {} ms",
                    self.config.timeout.as_millis()
                ),
            )),
        }
    }
}

fn unavailable(message: String) -> ZnsError {
    ZnsError::new(ZnsErrorCode::ResolverUnavailable, message)
}

fn rustls_pemfile_certs(pem: &[u8]) -> Vec<rustls::pki_types::CertificateDer<'static>> {
    rustls_pemfile::certs(&mut &pem[..])
        .filter_map(|c| c.ok())
        .collect()
}

fn parse_chain_records(records: Vec<ChainRecord>) -> Vec<DnsRecord> {
    records
        .into_iter()
        .filter_map(|r| {
            let record_type: RecordType = r.record_type.parse().ok()?;
            Some(DnsRecord {
                record_type,
                name: r.name,
                value: r.value,
                ttl: r.ttl,
                priority: r.priority,
                port: r.port,
                weight: r.weight,
                target: r.target,
                created_at: Utc::now(),
                signature: None,
            })
        })
        .collect()
}

#[async_trait]
impl UpstreamResolver for NativeResolver {
    fn name(&self) -> &'static str {
        "native"
    }

    fn source(&self) -> ResolutionSource {
        ResolutionSource::ZnsNative
    }

    async fn resolve(
        &self,
        domain: &str,
        record_types: &[RecordType],
    ) -> Option<ResolveResponse> {
        if self.endpoint.is_none() {
            // No backend: decline so the chain can fall through
            return None;
        }

        let request = json!({
            "type": "resolve_domain",
            "domain": domain,
            "record_types": record_types.iter().map(|t| t.as_str()).collect::<Vec<_>>(),
        });

        let bytes = match self.exchange(request).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(domain, error = %err, "native resolve failed");
                return Some(ResolveResponse::failed(domain, self.source(), err));
            }
        };

        let reply: ChainResolveReply = match serde_json::from_slice(&bytes) {
            Ok(reply) => reply,
            Err(e) => {
                return Some(ResolveResponse::failed(
                    domain,
                    self.source(),
                    unavailable(format!("malformed chain reply: {e}")),
                ))
            }
        };

        if let Some(message) = reply.error {
            let code = if message.contains("not found") {
                ZnsErrorCode::DomainNotFound
            } else {
                ZnsErrorCode::ResolverUnavailable
            };
            return Some(ResolveResponse::failed(
                domain,
                self.source(),
                ZnsError::new(code, message),
            ));
        }

        let records = filter_records(parse_chain_records(reply.records), record_types);
        debug!(domain, count = records.len(), "native resolve ok");
        let mut response = ResolveResponse::ok(domain, records, self.source());
        response.metadata = reply.metadata;
        Some(response)
    }
}

#[async_trait]
impl RegistrarBackend for NativeResolver {
    async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse, ZnsError> {
        let payload = json!({
            "type": "register_domain",
            "domain": request.domain,
            "owner": request.owner,
            "records": request.records,
            "metadata": request.metadata,
            "last_updated": request.last_updated,
            "signature": request.signature,
        });

        let bytes = self.exchange(payload).await?;
        let reply: ChainWriteReply = serde_json::from_slice(&bytes)
            .map_err(|e| unavailable(format!("malformed chain reply: {e}")))?;

        if let Some(message) = reply.error {
            return Err(unavailable(message));
        }

        Ok(RegisterResponse {
            domain: request.domain.clone(),
            transaction_hash: reply.transaction_hash.unwrap_or_default(),
            registered_at: Utc::now(),
            expiry: None,
            error: None,
        })
    }

    async fn update(&self, request: &UpdateRequest) -> Result<UpdateResponse, ZnsError> {
        let payload = json!({
            "type": "update_domain",
            "domain": request.domain,
            "records": request.records,
            "signature": request.signature,
        });

        let bytes = self.exchange(payload).await?;
        let reply: ChainWriteReply = serde_json::from_slice(&bytes)
            .map_err(|e| unavailable(format!("malformed chain reply: {e}")))?;

        if let Some(message) = reply.error {
            return Err(unavailable(message));
        }

        Ok(UpdateResponse {
            domain: request.domain.clone(),
            transaction_hash: reply.transaction_hash.unwrap_or_default(),
            updated_at: Utc::now(),
            error: None,
        })
    }
}
