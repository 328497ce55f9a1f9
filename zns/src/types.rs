//! Canonical data model for the ZNS resolution subsystem
//!
//! Wire-facing request/response envelopes, DNS-style records, domain data,
//! change events, and the error code vocabulary shared by the resolver core,
//! the subscription managers, and the gateway dispatcher.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Record types
// ---------------------------------------------------------------------------

/// Supported DNS-style record types.
///
/// `GHOST`, `CONTRACT`, and `WALLET` are chain-native extensions; the rest
/// follow their traditional-DNS meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordType {
    A,
    Aaaa,
    Cname,
    Mx,
    Txt,
    Srv,
    Ns,
    Soa,
    Ptr,
    Ghost,
    Contract,
    Wallet,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::Aaaa => "AAAA",
            RecordType::Cname => "CNAME",
            RecordType::Mx => "MX",
            RecordType::Txt => "TXT",
            RecordType::Srv => "SRV",
            RecordType::Ns => "NS",
            RecordType::Soa => "SOA",
            RecordType::Ptr => "PTR",
            RecordType::Ghost => "GHOST",
            RecordType::Contract => "CONTRACT",
            RecordType::Wallet => "WALLET",
        }
    }

    /// All record types, in wire order.
    pub fn all() -> &'static [RecordType] {
        &[
            RecordType::A,
            RecordType::Aaaa,
            RecordType::Cname,
            RecordType::Mx,
            RecordType::Txt,
            RecordType::Srv,
            RecordType::Ns,
            RecordType::Soa,
            RecordType::Ptr,
            RecordType::Ghost,
            RecordType::Contract,
            RecordType::Wallet,
        ]
    }
}

impl FromStr for RecordType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "A" => Ok(RecordType::A),
            "AAAA" => Ok(RecordType::Aaaa),
            "CNAME" => Ok(RecordType::Cname),
            "MX" => Ok(RecordType::Mx),
            "TXT" => Ok(RecordType::Txt),
            "SRV" => Ok(RecordType::Srv),
            "NS" => Ok(RecordType::Ns),
            "SOA" => Ok(RecordType::Soa),
            "PTR" => Ok(RecordType::Ptr),
            "GHOST" => Ok(RecordType::Ghost),
            "CONTRACT" => Ok(RecordType::Contract),
            "WALLET" => Ok(RecordType::Wallet),
            _ => Err(()),
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single DNS record attached to a domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DnsRecord {
    pub record_type: RecordType,
    /// Fully qualified name; equal to the owning domain or a subname of it.
    pub name: String,
    pub value: String,
    /// Requested TTL in seconds; clamped to the cache bounds on insertion.
    pub ttl: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl DnsRecord {
    /// Convenience constructor for the common (type, name, value, ttl) case.
    pub fn new(record_type: RecordType, name: &str, value: &str, ttl: u32) -> Self {
        Self {
            record_type,
            name: name.to_string(),
            value: value.to_string(),
            ttl,
            priority: None,
            port: None,
            weight: None,
            target: None,
            created_at: Utc::now(),
            signature: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Domain data
// ---------------------------------------------------------------------------

/// Optional social links carried in domain metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SocialLinks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub twitter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telegram: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discord: Option<String>,
}

/// Descriptive metadata attached to a registered domain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainMetadata {
    pub registrar: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub social: Option<SocialLinks>,
}

/// The full state of a domain as returned by an upstream resolver.
///
/// `signature` is an Ed25519 signature over the canonical encoding produced
/// by [`crate::validator::canonical_domain_bytes`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainData {
    pub domain: String,
    /// Owner address or public key, hex-encoded.
    pub owner: String,
    pub records: Vec<DnsRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<String>,
    #[serde(default)]
    pub metadata: DomainMetadata,
    pub last_updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
    #[serde(default)]
    pub signature: String,
}

// ---------------------------------------------------------------------------
// Categories and sources
// ---------------------------------------------------------------------------

/// Routing category of a domain, determined by its suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainCategory {
    Identity,
    Infrastructure,
    EnsBridge,
    UnstoppableBridge,
    Experimental,
}

impl fmt::Display for DomainCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DomainCategory::Identity => "identity",
            DomainCategory::Infrastructure => "infrastructure",
            DomainCategory::EnsBridge => "ens_bridge",
            DomainCategory::UnstoppableBridge => "unstoppable_bridge",
            DomainCategory::Experimental => "experimental",
        };
        f.write_str(s)
    }
}

/// Where a resolution result came from, stamped into every response for
/// attribution and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResolutionSource {
    #[serde(rename = "ZNS_NATIVE")]
    ZnsNative,
    #[serde(rename = "ENS_BRIDGE")]
    EnsBridge,
    #[serde(rename = "UNSTOPPABLE_BRIDGE")]
    UnstoppableBridge,
    #[serde(rename = "TRADITIONAL_DNS")]
    TraditionalDns,
    #[serde(rename = "CACHE")]
    Cache,
}

impl ResolutionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionSource::ZnsNative => "ZNS_NATIVE",
            ResolutionSource::EnsBridge => "ENS_BRIDGE",
            ResolutionSource::UnstoppableBridge => "UNSTOPPABLE_BRIDGE",
            ResolutionSource::TraditionalDns => "TRADITIONAL_DNS",
            ResolutionSource::Cache => "CACHE",
        }
    }
}

impl fmt::Display for ResolutionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Error vocabulary
// ---------------------------------------------------------------------------

/// Wire-level error codes; one per entry in the internal error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ZnsErrorCode {
    #[serde(rename = "UNSPECIFIED")]
    Unspecified,
    #[serde(rename = "DOMAIN_NOT_FOUND")]
    DomainNotFound,
    #[serde(rename = "INVALID_DOMAIN")]
    InvalidDomain,
    #[serde(rename = "INVALID_RECORD_TYPE")]
    InvalidRecordType,
    #[serde(rename = "PERMISSION_DENIED")]
    PermissionDenied,
    #[serde(rename = "SIGNATURE_INVALID")]
    SignatureInvalid,
    #[serde(rename = "DOMAIN_EXPIRED")]
    DomainExpired,
    #[serde(rename = "RESOLVER_UNAVAILABLE")]
    ResolverUnavailable,
    #[serde(rename = "TIMEOUT")]
    Timeout,
    #[serde(rename = "RATE_LIMITED")]
    RateLimited,
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
}

impl ZnsErrorCode {
    /// Stable string form, used as the metrics label for per-error counters.
    pub fn as_str(&self) -> &'static str {
        match self {
            ZnsErrorCode::Unspecified => "UNSPECIFIED",
            ZnsErrorCode::DomainNotFound => "DOMAIN_NOT_FOUND",
            ZnsErrorCode::InvalidDomain => "INVALID_DOMAIN",
            ZnsErrorCode::InvalidRecordType => "INVALID_RECORD_TYPE",
            ZnsErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ZnsErrorCode::SignatureInvalid => "SIGNATURE_INVALID",
            ZnsErrorCode::DomainExpired => "DOMAIN_EXPIRED",
            ZnsErrorCode::ResolverUnavailable => "RESOLVER_UNAVAILABLE",
            ZnsErrorCode::Timeout => "TIMEOUT",
            ZnsErrorCode::RateLimited => "RATE_LIMITED",
            ZnsErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Whether a client may reasonably retry the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ZnsErrorCode::Timeout
                | ZnsErrorCode::ResolverUnavailable
                | ZnsErrorCode::RateLimited
        )
    }
}

impl fmt::Display for ZnsErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error envelope carried in responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZnsError {
    pub code: ZnsErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Resolvers consulted before the error, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resolution_chain: Vec<String>,
}

impl ZnsError {
    pub fn new(code: ZnsErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            resolution_chain: Vec::new(),
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_chain(mut self, chain: Vec<String>) -> Self {
        self.resolution_chain = chain;
        self
    }
}

impl fmt::Display for ZnsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ZnsError {}

// ---------------------------------------------------------------------------
// Request / response envelopes
// ---------------------------------------------------------------------------

fn default_true() -> bool {
    true
}

/// Resolution request body. Unknown fields are rejected; this is a
/// security-critical input.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResolveRequest {
    pub domain: String,
    #[serde(default)]
    pub record_types: Vec<RecordType>,
    #[serde(default)]
    pub include_metadata: bool,
    #[serde(default = "default_true")]
    pub use_cache: bool,
    #[serde(default)]
    pub max_ttl: u32,
}

impl ResolveRequest {
    pub fn new(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            record_types: Vec::new(),
            include_metadata: false,
            use_cache: true,
            max_ttl: 0,
        }
    }
}

/// Per-resolution attribution info.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionInfo {
    pub source: ResolutionSource,
    pub was_cached: bool,
    pub resolution_time_ms: u64,
    /// Resolvers consulted, in order, including the one that answered.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resolver_chain: Vec<String>,
}

/// Resolution response envelope: either records or an error, never both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveResponse {
    pub domain: String,
    #[serde(default)]
    pub records: Vec<DnsRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<DomainMetadata>,
    pub resolution_info: ResolutionInfo,
    #[serde(default)]
    pub error: Option<ZnsError>,
}

impl ResolveResponse {
    /// Build a successful response.
    pub fn ok(domain: &str, records: Vec<DnsRecord>, source: ResolutionSource) -> Self {
        Self {
            domain: domain.to_string(),
            records,
            metadata: None,
            resolution_info: ResolutionInfo {
                source,
                was_cached: false,
                resolution_time_ms: 0,
                resolver_chain: Vec::new(),
            },
            error: None,
        }
    }

    /// Build a failed response attributed to `source`.
    pub fn failed(domain: &str, source: ResolutionSource, error: ZnsError) -> Self {
        Self {
            domain: domain.to_string(),
            records: Vec::new(),
            metadata: None,
            resolution_info: ResolutionInfo {
                source,
                was_cached: false,
                resolution_time_ms: 0,
                resolver_chain: Vec::new(),
            },
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Domain registration request. Unknown fields rejected.
///
/// Carries the full domain-data shape so the Ed25519 signature can be
/// verified over the canonical encoding before the chain is consulted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub domain: String,
    /// Owner's hex-encoded Ed25519 public key.
    pub owner: String,
    #[serde(default)]
    pub records: Vec<DnsRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<DomainMetadata>,
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub domain: String,
    pub transaction_hash: String,
    pub registered_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<ZnsError>,
}

/// Domain update request. Unknown fields rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateRequest {
    pub domain: String,
    pub records: Vec<DnsRecord>,
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateResponse {
    pub domain: String,
    pub transaction_hash: String,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub error: Option<ZnsError>,
}

/// Domain-change subscription request. Empty `domains` means wildcard; empty
/// `record_types` means all types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubscriptionRequest {
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub record_types: Vec<RecordType>,
    #[serde(default)]
    pub include_metadata: bool,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Kind of domain lifecycle change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeEventType {
    Registered,
    Updated,
    Transferred,
    Expired,
    Renewed,
}

/// A domain change event delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub domain: String,
    pub event_type: ChangeEventType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub old_records: Vec<DnsRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub new_records: Vec<DnsRecord>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
}

/// Cache observability event classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CacheEventKind {
    Hit,
    Miss,
    Eviction,
    Flush,
}

/// A cache event delivered to cache subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEvent {
    pub kind: CacheEventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl CacheEvent {
    pub fn new(kind: CacheEventKind, domain: Option<&str>) -> Self {
        Self {
            kind,
            domain: domain.map(|d| d.to_string()),
            timestamp: Utc::now(),
        }
    }
}
