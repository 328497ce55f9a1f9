//! Request validation for ZNS
//!
//! Domain syntax and suffix rules, per-type record checks, Ed25519 signature
//! verification over domain data, and the fixed-window rate limiter consulted
//! before any cache or upstream access.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Mutex;
use std::time::Instant;

use crate::types::{DnsRecord, DomainCategory, DomainData, RecordType, ZnsError, ZnsErrorCode};

/// Maximum total domain length in bytes.
pub const MAX_DOMAIN_LENGTH: usize = 253;

/// Maximum TXT record value length in bytes.
pub const MAX_TXT_LENGTH: usize = 255;

/// Suffixes handled by the native identity services.
const IDENTITY_SUFFIXES: &[&str] = &[".ghost", ".gcc", ".sig", ".gpk", ".key", ".pin"];

/// Suffixes handled by the native infrastructure services.
const INFRASTRUCTURE_SUFFIXES: &[&str] = &[".bc", ".zns", ".ops"];

/// Suffixes bridged to the Ethereum Name Service.
const ENS_SUFFIXES: &[&str] = &[".eth"];

/// Suffixes bridged to Unstoppable Domains.
const UNSTOPPABLE_SUFFIXES: &[&str] = &[
    ".crypto",
    ".nft",
    ".x",
    ".wallet",
    ".bitcoin",
    ".blockchain",
    ".dao",
    ".888",
    ".zil",
];

/// Suffixes accepted on an experimental basis; resolution fans out across
/// every enabled upstream.
const EXPERIMENTAL_SUFFIXES: &[&str] = &[".web3", ".dapp", ".chain", ".zkp", ".test"];

/// Outcome of a per-record validation check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordValidation {
    Valid,
    InvalidFormat,
    InvalidLength,
    UnsupportedType,
    SignatureInvalid,
}

impl RecordValidation {
    pub fn is_valid(&self) -> bool {
        matches!(self, RecordValidation::Valid)
    }
}

// ---------------------------------------------------------------------------
// Domain syntax
// ---------------------------------------------------------------------------

/// Check full domain validity: length bounds, first/last byte, non-empty
/// labels, and a supported suffix.
pub fn is_valid_domain(domain: &str) -> bool {
    if domain.is_empty() || domain.len() > MAX_DOMAIN_LENGTH {
        return false;
    }

    let bytes = domain.as_bytes();
    let first = bytes[0];
    let last = bytes[bytes.len() - 1];
    if first == b'.' || first == b'-' || last == b'.' || last == b'-' {
        return false;
    }

    // Every label must be non-empty
    if domain.split('.').any(|label| label.is_empty()) {
        return false;
    }

    supported_suffix(domain).is_some()
}

/// Syntactic hostname check for record targets (CNAME, NS, MX, SRV, PTR).
///
/// Targets may live outside the ZNS suffix whitelist, so only shape is
/// checked here.
pub fn is_valid_hostname(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_DOMAIN_LENGTH {
        return false;
    }
    let bytes = name.as_bytes();
    if bytes[0] == b'.' || bytes[0] == b'-' {
        return false;
    }
    if bytes[bytes.len() - 1] == b'.' || bytes[bytes.len() - 1] == b'-' {
        return false;
    }
    name.split('.').all(|label| {
        !label.is_empty()
            && label
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    })
}

fn supported_suffix(domain: &str) -> Option<(&'static str, DomainCategory)> {
    let lower = domain.to_ascii_lowercase();
    for group in [
        (IDENTITY_SUFFIXES, DomainCategory::Identity),
        (INFRASTRUCTURE_SUFFIXES, DomainCategory::Infrastructure),
        (ENS_SUFFIXES, DomainCategory::EnsBridge),
        (UNSTOPPABLE_SUFFIXES, DomainCategory::UnstoppableBridge),
        (EXPERIMENTAL_SUFFIXES, DomainCategory::Experimental),
    ] {
        for suffix in group.0 {
            // The suffix must follow a non-empty label
            if lower.ends_with(suffix) && lower.len() > suffix.len() {
                return Some((suffix, group.1));
            }
        }
    }
    None
}

/// Determine the routing category of a domain, first matching suffix group
/// wins. Returns `None` for unsupported suffixes.
pub fn domain_category(domain: &str) -> Option<DomainCategory> {
    supported_suffix(domain).map(|(_, cat)| cat)
}

// ---------------------------------------------------------------------------
// Record checks
// ---------------------------------------------------------------------------

/// Validate a single DNS record against its type-specific rules.
pub fn validate_record(record: &DnsRecord) -> RecordValidation {
    match record.record_type {
        RecordType::A => {
            if record.value.parse::<Ipv4Addr>().is_ok() {
                RecordValidation::Valid
            } else {
                RecordValidation::InvalidFormat
            }
        }
        RecordType::Aaaa => {
            if !record.value.contains(':') {
                return RecordValidation::InvalidFormat;
            }
            if record.value.len() < 2 || record.value.len() > 39 {
                return RecordValidation::InvalidLength;
            }
            RecordValidation::Valid
        }
        RecordType::Cname | RecordType::Ns | RecordType::Ptr => {
            if is_valid_hostname(&record.value) {
                RecordValidation::Valid
            } else {
                RecordValidation::InvalidFormat
            }
        }
        RecordType::Mx => {
            if record.priority.is_none() {
                return RecordValidation::InvalidFormat;
            }
            match &record.target {
                Some(target) if is_valid_hostname(target) => RecordValidation::Valid,
                _ => RecordValidation::InvalidFormat,
            }
        }
        RecordType::Srv => {
            if record.priority.is_none() || record.weight.is_none() || record.port.is_none() {
                return RecordValidation::InvalidFormat;
            }
            match &record.target {
                Some(target) if is_valid_hostname(target) => RecordValidation::Valid,
                _ => RecordValidation::InvalidFormat,
            }
        }
        RecordType::Txt => {
            if record.value.len() > MAX_TXT_LENGTH {
                RecordValidation::InvalidLength
            } else {
                RecordValidation::Valid
            }
        }
        RecordType::Contract | RecordType::Wallet => {
            if is_eth_address(&record.value) {
                RecordValidation::Valid
            } else {
                RecordValidation::InvalidFormat
            }
        }
        RecordType::Ghost | RecordType::Soa => {
            if record.value.is_empty() {
                RecordValidation::InvalidFormat
            } else {
                RecordValidation::Valid
            }
        }
    }
}

/// `0x` followed by exactly 40 hex digits.
fn is_eth_address(value: &str) -> bool {
    value.len() == 42
        && value.starts_with("0x")
        && value[2..].bytes().all(|b| b.is_ascii_hexdigit())
}

// ---------------------------------------------------------------------------
// Signatures
// ---------------------------------------------------------------------------

/// Canonical bytes signed over domain data:
/// `domain | owner | H(records) | last_updated`, where `H` folds each
/// record's `(name, value, ttl)` into SHA-256.
pub fn canonical_domain_bytes(data: &DomainData) -> Vec<u8> {
    let mut records_hasher = Sha256::new();
    for record in &data.records {
        records_hasher.update(record.name.as_bytes());
        records_hasher.update(record.value.as_bytes());
        records_hasher.update(record.ttl.to_be_bytes());
    }
    let records_hash = records_hasher.finalize();

    let mut out = Vec::with_capacity(data.domain.len() + data.owner.len() + 40);
    out.extend_from_slice(data.domain.as_bytes());
    out.extend_from_slice(data.owner.as_bytes());
    out.extend_from_slice(&records_hash);
    out.extend_from_slice(&data.last_updated.timestamp().to_be_bytes());
    out
}

/// Verify the Ed25519 signature carried by domain data against the given
/// public key.
pub fn verify_domain_signature(
    data: &DomainData,
    public_key: &VerifyingKey,
) -> Result<(), ZnsError> {
    let sig_bytes = hex::decode(&data.signature).map_err(|_| {
        ZnsError::new(ZnsErrorCode::SignatureInvalid, "signature is not valid hex")
    })?;
    let signature = Signature::from_slice(&sig_bytes).map_err(|_| {
        ZnsError::new(ZnsErrorCode::SignatureInvalid, "malformed signature bytes")
    })?;

    let message = canonical_domain_bytes(data);
    public_key.verify(&message, &signature).map_err(|_| {
        ZnsError::new(
            ZnsErrorCode::SignatureInvalid,
            "domain data signature verification failed",
        )
    })
}

// ---------------------------------------------------------------------------
// Rate limiting
// ---------------------------------------------------------------------------

/// Fixed-window request counter per client.
///
/// Counters accumulate until `reset_counters()` is called; the periodic task
/// invokes it at every 60-second window boundary. No sliding behaviour.
pub struct RateLimiter {
    counters: Mutex<HashMap<String, u32>>,
    limit_per_window: u32,
    last_reset: Mutex<Instant>,
}

impl RateLimiter {
    pub fn new(limit_per_window: u32) -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
            limit_per_window,
            last_reset: Mutex::new(Instant::now()),
        }
    }

    /// Record one request for `client_id` and report whether it is within
    /// the window ceiling. The counter is incremented even for rejected
    /// requests so the window reflects offered load.
    pub fn is_allowed(&self, client_id: &str) -> bool {
        let mut counters = self
            .counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let count = counters.entry(client_id.to_string()).or_insert(0);
        *count += 1;
        *count <= self.limit_per_window
    }

    /// Clear all per-client counters. Called by the periodic task at window
    /// boundaries.
    pub fn reset_counters(&self) {
        let mut counters = self
            .counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        counters.clear();
        let mut last = self
            .last_reset
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *last = Instant::now();
    }

    /// Seconds since the window last reset.
    pub fn window_age_secs(&self) -> u64 {
        self.last_reset
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .elapsed()
            .as_secs()
    }

    /// Number of distinct clients tracked in the current window.
    pub fn tracked_clients(&self) -> usize {
        self.counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DomainMetadata;
    use chrono::Utc;
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;

    fn record(rt: RecordType, value: &str) -> DnsRecord {
        DnsRecord::new(rt, "test.ghost", value, 600)
    }

    // -- Domain syntax --

    #[test]
    fn valid_domains() {
        assert!(is_valid_domain("alice.ghost"));
        assert!(is_valid_domain("node-1.zns"));
        assert!(is_valid_domain("vitalik.eth"));
        assert!(is_valid_domain("brad.crypto"));
        assert!(is_valid_domain("deep.sub.label.ghost"));
        assert!(is_valid_domain("lab.web3"));
    }

    #[test]
    fn invalid_domains() {
        assert!(!is_valid_domain(""));
        assert!(!is_valid_domain(".ghost"));
        assert!(!is_valid_domain("-alice.ghost"));
        assert!(!is_valid_domain("alice.ghost-"));
        assert!(!is_valid_domain("alice..ghost"));
        assert!(!is_valid_domain("bad.invalidtld"));
        assert!(!is_valid_domain("example.com"));
        // Bare suffix with no label
        assert!(!is_valid_domain("ghost"));
        // Over length budget
        let long = format!("{}.ghost", "a".repeat(260));
        assert!(!is_valid_domain(&long));
    }

    #[test]
    fn categories() {
        assert_eq!(domain_category("alice.ghost"), Some(DomainCategory::Identity));
        assert_eq!(domain_category("peer.bc"), Some(DomainCategory::Infrastructure));
        assert_eq!(domain_category("vitalik.eth"), Some(DomainCategory::EnsBridge));
        assert_eq!(
            domain_category("brad.crypto"),
            Some(DomainCategory::UnstoppableBridge)
        );
        assert_eq!(
            domain_category("lab.web3"),
            Some(DomainCategory::Experimental)
        );
        assert_eq!(domain_category("bad.invalidtld"), None);
    }

    // -- Record checks --

    #[test]
    fn a_record_validation() {
        assert!(validate_record(&record(RecordType::A, "10.0.0.1")).is_valid());
        assert!(validate_record(&record(RecordType::A, "255.255.255.255")).is_valid());
        assert_eq!(
            validate_record(&record(RecordType::A, "256.1.1.1")),
            RecordValidation::InvalidFormat
        );
        assert_eq!(
            validate_record(&record(RecordType::A, "1.2.3")),
            RecordValidation::InvalidFormat
        );
    }

    #[test]
    fn aaaa_record_validation() {
        assert!(validate_record(&record(RecordType::Aaaa, "::1")).is_valid());
        assert!(validate_record(&record(RecordType::Aaaa, "2001:db8::1")).is_valid());
        assert_eq!(
            validate_record(&record(RecordType::Aaaa, "10.0.0.1")),
            RecordValidation::InvalidFormat
        );
        let long = format!("2001:{}", "a".repeat(40));
        assert_eq!(
            validate_record(&record(RecordType::Aaaa, &long)),
            RecordValidation::InvalidLength
        );
    }

    #[test]
    fn mx_requires_priority_and_target() {
        let mut mx = record(RecordType::Mx, "");
        assert_eq!(validate_record(&mx), RecordValidation::InvalidFormat);
        mx.priority = Some(10);
        mx.target = Some("mail.ghostmesh.io".to_string());
        assert!(validate_record(&mx).is_valid());
    }

    #[test]
    fn srv_requires_all_fields() {
        let mut srv = record(RecordType::Srv, "");
        srv.priority = Some(1);
        srv.weight = Some(5);
        assert_eq!(validate_record(&srv), RecordValidation::InvalidFormat);
        srv.port = Some(443);
        srv.target = Some("gw.ghostmesh.io".to_string());
        assert!(validate_record(&srv).is_valid());
    }

    #[test]
    fn txt_length_bound() {
        assert!(validate_record(&record(RecordType::Txt, "hello")).is_valid());
        let long = "x".repeat(256);
        assert_eq!(
            validate_record(&record(RecordType::Txt, &long)),
            RecordValidation::InvalidLength
        );
    }

    #[test]
    fn contract_wallet_addresses() {
        let addr = format!("0x{}", "ab".repeat(20));
        assert!(validate_record(&record(RecordType::Contract, &addr)).is_valid());
        assert!(validate_record(&record(RecordType::Wallet, &addr)).is_valid());
        assert_eq!(
            validate_record(&record(RecordType::Wallet, "0x1234")),
            RecordValidation::InvalidFormat
        );
        assert_eq!(
            validate_record(&record(RecordType::Contract, &format!("0x{}", "zz".repeat(20)))),
            RecordValidation::InvalidFormat
        );
    }

    // -- Signatures --

    fn signed_domain_data(key: &SigningKey) -> DomainData {
        let mut data = DomainData {
            domain: "alice.ghost".to_string(),
            owner: hex::encode(key.verifying_key().as_bytes()),
            records: vec![DnsRecord::new(RecordType::A, "alice.ghost", "10.0.0.1", 600)],
            contract_address: None,
            metadata: DomainMetadata::default(),
            last_updated: Utc::now(),
            expiry: None,
            signature: String::new(),
        };
        let sig = key.sign(&canonical_domain_bytes(&data));
        data.signature = hex::encode(sig.to_bytes());
        data
    }

    #[test]
    fn signature_verifies() {
        let key = SigningKey::generate(&mut OsRng);
        let data = signed_domain_data(&key);
        assert!(verify_domain_signature(&data, &key.verifying_key()).is_ok());
    }

    #[test]
    fn tampered_data_fails_verification() {
        let key = SigningKey::generate(&mut OsRng);
        let mut data = signed_domain_data(&key);
        data.records[0].value = "10.6.6.6".to_string();
        let err = verify_domain_signature(&data, &key.verifying_key()).unwrap_err();
        assert_eq!(err.code, ZnsErrorCode::SignatureInvalid);
    }

    #[test]
    fn wrong_key_fails_verification() {
        let key = SigningKey::generate(&mut OsRng);
        let other = SigningKey::generate(&mut OsRng);
        let data = signed_domain_data(&key);
        assert!(verify_domain_signature(&data, &other.verifying_key()).is_err());
    }

    // -- Rate limiter --

    #[test]
    fn rate_limiter_enforces_ceiling() {
        let limiter = RateLimiter::new(2);
        assert!(limiter.is_allowed("c1"));
        assert!(limiter.is_allowed("c1"));
        assert!(!limiter.is_allowed("c1"));
    }

    #[test]
    fn rate_limiter_isolates_clients() {
        let limiter = RateLimiter::new(1);
        assert!(limiter.is_allowed("c1"));
        assert!(!limiter.is_allowed("c1"));
        assert!(limiter.is_allowed("c2"));
    }

    #[test]
    fn rate_limiter_reset_opens_window() {
        let limiter = RateLimiter::new(1);
        assert!(limiter.is_allowed("c1"));
        assert!(!limiter.is_allowed("c1"));
        limiter.reset_counters();
        assert!(limiter.is_allowed("c1"));
        assert_eq!(limiter.tracked_clients(), 1);
    }
}
