//! ENS bridge resolver
//!
//! Resolves `.eth` names through an Ethereum JSON-RPC endpoint: the registry
//! is asked for the name's resolver contract, then `addr`, a fixed set of
//! `text` keys, and `contenthash` are read from it. Calls are capped at 100
//! requests per second per process.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use sha3::{Digest, Keccak256};
use std::time::Duration;
use tracing::{debug, warn};

use super::{filter_records, RequestGate, UpstreamResolver};
use crate::types::{
    DnsRecord, RecordType, ResolutionSource, ResolveResponse, ZnsError, ZnsErrorCode,
};

/// Mainnet ENS registry address.
const DEFAULT_REGISTRY: &str = "0x00000000000C2E074eC69A0dFb2997BA6C7d2e1e";

/// Process-wide ceiling on outbound ENS RPC calls.
const ENS_MAX_RPS: u32 = 100;

/// Function selectors: `resolver(bytes32)`, `addr(bytes32)`,
/// `text(bytes32,string)`, `contenthash(bytes32)`.
const SEL_RESOLVER: &str = "0178b8bf";
const SEL_ADDR: &str = "3b3b57de";
const SEL_TEXT: &str = "59d1d43c";
const SEL_CONTENTHASH: &str = "bc1c58d1";

/// Text record keys read from the resolver contract, in order. The `dns.*`
/// keys map to address records; the rest become TXT `key=value` pairs.
const TEXT_KEYS: &[&str] = &[
    "dns.A",
    "dns.AAAA",
    "avatar",
    "url",
    "com.twitter",
    "com.github",
    "description",
];

/// Default TTL stamped on bridged ENS records.
const ENS_RECORD_TTL: u32 = 3_600;

#[derive(Debug, Clone)]
pub struct EnsConfig {
    pub rpc_url: String,
    pub registry_address: String,
    pub timeout: Duration,
}

impl Default for EnsConfig {
    fn default() -> Self {
        Self {
            rpc_url: String::new(),
            registry_address: DEFAULT_REGISTRY.to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Deserialize)]
struct RpcReply {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    message: String,
}

/// Resolver for the `.eth` namespace.
pub struct EnsResolver {
    config: EnsConfig,
    http: reqwest::Client,
    gate: RequestGate,
}

impl EnsResolver {
    pub fn new(config: EnsConfig, http: reqwest::Client) -> Self {
        Self {
            config,
            http,
            gate: RequestGate::new(ENS_MAX_RPS),
        }
    }

    /// `eth_call` against `to` with the given calldata, returning the raw
    /// hex result (without the `0x` prefix).
    async fn eth_call(&self, to: &str, data: String) -> Result<String, ZnsError> {
        if !self.gate.try_acquire() {
            return Err(ZnsError::new(
                ZnsErrorCode::ResolverUnavailable,
                "ENS bridge request budget exhausted",
            ));
        }

        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_call",
            "params": [{"to": to, "data": format!("0x{data}")}, "latest"],
        });

        let send = self
            .http
            .post(&self.config.rpc_url)
            .json(&body)
            .timeout(self.config.timeout)
            .send();

        let response = send.await.map_err(|e| {
            ZnsError::new(
                ZnsErrorCode::ResolverUnavailable,
                format!("ENS RPC request failed: {e}"),
            )
        })?;

        let reply: RpcReply = response.json().await.map_err(|e| {
            ZnsError::new(
                ZnsErrorCode::ResolverUnavailable,
                format!("malformed ENS RPC reply: {e}"),
            )
        })?;

        if let Some(err) = reply.error {
            return Err(ZnsError::new(ZnsErrorCode::ResolverUnavailable, err.message));
        }

        Ok(reply
            .result
            .unwrap_or_default()
            .trim_start_matches("0x")
            .to_string())
    }

    async fn resolver_address(&self, node: &[u8; 32]) -> Result<Option<String>, ZnsError> {
        let data = format!("{SEL_RESOLVER}{}", hex::encode(node));
        let result = self
            .eth_call(&self.config.registry_address, data)
            .await?;
        Ok(decode_address(&result))
    }

    async fn lookup_addr(&self, resolver: &str, node: &[u8; 32]) -> Option<String> {
        let data = format!("{SEL_ADDR}{}", hex::encode(node));
        match self.eth_call(resolver, data).await {
            Ok(result) => decode_address(&result),
            Err(e) => {
                debug!(error = %e, "ENS addr lookup failed");
                None
            }
        }
    }

    async fn lookup_text(&self, resolver: &str, node: &[u8; 32], key: &str) -> Option<String> {
        let data = format!("{SEL_TEXT}{}{}", hex::encode(node), encode_string_arg(key));
        match self.eth_call(resolver, data).await {
            Ok(result) => decode_string(&result),
            Err(e) => {
                debug!(key, error = %e, "ENS text lookup failed");
                None
            }
        }
    }

    async fn lookup_contenthash(&self, resolver: &str, node: &[u8; 32]) -> Option<String> {
        let data = format!("{SEL_CONTENTHASH}{}", hex::encode(node));
        match self.eth_call(resolver, data).await {
            Ok(result) => decode_bytes(&result).filter(|b| !b.is_empty()).map(hex::encode),
            Err(_) => None,
        }
    }
}

#[async_trait]
impl UpstreamResolver for EnsResolver {
    fn name(&self) -> &'static str {
        "ens"
    }

    fn source(&self) -> ResolutionSource {
        ResolutionSource::EnsBridge
    }

    async fn resolve(
        &self,
        domain: &str,
        record_types: &[RecordType],
    ) -> Option<ResolveResponse> {
        if !domain.to_ascii_lowercase().ends_with(".eth") {
            return None;
        }

        let node = namehash(domain);

        let resolver = match self.resolver_address(&node).await {
            Ok(Some(addr)) => addr,
            Ok(None) => {
                return Some(ResolveResponse::failed(
                    domain,
                    self.source(),
                    ZnsError::new(
                        ZnsErrorCode::DomainNotFound,
                        "no ENS resolver configured for name",
                    ),
                ))
            }
            Err(err) => {
                warn!(domain, error = %err, "ENS registry lookup failed");
                return Some(ResolveResponse::failed(domain, self.source(), err));
            }
        };

        let mut records = Vec::new();

        if let Some(addr) = self.lookup_addr(&resolver, &node).await {
            records.push(DnsRecord::new(RecordType::Wallet, domain, &addr, ENS_RECORD_TTL));
        }

        for key in TEXT_KEYS {
            let Some(value) = self.lookup_text(&resolver, &node, key).await else {
                continue;
            };
            if value.is_empty() {
                continue;
            }
            let record = match *key {
                "dns.A" => DnsRecord::new(RecordType::A, domain, &value, ENS_RECORD_TTL),
                "dns.AAAA" => DnsRecord::new(RecordType::Aaaa, domain, &value, ENS_RECORD_TTL),
                _ => DnsRecord::new(
                    RecordType::Txt,
                    domain,
                    &format!("{key}={value}"),
                    ENS_RECORD_TTL,
                ),
            };
            records.push(record);
        }

        if let Some(hash) = self.lookup_contenthash(&resolver, &node).await {
            records.push(DnsRecord::new(
                RecordType::Txt,
                domain,
                &format!("contenthash=0x{hash}"),
                ENS_RECORD_TTL,
            ));
        }

        let records = filter_records(records, record_types);
        debug!(domain, count = records.len(), "ENS bridge resolve complete");
        Some(ResolveResponse::ok(domain, records, self.source()))
    }
}

// ---------------------------------------------------------------------------
// Namehash + ABI helpers
// ---------------------------------------------------------------------------

/// Standard ENS namehash: recursive Keccak-256 over labels in reverse order,
/// starting from the 32-zero-byte root node.
pub fn namehash(domain: &str) -> [u8; 32] {
    let mut node = [0u8; 32];
    if domain.is_empty() {
        return node;
    }
    for label in domain.rsplit('.') {
        let label_hash: [u8; 32] = Keccak256::digest(label.as_bytes()).into();
        let mut hasher = Keccak256::new();
        hasher.update(node);
        hasher.update(label_hash);
        node = hasher.finalize().into();
    }
    node
}

/// ABI-encode a single dynamic string argument placed after one static
/// 32-byte argument (offset 0x40).
fn encode_string_arg(value: &str) -> String {
    let mut out = String::new();
    out.push_str(&format!("{:064x}", 0x40));
    out.push_str(&format!("{:064x}", value.len()));
    let mut data = hex::encode(value.as_bytes());
    while data.len() % 64 != 0 {
        data.push('0');
    }
    out.push_str(&data);
    out
}

/// Decode an ABI address word; `None` for the zero address or short data.
fn decode_address(result: &str) -> Option<String> {
    if result.len() < 64 {
        return None;
    }
    let addr = &result[24..64];
    if addr.bytes().all(|b| b == b'0') {
        return None;
    }
    Some(format!("0x{addr}"))
}

/// Decode an ABI-encoded dynamic string return value.
fn decode_string(result: &str) -> Option<String> {
    let bytes = decode_bytes(result)?;
    String::from_utf8(bytes).ok()
}

/// Decode ABI-encoded dynamic bytes: offset word, length word, payload.
fn decode_bytes(result: &str) -> Option<Vec<u8>> {
    let raw = hex::decode(result).ok()?;
    if raw.len() < 64 {
        return None;
    }
    let offset = u64::from_be_bytes(raw[24..32].try_into().ok()?) as usize;
    if raw.len() < offset + 32 {
        return None;
    }
    let len = u64::from_be_bytes(raw[offset + 24..offset + 32].try_into().ok()?) as usize;
    let start = offset + 32;
    if raw.len() < start + len {
        return None;
    }
    Some(raw[start..start + len].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namehash_known_vectors() {
        // Root node
        assert_eq!(namehash(""), [0u8; 32]);

        // eth: well-known constant from the ENS specification
        assert_eq!(
            hex::encode(namehash("eth")),
            "93cdeb708b7545dc668eb9280176169d1c33cfd8ed6f04690a0bcc88a93fc4ae"
        );

        // vitalik.eth
        assert_eq!(
            hex::encode(namehash("vitalik.eth")),
            "ee6c4522aab0003e8d14cd40a6af439055fd2577951148c14b6cea9a53475835"
        );
    }

    #[test]
    fn decode_address_words() {
        let word = format!("{:0>24}{}", "", "d8da6bf26964af9d7eed9e03e53415d37aa96045");
        assert_eq!(
            decode_address(&word),
            Some("0xd8da6bf26964af9d7eed9e03e53415d37aa96045".to_string())
        );
        let zero = "0".repeat(64);
        assert_eq!(decode_address(&zero), None);
        assert_eq!(decode_address("abc"), None);
    }

    #[test]
    fn string_arg_roundtrip() {
        let encoded = encode_string_arg("avatar");
        // offset + length + one padded word
        assert_eq!(encoded.len(), 64 + 64 + 64);
        assert!(encoded.starts_with(&format!("{:064x}", 0x40)));

        // Simulate a return payload: offset 0x20, length, data
        let mut ret = String::new();
        ret.push_str(&format!("{:064x}", 0x20));
        ret.push_str(&format!("{:064x}", 5));
        let mut data = hex::encode("hello");
        while data.len() % 64 != 0 {
            data.push('0');
        }
        ret.push_str(&data);
        assert_eq!(decode_string(&ret), Some("hello".to_string()));
    }

    #[test]
    fn decode_bytes_rejects_truncated() {
        assert_eq!(decode_bytes(""), None);
        assert_eq!(decode_bytes(&"0".repeat(64)), None);
    }
}
