//! Unstoppable Domains bridge resolver
//!
//! Queries the Unstoppable Domains resolution HTTP API and maps the returned
//! key/value record set onto DNS records. Calls are capped at 50 requests per
//! second per process.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use super::{filter_records, RequestGate, UpstreamResolver};
use crate::types::{
    DnsRecord, RecordType, ResolutionSource, ResolveResponse, ZnsError, ZnsErrorCode,
};

/// Process-wide ceiling on outbound UD API calls.
const UD_MAX_RPS: u32 = 50;

/// Crypto address preference order for the WALLET record.
const WALLET_PREFERENCE: &[&str] = &["ETH", "BTC", "LTC", "DOGE"];

/// Default TTL stamped on bridged UD records.
const UD_RECORD_TTL: u32 = 3_600;

#[derive(Debug, Clone)]
pub struct UdConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl Default for UdConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.unstoppabledomains.com".to_string(),
            api_key: None,
            timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Deserialize)]
struct UdReply {
    #[serde(default)]
    records: HashMap<String, String>,
}

/// Resolver for the Unstoppable Domains namespaces (`.crypto`, `.nft`, …).
pub struct UdResolver {
    config: UdConfig,
    http: reqwest::Client,
    gate: RequestGate,
    suffixes: Vec<String>,
}

impl UdResolver {
    pub fn new(config: UdConfig, http: reqwest::Client, suffixes: Vec<String>) -> Self {
        Self {
            config,
            http,
            gate: RequestGate::new(UD_MAX_RPS),
            suffixes,
        }
    }

    fn owns(&self, domain: &str) -> bool {
        let lower = domain.to_ascii_lowercase();
        self.suffixes.iter().any(|s| lower.ends_with(s.as_str()))
    }
}

#[async_trait]
impl UpstreamResolver for UdResolver {
    fn name(&self) -> &'static str {
        "ud"
    }

    fn source(&self) -> ResolutionSource {
        ResolutionSource::UnstoppableBridge
    }

    async fn resolve(
        &self,
        domain: &str,
        record_types: &[RecordType],
    ) -> Option<ResolveResponse> {
        if !self.owns(domain) {
            return None;
        }

        if !self.gate.try_acquire() {
            return Some(ResolveResponse::failed(
                domain,
                self.source(),
                ZnsError::new(
                    ZnsErrorCode::ResolverUnavailable,
                    "UD bridge request budget exhausted",
                ),
            ));
        }

        let url = format!("{}/resolve/domains/{}", self.config.api_url, domain);
        let mut request = self.http.get(&url).timeout(self.config.timeout);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = match request.send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(domain, error = %e, "UD API request failed");
                return Some(ResolveResponse::failed(
                    domain,
                    self.source(),
                    ZnsError::new(
                        ZnsErrorCode::ResolverUnavailable,
                        format!("UD API request failed: {e}"),
                    ),
                ));
            }
        };

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Some(ResolveResponse::failed(
                domain,
                self.source(),
                ZnsError::new(ZnsErrorCode::DomainNotFound, "domain not registered with UD"),
            ));
        }
        if !response.status().is_success() {
            return Some(ResolveResponse::failed(
                domain,
                self.source(),
                ZnsError::new(
                    ZnsErrorCode::ResolverUnavailable,
                    format!("UD API returned status {}", response.status()),
                ),
            ));
        }

        let reply: UdReply = match response.json().await {
            Ok(reply) => reply,
            Err(e) => {
                return Some(ResolveResponse::failed(
                    domain,
                    self.source(),
                    ZnsError::new(
                        ZnsErrorCode::ResolverUnavailable,
                        format!("malformed UD API reply: {e}"),
                    ),
                ))
            }
        };

        let records = filter_records(map_ud_records(domain, &reply.records), record_types);
        debug!(domain, count = records.len(), "UD bridge resolve complete");
        Some(ResolveResponse::ok(domain, records, self.source()))
    }
}

/// Map the UD key/value record set onto DNS records:
///
/// - `dns.A` / `dns.AAAA` → A / AAAA (values may be JSON arrays)
/// - `crypto.<SYM>.address` → a single WALLET record, ETH > BTC > LTC > DOGE
/// - `dweb.ipfs.hash` → CNAME `ipfs://<hash>`
/// - `browser.redirect_url` → CNAME
/// - `social.*` → TXT `key=value`
fn map_ud_records(domain: &str, raw: &HashMap<String, String>) -> Vec<DnsRecord> {
    let mut records = Vec::new();

    for (key, record_type) in [("dns.A", RecordType::A), ("dns.AAAA", RecordType::Aaaa)] {
        if let Some(value) = raw.get(key) {
            for address in split_dns_values(value) {
                records.push(DnsRecord::new(record_type, domain, &address, UD_RECORD_TTL));
            }
        }
    }

    for symbol in WALLET_PREFERENCE {
        let key = format!("crypto.{symbol}.address");
        if let Some(address) = raw.get(&key).filter(|v| !v.is_empty()) {
            records.push(DnsRecord::new(RecordType::Wallet, domain, address, UD_RECORD_TTL));
            break;
        }
    }

    if let Some(hash) = raw.get("dweb.ipfs.hash").filter(|v| !v.is_empty()) {
        records.push(DnsRecord::new(
            RecordType::Cname,
            domain,
            &format!("ipfs://{hash}"),
            UD_RECORD_TTL,
        ));
    }

    if let Some(url) = raw.get("browser.redirect_url").filter(|v| !v.is_empty()) {
        records.push(DnsRecord::new(RecordType::Cname, domain, url, UD_RECORD_TTL));
    }

    let mut social_keys: Vec<&String> = raw
        .keys()
        .filter(|k| k.starts_with("social."))
        .collect();
    social_keys.sort();
    for key in social_keys {
        let value = &raw[key];
        if value.is_empty() {
            continue;
        }
        records.push(DnsRecord::new(
            RecordType::Txt,
            domain,
            &format!("{key}={value}"),
            UD_RECORD_TTL,
        ));
    }

    records
}

/// UD stores DNS values either as plain strings or JSON-encoded arrays.
fn split_dns_values(value: &str) -> Vec<String> {
    if let Ok(list) = serde_json::from_str::<Vec<String>>(value) {
        return list;
    }
    vec![value.to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn maps_dns_records() {
        let records = map_ud_records(
            "brad.crypto",
            &raw(&[("dns.A", r#"["10.0.0.1","10.0.0.2"]"#), ("dns.AAAA", "::1")]),
        );
        let a: Vec<_> = records
            .iter()
            .filter(|r| r.record_type == RecordType::A)
            .collect();
        assert_eq!(a.len(), 2);
        assert!(records.iter().any(|r| r.record_type == RecordType::Aaaa));
    }

    #[test]
    fn wallet_prefers_eth_then_btc() {
        let records = map_ud_records(
            "brad.crypto",
            &raw(&[
                ("crypto.BTC.address", "bc1qbtc"),
                ("crypto.ETH.address", "0xeth"),
                ("crypto.DOGE.address", "Ddoge"),
            ]),
        );
        let wallets: Vec<_> = records
            .iter()
            .filter(|r| r.record_type == RecordType::Wallet)
            .collect();
        assert_eq!(wallets.len(), 1);
        assert_eq!(wallets[0].value, "0xeth");

        let btc_only = map_ud_records("brad.crypto", &raw(&[("crypto.BTC.address", "bc1qbtc")]));
        assert_eq!(btc_only[0].value, "bc1qbtc");
    }

    #[test]
    fn ipfs_and_redirect_become_cnames() {
        let records = map_ud_records(
            "site.nft",
            &raw(&[
                ("dweb.ipfs.hash", "QmHash"),
                ("browser.redirect_url", "https://fallback.example"),
            ]),
        );
        let cnames: Vec<_> = records
            .iter()
            .filter(|r| r.record_type == RecordType::Cname)
            .collect();
        assert_eq!(cnames.len(), 2);
        assert_eq!(cnames[0].value, "ipfs://QmHash");
    }

    #[test]
    fn social_keys_become_txt() {
        let records = map_ud_records(
            "who.x",
            &raw(&[("social.twitter.username", "ghost"), ("social.picture.value", "")]),
        );
        let txt: Vec<_> = records
            .iter()
            .filter(|r| r.record_type == RecordType::Txt)
            .collect();
        assert_eq!(txt.len(), 1);
        assert_eq!(txt[0].value, "social.twitter.username=ghost");
    }
}
