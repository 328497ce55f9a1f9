//! Traditional DNS fallback resolver
//!
//! Last-resort adapter: recursive DNS via hickory-resolver. Declines
//! (`None`) on NXDOMAIN so the core reports `DOMAIN_NOT_FOUND`; network
//! failures surface as owned errors since nothing runs after the fallback.

use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::TokioAsyncResolver;
use std::time::Duration;
use tracing::debug;

use super::{filter_records, UpstreamResolver};
use crate::types::{
    DnsRecord, RecordType, ResolutionSource, ResolveResponse, ZnsError, ZnsErrorCode,
};

/// TTL stamped on fallback answers; recursive resolvers do not expose the
/// authoritative TTL uniformly through the lookup API.
const FALLBACK_RECORD_TTL: u32 = 300;

pub struct DnsFallbackResolver {
    resolver: TokioAsyncResolver,
    timeout: Duration,
}

impl DnsFallbackResolver {
    /// Build from system configuration, falling back to public recursive
    /// resolvers when `/etc/resolv.conf` is unavailable.
    pub fn new(timeout: Duration) -> Self {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|_| {
            TokioAsyncResolver::tokio(ResolverConfig::google(), ResolverOpts::default())
        });
        Self { resolver, timeout }
    }

    async fn lookup(
        &self,
        domain: &str,
        record_types: &[RecordType],
    ) -> Result<Vec<DnsRecord>, ZnsError> {
        let mut records = Vec::new();
        let want = |t: RecordType| record_types.is_empty() || record_types.contains(&t);

        if want(RecordType::A) || want(RecordType::Aaaa) {
            match self.resolver.lookup_ip(domain).await {
                Ok(lookup) => {
                    for ip in lookup.iter() {
                        let record_type = if ip.is_ipv4() {
                            RecordType::A
                        } else {
                            RecordType::Aaaa
                        };
                        records.push(DnsRecord::new(
                            record_type,
                            domain,
                            &ip.to_string(),
                            FALLBACK_RECORD_TTL,
                        ));
                    }
                }
                Err(e) => match e.kind() {
                    ResolveErrorKind::NoRecordsFound { .. } => {}
                    _ => {
                        return Err(ZnsError::new(
                            ZnsErrorCode::ResolverUnavailable,
                            format!("DNS lookup failed: {e}"),
                        ))
                    }
                },
            }
        }

        if want(RecordType::Txt) {
            if let Ok(lookup) = self.resolver.txt_lookup(domain).await {
                for txt in lookup.iter() {
                    let value = txt
                        .iter()
                        .map(|part| String::from_utf8_lossy(part).into_owned())
                        .collect::<Vec<_>>()
                        .join("");
                    records.push(DnsRecord::new(
                        RecordType::Txt,
                        domain,
                        &value,
                        FALLBACK_RECORD_TTL,
                    ));
                }
            }
        }

        Ok(records)
    }
}

#[async_trait]
impl UpstreamResolver for DnsFallbackResolver {
    fn name(&self) -> &'static str {
        "dns_fallback"
    }

    fn source(&self) -> ResolutionSource {
        ResolutionSource::TraditionalDns
    }

    async fn resolve(
        &self,
        domain: &str,
        record_types: &[RecordType],
    ) -> Option<ResolveResponse> {
        let lookup = self.lookup(domain, record_types);
        let result = match tokio::time::timeout(self.timeout, lookup).await {
            Ok(result) => result,
            Err(_) => {
                return Some(ResolveResponse::failed(
                    domain,
                    self.source(),
                    ZnsError::new(
                        ZnsErrorCode::Timeout,
                        format!("DNS fallback exceeded {} ms", self.timeout.as_millis()),
                    ),
                ))
            }
        };

        match result {
            Ok(records) if records.is_empty() => None,
            Ok(records) => {
                let records = filter_records(records, record_types);
                debug!(domain, count = records.len(), "DNS fallback answered");
                Some(ResolveResponse::ok(domain, records, self.source()))
            }
            Err(err) => Some(ResolveResponse::failed(domain, self.source(), err)),
        }
    }
}
