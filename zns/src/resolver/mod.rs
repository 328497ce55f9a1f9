//! Upstream resolver adapters
//!
//! Every upstream implements [`UpstreamResolver`]. The contract:
//!
//! - `None`: not my namespace, the caller tries the next resolver;
//! - `Some(resp)` with `resp.error` set: the resolver owns the namespace but
//!   failed, the caller must NOT try the next resolver;
//! - `Some(resp)` with no error: success.
//!
//! Adapters deep-copy strings into the response, honour the per-call timeout
//! they are constructed with, and retain no memory past the call.

pub mod dns;
pub mod ens;
pub mod native;
pub mod ud;

pub use dns::DnsFallbackResolver;
pub use ens::{namehash, EnsResolver};
pub use native::NativeResolver;
pub use ud::UdResolver;

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::types::{
    RecordType, RegisterRequest, RegisterResponse, ResolutionSource, ResolveResponse,
    UpdateRequest, UpdateResponse, ZnsError,
};

/// Common interface over the native chain resolver and the bridge adapters.
#[async_trait]
pub trait UpstreamResolver: Send + Sync {
    /// Short name used in resolver chains and metrics labels.
    fn name(&self) -> &'static str;

    /// Attribution source stamped into responses from this resolver.
    fn source(&self) -> ResolutionSource;

    async fn resolve(
        &self,
        domain: &str,
        record_types: &[RecordType],
    ) -> Option<ResolveResponse>;
}

/// Write-side backend for domain registration and updates; implemented by
/// the native resolver only.
#[async_trait]
pub trait RegistrarBackend: Send + Sync {
    async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse, ZnsError>;

    async fn update(&self, request: &UpdateRequest) -> Result<UpdateResponse, ZnsError>;
}

/// The configured set of upstream adapters. Disabled bridges are `None`.
#[derive(Clone)]
pub struct ResolverSet {
    pub native: Arc<dyn UpstreamResolver>,
    pub registrar: Arc<dyn RegistrarBackend>,
    pub ens: Option<Arc<dyn UpstreamResolver>>,
    pub ud: Option<Arc<dyn UpstreamResolver>>,
    pub dns_fallback: Option<Arc<dyn UpstreamResolver>>,
}

impl ResolverSet {
    /// Ordered resolver list for a category, preserving the canonical
    /// relative order [native, ens, ud, dns_fallback] with disabled adapters
    /// dropped.
    pub fn ordered_for(
        &self,
        category: crate::types::DomainCategory,
    ) -> Vec<Arc<dyn UpstreamResolver>> {
        use crate::types::DomainCategory::*;
        match category {
            Identity | Infrastructure => {
                let mut chain: Vec<Arc<dyn UpstreamResolver>> = vec![self.native.clone()];
                if let Some(dns) = &self.dns_fallback {
                    chain.push(dns.clone());
                }
                chain
            }
            EnsBridge => match &self.ens {
                Some(ens) => vec![ens.clone()],
                None => self.dns_fallback.iter().cloned().collect(),
            },
            UnstoppableBridge => match &self.ud {
                Some(ud) => vec![ud.clone()],
                None => self.dns_fallback.iter().cloned().collect(),
            },
            Experimental => {
                let mut chain: Vec<Arc<dyn UpstreamResolver>> = vec![self.native.clone()];
                chain.extend(self.ens.iter().cloned());
                chain.extend(self.ud.iter().cloned());
                chain.extend(self.dns_fallback.iter().cloned());
                chain
            }
        }
    }
}

/// Process-wide requests-per-second gate for outbound bridge calls.
///
/// One-second tumbling window; callers that exceed the ceiling are refused
/// until the window rolls over.
pub struct RequestGate {
    state: Mutex<(Instant, u32)>,
    per_second: u32,
}

impl RequestGate {
    pub fn new(per_second: u32) -> Self {
        Self {
            state: Mutex::new((Instant::now(), 0)),
            per_second,
        }
    }

    pub fn try_acquire(&self) -> bool {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = Instant::now();
        if now.duration_since(state.0).as_secs() >= 1 {
            *state = (now, 0);
        }
        if state.1 >= self.per_second {
            return false;
        }
        state.1 += 1;
        true
    }
}

/// Filter records to the requested types; an empty request means all types.
pub(crate) fn filter_records(
    records: Vec<crate::types::DnsRecord>,
    requested: &[RecordType],
) -> Vec<crate::types::DnsRecord> {
    if requested.is_empty() {
        return records;
    }
    records
        .into_iter()
        .filter(|r| requested.contains(&r.record_type))
        .collect()
}
