//! GhostBridge Gateway — library crate
//!
//! Exposes the dispatcher and transport building blocks so that integration
//! tests can construct a gateway without the full production startup
//! ceremony.

pub mod channel;
pub mod config;
pub mod connections;
pub mod dispatch;
pub mod error;
pub mod http2;
pub mod http3;
pub mod lock_utils;
pub mod metrics;
pub mod response_cache;
pub mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use zns::alerts::{AlertChannel, AlertManager, AlertRule};
use zns::metrics::ZnsMetrics;
use zns::resolver::{
    DnsFallbackResolver, EnsResolver, NativeResolver, ResolverSet, UdResolver, UpstreamResolver,
};
use zns::resolver_core::{ResolverConfig as CoreConfig, ResolverCore};
use zns::service::ServiceConfig as ZnsServiceConfig;
use zns::ZnsService;

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::response_cache::ResponseCache;

/// Suffixes routed to the Unstoppable Domains bridge; mirrors the validator
/// suffix table.
const UD_SUFFIXES: &[&str] = &[
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

/// Build the whole ZNS stack from configuration, in deterministic order:
/// resolvers, cache + core, metrics, alerts, then the service facade.
pub fn build_zns_service(
    config: &Config,
    http: reqwest::Client,
) -> anyhow::Result<Arc<ZnsService>> {
    let resolver_timeout = config.resolver.max_resolution_time();

    // Native chain resolver (declined mode when no endpoint configured)
    let native_config = zns::resolver::native::NativeConfig {
        endpoint: config
            .resolver
            .chain_endpoint
            .as_deref()
            .map(|e| e.parse())
            .transpose()
            .context("parsing resolver.chain_endpoint")?,
        trust_anchor: config.resolver.chain_trust_anchor.clone().map(Into::into),
        timeout: resolver_timeout,
    };
    let native = Arc::new(
        NativeResolver::new(native_config).context("initialising native resolver")?,
    );

    let ens: Option<Arc<dyn UpstreamResolver>> = if config.resolver.enable_ens_bridge {
        let mut ens_config = zns::resolver::ens::EnsConfig {
            rpc_url: config.resolver.ens_rpc_url.clone().unwrap_or_default(),
            timeout: resolver_timeout,
            ..Default::default()
        };
        if let Some(registry) = &config.resolver.ens_registry_address {
            ens_config.registry_address = registry.clone();
        }
        Some(Arc::new(EnsResolver::new(ens_config, http.clone())))
    } else {
        None
    };

    let ud: Option<Arc<dyn UpstreamResolver>> = if config.resolver.enable_ud_bridge {
        let mut ud_config = zns::resolver::ud::UdConfig {
            api_key: config.resolver.ud_api_key.clone(),
            timeout: resolver_timeout,
            ..Default::default()
        };
        if let Some(url) = &config.resolver.ud_api_url {
            ud_config.api_url = url.clone();
        }
        Some(Arc::new(UdResolver::new(
            ud_config,
            http.clone(),
            UD_SUFFIXES.iter().map(|s| s.to_string()).collect(),
        )))
    } else {
        None
    };

    let dns_fallback: Option<Arc<dyn UpstreamResolver>> = if config.resolver.enable_dns_fallback
    {
        Some(Arc::new(DnsFallbackResolver::new(resolver_timeout)))
    } else {
        None
    };

    let set = ResolverSet {
        native: native.clone(),
        registrar: native,
        ens,
        ud,
        dns_fallback,
    };

    let metrics = Arc::new(ZnsMetrics::new(
        (config.cache.max_memory_mb * 1024 * 1024) as u64,
    ));

    let core = ResolverCore::new(
        CoreConfig {
            enable_cache: config.resolver.enable_cache,
            verify_signatures: config.resolver.verify_signatures,
            max_resolution_time: resolver_timeout,
            rate_limit_per_window: config.resolver.rate_limit_per_minute,
        },
        config.cache.to_zns(),
        set,
        metrics.clone(),
    );

    let alerts = AlertManager::new(alert_rules(config), http);

    let service = ZnsService::new(
        ZnsServiceConfig {
            enable_subscriptions: config.service.enable_subscriptions,
            enable_cache_events: config.service.enable_cache_events,
            enable_metrics: config.service.enable_metrics,
            enable_alerts: config.service.enable_alerts,
        },
        core,
        metrics,
        alerts,
    );

    Ok(Arc::new(service))
}

fn alert_rules(config: &Config) -> Vec<AlertRule> {
    let mut channels = Vec::new();
    if let Some(url) = &config.alerts.webhook_url {
        channels.push(AlertChannel::Webhook { url: url.clone() });
    }
    if let Some(url) = &config.alerts.slack_webhook_url {
        channels.push(AlertChannel::Slack {
            webhook_url: url.clone(),
        });
    }
    if let Some(to) = &config.alerts.email_to {
        channels.push(AlertChannel::Email { to: to.clone() });
    }

    AlertManager::default_rules()
        .into_iter()
        .map(|mut rule| {
            rule.channels = channels.clone();
            rule
        })
        .collect()
}

/// Build the dispatcher over an existing ZNS service.
pub fn build_dispatcher(
    config: &Config,
    zns_service: Arc<ZnsService>,
    http: reqwest::Client,
) -> Arc<Dispatcher> {
    Arc::new(Dispatcher::new(
        config.channel_registry(),
        zns_service,
        ResponseCache::new(config.response_cache.to_gateway()),
        http,
        config.server.connection_timeout(),
        config.service.max_concurrent_requests,
    ))
}

/// Interval helper for the periodic maintenance loop.
pub fn periodic_interval(config: &Config) -> Duration {
    config.service.periodic_task_interval()
}
