use config::{Config as ConfigLoader, ConfigError, File};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::channel::{Channel, ChannelRegistry, ChannelType};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
    pub cache: CacheConfig,
    #[serde(default)]
    pub response_cache: ResponseCacheConfig,
    pub resolver: ResolverConfig,
    pub service: ServiceConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
}

/// Validation errors for configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Invalid port: {0}")]
    InvalidPort(u16),
    #[error("HTTP/2 and HTTP/3 ports must differ")]
    PortCollision,
    #[error("Invalid max_connections: must be > 0")]
    InvalidMaxConnections,
    #[error("Invalid cache bounds: max_entries and max_memory_mb must be > 0")]
    InvalidCacheBounds,
    #[error("Invalid TTL bounds: min_ttl must not exceed max_ttl")]
    InvalidTtlBounds,
    #[error("Invalid rate limit: must be > 0")]
    InvalidRateLimit,
    #[error("Invalid channel endpoint for {0}: {1}")]
    InvalidChannelEndpoint(String, String),
    #[error("ENS bridge enabled but no RPC URL configured")]
    MissingEnsRpc,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub server_address: String,
    pub http2_port: u16,
    pub http3_port: u16,
    pub cert_file: String,
    pub key_file: String,
    pub max_connections: usize,
    pub connection_timeout_ms: u64,
}

impl ServerConfig {
    pub fn http2_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.server_address, self.http2_port).parse()
    }

    pub fn http3_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.server_address, self.http3_port).parse()
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChannelConfig {
    pub channel_type: ChannelType,
    pub service_endpoint: String,
    pub max_streams: u32,
    pub timeout_ms: u64,
    pub encryption_required: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub max_memory_mb: usize,
    pub default_ttl_secs: u32,
    pub min_ttl_secs: u32,
    pub max_ttl_secs: u32,
    pub cleanup_interval_ms: u64,
    pub eviction_batch_size: usize,
}

impl CacheConfig {
    pub fn to_zns(&self) -> zns::cache::CacheConfig {
        zns::cache::CacheConfig {
            max_entries: self.max_entries,
            max_memory_bytes: self.max_memory_mb * 1024 * 1024,
            default_ttl_secs: self.default_ttl_secs,
            min_ttl_secs: self.min_ttl_secs,
            max_ttl_secs: self.max_ttl_secs,
            cleanup_interval: Duration::from_millis(self.cleanup_interval_ms),
            eviction_batch_size: self.eviction_batch_size,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ResponseCacheConfig {
    pub max_entries: usize,
    pub max_bytes: usize,
    pub ttl_secs: u64,
}

impl Default for ResponseCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 4_096,
            max_bytes: 32 * 1024 * 1024,
            ttl_secs: 30,
        }
    }
}

impl ResponseCacheConfig {
    pub fn to_gateway(&self) -> crate::response_cache::ResponseCacheConfig {
        crate::response_cache::ResponseCacheConfig {
            max_entries: self.max_entries,
            max_bytes: self.max_bytes,
            ttl: Duration::from_secs(self.ttl_secs),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ResolverConfig {
    pub enable_cache: bool,
    pub verify_signatures: bool,
    pub enable_ens_bridge: bool,
    pub enable_ud_bridge: bool,
    pub enable_dns_fallback: bool,
    pub max_resolution_time_ms: u64,
    pub rate_limit_per_minute: u32,
    #[serde(default)]
    pub chain_endpoint: Option<String>,
    #[serde(default)]
    pub chain_trust_anchor: Option<String>,
    #[serde(default)]
    pub ens_rpc_url: Option<String>,
    #[serde(default)]
    pub ens_registry_address: Option<String>,
    #[serde(default)]
    pub ud_api_url: Option<String>,
    #[serde(default)]
    pub ud_api_key: Option<String>,
}

impl ResolverConfig {
    pub fn max_resolution_time(&self) -> Duration {
        Duration::from_millis(self.max_resolution_time_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub enable_subscriptions: bool,
    pub enable_cache_events: bool,
    pub enable_metrics: bool,
    pub enable_alerts: bool,
    pub periodic_task_interval_ms: u64,
    pub max_concurrent_requests: usize,
    pub request_timeout_ms: u64,
}

impl ServiceConfig {
    pub fn periodic_task_interval(&self) -> Duration {
        Duration::from_millis(self.periodic_task_interval_ms)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AlertsConfig {
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub slack_webhook_url: Option<String>,
    #[serde(default)]
    pub email_to: Option<String>,
}

impl Config {
    /// Load configuration from file and environment variables
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (GHOSTBRIDGE_SERVER__HTTP2_PORT, etc.)
    /// 2. Config file specified by GHOSTBRIDGE_CONFIG_PATH
    /// 3. gateway/config.toml
    /// 4. config.toml in current directory
    /// 5. Default values
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_paths(&["config", "gateway/config"])
    }

    pub fn load_from_paths(paths: &[&str]) -> Result<Self, ConfigError> {
        let mut builder = ConfigLoader::builder();

        for path in paths {
            builder = builder.add_source(File::with_name(path).required(false));
        }

        if let Ok(custom_path) = std::env::var("GHOSTBRIDGE_CONFIG_PATH") {
            if Path::new(&custom_path).exists() {
                builder = builder.add_source(File::with_name(&custom_path).required(true));
            }
        }

        builder = builder.add_source(
            config::Environment::with_prefix("GHOSTBRIDGE")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.server.http2_port == 0 {
            return Err(ConfigValidationError::InvalidPort(self.server.http2_port));
        }
        if self.server.http3_port == 0 {
            return Err(ConfigValidationError::InvalidPort(self.server.http3_port));
        }
        if self.server.http2_port == self.server.http3_port {
            return Err(ConfigValidationError::PortCollision);
        }
        if self.server.max_connections == 0 {
            return Err(ConfigValidationError::InvalidMaxConnections);
        }
        if self.cache.max_entries == 0 || self.cache.max_memory_mb == 0 {
            return Err(ConfigValidationError::InvalidCacheBounds);
        }
        if self.cache.min_ttl_secs > self.cache.max_ttl_secs {
            return Err(ConfigValidationError::InvalidTtlBounds);
        }
        if self.resolver.rate_limit_per_minute == 0 {
            return Err(ConfigValidationError::InvalidRateLimit);
        }
        if self.resolver.enable_ens_bridge
            && self
                .resolver
                .ens_rpc_url
                .as_deref()
                .map(str::is_empty)
                .unwrap_or(true)
        {
            return Err(ConfigValidationError::MissingEnsRpc);
        }
        for channel in &self.channels {
            if !channel.service_endpoint.starts_with("http://")
                && !channel.service_endpoint.starts_with("https://")
            {
                return Err(ConfigValidationError::InvalidChannelEndpoint(
                    channel.channel_type.to_string(),
                    channel.service_endpoint.clone(),
                ));
            }
        }
        Ok(())
    }

    /// Load and validate configuration
    pub fn load_and_validate() -> Result<Self, Box<dyn std::error::Error>> {
        let config = Self::load()?;
        config.validate()?;
        Ok(config)
    }

    /// Build the immutable channel registry from the channel list.
    pub fn channel_registry(&self) -> ChannelRegistry {
        ChannelRegistry::new(
            self.channels
                .iter()
                .map(|c| Channel {
                    channel_type: c.channel_type,
                    service_endpoint: c.service_endpoint.clone(),
                    max_streams: c.max_streams,
                    timeout: Duration::from_millis(c.timeout_ms),
                    encryption_required: c.encryption_required,
                })
                .collect(),
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        let channels = ChannelType::all()
            .iter()
            .enumerate()
            .map(|(i, ct)| ChannelConfig {
                channel_type: *ct,
                service_endpoint: format!("http://127.0.0.1:{}", 7001 + i as u16),
                max_streams: 64,
                timeout_ms: 10_000,
                encryption_required: false,
            })
            .collect();

        Self {
            server: ServerConfig {
                server_address: "0.0.0.0".to_string(),
                http2_port: 9090,
                http3_port: 443,
                cert_file: "certs/server.crt".to_string(),
                key_file: "certs/server.key".to_string(),
                max_connections: 10_000,
                connection_timeout_ms: 30_000,
            },
            channels,
            cache: CacheConfig {
                max_entries: 10_000,
                max_memory_mb: 64,
                default_ttl_secs: 3_600,
                min_ttl_secs: 60,
                max_ttl_secs: 86_400,
                cleanup_interval_ms: 300_000,
                eviction_batch_size: 16,
            },
            response_cache: ResponseCacheConfig::default(),
            resolver: ResolverConfig {
                enable_cache: true,
                verify_signatures: true,
                enable_ens_bridge: false,
                enable_ud_bridge: false,
                enable_dns_fallback: true,
                max_resolution_time_ms: 5_000,
                rate_limit_per_minute: 600,
                chain_endpoint: None,
                chain_trust_anchor: None,
                ens_rpc_url: None,
                ens_registry_address: None,
                ud_api_url: None,
                ud_api_key: None,
            },
            service: ServiceConfig {
                enable_subscriptions: true,
                enable_cache_events: true,
                enable_metrics: true,
                enable_alerts: true,
                periodic_task_interval_ms: 10_000,
                max_concurrent_requests: 1_024,
                request_timeout_ms: 30_000,
            },
            alerts: AlertsConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.channel_registry().len(), 6);
    }

    #[test]
    fn port_collision_rejected() {
        let mut config = Config::default();
        config.server.http3_port = config.server.http2_port;
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::PortCollision)
        ));
    }

    #[test]
    fn ttl_bounds_checked() {
        let mut config = Config::default();
        config.cache.min_ttl_secs = 100_000;
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidTtlBounds)
        ));
    }

    #[test]
    fn ens_bridge_requires_rpc() {
        let mut config = Config::default();
        config.resolver.enable_ens_bridge = true;
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::MissingEnsRpc)
        ));
        config.resolver.ens_rpc_url = Some("https://eth.example/rpc".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn channel_endpoints_must_be_http() {
        let mut config = Config::default();
        config.channels[0].service_endpoint = "ftp://nope".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidChannelEndpoint(_, _))
        ));
    }
}
