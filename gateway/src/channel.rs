//! Channel registry
//!
//! A channel maps a path prefix to a backend service endpoint with its
//! stream/timeout limits. The registry is built once at startup and is
//! immutable afterwards.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Routing classes recognised by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Wallet,
    Identity,
    Ledger,
    Dns,
    Contracts,
    Proxy,
}

impl ChannelType {
    /// Map the first path segment to a channel.
    pub fn from_path_segment(segment: &str) -> Option<Self> {
        match segment {
            "wallet" => Some(ChannelType::Wallet),
            "identity" => Some(ChannelType::Identity),
            "ledger" => Some(ChannelType::Ledger),
            "dns" => Some(ChannelType::Dns),
            "contracts" => Some(ChannelType::Contracts),
            "proxy" => Some(ChannelType::Proxy),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Wallet => "wallet",
            ChannelType::Identity => "identity",
            ChannelType::Ledger => "ledger",
            ChannelType::Dns => "dns",
            ChannelType::Contracts => "contracts",
            ChannelType::Proxy => "proxy",
        }
    }

    pub fn all() -> &'static [ChannelType] {
        &[
            ChannelType::Wallet,
            ChannelType::Identity,
            ChannelType::Ledger,
            ChannelType::Dns,
            ChannelType::Contracts,
            ChannelType::Proxy,
        ]
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One backend routing entry.
#[derive(Debug, Clone)]
pub struct Channel {
    pub channel_type: ChannelType,
    /// Base URL the dispatcher forwards request bodies to.
    pub service_endpoint: String,
    pub max_streams: u32,
    pub timeout: Duration,
    pub encryption_required: bool,
}

/// Immutable channel lookup table keyed by [`ChannelType`].
#[derive(Debug, Clone)]
pub struct ChannelRegistry {
    channels: HashMap<ChannelType, Channel>,
}

impl ChannelRegistry {
    pub fn new(channels: Vec<Channel>) -> Self {
        let channels = channels
            .into_iter()
            .map(|c| (c.channel_type, c))
            .collect();
        Self { channels }
    }

    pub fn get(&self, channel_type: ChannelType) -> Option<&Channel> {
        self.channels.get(&channel_type)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_segments_map_to_channels() {
        assert_eq!(
            ChannelType::from_path_segment("wallet"),
            Some(ChannelType::Wallet)
        );
        assert_eq!(ChannelType::from_path_segment("dns"), Some(ChannelType::Dns));
        assert_eq!(ChannelType::from_path_segment("zns"), None);
        assert_eq!(ChannelType::from_path_segment(""), None);
    }

    #[test]
    fn registry_lookup() {
        let registry = ChannelRegistry::new(vec![Channel {
            channel_type: ChannelType::Wallet,
            service_endpoint: "http://127.0.0.1:7001".to_string(),
            max_streams: 64,
            timeout: Duration::from_secs(10),
            encryption_required: true,
        }]);
        assert!(registry.get(ChannelType::Wallet).is_some());
        assert!(registry.get(ChannelType::Ledger).is_none());
        assert_eq!(registry.len(), 1);
    }
}
