//! ZNS: the GhostBridge name-resolution subsystem
//!
//! Validates and resolves domain queries through an ordered chain of
//! upstream resolvers (native chain, ENS bridge, Unstoppable Domains bridge,
//! traditional DNS), fronted by a bounded TTL cache and a per-client rate
//! limiter, with pull-based subscriptions and a metrics/alerting surface.
//!
//! The [`service::ZnsService`] facade is the only type the gateway talks to.

pub mod alerts;
pub mod cache;
pub mod metrics;
pub mod resolver;
pub mod resolver_core;
pub mod service;
pub mod subscription;
pub mod types;
pub mod validator;

pub use service::{ServiceConfig, StatusReport, ZnsService};
pub use types::{
    ResolveRequest, ResolveResponse, ZnsError, ZnsErrorCode,
};
