//! Declarative alerting over ZNS metrics
//!
//! Rules pair a predicate over the metrics snapshot with notification
//! channels. A rule fires once when its predicate becomes true and resolves
//! when it becomes false; transitions fan out one notification per channel.

use serde_json::json;
use std::collections::HashSet;
use std::sync::Mutex;
use tracing::{info, warn};

use crate::metrics::{HealthStatus, MetricsSnapshot, ZnsMetrics};

/// Predicates supported by alert rules.
#[derive(Debug, Clone, PartialEq)]
pub enum AlertCondition {
    /// Moving-average error rate exceeds the fraction (0.0..=1.0).
    ErrorRateAbove(f64),
    /// Moving-average resolution time exceeds the threshold in ms.
    ResponseTimeAbove(f64),
    /// Moving-average cache hit rate falls below the fraction.
    CacheHitRateBelow(f64),
    /// Resident memory exceeds the byte threshold.
    MemoryUsageAbove(u64),
    /// Health computation reports degraded or worse.
    HealthDegraded,
}

impl AlertCondition {
    /// Evaluate against a snapshot; returns whether the predicate holds and
    /// the observed value for the notification payload.
    fn check(&self, snapshot: &MetricsSnapshot) -> (bool, f64) {
        match self {
            AlertCondition::ErrorRateAbove(threshold) => {
                (snapshot.error_rate > *threshold, snapshot.error_rate)
            }
            AlertCondition::ResponseTimeAbove(threshold) => (
                snapshot.avg_resolution_ms > *threshold,
                snapshot.avg_resolution_ms,
            ),
            AlertCondition::CacheHitRateBelow(threshold) => (
                snapshot.cache_hit_rate < *threshold,
                snapshot.cache_hit_rate,
            ),
            AlertCondition::MemoryUsageAbove(threshold) => (
                snapshot.memory_bytes > *threshold,
                snapshot.memory_bytes as f64,
            ),
            AlertCondition::HealthDegraded => {
                let degraded = ZnsMetrics::health_for(snapshot) != HealthStatus::Healthy;
                (degraded, if degraded { 1.0 } else { 0.0 })
            }
        }
    }

    fn describe(&self) -> String {
        match self {
            AlertCondition::ErrorRateAbove(t) => format!("error rate above {t:.2}"),
            AlertCondition::ResponseTimeAbove(t) => format!("response time above {t:.0} ms"),
            AlertCondition::CacheHitRateBelow(t) => format!("cache hit rate below {t:.2}"),
            AlertCondition::MemoryUsageAbove(t) => format!("memory usage above {t} bytes"),
            AlertCondition::HealthDegraded => "service health degraded".to_string(),
        }
    }
}

/// Where a rule's notifications go.
#[derive(Debug, Clone)]
pub enum AlertChannel {
    Webhook { url: String },
    Slack { webhook_url: String },
    /// Composed and logged; SMTP delivery is not part of this service.
    Email { to: String },
}

/// A named alert rule.
#[derive(Debug, Clone)]
pub struct AlertRule {
    pub name: String,
    pub condition: AlertCondition,
    pub channels: Vec<AlertChannel>,
}

/// A rule transition produced by an evaluation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertTransition {
    pub rule: String,
    pub firing: bool,
}

/// Evaluates rules and dispatches notifications.
pub struct AlertManager {
    rules: Vec<AlertRule>,
    active: Mutex<HashSet<String>>,
    http: reqwest::Client,
}

impl AlertManager {
    pub fn new(rules: Vec<AlertRule>, http: reqwest::Client) -> Self {
        Self {
            rules,
            active: Mutex::new(HashSet::new()),
            http,
        }
    }

    /// Default rule set mirroring the health thresholds.
    pub fn default_rules() -> Vec<AlertRule> {
        vec![
            AlertRule {
                name: "high-error-rate".to_string(),
                condition: AlertCondition::ErrorRateAbove(0.10),
                channels: Vec::new(),
            },
            AlertRule {
                name: "slow-resolution".to_string(),
                condition: AlertCondition::ResponseTimeAbove(5_000.0),
                channels: Vec::new(),
            },
            AlertRule {
                name: "health-degraded".to_string(),
                condition: AlertCondition::HealthDegraded,
                channels: Vec::new(),
            },
        ]
    }

    /// Evaluate every rule against the snapshot, dispatching notifications
    /// for each transition. Returns the transitions for observability.
    pub async fn evaluate(&self, snapshot: &MetricsSnapshot) -> Vec<AlertTransition> {
        let mut transitions = Vec::new();

        for rule in &self.rules {
            let (holds, observed) = rule.condition.check(snapshot);
            let was_active = self.is_active(&rule.name);

            if holds && !was_active {
                self.set_active(&rule.name, true);
                warn!(alert = %rule.name, observed, "alert firing");
                self.notify(rule, true, observed).await;
                transitions.push(AlertTransition {
                    rule: rule.name.clone(),
                    firing: true,
                });
            } else if !holds && was_active {
                self.set_active(&rule.name, false);
                info!(alert = %rule.name, observed, "alert resolved");
                self.notify(rule, false, observed).await;
                transitions.push(AlertTransition {
                    rule: rule.name.clone(),
                    firing: false,
                });
            }
        }

        transitions
    }

    pub fn active_alerts(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock_active().iter().cloned().collect();
        names.sort();
        names
    }

    async fn notify(&self, rule: &AlertRule, firing: bool, observed: f64) {
        let state = if firing { "firing" } else { "resolved" };
        let message = format!("[{}] {} ({})", state, rule.name, rule.condition.describe());

        for channel in &rule.channels {
            match channel {
                AlertChannel::Webhook { url } => {
                    let payload = json!({
                        "alert": rule.name,
                        "state": state,
                        "condition": rule.condition.describe(),
                        "observed": observed,
                        "timestamp": chrono::Utc::now(),
                    });
                    if let Err(e) = self.http.post(url).json(&payload).send().await {
                        warn!(alert = %rule.name, error = %e, "webhook notification failed");
                    }
                }
                AlertChannel::Slack { webhook_url } => {
                    let payload = json!({ "text": message });
                    if let Err(e) = self.http.post(webhook_url).json(&payload).send().await {
                        warn!(alert = %rule.name, error = %e, "slack notification failed");
                    }
                }
                AlertChannel::Email { to } => {
                    info!(alert = %rule.name, to = %to, message = %message, "email notification composed");
                }
            }
        }
    }

    fn is_active(&self, name: &str) -> bool {
        self.lock_active().contains(name)
    }

    fn set_active(&self, name: &str, active: bool) {
        let mut set = self.lock_active();
        if active {
            set.insert(name.to_string());
        } else {
            set.remove(name);
        }
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> MetricsSnapshot {
        MetricsSnapshot {
            total_queries: 0,
            successful_queries: 0,
            failed_queries: 0,
            cache_hits: 0,
            cache_misses: 0,
            rate_limited: 0,
            qps: 0.0,
            avg_resolution_ms: 0.0,
            cache_hit_rate: 1.0,
            error_rate: 0.0,
            memory_bytes: 0,
            memory_limit_bytes: 0,
            cpu_percent: 0.0,
            open_connections: 0,
            active_subscriptions: 0,
            uptime_secs: 0,
            per_resolver: Default::default(),
            per_error: Default::default(),
            per_tld: Default::default(),
        }
    }

    fn manager(condition: AlertCondition) -> AlertManager {
        AlertManager::new(
            vec![AlertRule {
                name: "test-rule".to_string(),
                condition,
                channels: Vec::new(),
            }],
            reqwest::Client::new(),
        )
    }

    #[tokio::test]
    async fn fires_once_until_resolved() {
        let manager = manager(AlertCondition::ErrorRateAbove(0.1));
        let mut snap = snapshot();
        snap.error_rate = 0.5;

        let first = manager.evaluate(&snap).await;
        assert_eq!(first.len(), 1);
        assert!(first[0].firing);
        assert_eq!(manager.active_alerts(), vec!["test-rule"]);

        // Still firing: no duplicate notification
        let second = manager.evaluate(&snap).await;
        assert!(second.is_empty());

        // Condition clears: resolved transition
        snap.error_rate = 0.0;
        let third = manager.evaluate(&snap).await;
        assert_eq!(third.len(), 1);
        assert!(!third[0].firing);
        assert!(manager.active_alerts().is_empty());
    }

    #[tokio::test]
    async fn cache_hit_rate_condition() {
        let manager = manager(AlertCondition::CacheHitRateBelow(0.5));
        let mut snap = snapshot();
        snap.cache_hit_rate = 0.2;
        assert_eq!(manager.evaluate(&snap).await.len(), 1);
    }

    #[tokio::test]
    async fn memory_condition() {
        let manager = manager(AlertCondition::MemoryUsageAbove(1_000));
        let mut snap = snapshot();
        snap.memory_bytes = 2_000;
        let transitions = manager.evaluate(&snap).await;
        assert!(transitions[0].firing);
    }

    #[tokio::test]
    async fn health_degraded_condition() {
        let manager = manager(AlertCondition::HealthDegraded);
        let mut snap = snapshot();
        snap.error_rate = 0.9;
        assert_eq!(manager.evaluate(&snap).await.len(), 1);
    }
}
