//! Subscription delivery for domain changes and cache events
//!
//! Pull-based pub/sub: publishers append to bounded per-subscription queues
//! and transport handlers drain them with `get_events`. On overflow the
//! oldest event is dropped; the incoming event is never lost.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use tracing::debug;

use crate::types::{CacheEvent, CacheEventKind, ChangeEvent, RecordType, SubscriptionRequest};

/// Bound on every subscription queue.
pub const MAX_QUEUE_EVENTS: usize = 1_000;

fn subscription_id(client_id: &str, seq: u64) -> String {
    format!("sub_{client_id}_{seq}")
}

fn push_bounded<T>(queue: &mut VecDeque<T>, event: T) {
    if queue.len() == MAX_QUEUE_EVENTS {
        queue.pop_front();
    }
    queue.push_back(event);
}

// ---------------------------------------------------------------------------
// Domain change subscriptions
// ---------------------------------------------------------------------------

/// A client's registration of interest in domain changes.
pub struct DomainSubscription {
    pub id: String,
    pub client_id: String,
    /// Watched domains; empty means wildcard (all domains).
    pub domains: Vec<String>,
    /// Record-type filter; empty means all types.
    pub record_types: Vec<RecordType>,
    pub include_metadata: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    queue: VecDeque<ChangeEvent>,
}

impl DomainSubscription {
    fn accepts(&self, event: &ChangeEvent) -> bool {
        if !self.domains.is_empty() && !self.domains.iter().any(|d| d == &event.domain) {
            return false;
        }
        if self.record_types.is_empty() {
            return true;
        }
        event
            .new_records
            .iter()
            .any(|r| self.record_types.contains(&r.record_type))
    }
}

struct DomainSubsInner {
    subs: HashMap<String, DomainSubscription>,
    /// Domain -> subscription ids watching it.
    by_domain: HashMap<String, HashSet<String>>,
    /// Subscriptions watching everything.
    wildcard: HashSet<String>,
    next_seq: u64,
}

/// Indexes subscriptions by watched domain plus a wildcard bucket.
pub struct DomainSubscriptionManager {
    inner: Mutex<DomainSubsInner>,
}

impl DomainSubscriptionManager {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(DomainSubsInner {
                subs: HashMap::new(),
                by_domain: HashMap::new(),
                wildcard: HashSet::new(),
                next_seq: 0,
            }),
        }
    }

    /// Register a subscription; returns its id.
    pub fn create(&self, request: &SubscriptionRequest, client_id: &str) -> String {
        let mut inner = self.lock();
        inner.next_seq += 1;
        let id = subscription_id(client_id, inner.next_seq);

        if request.domains.is_empty() {
            inner.wildcard.insert(id.clone());
        } else {
            for domain in &request.domains {
                inner
                    .by_domain
                    .entry(domain.clone())
                    .or_default()
                    .insert(id.clone());
            }
        }

        let now = Utc::now();
        inner.subs.insert(
            id.clone(),
            DomainSubscription {
                id: id.clone(),
                client_id: client_id.to_string(),
                domains: request.domains.clone(),
                record_types: request.record_types.clone(),
                include_metadata: request.include_metadata,
                created_at: now,
                last_activity: now,
                queue: VecDeque::new(),
            },
        );
        debug!(subscription = %id, domains = request.domains.len(), "domain subscription created");
        id
    }

    /// Remove a subscription from every index. Returns whether it existed.
    pub fn cancel(&self, id: &str) -> bool {
        let mut inner = self.lock();
        let Some(sub) = inner.subs.remove(id) else {
            return false;
        };
        inner.wildcard.remove(id);
        for domain in &sub.domains {
            if let Some(watchers) = inner.by_domain.get_mut(domain) {
                watchers.remove(id);
                if watchers.is_empty() {
                    inner.by_domain.remove(domain);
                }
            }
        }
        debug!(subscription = %id, "domain subscription cancelled");
        true
    }

    /// Offer a change event to every matching subscriber.
    pub fn publish_change(&self, event: &ChangeEvent) {
        let mut inner = self.lock();

        let mut candidates: HashSet<String> = inner.wildcard.iter().cloned().collect();
        if let Some(watchers) = inner.by_domain.get(&event.domain) {
            candidates.extend(watchers.iter().cloned());
        }

        for id in candidates {
            if let Some(sub) = inner.subs.get_mut(&id) {
                if sub.accepts(event) {
                    push_bounded(&mut sub.queue, event.clone());
                }
            }
        }
    }

    /// Drain up to `max` oldest events from a subscription's queue.
    pub fn get_events(&self, id: &str, max: usize) -> Vec<ChangeEvent> {
        let mut inner = self.lock();
        let Some(sub) = inner.subs.get_mut(id) else {
            return Vec::new();
        };
        sub.last_activity = Utc::now();
        let take = max.min(sub.queue.len());
        sub.queue.drain(..take).collect()
    }

    pub fn count(&self) -> usize {
        self.lock().subs.len()
    }

    /// Queue depth for a subscription, if it exists.
    pub fn queue_depth(&self, id: &str) -> Option<usize> {
        self.lock().subs.get(id).map(|s| s.queue.len())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DomainSubsInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for DomainSubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Cache event subscriptions
// ---------------------------------------------------------------------------

struct CacheSubscription {
    client_id: String,
    hits: bool,
    misses: bool,
    evictions: bool,
    queue: VecDeque<CacheEvent>,
}

impl CacheSubscription {
    fn accepts(&self, kind: CacheEventKind) -> bool {
        match kind {
            CacheEventKind::Hit => self.hits,
            CacheEventKind::Miss => self.misses,
            CacheEventKind::Eviction => self.evictions,
            // Flushes are operationally significant; every subscriber sees them
            CacheEventKind::Flush => true,
        }
    }
}

/// Broadcasts cache events to subscribers that opted into each class.
pub struct CacheSubscriptionManager {
    inner: Mutex<(HashMap<String, CacheSubscription>, u64)>,
}

impl CacheSubscriptionManager {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new((HashMap::new(), 0)),
        }
    }

    pub fn create(&self, hits: bool, misses: bool, evictions: bool, client_id: &str) -> String {
        let mut inner = self.lock();
        inner.1 += 1;
        let id = subscription_id(client_id, inner.1);
        inner.0.insert(
            id.clone(),
            CacheSubscription {
                client_id: client_id.to_string(),
                hits,
                misses,
                evictions,
                queue: VecDeque::new(),
            },
        );
        debug!(subscription = %id, hits, misses, evictions, "cache subscription created");
        id
    }

    /// Subscriptions held by one client.
    pub fn count_for_client(&self, client_id: &str) -> usize {
        self.lock()
            .0
            .values()
            .filter(|s| s.client_id == client_id)
            .count()
    }

    pub fn cancel(&self, id: &str) -> bool {
        self.lock().0.remove(id).is_some()
    }

    pub fn publish(&self, event: &CacheEvent) {
        let mut inner = self.lock();
        for sub in inner.0.values_mut() {
            if sub.accepts(event.kind) {
                push_bounded(&mut sub.queue, event.clone());
            }
        }
    }

    pub fn get_events(&self, id: &str, max: usize) -> Vec<CacheEvent> {
        let mut inner = self.lock();
        let Some(sub) = inner.0.get_mut(id) else {
            return Vec::new();
        };
        let take = max.min(sub.queue.len());
        sub.queue.drain(..take).collect()
    }

    pub fn count(&self) -> usize {
        self.lock().0.len()
    }

    /// Whether any subscriber wants this event class; lets publishers skip
    /// event construction entirely.
    pub fn wants(&self, kind: CacheEventKind) -> bool {
        self.lock().0.values().any(|s| s.accepts(kind))
    }

    fn lock(
        &self,
    ) -> std::sync::MutexGuard<'_, (HashMap<String, CacheSubscription>, u64)> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for CacheSubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChangeEventType, DnsRecord};

    fn updated_event(domain: &str) -> ChangeEvent {
        ChangeEvent {
            domain: domain.to_string(),
            event_type: ChangeEventType::Updated,
            old_records: vec![],
            new_records: vec![DnsRecord::new(
                crate::types::RecordType::A,
                domain,
                "10.0.0.2",
                600,
            )],
            timestamp: Utc::now(),
            transaction_hash: None,
        }
    }

    fn watch(domains: &[&str]) -> SubscriptionRequest {
        SubscriptionRequest {
            domains: domains.iter().map(|d| d.to_string()).collect(),
            record_types: vec![],
            include_metadata: false,
        }
    }

    #[test]
    fn fan_out_to_specific_and_wildcard() {
        let manager = DomainSubscriptionManager::new();
        let sub1 = manager.create(&watch(&["alice.ghost"]), "c1");
        let sub2 = manager.create(&watch(&[]), "c2"); // wildcard

        manager.publish_change(&updated_event("alice.ghost"));

        assert_eq!(manager.get_events(&sub1, 10).len(), 1);
        assert_eq!(manager.get_events(&sub2, 10).len(), 1);
        // Drained exactly once
        assert!(manager.get_events(&sub1, 10).is_empty());
    }

    #[test]
    fn unrelated_domain_not_delivered() {
        let manager = DomainSubscriptionManager::new();
        let sub = manager.create(&watch(&["alice.ghost"]), "c1");
        manager.publish_change(&updated_event("bob.ghost"));
        assert!(manager.get_events(&sub, 10).is_empty());
    }

    #[test]
    fn record_type_filter_applies() {
        let manager = DomainSubscriptionManager::new();
        let sub = manager.create(
            &SubscriptionRequest {
                domains: vec!["alice.ghost".to_string()],
                record_types: vec![crate::types::RecordType::Txt],
                include_metadata: false,
            },
            "c1",
        );
        // Event carries only an A record; TXT-only subscriber skips it
        manager.publish_change(&updated_event("alice.ghost"));
        assert!(manager.get_events(&sub, 10).is_empty());
    }

    #[test]
    fn queue_overflow_drops_oldest() {
        let manager = DomainSubscriptionManager::new();
        let sub = manager.create(&watch(&["alice.ghost"]), "c1");

        for i in 0..(MAX_QUEUE_EVENTS + 5) {
            let mut event = updated_event("alice.ghost");
            event.transaction_hash = Some(format!("0x{i:x}"));
            manager.publish_change(&event);
        }

        assert_eq!(manager.queue_depth(&sub), Some(MAX_QUEUE_EVENTS));
        let events = manager.get_events(&sub, MAX_QUEUE_EVENTS);
        // First five were dropped; the newest survived
        assert_eq!(events.first().unwrap().transaction_hash.as_deref(), Some("0x5"));
        assert_eq!(
            events.last().unwrap().transaction_hash.as_deref(),
            Some(format!("0x{:x}", MAX_QUEUE_EVENTS + 4).as_str())
        );
    }

    #[test]
    fn cancel_removes_all_indexes() {
        let manager = DomainSubscriptionManager::new();
        let sub = manager.create(&watch(&["alice.ghost", "bob.ghost"]), "c1");
        assert!(manager.cancel(&sub));
        assert!(!manager.cancel(&sub));
        manager.publish_change(&updated_event("alice.ghost"));
        assert!(manager.get_events(&sub, 10).is_empty());
        assert_eq!(manager.count(), 0);
    }

    #[test]
    fn subscription_ids_are_unique() {
        let manager = DomainSubscriptionManager::new();
        let a = manager.create(&watch(&[]), "c1");
        let b = manager.create(&watch(&[]), "c1");
        assert_ne!(a, b);
        assert!(a.starts_with("sub_c1_"));
    }

    #[test]
    fn cache_subscription_classes() {
        let manager = CacheSubscriptionManager::new();
        let hits_only = manager.create(true, false, false, "c1");
        let evictions_only = manager.create(false, false, true, "c2");

        manager.publish(&CacheEvent::new(CacheEventKind::Hit, Some("alice.ghost")));
        manager.publish(&CacheEvent::new(CacheEventKind::Eviction, None));

        assert_eq!(manager.get_events(&hits_only, 10).len(), 1);
        assert_eq!(manager.get_events(&evictions_only, 10).len(), 1);
    }

    #[test]
    fn flush_reaches_every_subscriber() {
        let manager = CacheSubscriptionManager::new();
        let sub = manager.create(false, false, false, "c1");
        manager.publish(&CacheEvent::new(CacheEventKind::Flush, None));
        let events = manager.get_events(&sub, 10);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, CacheEventKind::Flush);
    }

    #[test]
    fn wants_reflects_subscriber_interest() {
        let manager = CacheSubscriptionManager::new();
        assert!(!manager.wants(CacheEventKind::Hit));
        manager.create(true, false, false, "c1");
        assert!(manager.wants(CacheEventKind::Hit));
        assert!(!manager.wants(CacheEventKind::Miss));
    }
}
