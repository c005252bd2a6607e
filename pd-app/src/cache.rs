//! Decision cache keyed by the exact unread-message set.
//!
//! The key folds in the sorted unread ids, so any change to the unread set
//! lands on a fresh key and old entries simply age out. This is the cost
//! control in front of context assembly and the model call.

use dashmap::DashMap;
use pd_core::{ConversationId, DecisionSource, MessageId, NotificationDecision};
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub decision: NotificationDecision,
    pub source: DecisionSource,
    pub created_at: Instant,
    pub expires_at: Instant,
}

pub struct DecisionCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl DecisionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Expired entries are removed on access and reported as misses.
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let hit = match self.entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.clone()),
            Some(_) => None,
            None => return None,
        };
        if hit.is_none() {
            self.entries.remove(key);
        }
        hit
    }

    /// Last writer wins: near-simultaneous misses for the same unread set
    /// may both compute; results for an identical input set are stable, so
    /// overwriting is preferable to locking the decision path.
    ///
    /// Keys change whenever the unread set changes, so stale keys are never
    /// looked up again; each insert sweeps out expired entries.
    pub fn put(&self, key: String, decision: NotificationDecision, source: DecisionSource) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
        self.entries.insert(
            key,
            CacheEntry {
                decision,
                source,
                created_at: now,
                expires_at: now + self.ttl,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `sha256(conversation_id | sorted unread ids)`, hex-encoded.
pub fn decision_cache_key(conversation_id: &ConversationId, unread_ids: &[MessageId]) -> String {
    let mut ids: Vec<&str> = unread_ids.iter().map(|id| id.as_str()).collect();
    ids.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update(conversation_id.as_str().as_bytes());
    for id in ids {
        hasher.update([0u8]);
        hasher.update(id.as_bytes());
    }
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
