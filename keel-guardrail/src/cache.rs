//! Decision cache shared by every run using the same service.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use keel_types::GuardrailStage;
use sha2::{Digest, Sha256};
use tokio::time::Instant;

use crate::evaluator::GuardrailDecision;

/// Identifies one `(stage, model, rule, content)` evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    stage: GuardrailStage,
    model: String,
    rule_hash: String,
    content_hash: String,
    content_len: usize,
}

impl CacheKey {
    /// Build a key, hashing rule and content.
    pub fn new(stage: GuardrailStage, model: &str, rule: &str, content: &str) -> Self {
        Self {
            stage,
            model: model.to_string(),
            rule_hash: sha256_hex(rule),
            content_hash: sha256_hex(content),
            content_len: content.len(),
        }
    }
}

fn sha256_hex(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

#[derive(Debug)]
struct CacheEntry {
    decision: GuardrailDecision,
    inserted: Instant,
    hit_count: u64,
}

impl CacheEntry {
    fn score(&self, now: Instant) -> f64 {
        let age_hours = now.duration_since(self.inserted).as_secs_f64() / 3600.0;
        self.hit_count as f64 / (1.0 + age_hours)
    }
}

/// Bounded TTL cache of guardrail decisions.
///
/// Expired entries are dropped on lookup and purged on insert. When the
/// cache is full, the entry with the lowest `hit_count / (1 + age_hours)`
/// score is evicted.
#[derive(Debug)]
pub struct GuardrailCache {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
    ttl: Duration,
    capacity: usize,
}

impl GuardrailCache {
    /// Create a cache.
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            capacity: capacity.max(1),
        }
    }

    /// Look up a live decision, counting the hit.
    pub fn get(&self, key: &CacheKey) -> Option<GuardrailDecision> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let expired = match entries.get_mut(key) {
            None => return None,
            Some(entry) if now.duration_since(entry.inserted) < self.ttl => {
                entry.hit_count += 1;
                return Some(entry.decision.clone());
            }
            Some(_) => true,
        };
        if expired {
            entries.remove(key);
        }
        None
    }

    /// Store a decision, evicting if the cache is full.
    pub fn insert(&self, key: CacheKey, decision: GuardrailDecision) {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        if !entries.contains_key(&key) && entries.len() >= self.capacity {
            let ttl = self.ttl;
            entries.retain(|_, e| now.duration_since(e.inserted) < ttl);
        }
        while !entries.contains_key(&key) && entries.len() >= self.capacity {
            let victim = entries
                .iter()
                .min_by(|(_, a), (_, b)| a.score(now).total_cmp(&b.score(now)))
                .map(|(k, _)| k.clone());
            match victim {
                Some(victim) => {
                    entries.remove(&victim);
                }
                None => break,
            }
        }

        entries.insert(
            key,
            CacheEntry {
                decision,
                inserted: now,
                hit_count: 0,
            },
        );
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
