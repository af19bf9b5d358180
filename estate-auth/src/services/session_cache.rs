//! TTL + LRU cache of credential revocation state, keyed by token hash.
//!
//! The cache is a derived view of the credential store. A miss is always
//! answered from the store, so a cold or cleared cache is only slower,
//! never less correct.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::config::CacheConfig;
use crate::models::{CredentialRecord, TokenType};

/// Projection of a credential's revocation and expiry state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CachedCredential {
    pub jti: Uuid,
    pub principal_id: Uuid,
    pub device_id: Option<Uuid>,
    pub token_type: TokenType,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
}

impl From<&CredentialRecord> for CachedCredential {
    fn from(record: &CredentialRecord) -> Self {
        Self {
            jti: record.jti,
            principal_id: record.principal_id,
            device_id: record.device_id,
            token_type: record.token_type,
            expires_at: record.expires_at,
            revoked: record.is_revoked() || record.is_consumed(),
        }
    }
}

struct Slot {
    state: CachedCredential,
    expires: Instant,
    last_access: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub lookups: u64,
    pub size: usize,
    pub capacity: usize,
    pub ttl_seconds: u64,
    pub hit_rate: f64,
}

pub struct SessionCache {
    entries: DashMap<String, Slot>,
    capacity: usize,
    ttl: Duration,
    clock: AtomicU64,
    hits: AtomicU64,
    lookups: AtomicU64,
}

impl SessionCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: DashMap::with_capacity(capacity.min(65_536)),
            capacity: capacity.max(1),
            ttl,
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            lookups: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.capacity, Duration::from_secs(config.ttl_seconds))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    pub fn get(&self, token_hash: &str) -> Option<CachedCredential> {
        self.lookups.fetch_add(1, Ordering::Relaxed);

        let now = Instant::now();
        {
            let slot = self.entries.get(token_hash)?;
            if slot.expires > now {
                slot.last_access.store(self.tick(), Ordering::Relaxed);
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(slot.state.clone());
            }
        }

        self.entries
            .remove_if(token_hash, |_, slot| slot.expires <= now);
        None
    }

    /// Insert or overwrite with the default TTL.
    pub fn put(&self, token_hash: &str, state: CachedCredential) {
        self.put_with_ttl(token_hash, state, self.ttl);
    }

    /// Insert or overwrite. `ttl` is clamped to the configured TTL.
    pub fn put_with_ttl(&self, token_hash: &str, state: CachedCredential, ttl: Duration) {
        if !self.entries.contains_key(token_hash) && self.entries.len() >= self.capacity {
            self.evict_lru();
        }
        let slot = self.slot(state, ttl);
        self.entries.insert(token_hash.to_string(), slot);
    }

    /// Insert only if no entry exists. Used when repopulating from the store
    /// so a concurrent revocation marker is never overwritten by older state.
    pub fn put_if_absent(&self, token_hash: &str, state: CachedCredential) {
        if self.entries.contains_key(token_hash) {
            return;
        }
        if self.entries.len() >= self.capacity {
            self.evict_lru();
        }
        let slot = self.slot(state, self.ttl);
        self.entries.entry(token_hash.to_string()).or_insert(slot);
    }

    /// Record revocations so warm entries fail immediately.
    pub fn mark_revoked<'a>(&self, records: impl IntoIterator<Item = &'a CredentialRecord>) {
        for record in records {
            let mut state = CachedCredential::from(record);
            state.revoked = true;
            self.put(&record.token_hash, state);
        }
    }

    pub fn invalidate(&self, token_hash: &str) -> bool {
        self.entries.remove(token_hash).is_some()
    }

    pub fn invalidate_all_for_principal(&self, principal_id: Uuid) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, slot| slot.state.principal_id != principal_id);
        before.saturating_sub(self.entries.len())
    }

    /// Load active credentials, newest first, up to capacity. Returns how
    /// many entries were added.
    pub fn warm_up(&self, records: &[CredentialRecord]) -> usize {
        let mut loaded = 0;
        for record in records.iter().filter(|r| r.is_active()) {
            if self.entries.len() >= self.capacity {
                break;
            }
            if !self.entries.contains_key(&record.token_hash) {
                self.put_if_absent(&record.token_hash, CachedCredential::from(record));
                loaded += 1;
            }
        }
        loaded
    }

    /// Drop every expired entry. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, slot| slot.expires > now);
        before.saturating_sub(self.entries.len())
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let lookups = self.lookups.load(Ordering::Relaxed);
        CacheStats {
            hits,
            lookups,
            size: self.entries.len(),
            capacity: self.capacity,
            ttl_seconds: self.ttl.as_secs(),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
        }
    }

    fn slot(&self, state: CachedCredential, ttl: Duration) -> Slot {
        Slot {
            state,
            expires: Instant::now() + ttl.min(self.ttl),
            last_access: AtomicU64::new(self.tick()),
        }
    }

    // Full scan, only reached on insert at capacity. Concurrent inserts can
    // overshoot capacity by a few entries.
    fn evict_lru(&self) {
        let now = Instant::now();
        let mut victim: Option<(String, u64)> = None;
        for entry in self.entries.iter() {
            if entry.expires <= now {
                victim = Some((entry.key().clone(), 0));
                break;
            }
            let access = entry.last_access.load(Ordering::Relaxed);
            if victim.as_ref().map_or(true, |(_, best)| access < *best) {
                victim = Some((entry.key().clone(), access));
            }
        }

        if let Some((key, _)) = victim {
            self.entries.remove(&key);
        }
    }
}
