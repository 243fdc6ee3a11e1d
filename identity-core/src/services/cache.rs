//! Key/value cache and revocation-set contracts, plus an in-process implementation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::clock::Clock;

#[async_trait]
pub trait KeyValueCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error>;
    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), anyhow::Error>;
    async fn delete(&self, key: &str) -> Result<(), anyhow::Error>;
    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

/// Durable set of revoked refresh-token ids.
#[async_trait]
pub trait RevocationStore: Send + Sync {
    /// Insert-if-absent. Returns `true` only for the caller that inserted the id.
    async fn revoke(&self, token_id: &str, ttl_seconds: u64) -> Result<bool, anyhow::Error>;
    async fn is_revoked(&self, token_id: &str) -> Result<bool, anyhow::Error>;
}

pub fn revocation_key(token_id: &str) -> String {
    format!("revoked_token:{}", token_id)
}

struct CachedValue {
    value: String,
    expires_at: DateTime<Utc>,
}

/// DashMap-backed cache and revocation set with clock-driven expiry.
pub struct MemoryCache {
    entries: DashMap<String, CachedValue>,
    revoked: DashMap<String, DateTime<Utc>>,
    clock: Arc<dyn Clock>,
    available: AtomicBool,
}

impl MemoryCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            revoked: DashMap::new(),
            clock,
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage: every call fails while unavailable.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn contains_key(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.entries
            .get(key)
            .map(|entry| entry.expires_at > now)
            .unwrap_or(false)
    }

    fn ensure_available(&self) -> Result<(), anyhow::Error> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(anyhow::anyhow!("Memory cache unavailable"))
        }
    }

    fn expiry(&self, ttl_seconds: u64) -> DateTime<Utc> {
        self.clock.now() + Duration::seconds(ttl_seconds.min(i64::MAX as u64) as i64)
    }
}

#[async_trait]
impl KeyValueCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        self.ensure_available()?;
        let now = self.clock.now();
        let value = match self.entries.get(key) {
            Some(entry) if entry.expires_at > now => Some(entry.value.clone()),
            Some(_) => None,
            None => return Ok(None),
        };
        if value.is_none() {
            self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), anyhow::Error> {
        self.ensure_available()?;
        let expires_at = self.expiry(ttl_seconds);
        self.entries.insert(
            key.to_string(),
            CachedValue {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), anyhow::Error> {
        self.ensure_available()?;
        self.entries.remove(key);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        self.ensure_available()
    }
}

#[async_trait]
impl RevocationStore for MemoryCache {
    async fn revoke(&self, token_id: &str, ttl_seconds: u64) -> Result<bool, anyhow::Error> {
        self.ensure_available()?;
        let now = self.clock.now();
        let expires_at = self.expiry(ttl_seconds.max(1));

        let inserted = match self.revoked.entry(revocation_key(token_id)) {
            Entry::Occupied(existing) if *existing.get() > now => false,
            Entry::Occupied(mut stale) => {
                stale.insert(expires_at);
                true
            }
            Entry::Vacant(slot) => {
                slot.insert(expires_at);
                true
            }
        };
        Ok(inserted)
    }

    async fn is_revoked(&self, token_id: &str) -> Result<bool, anyhow::Error> {
        self.ensure_available()?;
        let now = self.clock.now();
        Ok(self
            .revoked
            .get(&revocation_key(token_id))
            .map(|expires_at| *expires_at > now)
            .unwrap_or(false))
    }
}
