//! Storage for compiled artifacts

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant, SystemTime};

use crate::compiler::Artifact;

/// A cached artifact and the source modification time it was compiled from
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub artifact: Arc<Artifact>,
    pub source_mtime: SystemTime,
}

/// Key/value store for compiled artifacts
///
/// Implementations must tolerate concurrent `get`/`set` of the same key;
/// last writer wins.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Option<CacheEntry>;

    /// Store an entry, optionally expiring after `ttl`
    fn set(&self, key: &str, entry: CacheEntry, ttl: Option<Duration>);

    fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Source modification time recorded for `key`
    fn modified_time(&self, key: &str) -> Option<SystemTime> {
        self.get(key).map(|entry| entry.source_mtime)
    }

    fn flush(&self);
}

/// Stable key for a template identity within this process
pub fn cache_key(kind: &str, identity: &str) -> String {
    let mut hasher = DefaultHasher::new();
    kind.hash(&mut hasher);
    identity.hash(&mut hasher);
    format!("{}:{:016x}", kind, hasher.finish())
}

#[derive(Debug)]
struct Slot {
    entry: CacheEntry,
    expires: Option<Instant>,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.expires.map_or(true, |at| now < at)
    }
}

/// In-process cache store
#[derive(Debug, Default)]
pub struct MemoryCache {
    slots: RwLock<HashMap<String, Slot>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including expired ones not yet evicted
    pub fn len(&self) -> usize {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, key: &str) -> Option<CacheEntry> {
        let now = Instant::now();
        {
            let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
            match slots.get(key) {
                Some(slot) if slot.is_live(now) => return Some(slot.entry.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        // Expired: evict
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, slot| slot.is_live(now));
        None
    }

    fn set(&self, key: &str, entry: CacheEntry, ttl: Option<Duration>) {
        let now = Instant::now();
        let expires = ttl.map(|ttl| now + ttl);
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        // Keys that are never read again would otherwise outlive their TTL.
        slots.retain(|_, slot| slot.is_live(now));
        slots.insert(key.to_string(), Slot { entry, expires });
    }

    fn flush(&self) {
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
