//! Thread-Safe Keyspace with Expiry Support
//!
//! ## Design Decisions
//!
//! 1. **One record per key**: a key's value and its expiry live together in
//!    a single [`Entry`], so no reader can see one without the other.
//! 2. **Sharded locks**: keys are hashed onto 64 shards, each behind its own
//!    `RwLock`. A key always lands on the same shard, which makes every
//!    operation on that key linearizable.
//! 3. **Volatile key index**: each shard also tracks which of its keys carry
//!    an expiry, under the same lock, so the reaper only visits those.
//! 4. **One removal path**: explicit deletes, lazy expiry on read, and reaper
//!    eviction all go through `remove_where`.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │           │
//! │  │ entries │ │ entries │ │ entries │ │ entries │           │
//! │  │ volatile│ │ volatile│ │ volatile│ │ volatile│           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

/// Number of shards for the storage engine.
const NUM_SHARDS: usize = 64;

/// A stored value together with its optional expiry instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub value: Bytes,
    /// When this entry expires (None = never expires)
    pub expires_at: Option<Instant>,
}

impl Entry {
    pub fn new(value: Bytes, expires_at: Option<Instant>) -> Self {
        Self { value, expires_at }
    }

    /// Checks whether the entry had expired by `now`.
    #[inline]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }
}

/// The contents of one shard. Both maps are only touched under the shard lock.
#[derive(Debug, Default)]
struct ShardData {
    entries: HashMap<Bytes, Entry>,
    /// Keys whose entry carries an expiry.
    volatile: HashSet<Bytes>,
}

impl ShardData {
    /// Inserts or fully replaces an entry. Returns `true` if the key is new.
    fn insert(&mut self, key: Bytes, entry: Entry) -> bool {
        if entry.expires_at.is_some() {
            self.volatile.insert(key.clone());
        } else {
            self.volatile.remove(&key);
        }
        self.entries.insert(key, entry).is_none()
    }

    fn remove(&mut self, key: &[u8]) -> Option<Entry> {
        let removed = self.entries.remove(key)?;
        if removed.expires_at.is_some() {
            self.volatile.remove(key);
        }
        Some(removed)
    }

    /// Keys whose expiry is at or before `now`.
    fn due(&self, now: Instant) -> Vec<Bytes> {
        self.volatile
            .iter()
            .filter(|key| {
                self.entries
                    .get(*key)
                    .is_some_and(|entry| entry.is_expired_at(now))
            })
            .cloned()
            .collect()
    }
}

#[derive(Debug, Default)]
struct Shard {
    data: RwLock<ShardData>,
}

impl Shard {
    // Entries are always written whole, so a panic while holding the lock
    // cannot leave a half-updated record behind.
    fn read(&self) -> RwLockReadGuard<'_, ShardData> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ShardData> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Counters describing store activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub keys: u64,
    pub get_ops: u64,
    pub set_ops: u64,
    pub del_ops: u64,
    pub expired: u64,
}

/// The keyspace shared by every connection and the reaper.
///
/// # Example
///
/// ```
/// use emberkv::storage::StorageEngine;
/// use bytes::Bytes;
/// use std::time::Duration;
///
/// let engine = StorageEngine::new();
///
/// engine.set(Bytes::from("name"), Bytes::from("ember"), None);
/// assert_eq!(engine.get(b"name"), Some(Bytes::from("ember")));
///
/// engine.set_with_ttl(Bytes::from("session"), Bytes::from("abc123"), Duration::from_secs(60));
/// assert!(engine.get_entry(b"session").unwrap().expires_at.is_some());
/// ```
pub struct StorageEngine {
    shards: Vec<Shard>,
    key_count: AtomicU64,
    get_count: AtomicU64,
    set_count: AtomicU64,
    del_count: AtomicU64,
    expired_count: AtomicU64,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("shards", &self.shards.len())
            .field("key_count", &self.key_count.load(Ordering::Relaxed))
            .field("expired_count", &self.expired_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine {
    pub fn new() -> Self {
        let shards = (0..NUM_SHARDS).map(|_| Shard::default()).collect();

        Self {
            shards,
            key_count: AtomicU64::new(0),
            get_count: AtomicU64::new(0),
            set_count: AtomicU64::new(0),
            del_count: AtomicU64::new(0),
            expired_count: AtomicU64::new(0),
        }
    }

    #[inline]
    fn shard(&self, key: &[u8]) -> &Shard {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % NUM_SHARDS]
    }

    /// Stores `value` under `key`, replacing any previous value AND expiry.
    ///
    /// Passing `None` for `expires_at` leaves the key persistent even if the
    /// previous entry had a TTL.
    ///
    /// Returns `true` if a new key was created.
    pub fn set(&self, key: Bytes, value: Bytes, expires_at: Option<Instant>) -> bool {
        self.set_count.fetch_add(1, Ordering::Relaxed);

        let is_new = self.shard(&key).write().insert(key, Entry::new(value, expires_at));
        if is_new {
            self.key_count.fetch_add(1, Ordering::Relaxed);
        }
        is_new
    }

    /// Stores `value` with a time-to-live relative to now.
    ///
    /// Returns `None` and stores nothing if the TTL is too large for the
    /// clock, the same way SET rejects such an expiry. Otherwise returns
    /// whether a new key was created.
    pub fn set_with_ttl(&self, key: Bytes, value: Bytes, ttl: Duration) -> Option<bool> {
        let expires_at = Instant::now().checked_add(ttl)?;
        Some(self.set(key, value, Some(expires_at)))
    }

    /// Gets the value for a key.
    ///
    /// An entry whose expiry has passed is treated as absent and removed on
    /// the spot, without waiting for the reaper.
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.get_count.fetch_add(1, Ordering::Relaxed);
        self.get_entry(key).map(|entry| entry.value)
    }

    /// Gets the full entry for a key, including its expiry.
    pub fn get_entry(&self, key: &[u8]) -> Option<Entry> {
        let now = Instant::now();
        {
            let data = self.shard(key).read();
            match data.entries.get(key) {
                Some(entry) if !entry.is_expired_at(now) => return Some(entry.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        self.evict_if_expired(key, now);
        None
    }

    /// Deletes a key. Deleting an absent key is a no-op.
    ///
    /// Returns `true` if the key existed.
    pub fn delete(&self, key: &[u8]) -> bool {
        self.del_count.fetch_add(1, Ordering::Relaxed);
        self.remove_where(key, |_| true).is_some()
    }

    /// Removes `key` only if its entry had expired by `now`.
    ///
    /// The expiry is re-checked under the write lock, so an entry refreshed
    /// by a concurrent SET survives.
    fn evict_if_expired(&self, key: &[u8], now: Instant) -> bool {
        let evicted = self
            .remove_where(key, |entry| entry.is_expired_at(now))
            .is_some();
        if evicted {
            self.expired_count.fetch_add(1, Ordering::Relaxed);
        }
        evicted
    }

    /// The single removal path for every kind of deletion.
    fn remove_where(&self, key: &[u8], pred: impl FnOnce(&Entry) -> bool) -> Option<Entry> {
        let mut data = self.shard(key).write();
        if !data.entries.get(key).is_some_and(pred) {
            return None;
        }

        let removed = data.remove(key);
        if removed.is_some() {
            self.key_count.fetch_sub(1, Ordering::Relaxed);
        }
        removed
    }

    /// Evicts every key whose expiry is at or before `now`.
    ///
    /// Each shard is scanned under its read lock for due keys, which are
    /// then removed one at a time. Returns the number of keys evicted.
    pub fn cleanup_expired(&self, now: Instant) -> u64 {
        let mut cleaned = 0u64;

        for shard in &self.shards {
            let due = shard.read().due(now);
            for key in due {
                if self.evict_if_expired(&key, now) {
                    cleaned += 1;
                }
            }
        }

        cleaned
    }

    /// Number of live keys, including expired keys not yet evicted.
    pub fn len(&self) -> u64 {
        self.key_count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys that currently carry an expiry.
    pub fn volatile_len(&self) -> usize {
        self.shards.iter().map(|s| s.read().volatile.len()).sum()
    }

    pub fn stats(&self) -> StorageStats {
        StorageStats {
            keys: self.key_count.load(Ordering::Relaxed),
            get_ops: self.get_count.load(Ordering::Relaxed),
            set_ops: self.set_count.load(Ordering::Relaxed),
            del_ops: self.del_count.load(Ordering::Relaxed),
            expired: self.expired_count.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn test_set_and_get() {
        let engine = StorageEngine::new();

        assert!(engine.set(b("key"), b("value"), None));
        assert_eq!(engine.get(b"key"), Some(b("value")));
        assert!(!engine.set(b("key"), b("other"), None));
        assert_eq!(engine.get(b"key"), Some(b("other")));
        assert_eq!(engine.len(), 1);
    }

    #[test]
    fn test_get_nonexistent() {
        let engine = StorageEngine::new();
        assert_eq!(engine.get(b"nonexistent"), None);
    }

    #[test]
    fn test_delete() {
        let engine = StorageEngine::new();

        engine.set(b("key"), b("value"), None);
        assert!(engine.delete(b"key"));
        assert_eq!(engine.get(b"key"), None);
        assert!(!engine.delete(b"key"));
        assert!(engine.is_empty());
    }

    #[test]
    fn test_lazy_expiry() {
        let engine = StorageEngine::new();

        engine.set_with_ttl(b("key"), b("value"), Duration::from_millis(50));
        assert_eq!(engine.get(b"key"), Some(b("value")));

        thread::sleep(Duration::from_millis(100));

        assert_eq!(engine.get(b"key"), None);
        assert_eq!(engine.len(), 0);
        assert_eq!(engine.stats().expired, 1);
    }

    #[test]
    fn test_overwrite_clears_expiry() {
        let engine = StorageEngine::new();

        engine.set_with_ttl(b("key"), b("v1"), Duration::from_secs(60));
        assert!(engine.get_entry(b"key").unwrap().expires_at.is_some());
        assert_eq!(engine.volatile_len(), 1);

        engine.set(b("key"), b("v2"), None);
        let entry = engine.get_entry(b"key").unwrap();
        assert_eq!(entry.value, b("v2"));
        assert_eq!(entry.expires_at, None);
        assert_eq!(engine.volatile_len(), 0);
    }

    #[test]
    fn test_ttl_beyond_clock_is_rejected() {
        let engine = StorageEngine::new();
        engine.set(b("key"), b("old"), None);

        assert_eq!(engine.set_with_ttl(b("key"), b("new"), Duration::MAX), None);
        assert_eq!(engine.get(b"key"), Some(b("old")));
        assert_eq!(engine.volatile_len(), 0);

        assert_eq!(engine.set_with_ttl(b("other"), b("v"), Duration::from_secs(1)), Some(true));
    }

    #[test]
    fn test_expiry_in_the_past_is_invisible() {
        let engine = StorageEngine::new();

        engine.set(b("key"), b("value"), Some(Instant::now()));
        assert_eq!(engine.get(b"key"), None);
    }

    #[test]
    fn test_cleanup_expired() {
        let engine = StorageEngine::new();

        engine.set_with_ttl(b("key1"), b("value1"), Duration::from_millis(10));
        engine.set_with_ttl(b("key2"), b("value2"), Duration::from_millis(10));
        engine.set_with_ttl(b("key3"), b("value3"), Duration::from_secs(60));
        engine.set(b("key4"), b("value4"), None);

        thread::sleep(Duration::from_millis(50));

        assert_eq!(engine.cleanup_expired(Instant::now()), 2);
        assert_eq!(engine.len(), 2);
        assert_eq!(engine.volatile_len(), 1);
        assert_eq!(engine.get(b"key3"), Some(b("value3")));
        assert_eq!(engine.get(b"key4"), Some(b("value4")));
        assert_eq!(engine.cleanup_expired(Instant::now()), 0);
    }

    #[test]
    fn test_eviction_spares_refreshed_key() {
        let engine = StorageEngine::new();
        let now = Instant::now();

        engine.set(b("key"), b("old"), Some(now));
        let due = engine.shard(b"key").read().due(now);
        assert_eq!(due, vec![b("key")]);

        // A writer refreshes the key between collection and removal
        engine.set(b("key"), b("new"), None);

        assert!(!engine.evict_if_expired(b"key", now));
        assert_eq!(engine.get(b"key"), Some(b("new")));
    }

    #[test]
    fn test_concurrent_access() {
        let engine = Arc::new(StorageEngine::new());
        let mut handles = vec![];

        for i in 0..10 {
            let engine = Arc::clone(&engine);
            handles.push(thread::spawn(move || {
                for j in 0..100 {
                    let key = format!("key-{}-{}", i, j);
                    engine.set(b(&key), b("value"), None);
                    assert_eq!(engine.get(key.as_bytes()), Some(b("value")));
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(engine.len(), 1000);
    }

    #[test]
    fn test_concurrent_writes_same_key_stay_consistent() {
        let engine = Arc::new(StorageEngine::new());
        let far = Instant::now() + Duration::from_secs(3600);

        let writers: Vec<_> = [("with-ttl", Some(far)), ("persistent", None)]
            .into_iter()
            .map(|(value, expires_at)| {
                let engine = Arc::clone(&engine);
                thread::spawn(move || {
                    for _ in 0..2000 {
                        engine.set(b("shared"), b(value), expires_at);
                    }
                })
            })
            .collect();

        let reader = {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for _ in 0..2000 {
                    if let Some(entry) = engine.get_entry(b"shared") {
                        let has_ttl = entry.expires_at.is_some();
                        assert_eq!(entry.value == b("with-ttl"), has_ttl);
                    }
                }
            })
        };

        for handle in writers {
            handle.join().unwrap();
        }
        reader.join().unwrap();

        let entry = engine.get_entry(b"shared").unwrap();
        assert_eq!(entry.value == b("with-ttl"), entry.expires_at.is_some());
        assert_eq!(engine.len(), 1);
    }
}
