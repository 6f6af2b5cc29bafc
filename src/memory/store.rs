/*!
 * Keyed Store
 * String-keyed chained hash map allocated from an arena
 *
 * Entries and key text live in the store's arena. Removing a key unlinks
 * its entry; the bytes stay until the store is purged or dropped. The
 * bucket count is fixed at construction and never rehashed, which suits
 * the small configuration-style datasets this map serves.
 */

use super::arena::Arena;
use super::types::ArenaStats;
use crate::core::config::MemoryConfig;
use crate::core::errors::{MemoryError, MemoryResult};
use crate::core::limits::{DEFAULT_BUCKET_COUNT, STORE_HASH_SEEDS};
use ahash::RandomState;
use std::fmt;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};

struct Entry<V> {
    key: NonNull<str>,
    value: V,
    next: Option<NonNull<Entry<V>>>,
}

impl<V> Entry<V> {
    #[inline]
    fn key(&self) -> &str {
        // SAFETY: key text lives in the same arena as the entry
        unsafe { self.key.as_ref() }
    }
}

/// Arena-backed string-keyed map
///
/// # Example
///
/// ```
/// use memory_kernel::memory::KeyedStore;
///
/// let mut store = KeyedStore::new();
/// assert!(store.create("a", 1).unwrap());
/// assert!(!store.create("a", 2).unwrap());
/// assert_eq!(store.get("a"), Some(&1));
/// ```
pub struct KeyedStore<V> {
    arena: Arena,
    buckets: Box<[Option<NonNull<Entry<V>>>]>,
    hasher: RandomState,
    len: usize,
    _marker: PhantomData<V>,
}

// SAFETY: the store exclusively owns every entry reachable from its buckets
unsafe impl<V: Send> Send for KeyedStore<V> {}
unsafe impl<V: Sync> Sync for KeyedStore<V> {}

impl<V> KeyedStore<V> {
    /// Store with the default bucket count and platform page size
    pub fn new() -> Self {
        Self::build(Arena::default(), DEFAULT_BUCKET_COUNT)
    }

    pub fn with_buckets(bucket_count: usize) -> MemoryResult<Self> {
        if bucket_count == 0 {
            return Err(MemoryError::InvalidConfiguration(
                "keyed store needs at least one bucket".into(),
            ));
        }
        Ok(Self::build(Arena::default(), bucket_count))
    }

    pub fn with_config(config: &MemoryConfig) -> MemoryResult<Self> {
        config.validate()?;
        Ok(Self::build(Arena::with_config(config)?, config.bucket_count))
    }

    fn build(arena: Arena, bucket_count: usize) -> Self {
        let [k0, k1, k2, k3] = STORE_HASH_SEEDS;
        Self {
            arena,
            buckets: vec![None; bucket_count].into_boxed_slice(),
            hasher: RandomState::with_seeds(k0, k1, k2, k3),
            len: 0,
            _marker: PhantomData,
        }
    }

    #[inline]
    fn bucket_of(&self, key: &str) -> usize {
        (self.hasher.hash_one(key) % self.buckets.len() as u64) as usize
    }

    fn find(&self, key: &str) -> Option<NonNull<Entry<V>>> {
        let mut cursor = self.buckets[self.bucket_of(key)];
        while let Some(entry) = cursor {
            // SAFETY: linked entries are live until purge
            let current = unsafe { entry.as_ref() };
            if current.key() == key {
                return Some(entry);
            }
            cursor = current.next;
        }
        None
    }

    fn insert_new(&mut self, key: &str, value: V) -> MemoryResult<()> {
        let bucket = self.bucket_of(key);
        let text = NonNull::from(self.arena.duplicate_str(key)?);
        let entry = self.arena.alloc(Entry {
            key: text,
            value,
            next: self.buckets[bucket],
        })?;
        self.buckets[bucket] = Some(NonNull::from(entry));
        self.len += 1;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        // SAFETY: the entry outlives the shared borrow of self
        self.find(key).map(|entry| unsafe { &(*entry.as_ptr()).value })
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        // SAFETY: exclusive borrow of self covers the entry
        self.find(key)
            .map(|entry| unsafe { &mut (*entry.as_ptr()).value })
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.find(key).is_some()
    }

    /// Insert only if `key` is absent; false leaves the store unchanged
    pub fn create(&mut self, key: &str, value: V) -> MemoryResult<bool> {
        if self.find(key).is_some() {
            return Ok(false);
        }
        self.insert_new(key, value)?;
        Ok(true)
    }

    /// Insert or overwrite the payload in place
    pub fn assign(&mut self, key: &str, value: V) -> MemoryResult<bool> {
        match self.find(key) {
            Some(entry) => {
                // SAFETY: exclusive borrow; the old payload is dropped here
                unsafe { (*entry.as_ptr()).value = value };
            }
            None => self.insert_new(key, value)?,
        }
        Ok(true)
    }

    /// Unlink `key` and return its payload
    pub fn remove(&mut self, key: &str) -> Option<V> {
        let bucket = self.bucket_of(key);
        let mut link: *mut Option<NonNull<Entry<V>>> = &mut self.buckets[bucket];

        // SAFETY: link always points at a bucket head or a live entry's
        // `next` field, all owned by this store
        unsafe {
            while let Some(entry) = *link {
                let current = entry.as_ptr();
                if (*current).key() == key {
                    *link = (*current).next;
                    self.len -= 1;
                    // The entry is unreachable from now on; its bytes stay
                    // in the arena
                    return Some(ptr::read(&(*current).value));
                }
                link = &mut (*current).next;
            }
        }
        None
    }

    /// Iterate entries bucket by bucket
    pub fn iter(&self) -> Iter<'_, V> {
        Iter {
            buckets: &self.buckets,
            bucket: 0,
            cursor: None,
            remaining: self.len,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.iter().map(|(key, _)| key)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Drop every payload and release the arena's pages
    pub fn purge(&mut self) {
        self.drop_payloads();
        self.arena.purge();
    }

    pub fn arena_stats(&self) -> ArenaStats {
        self.arena.stats()
    }

    fn drop_payloads(&mut self) {
        for head in self.buckets.iter_mut() {
            let mut cursor = head.take();
            while let Some(entry) = cursor {
                // SAFETY: each linked entry holds a live payload exactly once
                unsafe {
                    cursor = (*entry.as_ptr()).next;
                    ptr::drop_in_place(&mut (*entry.as_ptr()).value);
                }
            }
        }
        self.len = 0;
    }
}

impl<V> Default for KeyedStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Drop for KeyedStore<V> {
    fn drop(&mut self) {
        self.drop_payloads();
    }
}

impl<V: fmt::Debug> fmt::Debug for KeyedStore<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// Forward iterator over a [`KeyedStore`]
pub struct Iter<'a, V> {
    buckets: &'a [Option<NonNull<Entry<V>>>],
    bucket: usize,
    cursor: Option<NonNull<Entry<V>>>,
    remaining: usize,
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = (&'a str, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.cursor {
                // SAFETY: the borrowed store keeps entries alive
                let current: &'a Entry<V> = unsafe { &*entry.as_ptr() };
                self.cursor = current.next;
                self.remaining -= 1;
                return Some((current.key(), &current.value));
            }
            if self.bucket >= self.buckets.len() {
                return None;
            }
            self.cursor = self.buckets[self.bucket];
            self.bucket += 1;
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a, V> IntoIterator for &'a KeyedStore<V> {
    type Item = (&'a str, &'a V);
    type IntoIter = Iter<'a, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
