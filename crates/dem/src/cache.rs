//! Cache abstractions for fetched byte ranges.
//!
//! Entries are keyed by a string the client derives from the URL and byte
//! range (see [`range_key`]), so the same file can hold many cached pieces.
//!
//! # Implementations
//!
//! - [`MemoryCache`]: In-memory cache with optional size limits
//! - [`NoCache`]: Passthrough implementation that caches nothing

use crate::error::Result;
use std::{
    collections::{HashMap, VecDeque},
    future::Future,
    pin::Pin,
    sync::{Arc, PoisonError, RwLock},
};

/// Future type for cache get operations.
pub type GetFuture<'a> = Pin<Box<dyn Future<Output = Result<Option<Vec<u8>>>> + Send + 'a>>;

/// Future type for cache put/remove operations.
pub type CacheFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Future type for cache contains operations.
pub type ContainsFuture<'a> = Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>>;

/// Cache key for `len` bytes of `url` starting at `offset`.
#[must_use]
pub fn range_key(url: &str, offset: u64, len: u64) -> String {
    format!("{url}#{offset}+{len}")
}

/// A cache for storing fetched data.
pub trait Cache: Send + Sync {
    /// Get data from the cache.
    ///
    /// Returns `Ok(Some(data))` if the data is cached, `Ok(None)` if not cached,
    /// or an error if the cache operation failed.
    fn get(&self, key: &str) -> GetFuture<'_>;

    /// Store data under `key`.
    fn put(&self, key: &str, data: Vec<u8>) -> CacheFuture<'_>;

    /// Check if data exists in the cache without retrieving it.
    fn contains(&self, key: &str) -> ContainsFuture<'_>;

    /// Remove data from the cache.
    fn remove(&self, key: &str) -> CacheFuture<'_>;

    /// Clear all cached data.
    fn clear(&self) -> CacheFuture<'_>;
}

/// A cache that stores nothing.
#[derive(Debug, Clone, Default)]
pub struct NoCache;

impl NoCache {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Cache for NoCache {
    fn get(&self, _key: &str) -> GetFuture<'_> {
        Box::pin(async { Ok(None) })
    }

    fn put(&self, _key: &str, _data: Vec<u8>) -> CacheFuture<'_> {
        Box::pin(async { Ok(()) })
    }

    fn contains(&self, _key: &str) -> ContainsFuture<'_> {
        Box::pin(async { Ok(false) })
    }

    fn remove(&self, _key: &str) -> CacheFuture<'_> {
        Box::pin(async { Ok(()) })
    }

    fn clear(&self) -> CacheFuture<'_> {
        Box::pin(async { Ok(()) })
    }
}

/// An in-memory cache.
///
/// Data lives in a `HashMap` behind a `RwLock`; clones share storage. With a
/// maximum size set, the oldest entries are evicted first once the limit
/// would be exceeded.
#[derive(Debug)]
pub struct MemoryCache {
    data: Arc<RwLock<MemoryCacheInner>>,
    max_size: Option<usize>,
}

#[derive(Debug, Default)]
struct MemoryCacheInner {
    entries: HashMap<String, Vec<u8>>,
    /// Insertion order for eviction.
    order: VecDeque<String>,
    current_size: usize,
}

impl MemoryCacheInner {
    fn remove(&mut self, key: &str) {
        if let Some(data) = self.entries.remove(key) {
            self.current_size -= data.len();
            self.order.retain(|k| k != key);
        }
    }
}

impl MemoryCache {
    /// Create a new memory cache with no size limit.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(MemoryCacheInner::default())),
            max_size: None,
        }
    }

    /// Create a new memory cache with a maximum size in bytes.
    #[must_use]
    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            data: Arc::new(RwLock::new(MemoryCacheInner::default())),
            max_size: Some(max_size),
        }
    }

    /// Current size of cached data in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .current_size
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MemoryCache {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            max_size: self.max_size,
        }
    }
}

impl Cache for MemoryCache {
    fn get(&self, key: &str) -> GetFuture<'_> {
        let result = self
            .data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .get(key)
            .cloned();
        Box::pin(async move { Ok(result) })
    }

    fn put(&self, key: &str, data: Vec<u8>) -> CacheFuture<'_> {
        let key = key.to_string();
        let mut cache = self.data.write().unwrap_or_else(PoisonError::into_inner);

        cache.remove(&key);

        let data_size = data.len();
        if let Some(max_size) = self.max_size {
            while cache.current_size + data_size > max_size {
                let Some(oldest) = cache.order.pop_front() else {
                    break;
                };
                if let Some(old_data) = cache.entries.remove(&oldest) {
                    cache.current_size -= old_data.len();
                }
            }
        }

        cache.entries.insert(key.clone(), data);
        cache.order.push_back(key);
        cache.current_size += data_size;

        Box::pin(async { Ok(()) })
    }

    fn contains(&self, key: &str) -> ContainsFuture<'_> {
        let result = self
            .data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .contains_key(key);
        Box::pin(async move { Ok(result) })
    }

    fn remove(&self, key: &str) -> CacheFuture<'_> {
        self.data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Box::pin(async { Ok(()) })
    }

    fn clear(&self) -> CacheFuture<'_> {
        let mut cache = self.data.write().unwrap_or_else(PoisonError::into_inner);
        cache.entries.clear();
        cache.order.clear();
        cache.current_size = 0;
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_on<F: Future>(f: F) -> F::Output {
        // Simple polling executor for tests.
        use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

        fn dummy_raw_waker() -> RawWaker {
            fn no_op(_: *const ()) {}
            fn clone(_: *const ()) -> RawWaker {
                dummy_raw_waker()
            }
            static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, no_op, no_op, no_op);
            RawWaker::new(std::ptr::null(), &VTABLE)
        }

        #[allow(unsafe_code)]
        let waker = unsafe { Waker::from_raw(dummy_raw_waker()) };
        let mut cx = Context::from_waker(&waker);
        let mut f = std::pin::pin!(f);

        match f.as_mut().poll(&mut cx) {
            Poll::Ready(result) => result,
            Poll::Pending => panic!("cache future unexpectedly pending"),
        }
    }

    #[test]
    fn test_range_key_distinguishes_ranges() {
        let a = range_key("https://example.com/dem.tif", 0, 65536);
        let b = range_key("https://example.com/dem.tif", 65536, 65536);
        assert_ne!(a, b);
        assert_eq!(a, range_key("https://example.com/dem.tif", 0, 65536));
    }

    #[test]
    fn test_no_cache() {
        let cache = NoCache::new();

        block_on(cache.put("a", vec![1, 2, 3])).unwrap();
        assert!(block_on(cache.get("a")).unwrap().is_none());
        assert!(!block_on(cache.contains("a")).unwrap());
    }

    #[test]
    fn test_memory_cache_basic() {
        let cache = MemoryCache::new();
        assert!(cache.is_empty());

        block_on(cache.put("a", vec![1, 2, 3])).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.size(), 3);
        assert_eq!(block_on(cache.get("a")).unwrap(), Some(vec![1, 2, 3]));
        assert!(!block_on(cache.contains("b")).unwrap());

        block_on(cache.remove("a")).unwrap();
        assert!(cache.is_empty());
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_memory_cache_eviction() {
        let cache = MemoryCache::with_max_size(10);

        block_on(cache.put("a", vec![0; 5])).unwrap();
        block_on(cache.put("b", vec![0; 5])).unwrap();
        assert_eq!(cache.size(), 10);

        // Evicts "a", the oldest entry.
        block_on(cache.put("c", vec![0; 3])).unwrap();
        assert_eq!(cache.size(), 8);
        assert!(!block_on(cache.contains("a")).unwrap());
        assert!(block_on(cache.contains("b")).unwrap());
        assert!(block_on(cache.contains("c")).unwrap());
    }

    #[test]
    fn test_memory_cache_oversized_entry() {
        let cache = MemoryCache::with_max_size(4);
        block_on(cache.put("a", vec![0; 2])).unwrap();

        // Larger than the whole budget: everything else goes, the entry stays.
        block_on(cache.put("b", vec![0; 8])).unwrap();
        assert_eq!(cache.len(), 1);
        assert!(block_on(cache.contains("b")).unwrap());
    }

    #[test]
    fn test_memory_cache_update_and_clear() {
        let cache = MemoryCache::new();
        let shared = cache.clone();

        block_on(cache.put("a", vec![1, 2, 3])).unwrap();
        block_on(cache.put("a", vec![1, 2, 3, 4, 5])).unwrap();
        assert_eq!(shared.size(), 5);
        assert_eq!(shared.len(), 1);

        block_on(shared.clear()).unwrap();
        assert!(cache.is_empty());
    }
}
