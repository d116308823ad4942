//! Read-side caching for cacheable read tools.

pub mod backend;
pub mod swr;

pub use backend::{CacheBackend, CacheEntry, MemoryCache, RedisCache};
pub use swr::{CacheLookup, CacheOutcome, SwrCache};
