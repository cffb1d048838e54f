//! 存储管理模块
//!
//! - `cache` - 持久化段落翻译缓存与短期划词缓存

pub mod cache;

pub use cache::{
    CacheEntry, CacheKey, CacheManager, CacheStore, ClearOutcome, MemoryCacheStore, Partitioned,
    SelectionCache,
};
