//! 翻译缓存模块
//!
//! 持久化缓存按(页面URL, 原文, 目标语言, 模式)四元组存取，条目一经写入
//! 不再改动，只能显式清除，没有自动过期。与之相对的划词缓存是纯内存的
//! 短命缓存，固定时间后过期。
//!
//! 存取接口是异步键值契约，宿主可以接任意后端；内置的内存实现供测试
//! 与默认场景使用。

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::LocalBoxFuture;
use lru::LruCache;
use serde::{Deserialize, Serialize};

use crate::config::TranslationMode;
use crate::error::TranslateResult;
use crate::pipeline::collector::SharedUnit;
use crate::pipeline::dedup::dedup_units;

// ============================================================================
// 键与条目
// ============================================================================

/// 持久化缓存键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub page_url: String,
    pub source_text: String,
    pub target_lang: String,
    pub mode: TranslationMode,
}

impl CacheKey {
    pub fn new(
        page_url: impl Into<String>,
        source_text: impl Into<String>,
        target_lang: impl Into<String>,
        mode: TranslationMode,
    ) -> Self {
        Self {
            page_url: page_url.into(),
            source_text: source_text.into(),
            target_lang: target_lang.into(),
            mode,
        }
    }

    /// 生成存储层使用的散列键
    pub fn storage_key(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.page_url.as_bytes());
        hasher.update(&[0x1f]);
        hasher.update(self.source_text.as_bytes());
        hasher.update(&[0x1f]);
        hasher.update(self.target_lang.as_bytes());
        hasher.update(&[0x1f]);
        hasher.update(self.mode.as_str().as_bytes());
        hasher.finalize().to_hex().to_string()
    }
}

/// 缓存条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub translation: String,
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(translation: impl Into<String>) -> Self {
        Self {
            translation: translation.into(),
            created_at: Utc::now(),
        }
    }
}

// ============================================================================
// 异步存储契约
// ============================================================================

/// 存储操作的future别名；存储契约对象安全，DOM侧代码均为单线程
pub type StoreFuture<'a, T> = LocalBoxFuture<'a, TranslateResult<T>>;

/// 持久化缓存的异步键值契约
pub trait CacheStore {
    /// 读取条目
    fn get(&self, key: &CacheKey) -> StoreFuture<'_, Option<CacheEntry>>;

    /// 写入条目（后写覆盖）
    fn set(&self, key: &CacheKey, entry: CacheEntry) -> StoreFuture<'_, ()>;

    /// 删除匹配(页面, 语言[, 模式])的全部条目，返回删除数量
    fn remove_matching(
        &self,
        page_url: &str,
        target_lang: &str,
        mode: Option<TranslationMode>,
    ) -> StoreFuture<'_, usize>;

    /// 页面在该语言下是否存在任何条目
    fn contains_for_page(&self, page_url: &str, target_lang: &str) -> StoreFuture<'_, bool>;
}

/// 内存键值存储
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: DashMap<String, (CacheKey, CacheEntry)>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, key: &CacheKey) -> StoreFuture<'_, Option<CacheEntry>> {
        let storage_key = key.storage_key();
        Box::pin(async move {
            Ok(self
                .entries
                .get(&storage_key)
                .map(|record| record.value().1.clone()))
        })
    }

    fn set(&self, key: &CacheKey, entry: CacheEntry) -> StoreFuture<'_, ()> {
        let storage_key = key.storage_key();
        let key = key.clone();
        Box::pin(async move {
            self.entries.insert(storage_key, (key, entry));
            Ok(())
        })
    }

    fn remove_matching(
        &self,
        page_url: &str,
        target_lang: &str,
        mode: Option<TranslationMode>,
    ) -> StoreFuture<'_, usize> {
        let page_url = page_url.to_string();
        let target_lang = target_lang.to_string();
        Box::pin(async move {
            let before = self.entries.len();
            self.entries.retain(|_, (key, _)| {
                let matches = key.page_url == page_url
                    && key.target_lang == target_lang
                    && mode.map_or(true, |m| key.mode == m);
                !matches
            });
            Ok(before - self.entries.len())
        })
    }

    fn contains_for_page(&self, page_url: &str, target_lang: &str) -> StoreFuture<'_, bool> {
        let page_url = page_url.to_string();
        let target_lang = target_lang.to_string();
        Box::pin(async move {
            Ok(self
                .entries
                .iter()
                .any(|record| {
                    let key = &record.value().0;
                    key.page_url == page_url && key.target_lang == target_lang
                }))
        })
    }
}

// ============================================================================
// 缓存管理器
// ============================================================================

/// 清缓存的结构化结果：有任务在途时拒绝而不是报错
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearOutcome {
    /// 已清除，removed为删除的条目数
    Cleared { removed: usize },
    /// 调度器有任务在途，暂不允许
    Busy,
}

/// 分拣结果：命中缓存的单元已带上译文
pub struct Partitioned {
    pub hits: Vec<SharedUnit>,
    pub misses: Vec<SharedUnit>,
}

/// 缓存管理器：去重、分拣命中/未命中、终态写入
pub struct CacheManager {
    store: std::rc::Rc<dyn CacheStore>,
}

impl CacheManager {
    pub fn new(store: std::rc::Rc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// 去重后逐单元查缓存：命中者直接写入译文，未命中者进入任务队列
    pub async fn partition(
        &self,
        units: Vec<SharedUnit>,
        page_url: &str,
        target_lang: &str,
        mode: TranslationMode,
    ) -> Partitioned {
        let unique = dedup_units(units);
        let mut hits = Vec::new();
        let mut misses = Vec::new();

        for unit in unique {
            let key = CacheKey::new(
                page_url,
                unit.borrow().original_text.clone(),
                target_lang,
                mode,
            );
            match self.store.get(&key).await {
                Ok(Some(entry)) => {
                    unit.borrow_mut().translated_text = entry.translation;
                    hits.push(unit);
                }
                Ok(None) => misses.push(unit),
                Err(error) => {
                    // 缓存故障退化为未命中，不阻塞翻译
                    tracing::warn!("读取翻译缓存失败: {}", error);
                    misses.push(unit);
                }
            }
        }

        tracing::debug!("缓存分拣: 命中 {} / 未命中 {}", hits.len(), misses.len());
        Partitioned { hits, misses }
    }

    /// 写入终态译文；只在流式翻译完整结束且未取消时调用
    pub async fn write_entry(
        &self,
        page_url: &str,
        source_text: &str,
        translation: &str,
        target_lang: &str,
        mode: TranslationMode,
    ) -> TranslateResult<()> {
        let key = CacheKey::new(page_url, source_text, target_lang, mode);
        self.store.set(&key, CacheEntry::new(translation)).await
    }

    /// 清除匹配条目，返回删除数量；忙闲检查由调用方负责
    pub async fn clear(
        &self,
        page_url: &str,
        target_lang: &str,
        mode: Option<TranslationMode>,
    ) -> TranslateResult<usize> {
        self.store.remove_matching(page_url, target_lang, mode).await
    }

    /// 页面是否已有缓存
    pub async fn has_entries(&self, page_url: &str, target_lang: &str) -> TranslateResult<bool> {
        self.store.contains_for_page(page_url, target_lang).await
    }

    pub fn store(&self) -> &std::rc::Rc<dyn CacheStore> {
        &self.store
    }
}

impl Clone for CacheManager {
    fn clone(&self) -> Self {
        Self {
            store: std::rc::Rc::clone(&self.store),
        }
    }
}

// ============================================================================
// 划词缓存
// ============================================================================

/// 短期划词翻译缓存：LRU容量上限 + 固定过期时间
pub struct SelectionCache {
    entries: Mutex<LruCache<String, (String, Instant)>>,
    ttl: Duration,
}

impl SelectionCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    fn cache_key(text: &str, target_lang: &str) -> String {
        format!("{}\u{1f}{}", target_lang, text)
    }

    /// 取未过期的条目；过期条目顺手移除
    pub fn get(&self, text: &str, target_lang: &str) -> Option<String> {
        let key = Self::cache_key(text, target_lang);
        let mut entries = self.entries.lock().unwrap();

        let fresh = match entries.get(&key) {
            Some((translation, stored_at)) if stored_at.elapsed() < self.ttl => {
                Some(translation.clone())
            }
            Some(_) => None,
            None => return None,
        };

        if fresh.is_none() {
            entries.pop(&key);
        }
        fresh
    }

    pub fn put(&self, text: &str, target_lang: &str, translation: &str) {
        let key = Self::cache_key(text, target_lang);
        self.entries
            .lock()
            .unwrap()
            .put(key, (translation.to_string(), Instant::now()));
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(text: &str) -> CacheKey {
        CacheKey::new(
            "https://example.com/page",
            text,
            "zh-CN",
            TranslationMode::Replace,
        )
    }

    #[tokio::test]
    async fn test_store_basic_operations() {
        let store = MemoryCacheStore::new();

        store.set(&key("hello"), CacheEntry::new("你好")).await.unwrap();
        let entry = store.get(&key("hello")).await.unwrap().unwrap();
        assert_eq!(entry.translation, "你好");
        assert!(store.get(&key("world")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_storage_key_distinguishes_mode_and_lang() {
        let base = key("text");
        let mut other_mode = base.clone();
        other_mode.mode = TranslationMode::Compare;
        let mut other_lang = base.clone();
        other_lang.target_lang = "ja".to_string();

        assert_ne!(base.storage_key(), other_mode.storage_key());
        assert_ne!(base.storage_key(), other_lang.storage_key());
        assert_eq!(base.storage_key(), key("text").storage_key());
    }

    #[tokio::test]
    async fn test_remove_matching_scopes_by_mode() {
        let store = MemoryCacheStore::new();
        store.set(&key("a"), CacheEntry::new("甲")).await.unwrap();
        store.set(&key("b"), CacheEntry::new("乙")).await.unwrap();

        let mut compare_key = key("c");
        compare_key.mode = TranslationMode::Compare;
        store.set(&compare_key, CacheEntry::new("丙")).await.unwrap();

        let removed = store
            .remove_matching(
                "https://example.com/page",
                "zh-CN",
                Some(TranslationMode::Replace),
            )
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.len(), 1);

        // None清除剩余所有模式
        let removed = store
            .remove_matching("https://example.com/page", "zh-CN", None)
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_selection_cache_expires() {
        let cache = SelectionCache::new(16, Duration::from_millis(30));
        cache.put("hello", "zh-CN", "你好");
        assert_eq!(cache.get("hello", "zh-CN"), Some("你好".to_string()));

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(cache.get("hello", "zh-CN"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_selection_cache_is_lang_scoped() {
        let cache = SelectionCache::new(16, Duration::from_secs(60));
        cache.put("hello", "zh-CN", "你好");
        assert_eq!(cache.get("hello", "ja"), None);
    }
}
