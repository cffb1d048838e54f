//! # PageLingo
//!
//! 一个用于网页实时翻译的引擎库：遍历HTML文档、按段落切分可翻译文本、
//! 通过LLM聊天补全接口流式翻译，并将结果增量写回文档（对照或替换两种模式），
//! 随时可以取消并完整恢复原文。
//!
//! ## 模块组织
//!
//! - `html` - DOM解析、序列化与样式判定
//! - `pipeline` - 文本收集与段落去重
//! - `storage` - 翻译缓存（持久化段落缓存 + 短期划词缓存）
//! - `net` - 流式聊天补全客户端
//! - `core` - 任务调度器、DOM补丁/恢复引擎、文档翻译服务
//! - `config` - API设置与提示词模板
//! - `messages` - UI边界的封闭消息类型
//! - `error` - 统一错误处理

pub mod cancel;
pub mod config;
pub mod core;
pub mod error;
pub mod html;
pub mod messages;
pub mod net;
pub mod pipeline;
pub mod storage;

// Re-export commonly used items for convenience
pub use crate::config::{ApiSettings, PromptSet, TranslationMode, TranslatorOptions};
pub use crate::core::patcher::PatchEngine;
pub use crate::core::scheduler::{Progress, SchedulerHandle};
pub use crate::core::service::PageTranslator;
pub use crate::error::{TranslateError, TranslateResult};
pub use crate::messages::{ProgressEvent, ProgressSink, UiRequest, UiResponse};
pub use crate::pipeline::collector::{SharedUnit, TextUnit};
pub use crate::storage::cache::{CacheEntry, CacheKey, CacheStore, ClearOutcome, MemoryCacheStore};
