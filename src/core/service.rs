//! 文档翻译服务
//!
//! `PageTranslator`是按文档构造的显式上下文对象：持有DOM、接口设置、
//! 聊天客户端、缓存、调度器与补丁引擎，替代原始形态里的全局单例。
//! UI边界的请求经`handle`穷尽分发。

use std::rc::Rc;
use std::time::Duration;

use markup5ever_rcdom::{Handle, RcDom};
use url::Url;

use crate::cancel::CancelToken;
use crate::config::{ApiSettings, TranslationMode, TranslatorOptions};
use crate::core::patcher::PatchEngine;
use crate::core::scheduler::{Progress, SchedulerHandle, TaskScheduler};
use crate::error::{TranslateError, TranslateResult};
use crate::html::dom::find_nodes;
use crate::messages::{
    NullProgressSink, ProgressSink, SelectionAnalysis, UiRequest, UiResponse,
};
use crate::net::chat::{ChatClient, ChatRequest, OpenAiChatClient};
use crate::pipeline::collector::TextCollector;
use crate::storage::cache::{
    CacheManager, CacheStore, ClearOutcome, MemoryCacheStore, SelectionCache,
};

/// 按文档构造的翻译服务门面
pub struct PageTranslator {
    dom: RcDom,
    page_url: String,
    settings: ApiSettings,
    client: Rc<dyn ChatClient>,
    cache: CacheManager,
    selection_cache: SelectionCache,
    patcher: Rc<PatchEngine>,
    scheduler: TaskScheduler,
    collector: TextCollector,
}

impl PageTranslator {
    pub fn new(
        dom: RcDom,
        page_url: impl AsRef<str>,
        settings: ApiSettings,
        client: Rc<dyn ChatClient>,
        store: Rc<dyn CacheStore>,
        sink: Rc<dyn ProgressSink>,
        options: TranslatorOptions,
    ) -> Self {
        // 缓存键里的页面URL统一规范化，解析失败时原样使用
        let page_url = match Url::parse(page_url.as_ref()) {
            Ok(url) => url.to_string(),
            Err(_) => page_url.as_ref().to_string(),
        };

        let cache = CacheManager::new(store);
        let patcher = Rc::new(PatchEngine::new(dom.document.clone()));
        let scheduler = TaskScheduler::new(
            Rc::clone(&client),
            cache.clone(),
            Rc::clone(&patcher),
            sink,
            page_url.clone(),
            options.max_concurrent_tasks,
        );
        let selection_cache = SelectionCache::new(
            options.selection_cache_capacity,
            Duration::from_secs(options.selection_cache_ttl_secs),
        );

        Self {
            dom,
            page_url,
            settings,
            client,
            cache,
            selection_cache,
            patcher,
            scheduler,
            collector: TextCollector::new(),
        }
    }

    /// 以内置客户端、内存缓存和空进度接收端构造
    pub fn with_defaults(dom: RcDom, page_url: impl AsRef<str>, settings: ApiSettings) -> Self {
        Self::new(
            dom,
            page_url,
            settings,
            Rc::new(OpenAiChatClient::new()),
            Rc::new(MemoryCacheStore::new()),
            Rc::new(NullProgressSink),
            TranslatorOptions::default(),
        )
    }

    pub fn dom(&self) -> &RcDom {
        &self.dom
    }

    pub fn page_url(&self) -> &str {
        &self.page_url
    }

    /// 调度器控制句柄，可克隆到别的线程上触发stop()
    pub fn scheduler_handle(&self) -> SchedulerHandle {
        self.scheduler.handle().clone()
    }

    pub fn progress(&self) -> Progress {
        self.scheduler.handle().progress()
    }

    /// 整页翻译（对照或替换模式）
    ///
    /// 配置缺失在任何任务启动之前即失败；返回true表示全部段落终结
    /// 且未被停止。
    pub async fn translate_page(
        &self,
        mode: TranslationMode,
        target_lang: &str,
    ) -> TranslateResult<bool> {
        self.settings.validate()?;
        if !mode.is_page_mode() {
            return Err(TranslateError::Config(format!(
                "模式 {} 不适用于整页翻译",
                mode
            )));
        }

        // 上一轮的译文可能还挂在文档上，先还原再提取，保证拿到的是原文
        self.patcher.restore_all();

        let root = self.content_root();
        let units = self.collector.collect_units(&root);
        tracing::info!(
            "开始整页翻译: 模式 {}, 目标语言 {}, {} 个单元",
            mode,
            target_lang,
            units.len()
        );

        Ok(self
            .scheduler
            .run(units, mode, target_lang, &self.settings)
            .await)
    }

    /// 停止当前翻译，幂等
    pub fn stop(&self) {
        self.scheduler.handle().stop();
    }

    /// 恢复页面原文，返回恢复的元素数
    pub fn restore_all(&self) -> usize {
        self.patcher.restore_all()
    }

    /// 清除当前页面的翻译缓存
    ///
    /// 调度器有任务在途时返回Busy而不动缓存，避免清掉正在写入的条目。
    pub async fn clear_cache(
        &self,
        mode: Option<TranslationMode>,
        target_lang: &str,
    ) -> TranslateResult<ClearOutcome> {
        if self.scheduler.handle().running_tasks() > 0 {
            tracing::info!("有翻译任务在途，暂不允许清除缓存");
            return Ok(ClearOutcome::Busy);
        }

        let removed = self.cache.clear(&self.page_url, target_lang, mode).await?;
        tracing::info!("已清除 {} 条翻译缓存", removed);
        Ok(ClearOutcome::Cleared { removed })
    }

    /// 当前页面在该语言下是否存在缓存
    pub async fn has_cache(&self, target_lang: &str) -> TranslateResult<bool> {
        self.cache.has_entries(&self.page_url, target_lang).await
    }

    /// 划词/窗口翻译单段文本
    ///
    /// 划词模式带短期内存缓存；整页模式不适用本接口。
    pub async fn translate_text(
        &self,
        text: &str,
        target_lang: &str,
        mode: TranslationMode,
    ) -> TranslateResult<String> {
        self.settings.validate()?;
        if mode.is_page_mode() {
            return Err(TranslateError::Config(format!(
                "模式 {} 请使用整页翻译接口",
                mode
            )));
        }

        let text = text.trim();
        if text.is_empty() {
            return Ok(String::new());
        }

        if mode == TranslationMode::Selection {
            if let Some(cached) = self.selection_cache.get(text, target_lang) {
                tracing::debug!("划词缓存命中");
                return Ok(cached);
            }
        }

        let request = self.chat_request(self.settings.prompts.render(mode, target_lang), text);
        let stream = self.client.stream_chat(request, CancelToken::new());
        let translation = stream.collect_text().await?.trim().to_string();

        if mode == TranslationMode::Selection && !translation.is_empty() {
            self.selection_cache.put(text, target_lang, &translation);
        }

        Ok(translation)
    }

    /// 高级划词翻译：返回带生词解析的结构化结果
    pub async fn analyze_selection(
        &self,
        text: &str,
        target_lang: &str,
    ) -> TranslateResult<SelectionAnalysis> {
        self.settings.validate()?;

        let request = self.chat_request(self.settings.prompts.render_advanced(target_lang), text);
        let stream = self.client.stream_chat(request, CancelToken::new());
        let raw = stream.collect_text().await?;

        let payload = extract_json_payload(&raw);
        serde_json::from_str(payload)
            .map_err(|error| TranslateError::Parse(format!("高级翻译结果不是有效JSON: {}", error)))
    }

    /// UI边界的统一分发入口
    pub async fn handle(&self, request: UiRequest) -> UiResponse {
        match request {
            UiRequest::TranslatePage { mode, target_lang } => {
                match self.translate_page(mode, &target_lang).await {
                    Ok(success) => UiResponse::PageTranslated { success },
                    Err(error) => UiResponse::Error {
                        message: error.to_string(),
                    },
                }
            }
            UiRequest::StopTranslation => {
                self.stop();
                UiResponse::Stopped
            }
            UiRequest::RestorePage => UiResponse::Restored {
                elements: self.restore_all(),
            },
            UiRequest::ClearCache { mode, target_lang } => {
                match self.clear_cache(mode, &target_lang).await {
                    Ok(ClearOutcome::Busy) => UiResponse::CacheBusy,
                    Ok(ClearOutcome::Cleared { removed }) => UiResponse::CacheCleared { removed },
                    Err(error) => UiResponse::Error {
                        message: error.to_string(),
                    },
                }
            }
            UiRequest::CheckCache { target_lang } => match self.has_cache(&target_lang).await {
                Ok(exists) => UiResponse::CacheStatus { exists },
                Err(error) => UiResponse::Error {
                    message: error.to_string(),
                },
            },
            UiRequest::TranslateText {
                text,
                target_lang,
                mode,
            } => match self.translate_text(&text, &target_lang, mode).await {
                Ok(text) => UiResponse::Translation { text },
                Err(error) => UiResponse::Error {
                    message: error.to_string(),
                },
            },
            UiRequest::AnalyzeSelection { text, target_lang } => {
                match self.analyze_selection(&text, &target_lang).await {
                    Ok(analysis) => UiResponse::SelectionAnalysis(analysis),
                    Err(error) => UiResponse::Error {
                        message: error.to_string(),
                    },
                }
            }
        }
    }

    fn chat_request(&self, system_prompt: String, user_text: &str) -> ChatRequest {
        ChatRequest {
            endpoint: self.settings.api_endpoint.clone(),
            api_key: self.settings.api_key.clone(),
            model: self.settings.model.clone(),
            system_prompt,
            user_text: user_text.to_string(),
        }
    }

    /// 提取的根：body存在时从body开始，否则整个文档
    fn content_root(&self) -> Handle {
        find_nodes(&self.dom.document, vec!["body"])
            .into_iter()
            .next()
            .unwrap_or_else(|| self.dom.document.clone())
    }
}

/// 剥掉模型答复里可能包着JSON的```围栏
fn extract_json_payload(content: &str) -> &str {
    let trimmed = content.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        if let Some(end) = rest.rfind("```") {
            return rest[..end].trim();
        }
        return rest.trim();
    }
    trimmed
}
