//! 集成测试公共设施
//!
//! 提供HTML夹具、脚本化的模拟聊天客户端和事件收集器。
#![allow(dead_code)]

use std::collections::HashSet;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use markup5ever_rcdom::RcDom;
use tokio::sync::mpsc;

use pagelingo::cancel::CancelToken;
use pagelingo::config::{ApiSettings, TranslatorOptions};
use pagelingo::html::dom::html_to_dom;
use pagelingo::messages::{ProgressEvent, ProgressSink};
use pagelingo::net::chat::{ChatClient, ChatRequest, ChatStream};
use pagelingo::storage::cache::MemoryCacheStore;
use pagelingo::{PageTranslator, TranslateError};

pub const PAGE_URL: &str = "https://example.com/article";

fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

// ============================================================================
// HTML夹具
// ============================================================================

pub fn build_dom(html: &str) -> RcDom {
    html_to_dom(html.as_bytes(), String::new())
}

/// 三段文本的简单页面（场景A/B/C的基础）
pub fn three_paragraph_page() -> &'static str {
    "<html><body>\
     <p>The quick brown fox.</p>\
     <p>Jumps over the lazy dog.</p>\
     <p>And runs far away.</p>\
     </body></html>"
}

/// 五段文本的页面（停止场景）
pub fn five_paragraph_page() -> &'static str {
    "<html><body>\
     <p>Paragraph number one.</p>\
     <p>Paragraph number two.</p>\
     <p>Paragraph number three.</p>\
     <p>Paragraph number four.</p>\
     <p>Paragraph number five.</p>\
     </body></html>"
}

/// 含重复段落的页面（去重场景）
pub fn duplicated_paragraph_page() -> &'static str {
    "<html><body>\
     <p>Repeated footer text.</p>\
     <p>Unique body text.</p>\
     <p>Repeated footer text.</p>\
     </body></html>"
}

// ============================================================================
// 模拟聊天客户端
// ============================================================================

struct MockState {
    prefix: String,
    delta_delay: Mutex<Duration>,
    requests: Mutex<Vec<String>>,
    fail_texts: Mutex<HashSet<String>>,
    blocked_texts: Mutex<HashSet<String>>,
    canned: Mutex<std::collections::HashMap<String, String>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

/// 脚本化的聊天客户端：译文 = 前缀 + 原文，按两个增量推送
///
/// 可以指定某些原文失败或一直阻塞到取消，用于错误隔离与停止场景；
/// 同时统计请求次数和并发峰值。
#[derive(Clone)]
pub struct MockChatClient {
    state: Arc<MockState>,
}

impl MockChatClient {
    pub fn new() -> Self {
        Self {
            state: Arc::new(MockState {
                prefix: "译:".to_string(),
                delta_delay: Mutex::new(Duration::from_millis(0)),
                requests: Mutex::new(Vec::new()),
                fail_texts: Mutex::new(HashSet::new()),
                blocked_texts: Mutex::new(HashSet::new()),
                canned: Mutex::new(std::collections::HashMap::new()),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
            }),
        }
    }

    /// 每个增量之间的延迟，让流在时间上可观察
    pub fn with_delta_delay(self, delay: Duration) -> Self {
        *self.state.delta_delay.lock().unwrap() = delay;
        self
    }

    /// 指定原文在推送一个增量后以流错误终止
    pub fn fail_on(self, text: &str) -> Self {
        self.state.fail_texts.lock().unwrap().insert(text.to_string());
        self
    }

    /// 指定原文返回固定的完整答复（用于结构化结果场景）
    pub fn respond_with(self, text: &str, response: &str) -> Self {
        self.state
            .canned
            .lock()
            .unwrap()
            .insert(text.to_string(), response.to_string());
        self
    }

    /// 指定原文的流一直无增量，直到取消令牌触发
    pub fn block_on(self, text: &str) -> Self {
        self.state
            .blocked_texts
            .lock()
            .unwrap()
            .insert(text.to_string());
        self
    }

    /// 发出过的请求总数
    pub fn request_count(&self) -> usize {
        self.state.requests.lock().unwrap().len()
    }

    /// 指定原文被请求的次数
    pub fn requests_for(&self, text: &str) -> usize {
        self.state
            .requests
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.as_str() == text)
            .count()
    }

    /// 同时在途请求的峰值
    pub fn max_active(&self) -> usize {
        self.state.max_active.load(Ordering::SeqCst)
    }

    pub fn expected_translation(&self, text: &str) -> String {
        format!("{}{}", self.state.prefix, text)
    }
}

impl Default for MockChatClient {
    fn default() -> Self {
        Self::new()
    }
}

fn split_in_two(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() < 2 {
        return vec![text.to_string()];
    }
    let mid = chars.len() / 2;
    vec![
        chars[..mid].iter().collect(),
        chars[mid..].iter().collect(),
    ]
}

impl ChatClient for MockChatClient {
    fn stream_chat(&self, request: ChatRequest, cancel: CancelToken) -> ChatStream {
        let (tx, rx) = mpsc::channel(32);
        let state = Arc::clone(&self.state);
        state.requests.lock().unwrap().push(request.user_text.clone());

        tokio::spawn(async move {
            let active = state.active.fetch_add(1, Ordering::SeqCst) + 1;
            state.max_active.fetch_max(active, Ordering::SeqCst);

            feed_stream(&state, request, cancel, tx).await;

            state.active.fetch_sub(1, Ordering::SeqCst);
        });

        ChatStream::from_receiver(rx)
    }
}

async fn feed_stream(
    state: &MockState,
    request: ChatRequest,
    cancel: CancelToken,
    tx: mpsc::Sender<Result<String, TranslateError>>,
) {
    let text = request.user_text;

    if state.blocked_texts.lock().unwrap().contains(&text) {
        cancel.cancelled().await;
        return;
    }

    let should_fail = state.fail_texts.lock().unwrap().contains(&text);
    let translation = match state.canned.lock().unwrap().get(&text) {
        Some(canned) => canned.clone(),
        None => format!("{}{}", state.prefix, text),
    };
    let deltas = split_in_two(&translation);
    let delay = *state.delta_delay.lock().unwrap();

    for (index, delta) in deltas.iter().enumerate() {
        if !delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        if cancel.is_cancelled() {
            return;
        }

        if should_fail && index == 1 {
            let _ = tx
                .send(Err(TranslateError::Stream("mock stream broke".to_string())))
                .await;
            return;
        }
        if tx.send(Ok(delta.clone())).await.is_err() {
            return;
        }
    }
}

// ============================================================================
// 事件收集器与测试环境
// ============================================================================

/// 记录全部进度事件的接收端
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn saw_complete(&self) -> bool {
        self.events()
            .iter()
            .any(|e| matches!(e, ProgressEvent::TranslationComplete))
    }

    pub fn saw_stopped(&self) -> bool {
        self.events()
            .iter()
            .any(|e| matches!(e, ProgressEvent::TranslationStopped))
    }
}

impl ProgressSink for CollectingSink {
    fn emit(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub fn test_settings() -> ApiSettings {
    ApiSettings::new("https://api.example.com/v1/chat/completions", "sk-test", "test-model")
}

/// 组装好的测试环境
pub struct TestEnvironment {
    pub translator: PageTranslator,
    pub client: MockChatClient,
    pub store: Rc<MemoryCacheStore>,
    pub sink: Rc<CollectingSink>,
}

impl TestEnvironment {
    pub fn new(html: &str, client: MockChatClient) -> Self {
        Self::with_options(html, client, TranslatorOptions::default())
    }

    pub fn with_options(html: &str, client: MockChatClient, options: TranslatorOptions) -> Self {
        init_tracing();
        let store = Rc::new(MemoryCacheStore::new());
        let sink = Rc::new(CollectingSink::new());
        let translator = PageTranslator::new(
            build_dom(html),
            PAGE_URL,
            test_settings(),
            Rc::new(client.clone()),
            store.clone(),
            sink.clone(),
            options,
        );
        Self {
            translator,
            client,
            store,
            sink,
        }
    }
}
