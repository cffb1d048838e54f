//! UI边界的消息类型
//!
//! 原始形态是以字符串action字段分发的鸭子类型消息，这里改为封闭的
//! 带标签变体类型，核心侧对每种请求穷尽匹配，响应同样结构化。

use serde::{Deserialize, Serialize};

use crate::config::TranslationMode;

/// UI → 核心的请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum UiRequest {
    /// 整页翻译（对照或替换模式）
    TranslatePage {
        mode: TranslationMode,
        target_lang: String,
    },
    /// 停止当前翻译
    StopTranslation,
    /// 恢复页面原文
    RestorePage,
    /// 清除当前页面的翻译缓存；mode为None时清除所有模式
    ClearCache {
        mode: Option<TranslationMode>,
        target_lang: String,
    },
    /// 查询当前页面是否存在缓存
    CheckCache { target_lang: String },
    /// 划词/窗口翻译单段文本
    TranslateText {
        text: String,
        target_lang: String,
        mode: TranslationMode,
    },
    /// 高级划词翻译，返回带生词解析的结构化结果
    AnalyzeSelection { text: String, target_lang: String },
}

/// 核心 → UI的响应
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum UiResponse {
    /// 整页翻译结束；success表示全部段落完成且未被停止
    PageTranslated { success: bool },
    /// 已停止
    Stopped,
    /// 已恢复原文
    Restored { elements: usize },
    /// 缓存已清除
    CacheCleared { removed: usize },
    /// 有任务在途，暂不允许清缓存
    CacheBusy,
    /// 缓存查询结果
    CacheStatus { exists: bool },
    /// 单段翻译结果
    Translation { text: String },
    /// 高级划词翻译结果
    SelectionAnalysis(SelectionAnalysis),
    /// 错误
    Error { message: String },
}

/// 高级划词翻译的结构化结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionAnalysis {
    pub text: String,
    pub translation: String,
    #[serde(default)]
    pub complex_words: Vec<ComplexWord>,
}

/// 生词条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplexWord {
    pub word: String,
    #[serde(default)]
    pub phonetic: String,
    #[serde(default)]
    pub part_of_speech: String,
    #[serde(default)]
    pub definition: String,
}

/// 进度与终态事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ProgressEvent {
    /// 进度更新，percent恒在[0,100]内
    Progress {
        completed: usize,
        total: usize,
        percent: u8,
    },
    /// 全部段落翻译完成
    TranslationComplete,
    /// 翻译被用户停止
    TranslationStopped,
}

/// 进度事件接收端，由外层UI实现
pub trait ProgressSink {
    fn emit(&self, event: ProgressEvent);
}

/// 丢弃全部事件的空接收端
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn emit(&self, _event: ProgressEvent) {}
}
