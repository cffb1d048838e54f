//! 翻译配置管理模块
//!
//! 提供API设置、提示词模板与运行参数，支持从TOML文件和环境变量加载。

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{TranslateError, TranslateResult};

/// 翻译配置常量
pub mod constants {
    /// 并发流式请求上限
    pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 10;
    /// 候选文本节点的最小修剪后长度（不含）
    pub const MIN_TEXT_LENGTH: usize = 1;
    /// 划词缓存过期时间（秒）
    pub const SELECTION_CACHE_TTL_SECS: u64 = 300;
    /// 划词缓存容量
    pub const SELECTION_CACHE_CAPACITY: usize = 256;
    /// 聊天接口采样温度
    pub const CHAT_TEMPERATURE: f64 = 0.3;

    pub const CONFIG_PATHS: &[&str] = &[
        "pagelingo.toml",
        ".pagelingo.toml",
        "~/.config/pagelingo/config.toml",
    ];
}

/// 翻译模式
///
/// compare/replace作用于整页，selection/window作用于单段文本。
/// 枚举同时充当缓存键的组成部分和UI消息中的模式字段。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranslationMode {
    /// 对照模式：译文以独立悬浮块插在原文之后
    Compare,
    /// 替换模式：译文原位覆盖原文，依赖恢复记录还原
    Replace,
    /// 划词翻译
    Selection,
    /// 独立窗口翻译
    Window,
}

impl TranslationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranslationMode::Compare => "compare",
            TranslationMode::Replace => "replace",
            TranslationMode::Selection => "selection",
            TranslationMode::Window => "window",
        }
    }

    /// 是否为整页翻译模式
    pub fn is_page_mode(&self) -> bool {
        matches!(self, TranslationMode::Compare | TranslationMode::Replace)
    }
}

impl fmt::Display for TranslationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 各场景的系统提示词模板，`{LANG}`占位符在请求时替换为目标语言
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptSet {
    pub selection: String,
    pub window: String,
    pub page: String,
    pub advanced_selection: String,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            selection: "你是一个翻译助手。请将用户输入的文本翻译成{LANG}，只返回翻译结果，不需要解释。"
                .to_string(),
            window: "你是一个翻译助手。请将用户输入的文本翻译成{LANG}，保持原文的格式和风格。只返回翻译结果，不需要解释。"
                .to_string(),
            page: "你是一个翻译助手。请将用户输入的文本翻译成{LANG}，保持原文的格式和风格。翻译时要考虑上下文的连贯性。只返回翻译结果，不需要解释。"
                .to_string(),
            advanced_selection: "你是一个高级翻译助手。请将用户输入的文本翻译成{LANG}，并提供更多信息。返回JSON格式，包含以下字段: text(原文)、translation(翻译结果)、complex_words(复杂单词列表，每个单词包含word、phonetic、part_of_speech、definition字段)。不要返回多余内容，确保返回的是有效的JSON格式。"
                .to_string(),
        }
    }
}

impl PromptSet {
    /// 取指定模式对应的模板
    pub fn template_for(&self, mode: TranslationMode) -> &str {
        match mode {
            TranslationMode::Compare | TranslationMode::Replace => &self.page,
            TranslationMode::Selection => &self.selection,
            TranslationMode::Window => &self.window,
        }
    }

    /// 渲染指定模式的系统提示词
    pub fn render(&self, mode: TranslationMode, target_lang: &str) -> String {
        self.template_for(mode).replace("{LANG}", target_lang)
    }

    /// 渲染高级划词翻译的系统提示词
    pub fn render_advanced(&self, target_lang: &str) -> String {
        self.advanced_selection.replace("{LANG}", target_lang)
    }
}

/// 聊天补全接口设置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    /// 接口地址
    pub api_endpoint: String,
    /// 接口密钥
    pub api_key: String,
    /// 模型名称
    pub model: String,
    /// 提示词模板
    #[serde(default)]
    pub prompts: PromptSet,
}

impl ApiSettings {
    pub fn new(
        api_endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            api_endpoint: api_endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
            prompts: PromptSet::default(),
        }
    }

    /// 校验必填项，任意一项缺失即为配置错误
    pub fn validate(&self) -> TranslateResult<()> {
        if self.api_endpoint.trim().is_empty()
            || self.api_key.trim().is_empty()
            || self.model.trim().is_empty()
        {
            return Err(TranslateError::Config(
                "请先配置接口地址、密钥和模型".to_string(),
            ));
        }
        Ok(())
    }

    /// 从TOML配置文件加载
    pub fn from_toml_file(path: impl AsRef<Path>) -> TranslateResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let settings: ApiSettings = toml::from_str(&content)?;
        Ok(settings)
    }

    /// 按标准路径顺序查找并加载配置文件
    ///
    /// 依次尝试`constants::CONFIG_PATHS`，取第一个存在的文件；
    /// 一个都没有时返回配置错误。
    pub fn discover() -> TranslateResult<Self> {
        for candidate in constants::CONFIG_PATHS {
            let path = expand_home(candidate);
            if Path::new(&path).exists() {
                tracing::debug!("加载配置文件: {}", path);
                return Self::from_toml_file(&path);
            }
        }
        Err(TranslateError::Config(format!(
            "未找到配置文件，查找过: {}",
            constants::CONFIG_PATHS.join(", ")
        )))
    }

    /// 从环境变量加载（PAGELINGO_API_ENDPOINT / PAGELINGO_API_KEY / PAGELINGO_MODEL）
    pub fn from_env() -> TranslateResult<Self> {
        let read = |key: &str| std::env::var(key).unwrap_or_default();
        let settings = Self::new(
            read("PAGELINGO_API_ENDPOINT"),
            read("PAGELINGO_API_KEY"),
            read("PAGELINGO_MODEL"),
        );
        settings.validate()?;
        Ok(settings)
    }
}

/// 标准路径中是否存在配置文件
pub fn config_file_exists() -> bool {
    constants::CONFIG_PATHS
        .iter()
        .any(|candidate| Path::new(&expand_home(candidate)).exists())
}

/// 展开路径开头的`~/`为HOME目录；HOME不可用时原样返回
fn expand_home(path: &str) -> String {
    match std::env::var("HOME") {
        Ok(home) => expand_home_with(path, &home),
        Err(_) => path.to_string(),
    }
}

fn expand_home_with(path: &str, home: &str) -> String {
    match path.strip_prefix("~/") {
        Some(rest) => format!("{}/{}", home.trim_end_matches('/'), rest),
        None => path.to_string(),
    }
}

/// 翻译器运行参数
#[derive(Debug, Clone)]
pub struct TranslatorOptions {
    /// 同时在途的流式请求上限
    pub max_concurrent_tasks: usize,
    /// 划词缓存容量
    pub selection_cache_capacity: usize,
    /// 划词缓存过期时间（秒）
    pub selection_cache_ttl_secs: u64,
}

impl Default for TranslatorOptions {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: constants::DEFAULT_MAX_CONCURRENT_TASKS,
            selection_cache_capacity: constants::SELECTION_CACHE_CAPACITY,
            selection_cache_ttl_secs: constants::SELECTION_CACHE_TTL_SECS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_missing_fields() {
        let mut settings = ApiSettings::new("https://api.example.com/v1/chat", "sk-test", "gpt");
        assert!(settings.validate().is_ok());

        settings.model.clear();
        assert!(matches!(
            settings.validate(),
            Err(TranslateError::Config(_))
        ));
    }

    #[test]
    fn test_prompt_rendering_per_mode() {
        let prompts = PromptSet::default();
        let rendered = prompts.render(TranslationMode::Replace, "zh-CN");
        assert!(rendered.contains("zh-CN"));
        assert!(!rendered.contains("{LANG}"));

        // 整页两种模式共用page模板
        assert_eq!(
            prompts.template_for(TranslationMode::Compare),
            prompts.template_for(TranslationMode::Replace)
        );
        assert_ne!(
            prompts.template_for(TranslationMode::Selection),
            prompts.template_for(TranslationMode::Window)
        );
    }

    #[test]
    fn test_mode_serde_roundtrip() {
        let json = serde_json::to_string(&TranslationMode::Compare).unwrap();
        assert_eq!(json, "\"compare\"");
        let mode: TranslationMode = serde_json::from_str("\"replace\"").unwrap();
        assert_eq!(mode, TranslationMode::Replace);
    }

    #[test]
    fn test_home_expansion() {
        assert_eq!(
            expand_home_with("~/.config/pagelingo/config.toml", "/home/qianlv"),
            "/home/qianlv/.config/pagelingo/config.toml"
        );
        assert_eq!(
            expand_home_with("~/.config/pagelingo/config.toml", "/home/qianlv/"),
            "/home/qianlv/.config/pagelingo/config.toml"
        );
        // 相对路径不做展开
        assert_eq!(expand_home_with("pagelingo.toml", "/home/qianlv"), "pagelingo.toml");
    }

    #[test]
    fn test_settings_from_toml() {
        let parsed: ApiSettings = toml::from_str(
            r#"
            api_endpoint = "https://api.example.com/v1/chat/completions"
            api_key = "sk-test"
            model = "gpt-4o-mini"

            [prompts]
            page = "Translate into {LANG}."
            "#,
        )
        .unwrap();

        assert_eq!(parsed.model, "gpt-4o-mini");
        assert_eq!(
            parsed.prompts.render(TranslationMode::Compare, "ja"),
            "Translate into ja."
        );
        // 未给出的模板保持默认值
        assert!(parsed.prompts.selection.contains("{LANG}"));
    }
}
