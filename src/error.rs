//! 统一错误处理
//!
//! 提供结构化错误类型和错误处理机制。单个任务内的错误在任务边界被吞掉
//! （记录日志、推进进度、不重试），只有配置类错误会直接上抛给调用方。

use thiserror::Error;

/// 翻译错误类型
#[derive(Error, Debug, Clone)]
pub enum TranslateError {
    /// 配置错误：缺少接口地址、密钥或模型
    #[error("配置错误: {0}")]
    Config(String),

    /// 网络错误
    #[error("网络错误: {0}")]
    Network(String),

    /// 流式响应错误
    #[error("流式响应错误: {0}")]
    Stream(String),

    /// 请求被主动取消，属预期行为
    #[error("翻译请求已取消")]
    Cancelled,

    /// 缓存错误
    #[error("缓存错误: {0}")]
    Cache(String),

    /// 恢复原文失败
    #[error("恢复原文失败: {0}")]
    Restore(String),

    /// DOM写回处理错误
    #[error("处理错误: {0}")]
    Processing(String),

    /// 解析错误
    #[error("解析错误: {0}")]
    Parse(String),
}

/// 错误严重程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl TranslateError {
    /// 是否为取消导致的预期错误
    pub fn is_cancellation(&self) -> bool {
        matches!(self, TranslateError::Cancelled)
    }

    /// 获取错误的严重程度
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            TranslateError::Config(_) => ErrorSeverity::Critical,
            TranslateError::Network(_) => ErrorSeverity::Warning,
            TranslateError::Stream(_) => ErrorSeverity::Warning,
            TranslateError::Cancelled => ErrorSeverity::Info,
            TranslateError::Cache(_) => ErrorSeverity::Warning,
            TranslateError::Restore(_) => ErrorSeverity::Warning,
            TranslateError::Processing(_) => ErrorSeverity::Warning,
            TranslateError::Parse(_) => ErrorSeverity::Error,
        }
    }
}

/// 按严重程度记录任务内错误，取消类错误不进入告警日志
pub fn log_task_error(context: &str, error: &TranslateError) {
    if error.is_cancellation() {
        tracing::debug!("{}: 请求被取消，这是正常现象", context);
        return;
    }

    match error.severity() {
        ErrorSeverity::Info => tracing::info!("{}: {}", context, error),
        ErrorSeverity::Warning => tracing::warn!("{}: {}", context, error),
        ErrorSeverity::Error | ErrorSeverity::Critical => {
            tracing::error!("{}: {}", context, error)
        }
    }
}

impl From<serde_json::Error> for TranslateError {
    fn from(error: serde_json::Error) -> Self {
        TranslateError::Parse(format!("JSON序列化错误: {}", error))
    }
}

impl From<toml::de::Error> for TranslateError {
    fn from(error: toml::de::Error) -> Self {
        TranslateError::Config(format!("TOML解析错误: {}", error))
    }
}

impl From<std::io::Error> for TranslateError {
    fn from(error: std::io::Error) -> Self {
        TranslateError::Config(format!("IO错误: {}", error))
    }
}

impl From<reqwest::Error> for TranslateError {
    fn from(error: reqwest::Error) -> Self {
        TranslateError::Network(error.to_string())
    }
}

/// 错误结果类型别名
pub type TranslateResult<T> = Result<T, TranslateError>;
