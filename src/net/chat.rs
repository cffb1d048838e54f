//! 流式聊天补全客户端
//!
//! 核心只依赖`ChatClient`契约：发出一次请求，得到按序的文本增量流，
//! 取消令牌触发时流静默收尾而不产生面向用户的错误。内置的
//! `OpenAiChatClient`基于reqwest实现OpenAI风格的SSE接口。

use futures::StreamExt;
use serde_json::json;
use tokio::sync::mpsc;

use crate::cancel::CancelToken;
use crate::config::constants::CHAT_TEMPERATURE;
use crate::error::{TranslateError, TranslateResult};
use crate::net::sse::SseDecoder;

/// 一次流式翻译请求的全部参数
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub system_prompt: String,
    pub user_text: String,
}

/// 有序文本增量流
///
/// 通道背后由实现方的泵任务推送；通道关闭即流结束。
pub struct ChatStream {
    rx: mpsc::Receiver<TranslateResult<String>>,
}

impl ChatStream {
    pub fn from_receiver(rx: mpsc::Receiver<TranslateResult<String>>) -> Self {
        Self { rx }
    }

    /// 取下一个增量；流结束返回None
    pub async fn next_delta(&mut self) -> Option<TranslateResult<String>> {
        self.rx.recv().await
    }

    /// 汇聚整条流为完整文本，用于划词/窗口等一次性翻译
    pub async fn collect_text(mut self) -> TranslateResult<String> {
        let mut out = String::new();
        while let Some(item) = self.next_delta().await {
            out.push_str(&item?);
        }
        Ok(out)
    }
}

/// 流式聊天补全契约
pub trait ChatClient {
    fn stream_chat(&self, request: ChatRequest, cancel: CancelToken) -> ChatStream;
}

/// OpenAI风格聊天补全接口的reqwest实现
#[derive(Clone, Default)]
pub struct OpenAiChatClient {
    http: reqwest::Client,
}

impl OpenAiChatClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl ChatClient for OpenAiChatClient {
    fn stream_chat(&self, request: ChatRequest, cancel: CancelToken) -> ChatStream {
        let (tx, rx) = mpsc::channel(32);
        let http = self.http.clone();

        tokio::spawn(async move {
            pump_stream(http, request, cancel, tx).await;
        });

        ChatStream::from_receiver(rx)
    }
}

/// 把一次SSE响应泵入通道；取消时直接收尾，不向消费端报错
async fn pump_stream(
    http: reqwest::Client,
    request: ChatRequest,
    cancel: CancelToken,
    tx: mpsc::Sender<TranslateResult<String>>,
) {
    let body = json!({
        "model": request.model,
        "messages": [
            { "role": "system", "content": request.system_prompt },
            { "role": "user", "content": request.user_text },
        ],
        "temperature": CHAT_TEMPERATURE,
        "stream": true,
    });

    let send = http
        .post(&request.endpoint)
        .bearer_auth(&request.api_key)
        .json(&body)
        .send();

    let response = tokio::select! {
        _ = cancel.cancelled() => return,
        result = send => match result {
            Ok(response) => response,
            Err(error) => {
                let _ = tx.send(Err(TranslateError::Network(error.to_string()))).await;
                return;
            }
        },
    };

    let status = response.status();
    if !status.is_success() {
        let _ = tx
            .send(Err(TranslateError::Network(format!(
                "翻译请求失败: {}",
                status
            ))))
            .await;
        return;
    }

    let mut bytes = response.bytes_stream();
    let mut decoder = SseDecoder::new();

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return,
            chunk = bytes.next() => chunk,
        };

        match chunk {
            Some(Ok(data)) => {
                for delta in decoder.push(&data) {
                    if tx.send(Ok(delta)).await.is_err() {
                        return; // 消费端已放弃
                    }
                }
            }
            Some(Err(error)) => {
                if !cancel.is_cancelled() {
                    let _ = tx
                        .send(Err(TranslateError::Stream(error.to_string())))
                        .await;
                }
                return;
            }
            None => break,
        }
    }

    if let Some(delta) = decoder.finish() {
        let _ = tx.send(Ok(delta)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_collect_text_concatenates_deltas() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Ok("你".to_string())).await.unwrap();
        tx.send(Ok("好".to_string())).await.unwrap();
        drop(tx);

        let stream = ChatStream::from_receiver(rx);
        assert_eq!(stream.collect_text().await.unwrap(), "你好");
    }

    #[tokio::test]
    async fn test_collect_text_surfaces_stream_error() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Ok("部分".to_string())).await.unwrap();
        tx.send(Err(TranslateError::Stream("broken".to_string())))
            .await
            .unwrap();
        drop(tx);

        let stream = ChatStream::from_receiver(rx);
        assert!(stream.collect_text().await.is_err());
    }
}
