//! 网络通信模块
//!
//! - `chat` - 流式聊天补全客户端（trait + reqwest实现）
//! - `sse` - SSE事件流解码

pub mod chat;
pub mod sse;

pub use chat::{ChatClient, ChatRequest, ChatStream, OpenAiChatClient};
pub use sse::SseDecoder;
