//! 聊天补全SSE事件流解码
//!
//! 接口以`data: {json}`行推送增量，`data: [DONE]`收尾。解码器按块喂入
//! 字节，跨块的半行留在缓冲区，格式异常的行记日志后跳过而不中断流。
//! 缓冲区存原始字节，只在凑齐完整行后才按UTF-8解码：传输层的分块边界
//! 是任意的，多字节字符可能被切在两块之间，提前按块解码会把它打成
//! 替换字符。

use serde::Deserialize;

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// 增量文本解码器
#[derive(Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 喂入一块字节，返回其中解出的全部文本增量（保持到达顺序）
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut deltas = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|byte| *byte == b'\n') {
            // 完整的SSE行内不会有被截断的UTF-8序列，此时解码才安全
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line);
            if let Some(delta) = decode_line(line.trim()) {
                deltas.push(delta);
            }
        }
        deltas
    }

    /// 流结束时冲刷缓冲区里最后一个未换行的行
    pub fn finish(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.buffer);
        let line = String::from_utf8_lossy(&line);
        decode_line(line.trim())
    }
}

fn decode_line(line: &str) -> Option<String> {
    if line.is_empty() || line.contains("[DONE]") {
        return None;
    }

    let payload = line.strip_prefix("data:")?.trim();
    if payload.is_empty() {
        return None;
    }

    match serde_json::from_str::<StreamChunk>(payload) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .filter(|content| !content.is_empty()),
        Err(error) => {
            tracing::debug!("解析流式响应出错: {} ({})", error, line);
            None
        }
    }
}
