//! Converse-stream 解码器
//!
//! 解码 Bedrock 托管模型直连端点的流式响应：每帧是一个 JSON
//! 对象，可能携带文本增量、思考增量、usage 快照，或者一个
//! 伪装成数据帧的错误负载（`Message`/`message` 字段）。
//!
//! 解码失败时把原始帧当作文本增量透出，保证任何数据都不会被
//! 静默丢弃——错误负载会原样出现在会话里，而不是消失。

use crate::models::Usage;
use crate::streaming::event::StreamEvent;
use serde_json::Value;

/// 解码一帧 Converse-stream 数据
///
/// 一帧可能同时携带思考、文本和 usage，按此顺序产出事件。
///
/// # 参数
///
/// * `frame` - 帧缓冲区产出的一个完整帧
///
/// # 返回
///
/// 解码出的事件列表（可能为空）
pub fn decode_frame(frame: &str) -> Vec<StreamEvent> {
    let mut events = Vec::new();

    let value: Value = match serde_json::from_str(frame) {
        Ok(v) => v,
        Err(err) => {
            // 兜底：无法解析的帧原样透出，不丢数据
            tracing::warn!("[CONVERSE] 帧解析失败: {} frame={}", err, frame);
            events.push(StreamEvent::TextDelta(frame.to_string()));
            return events;
        }
    };

    if let Some(reasoning) = value
        .pointer("/delta/reasoningContent/text")
        .and_then(Value::as_str)
    {
        if !reasoning.is_empty() {
            events.push(StreamEvent::ReasoningDelta(reasoning.to_string()));
        }
    }

    let mut text = value
        .pointer("/delta/text")
        .and_then(Value::as_str)
        .map(str::to_string);

    // 带 Message/message 字段的是错误负载，整帧原文透出到会话
    if value.get("Message").is_some() || value.get("message").is_some() {
        text = Some(frame.to_string());
    }

    if let Some(text) = text {
        if !text.is_empty() {
            events.push(StreamEvent::TextDelta(text));
        }
    }

    if let Some(usage_value) = value.get("usage") {
        match serde_json::from_value::<Usage>(usage_value.clone()) {
            Ok(usage) => events.push(StreamEvent::Usage(usage)),
            Err(err) => {
                tracing::warn!("[CONVERSE] usage 解析失败: {}", err);
            }
        }
    }

    events
}

// ============================================================================
// 测试模块
// ============================================================================
