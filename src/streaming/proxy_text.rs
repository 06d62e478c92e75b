//! 代理后端裸文本解码器
//!
//! 代理服务器的对话接口没有事件分帧：响应体就是一段持续的
//! UTF-8 文本，只有最后一个块可能以一段 usage JSON 结尾，由
//! 固定前导串 `\n{"inputTokens":` 引入。因此这个解码器直接
//! 工作在原始读块上，而不是分帧后的数据。

use crate::models::Usage;
use crate::streaming::event::StreamEvent;

/// usage JSON 的前导串
pub const USAGE_PREAMBLE: &str = "\n{\"inputTokens\":";

/// 解码一个原始读块
///
/// 块以 `}` 结尾、含换行且含前导串时，按前导串位置切开：
/// 前半是文本增量，后半直接按 usage JSON 解析；否则整块都是
/// 文本增量。
pub fn decode_chunk(chunk: &str) -> Vec<StreamEvent> {
    if chunk.is_empty() {
        return Vec::new();
    }

    if chunk.ends_with('}') && chunk.contains('\n') {
        if let Some(pos) = chunk.find(USAGE_PREAMBLE) {
            let text = &chunk[..pos];
            // 跳过前导换行，剩下的就是 usage JSON 本体
            let usage_json = &chunk[pos + 1..];
            match serde_json::from_str::<Usage>(usage_json) {
                Ok(usage) => {
                    let mut events = Vec::new();
                    if !text.is_empty() {
                        events.push(StreamEvent::TextDelta(text.to_string()));
                    }
                    events.push(StreamEvent::Usage(usage));
                    return events;
                }
                Err(err) => {
                    // usage 解析失败就退回整块文本，不丢数据
                    tracing::warn!("[PROXY_TEXT] usage 解析失败: {}", err);
                }
            }
        }
    }

    vec![StreamEvent::TextDelta(chunk.to_string())]
}

// ============================================================================
// 测试模块
// ============================================================================
