//! 流式事件类型
//!
//! `StreamEvent` 是各 Provider 解码器的统一输出：无论线上格式
//! 多么不同，解码后都归一为这里的五种事件，由聚合器统一折叠。

use crate::models::Usage;
use serde::{Deserialize, Serialize};

/// 流式格式枚举
///
/// 定义不同 Provider 使用的流式响应格式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamFormat {
    /// Converse-stream 格式（Bedrock 托管模型直连）
    ConverseStream,
    /// OpenAI SSE 格式（OpenAI / DeepSeek / OpenAI 兼容 API）
    OpenAiSse,
    /// 代理后端的裸文本流（无事件分帧，末尾内嵌 usage JSON）
    ProxyText,
}

impl StreamFormat {
    /// 获取格式的显示名称
    pub fn display_name(&self) -> &'static str {
        match self {
            StreamFormat::ConverseStream => "Converse Stream",
            StreamFormat::OpenAiSse => "OpenAI SSE",
            StreamFormat::ProxyText => "Proxy Text",
        }
    }
}

/// 解码后的流式事件
///
/// 每个事件来源于恰好一帧；帧按字节到达顺序处理，不重排。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamEvent {
    /// 正文文本增量
    TextDelta(String),

    /// 思考内容增量（与正文分开累积）
    ReasoningDelta(String),

    /// 用量快照（点值，覆盖而非合并）
    Usage(Usage),

    /// Provider 在数据通道内上报的硬错误
    Error(String),

    /// 显式的流结束哨兵（OpenAI 的 `[DONE]`；其余协议靠读端 EOF）
    Done,
}

impl StreamEvent {
    /// 事件携带的文本增量（仅 TextDelta）
    pub fn as_text(&self) -> Option<&str> {
        match self {
            StreamEvent::TextDelta(text) => Some(text),
            _ => None,
        }
    }
}

// ============================================================================
// 测试模块
// ============================================================================
