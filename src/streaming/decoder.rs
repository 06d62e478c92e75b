//! 协议解码器分发
//!
//! 在编排阶段按目标模型确定一次协议格式，之后整个读循环都
//! 通过这个枚举分发到对应的解码器。解码状态（帧尾段、SSE
//! 续传缓存）全部显式地装在枚举里，随请求创建、随请求丢弃。

use crate::streaming::converse;
use crate::streaming::error::StreamError;
use crate::streaming::event::{StreamEvent, StreamFormat};
use crate::streaming::frame::FrameBuffer;
use crate::streaming::openai_sse::OpenAiSseDecoder;
use crate::streaming::proxy_text;

/// 协议解码器
#[derive(Debug)]
pub enum ProtocolDecoder {
    /// Converse-stream：空行分帧 + 逐帧 JSON 解码
    Converse { frames: FrameBuffer },
    /// OpenAI 兼容 SSE：解码器自带跨块续传缓存
    OpenAiSse(OpenAiSseDecoder),
    /// 代理裸文本：无分帧，直接消费原始读块
    ProxyText,
}

impl ProtocolDecoder {
    /// 按流式格式创建对应的解码器
    pub fn for_format(format: StreamFormat) -> Self {
        match format {
            StreamFormat::ConverseStream => ProtocolDecoder::Converse {
                frames: FrameBuffer::new(),
            },
            StreamFormat::OpenAiSse => ProtocolDecoder::OpenAiSse(OpenAiSseDecoder::new()),
            StreamFormat::ProxyText => ProtocolDecoder::ProxyText,
        }
    }

    /// 解码器对应的流式格式
    pub fn format(&self) -> StreamFormat {
        match self {
            ProtocolDecoder::Converse { .. } => StreamFormat::ConverseStream,
            ProtocolDecoder::OpenAiSse(_) => StreamFormat::OpenAiSse,
            ProtocolDecoder::ProxyText => StreamFormat::ProxyText,
        }
    }

    /// 喂入一个原始文本块，产出解码事件
    pub fn feed(&mut self, chunk: &str) -> Result<Vec<StreamEvent>, StreamError> {
        match self {
            ProtocolDecoder::Converse { frames } => {
                let mut events = Vec::new();
                for frame in frames.push(chunk) {
                    events.extend(converse::decode_frame(&frame));
                }
                Ok(events)
            }
            ProtocolDecoder::OpenAiSse(decoder) => decoder.decode_chunk(chunk),
            ProtocolDecoder::ProxyText => Ok(proxy_text::decode_chunk(chunk)),
        }
    }

    /// 流结束时冲刷解码器内的残留数据
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        match self {
            ProtocolDecoder::Converse { frames } => match frames.finish() {
                Some(tail) => converse::decode_frame(&tail),
                None => Vec::new(),
            },
            // SSE 续传缓存里最多是半条没传完的记录，EOF 时丢弃
            ProtocolDecoder::OpenAiSse(_) => Vec::new(),
            ProtocolDecoder::ProxyText => Vec::new(),
        }
    }
}

// ============================================================================
// 测试模块
// ============================================================================
