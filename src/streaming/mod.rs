//! 流式传输核心模块
//!
//! 把各 Provider 异构的分块 HTTP 响应流解码为统一的增量
//! 消息模型（文本增量、思考增量、用量快照、完成信号），
//! 容忍帧的任意切分与合并、Provider 各自的错误包裹格式，
//! 并统一处理取消与超时。
//!
//! # 主要组件
//!
//! - `error`: 流式错误类型定义
//! - `event`: 统一的 StreamEvent 与流式格式枚举
//! - `frame`: 帧缓冲区（空行分帧，尾段跨块保留）
//! - `utf8`: 增量 UTF-8 解码
//! - `converse`: Converse-stream 解码器
//! - `openai_sse`: OpenAI 兼容 SSE 解码器
//! - `proxy_text`: 代理裸文本解码器
//! - `decoder`: 协议解码器分发
//! - `aggregator`: 读循环 / 状态机 / 回调时序

pub mod aggregator;
pub mod converse;
pub mod decoder;
pub mod error;
pub mod event;
pub mod frame;
pub mod openai_sse;
pub mod proxy_text;
pub mod utf8;

// 重新导出核心类型
pub use aggregator::{
    decode_stream, response_byte_stream, run_stream, ByteStream, RunState, StreamAggregator,
    StreamContext, StreamRequest, StreamUpdate, COALESCE_THRESHOLD,
};
pub use decoder::ProtocolDecoder;
pub use error::StreamError;
pub use event::{StreamEvent, StreamFormat};
pub use frame::FrameBuffer;
pub use openai_sse::{OpenAiSseDecoder, OPENROUTER_TAG};
pub use proxy_text::USAGE_PREAMBLE;
pub use utf8::Utf8StreamDecoder;
