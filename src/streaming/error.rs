//! 流式传输错误类型
//!
//! 定义读取 / 解码一次流式响应过程中可能出现的错误。
//! 错误只终止当前请求，绝不向上扩散到宿主进程；
//! 每条失败路径最终都会转化为一次终态回调。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 流式传输错误类型
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "details")]
pub enum StreamError {
    /// 网络错误（连接失败、DNS 解析失败、连接被重置）
    Network(String),

    /// 超时（请求发出后在期限内未收到响应头）
    Timeout,

    /// 请求被中止（超时触发或用户主动取消了底层传输）
    Aborted,

    /// 解析错误（跨块续传的记录无法补全时才会作为硬错误上抛）
    ParseError(String),

    /// Provider 返回的错误响应
    ProviderError {
        /// HTTP 状态码
        status: u16,
        /// 错误消息
        message: String,
    },

    /// 其他内部错误
    Internal(String),
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::Network(msg) => write!(f, "network error: {}", msg),
            StreamError::Timeout => write!(f, "stream response timed out"),
            StreamError::Aborted => write!(f, "request aborted"),
            StreamError::ParseError(msg) => write!(f, "parse error: {}", msg),
            StreamError::ProviderError { status, message } => {
                write!(f, "provider error ({}): {}", status, message)
            }
            StreamError::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for StreamError {}

// ============================================================================
// From trait 实现 - 用于错误转换
// ============================================================================

impl From<reqwest::Error> for StreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            StreamError::Timeout
        } else if err.is_connect() {
            StreamError::Network(format!("connect failed: {}", err))
        } else {
            StreamError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        StreamError::ParseError(err.to_string())
    }
}

// ============================================================================
// 辅助方法
// ============================================================================

impl StreamError {
    /// 创建网络错误
    pub fn network(msg: impl Into<String>) -> Self {
        StreamError::Network(msg.into())
    }

    /// 创建解析错误
    pub fn parse(msg: impl Into<String>) -> Self {
        StreamError::ParseError(msg.into())
    }

    /// 创建内部错误
    pub fn internal(msg: impl Into<String>) -> Self {
        StreamError::Internal(msg.into())
    }

    /// 是否由中止信号引起（超时或用户取消）
    pub fn is_abort(&self) -> bool {
        matches!(self, StreamError::Timeout | StreamError::Aborted)
    }

    /// 转换为展示在会话气泡中的错误文案
    ///
    /// 可识别的错误归一化为固定短语，其余原样透出。
    pub fn user_text(&self) -> String {
        match self {
            StreamError::Timeout | StreamError::Aborted => "Timed out".to_string(),
            StreamError::Network(msg) if msg.starts_with("connect failed") => {
                "Unable to resolve host".to_string()
            }
            other => other.to_string(),
        }
    }
}

// ============================================================================
// 测试模块
// ============================================================================
