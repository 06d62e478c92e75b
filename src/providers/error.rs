//! 统一的 Provider 错误类型
//!
//! 区分配置错误（发请求之前就能发现）与网络 / 服务端 /
//! 解析错误，并标注哪些错误值得重试。重试本身是调用方的
//! 决策，这一层只做分类。

use thiserror::Error;

/// Provider 统一错误类型
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// 配置错误（缺少凭证或端点，未发起任何网络调用）
    #[error("configuration error: {0}")]
    Configuration(String),

    /// 网络错误（连接超时、DNS 解析失败等）
    #[error("network error: {0}")]
    Network(String),

    /// 限流（HTTP 429）
    #[error("rate limited: {0}")]
    RateLimit(String),

    /// 服务端错误（HTTP 5xx）
    #[error("server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    /// 请求被拒绝（其余 4xx）
    #[error("request rejected (HTTP {status}): {message}")]
    Request { status: u16, message: String },

    /// 响应解析失败
    #[error("parse error: {0}")]
    Parse(String),
}

impl ProviderError {
    /// 判断错误是否可重试
    ///
    /// 网络错误、限流和 5xx 是临时性的；配置、4xx 和解析错误
    /// 重试也不会有不同结果。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Network(_) | ProviderError::RateLimit(_) | ProviderError::Server { .. }
        )
    }

    /// 从 HTTP 状态码创建错误
    pub fn from_http_status(status: u16, body: &str) -> Self {
        let message = truncate_message(body, 200);
        match status {
            429 => ProviderError::RateLimit(message),
            500..=599 => ProviderError::Server { status, message },
            _ => ProviderError::Request { status, message },
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::Parse(err.to_string())
    }
}

/// 截断过长的错误消息
fn truncate_message(message: &str, max_len: usize) -> String {
    if message.chars().count() <= max_len {
        message.to_string()
    } else {
        let truncated: String = message.chars().take(max_len).collect();
        format!("{}...", truncated)
    }
}

// ============================================================================
// 测试模块
// ============================================================================
