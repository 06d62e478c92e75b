//! chatcast - AI 聊天客户端流式核心
//!
//! 移动端聊天客户端的协议层：把多家 LLM / 图片生成后端
//! （Bedrock 托管模型、OpenAI 兼容 API、DeepSeek、自建代理）
//! 异构的分块流式响应解码为统一的增量消息模型，通过回调把
//! 文本增量、思考增量、用量快照与完成信号交给 UI 层。
//!
//! # 模块划分
//!
//! - `models`: 消息 / 模型 / 用量数据类型
//! - `config`: 应用设置（模型选择、凭证、开关）
//! - `streaming`: 帧重组、各协议解码器、读循环状态机
//! - `providers`: 请求编排与各后端接入
//!
//! # 使用方式
//!
//! ```no_run
//! use chatcast::config::Settings;
//! use chatcast::models::{ChatMessage, ChatMode, Role};
//! use chatcast::providers::send_chat;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() {
//! let client = reqwest::Client::new();
//! let settings = Settings::default();
//! let messages = vec![ChatMessage::text(Role::User, "你好")];
//! let cancel = CancellationToken::new();
//!
//! send_chat(
//!     &client,
//!     &settings,
//!     ChatMode::Text,
//!     &messages,
//!     None,
//!     &(|| false),
//!     &cancel,
//!     &mut |update| {
//!         // 每次有增量就会收到最新快照；update.complete 标记终态
//!         println!("{}", update.text);
//!     },
//! )
//! .await;
//! # }
//! ```

pub mod config;
pub mod models;
pub mod providers;
pub mod streaming;

pub use config::Settings;
pub use models::{ChatMessage, ChatMode, ContentBlock, Model, ModelTag, Role, SystemPrompt, Usage};
pub use providers::{send_chat, ModelLister, ProviderError};
pub use streaming::{RunState, StreamError, StreamEvent, StreamFormat, StreamUpdate};
