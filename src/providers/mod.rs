//! Provider 模块
//!
//! 请求编排层：按当前模型的来源标签与接入方式选择协议路径，
//! 缺凭证时在发起任何网络调用之前就以终态回调失败。
//!
//! # 协议路径
//!
//! - `bedrock`: Bedrock 直连（Converse-stream）
//! - `openai`: OpenAI / DeepSeek / OpenAI 兼容（SSE）
//! - `proxy`: 自建代理服务器（裸文本流）
//! - `image`: 图片生成（一次往返，无流式）

pub mod bedrock;
pub mod error;
pub mod image;
pub mod openai;
pub mod proxy;

pub use bedrock::BedrockProvider;
pub use error::ProviderError;
pub use image::{ImageError, ImageProvider};
pub use openai::OpenAiProvider;
pub use proxy::ProxyProvider;

use crate::config::{BedrockConfigMode, Settings};
use crate::models::{ChatMessage, ChatMode, ContentBlock, ModelList, ModelTag, SystemPrompt};
use crate::streaming::StreamUpdate;
use async_trait::async_trait;
use reqwest::Client;
use tokio_util::sync::CancellationToken;

/// 模型列表接口
///
/// 两个能枚举模型的后端（Bedrock 直连与代理服务器）共用。
#[async_trait]
pub trait ModelLister {
    async fn list_models(&self) -> Result<ModelList, ProviderError>;
}

/// 配置错误的终态回调
///
/// 注意 `need_stop` 为 false：配置缺失不是用户主动停止。
fn config_error<F>(on_update: &mut F, message: &str)
where
    F: FnMut(StreamUpdate),
{
    on_update(StreamUpdate {
        text: message.to_string(),
        complete: true,
        need_stop: false,
        usage: None,
        reasoning: None,
    });
}

/// 发起一轮对话
///
/// 每轮恰好一个在途请求；完成只能通过回调观察。凭证或端点
/// 缺失时立即以配置错误结束，不发起网络调用。
pub async fn send_chat<F>(
    client: &Client,
    settings: &Settings,
    mode: ChatMode,
    messages: &[ChatMessage],
    prompt: Option<&SystemPrompt>,
    should_stop: &(dyn Fn() -> bool + Send + Sync),
    cancel: &CancellationToken,
    on_update: &mut F,
) where
    F: FnMut(StreamUpdate),
{
    let tag = settings.text_model_tag();

    if mode == ChatMode::Text && tag != ModelTag::Bedrock {
        match tag {
            ModelTag::DeepSeek if settings.deepseek_api_key.is_empty() => {
                config_error(on_update, "Please configure your DeepSeek API Key");
            }
            ModelTag::OpenAI if settings.openai_api_key.is_empty() => {
                config_error(on_update, "Please configure your OpenAI API Key");
            }
            ModelTag::OpenAICompatible if settings.openai_compat_api_url.is_empty() => {
                config_error(on_update, "Please configure your OpenAI Compatible API URL");
            }
            _ => {
                OpenAiProvider::new(client.clone(), settings.clone())
                    .chat_stream(messages, prompt, should_stop, cancel, on_update)
                    .await;
            }
        }
        return;
    }

    if settings.bedrock_config_mode == BedrockConfigMode::Bedrock
        && settings.bedrock_api_key.is_empty()
    {
        config_error(on_update, "Please configure your Bedrock API Key");
        return;
    }

    match mode {
        ChatMode::Text => {
            if settings.bedrock_config_mode == BedrockConfigMode::Bedrock {
                BedrockProvider::new(client.clone(), settings.clone())
                    .converse_stream(messages, prompt, should_stop, cancel, on_update)
                    .await;
                return;
            }
            if !settings.is_proxy_configured() {
                config_error(
                    on_update,
                    "Please configure your ChatCast Server API URL and API Key",
                );
                return;
            }
            ProxyProvider::new(client.clone(), settings.clone())
                .converse_stream(messages, prompt, should_stop, cancel, on_update)
                .await;
        }
        ChatMode::Image => {
            send_image(client, settings, messages, should_stop, cancel, on_update).await;
        }
    }
}

/// 图片生成分支
///
/// 提示词取最新一条消息的首个文本块，参考图取其首个图片块。
async fn send_image<F>(
    client: &Client,
    settings: &Settings,
    messages: &[ChatMessage],
    should_stop: &(dyn Fn() -> bool + Send + Sync),
    cancel: &CancellationToken,
    on_update: &mut F,
) where
    F: FnMut(StreamUpdate),
{
    if settings.bedrock_config_mode == BedrockConfigMode::Server
        && !settings.is_proxy_configured()
    {
        config_error(
            on_update,
            "Please configure your ChatCast Server API URL and API Key",
        );
        return;
    }

    let last = match messages.last() {
        Some(message) => message,
        None => return,
    };
    let prompt = last.first_text();
    let ref_image = last.content.iter().find_map(|block| match block {
        ContentBlock::Image { format, bytes } => Some((format.as_str(), bytes.as_slice())),
        _ => None,
    });

    let provider = ImageProvider::new(client.clone(), settings.clone());
    match provider.generate(prompt, cancel, ref_image).await {
        Ok((image, usage)) => {
            on_update(StreamUpdate {
                text: format!("![](data:image/png;base64,{})", image),
                complete: true,
                need_stop: false,
                usage: Some(usage),
                reasoning: None,
            });
        }
        Err(err) => {
            let text = match &err {
                ImageError::Aborted => {
                    if should_stop() {
                        "Request canceled".to_string()
                    } else {
                        "Request timed out".to_string()
                    }
                }
                ImageError::Connect(_) => "Request error: Unable to resolve host".to_string(),
                ImageError::Service(message) => message.clone(),
                ImageError::Network(message) => format!("Error fetching image: {}", message),
            };
            tracing::warn!("[IMAGE] 图片生成失败: {}", err);
            on_update(StreamUpdate {
                text,
                complete: true,
                need_stop: true,
                usage: None,
                reasoning: None,
            });
        }
    }
}

// ============================================================================
// 测试模块
// ============================================================================
