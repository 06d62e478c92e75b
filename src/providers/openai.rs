//! OpenAI 兼容 Provider
//!
//! 覆盖三类后端：OpenAI 官方、DeepSeek、自定义 OpenAI 兼容
//! API（含 OpenRouter）。凭证与端点按当前模型的来源标签选
//! 择；开启代理开关时请求改发代理服务器的 `/api/openai`，
//! 真实目标地址放进 `request_url` 头由代理转发。
//!
//! 该协议没有原生文档块：文档附件展开为内联 base64 文本，
//! 追加在提示词之后。

use crate::config::Settings;
use crate::models::{ChatMessage, ContentBlock, ModelTag, SystemPrompt};
use crate::streaming::{
    run_stream, RunState, StreamContext, StreamFormat, StreamRequest, StreamUpdate,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// 响应头超时
const CHAT_TIMEOUT: Duration = Duration::from_secs(60);

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEEPSEEK_API_URL: &str = "https://api.deepseek.com/chat/completions";
const OPENROUTER_PREFIX: &str = "https://openrouter.ai/api";

/// OpenRouter 要求的来源标识
const PROJECT_LINK: &str = "https://github.com/aichatcast/chatcast";
const PROJECT_TITLE: &str = "ChatCast";

/// 把内部消息列表转换为 OpenAI 消息格式
///
/// 纯文本消息序列化为字符串内容；带图片的消息展开为内容块
/// 列表（`image_url` data-URI）；文档附件统一拍平成文本。
pub fn to_openai_messages(messages: &[ChatMessage], prompt: Option<&SystemPrompt>) -> Vec<Value> {
    let mut converted = Vec::new();
    if let Some(prompt) = prompt {
        converted.push(json!({ "role": "system", "content": prompt.prompt }));
    }

    for message in messages {
        let mut text = String::new();
        let mut image_blocks: Vec<Value> = Vec::new();
        for block in &message.content {
            match block {
                ContentBlock::Text { text: t } => {
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str(t);
                }
                ContentBlock::Image { format, bytes } => {
                    image_blocks.push(json!({
                        "type": "image_url",
                        "image_url": {
                            "url": format!("data:image/{};base64,{}", format, BASE64.encode(bytes))
                        }
                    }));
                }
                ContentBlock::Document {
                    format,
                    name,
                    bytes,
                } => {
                    text.push_str(&format!(
                        "\n\n[File: {}.{}]\n{}",
                        name,
                        format,
                        BASE64.encode(bytes)
                    ));
                }
            }
        }

        if image_blocks.is_empty() {
            converted.push(json!({ "role": message.role.as_str(), "content": text }));
        } else {
            let mut content = vec![json!({ "type": "text", "text": text })];
            content.append(&mut image_blocks);
            converted.push(json!({ "role": message.role.as_str(), "content": content }));
        }
    }

    converted
}

/// OpenAI 兼容 Provider
pub struct OpenAiProvider {
    pub client: Client,
    pub settings: Settings,
}

impl OpenAiProvider {
    pub fn new(client: Client, settings: Settings) -> Self {
        Self { client, settings }
    }

    /// 按当前模型选择 API Key
    pub fn api_key(&self) -> &str {
        if self.settings.text_model_tag() == ModelTag::OpenAICompatible {
            &self.settings.openai_compat_api_key
        } else if self.settings.text_model.model_id.contains("deepseek") {
            &self.settings.deepseek_api_key
        } else {
            &self.settings.openai_api_key
        }
    }

    /// 按当前模型与代理开关选择请求地址
    pub fn api_url(&self) -> String {
        if self.settings.text_model_tag() == ModelTag::OpenAICompatible {
            if self.settings.openai_proxy_enabled {
                format!("{}/api/openai", self.settings.api_url.trim_end_matches('/'))
            } else {
                format!(
                    "{}/chat/completions",
                    self.settings.openai_compat_api_url.trim_end_matches('/')
                )
            }
        } else if self.settings.text_model.model_id.contains("deepseek") {
            DEEPSEEK_API_URL.to_string()
        } else if self.settings.openai_proxy_enabled {
            format!("{}/api/openai", self.settings.api_url.trim_end_matches('/'))
        } else {
            OPENAI_API_URL.to_string()
        }
    }

    /// 代理转发的真实目标地址（放进 `request_url` 头）
    ///
    /// DeepSeek 不走代理，返回空串。
    pub fn proxy_request_url(&self) -> String {
        if self.settings.text_model_tag() == ModelTag::OpenAICompatible {
            format!(
                "{}/chat/completions",
                self.settings.openai_compat_api_url.trim_end_matches('/')
            )
        } else if self.settings.text_model.model_id.contains("deepseek") {
            String::new()
        } else {
            OPENAI_API_URL.to_string()
        }
    }

    /// 当前请求是否发往 OpenRouter
    pub fn is_openrouter(&self) -> bool {
        self.settings.text_model_tag() == ModelTag::OpenAICompatible
            && self
                .settings
                .openai_compat_api_url
                .starts_with(OPENROUTER_PREFIX)
    }

    /// 发起流式对话
    pub async fn chat_stream<F>(
        &self,
        messages: &[ChatMessage],
        prompt: Option<&SystemPrompt>,
        should_stop: &(dyn Fn() -> bool + Send + Sync),
        cancel: &CancellationToken,
        on_update: &mut F,
    ) -> RunState
    where
        F: FnMut(StreamUpdate),
    {
        let model = &self.settings.text_model;
        let body = json!({
            "model": model.model_id,
            "messages": to_openai_messages(messages, prompt),
            "stream": true,
            "stream_options": { "include_usage": true },
        });

        let url = self.api_url();
        tracing::debug!("[OPENAI] 发起流式请求: url={} model={}", url, model.model_id);

        let mut builder = self
            .client
            .post(&url)
            .header("accept", "*/*")
            .header("content-type", "application/json")
            .bearer_auth(self.api_key())
            .json(&body);

        if self.settings.openai_proxy_enabled {
            let proxy_request_url = self.proxy_request_url();
            if !proxy_request_url.is_empty() {
                builder = builder.header("request_url", proxy_request_url);
            }
        }
        if self.is_openrouter() {
            builder = builder
                .header("HTTP-Referer", PROJECT_LINK)
                .header("X-Title", PROJECT_TITLE);
        }

        run_stream(
            StreamRequest {
                builder,
                connect_timeout: CHAT_TIMEOUT,
                context: StreamContext::new(&model.model_name, StreamFormat::OpenAiSse),
            },
            should_stop,
            cancel,
            on_update,
        )
        .await
    }
}

// ============================================================================
// 测试模块
// ============================================================================
