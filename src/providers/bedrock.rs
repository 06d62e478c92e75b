//! Bedrock 直连 Provider
//!
//! 使用 Bedrock API Key 直连托管模型的 converse-stream 端点，
//! 以及 foundation-models 模型列表接口。请求体为 Converse
//! 原生格式：消息内容是内容块列表，附件以内联 base64 携带。

use crate::config::Settings;
use crate::models::{ChatMessage, ContentBlock, Model, ModelList, ModelTag, SystemPrompt};
use crate::providers::error::ProviderError;
use crate::providers::ModelLister;
use crate::streaming::{run_stream, RunState, StreamContext, StreamFormat, StreamRequest, StreamUpdate};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// converse-stream 响应头超时
const CONVERSE_TIMEOUT: Duration = Duration::from_secs(60);

/// 模型列表请求超时
const LIST_MODELS_TIMEOUT: Duration = Duration::from_secs(8);

/// 扩展思考的 token 预算
const THINKING_BUDGET_TOKENS: u32 = 16000;

/// 按模型 ID 选择输出 token 上限
///
/// 全函数：任何模型 ID 都恰好映射到一个上限，默认 4096。
pub fn max_tokens_for(model_id: &str) -> u32 {
    if model_id.contains("claude-3-7-sonnet") || model_id.contains("claude-sonnet-4") {
        return 64000;
    }
    if model_id.contains("deepseek.r1") || model_id.contains("claude-opus-4") {
        return 32000;
    }
    if model_id.starts_with("meta.llama") {
        return 2048;
    }
    4096
}

/// 把内部消息列表序列化为 Converse 原生格式
///
/// 附件字节在这里做 base64 编码。
pub(crate) fn converse_messages_json(messages: &[ChatMessage]) -> Value {
    let converted: Vec<Value> = messages
        .iter()
        .map(|message| {
            let content: Vec<Value> = message
                .content
                .iter()
                .map(|block| match block {
                    ContentBlock::Text { text } => json!({ "text": text }),
                    ContentBlock::Image { format, bytes } => json!({
                        "image": {
                            "format": format,
                            "source": { "bytes": BASE64.encode(bytes) }
                        }
                    }),
                    ContentBlock::Document {
                        format,
                        name,
                        bytes,
                    } => json!({
                        "document": {
                            "format": format,
                            "name": name,
                            "source": { "bytes": BASE64.encode(bytes) }
                        }
                    }),
                })
                .collect();
            json!({ "role": message.role.as_str(), "content": content })
        })
        .collect();
    Value::Array(converted)
}

/// 跨区域推理配置的模型 ID 前缀
///
/// 取区域首段作为前缀，`ap` 映射为 `apac`。
pub fn cross_region_model_id(region: &str, model_id: &str) -> String {
    let mut prefix = region.split('-').next().unwrap_or_default();
    if prefix == "ap" {
        prefix = "apac";
    }
    format!("{}.{}", prefix, model_id)
}

/// 过滤 foundation-models 响应
///
/// 只保留 ACTIVE 且支持按需或跨区域推理的模型，去掉 ID 以
/// `k` 结尾的旧条目和重名模型；支持流式输出的文本模型与
/// 图片模型分别归组。
pub fn filter_model_summaries(response: &Value, region: &str) -> ModelList {
    let mut list = ModelList::default();
    let summaries = match response.get("modelSummaries").and_then(Value::as_array) {
        Some(summaries) => summaries,
        None => return list,
    };

    let mut seen_names: HashSet<String> = HashSet::new();
    for model in summaries {
        let model_id = match model.get("modelId").and_then(Value::as_str) {
            Some(id) => id,
            None => continue,
        };
        let model_name = match model.get("modelName").and_then(Value::as_str) {
            Some(name) => name,
            None => continue,
        };
        let inference_types: Vec<&str> = model
            .get("inferenceTypesSupported")
            .and_then(Value::as_array)
            .map(|types| types.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        let need_cross_region = inference_types.contains(&"INFERENCE_PROFILE");
        let active =
            model.pointer("/modelLifecycle/status").and_then(Value::as_str) == Some("ACTIVE");

        if !active
            || !(inference_types.contains(&"ON_DEMAND") || need_cross_region)
            || model_id.ends_with('k')
            || seen_names.contains(model_name)
        {
            continue;
        }

        let output_modalities: Vec<&str> = model
            .get("outputModalities")
            .and_then(Value::as_array)
            .map(|modalities| modalities.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        let streaming = model
            .get("responseStreamingSupported")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        if output_modalities.contains(&"TEXT") && streaming {
            let model_id = if need_cross_region {
                cross_region_model_id(region, model_id)
            } else {
                model_id.to_string()
            };
            list.text_model
                .push(Model::new(&model_id, model_name, ModelTag::Bedrock));
        } else if output_modalities.contains(&"IMAGE") {
            list.image_model
                .push(Model::new(model_id, model_name, ModelTag::Bedrock));
        }
        seen_names.insert(model_name.to_string());
    }

    list
}

/// Bedrock 直连 Provider
pub struct BedrockProvider {
    pub client: Client,
    pub settings: Settings,
}

impl BedrockProvider {
    pub fn new(client: Client, settings: Settings) -> Self {
        Self { client, settings }
    }

    pub fn is_configured(&self) -> bool {
        !self.settings.bedrock_api_key.is_empty()
    }

    fn runtime_url(&self, model_id: &str, action: &str) -> String {
        format!(
            "https://bedrock-runtime.{}.amazonaws.com/model/{}/{}",
            self.settings.region, model_id, action
        )
    }

    /// 构建 converse-stream 请求体
    pub fn build_converse_body(
        &self,
        messages: &[ChatMessage],
        prompt: Option<&SystemPrompt>,
    ) -> Value {
        let model_id = &self.settings.text_model.model_id;
        let mut body = json!({
            "inferenceConfig": { "maxTokens": max_tokens_for(model_id) },
            "messages": converse_messages_json(messages),
            "additionalModelRequestFields": {},
        });
        if self.settings.thinking_active() {
            body["additionalModelRequestFields"] = json!({
                "reasoning_config": {
                    "type": "enabled",
                    "budget_tokens": THINKING_BUDGET_TOKENS,
                }
            });
        }
        if let Some(prompt) = prompt {
            body["system"] = json!([{ "text": prompt.prompt }]);
        }
        body
    }

    /// 发起 converse-stream 流式对话
    pub async fn converse_stream<F>(
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
        let body = self.build_converse_body(messages, prompt);
        let url = self.runtime_url(&model.model_id, "converse-stream");
        tracing::debug!("[BEDROCK] 发起流式请求: model={}", model.model_id);

        let builder = self
            .client
            .post(&url)
            .header("accept", "*/*")
            .header("content-type", "application/json")
            .bearer_auth(&self.settings.bedrock_api_key)
            .json(&body);

        run_stream(
            StreamRequest {
                builder,
                connect_timeout: CONVERSE_TIMEOUT,
                context: StreamContext::new(&model.model_name, StreamFormat::ConverseStream),
            },
            should_stop,
            cancel,
            on_update,
        )
        .await
    }
}

#[async_trait]
impl ModelLister for BedrockProvider {
    /// 拉取可用模型列表
    async fn list_models(&self) -> Result<ModelList, ProviderError> {
        if !self.is_configured() {
            return Ok(ModelList::empty());
        }
        let url = format!(
            "https://bedrock.{}.amazonaws.com/foundation-models",
            self.settings.region
        );
        let response = self
            .client
            .get(&url)
            .header("content-type", "application/json")
            .bearer_auth(&self.settings.bedrock_api_key)
            .timeout(LIST_MODELS_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!("[BEDROCK] 模型列表请求失败: {} - {}", status, body);
            return Err(ProviderError::from_http_status(status.as_u16(), &body));
        }

        let value: Value = response.json().await?;
        Ok(filter_model_summaries(&value, &self.settings.region))
    }
}

// ============================================================================
// 测试模块
// ============================================================================
