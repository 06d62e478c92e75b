//! 代理服务器 Provider
//!
//! 自建代理后端：对话接口返回裸文本流（末尾内嵌 usage
//! JSON），另有模型列表与升级检查两个辅助接口。辅助接口
//! 失败时一律退回默认值，不打断主流程。

use crate::config::Settings;
use crate::models::{ChatMessage, ModelList, ModelTag, SystemPrompt, UpgradeInfo};
use crate::providers::bedrock::converse_messages_json;
use crate::providers::error::ProviderError;
use crate::providers::ModelLister;
use crate::streaming::{
    run_stream, RunState, StreamContext, StreamFormat, StreamRequest, StreamUpdate,
};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// 对话接口响应头超时（代理部署在近端，给 20 秒足够）
const CONVERSE_TIMEOUT: Duration = Duration::from_secs(20);

/// 模型列表请求超时
const LIST_MODELS_TIMEOUT: Duration = Duration::from_secs(5);

/// 升级检查请求超时
const UPGRADE_TIMEOUT: Duration = Duration::from_secs(5);

/// 代理服务器 Provider
pub struct ProxyProvider {
    pub client: Client,
    pub settings: Settings,
}

impl ProxyProvider {
    pub fn new(client: Client, settings: Settings) -> Self {
        Self { client, settings }
    }

    pub fn is_configured(&self) -> bool {
        self.settings.is_proxy_configured()
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.settings.api_prefix(), path)
    }

    /// 经代理发起流式对话
    ///
    /// 提示词声明不带历史时，只发送最新一条消息。
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
        let mut effective: &[ChatMessage] = messages;
        if let Some(prompt) = prompt {
            if !prompt.include_history && !messages.is_empty() {
                effective = &messages[messages.len() - 1..];
            }
        }

        let mut body = json!({
            "messages": converse_messages_json(effective),
            "modelId": model.model_id,
            "region": self.settings.region,
            "enableThinking": self.settings.thinking_active(),
        });
        if let Some(prompt) = prompt {
            body["system"] = json!([{ "text": prompt.prompt }]);
        }

        let builder = self
            .client
            .post(self.endpoint("/converse"))
            .header("accept", "*/*")
            .header("content-type", "application/json")
            .bearer_auth(&self.settings.api_key)
            .json(&body);

        run_stream(
            StreamRequest {
                builder,
                connect_timeout: CONVERSE_TIMEOUT,
                context: StreamContext::new(&model.model_name, StreamFormat::ProxyText),
            },
            should_stop,
            cancel,
            on_update,
        )
        .await
    }

    /// 升级检查
    ///
    /// 任何失败都退回"无需升级"。
    pub async fn request_upgrade(&self, os: &str, version: &str) -> UpgradeInfo {
        if !self.is_configured() {
            return UpgradeInfo::default();
        }
        let result = self
            .client
            .post(self.endpoint("/upgrade"))
            .header("accept", "application/json")
            .header("content-type", "application/json")
            .bearer_auth(&self.settings.api_key)
            .timeout(UPGRADE_TIMEOUT)
            .json(&json!({ "os": os, "version": version }))
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                response.json::<UpgradeInfo>().await.unwrap_or_default()
            }
            Ok(response) => {
                tracing::warn!("[PROXY] 升级检查失败: HTTP {}", response.status());
                UpgradeInfo::default()
            }
            Err(err) => {
                tracing::warn!("[PROXY] 升级检查失败: {}", err);
                UpgradeInfo::default()
            }
        }
    }
}

#[async_trait]
impl ModelLister for ProxyProvider {
    /// 拉取代理侧可用的模型列表
    async fn list_models(&self) -> Result<ModelList, ProviderError> {
        if !self.is_configured() {
            return Ok(ModelList::empty());
        }
        let response = self
            .client
            .post(self.endpoint("/models"))
            .header("accept", "application/json")
            .header("content-type", "application/json")
            .bearer_auth(&self.settings.api_key)
            .timeout(LIST_MODELS_TIMEOUT)
            .json(&json!({ "region": self.settings.region }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!("[PROXY] 模型列表请求失败: {} - {}", status, body);
            return Err(ProviderError::from_http_status(status.as_u16(), &body));
        }

        let mut list: ModelList = response.json().await?;
        // 代理侧返回的都是 Bedrock 托管模型
        for model in list
            .text_model
            .iter_mut()
            .chain(list.image_model.iter_mut())
        {
            model.model_tag = Some(ModelTag::Bedrock);
        }
        Ok(list)
    }
}

// ============================================================================
// 测试模块
// ============================================================================
