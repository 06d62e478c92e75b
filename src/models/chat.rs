//! 聊天数据类型
//!
//! 定义统一的内部消息模型（角色 + 内容块列表）、模型信息和
//! 用量快照。各 Provider 在发请求时把这些类型转换为自己的
//! 线上格式，解码时再转换回来。

use serde::{Deserialize, Serialize};

/// 聊天模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatMode {
    /// 文本对话
    Text,
    /// 图片生成
    Image,
}

/// 模型来源标签
///
/// 决定请求走哪条协议路径（Converse-stream / OpenAI SSE / 代理）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelTag {
    /// Bedrock 托管模型
    Bedrock,
    /// OpenAI 官方 API
    OpenAI,
    /// DeepSeek API
    DeepSeek,
    /// 自定义 OpenAI 兼容 API
    OpenAICompatible,
}

/// 模型信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    /// 模型 ID（请求路径 / 请求体中使用）
    pub model_id: String,
    /// 模型显示名称（用量统计按此名称归并）
    pub model_name: String,
    /// 来源标签（旧数据可能缺失，缺失时按 ID 推断）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_tag: Option<ModelTag>,
}

impl Model {
    pub fn new(model_id: &str, model_name: &str, model_tag: ModelTag) -> Self {
        Self {
            model_id: model_id.to_string(),
            model_name: model_name.to_string(),
            model_tag: Some(model_tag),
        }
    }

    /// 解析模型的来源标签
    ///
    /// 存储了标签时直接使用；否则按模型 ID 推断：
    /// DeepSeek 官方模型 ID → DeepSeek，含 `gpt` → OpenAI，其余 → Bedrock。
    pub fn resolve_tag(&self) -> ModelTag {
        if let Some(tag) = self.model_tag {
            return tag;
        }
        if self.model_id == "deepseek-chat" || self.model_id == "deepseek-reasoner" {
            return ModelTag::DeepSeek;
        }
        if self.model_id.contains("gpt") {
            return ModelTag::OpenAI;
        }
        ModelTag::Bedrock
    }
}

/// 模型列表（按输出模态分组）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelList {
    #[serde(default)]
    pub text_model: Vec<Model>,
    #[serde(default)]
    pub image_model: Vec<Model>,
}

impl ModelList {
    /// 返回空列表（请求失败时的兜底值）
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.text_model.is_empty() && self.image_model.is_empty()
    }
}

/// 消息角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// 消息内容块
///
/// 附件以原始字节携带，各 Provider 序列化请求体时再做 base64 编码。
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    /// 纯文本
    Text { text: String },
    /// 图片附件
    Image { format: String, bytes: Vec<u8> },
    /// 文档附件
    Document {
        format: String,
        name: String,
        bytes: Vec<u8>,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    /// 是否为图片块
    pub fn is_image(&self) -> bool {
        matches!(self, ContentBlock::Image { .. })
    }
}

/// 统一的内部聊天消息
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl ChatMessage {
    /// 创建纯文本消息
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentBlock::text(text)],
        }
    }

    /// 消息是否携带图片附件
    pub fn has_image(&self) -> bool {
        self.content.iter().any(ContentBlock::is_image)
    }

    /// 消息的首个文本块内容（图片生成提示词取自这里）
    pub fn first_text(&self) -> &str {
        for block in &self.content {
            if let ContentBlock::Text { text } = block {
                return text;
            }
        }
        ""
    }
}

/// 系统提示词
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemPrompt {
    pub prompt: String,
    /// 为 false 时只携带最新一条消息（部分角色类提示词不需要历史）
    #[serde(default = "default_include_history")]
    pub include_history: bool,
}

fn default_include_history() -> bool {
    true
}

impl SystemPrompt {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            include_history: true,
        }
    }
}

/// 用量快照
///
/// 一次请求内的 token 统计。线上负载不携带 `modelName`，
/// 由聚合器在转发前补上当前模型的显示名称。
/// 字段名与代理后端的 usage JSON 保持一致（camelCase），
/// 可直接反序列化。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    #[serde(default)]
    pub model_name: String,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
    /// 1024px 档图片张数
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_count: Option<u32>,
    /// 512px 档图片张数
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub small_image_count: Option<u32>,
    /// 2048px 档图片张数
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub large_image_count: Option<u32>,
}

impl Usage {
    /// 按图片宽度归入对应的计数档位
    pub fn for_image(model_name: &str, width: u32) -> Self {
        let mut usage = Usage {
            model_name: model_name.to_string(),
            ..Default::default()
        };
        if width <= 512 {
            usage.small_image_count = Some(1);
        } else if width <= 1024 {
            usage.image_count = Some(1);
        } else {
            usage.large_image_count = Some(1);
        }
        usage
    }
}

/// 升级检查结果
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeInfo {
    #[serde(default)]
    pub need_upgrade: bool,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub url: String,
}

// ============================================================================
// 测试模块
// ============================================================================
