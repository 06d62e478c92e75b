//! 设置存储
//!
//! 对应移动端的键值配置存储。字段与存储键一一对应，
//! serde 序列化后即为导出格式。

use crate::models::{Model, ModelTag};
use serde::{Deserialize, Serialize};

/// 默认区域
pub const DEFAULT_REGION: &str = "us-west-2";

/// 默认文本模型
pub const DEFAULT_TEXT_MODEL_ID: &str = "us.amazon.nova-pro-v1:0";
pub const DEFAULT_TEXT_MODEL_NAME: &str = "Nova Pro";

/// 默认图片模型
pub const DEFAULT_IMAGE_MODEL_ID: &str = "stability.sd3-5-large-v1:0";
pub const DEFAULT_IMAGE_MODEL_NAME: &str = "Stable Diffusion 3.5 Large";

/// 默认图片尺寸
pub const DEFAULT_IMAGE_SIZE: &str = "1024 x 1024";

/// 支持扩展思考的模型显示名
pub const BEDROCK_THINKING_MODELS: [&str; 3] =
    ["Claude 3.7 Sonnet", "Claude Sonnet 4", "Claude Opus 4"];

/// Bedrock 接入方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BedrockConfigMode {
    /// 直连 Bedrock（使用 Bedrock API Key）
    Bedrock,
    /// 经由自建代理服务器
    Server,
}

impl Default for BedrockConfigMode {
    fn default() -> Self {
        Self::Server
    }
}

/// 应用设置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Bedrock 区域
    pub region: String,
    /// 代理服务器地址
    pub api_url: String,
    /// 代理服务器 API Key
    pub api_key: String,
    /// Bedrock API Key（直连模式）
    pub bedrock_api_key: String,
    /// Bedrock 接入方式
    pub bedrock_config_mode: BedrockConfigMode,
    /// OpenAI API Key
    pub openai_api_key: String,
    /// DeepSeek API Key
    pub deepseek_api_key: String,
    /// OpenAI 兼容 API 地址
    pub openai_compat_api_url: String,
    /// OpenAI 兼容 API Key
    pub openai_compat_api_key: String,
    /// OpenAI 请求是否走代理服务器
    pub openai_proxy_enabled: bool,
    /// 扩展思考开关
    pub thinking_enabled: bool,
    /// 当前文本模型
    pub text_model: Model,
    /// 当前图片模型
    pub image_model: Model,
    /// 图片尺寸，如 "1024 x 1024"
    pub image_size: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            api_url: String::new(),
            api_key: String::new(),
            bedrock_api_key: String::new(),
            bedrock_config_mode: BedrockConfigMode::default(),
            openai_api_key: String::new(),
            deepseek_api_key: String::new(),
            openai_compat_api_url: String::new(),
            openai_compat_api_key: String::new(),
            openai_proxy_enabled: false,
            thinking_enabled: false,
            text_model: Model::new(
                DEFAULT_TEXT_MODEL_ID,
                DEFAULT_TEXT_MODEL_NAME,
                ModelTag::Bedrock,
            ),
            image_model: Model::new(
                DEFAULT_IMAGE_MODEL_ID,
                DEFAULT_IMAGE_MODEL_NAME,
                ModelTag::Bedrock,
            ),
            image_size: DEFAULT_IMAGE_SIZE.to_string(),
        }
    }
}

impl Settings {
    /// 代理服务器 API 前缀
    pub fn api_prefix(&self) -> String {
        format!("{}/api", self.api_url.trim_end_matches('/'))
    }

    /// 代理服务器是否已配置（地址合法且有 Key）
    pub fn is_proxy_configured(&self) -> bool {
        url::Url::parse(&self.api_url)
            .map(|u| u.scheme() == "http" || u.scheme() == "https")
            .unwrap_or(false)
            && !self.api_key.is_empty()
    }

    /// 当前文本模型的来源标签
    pub fn text_model_tag(&self) -> ModelTag {
        self.text_model.resolve_tag()
    }

    /// 当前模型是否支持扩展思考
    pub fn is_thinking_model(&self) -> bool {
        BEDROCK_THINKING_MODELS.contains(&self.text_model.model_name.as_str())
    }

    /// 本次请求是否启用扩展思考
    pub fn thinking_active(&self) -> bool {
        self.is_thinking_model() && self.thinking_enabled
    }

    /// 解析图片尺寸为 (宽, 高)，解析失败退回默认 1024x1024
    pub fn image_dimensions(&self) -> (u32, u32) {
        let mut parts = self.image_size.split('x');
        let width = parts
            .next()
            .and_then(|p| p.trim().parse::<u32>().ok())
            .unwrap_or(1024);
        let height = parts
            .next()
            .and_then(|p| p.trim().parse::<u32>().ok())
            .unwrap_or(width);
        (width, height)
    }
}

// ============================================================================
// 测试模块
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.region, "us-west-2");
        assert_eq!(settings.text_model.model_name, "Nova Pro");
        assert!(!settings.is_proxy_configured());
    }

    #[test]
    fn test_proxy_configured() {
        let settings = Settings {
            api_url: "https://example.com".to_string(),
            api_key: "secret".to_string(),
            ..Default::default()
        };
        assert!(settings.is_proxy_configured());
        assert_eq!(settings.api_prefix(), "https://example.com/api");

        let no_key = Settings {
            api_url: "https://example.com".to_string(),
            ..Default::default()
        };
        assert!(!no_key.is_proxy_configured());

        let bad_url = Settings {
            api_url: "example.com".to_string(),
            api_key: "secret".to_string(),
            ..Default::default()
        };
        assert!(!bad_url.is_proxy_configured());
    }

    #[test]
    fn test_image_dimensions() {
        let mut settings = Settings::default();
        assert_eq!(settings.image_dimensions(), (1024, 1024));

        settings.image_size = "512 x 512".to_string();
        assert_eq!(settings.image_dimensions(), (512, 512));

        settings.image_size = "garbage".to_string();
        assert_eq!(settings.image_dimensions(), (1024, 1024));
    }

    #[test]
    fn test_thinking_active() {
        let mut settings = Settings::default();
        settings.thinking_enabled = true;
        // Nova Pro 不支持思考
        assert!(!settings.thinking_active());

        settings.text_model = Model::new(
            "us.anthropic.claude-sonnet-4-20250514-v1:0",
            "Claude Sonnet 4",
            ModelTag::Bedrock,
        );
        assert!(settings.thinking_active());

        settings.thinking_enabled = false;
        assert!(!settings.thinking_active());
    }
}
