//! 图片生成 Provider
//!
//! 两条路径：直连 Bedrock 的 invoke 端点（按模型家族拼装
//! 原生请求体），或经代理服务器的 `/api/image`。图片生成没
//! 有流式，整个请求一次往返，超时按目标分辨率放大。

use crate::config::{BedrockConfigMode, Settings};
use crate::models::Usage;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::Rng;
use reqwest::Client;
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// 参考图附件（格式 + 原始字节）
pub type RefImage<'a> = (&'a str, &'a [u8]);

/// 图片生成错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    /// 请求被中止（超时或用户取消，由调用方按停止状态区分文案）
    Aborted,
    /// 网络错误
    Network(String),
    /// DNS / 连接失败
    Connect(String),
    /// 服务端返回的错误信息（原样展示）
    Service(String),
}

impl fmt::Display for ImageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageError::Aborted => write!(f, "request aborted"),
            ImageError::Network(msg) => write!(f, "network error: {}", msg),
            ImageError::Connect(msg) => write!(f, "connect failed: {}", msg),
            ImageError::Service(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ImageError {}

impl From<reqwest::Error> for ImageError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ImageError::Aborted
        } else if err.is_connect() {
            ImageError::Connect(err.to_string())
        } else {
            ImageError::Network(err.to_string())
        }
    }
}

/// 按目标分辨率选择请求超时
///
/// 高分辨率出图更慢，1024px 及以上给 120 秒，其余 90 秒。
pub fn image_timeout(width: u32) -> Duration {
    if width >= 1024 {
        Duration::from_secs(120)
    } else {
        Duration::from_secs(90)
    }
}

/// 按模型家族拼装 invoke 原生请求体
pub fn native_image_request(
    model_id: &str,
    prompt: &str,
    width: u32,
    height: u32,
    seed: u32,
    ref_image: Option<RefImage<'_>>,
) -> Value {
    if model_id.starts_with("amazon") {
        match ref_image {
            None => json!({
                "taskType": "TEXT_IMAGE",
                "textToImageParams": { "text": prompt },
                "imageGenerationConfig": {
                    "numberOfImages": 1,
                    "quality": "standard",
                    "cfgScale": 8.0,
                    "height": height,
                    "width": width,
                    "seed": seed,
                },
            }),
            Some((_, bytes)) => json!({
                "taskType": "IMAGE_VARIATION",
                "imageVariationParams": {
                    "text": prompt,
                    "negativeText": "bad quality, low resolution, cartoon",
                    "images": [BASE64.encode(bytes)],
                    "similarityStrength": 0.7,
                },
                "imageGenerationConfig": {
                    "numberOfImages": 1,
                    "height": height,
                    "width": width,
                    "cfgScale": 6.5,
                },
            }),
        }
    } else if model_id.starts_with("stability.") {
        match ref_image {
            None => json!({
                "prompt": prompt,
                "output_format": "jpeg",
                "mode": "text-to-image",
                "aspect_ratio": "1:1",
            }),
            Some((_, bytes)) => json!({
                "prompt": prompt,
                "output_format": "jpeg",
                "mode": "image-to-image",
                "image": BASE64.encode(bytes),
                "strength": 0.5,
            }),
        }
    } else {
        tracing::warn!("[IMAGE] 未知的图片模型家族: {}", model_id);
        json!({})
    }
}

/// 图片生成 Provider
pub struct ImageProvider {
    pub client: Client,
    pub settings: Settings,
}

impl ImageProvider {
    pub fn new(client: Client, settings: Settings) -> Self {
        Self { client, settings }
    }

    /// 直连 Bedrock 生成图片，成功时返回 base64 图片数据
    pub async fn generate_with_api_key(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
        ref_image: Option<RefImage<'_>>,
    ) -> Result<String, ImageError> {
        let model_id = &self.settings.image_model.model_id;
        let (width, height) = self.settings.image_dimensions();
        let seed = rand::thread_rng().gen_range(0..2147483647u32);
        let body = native_image_request(model_id, prompt, width, height, seed, ref_image);
        let url = format!(
            "https://bedrock-runtime.{}.amazonaws.com/model/{}/invoke",
            self.settings.region, model_id
        );

        let builder = self
            .client
            .post(&url)
            .header("accept", "*/*")
            .header("content-type", "application/json")
            .bearer_auth(&self.settings.bedrock_api_key)
            .timeout(image_timeout(width))
            .json(&body);

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(ImageError::Aborted),
            result = builder.send() => result?,
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| {
                    v.get("message")
                        .or_else(|| v.get("Message"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or(text);
            return Err(ImageError::Service(detail));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|err| ImageError::Network(err.to_string()))?;
        extract_image_payload(&data)
    }

    /// 经代理服务器生成图片
    pub async fn generate_via_proxy(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
        ref_image: Option<RefImage<'_>>,
    ) -> Result<String, ImageError> {
        let (width, height) = self.settings.image_dimensions();
        let mut body = json!({
            "prompt": prompt,
            "modelId": self.settings.image_model.model_id,
            "region": self.settings.region,
            "width": width.to_string(),
            "height": height.to_string(),
        });
        if let Some((format, bytes)) = ref_image {
            body["refImages"] = json!([{
                "format": format,
                "source": { "bytes": BASE64.encode(bytes) }
            }]);
        }

        let builder = self
            .client
            .post(format!("{}/image", self.settings.api_prefix()))
            .header("accept", "*/*")
            .header("content-type", "application/json")
            .bearer_auth(&self.settings.api_key)
            .timeout(image_timeout(width))
            .json(&body);

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(ImageError::Aborted),
            result = builder.send() => result?,
        };

        if !response.status().is_success() {
            let value: Value = response.json().await.unwrap_or_default();
            let detail = value
                .get("detail")
                .and_then(Value::as_str)
                .unwrap_or("image request failed")
                .to_string();
            return Err(ImageError::Service(detail));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|err| ImageError::Network(err.to_string()))?;
        if let Some(error) = data.get("error").and_then(Value::as_str) {
            return Err(ImageError::Service(error.to_string()));
        }
        extract_image_payload(&data)
    }

    /// 生成一张图片并附带按分辨率档位计数的用量
    pub async fn generate(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
        ref_image: Option<RefImage<'_>>,
    ) -> Result<(String, Usage), ImageError> {
        let image = match self.settings.bedrock_config_mode {
            BedrockConfigMode::Bedrock => {
                self.generate_with_api_key(prompt, cancel, ref_image).await?
            }
            BedrockConfigMode::Server => {
                self.generate_via_proxy(prompt, cancel, ref_image).await?
            }
        };
        let (width, _) = self.settings.image_dimensions();
        let usage = Usage::for_image(&self.settings.image_model.model_name, width);
        Ok((image, usage))
    }
}

/// 从响应里取出 base64 图片数据
fn extract_image_payload(data: &Value) -> Result<String, ImageError> {
    let image = data
        .get("images")
        .and_then(Value::as_array)
        .and_then(|images| images.first())
        .and_then(Value::as_str)
        .or_else(|| data.get("image").and_then(Value::as_str))
        .unwrap_or_default();
    if image.is_empty() {
        Err(ImageError::Service(
            "Image data is empty in the response".to_string(),
        ))
    } else {
        Ok(image.to_string())
    }
}

// ============================================================================
// 测试模块
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_timeout_scales_with_resolution() {
        assert_eq!(image_timeout(512), Duration::from_secs(90));
        assert_eq!(image_timeout(1024), Duration::from_secs(120));
        assert_eq!(image_timeout(2048), Duration::from_secs(120));
    }

    #[test]
    fn test_native_request_amazon_text_to_image() {
        let body =
            native_image_request("amazon.nova-canvas-v1:0", "a cat", 1024, 1024, 42, None);
        assert_eq!(body["taskType"], "TEXT_IMAGE");
        assert_eq!(body["textToImageParams"]["text"], "a cat");
        assert_eq!(body["imageGenerationConfig"]["seed"], 42);
        assert_eq!(body["imageGenerationConfig"]["width"], 1024);
    }

    #[test]
    fn test_native_request_amazon_variation_with_ref() {
        let bytes = [1u8, 2, 3];
        let body = native_image_request(
            "amazon.nova-canvas-v1:0",
            "variations",
            512,
            512,
            1,
            Some(("png", &bytes)),
        );
        assert_eq!(body["taskType"], "IMAGE_VARIATION");
        assert_eq!(
            body["imageVariationParams"]["images"][0],
            BASE64.encode(bytes)
        );
    }

    #[test]
    fn test_native_request_stability() {
        let body = native_image_request("stability.sd3-5-large-v1:0", "a dog", 1024, 1024, 7, None);
        assert_eq!(body["mode"], "text-to-image");
        assert_eq!(body["prompt"], "a dog");

        let bytes = [9u8];
        let body = native_image_request(
            "stability.sd3-5-large-v1:0",
            "a dog",
            1024,
            1024,
            7,
            Some(("png", &bytes)),
        );
        assert_eq!(body["mode"], "image-to-image");
        assert_eq!(body["image"], BASE64.encode(bytes));
    }

    #[test]
    fn test_native_request_unknown_family() {
        let body = native_image_request("mystery.model", "x", 512, 512, 0, None);
        assert_eq!(body, json!({}));
    }

    #[test]
    fn test_extract_image_payload() {
        assert_eq!(
            extract_image_payload(&json!({"images": ["abc"]})).unwrap(),
            "abc"
        );
        assert_eq!(
            extract_image_payload(&json!({"image": "xyz"})).unwrap(),
            "xyz"
        );
        assert!(extract_image_payload(&json!({"images": []})).is_err());
        assert!(extract_image_payload(&json!({})).is_err());
    }
}
