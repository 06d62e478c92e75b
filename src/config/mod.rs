//! 配置管理模块
//!
//! 应用侧键值存储在核心中的投影：当前模型选择、区域、
//! 各 Provider 的凭证以及思考/代理开关。
//! 核心只读取这些配置，不负责持久化。

mod settings;

pub use settings::{
    BedrockConfigMode, Settings, BEDROCK_THINKING_MODELS, DEFAULT_IMAGE_MODEL_ID,
    DEFAULT_IMAGE_MODEL_NAME, DEFAULT_IMAGE_SIZE, DEFAULT_REGION, DEFAULT_TEXT_MODEL_ID,
    DEFAULT_TEXT_MODEL_NAME,
};
