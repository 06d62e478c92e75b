//! 数据模型模块
//!
//! 定义聊天消息、模型信息和用量统计等核心数据类型。

pub mod chat;

pub use chat::{
    ChatMessage, ChatMode, ContentBlock, Model, ModelList, ModelTag, Role, SystemPrompt,
    UpgradeInfo, Usage,
};
