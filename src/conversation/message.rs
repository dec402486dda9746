//! 对话记录中的消息
//!
//! 记录只追加、按插入顺序显示；流式期间仅 text / is_loading 可变，定稿后不再修改。

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 消息角色
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Model,
}

/// 单条消息（文本、生成的图片或出错提示）
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub role: ChatRole,
    pub text: Option<String>,
    /// 生成图片的 data URL（image/jpeg）
    pub image_url: Option<String>,
    /// 生成图片所用的提示词
    pub image_prompt: Option<String>,
    /// 用户随消息附带的参考图片（data URL）
    #[serde(default)]
    pub reference_image_urls: Vec<String>,
    pub is_loading: bool,
    pub is_error: bool,
    pub timestamp: DateTime<Local>,
}

impl ChatMessage {
    fn new(role: ChatRole) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            text: None,
            image_url: None,
            image_prompt: None,
            reference_image_urls: Vec::new(),
            is_loading: false,
            is_error: false,
            timestamp: Local::now(),
        }
    }

    pub fn user(text: impl Into<String>, reference_image_urls: Vec<String>) -> Self {
        Self {
            text: Some(text.into()),
            reference_image_urls,
            ..Self::new(ChatRole::User)
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::new(ChatRole::Model)
        }
    }

    /// 流式回复或图片生成中的占位消息
    pub fn loading(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            is_loading: true,
            ..Self::new(ChatRole::Model)
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            is_error: true,
            ..Self::new(ChatRole::Model)
        }
    }

    pub fn image(image_url: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            image_url: Some(image_url.into()),
            image_prompt: Some(prompt.into()),
            ..Self::new(ChatRole::Model)
        }
    }

    pub fn text_or_empty(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }
}

/// 检索增强返回的引用来源
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundingCitation {
    pub title: Option<String>,
    pub uri: Option<String>,
}

impl GroundingCitation {
    pub fn new(title: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            uri: Some(uri.into()),
        }
    }
}
