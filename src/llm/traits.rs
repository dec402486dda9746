//! AI 网关抽象
//!
//! 所有后端（Gemini / Mock）实现 AiGateway：open_session（建立对话上下文）、send_turn（流式回复）、
//! synthesize_image（文生图，返回 base64 JPEG）。会话句柄是显式值，由 Controller 持有，不存在全局会话。

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::conversation::{ChatRole, GroundingCitation};
use crate::core::{ChatError, ServiceError};

/// 发送给模型的一个内容片段：文本或内联二进制（参考图片）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Part {
    Text(String),
    InlineData { mime_type: String, data: String },
}

/// 会话历史中的一轮（user 或 model）
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionTurn {
    pub role: ChatRole,
    pub parts: Vec<Part>,
}

/// 远端对话上下文句柄；clone 共享同一份历史
#[derive(Clone, Debug)]
pub struct ConversationSession {
    pub id: Uuid,
    pub system_prompt: Arc<str>,
    history: Arc<Mutex<Vec<SessionTurn>>>,
}

impl ConversationSession {
    pub fn new(system_prompt: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            system_prompt: Arc::from(system_prompt),
            history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub async fn history(&self) -> Vec<SessionTurn> {
        self.history.lock().await.clone()
    }

    /// 一轮成功完成后追加 user + model 两条
    pub async fn record_exchange(&self, user: SessionTurn, model: SessionTurn) {
        let mut history = self.history.lock().await;
        history.push(user);
        history.push(model);
    }
}

/// 一次发送：多段内容时内联图片在前、文本在最后
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnRequest {
    pub text: String,
    pub parts: Vec<Part>,
    /// 场景标签（如 studies-financialmarkets），决定是否启用搜索
    pub context_tag: Option<String>,
}

impl TurnRequest {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            parts: Vec::new(),
            context_tag: None,
        }
    }

    pub fn with_context(mut self, tag: impl Into<String>) -> Self {
        self.context_tag = Some(tag.into());
        self
    }

    /// 参考图片作为内联片段，末尾追加纯文本提示
    pub fn with_images(mut self, images: Vec<(String, String)>) -> Self {
        if images.is_empty() {
            return self;
        }
        self.parts = images
            .into_iter()
            .map(|(mime_type, data)| Part::InlineData { mime_type, data })
            .collect();
        self.parts.push(Part::Text(self.text.clone()));
        self
    }

    /// 实际发送的内容：有内联片段时用片段，否则只有文本
    pub fn content_parts(&self) -> Vec<Part> {
        if self.parts.is_empty() {
            vec![Part::Text(self.text.clone())]
        } else {
            self.parts.clone()
        }
    }

    /// 用于搜索触发判断的文本（多段时取文本片段）
    pub fn text_for_search(&self) -> &str {
        self.parts
            .iter()
            .find_map(|p| match p {
                Part::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .unwrap_or(self.text.as_str())
    }
}

/// 流中的一段增量回复
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseChunk {
    pub text_delta: String,
    pub citations: Option<Vec<GroundingCitation>>,
}

impl ResponseChunk {
    pub fn text(delta: impl Into<String>) -> Self {
        Self {
            text_delta: delta.into(),
            citations: None,
        }
    }

    pub fn with_citations(mut self, citations: Vec<GroundingCitation>) -> Self {
        self.citations = Some(citations);
        self
    }
}

/// 惰性、有限、不可重启的增量回复序列
pub type ResponseStream = Pin<Box<dyn Stream<Item = Result<ResponseChunk, ServiceError>> + Send>>;

/// AI 网关 trait
#[async_trait]
pub trait AiGateway: Send + Sync {
    /// 建立新的对话上下文
    async fn open_session(&self, system_prompt: &str) -> Result<ConversationSession, ServiceError>;

    /// 发送一轮对话，返回增量回复流
    async fn send_turn(
        &self,
        session: &ConversationSession,
        request: TurnRequest,
    ) -> Result<ResponseStream, ServiceError>;

    /// 文生图，返回 base64 编码的 JPEG；空提示词在发请求前以 ValidationError 拒绝
    async fn synthesize_image(&self, prompt: &str) -> Result<String, ChatError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_images_precede_trailing_text() {
        let req = TurnRequest::text("describe")
            .with_images(vec![("image/png".into(), "AAAA".into()), ("image/jpeg".into(), "BBBB".into())]);
        let parts = req.content_parts();
        assert_eq!(parts.len(), 3);
        assert!(matches!(&parts[0], Part::InlineData { mime_type, .. } if mime_type == "image/png"));
        assert_eq!(parts[2], Part::Text("describe".into()));
        assert_eq!(req.text_for_search(), "describe");
    }

    #[test]
    fn test_plain_text_request() {
        let req = TurnRequest::text("hola").with_images(vec![]);
        assert_eq!(req.content_parts(), vec![Part::Text("hola".into())]);
    }

    #[tokio::test]
    async fn test_session_history_shared_between_clones() {
        let session = ConversationSession::new("sys");
        let clone = session.clone();
        clone
            .record_exchange(
                SessionTurn { role: ChatRole::User, parts: vec![Part::Text("hi".into())] },
                SessionTurn { role: ChatRole::Model, parts: vec![Part::Text("hello".into())] },
            )
            .await;
        assert_eq!(session.history().await.len(), 2);
    }
}
