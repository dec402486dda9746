//! Mock 网关（用于测试与离线模式，无需 API）
//!
//! 按顺序消费预置的脚本回复；脚本用完后回显用户最后一条文本。发出的请求与生图提示词都会被记录，便于断言。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::{stream, StreamExt};

use crate::conversation::ChatRole;
use crate::core::{ChatError, ServiceError, ValidationError};
use crate::llm::{
    AiGateway, ConversationSession, Part, ResponseChunk, ResponseStream, SessionTurn, TurnRequest,
};

/// 1x1 像素 JPEG，离线模式下作为“生成的图片”
pub const PLACEHOLDER_JPEG_BASE64: &str = "/9j/4AAQSkZJRgABAQEASABIAAD/2wBDAP//////////////////////////////////////////////////////////////////////////////////////wgALCAABAAEBAREA/8QAFBABAAAAAAAAAAAAAAAAAAAAAP/aAAgBAQABPxA=";

/// 一轮预置回复：依次产出 items，hang 为 true 时产出完毕后永远挂起（模拟慢速流）
#[derive(Debug, Clone, Default)]
pub struct ScriptedReply {
    pub items: Vec<Result<ResponseChunk, ServiceError>>,
    pub hang: bool,
    /// send_turn 本身就失败（连接/配额）
    pub fail_on_send: Option<ServiceError>,
}

impl ScriptedReply {
    /// 按片段拆分的纯文本回复
    pub fn chunks<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            items: chunks.into_iter().map(|c| Ok(ResponseChunk::text(c))).collect(),
            ..Self::default()
        }
    }

    pub fn items(items: Vec<Result<ResponseChunk, ServiceError>>) -> Self {
        Self {
            items,
            ..Self::default()
        }
    }

    pub fn send_error(err: ServiceError) -> Self {
        Self {
            fail_on_send: Some(err),
            ..Self::default()
        }
    }

    pub fn then_hang(mut self) -> Self {
        self.hang = true;
        self
    }
}

/// 脚本化网关
#[derive(Debug, Default)]
pub struct ScriptedGateway {
    replies: Mutex<VecDeque<ScriptedReply>>,
    images: Mutex<VecDeque<Result<String, ServiceError>>>,
    sent: Mutex<Vec<TurnRequest>>,
    image_prompts: Mutex<Vec<String>>,
    sessions_opened: Mutex<usize>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_reply(&self, reply: ScriptedReply) -> &Self {
        lock(&self.replies).push_back(reply);
        self
    }

    pub fn push_image(&self, result: Result<String, ServiceError>) -> &Self {
        lock(&self.images).push_back(result);
        self
    }

    /// 已发送的请求（按顺序）
    pub fn sent_turns(&self) -> Vec<TurnRequest> {
        lock(&self.sent).clone()
    }

    pub fn image_prompts(&self) -> Vec<String> {
        lock(&self.image_prompts).clone()
    }

    pub fn sessions_opened(&self) -> usize {
        *lock(&self.sessions_opened)
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl AiGateway for ScriptedGateway {
    async fn open_session(&self, system_prompt: &str) -> Result<ConversationSession, ServiceError> {
        *lock(&self.sessions_opened) += 1;
        Ok(ConversationSession::new(system_prompt))
    }

    async fn send_turn(
        &self,
        session: &ConversationSession,
        request: TurnRequest,
    ) -> Result<ResponseStream, ServiceError> {
        lock(&self.sent).push(request.clone());
        let reply = lock(&self.replies).pop_front().unwrap_or_else(|| {
            ScriptedReply::chunks([format!("Echo from Mock: {}", request.text)])
        });
        if let Some(err) = reply.fail_on_send {
            return Err(err);
        }

        let complete = reply.items.iter().all(|i| i.is_ok()) && !reply.hang;
        if complete {
            let text: String = reply
                .items
                .iter()
                .filter_map(|i| i.as_ref().ok())
                .map(|c| c.text_delta.as_str())
                .collect();
            session
                .record_exchange(
                    SessionTurn {
                        role: ChatRole::User,
                        parts: request.content_parts(),
                    },
                    SessionTurn {
                        role: ChatRole::Model,
                        parts: vec![Part::Text(text)],
                    },
                )
                .await;
        }

        let items = stream::iter(reply.items);
        if reply.hang {
            Ok(Box::pin(items.chain(stream::pending())))
        } else {
            Ok(Box::pin(items))
        }
    }

    async fn synthesize_image(&self, prompt: &str) -> Result<String, ChatError> {
        if prompt.trim().is_empty() {
            return Err(ValidationError::EmptyPrompt.into());
        }
        lock(&self.image_prompts).push(prompt.to_string());
        lock(&self.images)
            .pop_front()
            .unwrap_or_else(|| Ok(PLACEHOLDER_JPEG_BASE64.to_string()))
            .map_err(ChatError::from)
    }
}
