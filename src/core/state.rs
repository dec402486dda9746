//! 状态定义：UiState 投影
//!
//! UI 只持有轻量的 UiState（阶段、消息记录、待确认、暂存图片、输入锁、提示）；完整状态由 ConversationController 维护并投影到 UiState。

use serde::Serialize;

use crate::conversation::{
    AttachmentSource, ChatMessage, ConfirmationKind, PendingConfirmation, ReferenceImage,
};

/// UI 看到的「投影」状态，轻量且易于渲染
#[derive(Clone, Debug, Serialize)]
pub struct UiState {
    pub phase: ChatPhase,
    pub context_tag: String,
    pub history: Vec<ChatMessage>,
    pub pending: PendingConfirmation,
    pub staged: Vec<StagedAttachment>,
    pub input_locked: bool,
    /// 同步返回给提交方的短暂提示（校验错误、图片已添加等），不进入消息记录
    pub notice: Option<String>,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            phase: ChatPhase::Idle,
            context_tag: "general".to_string(),
            history: Vec::new(),
            pending: PendingConfirmation::None,
            staged: Vec::new(),
            input_locked: false,
            notice: None,
        }
    }
}

/// 对话阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", content = "kind", rename_all = "snake_case")]
pub enum ChatPhase {
    Idle,
    Streaming,
    AwaitingConfirmation(ConfirmationKind),
    GeneratingArtifact(ConfirmationKind),
}

impl ChatPhase {
    /// 有一轮正在进行（流式或生成中），输入应锁定
    pub fn is_busy(&self) -> bool {
        matches!(self, ChatPhase::Streaming | ChatPhase::GeneratingArtifact(_))
    }
}

/// 暂存图片的展示摘要（不含二进制）
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StagedAttachment {
    pub name: String,
    pub mime_type: String,
    pub size: usize,
    pub source: AttachmentSource,
}

impl From<&ReferenceImage> for StagedAttachment {
    fn from(image: &ReferenceImage) -> Self {
        Self {
            name: image.name.clone(),
            mime_type: image.mime_type.clone(),
            size: image.payload.len(),
            source: image.source,
        }
    }
}
