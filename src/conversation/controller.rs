//! 对话控制器：状态机
//!
//! 唯一拥有消息记录、待确认状态、暂存图片与当前会话的组件。每次提交：
//! 1. 取走暂存图片，追加用户消息；
//! 2. 若有待确认（Image / MultiImage / VideoPlan）先按用户回复处理；
//! 3. 否则（或 VideoPlan 被隐式放弃）走普通流式轮次，结束后解析确认标记，更新待确认状态。
//!
//! 服务错误在这里被吸收为消息记录中的错误消息，会话保持可用；校验错误同步返回给调用方。

use std::path::Path;
use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, AttachmentsSection};
use crate::conversation::aggregator::{failure_text, AggregateOutcome, StreamAggregator};
use crate::conversation::context::{system_instruction, ChatContext, Greetings};
use crate::conversation::intent::{self, ConfirmationKind, PendingConfirmation};
use crate::conversation::{AttachmentEvent, AttachmentManager, ChatMessage, ReferenceImage};
use crate::core::{
    ChatError, ChatPhase, ServiceError, SessionSupervisor, StagedAttachment, UiState,
    ValidationError,
};
use crate::llm::{AiGateway, ConversationSession, TurnRequest};

pub const ATTACHMENT_ADDED_NOTICE: &str = "¡Imagen añadida como referencia!";

/// 控制器的构造参数
#[derive(Clone, Debug)]
pub struct ControllerOptions {
    pub name: String,
    pub context: ChatContext,
    pub greeting_override: Option<String>,
    pub attachments: AttachmentsSection,
    /// true 时 VideoPlan 与 Image 一致：非肯定回复一律取消并提示
    pub unify_video_plan_cancellation: bool,
}

impl ControllerOptions {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            name: cfg.app.name.clone(),
            context: ChatContext::from_tag(&cfg.app.context),
            greeting_override: cfg.app.greeting.clone(),
            attachments: cfg.attachments.clone(),
            unify_video_plan_cancellation: cfg.conversation.unify_video_plan_cancellation,
        }
    }
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// 一次提交的结果
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnOutcome {
    /// 流式轮次正常结束；附带解析出的新待确认状态
    Streamed(PendingConfirmation),
    /// 流式轮次失败（错误消息已写入记录）
    StreamFailed(ServiceError),
    ArtifactGenerated(ConfirmationKind),
    /// 生图失败（错误消息已写入记录）
    ArtifactFailed(ConfirmationKind, ServiceError),
    /// 用户拒绝了确认，已追加取消提示
    Declined(ConfirmationKind),
    /// 会话在进行中被替换
    Cancelled,
}

pub struct ConversationController {
    gateway: Arc<dyn AiGateway>,
    session: ConversationSession,
    supervisor: SessionSupervisor,
    context: ChatContext,
    greetings: Greetings,
    system_prompt: String,
    transcript: Vec<ChatMessage>,
    pending: PendingConfirmation,
    attachments: AttachmentManager,
    /// 进行中的活动：Idle / Streaming / GeneratingArtifact
    activity: ChatPhase,
    notice: Option<String>,
    unify_video_plan_cancellation: bool,
    state_tx: watch::Sender<UiState>,
}

impl ConversationController {
    /// 打开会话并写入问候语，进入 Idle
    pub async fn start(
        gateway: Arc<dyn AiGateway>,
        options: ControllerOptions,
    ) -> Result<Self, ServiceError> {
        let system_prompt = system_instruction(&options.name);
        let session = gateway.open_session(&system_prompt).await?;
        let greetings = Greetings::resolve(
            &options.name,
            &options.context,
            options.greeting_override.as_deref(),
        );
        tracing::info!(
            session = %session.id,
            context = %options.context,
            "conversation session opened"
        );

        let (state_tx, _) = watch::channel(UiState::default());
        let controller = Self {
            gateway,
            session,
            supervisor: SessionSupervisor::new(),
            transcript: vec![ChatMessage::model(greetings.initial.clone())],
            context: options.context,
            greetings,
            system_prompt,
            pending: PendingConfirmation::None,
            attachments: AttachmentManager::from_config(&options.attachments),
            activity: ChatPhase::Idle,
            notice: None,
            unify_video_plan_cancellation: options.unify_video_plan_cancellation,
            state_tx,
        };
        controller.publish();
        Ok(controller)
    }

    pub fn subscribe(&self) -> watch::Receiver<UiState> {
        self.state_tx.subscribe()
    }

    pub fn attachment_events(&self) -> broadcast::Receiver<AttachmentEvent> {
        self.attachments.subscribe()
    }

    /// 当前会话的取消 token；开始新对话后失效
    pub fn session_token(&self) -> CancellationToken {
        self.supervisor.session_token()
    }

    pub fn shutdown(&self) {
        self.supervisor.shutdown();
    }

    pub fn transcript(&self) -> &[ChatMessage] {
        &self.transcript
    }

    pub fn pending(&self) -> &PendingConfirmation {
        &self.pending
    }

    pub fn attachments(&self) -> &AttachmentManager {
        &self.attachments
    }

    pub fn session(&self) -> &ConversationSession {
        &self.session
    }

    pub fn context(&self) -> &ChatContext {
        &self.context
    }

    pub fn phase(&self) -> ChatPhase {
        if self.activity.is_busy() {
            return self.activity;
        }
        match self.pending.kind() {
            Some(kind) => ChatPhase::AwaitingConfirmation(kind),
            None => ChatPhase::Idle,
        }
    }

    pub fn snapshot(&self) -> UiState {
        let phase = self.phase();
        UiState {
            phase,
            context_tag: self.context.tag(),
            history: self.transcript.clone(),
            pending: self.pending.clone(),
            staged: self
                .attachments
                .staged()
                .iter()
                .map(StagedAttachment::from)
                .collect(),
            input_locked: phase.is_busy(),
            notice: self.notice.clone(),
        }
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.snapshot());
    }

    fn push_message(&mut self, message: ChatMessage) -> usize {
        self.transcript.push(message);
        self.transcript.len() - 1
    }

    // ---------- 暂存图片 ----------

    pub async fn attach_path(&mut self, path: &Path) -> Result<usize, ValidationError> {
        let result = self.attachments.add_path(path).await;
        self.after_attachment_change(&result);
        result
    }

    pub async fn paste(&mut self, pasted: &str) -> Result<usize, ValidationError> {
        let result = self.attachments.add_pasted(pasted).await;
        self.after_attachment_change(&result);
        result
    }

    /// 将记录中第 message_index 条消息的生成图片复用为参考
    pub fn reuse_image(&mut self, message_index: usize) -> Result<usize, ValidationError> {
        let result = match self
            .transcript
            .get(message_index)
            .and_then(|m| m.image_url.clone())
        {
            Some(url) => self.attachments.add_generated(&url),
            None => Err(ValidationError::NoSuchImage(message_index)),
        };
        self.after_attachment_change(&result);
        result
    }

    pub fn remove_attachment(&mut self, index: usize) -> Result<(), ValidationError> {
        let result = self.attachments.remove(index).map(|removed| {
            tracing::debug!(name = %removed.name, "attachment removed");
        });
        self.notice = result.as_ref().err().map(ToString::to_string);
        self.publish();
        result
    }

    fn after_attachment_change(&mut self, result: &Result<usize, ValidationError>) {
        self.notice = Some(match result {
            Ok(_) => ATTACHMENT_ADDED_NOTICE.to_string(),
            Err(e) => {
                tracing::warn!("attachment rejected: {}", e);
                e.to_string()
            }
        });
        self.publish();
    }

    // ---------- 提交 ----------

    /// 提交一轮用户输入（可带暂存图片）
    pub async fn submit(&mut self, text: &str) -> Result<TurnOutcome, ChatError> {
        let text = text.trim();
        if text.is_empty() && self.attachments.is_empty() {
            return Err(ValidationError::EmptyMessage.into());
        }

        self.notice = None;
        let images = self.attachments.drain_for_submission();
        let reference_urls = images.iter().map(|i| i.display_url.clone()).collect();
        self.push_message(ChatMessage::user(text, reference_urls));

        match self.pending.take() {
            PendingConfirmation::AwaitingImage(description) => {
                self.resolve_image(ConfirmationKind::Image, description, text)
                    .await
            }
            PendingConfirmation::AwaitingMultiImage(description) => {
                self.resolve_image(ConfirmationKind::MultiImage, description, text)
                    .await
            }
            PendingConfirmation::AwaitingVideoPlan(description) => {
                if intent::is_affirmative(text) {
                    let request = TurnRequest::text(video_plan_prompt(&description))
                        .with_context(self.context.tag());
                    return Ok(self.stream_turn(request).await);
                }
                if intent::is_negative(text) || self.unify_video_plan_cancellation {
                    return Ok(self.decline(ConfirmationKind::VideoPlan));
                }
                tracing::info!("video plan confirmation abandoned, sending as a new turn");
                let request = self.default_request(text, &images);
                Ok(self.stream_turn(request).await)
            }
            PendingConfirmation::None => {
                let request = self.default_request(text, &images);
                Ok(self.stream_turn(request).await)
            }
        }
    }

    fn default_request(&self, text: &str, images: &[ReferenceImage]) -> TurnRequest {
        TurnRequest::text(text)
            .with_context(self.context.tag())
            .with_images(images.iter().map(|i| i.inline_part()).collect())
    }

    async fn resolve_image(
        &mut self,
        kind: ConfirmationKind,
        description: String,
        reply: &str,
    ) -> Result<TurnOutcome, ChatError> {
        if intent::is_affirmative(reply) {
            self.generate_artifact(kind, description).await
        } else {
            Ok(self.decline(kind))
        }
    }

    fn decline(&mut self, kind: ConfirmationKind) -> TurnOutcome {
        tracing::info!(?kind, "confirmation declined");
        self.push_message(ChatMessage::model(cancellation_notice(kind)));
        self.publish();
        TurnOutcome::Declined(kind)
    }

    async fn generate_artifact(
        &mut self,
        kind: ConfirmationKind,
        description: String,
    ) -> Result<TurnOutcome, ChatError> {
        self.activity = ChatPhase::GeneratingArtifact(kind);
        let loading = self.push_message(ChatMessage::loading(loading_text(kind)));
        self.publish();

        let gateway = Arc::clone(&self.gateway);
        let token = self.supervisor.session_token();
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            r = gateway.synthesize_image(&description) => Some(r),
        };
        self.transcript.remove(loading);
        self.activity = ChatPhase::Idle;

        let outcome = match result {
            None => {
                tracing::info!(?kind, "image generation cancelled");
                Ok(TurnOutcome::Cancelled)
            }
            Some(Ok(base64_jpeg)) => {
                tracing::info!(?kind, "image generated");
                let url = format!("data:image/jpeg;base64,{}", base64_jpeg);
                self.push_message(ChatMessage::image(url, description));
                Ok(TurnOutcome::ArtifactGenerated(kind))
            }
            Some(Err(ChatError::Service(e))) => {
                tracing::error!(?kind, "image generation failed: {}", e);
                self.push_message(ChatMessage::error(image_error_text(kind, &e)));
                Ok(TurnOutcome::ArtifactFailed(kind, e))
            }
            Some(Err(e @ ChatError::Validation(_))) => {
                self.notice = Some(e.to_string());
                Err(e)
            }
        };
        self.publish();
        outcome
    }

    /// 普通流式轮次：占位消息随片段实时刷新，结束后解析确认标记
    async fn stream_turn(&mut self, request: TurnRequest) -> TurnOutcome {
        self.activity = ChatPhase::Streaming;
        let index = self.push_message(ChatMessage::loading(""));
        self.publish();

        let gateway = Arc::clone(&self.gateway);
        let token = self.supervisor.session_token();
        let sent = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            r = gateway.send_turn(&self.session, request) => Some(r),
        };

        let outcome = match sent {
            None => AggregateOutcome::Cancelled {
                partial: String::new(),
            },
            Some(Err(error)) => AggregateOutcome::Failed {
                partial: String::new(),
                error,
            },
            Some(Ok(stream)) => {
                let transcript = &mut self.transcript;
                let state_tx = &self.state_tx;
                StreamAggregator::new()
                    .run(stream, &token, |text| {
                        tracing::debug!(len = text.len(), "chunk applied");
                        if let Some(message) = transcript.get_mut(index) {
                            message.text = Some(text.to_string());
                        }
                        state_tx.send_modify(|state| {
                            if let Some(message) = state.history.get_mut(index) {
                                message.text = Some(text.to_string());
                            }
                        });
                    })
                    .await
            }
        };

        self.activity = ChatPhase::Idle;
        let result = match outcome {
            AggregateOutcome::Completed(turn) => {
                let parsed = intent::parse(&turn.text);
                if parsed.matches.len() > 1 {
                    tracing::warn!(
                        count = parsed.matches.len(),
                        "several confirmation markers matched, applying precedence"
                    );
                }
                self.pending = PendingConfirmation::from_matches(&parsed);
                tracing::info!(
                    chunks = turn.chunk_count,
                    citations = turn.citations.as_ref().map_or(0, Vec::len),
                    pending = ?self.pending.kind(),
                    "turn completed"
                );
                self.finalize(index, turn.text, false);
                TurnOutcome::Streamed(self.pending.clone())
            }
            AggregateOutcome::Failed { partial, error } => {
                tracing::error!("turn failed: {}", error);
                self.finalize(index, failure_text(&partial, &error), true);
                TurnOutcome::StreamFailed(error)
            }
            AggregateOutcome::Cancelled { partial } => {
                self.finalize(index, partial, false);
                TurnOutcome::Cancelled
            }
        };
        self.publish();
        result
    }

    fn finalize(&mut self, index: usize, text: String, is_error: bool) {
        if let Some(message) = self.transcript.get_mut(index) {
            message.text = Some(text);
            message.is_loading = false;
            message.is_error = is_error;
        }
    }

    // ---------- 新对话 ----------

    /// 任意状态下可用：取消旧会话、打开新会话，记录只剩问候语，清空待确认与暂存图片
    pub async fn new_conversation(&mut self) -> Result<(), ServiceError> {
        self.supervisor.renew();
        let session = self.gateway.open_session(&self.system_prompt).await?;
        tracing::info!(
            old = %self.session.id,
            new = %session.id,
            "conversation reset"
        );
        self.session = session;
        self.transcript = vec![ChatMessage::model(self.greetings.new_conversation.clone())];
        self.pending = PendingConfirmation::None;
        self.attachments.clear();
        self.activity = ChatPhase::Idle;
        self.notice = None;
        self.publish();
        Ok(())
    }
}

/// VideoPlan 确认后改写的提示
pub fn video_plan_prompt(description: &str) -> String {
    format!(
        "Sí, por favor genera el plan de video detallado para el concepto: \"{}\".",
        description
    )
}

pub fn cancellation_notice(kind: ConfirmationKind) -> &'static str {
    match kind {
        ConfirmationKind::Image => "Entendido. No se generará la imagen. ¿En qué más puedo asistirte?",
        ConfirmationKind::MultiImage => {
            "Entendido. No se generará la imagen combinada. ¿En qué más puedo ayudarte?"
        }
        ConfirmationKind::VideoPlan => {
            "Entendido. No se generará el plan de video. ¿En qué más puedo asistirte?"
        }
    }
}

fn loading_text(kind: ConfirmationKind) -> &'static str {
    match kind {
        ConfirmationKind::MultiImage => "Generando imagen combinada...",
        _ => "Generando imagen...",
    }
}

/// 配额/计费错误原样给出固定提示，其余带上生图类型
fn image_error_text(kind: ConfirmationKind, error: &ServiceError) -> String {
    if error.is_quota_or_billing() {
        return error.user_message();
    }
    let label = match kind {
        ConfirmationKind::MultiImage => "multi",
        _ => "single",
    };
    format!("Error al generar imagen ({}): {}", label, error.user_message())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::ChatRole;
    use crate::llm::mock::{ScriptedGateway, ScriptedReply, PLACEHOLDER_JPEG_BASE64};
    use crate::llm::ResponseChunk;

    async fn controller_with(gateway: Arc<ScriptedGateway>) -> ConversationController {
        ConversationController::start(gateway, ControllerOptions::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_start_emits_greeting_and_idles() {
        let gw = Arc::new(ScriptedGateway::new());
        let controller = controller_with(gw.clone()).await;
        assert_eq!(controller.transcript().len(), 1);
        assert_eq!(controller.transcript()[0].role, ChatRole::Model);
        assert_eq!(controller.phase(), ChatPhase::Idle);
        assert_eq!(gw.sessions_opened(), 1);
        assert_eq!(controller.subscribe().borrow().history.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_submission_rejected_without_side_effects() {
        let gw = Arc::new(ScriptedGateway::new());
        let mut controller = controller_with(gw.clone()).await;
        let err = controller.submit("   ").await.unwrap_err();
        assert_eq!(err, ChatError::Validation(ValidationError::EmptyMessage));
        assert_eq!(controller.transcript().len(), 1);
        assert!(gw.sent_turns().is_empty());
    }

    #[tokio::test]
    async fn test_image_decline_appends_notice() {
        let gw = Arc::new(ScriptedGateway::new());
        gw.push_reply(ScriptedReply::chunks([
            "Confirmar generación de imagen: un faro. ¿Sí o no?",
        ]));
        let mut controller = controller_with(gw.clone()).await;
        controller.submit("dibuja un faro").await.unwrap();
        assert_eq!(
            controller.phase(),
            ChatPhase::AwaitingConfirmation(ConfirmationKind::Image)
        );

        let outcome = controller.submit("mejor no").await.unwrap();
        assert_eq!(outcome, TurnOutcome::Declined(ConfirmationKind::Image));
        assert_eq!(
            controller.transcript().last().unwrap().text_or_empty(),
            cancellation_notice(ConfirmationKind::Image)
        );
        assert!(controller.pending().is_none());
        assert_eq!(gw.sent_turns().len(), 1);
        assert!(gw.image_prompts().is_empty());
    }

    #[tokio::test]
    async fn test_multi_image_decline_appends_combined_notice() {
        let gw = Arc::new(ScriptedGateway::new());
        gw.push_reply(ScriptedReply::chunks([
            "Confirmar generación de imagen combinada: vestido azul rey. ¿Sí o no?",
        ]));
        let mut controller = controller_with(gw.clone()).await;
        controller.submit("cambia el vestido").await.unwrap();
        assert_eq!(
            controller.phase(),
            ChatPhase::AwaitingConfirmation(ConfirmationKind::MultiImage)
        );

        let outcome = controller.submit("no").await.unwrap();
        assert_eq!(outcome, TurnOutcome::Declined(ConfirmationKind::MultiImage));
        assert_eq!(
            controller.transcript().last().unwrap().text_or_empty(),
            "Entendido. No se generará la imagen combinada. ¿En qué más puedo ayudarte?"
        );
        assert!(controller.pending().is_none());
        assert!(gw.image_prompts().is_empty());
    }

    #[tokio::test]
    async fn test_multi_image_accept_generates_image_message() {
        let gw = Arc::new(ScriptedGateway::new());
        gw.push_reply(ScriptedReply::chunks([
            "Entendido. Confirmar generación de imagen combinada: vestido azul rey. ¿Sí o no?",
        ]));
        let mut controller = controller_with(gw.clone()).await;
        controller.submit("cambia el vestido").await.unwrap();

        let outcome = controller.submit("Sí").await.unwrap();
        assert_eq!(outcome, TurnOutcome::ArtifactGenerated(ConfirmationKind::MultiImage));
        assert_eq!(gw.image_prompts(), vec!["vestido azul rey".to_string()]);
        let last = controller.transcript().last().unwrap();
        assert_eq!(
            last.image_url.as_deref(),
            Some(format!("data:image/jpeg;base64,{}", PLACEHOLDER_JPEG_BASE64).as_str())
        );
        assert_eq!(last.image_prompt.as_deref(), Some("vestido azul rey"));
        assert!(controller.transcript().iter().all(|m| !m.is_loading));
        assert_eq!(controller.phase(), ChatPhase::Idle);
    }

    #[tokio::test]
    async fn test_image_billing_error_uses_distinguished_message() {
        let gw = Arc::new(ScriptedGateway::new());
        gw.push_reply(ScriptedReply::chunks([
            "Confirmar generación de imagen: un faro. ¿Sí o no?",
        ]));
        gw.push_image(Err(ServiceError::BillingRequired("billed users".into())));
        let mut controller = controller_with(gw).await;
        controller.submit("dibuja").await.unwrap();
        let outcome = controller.submit("si").await.unwrap();
        assert!(matches!(outcome, TurnOutcome::ArtifactFailed(ConfirmationKind::Image, _)));
        let last = controller.transcript().last().unwrap();
        assert!(last.is_error);
        assert_eq!(last.text_or_empty(), crate::core::error::BILLING_REQUIRED_MESSAGE);
    }

    #[tokio::test]
    async fn test_video_plan_accept_rewrites_prompt() {
        let gw = Arc::new(ScriptedGateway::new());
        gw.push_reply(ScriptedReply::chunks([
            "Confirmar generación del plan de video: un vlog de viaje. ¿Sí o no?",
        ]));
        gw.push_reply(ScriptedReply::chunks(["Plan: escena 1..."]));
        let mut controller = controller_with(gw.clone()).await;
        controller.submit("quiero un video").await.unwrap();
        controller.submit("yes").await.unwrap();

        let sent = gw.sent_turns();
        assert_eq!(
            sent[1].text,
            "Sí, por favor genera el plan de video detallado para el concepto: \"un vlog de viaje\"."
        );
        assert_eq!(controller.transcript()[3].text_or_empty(), "yes");
        assert!(controller.pending().is_none());
    }

    #[tokio::test]
    async fn test_video_plan_unified_cancellation() {
        let gw = Arc::new(ScriptedGateway::new());
        gw.push_reply(ScriptedReply::chunks([
            "Confirmar generación del plan de video: un vlog. ¿Sí o no?",
        ]));
        let options = ControllerOptions {
            unify_video_plan_cancellation: true,
            ..ControllerOptions::default()
        };
        let mut controller = ConversationController::start(gw.clone(), options)
            .await
            .unwrap();
        controller.submit("video").await.unwrap();
        let outcome = controller.submit("quizás luego").await.unwrap();
        assert_eq!(outcome, TurnOutcome::Declined(ConfirmationKind::VideoPlan));
        assert_eq!(gw.sent_turns().len(), 1);
    }

    #[tokio::test]
    async fn test_attachments_sent_as_inline_parts_and_recorded() {
        let gw = Arc::new(ScriptedGateway::new());
        let mut controller = controller_with(gw.clone()).await;
        let url = format!("data:image/jpeg;base64,{}", PLACEHOLDER_JPEG_BASE64);
        controller.paste(&url).await.unwrap();
        assert_eq!(controller.snapshot().notice.as_deref(), Some(ATTACHMENT_ADDED_NOTICE));

        controller.submit("¿qué ves?").await.unwrap();
        let sent = gw.sent_turns();
        assert_eq!(sent[0].parts.len(), 2);
        assert_eq!(controller.transcript()[1].reference_image_urls, vec![url]);
        assert!(controller.attachments().is_empty());
    }

    #[tokio::test]
    async fn test_reuse_generated_image_as_reference() {
        let gw = Arc::new(ScriptedGateway::new());
        gw.push_reply(ScriptedReply::chunks([
            "Confirmar generación de imagen: un faro. ¿Sí o no?",
        ]));
        let mut controller = controller_with(gw).await;
        controller.submit("dibuja").await.unwrap();
        controller.submit("si").await.unwrap();
        let image_index = controller.transcript().len() - 1;

        assert_eq!(controller.reuse_image(image_index).unwrap(), 0);
        assert!(controller.attachments().staged()[0].name.starts_with("ref_luxore_"));
        assert_eq!(
            controller.reuse_image(0),
            Err(ValidationError::NoSuchImage(0))
        );
    }

    #[tokio::test]
    async fn test_send_failure_becomes_error_message() {
        let gw = Arc::new(ScriptedGateway::new());
        gw.push_reply(ScriptedReply::send_error(ServiceError::QuotaExceeded(
            "429 RESOURCE_EXHAUSTED".into(),
        )));
        let mut controller = controller_with(gw).await;
        let outcome = controller.submit("hola").await.unwrap();
        assert!(matches!(outcome, TurnOutcome::StreamFailed(ServiceError::QuotaExceeded(_))));
        let last = controller.transcript().last().unwrap();
        assert!(last.is_error);
        assert!(!last.is_loading);
        assert_eq!(
            last.text_or_empty(),
            format!(
                "Error al contactar con Luxoré: {}",
                crate::core::error::QUOTA_EXCEEDED_MESSAGE
            )
        );
        assert_eq!(controller.phase(), ChatPhase::Idle);
    }

    #[tokio::test]
    async fn test_citation_footer_prevents_marker_detection() {
        let gw = Arc::new(ScriptedGateway::new());
        gw.push_reply(ScriptedReply::items(vec![Ok(ResponseChunk::text(
            "Confirmar generación de imagen: x. ¿Sí o no?",
        )
        .with_citations(vec![crate::conversation::GroundingCitation::new("A", "https://a")]))]));
        let mut controller = controller_with(gw).await;
        let outcome = controller.submit("noticias de hoy").await.unwrap();
        assert_eq!(outcome, TurnOutcome::Streamed(PendingConfirmation::None));
    }
}
