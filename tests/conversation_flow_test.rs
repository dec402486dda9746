//! 对话流程集成测试：用脚本化网关驱动控制器

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures_util::stream;
    use luxore::conversation::aggregator::{AggregateOutcome, StreamAggregator};
    use luxore::conversation::controller::cancellation_notice;
    use luxore::conversation::{
        intent, AttachmentManager, AttachmentSource, ChatRole, ConfirmationKind,
        ControllerOptions, ConversationController, GroundingCitation, ImageFile,
        PendingConfirmation, TurnOutcome,
    };
    use luxore::core::error::QUOTA_EXCEEDED_MESSAGE;
    use luxore::core::{ChatPhase, ServiceError, ValidationError};
    use luxore::llm::mock::PLACEHOLDER_JPEG_BASE64;
    use luxore::llm::{ResponseChunk, ScriptedGateway, ScriptedReply};
    use tokio_util::sync::CancellationToken;

    const MIB: usize = 1024 * 1024;

    async fn start(gw: &Arc<ScriptedGateway>) -> ConversationController {
        ConversationController::start(gw.clone(), ControllerOptions::default())
            .await
            .expect("mock session opens")
    }

    fn png(name: &str, size: usize) -> ImageFile {
        ImageFile {
            name: name.to_string(),
            mime_type: "image/png".to_string(),
            bytes: vec![0u8; size],
        }
    }

    #[tokio::test]
    async fn test_live_text_equals_prefix_concatenation() {
        let chunks = ["La ", "luz ", "del ", "alba"];
        let items = chunks.iter().map(|c| Ok(ResponseChunk::text(*c))).collect::<Vec<_>>();
        let mut seen = Vec::new();
        let outcome = StreamAggregator::new()
            .run(Box::pin(stream::iter(items)), &CancellationToken::new(), |t| {
                seen.push(t.to_string())
            })
            .await;

        for (i, shown) in seen.iter().enumerate() {
            assert_eq!(shown, &chunks[..=i].concat());
        }
        assert!(matches!(outcome, AggregateOutcome::Completed(t) if t.text == "La luz del alba"));
    }

    #[tokio::test]
    async fn test_citations_captured_from_first_non_empty_chunk_only() {
        let gw = Arc::new(ScriptedGateway::new());
        gw.push_reply(ScriptedReply::items(vec![
            Ok(ResponseChunk::text("Hoy ")),
            Ok(ResponseChunk::text("subió ").with_citations(vec![GroundingCitation::new(
                "A",
                "https://a.example",
            )])),
            Ok(ResponseChunk::text("el oro.").with_citations(vec![GroundingCitation::new(
                "B",
                "https://b.example",
            )])),
        ]));
        let mut controller = start(&gw).await;
        controller.submit("últimas noticias del oro").await.unwrap();

        let reply = controller.transcript().last().unwrap();
        assert_eq!(
            reply.text_or_empty(),
            "Hoy subió el oro.\n\nFuentes (Google Search):\n1. [A](https://a.example)"
        );
        assert!(!reply.text_or_empty().contains("b.example"));
    }

    #[tokio::test]
    async fn test_attachment_bounds() {
        let mut mgr = AttachmentManager::default();
        for i in 0..3 {
            mgr.add(png(&format!("{i}.png"), 10), AttachmentSource::FilePicker)
                .unwrap();
        }
        assert_eq!(
            mgr.add(png("3.png", 10), AttachmentSource::Clipboard),
            Err(ValidationError::TooManyAttachments { max: 3 })
        );
        assert_eq!(mgr.len(), 3);

        assert_eq!(mgr.drain_for_submission().len(), 3);
        assert!(mgr.is_empty());
        assert!(matches!(
            mgr.add(png("big.png", 5 * MIB), AttachmentSource::FilePicker),
            Err(ValidationError::TooLarge { .. })
        ));
        assert!(mgr.drain_for_submission().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_file_on_disk_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("enorme.png");
        std::fs::write(&path, vec![0u8; 5 * MIB]).unwrap();

        let gw = Arc::new(ScriptedGateway::new());
        let mut controller = start(&gw).await;
        let err = controller.attach_path(&path).await.unwrap_err();
        assert!(matches!(err, ValidationError::TooLarge { .. }));
        assert!(controller.attachments().is_empty());
        assert_eq!(controller.transcript().len(), 1);
    }

    #[test]
    fn test_intent_parser_examples() {
        let parsed =
            intent::parse("Perfecto. Confirmar generación de imagen: a red fox in snow. ¿Sí o no?");
        assert_eq!(parsed.get(ConfirmationKind::Image), Some("a red fox in snow"));

        let parsed = intent::parse(
            "Confirmar generación de imagen: a red fox in snow. ¿Sí o no? Dime qué prefieres.",
        );
        assert!(parsed.is_none());
    }

    #[tokio::test]
    async fn test_image_confirm_accept_scenario() {
        let gw = Arc::new(ScriptedGateway::new());
        gw.push_reply(ScriptedReply::chunks([
            "Claro. ",
            "Confirmar generación de imagen: a vivid sunset over mountains. ¿Sí o no?",
        ]));
        let mut controller = start(&gw).await;

        controller.submit("draw a sunset").await.unwrap();
        assert_eq!(
            controller.pending(),
            &PendingConfirmation::AwaitingImage("a vivid sunset over mountains".into())
        );
        assert_eq!(
            controller.phase(),
            ChatPhase::AwaitingConfirmation(ConfirmationKind::Image)
        );

        let outcome = controller.submit("si").await.unwrap();
        assert_eq!(outcome, TurnOutcome::ArtifactGenerated(ConfirmationKind::Image));
        assert_eq!(gw.image_prompts(), vec!["a vivid sunset over mountains".to_string()]);
        assert_eq!(gw.sent_turns().len(), 1, "the reply itself never reaches the text model");

        let last = controller.transcript().last().unwrap();
        assert_eq!(last.role, ChatRole::Model);
        assert_eq!(
            last.image_url.as_deref(),
            Some(format!("data:image/jpeg;base64,{PLACEHOLDER_JPEG_BASE64}").as_str())
        );
        assert_eq!(controller.phase(), ChatPhase::Idle);
    }

    #[tokio::test]
    async fn test_video_plan_ambiguous_reply_falls_through() {
        let gw = Arc::new(ScriptedGateway::new());
        gw.push_reply(ScriptedReply::chunks([
            "Confirmar generación del plan de video: a travel vlog. ¿Sí o no?",
        ]));
        let mut controller = start(&gw).await;
        controller.submit("plan a video").await.unwrap();
        assert_eq!(
            controller.pending(),
            &PendingConfirmation::AwaitingVideoPlan("a travel vlog".into())
        );
        let before = controller.transcript().len();

        let outcome = controller.submit("maybe later").await.unwrap();
        assert!(matches!(outcome, TurnOutcome::Streamed(PendingConfirmation::None)));
        assert!(controller.pending().is_none());

        let sent = gw.sent_turns();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].text, "maybe later");

        // 用户消息 + 模型回复，没有取消提示
        let added = &controller.transcript()[before..];
        assert_eq!(added.len(), 2);
        assert!(added
            .iter()
            .all(|m| m.text_or_empty() != cancellation_notice(ConfirmationKind::VideoPlan)));
    }

    #[tokio::test]
    async fn test_video_plan_explicit_no_cancels() {
        let gw = Arc::new(ScriptedGateway::new());
        gw.push_reply(ScriptedReply::chunks([
            "Confirmar generación del plan de video: a travel vlog. ¿Sí o no?",
        ]));
        let mut controller = start(&gw).await;
        controller.submit("plan a video").await.unwrap();
        let outcome = controller.submit(" No ").await.unwrap();
        assert_eq!(outcome, TurnOutcome::Declined(ConfirmationKind::VideoPlan));
        assert_eq!(
            controller.transcript().last().unwrap().text_or_empty(),
            cancellation_notice(ConfirmationKind::VideoPlan)
        );
        assert_eq!(gw.sent_turns().len(), 1);
    }

    #[tokio::test]
    async fn test_new_conversation_resets_everything() {
        let gw = Arc::new(ScriptedGateway::new());
        gw.push_reply(ScriptedReply::chunks([
            "Confirmar generación de imagen combinada: dos gatos. ¿Sí o no?",
        ]));
        let mut controller = start(&gw).await;
        controller.submit("combina").await.unwrap();

        let url = format!("data:image/jpeg;base64,{PLACEHOLDER_JPEG_BASE64}");
        controller.paste(&url).await.unwrap();
        controller.paste(&url).await.unwrap();
        assert_eq!(controller.attachments().len(), 2);
        assert_ne!(controller.phase(), ChatPhase::Idle);
        let old_session = controller.session().id;

        controller.new_conversation().await.unwrap();

        assert_eq!(controller.transcript().len(), 1);
        assert_eq!(controller.transcript()[0].role, ChatRole::Model);
        assert!(controller.pending().is_none());
        assert!(controller.attachments().is_empty());
        assert_eq!(controller.phase(), ChatPhase::Idle);
        assert_ne!(controller.session().id, old_session);
        assert_eq!(gw.sessions_opened(), 2);

        let state = controller.snapshot();
        assert!(state.staged.is_empty());
        assert_eq!(state.history.len(), 1);
    }

    #[tokio::test]
    async fn test_mid_stream_quota_error_keeps_partial_text() {
        let gw = Arc::new(ScriptedGateway::new());
        gw.push_reply(ScriptedReply::items(vec![
            Ok(ResponseChunk::text("Empezando")),
            Err(ServiceError::classify(429, "RESOURCE_EXHAUSTED")),
        ]));
        let mut controller = start(&gw).await;
        let outcome = controller.submit("hola").await.unwrap();
        assert!(matches!(outcome, TurnOutcome::StreamFailed(ServiceError::QuotaExceeded(_))));

        let last = controller.transcript().last().unwrap();
        assert!(last.is_error);
        assert!(!last.is_loading);
        assert_eq!(
            last.text_or_empty(),
            format!("Error al contactar con Luxoré: {QUOTA_EXCEEDED_MESSAGE}\n\nEmpezando")
        );

        // 会话仍可用
        controller.submit("otra vez").await.unwrap();
        assert_eq!(
            controller.transcript().last().unwrap().text_or_empty(),
            "Echo from Mock: otra vez"
        );
    }

    #[tokio::test]
    async fn test_session_token_cancels_hung_stream() {
        let gw = Arc::new(ScriptedGateway::new());
        gw.push_reply(ScriptedReply::chunks(["mitad"]).then_hang());
        let mut controller = start(&gw).await;
        let token = controller.session_token();
        let mut state_rx = controller.subscribe();

        let watcher = async move {
            state_rx
                .wait_for(|s| s.history.last().map(|m| m.text_or_empty()) == Some("mitad"))
                .await
                .unwrap();
            token.cancel();
        };
        let (outcome, _) = tokio::join!(controller.submit("cuéntame algo largo"), watcher);

        assert_eq!(outcome.unwrap(), TurnOutcome::Cancelled);
        let last = controller.transcript().last().unwrap();
        assert_eq!(last.text_or_empty(), "mitad");
        assert!(!last.is_loading);
        assert_eq!(controller.phase(), ChatPhase::Idle);
    }
}
