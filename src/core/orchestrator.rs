//! 对话编排器：主控循环
//!
//! 负责：加载配置、选择网关（Gemini / Mock）、启动 ConversationController、建立 cmd/state/attachment 三通道，
//! 并在后台任务中消费用户命令。一轮进行中时仍响应 NewConversation（取消后重置）与 Quit，其余提交丢弃。

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::{load_config, AppConfig};
use crate::conversation::{AttachmentEvent, ControllerOptions, ConversationController};
use crate::core::{ChatError, UiState};
use crate::llm::{AiGateway, GeminiGateway, ScriptedGateway};

/// 从 UI 发往编排器的用户命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// 提交用户输入（连同暂存图片）
    Submit(String),
    /// 从磁盘添加参考图片
    AttachFile(PathBuf),
    /// 粘贴：data URL 或图片路径
    Paste(String),
    /// 复用记录中第 n 条消息的生成图片
    ReuseImage(usize),
    RemoveAttachment(usize),
    /// 开始新对话
    NewConversation,
    /// 退出应用
    Quit,
}

/// 根据配置与环境变量选择网关（Gemini / Mock）
pub fn create_gateway_from_config(cfg: &AppConfig) -> Arc<dyn AiGateway> {
    match GeminiGateway::new(&cfg.gemini) {
        Ok(gateway) => {
            tracing::info!(
                "Using Gemini ({} / {})",
                cfg.gemini.text_model,
                cfg.gemini.image_model
            );
            Arc::new(gateway)
        }
        Err(e) => {
            tracing::warn!("{}, using Mock gateway", e);
            Arc::new(ScriptedGateway::new())
        }
    }
}

/// 创建对话运行时：返回命令发送端、状态接收端、暂存图片事件接收端
pub async fn create_chat(
    config_path: Option<PathBuf>,
) -> anyhow::Result<(
    mpsc::UnboundedSender<Command>,
    watch::Receiver<UiState>,
    broadcast::Receiver<AttachmentEvent>,
)> {
    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let gateway = create_gateway_from_config(&cfg);
    let controller = ConversationController::start(gateway, ControllerOptions::from_config(&cfg))
        .await
        .map_err(|e| anyhow::anyhow!("failed to open conversation session: {}", e))?;

    let (cmd_tx, state_rx, events_rx, _handle) = spawn_controller(controller);
    Ok((cmd_tx, state_rx, events_rx))
}

/// 在后台任务中驱动控制器
pub fn spawn_controller(
    mut controller: ConversationController,
) -> (
    mpsc::UnboundedSender<Command>,
    watch::Receiver<UiState>,
    broadcast::Receiver<AttachmentEvent>,
    JoinHandle<()>,
) {
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<Command>();
    let state_rx = controller.subscribe();
    let events_rx = controller.attachment_events();

    let handle = tokio::spawn(async move {
        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                Command::Submit(text) => {
                    let token = controller.session_token();
                    let mut reset = false;
                    let mut quit = false;
                    {
                        let turn = controller.submit(&text);
                        tokio::pin!(turn);
                        loop {
                            tokio::select! {
                                result = &mut turn => {
                                    match result {
                                        Ok(outcome) => tracing::debug!(?outcome, "turn finished"),
                                        Err(ChatError::Validation(e)) => tracing::warn!("submission rejected: {}", e),
                                        Err(e) => tracing::error!("turn error: {}", e),
                                    }
                                    break;
                                }
                                Some(cmd) = cmd_rx.recv() => match cmd {
                                    Command::NewConversation => {
                                        token.cancel();
                                        reset = true;
                                    }
                                    Command::Quit => {
                                        token.cancel();
                                        quit = true;
                                    }
                                    other => tracing::warn!(?other, "turn in flight, command dropped"),
                                },
                            }
                        }
                    }
                    if quit {
                        break;
                    }
                    if reset {
                        reset_conversation(&mut controller).await;
                    }
                }
                Command::AttachFile(path) => {
                    if let Err(e) = controller.attach_path(&path).await {
                        tracing::debug!(path = %path.display(), "attach failed: {}", e);
                    }
                }
                Command::Paste(pasted) => {
                    if let Err(e) = controller.paste(&pasted).await {
                        tracing::debug!("paste failed: {}", e);
                    }
                }
                Command::ReuseImage(index) => {
                    if let Err(e) = controller.reuse_image(index) {
                        tracing::debug!("reuse failed: {}", e);
                    }
                }
                Command::RemoveAttachment(index) => {
                    if let Err(e) = controller.remove_attachment(index) {
                        tracing::debug!("remove failed: {}", e);
                    }
                }
                Command::NewConversation => reset_conversation(&mut controller).await,
                Command::Quit => break,
            }
        }
        controller.shutdown();
        tracing::info!("conversation loop stopped");
    });

    (cmd_tx, state_rx, events_rx, handle)
}

async fn reset_conversation(controller: &mut ConversationController) {
    if let Err(e) = controller.new_conversation().await {
        tracing::error!("failed to open a new session: {}", e);
    }
}
