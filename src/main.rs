//! Luxoré - 终端里的 Gemini 对话客户端
//!
//! 入口：初始化日志、创建对话编排器与 TUI，并运行主循环。

use std::path::PathBuf;

use anyhow::Context;
use luxore::{core::create_chat, observability, ui::run_app};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 全屏 TUI 下日志只写文件；文件不可写时退回 stderr
    if let Err(e) = observability::init_file(observability::DEFAULT_LOG_FILE) {
        observability::init();
        tracing::warn!("Cannot open log file ({}), logging to stderr", e);
    }

    // 可选：第一个参数为额外的配置文件
    let config_path = std::env::args().nth(1).map(PathBuf::from);

    // 创建对话：返回命令发送端、状态接收端、暂存图片事件接收端
    let (cmd_tx, state_rx, events_rx) = create_chat(config_path)
        .await
        .context("Failed to create chat")?;

    // 启动 TUI 主循环（消费 state/events，向 cmd_tx 发送用户指令）
    run_app(state_rx, events_rx, cmd_tx)
        .await
        .context("App run failed")?;

    Ok(())
}
