//! 事件处理
//!
//! 轮询 crossterm 事件：Ctrl+N 新对话、Ctrl+Q / Ctrl+C 退出，括号粘贴转为 Paste，
//! 其余按键交给 run_app 拼 input_buffer，Enter 时按斜杠命令解析后发送。

use std::path::PathBuf;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use tokio::sync::mpsc;

use crate::core::Command;

/// 应用事件：来自快捷键的 Command、粘贴内容或原始 KeyEvent
#[derive(Debug, Clone)]
pub enum AppEvent {
    Command(Command),
    Paste(String),
    Key(KeyEvent),
}

/// 输入行解析失败时给用户的提示
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputError(pub String);

/// 将一行输入解析为命令；斜杠开头的是本地命令，其余作为消息提交
pub fn parse_input(line: &str) -> Result<Option<Command>, InputError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Submit(line.to_string())));
    };
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    let index = |what: &str| {
        arg.parse::<usize>()
            .map_err(|_| InputError(format!("Uso: /{} <n>", what)))
    };
    let command = match name.to_lowercase().as_str() {
        "new" | "nuevo" => Command::NewConversation,
        "quit" | "exit" | "salir" => Command::Quit,
        "attach" | "adjuntar" => {
            if arg.is_empty() {
                return Err(InputError("Uso: /attach <ruta>".to_string()));
            }
            Command::AttachFile(PathBuf::from(arg))
        }
        "reuse" | "usar" => Command::ReuseImage(index("reuse")?),
        "remove" | "quitar" => Command::RemoveAttachment(index("remove")?),
        other => return Err(InputError(format!("Comando desconocido: /{}", other))),
    };
    Ok(Some(command))
}

/// Enter 时的输入解析：空行但有暂存图片时仍提交（仅图片的一轮）
pub fn parse_enter(line: &str, has_staged: bool) -> Result<Option<Command>, InputError> {
    if line.trim().is_empty() && has_staged {
        return Ok(Some(Command::Submit(String::new())));
    }
    parse_input(line)
}

/// 事件处理器：持有 cmd_tx，poll 时读终端事件并返回 AppEvent
pub struct EventHandler {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl EventHandler {
    pub fn new(cmd_tx: mpsc::UnboundedSender<Command>) -> Self {
        Self { cmd_tx }
    }

    pub fn poll(&self) -> anyhow::Result<Option<AppEvent>> {
        if event::poll(std::time::Duration::from_millis(50))? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    return Ok(Some(self.handle_key(key)));
                }
                Event::Paste(text) => return Ok(Some(AppEvent::Paste(text))),
                _ => {}
            }
        }
        Ok(None)
    }

    fn handle_key(&self, key: KeyEvent) -> AppEvent {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Char('n') if ctrl => {
                self.send(Command::NewConversation);
                AppEvent::Command(Command::NewConversation)
            }
            KeyCode::Char('q') | KeyCode::Char('c') if ctrl => AppEvent::Command(Command::Quit),
            _ => AppEvent::Key(key),
        }
    }

    pub fn send(&self, cmd: Command) {
        let _ = self.cmd_tx.send(cmd);
    }
}
