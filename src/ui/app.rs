//! TUI 应用主循环
//!
//! 进入全屏/原始模式（开启括号粘贴），轮询 state_rx、暂存图片事件与终端事件，将输入行解析为 Command 发送给编排器，
//! 每帧用 draw 渲染 UiState 与输入缓冲。

use std::io::{self, Stdout};
use std::time::{Duration, Instant};

use crossterm::event::{DisableBracketedPaste, EnableBracketedPaste, KeyCode};
use crossterm::{
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use tokio::sync::{broadcast, mpsc, watch};

use crate::conversation::controller::ATTACHMENT_ADDED_NOTICE;
use crate::conversation::AttachmentEvent;
use crate::core::{Command, UiState};
use crate::ui::event::{parse_enter, AppEvent, EventHandler};
use crate::ui::render::draw;

/// 短暂提示的显示时长
const FLASH_DURATION: Duration = Duration::from_secs(2);

/// 运行 TUI：启用原始模式与全屏，循环 poll 事件 + 渲染，退出时恢复终端
pub async fn run_app(
    state_rx: watch::Receiver<UiState>,
    mut events_rx: broadcast::Receiver<AttachmentEvent>,
    cmd_tx: mpsc::UnboundedSender<Command>,
) -> anyhow::Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableBracketedPaste)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = event_loop(&mut terminal, state_rx, &mut events_rx, cmd_tx).await;
    restore_terminal(&mut terminal)?;
    result
}

async fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    state_rx: watch::Receiver<UiState>,
    events_rx: &mut broadcast::Receiver<AttachmentEvent>,
    cmd_tx: mpsc::UnboundedSender<Command>,
) -> anyhow::Result<()> {
    let event_handler = EventHandler::new(cmd_tx);
    let mut input_buffer = String::new();
    let mut conversation_scroll = 0usize;
    let mut last_history_len = 0usize;
    let mut flash: Option<(String, Instant)> = None;

    loop {
        let state = state_rx.borrow().clone();

        if state.history.len() != last_history_len {
            last_history_len = state.history.len();
            conversation_scroll = usize::MAX;
        }

        while let Ok(ev) = events_rx.try_recv() {
            if let AttachmentEvent::Added { .. } = ev {
                flash = Some((ATTACHMENT_ADDED_NOTICE.to_string(), Instant::now()));
            }
        }
        if flash.as_ref().is_some_and(|(_, at)| at.elapsed() > FLASH_DURATION) {
            flash = None;
        }

        if let Ok(Some(ev)) = event_handler.poll() {
            match ev {
                AppEvent::Command(Command::Quit) => {
                    event_handler.send(Command::Quit);
                    break;
                }
                AppEvent::Command(_) => {
                    input_buffer.clear();
                }
                AppEvent::Paste(text) => {
                    // 单行粘贴可能是图片路径或 data URL，其余当作普通文本
                    let candidate = text.trim();
                    if candidate.starts_with("data:image/") || looks_like_image_path(candidate) {
                        event_handler.send(Command::Paste(candidate.to_string()));
                    } else {
                        input_buffer.push_str(&text);
                    }
                }
                AppEvent::Key(key) => match key.code {
                    KeyCode::Enter if !state.input_locked => {
                        let line = std::mem::take(&mut input_buffer);
                        match parse_enter(&line, !state.staged.is_empty()) {
                            Ok(Some(Command::Quit)) => {
                                event_handler.send(Command::Quit);
                                break;
                            }
                            Ok(Some(cmd)) => event_handler.send(cmd),
                            Ok(None) => {}
                            Err(e) => flash = Some((e.0, Instant::now())),
                        }
                    }
                    KeyCode::Backspace => {
                        input_buffer.pop();
                    }
                    KeyCode::Char(c) => input_buffer.push(c),
                    KeyCode::Up => conversation_scroll = conversation_scroll.saturating_sub(1),
                    KeyCode::Down => conversation_scroll = conversation_scroll.saturating_add(1),
                    KeyCode::PageUp => conversation_scroll = conversation_scroll.saturating_sub(10),
                    KeyCode::PageDown => conversation_scroll = conversation_scroll.saturating_add(10),
                    KeyCode::Home => conversation_scroll = 0,
                    KeyCode::End => conversation_scroll = usize::MAX,
                    _ => {}
                },
            }
        }

        let mut scroll_info = (0usize, 0usize);
        let flash_text = flash.as_ref().map(|(text, _)| text.as_str());
        terminal.draw(|f| {
            draw(
                f,
                &state,
                &input_buffer,
                conversation_scroll,
                flash_text,
                &mut scroll_info,
            );
        })?;
        let (total_lines, viewport_height) = scroll_info;
        let max_scroll = total_lines.saturating_sub(viewport_height);
        conversation_scroll = conversation_scroll.min(max_scroll);

        tokio::task::yield_now().await;
    }
    Ok(())
}

fn looks_like_image_path(text: &str) -> bool {
    !text.contains('\n')
        && crate::conversation::attachments::mime_for_path(std::path::Path::new(text)).is_some()
        && std::path::Path::new(text).exists()
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> anyhow::Result<()> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableBracketedPaste
    )?;
    terminal.show_cursor()?;
    Ok(())
}
