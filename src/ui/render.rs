//! 界面渲染
//!
//! 根据 UiState 与 input_buffer 绘制：标题栏显示场景与阶段，主体为消息记录（按角色着色、按宽度换行），
//! 其下是待确认横幅与暂存图片条，底部为输入框与快捷键提示。

use ratatui::{
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Paragraph, Scrollbar, ScrollbarOrientation, ScrollbarState, Wrap},
    Frame,
};

use crate::conversation::{ChatMessage, ChatRole};
use crate::core::{ChatPhase, UiState};

/// 用户消息中附带参考图片时的摘要
fn reference_summary(count: usize) -> Option<String> {
    match count {
        0 => None,
        1 => Some("[1 imagen de referencia]".to_string()),
        n => Some(format!("[{} imágenes de referencia]", n)),
    }
}

/// 单条消息的显示文本；生成的图片显示为 [imagen #序号: 提示词]，序号用于 /reuse
fn message_body(index: usize, m: &ChatMessage) -> String {
    let mut body = String::new();
    if m.image_url.is_some() {
        let prompt = m.image_prompt.as_deref().unwrap_or("");
        body.push_str(&format!("[imagen #{}: {}]", index, prompt));
    }
    if let Some(refs) = reference_summary(m.reference_image_urls.len()) {
        if !body.is_empty() {
            body.push('\n');
        }
        body.push_str(&refs);
    }
    if let Some(text) = m.text.as_deref().filter(|t| !t.is_empty()) {
        if !body.is_empty() {
            body.push('\n');
        }
        body.push_str(text);
    }
    if m.is_loading {
        body.push_str(" …");
    }
    body
}

/// 将内容按宽度换行，支持 UTF-8（按字符数，避免在 UTF-8 中间截断）
fn wrap_text(s: &str, width: usize) -> Vec<String> {
    if width == 0 {
        return vec![s.to_string()];
    }
    let mut lines = Vec::new();
    for para in s.split('\n') {
        let mut line = String::new();
        for ch in para.chars() {
            if line.chars().count() >= width {
                lines.push(std::mem::take(&mut line));
            }
            line.push(ch);
        }
        lines.push(line);
    }
    lines
}

fn phase_label(phase: &ChatPhase) -> &'static str {
    match phase {
        ChatPhase::Idle => "lista",
        ChatPhase::Streaming => "escribiendo…",
        ChatPhase::AwaitingConfirmation(_) => "esperando confirmación",
        ChatPhase::GeneratingArtifact(_) => "generando imagen…",
    }
}

/// 绘制一帧：对话区（标题 + 记录 + 滚动条）、横幅、暂存条、输入区；将 (总行数, 可视高度) 写入 out 供外部 clamp 滚动
pub fn draw(
    f: &mut Frame,
    state: &UiState,
    input_buffer: &str,
    conversation_scroll: usize,
    flash: Option<&str>,
    out: &mut (usize, usize),
) {
    let banner_height = u16::from(state.pending.kind().is_some());
    let strip_height = u16::from(!state.staged.is_empty());
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(5),
            Constraint::Length(banner_height),
            Constraint::Length(strip_height),
            Constraint::Length(5),
        ])
        .split(f.area());

    let conv_area = chunks[0];
    let content_width = conv_area.width.saturating_sub(2).saturating_sub(1) as usize; // 边框 + 滚动条

    let title = format!(" Luxoré │ {} │ {} ", state.context_tag, phase_label(&state.phase));
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));

    let mut text_lines: Vec<Line> = Vec::new();
    for (idx, m) in state.history.iter().enumerate() {
        if idx > 0 {
            text_lines.push(Line::from(Span::raw("")));
        }
        let (prefix, color) = match m.role {
            ChatRole::User => ("Tú     ", Color::Cyan),
            ChatRole::Model if m.is_error => ("Luxoré ", Color::Red),
            ChatRole::Model => ("Luxoré ", Color::Green),
        };
        let body_style = if m.is_error {
            Style::default().fg(Color::Red)
        } else if m.image_url.is_some() {
            Style::default().fg(Color::Magenta)
        } else {
            Style::default()
        };
        let wrapped = wrap_text(&message_body(idx, m), content_width.saturating_sub(7).max(20));
        for (i, line) in wrapped.into_iter().enumerate() {
            let pref = if i == 0 { prefix } else { "       " };
            text_lines.push(Line::from(vec![
                Span::styled(pref, Style::default().fg(color).add_modifier(Modifier::BOLD)),
                Span::styled(line, body_style),
            ]));
        }
    }

    let content_height = conv_area.height.saturating_sub(2) as usize; // 边框
    let total_lines = text_lines.len();
    let max_scroll = total_lines.saturating_sub(content_height);
    let scroll_offset = conversation_scroll.min(max_scroll);

    let inner = block.inner(conv_area);
    f.render_widget(block, conv_area);
    let paragraph = Paragraph::new(Text::from(text_lines)).scroll((scroll_offset as u16, 0));
    f.render_widget(paragraph, inner);

    if total_lines > content_height {
        let mut scrollbar_state = ScrollbarState::new(total_lines)
            .position(scroll_offset)
            .viewport_content_length(content_height);
        let scrollbar = Scrollbar::new(ScrollbarOrientation::VerticalRight)
            .thumb_symbol("█")
            .track_symbol(Some("░"));
        f.render_stateful_widget(scrollbar, inner, &mut scrollbar_state);
    }

    if let Some(kind) = state.pending.kind() {
        let banner = format!(
            " Luxoré está esperando tu confirmación para {} (sí / no) ",
            kind.noun()
        );
        f.render_widget(
            Paragraph::new(Span::styled(
                banner,
                Style::default().fg(Color::Black).bg(Color::Yellow),
            )),
            chunks[1],
        );
    }

    if !state.staged.is_empty() {
        let strip: Vec<Span> = state
            .staged
            .iter()
            .enumerate()
            .map(|(i, a)| {
                Span::styled(
                    format!(" [{}] {} ({} KB) ", i, a.name, a.size.div_ceil(1024)),
                    Style::default().fg(Color::Magenta),
                )
            })
            .collect();
        f.render_widget(Paragraph::new(Line::from(strip)), chunks[2]);
    }

    let notice = flash.or(state.notice.as_deref());
    let input_prompt = if let Some(n) = notice {
        format!(" {} ", n.chars().take(60).collect::<String>())
    } else if state.input_locked {
        " Esperando respuesta… ".to_string()
    } else {
        " Mensaje ".to_string()
    };

    let hint = " Enter enviar │ /attach /reuse /remove /new │ ↑↓ PgUp/PgDn │ Ctrl+N nueva │ Ctrl+Q salir ";
    let input_block = Block::default()
        .title(input_prompt)
        .title_bottom(Line::from(Span::styled(hint, Style::default().fg(Color::DarkGray))))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Blue));

    let input = Paragraph::new(input_buffer)
        .block(input_block)
        .wrap(Wrap { trim: false })
        .style(if state.input_locked {
            Style::default().fg(Color::DarkGray)
        } else {
            Style::default()
        });

    f.render_widget(input, chunks[3]);

    out.0 = total_lines;
    out.1 = content_height;
}
