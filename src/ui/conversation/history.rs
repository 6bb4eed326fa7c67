//! Conversation history display component

use crate::events::{ChatMessage, Sender};
use crate::session::{format_display_time, format_display_time_with};
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Scrollbar, ScrollbarOrientation, ScrollbarState, StatefulWidget, Widget},
};
use std::cell::Cell;
use thiserror::Error;

/// Failures of render-side effects. These are logged and never propagated.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("display surface has not been laid out yet")]
    SurfaceUnavailable,
}

/// Scroll state for the history pane.
///
/// The offset is counted in lines from the bottom so that the view stays
/// pinned to the latest message while `scroll_from_bottom == 0`.
#[derive(Debug, Default)]
pub struct ConversationHistory {
    scroll_from_bottom: usize,
    viewport_height: Cell<Option<u16>>,
    total_lines: Cell<usize>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jump to the newest message. Needs the viewport measured by a previous
    /// frame.
    pub fn scroll_to_bottom(&mut self) -> Result<(), RenderError> {
        if self.viewport_height.get().is_none() {
            return Err(RenderError::SurfaceUnavailable);
        }
        self.scroll_from_bottom = 0;
        Ok(())
    }

    pub fn scroll_up(&mut self, lines: usize) {
        let height = self.viewport_height.get().unwrap_or(0) as usize;
        let max = self.total_lines.get().saturating_sub(height);
        self.scroll_from_bottom = (self.scroll_from_bottom + lines).min(max);
    }

    pub fn scroll_down(&mut self, lines: usize) {
        self.scroll_from_bottom = self.scroll_from_bottom.saturating_sub(lines);
    }

    /// True while the view is pinned to the latest message
    #[allow(dead_code)]
    pub fn is_following(&self) -> bool {
        self.scroll_from_bottom == 0
    }

    pub fn page_size(&self) -> usize {
        self.viewport_height.get().unwrap_or(1).max(1) as usize
    }

    pub fn reset(&mut self) {
        self.scroll_from_bottom = 0;
        self.total_lines.set(0);
    }
}

/// Widget that draws a message list with the scroll state of a
/// [`ConversationHistory`]
pub struct HistoryView<'a> {
    messages: &'a [ChatMessage],
    state: &'a ConversationHistory,
    /// `None` uses the default time-of-day format
    time_format: Option<&'a str>,
    show_timestamps: bool,
}

impl<'a> HistoryView<'a> {
    pub fn new(messages: &'a [ChatMessage], state: &'a ConversationHistory) -> Self {
        Self {
            messages,
            state,
            time_format: None,
            show_timestamps: true,
        }
    }

    pub fn time_format(mut self, format: &'a str) -> Self {
        self.time_format = Some(format);
        self
    }

    pub fn show_timestamps(mut self, show: bool) -> Self {
        self.show_timestamps = show;
        self
    }

    /// Render a single message into lines
    fn render_message(&self, message: &ChatMessage, width: u16) -> Vec<Line<'static>> {
        let mut lines = Vec::new();

        let icon = match (message.sender, message.is_error()) {
            (Sender::User, _) => "👤",
            (Sender::Bot, false) => "🤖",
            (Sender::Bot, true) => "⚠️",
        };

        let mut header = format!("{} {}", icon, message.sender.display_name());
        if self.show_timestamps {
            header.push(' ');
            let time = match self.time_format {
                Some(format) => format_display_time_with(&message.timestamp, format),
                None => format_display_time(&message.timestamp),
            };
            header.push_str(&time);
        }

        lines.push(Line::from(vec![Span::styled(
            header,
            Style::default().fg(Color::DarkGray),
        )]));

        let style = content_style(message);
        for content_line in wrap_text(&message.text, width.saturating_sub(2) as usize) {
            lines.push(Line::from(vec![
                Span::raw("  "),
                Span::styled(content_line, style),
            ]));
        }

        lines
    }
}

impl Widget for HistoryView<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let block = Block::default()
            .borders(Borders::ALL)
            .title("💬 Conversation");

        let inner_area = block.inner(area);
        block.render(area, buf);
        self.state.viewport_height.set(Some(inner_area.height));

        if self.messages.is_empty() {
            self.state.total_lines.set(0);
            let welcome_lines = [
                Line::from(vec![Span::styled(
                    "Start a conversation with your agent.",
                    Style::default().fg(Color::Green),
                )]),
                Line::from(vec![Span::raw("")]),
                Line::from(vec![Span::styled(
                    "Press Enter to send, Shift+Enter for new line, /help for commands.",
                    Style::default().fg(Color::DarkGray),
                )]),
            ];

            for (i, line) in welcome_lines.iter().enumerate() {
                if i < inner_area.height as usize {
                    buf.set_line(inner_area.x, inner_area.y + i as u16, line, inner_area.width);
                }
            }
            return;
        }

        // Reserve the rightmost column for the scrollbar
        let text_width = inner_area.width.saturating_sub(1);
        let mut all_lines: Vec<Line> = Vec::new();
        for message in self.messages {
            all_lines.extend(self.render_message(message, text_width));
            all_lines.push(Line::from(""));
        }
        all_lines.pop();

        let height = inner_area.height as usize;
        let total = all_lines.len();
        self.state.total_lines.set(total);

        let max_offset = total.saturating_sub(height);
        let offset = self.state.scroll_from_bottom.min(max_offset);
        let end = total - offset;
        let start = end.saturating_sub(height);

        for (i, line) in all_lines[start..end].iter().enumerate() {
            buf.set_line(inner_area.x, inner_area.y + i as u16, line, text_width);
        }

        if total > height {
            let mut scroll_state = ScrollbarState::new(max_offset).position(max_offset - offset);
            Scrollbar::default()
                .orientation(ScrollbarOrientation::VerticalRight)
                .begin_symbol(Some("↑"))
                .end_symbol(Some("↓"))
                .render(inner_area, buf, &mut scroll_state);
        }
    }
}

/// Get content style based on sender
fn content_style(message: &ChatMessage) -> Style {
    match (message.sender, message.is_error()) {
        (Sender::User, _) => Style::default().fg(Color::Blue),
        (Sender::Bot, false) => Style::default().fg(Color::Green),
        (Sender::Bot, true) => Style::default().fg(Color::Red).add_modifier(Modifier::ITALIC),
    }
}

/// Wrap text to fit within the given width, keeping explicit line breaks
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    if width == 0 {
        return text.split('\n').map(str::to_string).collect();
    }

    let mut lines = Vec::new();
    for paragraph in text.split('\n') {
        let mut current_line = String::new();
        let mut current_width = 0;

        for word in paragraph.split_whitespace() {
            let word_width = word.chars().count();
            if current_width > 0 && current_width + 1 + word_width > width {
                lines.push(std::mem::take(&mut current_line));
                current_width = 0;
            }
            if current_width > 0 {
                current_line.push(' ');
                current_width += 1;
            }

            // Hard-break words longer than a full line
            let mut chars = word.chars().peekable();
            while chars.peek().is_some() {
                if current_width == width {
                    lines.push(std::mem::take(&mut current_line));
                    current_width = 0;
                }
                if let Some(c) = chars.next() {
                    current_line.push(c);
                    current_width += 1;
                }
            }
        }

        lines.push(current_line);
    }

    lines
}
