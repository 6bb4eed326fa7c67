use crate::ui::conversation::commands::{parse_slash_command, SlashCommand};
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Widget},
};

/// Result returned when the user interacts with the composer
#[derive(Debug, PartialEq)]
pub enum ComposerResult {
    Submitted(String),
    Command(SlashCommand),
    None,
}

/// State for the text area within the composer
#[derive(Debug, Clone, Default)]
pub struct TextAreaState {
    pub content: String,
    /// Byte offset into `content`, always on a char boundary
    pub cursor_position: usize,
}

/// Entry field for user input
#[derive(Debug, Clone)]
pub struct ConversationComposer {
    state: TextAreaState,
    placeholder: String,
    has_focus: bool,
    waiting: bool,
}

impl ConversationComposer {
    pub fn new(placeholder: impl Into<String>) -> Self {
        Self {
            state: TextAreaState::default(),
            placeholder: placeholder.into(),
            has_focus: false,
            waiting: false,
        }
    }

    /// Handle key input.
    ///
    /// Enter without Shift hands the current text out and empties the field.
    /// Shift+Enter (or Alt+Enter, for terminals that cannot report Shift on
    /// Enter) inserts a newline instead.
    pub fn handle_key(&mut self, key: KeyEvent) -> ComposerResult {
        if key.kind != KeyEventKind::Press {
            return ComposerResult::None;
        }

        match key.code {
            KeyCode::Enter => {
                if key.modifiers.intersects(KeyModifiers::SHIFT | KeyModifiers::ALT) {
                    self.insert_char('\n');
                } else if !self.state.content.trim().is_empty() {
                    let content = self.take();
                    return match parse_slash_command(&content) {
                        Some(command) => ComposerResult::Command(command),
                        None => ComposerResult::Submitted(content),
                    };
                }
            }
            KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.insert_char(c);
            }
            KeyCode::Tab => self.insert_char('\t'),
            KeyCode::Backspace => {
                self.backspace();
            }
            KeyCode::Delete => {
                self.delete();
            }
            KeyCode::Left => {
                if let Some(c) = self.state.content[..self.state.cursor_position].chars().next_back() {
                    self.state.cursor_position -= c.len_utf8();
                }
            }
            KeyCode::Right => {
                if let Some(c) = self.state.content[self.state.cursor_position..].chars().next() {
                    self.state.cursor_position += c.len_utf8();
                }
            }
            KeyCode::Home => {
                self.state.cursor_position = 0;
            }
            KeyCode::End => {
                self.state.cursor_position = self.state.content.len();
            }
            _ => {}
        }

        ComposerResult::None
    }

    /// Insert pasted text at the cursor
    pub fn insert_str(&mut self, text: &str) {
        let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
        self.state.content.insert_str(self.state.cursor_position, &normalized);
        self.state.cursor_position += normalized.len();
    }

    fn insert_char(&mut self, c: char) {
        self.state.content.insert(self.state.cursor_position, c);
        self.state.cursor_position += c.len_utf8();
    }

    /// Delete character before cursor
    fn backspace(&mut self) -> bool {
        let previous = self.state.content[..self.state.cursor_position].chars().next_back();
        match previous {
            Some(c) => {
                self.state.cursor_position -= c.len_utf8();
                self.state.content.remove(self.state.cursor_position);
                true
            }
            None => false,
        }
    }

    /// Delete character at cursor
    fn delete(&mut self) -> bool {
        if self.state.cursor_position < self.state.content.len() {
            self.state.content.remove(self.state.cursor_position);
            true
        } else {
            false
        }
    }

    /// Move the content out, leaving the field empty
    fn take(&mut self) -> String {
        self.state.cursor_position = 0;
        std::mem::take(&mut self.state.content)
    }

    /// Put text back into the field, e.g. when a send was refused
    pub fn restore(&mut self, text: String) {
        self.state.cursor_position = text.len();
        self.state.content = text;
    }

    pub fn set_focus(&mut self, has_focus: bool) {
        self.has_focus = has_focus;
    }

    /// Show in the title that a reply is pending
    pub fn set_waiting(&mut self, waiting: bool) {
        self.waiting = waiting;
    }

    pub fn content(&self) -> &str {
        &self.state.content
    }

    fn title(&self) -> &'static str {
        if self.waiting {
            "✉️  Message (waiting for the agent...)"
        } else {
            "✉️  Message - Enter to send, Shift+Enter for a new line"
        }
    }
}

impl Widget for &ConversationComposer {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let block = Block::default()
            .borders(Borders::ALL)
            .title(self.title())
            .style(if self.has_focus {
                Style::default().fg(Color::Green)
            } else {
                Style::default().fg(Color::Gray)
            });

        let inner_area = block.inner(area);
        block.render(area, buf);

        if self.state.content.is_empty() {
            let placeholder_line = Line::from(vec![Span::styled(
                self.placeholder.as_str(),
                Style::default().fg(Color::DarkGray),
            )]);
            buf.set_line(inner_area.x, inner_area.y, &placeholder_line, inner_area.width);
            return;
        }

        let mut content = self.state.content.clone();
        if self.has_focus {
            content.insert(self.state.cursor_position.min(content.len()), '▌');
        }

        // Keep the line holding the cursor visible when the text outgrows the box
        let lines: Vec<&str> = content.split('\n').collect();
        let cursor_line = content[..self.state.cursor_position.min(content.len())]
            .matches('\n')
            .count();
        let height = inner_area.height as usize;
        let first = (cursor_line + 1).saturating_sub(height);

        for (i, line_text) in lines.iter().skip(first).take(height).enumerate() {
            let line = Line::from(vec![Span::raw(*line_text)]);
            buf.set_line(inner_area.x, inner_area.y + i as u16, &line, inner_area.width);
        }
    }
}
