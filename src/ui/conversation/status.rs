use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Style},
    text::{Line, Span},
    widgets::Widget,
};
use std::time::Instant;

/// One-line "agent is thinking" indicator shown while a reply is pending
#[derive(Debug, Clone)]
pub struct BusyIndicator {
    since: Option<Instant>,
    pending: usize,
}

impl BusyIndicator {
    pub fn new() -> Self {
        Self {
            since: None,
            pending: 0,
        }
    }

    /// Sync with the session's in-flight count
    pub fn update(&mut self, pending: usize) {
        match (pending, self.since) {
            (0, _) => self.since = None,
            (_, None) => self.since = Some(Instant::now()),
            _ => {}
        }
        self.pending = pending;
    }

    #[allow(dead_code)]
    pub fn is_active(&self) -> bool {
        self.since.is_some()
    }

    fn dots(&self) -> &'static str {
        let elapsed = self.since.map(|s| s.elapsed().as_millis()).unwrap_or(0);
        match (elapsed / 300) % 4 {
            0 => ".",
            1 => "..",
            2 => "...",
            _ => "   ",
        }
    }
}

impl Default for BusyIndicator {
    fn default() -> Self {
        Self::new()
    }
}

impl Widget for &BusyIndicator {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let Some(since) = self.since else {
            return;
        };

        let mut spans = vec![
            Span::styled("🤖 ", Style::default().fg(Color::Green)),
            Span::styled("Agent is thinking", Style::default().fg(Color::Green)),
            Span::styled(self.dots(), Style::default().fg(Color::Yellow)),
            Span::styled(
                format!(" {}s", since.elapsed().as_secs()),
                Style::default().fg(Color::DarkGray),
            ),
        ];
        if self.pending > 1 {
            spans.push(Span::styled(
                format!(" ({} replies pending)", self.pending),
                Style::default().fg(Color::DarkGray),
            ));
        }
        buf.set_line(area.x, area.y, &Line::from(spans), area.width);
    }
}
