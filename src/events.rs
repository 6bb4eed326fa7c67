use chrono::{DateTime, Utc};
use crossterm::event::{Event, KeyEvent, KeyEventKind};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::agent::AgentError;
use crate::session::SendTicket;

/// Internal application events for coordinating between components
#[derive(Debug)]
pub enum AppEvent {
    /// The agent call for an accepted send has settled
    AgentReply {
        ticket: SendTicket,
        outcome: Result<String, AgentError>,
    },
}

/// TUI-specific events (keyboard, paste, resize, redraw)
#[derive(Debug, Clone)]
pub enum TuiEvent {
    /// Key press event
    Key(KeyEvent),

    /// Paste event
    Paste(String),

    /// Terminal resize
    Resize(u16, u16),

    /// Draw/redraw request
    Draw,
}

impl TuiEvent {
    /// Map a raw crossterm event onto the events the UI cares about.
    ///
    /// Key releases and repeats are dropped so a single Enter press can never
    /// submit twice on terminals that report release events.
    pub fn from_crossterm(event: Event) -> Option<Self> {
        match event {
            Event::Key(key) if key.kind == KeyEventKind::Press => Some(TuiEvent::Key(key)),
            Event::Paste(text) => Some(TuiEvent::Paste(text)),
            Event::Resize(width, height) => Some(TuiEvent::Resize(width, height)),
            Event::FocusGained => Some(TuiEvent::Draw),
            _ => None,
        }
    }
}

/// Who authored a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

impl Sender {
    pub fn display_name(&self) -> &'static str {
        match self {
            Sender::User => "You",
            Sender::Bot => "Agent",
        }
    }
}

/// Message identifier derived from the creation instant (unix millis).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single entry in the conversation thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub text: String,
    pub sender: Sender,
    pub timestamp: DateTime<Utc>,
    /// Only set for the synthetic reply appended when the agent call fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl ChatMessage {
    pub fn is_error(&self) -> bool {
        self.is_error.unwrap_or(false)
    }
}
