//! Conversation UI components for the chat window

pub mod commands;
pub mod composer;
pub mod history;
pub mod manager;
pub mod status;

pub use commands::{get_help_text, SlashCommand};
pub use composer::ConversationComposer;
pub use history::{ConversationHistory, HistoryView};
pub use manager::{ConversationAction, ConversationManager};
pub use status::BusyIndicator;
