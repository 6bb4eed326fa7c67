use std::str::FromStr;

use strum::{AsRefStr, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

/// Commands that can be invoked by starting a message with a leading slash.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, EnumIter, AsRefStr, IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case")]
pub enum SlashCommand {
    /// Clear the conversation and start a new agent session
    Clear,
    /// Show help
    Help,
    /// Exit the application
    Quit,
}

impl SlashCommand {
    /// User-visible description shown in help.
    pub fn description(self) -> &'static str {
        match self {
            SlashCommand::Clear => "clear the conversation and start a new session",
            SlashCommand::Help => "show available commands and keys",
            SlashCommand::Quit => "exit the application",
        }
    }

    /// Command string without the leading '/'.
    pub fn command(self) -> &'static str {
        self.into()
    }
}

/// Parse a slash command from user input.
///
/// Only a known keyword (or alias) counts; anything else, including text such
/// as "/etc/hosts is missing", is sent to the agent as a normal message.
pub fn parse_slash_command(input: &str) -> Option<SlashCommand> {
    let rest = input.trim().strip_prefix('/')?;
    let mut parts = rest.split_whitespace();
    let head = parts.next()?.to_lowercase();
    if parts.next().is_some() {
        return None;
    }

    SlashCommand::from_str(&head)
        .ok()
        .or_else(|| match head.as_str() {
            "q" | "exit" | "bye" => Some(SlashCommand::Quit),
            "cls" | "new" => Some(SlashCommand::Clear),
            "h" | "?" => Some(SlashCommand::Help),
            _ => None,
        })
}

/// Get help text for all available commands
pub fn get_help_text() -> String {
    let mut help = String::from("Available commands:\n");
    for command in SlashCommand::iter() {
        help.push_str(&format!("  /{} - {}\n", command.command(), command.description()));
    }

    help.push_str("\nKeys: Enter to send, Shift+Enter for a new line, Ctrl+L to clear,");
    help.push_str(" PageUp/PageDown to scroll, Ctrl+C to quit.");

    help
}
