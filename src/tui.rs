use crate::agent::build_agent_client;
use crate::config::Config;
use crate::events::TuiEvent;
use crate::session::{ChatSession, SendPolicy};
use crate::ui::conversation::{ConversationAction, ConversationManager};
use anyhow::{Context, Result};
use crossterm::{
    event::{
        DisableBracketedPaste, EnableBracketedPaste, EventStream, KeyboardEnhancementFlags,
        PopKeyboardEnhancementFlags, PushKeyboardEnhancementFlags,
    },
    execute,
    terminal::{self, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures::StreamExt;
use ratatui::{backend::CrosstermBackend, Terminal};
use std::io::{self, Stdout};
use std::time::Duration;
use tokio::sync::mpsc;

/// Raw-mode alternate screen that is restored when dropped
struct TerminalGuard {
    terminal: Terminal<CrosstermBackend<Stdout>>,
    keyboard_enhanced: bool,
}

impl TerminalGuard {
    fn enter() -> Result<Self> {
        terminal::enable_raw_mode().context("Failed to enable raw mode")?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, EnableBracketedPaste)
            .context("Failed to enter alternate screen")?;

        // Needed for terminals to report Shift on Enter
        let keyboard_enhanced = matches!(terminal::supports_keyboard_enhancement(), Ok(true));
        if keyboard_enhanced {
            execute!(
                stdout,
                PushKeyboardEnhancementFlags(KeyboardEnhancementFlags::DISAMBIGUATE_ESCAPE_CODES)
            )
            .context("Failed to enable keyboard enhancement")?;
        }

        let terminal =
            Terminal::new(CrosstermBackend::new(stdout)).context("Failed to create terminal")?;
        Ok(Self {
            terminal,
            keyboard_enhanced,
        })
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let backend = self.terminal.backend_mut();
        if self.keyboard_enhanced {
            if let Err(err) = execute!(backend, PopKeyboardEnhancementFlags) {
                tracing::warn!(error = %err, "failed to pop keyboard enhancement flags");
            }
        }
        if let Err(err) = execute!(backend, DisableBracketedPaste, LeaveAlternateScreen) {
            tracing::warn!(error = %err, "failed to leave alternate screen");
        }
        if let Err(err) = terminal::disable_raw_mode() {
            tracing::warn!(error = %err, "failed to disable raw mode");
        }
        if let Err(err) = self.terminal.show_cursor() {
            tracing::warn!(error = %err, "failed to restore cursor");
        }
    }
}

/// Run the interactive chat window until the user quits
pub async fn run(config: &Config) -> Result<()> {
    let agent = build_agent_client(&config.agent);
    let session = ChatSession::new(
        config.session_config(),
        SendPolicy::from_flag(config.chat.allow_overlapping_sends),
    );
    tracing::info!(
        agent = agent.name(),
        region = %session.config().region,
        agent_id = %session.config().agent_id,
        session_id = %session.config().session_id,
        credentials = session.config().credentials.is_configured(),
        "starting chat window"
    );

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let mut manager = ConversationManager::new(session, agent, events_tx, config.ui.clone());

    let mut guard = TerminalGuard::enter()?;
    let mut terminal_events = EventStream::new();
    let mut tick = tokio::time::interval(Duration::from_millis(config.ui.tick_rate_ms.max(16)));

    loop {
        // A failed frame only loses that frame
        if let Err(err) = guard
            .terminal
            .draw(|frame| manager.render(frame.size(), frame.buffer_mut()))
        {
            tracing::warn!(error = %err, "failed to draw frame");
        }

        tokio::select! {
            maybe_event = terminal_events.next() => match maybe_event {
                Some(Ok(event)) => match TuiEvent::from_crossterm(event) {
                    Some(TuiEvent::Key(key)) => {
                        if manager.handle_key(key) == ConversationAction::Exit {
                            break;
                        }
                    }
                    Some(TuiEvent::Paste(text)) => manager.handle_paste(&text),
                    Some(TuiEvent::Resize(..)) | Some(TuiEvent::Draw) | None => {}
                },
                Some(Err(err)) => return Err(err).context("Failed to read terminal event"),
                None => break,
            },
            Some(event) = events_rx.recv() => manager.handle_app_event(event),
            _ = tick.tick() => {}
        }
    }

    tracing::info!(
        messages = manager.session().messages().len(),
        pending = manager.session().in_flight(),
        "chat window closed"
    );
    Ok(())
}
