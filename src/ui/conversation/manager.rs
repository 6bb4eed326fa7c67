use crate::agent::AgentClient;
use crate::config::UiConfig;
use crate::events::AppEvent;
use crate::session::{invoke_agent, ChatSession, IgnoreReason, SendTicket};
use crate::ui::conversation::composer::ComposerResult;
use crate::ui::conversation::{
    get_help_text, BusyIndicator, ConversationComposer, ConversationHistory, HistoryView,
    SlashCommand,
};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::{
    buffer::Buffer,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Style},
    text::{Line, Span},
    widgets::Widget,
};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Actions that can be requested by the conversation manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationAction {
    None,
    Exit,
}

/// Owns the chat session and wires it to the history, composer and agent
pub struct ConversationManager {
    session: ChatSession,
    agent: Arc<dyn AgentClient>,
    events_tx: mpsc::UnboundedSender<AppEvent>,
    history: ConversationHistory,
    composer: ConversationComposer,
    indicator: BusyIndicator,
    notice: Option<String>,
    ui: UiConfig,
}

impl ConversationManager {
    pub fn new(
        session: ChatSession,
        agent: Arc<dyn AgentClient>,
        events_tx: mpsc::UnboundedSender<AppEvent>,
        ui: UiConfig,
    ) -> Self {
        let mut composer = ConversationComposer::new("Type a message for the agent...");
        composer.set_focus(true);

        Self {
            session,
            agent,
            events_tx,
            history: ConversationHistory::new(),
            composer,
            indicator: BusyIndicator::new(),
            notice: None,
            ui,
        }
    }

    pub fn session(&self) -> &ChatSession {
        &self.session
    }

    pub fn composer(&self) -> &ConversationComposer {
        &self.composer
    }

    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    /// Handle key input
    pub fn handle_key(&mut self, key: KeyEvent) -> ConversationAction {
        self.notice = None;

        if key.modifiers.contains(KeyModifiers::CONTROL) {
            match key.code {
                KeyCode::Char('c') | KeyCode::Char('d') => return ConversationAction::Exit,
                KeyCode::Char('l') => {
                    self.clear_conversation();
                    return ConversationAction::None;
                }
                _ => {}
            }
        }

        match key.code {
            KeyCode::PageUp => {
                self.history.scroll_up(self.history.page_size());
                return ConversationAction::None;
            }
            KeyCode::PageDown => {
                self.history.scroll_down(self.history.page_size());
                return ConversationAction::None;
            }
            _ => {}
        }

        match self.composer.handle_key(key) {
            ComposerResult::Submitted(input) => {
                self.submit(input);
                ConversationAction::None
            }
            ComposerResult::Command(command) => self.handle_slash_command(command),
            ComposerResult::None => ConversationAction::None,
        }
    }

    pub fn handle_paste(&mut self, text: &str) {
        self.composer.insert_str(text);
    }

    /// Apply an event produced off the UI thread
    pub fn handle_app_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::AgentReply { ticket, outcome } => {
                self.session.complete_submit(ticket, outcome);
                self.sync_busy();
                self.follow_latest();
            }
        }
    }

    /// Start a send for text taken out of the composer
    fn submit(&mut self, input: String) {
        match self.session.begin_submit(&input) {
            Ok(ticket) => {
                self.sync_busy();
                self.follow_latest();
                self.dispatch(ticket);
            }
            Err(IgnoreReason::Busy) => {
                self.composer.restore(input);
                self.notice = Some("Still waiting for the previous reply.".to_string());
            }
            Err(IgnoreReason::Empty) => {}
        }
    }

    /// Run the agent call on its own task; the outcome comes back as an
    /// [`AppEvent::AgentReply`].
    fn dispatch(&self, ticket: SendTicket) {
        let agent = Arc::clone(&self.agent);
        let events_tx = self.events_tx.clone();

        tokio::spawn(async move {
            let outcome = invoke_agent(agent.as_ref(), &ticket).await;
            if events_tx.send(AppEvent::AgentReply { ticket, outcome }).is_err() {
                tracing::debug!("event loop closed before the agent reply arrived");
            }
        });
    }

    pub fn clear_conversation(&mut self) {
        self.session.clear_conversation();
        self.history.reset();
    }

    fn handle_slash_command(&mut self, command: SlashCommand) -> ConversationAction {
        match command {
            SlashCommand::Clear => {
                self.clear_conversation();
                ConversationAction::None
            }
            SlashCommand::Help => {
                self.notice = Some(get_help_text());
                ConversationAction::None
            }
            SlashCommand::Quit => ConversationAction::Exit,
        }
    }

    fn sync_busy(&mut self) {
        self.indicator.update(self.session.in_flight());
        self.composer.set_waiting(self.session.is_busy());
    }

    fn follow_latest(&mut self) {
        if let Err(err) = self.history.scroll_to_bottom() {
            tracing::debug!(error = %err, "skipping scroll to latest message");
        }
    }

    /// Render the conversation UI components
    pub fn render(&self, area: Rect, buf: &mut Buffer) {
        let notice_height = self
            .notice
            .as_ref()
            .map(|notice| rows(notice.lines().count()))
            .unwrap_or(0);
        let composer_height = rows(self.composer.content().matches('\n').count())
            .saturating_add(3)
            .min(8);

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Min(5),                  // History
                Constraint::Length(notice_height),   // Help / notices
                Constraint::Length(1),               // Busy indicator
                Constraint::Length(composer_height), // Composer
            ])
            .split(area);

        HistoryView::new(self.session.messages(), &self.history)
            .time_format(&self.ui.time_format)
            .show_timestamps(self.ui.show_timestamps)
            .render(chunks[0], buf);

        if let Some(notice) = &self.notice {
            for (i, text) in notice.lines().enumerate() {
                if i >= chunks[1].height as usize {
                    break;
                }
                let line = Line::from(vec![Span::styled(text, Style::default().fg(Color::Yellow))]);
                buf.set_line(chunks[1].x, chunks[1].y + i as u16, &line, chunks[1].width);
            }
        }

        self.indicator.render(chunks[2], buf);
        self.composer.render(chunks[3], buf);
    }
}

/// Line count as a layout height, clamped to what a terminal can hold
fn rows(lines: usize) -> u16 {
    u16::try_from(lines).unwrap_or(u16::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentError, MockAgentClient};
    use crate::config::{AgentConfig, AgentCredentials, SessionConfig};
    use crate::events::Sender;
    use crate::session::{SendPolicy, ERROR_REPLY};
    use async_trait::async_trait;
    use std::time::Duration;

    struct FailingAgent;

    #[async_trait]
    impl AgentClient for FailingAgent {
        fn name(&self) -> &str {
            "failing"
        }

        async fn invoke(&self, _config: &SessionConfig, _message: &str) -> Result<String, AgentError> {
            Err(AgentError::MalformedResponse {
                detail: "empty completion".to_string(),
            })
        }
    }

    fn manager(
        agent: Arc<dyn AgentClient>,
        policy: SendPolicy,
    ) -> (ConversationManager, mpsc::UnboundedReceiver<AppEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = ChatSession::new(
            SessionConfig::new(&AgentConfig::default(), AgentCredentials::empty()),
            policy,
        );
        (ConversationManager::new(session, agent, tx, UiConfig::default()), rx)
    }

    fn type_and_send(manager: &mut ConversationManager, text: &str) -> ConversationAction {
        for c in text.chars() {
            manager.handle_key(KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE));
        }
        manager.handle_key(KeyEvent::new(KeyCode::Enter, KeyModifiers::NONE))
    }

    #[tokio::test(start_paused = true)]
    async fn enter_sends_and_reply_arrives() {
        let agent = Arc::new(MockAgentClient::new(Duration::from_millis(1000)));
        let (mut manager, mut rx) = manager(agent, SendPolicy::RejectWhileBusy);

        type_and_send(&mut manager, "Hello");
        assert_eq!(manager.composer().content(), "");
        assert!(manager.session().is_busy());
        assert_eq!(manager.session().messages().len(), 1);

        let event = rx.recv().await.unwrap();
        manager.handle_app_event(event);

        let messages = manager.session().messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].sender, Sender::User);
        assert_eq!(messages[1].sender, Sender::Bot);
        assert_eq!(messages[1].text, MockAgentClient::reply_for("Hello"));
        assert!(!manager.session().is_busy());
    }

    #[tokio::test]
    async fn failure_becomes_error_reply() {
        let (mut manager, mut rx) = manager(Arc::new(FailingAgent), SendPolicy::RejectWhileBusy);

        type_and_send(&mut manager, "Hello");
        let event = rx.recv().await.unwrap();
        manager.handle_app_event(event);

        let messages = manager.session().messages();
        assert_eq!(messages[1].text, ERROR_REPLY);
        assert_eq!(messages[1].is_error, Some(true));
        assert!(!manager.session().is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn send_while_busy_keeps_the_draft() {
        let agent = Arc::new(MockAgentClient::new(Duration::from_millis(1000)));
        let (mut manager, _rx) = manager(agent, SendPolicy::RejectWhileBusy);

        type_and_send(&mut manager, "first");
        type_and_send(&mut manager, "second");

        assert_eq!(manager.session().messages().len(), 1);
        assert_eq!(manager.composer().content(), "second");
        assert!(manager.notice().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_policy_accepts_second_send() {
        let agent = Arc::new(MockAgentClient::new(Duration::from_millis(1000)));
        let (mut manager, mut rx) = manager(agent, SendPolicy::AllowOverlapping);

        type_and_send(&mut manager, "first");
        type_and_send(&mut manager, "second");
        assert_eq!(manager.session().in_flight(), 2);

        for _ in 0..2 {
            let event = rx.recv().await.unwrap();
            manager.handle_app_event(event);
        }
        assert_eq!(manager.session().messages().len(), 4);
        assert!(!manager.session().is_busy());
    }

    #[tokio::test]
    async fn shift_enter_does_not_send() {
        let (mut manager, _rx) = manager(Arc::new(FailingAgent), SendPolicy::RejectWhileBusy);

        manager.handle_key(KeyEvent::new(KeyCode::Char('a'), KeyModifiers::NONE));
        manager.handle_key(KeyEvent::new(KeyCode::Enter, KeyModifiers::SHIFT));

        assert!(manager.session().messages().is_empty());
        assert_eq!(manager.composer().content(), "a\n");
    }

    #[tokio::test]
    async fn clear_command_and_shortcut_empty_the_thread() {
        let (mut manager, mut rx) = manager(Arc::new(FailingAgent), SendPolicy::RejectWhileBusy);
        type_and_send(&mut manager, "Hello");
        manager.handle_app_event(rx.recv().await.unwrap());
        let first_session = manager.session().config().session_id.clone();

        type_and_send(&mut manager, "/clear");
        assert!(manager.session().messages().is_empty());
        assert_ne!(manager.session().config().session_id, first_session);

        type_and_send(&mut manager, "again");
        manager.handle_app_event(rx.recv().await.unwrap());
        manager.handle_key(KeyEvent::new(KeyCode::Char('l'), KeyModifiers::CONTROL));
        assert!(manager.session().messages().is_empty());
    }

    #[tokio::test]
    async fn quit_paths() {
        let (mut manager, _rx) = manager(Arc::new(FailingAgent), SendPolicy::RejectWhileBusy);
        assert_eq!(type_and_send(&mut manager, "/quit"), ConversationAction::Exit);
        assert_eq!(
            manager.handle_key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            ConversationAction::Exit
        );
    }

    #[tokio::test]
    async fn help_shows_notice_without_touching_store() {
        let (mut manager, _rx) = manager(Arc::new(FailingAgent), SendPolicy::RejectWhileBusy);
        type_and_send(&mut manager, "/help");
        assert!(manager.notice().unwrap().contains("/clear"));
        assert!(manager.session().messages().is_empty());

        let area = Rect::new(0, 0, 80, 30);
        let mut buf = Buffer::empty(area);
        manager.render(area, &mut buf);
    }

    #[tokio::test]
    async fn huge_paste_renders_without_overflow() {
        let (mut manager, _rx) = manager(Arc::new(FailingAgent), SendPolicy::RejectWhileBusy);
        manager.handle_paste(&"x\n".repeat(70_000));
        manager.notice = Some("note\n".repeat(70_000));

        let area = Rect::new(0, 0, 80, 30);
        let mut buf = Buffer::empty(area);
        manager.render(area, &mut buf);

        assert_eq!(rows(70_000), u16::MAX);
        assert_eq!(rows(12), 12);
    }
}
