use chrono::{DateTime, Local, Utc};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;

use crate::agent::{AgentClient, AgentError};
use crate::config::SessionConfig;
use crate::events::{ChatMessage, MessageId, Sender};

/// Reply shown in place of the agent's answer when the call fails
pub const ERROR_REPLY: &str =
    "Sorry, I encountered an error while processing your request. Please try again.";

pub const DEFAULT_TIME_FORMAT: &str = "%H:%M:%S";

/// Ordered, append-only list of messages for the current session
#[derive(Debug, Default)]
pub struct ConversationStore {
    messages: Vec<ChatMessage>,
    last_id: Option<MessageId>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message stamped with the current time
    pub fn push(&mut self, sender: Sender, text: String, is_error: Option<bool>) -> &ChatMessage {
        let timestamp = Utc::now();
        let id = self.next_id(timestamp);
        self.messages.push(ChatMessage {
            id,
            text,
            sender,
            timestamp,
            is_error,
        });
        &self.messages[self.messages.len() - 1]
    }

    // Time-derived, but never equal to or below the previous id.
    fn next_id(&mut self, timestamp: DateTime<Utc>) -> MessageId {
        let mut millis = timestamp.timestamp_millis();
        if let Some(MessageId(last)) = self.last_id {
            if millis <= last {
                millis = last.saturating_add(1);
            }
        }
        let id = MessageId(millis);
        self.last_id = Some(id);
        id
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    #[allow(dead_code)]
    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Drop every message. Ids keep increasing afterwards.
    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

/// How submits are treated while a reply is still outstanding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendPolicy {
    /// Refuse new sends until the pending reply has settled
    RejectWhileBusy,
    /// Let sends overlap; replies land in completion order
    AllowOverlapping,
}

impl SendPolicy {
    pub fn from_flag(allow_overlapping: bool) -> Self {
        if allow_overlapping {
            SendPolicy::AllowOverlapping
        } else {
            SendPolicy::RejectWhileBusy
        }
    }
}

/// Why a submit did not start a send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Input was empty or whitespace only
    Empty,
    /// A send is already in flight
    Busy,
}

/// An accepted send waiting for the agent's answer
#[derive(Debug, Clone)]
pub struct SendTicket {
    /// Text exactly as the user typed it
    pub message: String,
    /// Session the message was sent in
    pub config: SessionConfig,
    pub user_message_id: MessageId,
}

/// How a completed submit settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Ignored(IgnoreReason),
    Replied,
    Failed,
}

/// All state for one chat window: messages, busy flag and agent session
#[derive(Debug)]
pub struct ChatSession {
    store: ConversationStore,
    config: SessionConfig,
    policy: SendPolicy,
    in_flight: usize,
}

impl ChatSession {
    pub fn new(config: SessionConfig, policy: SendPolicy) -> Self {
        Self {
            store: ConversationStore::new(),
            config,
            policy,
            in_flight: 0,
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        self.store.messages()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// True while at least one agent call is outstanding
    pub fn is_busy(&self) -> bool {
        self.in_flight > 0
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// First half of a submit: validate, record the user message and mark busy.
    ///
    /// The caller owns the entry field and must reset it once this returns
    /// `Ok`; on `Err(IgnoreReason::Busy)` the field should keep its text.
    pub fn begin_submit(&mut self, raw_input: &str) -> Result<SendTicket, IgnoreReason> {
        if raw_input.trim().is_empty() {
            tracing::debug!("ignoring empty input");
            return Err(IgnoreReason::Empty);
        }
        if self.policy == SendPolicy::RejectWhileBusy && self.is_busy() {
            tracing::debug!("ignoring submit while a reply is pending");
            return Err(IgnoreReason::Busy);
        }

        let message = raw_input.to_string();
        let user_message_id = self
            .store
            .push(Sender::User, message.clone(), None)
            .id;
        self.in_flight += 1;

        tracing::info!(
            session_id = %self.config.session_id,
            message_id = %user_message_id,
            chars = message.chars().count(),
            "message submitted"
        );

        Ok(SendTicket {
            message,
            config: self.config.clone(),
            user_message_id,
        })
    }

    /// Second half of a submit: record the reply (or the error reply) and
    /// release the busy flag.
    pub fn complete_submit(
        &mut self,
        ticket: SendTicket,
        outcome: Result<String, AgentError>,
    ) -> SubmitOutcome {
        self.in_flight = self.in_flight.saturating_sub(1);

        match outcome {
            Ok(completion) => {
                self.store.push(Sender::Bot, completion, None);
                tracing::info!(
                    session_id = %ticket.config.session_id,
                    message_id = %ticket.user_message_id,
                    "agent replied"
                );
                SubmitOutcome::Replied
            }
            Err(err) => {
                tracing::error!(
                    session_id = %ticket.config.session_id,
                    agent_id = %ticket.config.agent_id,
                    message_id = %ticket.user_message_id,
                    error = %err,
                    "agent call failed"
                );
                self.store
                    .push(Sender::Bot, ERROR_REPLY.to_string(), Some(true));
                SubmitOutcome::Failed
            }
        }
    }

    /// Release the busy count of an accepted send whose reply will never be
    /// recorded. The user message stays in the thread.
    pub fn abandon_submit(&mut self, user_message_id: MessageId) {
        self.in_flight = self.in_flight.saturating_sub(1);
        tracing::warn!(
            session_id = %self.config.session_id,
            message_id = %user_message_id,
            "send abandoned before the agent replied"
        );
    }

    /// Empty the conversation and start a new agent session
    pub fn clear_conversation(&mut self) {
        let previous = self.config.session_id.clone();
        self.store.clear();
        let next = self.config.regenerate_session_id();
        tracing::info!(previous = %previous, session_id = %next, "conversation cleared");
    }
}

/// Call the agent for an accepted send. A panicking agent is reported as
/// [`AgentError::Aborted`] so the send still settles.
pub async fn invoke_agent(agent: &dyn AgentClient, ticket: &SendTicket) -> Result<String, AgentError> {
    match AssertUnwindSafe(agent.invoke(&ticket.config, &ticket.message))
        .catch_unwind()
        .await
    {
        Ok(outcome) => outcome,
        Err(panic) => Err(AgentError::Aborted {
            reason: panic_message(panic.as_ref()),
        }),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "agent panicked".to_string()
    }
}

/// Run a whole submit: user message, agent call, reply, busy released.
pub async fn submit(
    session: &mut ChatSession,
    agent: &dyn AgentClient,
    raw_input: &str,
) -> SubmitOutcome {
    let ticket = match session.begin_submit(raw_input) {
        Ok(ticket) => ticket,
        Err(reason) => return SubmitOutcome::Ignored(reason),
    };
    let pending = PendingSend {
        message_id: ticket.user_message_id,
        session,
        armed: true,
    };
    let outcome = invoke_agent(agent, &ticket).await;
    pending.settle(ticket, outcome)
}

/// Holds the busy count of an accepted send for the duration of the agent
/// call. Dropping it unsettled (the `submit` future was cancelled) releases busy.
struct PendingSend<'a> {
    session: &'a mut ChatSession,
    message_id: MessageId,
    armed: bool,
}

impl PendingSend<'_> {
    fn settle(mut self, ticket: SendTicket, outcome: Result<String, AgentError>) -> SubmitOutcome {
        self.armed = false;
        self.session.complete_submit(ticket, outcome)
    }
}

impl Drop for PendingSend<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.session.abandon_submit(self.message_id);
        }
    }
}

/// Render a timestamp as local time of day
pub fn format_display_time(timestamp: &DateTime<Utc>) -> String {
    format_display_time_with(timestamp, DEFAULT_TIME_FORMAT)
}

pub fn format_display_time_with(timestamp: &DateTime<Utc>, format: &str) -> String {
    timestamp.with_timezone(&Local).format(format).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AgentConfig, AgentCredentials};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replies with fixed text after a delay and records what it was sent
    struct ScriptedAgent {
        reply: &'static str,
        delay: Duration,
        seen: Mutex<Vec<String>>,
    }

    impl ScriptedAgent {
        fn new(reply: &'static str, delay: Duration) -> Self {
            Self {
                reply,
                delay,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AgentClient for ScriptedAgent {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn invoke(&self, _config: &SessionConfig, message: &str) -> Result<String, AgentError> {
            self.seen.lock().unwrap().push(message.to_string());
            tokio::time::sleep(self.delay).await;
            Ok(self.reply.to_string())
        }
    }

    struct FailingAgent;

    #[async_trait]
    impl AgentClient for FailingAgent {
        fn name(&self) -> &str {
            "failing"
        }

        async fn invoke(&self, config: &SessionConfig, _message: &str) -> Result<String, AgentError> {
            Err(AgentError::Unavailable {
                agent_id: config.agent_id.clone(),
            })
        }
    }

    struct PanickingAgent;

    #[async_trait]
    impl AgentClient for PanickingAgent {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn invoke(&self, _config: &SessionConfig, _message: &str) -> Result<String, AgentError> {
            panic!("boom");
        }
    }

    fn new_session(policy: SendPolicy) -> ChatSession {
        ChatSession::new(
            SessionConfig::new(&AgentConfig::default(), AgentCredentials::empty()),
            policy,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn hello_gets_agent_reply() {
        let mut session = new_session(SendPolicy::RejectWhileBusy);
        let agent = ScriptedAgent::new("Hi there", Duration::from_millis(500));

        let outcome = submit(&mut session, &agent, "Hello").await;

        assert_eq!(outcome, SubmitOutcome::Replied);
        let messages = session.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].sender, Sender::User);
        assert_eq!(messages[0].text, "Hello");
        assert_eq!(messages[1].sender, Sender::Bot);
        assert_eq!(messages[1].text, "Hi there");
        assert_eq!(messages[1].is_error, None);
        assert!(!session.is_busy());
    }

    #[tokio::test]
    async fn failing_agent_yields_error_reply() {
        let mut session = new_session(SendPolicy::RejectWhileBusy);

        let outcome = submit(&mut session, &FailingAgent, "Hello").await;

        assert_eq!(outcome, SubmitOutcome::Failed);
        let messages = session.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].text, "Hello");
        assert_eq!(messages[1].sender, Sender::Bot);
        assert_eq!(messages[1].text, ERROR_REPLY);
        assert_eq!(messages[1].is_error, Some(true));
        assert!(!session.is_busy());
    }

    #[tokio::test]
    async fn panicking_agent_still_settles() {
        let mut session = new_session(SendPolicy::RejectWhileBusy);

        let outcome = submit(&mut session, &PanickingAgent, "Hello").await;

        assert_eq!(outcome, SubmitOutcome::Failed);
        assert_eq!(session.messages().len(), 2);
        assert!(session.messages()[1].is_error());
        assert!(!session.is_busy());
    }

    #[tokio::test]
    async fn blank_input_is_a_no_op() {
        let mut session = new_session(SendPolicy::RejectWhileBusy);
        let agent = ScriptedAgent::new("unused", Duration::ZERO);

        for input in ["", "   ", "\n\t  \n"] {
            let outcome = submit(&mut session, &agent, input).await;
            assert_eq!(outcome, SubmitOutcome::Ignored(IgnoreReason::Empty));
        }

        assert!(session.messages().is_empty());
        assert!(!session.is_busy());
        assert!(agent.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn untrimmed_text_is_recorded_and_sent() {
        let mut session = new_session(SendPolicy::RejectWhileBusy);
        let agent = ScriptedAgent::new("ok", Duration::ZERO);

        submit(&mut session, &agent, "  spaced out \n").await;

        assert_eq!(session.messages()[0].text, "  spaced out \n");
        assert_eq!(agent.seen.lock().unwrap().as_slice(), ["  spaced out \n"]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_submit_releases_busy() {
        let mut session = new_session(SendPolicy::RejectWhileBusy);
        let slow = ScriptedAgent::new("too late", Duration::from_secs(60));

        let cancelled =
            tokio::time::timeout(Duration::from_millis(10), submit(&mut session, &slow, "Hello")).await;

        assert!(cancelled.is_err());
        assert!(!session.is_busy());
        assert_eq!(session.messages().len(), 1);
        assert_eq!(session.messages()[0].text, "Hello");

        let agent = ScriptedAgent::new("Hi", Duration::ZERO);
        let outcome = submit(&mut session, &agent, "again").await;
        assert_eq!(outcome, SubmitOutcome::Replied);
        assert_eq!(session.messages().len(), 3);
    }

    #[test]
    fn busy_is_set_on_acceptance_and_released_on_both_paths() {
        let mut session = new_session(SendPolicy::RejectWhileBusy);

        let ticket = session.begin_submit("first").unwrap();
        assert!(session.is_busy());
        assert_eq!(session.messages().len(), 1);
        session.complete_submit(ticket, Ok("done".to_string()));
        assert!(!session.is_busy());

        let ticket = session.begin_submit("second").unwrap();
        assert!(session.is_busy());
        session.complete_submit(
            ticket,
            Err(AgentError::Rejected {
                reason: "denied".to_string(),
            }),
        );
        assert!(!session.is_busy());
        assert_eq!(session.messages().len(), 4);
    }

    #[test]
    fn submit_while_busy_is_rejected_by_default() {
        let mut session = new_session(SendPolicy::RejectWhileBusy);

        let ticket = session.begin_submit("first").unwrap();
        assert_eq!(
            session.begin_submit("second").unwrap_err(),
            IgnoreReason::Busy
        );
        assert_eq!(session.messages().len(), 1);

        session.complete_submit(ticket, Ok("reply".to_string()));
        assert!(session.begin_submit("second").is_ok());
    }

    #[test]
    fn overlapping_sends_settle_in_completion_order() {
        let mut session = new_session(SendPolicy::AllowOverlapping);

        let first = session.begin_submit("first").unwrap();
        let second = session.begin_submit("second").unwrap();
        assert_eq!(session.in_flight(), 2);

        session.complete_submit(second, Ok("reply to second".to_string()));
        assert!(session.is_busy());
        session.complete_submit(first, Ok("reply to first".to_string()));
        assert!(!session.is_busy());

        let texts: Vec<&str> = session.messages().iter().map(|m| m.text.as_str()).collect();
        assert_eq!(
            texts,
            ["first", "second", "reply to second", "reply to first"]
        );
    }

    #[test]
    fn ticket_carries_session_snapshot() {
        let mut session = new_session(SendPolicy::RejectWhileBusy);
        let ticket = session.begin_submit("hi").unwrap();
        assert_eq!(ticket.config.session_id, session.config().session_id);
        assert_eq!(ticket.message, "hi");
        assert_eq!(ticket.user_message_id, session.messages()[0].id);
    }

    #[tokio::test]
    async fn clear_empties_store_and_rotates_session() {
        let mut session = new_session(SendPolicy::RejectWhileBusy);
        let agent = ScriptedAgent::new("reply", Duration::ZERO);
        submit(&mut session, &agent, "one").await;
        submit(&mut session, &agent, "two").await;
        assert_eq!(session.messages().len(), 4);

        let before = session.config().session_id.clone();
        session.clear_conversation();

        assert_eq!(session.messages().len(), 0);
        assert_ne!(session.config().session_id, before);
    }

    #[test]
    fn message_ids_follow_insertion_order() {
        let mut store = ConversationStore::new();
        for i in 0..50 {
            store.push(Sender::User, format!("m{i}"), None);
        }
        let ids: Vec<MessageId> = store.messages().iter().map(|m| m.id).collect();
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));

        let last = store.last().unwrap().id;
        store.clear();
        assert!(store.is_empty());
        assert!(store.push(Sender::Bot, "after".to_string(), None).id > last);
    }

    #[test]
    fn display_time_uses_local_clock() {
        let timestamp = Utc::now();
        let expected = timestamp.with_timezone(&Local).format("%H:%M:%S").to_string();
        assert_eq!(format_display_time(&timestamp), expected);
        assert_eq!(
            format_display_time_with(&timestamp, "%H:%M"),
            timestamp.with_timezone(&Local).format("%H:%M").to_string()
        );
    }
}
