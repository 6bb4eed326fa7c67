use crate::config::{AgentBackend, AgentConfig, SessionConfig};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Failures reported by an agent client.
///
/// The send pipeline never shows these to the user; they are logged and
/// replaced by a generic error reply.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent '{agent_id}' is unavailable")]
    Unavailable { agent_id: String },

    #[allow(dead_code)]
    #[error("agent rejected the request: {reason}")]
    Rejected { reason: String },

    #[allow(dead_code)]
    #[error("malformed agent response: {detail}")]
    MalformedResponse { detail: String },

    #[error("agent call aborted: {reason}")]
    Aborted { reason: String },
}

/// The remote agent that produces a reply for each user message.
///
/// Implementations must return an error instead of partial output when the
/// call cannot be completed, and must not add retries or timeouts of their own.
#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Send one message within the session described by `config` and return
    /// the agent's completion text.
    async fn invoke(&self, config: &SessionConfig, message: &str) -> Result<String, AgentError>;
}

/// Stand-in agent that waits a fixed delay and echoes a canned reply
#[derive(Debug, Clone)]
pub struct MockAgentClient {
    delay: Duration,
}

impl MockAgentClient {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn reply_for(message: &str) -> String {
        format!(
            "This is a mock response to: \"{message}\". Replace the mock agent client with your actual AWS Bedrock agent integration."
        )
    }
}

impl Default for MockAgentClient {
    fn default() -> Self {
        Self::new(Duration::from_millis(1000))
    }
}

#[async_trait]
impl AgentClient for MockAgentClient {
    fn name(&self) -> &str {
        "mock"
    }

    async fn invoke(&self, config: &SessionConfig, message: &str) -> Result<String, AgentError> {
        tracing::debug!(
            agent_id = %config.agent_id,
            session_id = %config.session_id,
            delay_ms = self.delay.as_millis() as u64,
            "mock agent invoked"
        );
        tokio::time::sleep(self.delay).await;
        Ok(Self::reply_for(message))
    }
}

/// Build the agent client selected by the configuration
pub fn build_agent_client(config: &AgentConfig) -> Arc<dyn AgentClient> {
    match config.backend {
        AgentBackend::Mock => Arc::new(MockAgentClient::new(Duration::from_millis(
            config.mock_delay_ms,
        ))),
    }
}
