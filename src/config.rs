use anyhow::{Context, Result};
use chrono::Utc;
use secrecy::Secret;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const ACCESS_KEY_ENV: &str = "AWS_ACCESS_KEY_ID";
pub const SECRET_KEY_ENV: &str = "AWS_SECRET_ACCESS_KEY";
pub const SESSION_TOKEN_ENV: &str = "AWS_SESSION_TOKEN";

const SESSION_PREFIX: &str = "session-";

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Target agent deployment
    pub agent: AgentConfig,

    /// Send pipeline behavior
    pub chat: ChatConfig,

    /// UI preferences
    pub ui: UiConfig,

    /// Log output
    pub logging: LoggingConfig,

    /// Application home directory (not persisted)
    #[serde(skip)]
    pub home: PathBuf,

    /// File this config was loaded from (not persisted)
    #[serde(skip)]
    pub config_file: PathBuf,
}

/// Which agent client implementation to talk to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentBackend {
    #[default]
    Mock,
}

/// Agent deployment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub backend: AgentBackend,
    pub region: String,
    pub agent_id: String,
    pub agent_alias_id: String,
    pub mock_delay_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            backend: AgentBackend::Mock,
            region: "us-east-1".to_string(),
            agent_id: "your-agent-id".to_string(),
            agent_alias_id: "your-agent-alias-id".to_string(),
            mock_delay_ms: 1000,
        }
    }
}

/// Send pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Accept new sends while a reply is still outstanding
    pub allow_overlapping_sends: bool,
}

/// UI configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    /// chrono format string for message times
    pub time_format: String,
    pub show_timestamps: bool,
    pub tick_rate_ms: u64,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            time_format: "%H:%M:%S".to_string(),
            show_timestamps: true,
            tick_rate_ms: 250,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by RUST_LOG
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Values supplied on the command line that take precedence over the file
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub region: Option<String>,
    pub agent_id: Option<String>,
    pub agent_alias_id: Option<String>,
    pub mock_delay_ms: Option<u64>,
    pub allow_overlapping_sends: bool,
}

impl Config {
    /// Default home directory (~/.bedrock-chat)
    pub fn default_home() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not find home directory")?;
        Ok(home.join(".bedrock-chat"))
    }

    /// Load configuration from an explicit path or from the default home.
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (home, config_path) = match path {
            Some(path) => {
                let home = match path.parent() {
                    Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                    _ => PathBuf::from("."),
                };
                (home, path.to_path_buf())
            }
            None => {
                let home = Self::default_home()?;
                let config_path = home.join("config.toml");
                (home, config_path)
            }
        };

        let mut config = Self::load_from(&config_path)?;
        config.home = home;
        config.config_file = config_path;
        Ok(config)
    }

    /// Parse a config file; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Save configuration to file. Credentials are never part of the file.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    /// The file given by `--config`, else `<home>/config.toml`
    pub fn config_path(&self) -> PathBuf {
        if self.config_file.as_os_str().is_empty() {
            self.home.join("config.toml")
        } else {
            self.config_file.clone()
        }
    }

    pub fn log_path(&self) -> PathBuf {
        self.home.join("logs").join("bedrock-chat.log")
    }

    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(region) = overrides.region {
            self.agent.region = region;
        }
        if let Some(agent_id) = overrides.agent_id {
            self.agent.agent_id = agent_id;
        }
        if let Some(alias) = overrides.agent_alias_id {
            self.agent.agent_alias_id = alias;
        }
        if let Some(delay) = overrides.mock_delay_ms {
            self.agent.mock_delay_ms = delay;
        }
        if overrides.allow_overlapping_sends {
            self.chat.allow_overlapping_sends = true;
        }
    }

    /// Build the per-run session config, reading credentials from the environment
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::new(&self.agent, AgentCredentials::from_env())
    }
}

/// Credential material for the agent call. Held in memory only.
#[derive(Debug, Clone)]
pub struct AgentCredentials {
    pub access_key_id: String,
    pub secret_access_key: Secret<String>,
    pub session_token: Option<Secret<String>>,
}

impl AgentCredentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: Secret::new(secret_access_key.into()),
            session_token: session_token.map(Secret::new),
        }
    }

    #[allow(dead_code)]
    pub fn empty() -> Self {
        Self::new(String::new(), String::new(), None)
    }

    pub fn from_env() -> Self {
        let token = std::env::var(SESSION_TOKEN_ENV)
            .ok()
            .filter(|token| !token.is_empty());
        Self::new(
            std::env::var(ACCESS_KEY_ENV).unwrap_or_default(),
            std::env::var(SECRET_KEY_ENV).unwrap_or_default(),
            token,
        )
    }

    pub fn is_configured(&self) -> bool {
        !self.access_key_id.is_empty()
    }
}

/// Identifies the agent deployment and the current conversation
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub region: String,
    pub agent_id: String,
    pub agent_alias_id: String,
    pub session_id: String,
    pub credentials: AgentCredentials,
}

impl SessionConfig {
    pub fn new(agent: &AgentConfig, credentials: AgentCredentials) -> Self {
        Self {
            region: agent.region.clone(),
            agent_id: agent.agent_id.clone(),
            agent_alias_id: agent.agent_alias_id.clone(),
            session_id: new_session_id(None),
            credentials,
        }
    }

    /// Replace the session id with a fresh one that differs from the current one
    pub fn regenerate_session_id(&mut self) -> &str {
        self.session_id = new_session_id(Some(&self.session_id));
        &self.session_id
    }
}

/// `session-<unix millis>`, bumped past `previous` when the clock has not moved
pub fn new_session_id(previous: Option<&str>) -> String {
    let mut millis = Utc::now().timestamp_millis();
    let previous_millis = previous
        .and_then(|id| id.strip_prefix(SESSION_PREFIX))
        .and_then(|n| n.parse::<i64>().ok());
    if let Some(prev) = previous_millis {
        if millis <= prev {
            millis = prev.saturating_add(1);
        }
    }
    format!("{SESSION_PREFIX}{millis}")
}
