mod agent;
mod config;
mod events;
mod logging;
mod session;
mod tui;
mod ui;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::agent::build_agent_client;
use crate::config::{AgentCredentials, Config, ConfigOverrides};
use crate::events::ChatMessage;
use crate::session::{
    format_display_time_with, submit, ChatSession, IgnoreReason, SendPolicy, SubmitOutcome,
};

#[derive(Parser)]
#[command(name = "bedrock-chat")]
#[command(version)]
#[command(about = "Chat with a remote Bedrock agent from the terminal", long_about = None)]
struct Cli {
    /// Path to the config file (default: ~/.bedrock-chat/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: OverrideArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct OverrideArgs {
    /// Agent region
    #[arg(long, global = true)]
    region: Option<String>,

    /// Agent identifier
    #[arg(long, global = true)]
    agent_id: Option<String>,

    /// Agent alias identifier
    #[arg(long, global = true)]
    agent_alias_id: Option<String>,

    /// Reply delay of the mock agent in milliseconds
    #[arg(long, global = true)]
    mock_delay_ms: Option<u64>,

    /// Accept new messages while a reply is still pending
    #[arg(long, global = true)]
    allow_overlapping_sends: bool,
}

impl From<OverrideArgs> for ConfigOverrides {
    fn from(args: OverrideArgs) -> Self {
        ConfigOverrides {
            region: args.region,
            agent_id: args.agent_id,
            agent_alias_id: args.agent_alias_id,
            mock_delay_ms: args.mock_delay_ms,
            allow_overlapping_sends: args.allow_overlapping_sends,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Open the interactive chat window (default)
    Chat,
    /// Send a single message and print the conversation
    Ask {
        message: String,
        /// Print the messages as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect or create the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    config.apply_overrides(cli.overrides.into());

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Chat => {
            logging::init_file(&config.log_path(), &config.logging.level)?;
            tui::run(&config).await
        }
        Commands::Ask { message, json } => {
            logging::init_stderr(&config.logging.level)?;
            ask(&config, &message, json).await
        }
        Commands::Config { action } => {
            logging::init_stderr(&config.logging.level)?;
            match action {
                ConfigAction::Show => show_config(&config),
                ConfigAction::Init { force } => init_config(&config, force),
            }
        }
    }
}

async fn ask(config: &Config, message: &str, json: bool) -> Result<()> {
    let agent = build_agent_client(&config.agent);
    let mut session = ChatSession::new(
        config.session_config(),
        SendPolicy::from_flag(config.chat.allow_overlapping_sends),
    );

    let outcome = submit(&mut session, agent.as_ref(), message).await;
    if outcome == SubmitOutcome::Ignored(IgnoreReason::Empty) {
        bail!("Nothing to send: the message is empty");
    }

    if json {
        let rendered = serde_json::to_string_pretty(session.messages())
            .context("Failed to serialize conversation")?;
        println!("{rendered}");
    } else {
        for message in session.messages() {
            println!("{}", transcript_line(message, &config.ui.time_format));
        }
    }

    if outcome == SubmitOutcome::Failed {
        bail!("The agent call failed; see the log output above");
    }
    Ok(())
}

fn transcript_line(message: &ChatMessage, time_format: &str) -> String {
    let marker = if message.is_error() { " ⚠️" } else { "" };
    format!(
        "[{}] {}{}: {}",
        format_display_time_with(&message.timestamp, time_format),
        message.sender.display_name(),
        marker,
        message.text
    )
}

fn show_config(config: &Config) -> Result<()> {
    let credentials = AgentCredentials::from_env();
    print!("{}", render_config(config, &credentials)?);
    Ok(())
}

/// Effective config as TOML, with credential presence noted but never their values
fn render_config(config: &Config, credentials: &AgentCredentials) -> Result<String> {
    let rendered = toml::to_string_pretty(config).context("Failed to serialize config")?;
    let set_or_not = |set: bool| if set { "set" } else { "not set" };

    let mut out = format!("# {}\n{rendered}\n", config.config_path().display());
    out.push_str("# credentials (from environment, never written to disk)\n");
    out.push_str(&format!(
        "# {}: {}\n",
        config::ACCESS_KEY_ENV,
        set_or_not(credentials.is_configured())
    ));
    out.push_str(&format!(
        "# {}: {}\n",
        config::SESSION_TOKEN_ENV,
        set_or_not(credentials.session_token.is_some())
    ));
    Ok(out)
}

fn init_config(config: &Config, force: bool) -> Result<()> {
    let path = write_default_config(config, force)?;
    println!("📝 Wrote default config to {}", path.display());
    Ok(())
}

/// Write the default settings to the active config path and return that path
fn write_default_config(config: &Config, force: bool) -> Result<PathBuf> {
    let path = config.config_path();
    if path.exists() && !force {
        bail!(
            "Config file {} already exists (use --force to overwrite)",
            path.display()
        );
    }

    Config {
        home: config.home.clone(),
        config_file: path.clone(),
        ..Config::default()
    }
    .save_to(&path)?;
    Ok(path)
}
