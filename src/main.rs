//! ConvoAI CLI entry point.
//!
//! Provides `chat`, `serve`, `status`, `personalities` and `reset`
//! subcommands over the synthesis engine.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use convoai::config::Config;
use convoai::engine::SynthesisEngine;
use convoai::logging::{self, Console};
use convoai::personality::{display_personality, PersonalityCatalog};
use convoai::server::{self, AppState};

/// ConvoAI - conversational assistant with memory and personalities.
#[derive(Parser)]
#[command(name = "convoai", version, about)]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Chat interactively in the terminal.
    Chat {
        /// Conversation owner.
        #[arg(long, default_value = "default")]
        user: String,
        /// Personality to start with.
        #[arg(long)]
        personality: Option<String>,
    },
    /// Run the HTTP server.
    Serve {
        /// Override the configured bind address.
        #[arg(long)]
        bind: Option<String>,
    },
    /// Probe the completion provider and print its state.
    Status,
    /// List the personality catalog.
    Personalities,
    /// Delete all stored data for one user.
    Reset {
        /// User whose history and profile are removed.
        #[arg(long)]
        user: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let config = Config::load().context("failed to load configuration")?;

    match cli.command {
        Command::Chat { user, personality } => handle_chat(config, &user, personality).await,
        Command::Serve { bind } => handle_serve(config, bind).await,
        Command::Status => handle_status(config).await,
        Command::Personalities => handle_personalities(&config),
        Command::Reset { user } => handle_reset(config, &user).await,
    }
}

/// Interactive console loop.
async fn handle_chat(
    config: Config,
    user: &str,
    personality: Option<String>,
) -> anyhow::Result<()> {
    let _logging_guard = logging::init_production(&config.paths.logs, Console::Quiet)?;
    let engine = convoai::build_engine(&config).await?;

    let mut session = engine.new_session();
    if let Some(key) = personality {
        let outcome = engine.switch_personality(&mut session, &key);
        println!("{}", outcome.message);
    }

    println!("🤖 ConvoAI ({})", engine.status_line());
    println!("Commands: /personality <key>, /personalities, /profile, /clear, /quit");
    println!(
        "[{}] {}",
        display_personality(&session.personality),
        engine.greeting(&session)
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(b"You: ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line.split_once(' ').map_or((line, ""), |(c, rest)| (c, rest.trim())) {
            ("/quit" | "/exit", _) => break,
            ("/personalities", _) => {
                for key in engine.catalog().list_keys() {
                    let marker = if key == session.personality { "*" } else { " " };
                    println!(" {marker} {key}");
                }
            }
            ("/personality", key) => {
                println!("{}", engine.switch_personality(&mut session, key).message);
            }
            ("/profile", _) => print_profile(&engine, user).await?,
            ("/clear", _) => {
                engine.clear(user).await?;
                println!("🧹 Conversation history and profile cleared.");
            }
            _ => {
                tokio::select! {
                    reply = engine.submit_in(&session, user, line) => {
                        println!("{}: {}", display_personality(&session.personality), reply?);
                    }
                    _ = tokio::signal::ctrl_c() => {
                        warn!(user, "turn cancelled by user");
                        println!("\n(cancelled)");
                    }
                }
            }
        }
    }

    println!("👋 Thanks for chatting!");
    Ok(())
}

async fn print_profile(engine: &SynthesisEngine, user: &str) -> anyhow::Result<()> {
    let profile = engine.profile_snapshot(user).await?;
    let stats = engine.stats(user).await?;
    println!("Name:      {}", profile.display_name.as_deref().unwrap_or("(unknown)"));
    let interests: Vec<&str> = profile.interests.iter().map(String::as_str).collect();
    println!(
        "Interests: {}",
        if interests.is_empty() {
            "(none yet)".to_owned()
        } else {
            interests.join(", ")
        }
    );
    println!("Messages:  {}", stats.total_messages);
    if let Some(first) = stats.first_message_at {
        println!("Since:     {}", first.format("%Y-%m-%d %H:%M UTC"));
    }
    Ok(())
}

/// Run the HTTP server until interrupted.
async fn handle_serve(config: Config, bind: Option<String>) -> anyhow::Result<()> {
    let _logging_guard = logging::init_production(&config.paths.logs, Console::Full)?;
    let engine = Arc::new(convoai::build_engine(&config).await?);
    let addr = bind.unwrap_or_else(|| config.server.bind.clone());

    info!(
        database = %config.paths.database.display(),
        personalities = %config.paths.personalities.display(),
        "convoai server starting"
    );
    server::serve(AppState::new(engine), &addr).await
}

/// Probe the provider once and report.
async fn handle_status(mut config: Config) -> anyhow::Result<()> {
    logging::init_cli();
    config.provider.probe_on_start = true;
    let engine = convoai::build_engine(&config).await?;

    println!("provider:  {:?} at {}", config.provider.kind, config.provider.effective_base_url());
    println!("state:     {}", engine.provider_state().as_str());
    println!("status:    {}", engine.status_line());
    println!("database:  {}", config.paths.database.display());
    Ok(())
}

/// Print the catalog without touching the provider or database.
fn handle_personalities(config: &Config) -> anyhow::Result<()> {
    logging::init_cli();
    let catalog = PersonalityCatalog::load(
        &config.paths.personalities,
        &config.conversation.default_personality,
    );
    for p in catalog.list() {
        let marker = if p.key == catalog.default_key() {
            " (default)"
        } else {
            ""
        };
        println!("{}{marker} - {}: {}", p.key, p.display_name, p.description);
    }
    Ok(())
}

/// Forget a user.
async fn handle_reset(mut config: Config, user: &str) -> anyhow::Result<()> {
    logging::init_cli();
    config.provider.probe_on_start = false;
    let engine = convoai::build_engine(&config).await?;
    engine.clear(user).await?;
    println!("Cleared all data for user '{user}'.");
    Ok(())
}
