use anyhow::Result;
use ask_docs::commands::{
    ask, chat, check_credentials, clear_chat, delete_session, ingest, list_sessions, new_session,
    show_history, sweep_sessions,
};
use ask_docs::config::{resolve_config_dir, run_interactive_config, show_config};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ask-docs")]
#[command(about = "Ask questions about your documents and web pages with a language model")]
#[command(version)]
struct Cli {
    /// Configuration directory (defaults to the platform config dir)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure the embedding and chat services
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Manage sessions
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
    /// Load files and web pages into a session and rebuild its index
    Ingest {
        /// Session ID
        session: String,
        /// PDF or text files to load
        files: Vec<PathBuf>,
        /// Web page to load (repeatable)
        #[arg(long = "url")]
        urls: Vec<String>,
    },
    /// Ask a single question
    Ask {
        /// Session ID
        session: String,
        /// The question
        question: String,
        /// Answer without retrieving documents
        #[arg(long)]
        no_rag: bool,
    },
    /// Start an interactive chat in a session
    Chat {
        /// Session ID
        session: String,
        /// Answer without retrieving documents
        #[arg(long)]
        no_rag: bool,
    },
    /// Show the question history of a session
    History {
        /// Session ID
        session: String,
    },
    /// Clear the chat history of a session
    Clear {
        /// Session ID
        session: String,
    },
    /// Check the embedding model and the chat service credentials
    Check {
        /// API key to check instead of the configured environment variable
        #[arg(long)]
        api_key: Option<String>,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    /// Create a new session
    New,
    /// List all sessions
    List,
    /// Delete a session
    Delete {
        /// Session ID
        id: String,
        /// Skip the confirmation prompt
        #[arg(long, short)]
        yes: bool,
    },
    /// Remove sessions older than the retention window
    Sweep,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config_dir = resolve_config_dir(cli.config_dir)?;

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(&config_dir)?;
            } else {
                run_interactive_config(&config_dir)?;
            }
        }
        Commands::Session { action } => match action {
            SessionAction::New => new_session(&config_dir)?,
            SessionAction::List => list_sessions(&config_dir)?,
            SessionAction::Delete { id, yes } => delete_session(&config_dir, &id, yes)?,
            SessionAction::Sweep => sweep_sessions(&config_dir)?,
        },
        Commands::Ingest {
            session,
            files,
            urls,
        } => {
            ingest(&config_dir, &session, &files, &urls).await?;
        }
        Commands::Ask {
            session,
            question,
            no_rag,
        } => {
            ask(&config_dir, &session, &question, no_rag).await?;
        }
        Commands::Chat { session, no_rag } => {
            chat(&config_dir, &session, no_rag).await?;
        }
        Commands::History { session } => {
            show_history(&config_dir, &session)?;
        }
        Commands::Clear { session } => {
            clear_chat(&config_dir, &session)?;
        }
        Commands::Check { api_key } => {
            check_credentials(&config_dir, api_key).await?;
        }
    }

    Ok(())
}
