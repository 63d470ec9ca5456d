use clap::{Parser, Subcommand};
use doc_chat::Result;
use doc_chat::commands::{
    add_documents, delete_session, expand_session_answer, list_sessions, query_session,
    show_status,
};
use doc_chat::config::{Config, run_interactive_config, show_config};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "doc-chat")]
#[command(about = "Index documents as page images and retrieve the pages relevant to a question")]
#[command(version)]
struct Cli {
    /// Data directory (defaults to ~/.doc-chat)
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure the encoder connection and retrieval settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Upload documents into a session and index them
    Add {
        /// Documents to upload
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Session to add to; a new session is created when omitted
        #[arg(long)]
        session: Option<String>,
    },
    /// Retrieve the pages most relevant to a question
    Query {
        /// The question
        text: String,
        /// Session to search
        #[arg(long)]
        session: String,
        /// Number of pages to retrieve
        #[arg(short, long)]
        k: Option<usize>,
    },
    /// Inline the text of cited sections into an answer
    Expand {
        /// Answer text citing "Section N"
        answer: String,
        /// Session whose uploads hold the sections
        #[arg(long)]
        session: String,
    },
    /// List all sessions
    List,
    /// Delete a session and everything stored for it
    Delete {
        /// Session ID to delete
        session: String,
    },
    /// Show encoder health and storage summary
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let base_dir = match cli.base_dir {
        Some(dir) => dir,
        None => Config::config_dir()?,
    };

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(&base_dir)?;
            } else {
                run_interactive_config(&base_dir)?;
            }
        }
        Commands::Add { files, session } => {
            let config = Config::load(&base_dir)?;
            add_documents(&config, &files, session).await?;
        }
        Commands::Query { text, session, k } => {
            let config = Config::load(&base_dir)?;
            query_session(&config, &session, &text, k).await?;
        }
        Commands::Expand { answer, session } => {
            let config = Config::load(&base_dir)?;
            expand_session_answer(&config, &session, &answer)?;
        }
        Commands::List => {
            let config = Config::load(&base_dir)?;
            list_sessions(&config).await?;
        }
        Commands::Delete { session } => {
            let config = Config::load(&base_dir)?;
            delete_session(&config, &session).await?;
        }
        Commands::Status => {
            let config = Config::load(&base_dir)?;
            show_status(&config).await?;
        }
    }

    Ok(())
}
