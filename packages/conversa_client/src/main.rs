use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::prelude::*;

use conversa_client::ClientConfig;

mod cli;

#[derive(Parser)]
#[command(name = "conversa")]
#[command(about = "Terminal client for one-to-one real-time chat")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Custom data directory (defaults to ~/.conversa)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and store the session token
    Login(LoginArgs),

    /// Forget the stored session
    Logout,

    /// List other users
    Users(ListArgs),

    /// List your conversations
    Conversations(ListArgs),

    /// Open an interactive conversation with a user
    Chat(ChatArgs),

    /// Follow the unread message counter
    Notifications,
}

#[derive(Parser)]
struct LoginArgs {
    username: String,

    /// Password (read from stdin when omitted)
    #[arg(long)]
    password: Option<String>,
}

#[derive(Parser)]
struct ListArgs {
    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Parser)]
struct ChatArgs {
    /// Username of the other participant
    username: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so they don't interleave with chat output on stdout
    let default_directive = if cli.debug {
        "conversa=debug,conversa_client=debug,info"
    } else {
        "conversa=info,conversa_client=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let config = ClientConfig::new(cli.data_dir)?;

    match cli.command {
        Commands::Login(args) => cli::login_command(config, &args.username, args.password).await,
        Commands::Logout => cli::logout_command(config).await,
        Commands::Users(args) => cli::users_command(config, args.json).await,
        Commands::Conversations(args) => cli::conversations_command(config, args.json).await,
        Commands::Chat(args) => cli::chat_command(config, &args.username).await,
        Commands::Notifications => cli::notifications_command(config).await,
    }
}
