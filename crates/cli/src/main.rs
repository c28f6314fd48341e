//! roundclaw CLI: the operator's view of the session workspace.
//!
//! Commands:
//! - `sessions` : List sessions on disk
//! - `history`  : Print a session's append-only log
//! - `context`  : Print a session's working context and its token estimate
//! - `compress` : Offload oversized tool results to the reference store
//! - `rebuild`  : Restore a session's context log from its append-only log
//! - `refs`     : List or print offloaded tool results
//! - `config`   : Show, validate or locate the configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use roundclaw_core::SessionKey;

mod commands;

#[derive(Parser)]
#[command(name = "roundclaw", about = "roundclaw: inspect and compact agent sessions", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use this config file instead of ~/.roundclaw/config.toml
    #[arg(short, long, global = true, env = "ROUNDCLAW_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List sessions in the workspace
    Sessions,

    /// Print the full append-only history of a session
    History {
        /// Session as `<channel>/<chat_id>`
        #[arg(value_parser = commands::parse_session)]
        session: SessionKey,

        /// Only show the last N entries
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Print raw log items as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Print the working context of a session
    Context {
        #[arg(value_parser = commands::parse_session)]
        session: SessionKey,
    },

    /// Offload the oldest oversized tool results of a session
    Compress {
        #[arg(value_parser = commands::parse_session)]
        session: SessionKey,

        /// How many tool results to offload (defaults to `context.compress_batch`)
        #[arg(long)]
        count: Option<usize>,
    },

    /// Discard the context log and rebuild it from the append-only log
    Rebuild {
        #[arg(value_parser = commands::parse_session)]
        session: SessionKey,
    },

    /// Inspect offloaded tool results
    Refs {
        #[command(subcommand)]
        action: RefsAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum RefsAction {
    /// List stored references
    List,
    /// Print the content behind a `@refs/<id>` pointer
    Show { reference: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Validate the configuration file
    Validate,
    /// Print the config file path
    Path,
    /// Print a default configuration
    Default,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Sessions => commands::session::list(config_path).await?,
        Commands::History { session, limit, json } => commands::session::history(config_path, &session, limit, json).await?,
        Commands::Context { session } => commands::session::context(config_path, &session).await?,
        Commands::Compress { session, count } => commands::session::compress(config_path, &session, count).await?,
        Commands::Rebuild { session } => commands::session::rebuild(config_path, &session).await?,
        Commands::Refs { action } => match action {
            RefsAction::List => commands::refs::list(config_path)?,
            RefsAction::Show { reference } => commands::refs::show(config_path, &reference)?,
        },
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show(config_path)?,
            ConfigAction::Validate => commands::config_cmd::validate(config_path)?,
            ConfigAction::Path => commands::config_cmd::path(config_path),
            ConfigAction::Default => print!("{}", roundclaw_config::AppConfig::default_toml()),
        },
    }

    Ok(())
}
