//! chunkup command-line uploader entry point.

mod app;
mod config;
mod server_adapter;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Resumable chunked file uploads.
#[derive(Debug, Parser)]
#[command(name = "chunkup", version, about)]
struct Cli {
    /// Configuration file (defaults to the platform config directory).
    #[arg(long, global = true, env = "CHUNKUP_CONFIG")]
    config: Option<PathBuf>,

    /// Upload server WebSocket URL.
    #[arg(long, global = true, env = "CHUNKUP_SERVER")]
    server: Option<String>,

    /// Chunk size in bytes for new uploads.
    #[arg(long, global = true)]
    chunk_size: Option<u64>,

    /// Maximum chunks in flight.
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    /// Fail instead of discarding an interrupted upload of a different file.
    #[arg(long, global = true)]
    strict: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Upload a file, resuming an interrupted upload of it if there is one.
    Upload {
        file: PathBuf,
        /// Resume without asking.
        #[arg(short, long)]
        yes: bool,
    },
    /// Show the interrupted upload, if any.
    Status,
    /// Forget the interrupted upload.
    Discard,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = config::Config::load(cli.config.as_deref())?;
    if let Some(server) = cli.server {
        config.server_url = server;
    }
    if let Some(chunk_size) = cli.chunk_size {
        config.chunk_size = chunk_size;
    }
    if let Some(concurrency) = cli.concurrency {
        config.concurrency = concurrency;
    }
    config.strict_resume |= cli.strict;
    tracing::debug!(server = %config.server_url, state = %config.state_file().display(), "configuration loaded");

    let rt = tokio::runtime::Runtime::new()?;
    match cli.command {
        Command::Upload { file, yes } => rt.block_on(app::upload(&config, &file, yes)),
        Command::Status => app::status(&config),
        Command::Discard => app::discard(&config),
    }
}
