//! retransmit: move a byte stream across a TCP path that keeps breaking.
//!
//!   producer | retransmit send host:port
//!   retransmit recv 0.0.0.0:port > output
//!
//! Logs go to stderr; stdout belongs to `recv`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use retransmit_core::config::RetransmitConfig;

mod cmd;

#[derive(Parser)]
#[command(name = "retransmit", version, about = "Resumable stop-and-wait stream transfer over TCP")]
struct Cli {
    /// Config file [default: $RETRANSMIT_CONFIG, else ~/.config/retransmit/config.toml]
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Read stdin and deliver it to a receiver, reconnecting as needed.
    Send(cmd::send::SendArgs),
    /// Accept a sender and write the stream to stdout.
    Recv(cmd::recv::RecvArgs),
    /// Write the default config file if there is none.
    InitConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let path = cli.config.unwrap_or_else(RetransmitConfig::file_path);

    match cli.command {
        Command::InitConfig => {
            RetransmitConfig::write_default_if_missing(&path)
                .with_context(|| format!("failed to initialise {}", path.display()))?;
            tracing::info!(path = %path.display(), "config ready");
            Ok(())
        }
        Command::Send(args) => cmd::send::run(load(&path)?, args).await,
        Command::Recv(args) => cmd::recv::run(load(&path)?, args).await,
    }
}

fn load(path: &Path) -> Result<RetransmitConfig> {
    RetransmitConfig::load_from(path)
        .with_context(|| format!("failed to load config from {}", path.display()))
}
