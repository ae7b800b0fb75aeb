//! `retransmit recv`: one stream from a listener to stdout.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tokio::net::TcpListener;

use retransmit_core::config::RetransmitConfig;
use retransmit_engine::{FixedBackoff, ReceiverEngine};

#[derive(Args)]
pub struct RecvArgs {
    /// Address to listen on, host:port
    pub listen: String,

    /// Seconds allowed for each frame read and ack write
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Milliseconds to keep answering reconnects after the stream ends
    #[arg(long)]
    pub linger_ms: Option<u64>,
}

pub async fn run(mut config: RetransmitConfig, args: RecvArgs) -> Result<()> {
    if let Some(timeout) = args.timeout {
        config.link.timeout_secs = timeout;
    }
    if args.linger_ms.is_some() {
        config.recv.linger_ms = args.linger_ms;
    }
    config.validate()?;

    let listener = TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    let engine = ReceiverEngine::new(config.timeout())
        .delivery_depth(config.recv.delivery_depth)
        .linger(config.linger())
        .backoff(Arc::new(FixedBackoff(config.backoff())));

    let summary = tokio::select! {
        r = engine.run(listener, tokio::io::stdout()) => r.context("receive failed")?,
        _ = tokio::signal::ctrl_c() => anyhow::bail!("interrupted before the end of stream"),
    };

    tracing::info!(frames = summary.frames, bytes = summary.bytes, "stream written");
    Ok(())
}
