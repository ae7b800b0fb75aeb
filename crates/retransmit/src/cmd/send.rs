//! `retransmit send`: stdin to a remote receiver.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;

use retransmit_core::config::RetransmitConfig;
use retransmit_engine::{FixedBackoff, SenderEngine, TcpDialer};

#[derive(Args)]
pub struct SendArgs {
    /// Receiver address, host:port
    pub destination: String,

    /// Payload bytes per frame
    #[arg(long)]
    pub frame_size: Option<usize>,

    /// Seconds allowed for each dial, frame write and ack read
    #[arg(long)]
    pub timeout: Option<u64>,
}

pub async fn run(mut config: RetransmitConfig, args: SendArgs) -> Result<()> {
    if let Some(frame_size) = args.frame_size {
        config.send.frame_size = frame_size;
    }
    if let Some(timeout) = args.timeout {
        config.link.timeout_secs = timeout;
    }
    config.validate()?;

    let engine = SenderEngine::new(
        TcpDialer::new(args.destination.as_str()),
        config.send.frame_size,
        config.timeout(),
    )?
    .queue_depth(config.send.queue_depth)
    .backoff(Arc::new(FixedBackoff(config.backoff())));

    tracing::info!(
        destination = %args.destination,
        frame_size = config.send.frame_size,
        timeout = ?config.timeout(),
        "sending stdin"
    );

    let summary = tokio::select! {
        r = engine.run(tokio::io::stdin()) => r.context("send failed")?,
        _ = tokio::signal::ctrl_c() => anyhow::bail!("interrupted before the receiver acknowledged the end of stream"),
    };

    tracing::info!(
        frames = summary.frames,
        bytes = summary.bytes,
        connections = summary.connections,
        retransmissions = summary.retransmissions,
        "all frames acknowledged"
    );
    Ok(())
}
