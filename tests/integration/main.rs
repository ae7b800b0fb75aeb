//! retransmit integration test harness.
//!
//! Tests here run both engines over real loopback TCP, optionally through
//! a proxy that severs connections after scripted byte counts:
//!
//!   cargo test --test integration
//!
//! Every test binds its own ephemeral ports, so tests can run in parallel.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rand::{Rng, SeedableRng};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use retransmit_engine::memory::Capture;
use retransmit_engine::{
    FixedBackoff, ReceiveError, ReceiveSummary, ReceiverEngine, SenderEngine, TcpDialer,
};

mod config;
mod fault;
mod transfer;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Retry pause used by both engines. Short, so cut-heavy tests stay fast.
pub const BACKOFF: Duration = Duration::from_millis(20);

/// Deterministic pseudo-random payload.
pub fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen()).collect()
}

/// A receiver serving one stream on an ephemeral loopback port.
pub struct RunningReceiver {
    pub addr: SocketAddr,
    pub output: Capture,
    pub task: JoinHandle<Result<ReceiveSummary, ReceiveError>>,
}

impl RunningReceiver {
    pub async fn finish(self) -> Result<(ReceiveSummary, Vec<u8>)> {
        let summary = tokio::time::timeout(Duration::from_secs(30), self.task)
            .await
            .context("receiver did not finish")??
            .context("receiver failed")?;
        Ok((summary, self.output.contents()))
    }
}

pub async fn start_receiver(linger: Duration) -> Result<RunningReceiver> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .context("failed to bind receiver")?;
    serve(listener, linger)
}

pub fn serve(listener: TcpListener, linger: Duration) -> Result<RunningReceiver> {
    let addr = listener.local_addr()?;
    let output = Capture::new();
    let engine = ReceiverEngine::new(TIMEOUT)
        .linger(linger)
        .backoff(Arc::new(FixedBackoff(BACKOFF)));
    let task = tokio::spawn(engine.run(listener, output.clone()));
    Ok(RunningReceiver { addr, output, task })
}

pub fn sender(addr: SocketAddr, frame_size: usize) -> Result<SenderEngine<TcpDialer>> {
    let engine = SenderEngine::new(TcpDialer::new(addr.to_string()), frame_size, TIMEOUT)?
        .backoff(Arc::new(FixedBackoff(BACKOFF)));
    Ok(engine)
}
