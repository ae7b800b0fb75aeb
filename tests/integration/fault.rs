use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

// ── CuttingProxy ─────────────────────────────────────────────────────────────

/// TCP forwarder that severs connections on a script.
///
/// Connection N forwards at most `budgets[N]` bytes from the client to the
/// upstream, then closes both sides. Once the script is used up every
/// connection is passed through untouched. The relay task is aborted when
/// the proxy is dropped, so a panicking test does not leak it.
pub struct CuttingProxy {
    addr: SocketAddr,
    cuts: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl CuttingProxy {
    pub async fn start(upstream: SocketAddr, budgets: Vec<u64>) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let cuts = Arc::new(AtomicUsize::new(0));
        let script = Arc::new(Mutex::new(budgets.into_iter()));

        let task = {
            let cuts = cuts.clone();
            tokio::spawn(async move {
                while let Ok((client, _)) = listener.accept().await {
                    let budget = script.lock().unwrap().next();
                    let cuts = cuts.clone();
                    tokio::spawn(async move {
                        if let Err(e) = relay(client, upstream, budget, cuts).await {
                            eprintln!("proxy relay ended: {e}");
                        }
                    });
                }
            })
        };

        Ok(Self { addr, cuts, task })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Connections severed so far.
    pub fn cuts(&self) -> usize {
        self.cuts.load(Ordering::SeqCst)
    }
}

impl Drop for CuttingProxy {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn relay(
    mut client: TcpStream,
    upstream: SocketAddr,
    budget: Option<u64>,
    cuts: Arc<AtomicUsize>,
) -> io::Result<()> {
    let mut server = TcpStream::connect(upstream).await?;

    let Some(budget) = budget else {
        tokio::io::copy_bidirectional(&mut client, &mut server).await?;
        return Ok(());
    };

    let (mut client_rd, mut client_wr) = client.split();
    let (mut server_rd, mut server_wr) = server.split();
    let mut limited = (&mut client_rd).take(budget);

    tokio::select! {
        forwarded = tokio::io::copy(&mut limited, &mut server_wr) => {
            if forwarded? == budget {
                cuts.fetch_add(1, Ordering::SeqCst);
            }
        }
        _ = tokio::io::copy(&mut server_rd, &mut client_wr) => {}
    }
    // Both streams drop here, closing each side.
    Ok(())
}
