use std::io::Cursor;
use std::time::Duration;

use tokio::net::TcpListener;

use retransmit_core::HEADER_LEN;

use crate::fault::CuttingProxy;
use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Clean path
// ══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_stream_crosses_loopback_intact() {
    let data = random_bytes(1 << 20, 1);
    let receiver = start_receiver(Duration::ZERO).await.unwrap();

    let sent = sender(receiver.addr, 16 * 1024)
        .unwrap()
        .run(Cursor::new(data.clone()))
        .await
        .unwrap();
    let (received, output) = receiver.finish().await.unwrap();

    assert_eq!(output, data);
    // 64 full frames, then the terminal frame.
    assert_eq!(sent.frames, 65);
    assert_eq!(sent.connections, 1);
    assert_eq!(sent.retransmissions, 0);
    assert_eq!(received.bytes, data.len() as u64);
}

#[tokio::test]
async fn test_empty_input_delivers_empty_output() {
    let receiver = start_receiver(Duration::ZERO).await.unwrap();

    let sent = sender(receiver.addr, 512)
        .unwrap()
        .run(tokio::io::empty())
        .await
        .unwrap();
    let (received, output) = receiver.finish().await.unwrap();

    assert!(output.is_empty());
    assert_eq!(sent.frames, 1);
    assert_eq!(received.frames, 1);
}

// ══════════════════════════════════════════════════════════════════════════════
//  Broken connections
// ══════════════════════════════════════════════════════════════════════════════

/// Cut connections mid-header, mid-payload, mid-ack and at zero bytes.
/// Output must match input byte for byte: no gaps, no duplicates.
#[tokio::test]
async fn test_stream_survives_repeated_cuts() {
    let frame_size = 4096;
    let wire_frame = (HEADER_LEN + frame_size) as u64;
    let data = random_bytes(300_000, 2);

    let budgets = vec![
        0,
        10,
        HEADER_LEN as u64 + 100,
        wire_frame,
        wire_frame * 3 + 17,
        1,
        wire_frame * 10,
        wire_frame * 2 - 1,
    ];
    let receiver = start_receiver(Duration::from_secs(1)).await.unwrap();
    let proxy = CuttingProxy::start(receiver.addr, budgets.clone())
        .await
        .unwrap();

    let sent = sender(proxy.addr(), frame_size)
        .unwrap()
        .run(Cursor::new(data.clone()))
        .await
        .unwrap();
    let (received, output) = receiver.finish().await.unwrap();

    assert_eq!(output.len(), data.len());
    assert!(output == data, "output differs from input");
    assert_eq!(proxy.cuts(), budgets.len());
    assert_eq!(sent.connections, budgets.len() as u64 + 1);
    assert!(sent.retransmissions >= 1);
    assert_eq!(received.bytes, data.len() as u64);
}

#[tokio::test]
async fn test_sender_waits_for_late_receiver() {
    // Reserve a port, then free it so the first dials are refused.
    let addr = {
        let spare = TcpListener::bind("127.0.0.1:0").await.unwrap();
        spare.local_addr().unwrap()
    };
    let data = random_bytes(20_000, 3);

    let send = {
        let data = data.clone();
        tokio::spawn(async move { sender(addr, 1000).unwrap().run(Cursor::new(data)).await })
    };

    tokio::time::sleep(Duration::from_millis(300)).await;
    let listener = TcpListener::bind(addr).await.unwrap();
    let receiver = serve(listener, Duration::ZERO).unwrap();

    let sent = send.await.unwrap().unwrap();
    let (_, output) = receiver.finish().await.unwrap();

    assert_eq!(output, data);
    assert_eq!(sent.connections, 1);
}
