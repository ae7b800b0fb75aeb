use std::io::Cursor;
use std::sync::Arc;

use retransmit_core::config::RetransmitConfig;

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Config file → engines
// ══════════════════════════════════════════════════════════════════════════════

/// Settings from a config file reach both engines the way the binary
/// wires them.
#[tokio::test]
async fn test_engines_follow_config_file() {
    let dir = std::env::temp_dir().join(format!("retransmit-it-config-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("config.toml");
    std::fs::write(
        &path,
        "[link]\ntimeout_secs = 4\nbackoff_ms = 5\n\n[send]\nframe_size = 700\nqueue_depth = 2\n\n[recv]\ndelivery_depth = 3\nlinger_ms = 0\n",
    )
    .unwrap();

    let config = RetransmitConfig::load_from(&path).unwrap();
    config.validate().unwrap();
    let _ = std::fs::remove_dir_all(&dir);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let output = Capture::new();
    let receiver = ReceiverEngine::new(config.timeout())
        .delivery_depth(config.recv.delivery_depth)
        .linger(config.linger())
        .backoff(Arc::new(FixedBackoff(config.backoff())));
    let recv_task = tokio::spawn(receiver.run(listener, output.clone()));

    let data = random_bytes(7_000, 4);
    let sent = SenderEngine::new(
        TcpDialer::new(addr.to_string()),
        config.send.frame_size,
        config.timeout(),
    )
    .unwrap()
    .queue_depth(config.send.queue_depth)
    .backoff(Arc::new(FixedBackoff(config.backoff())))
    .run(Cursor::new(data.clone()))
    .await
    .unwrap();

    let received = recv_task.await.unwrap().unwrap();
    assert_eq!(output.contents(), data);
    // 7000 / 700 = 10 full frames, then the terminal frame.
    assert_eq!(sent.frames, 11);
    assert_eq!(received.frames, 11);
}

#[test]
fn test_missing_config_file_means_defaults() {
    let path = std::env::temp_dir().join("retransmit-it-does-not-exist").join("config.toml");
    let config = RetransmitConfig::load_from(&path).unwrap();
    assert_eq!(config.send.frame_size, 64 * 1024);
    assert_eq!(config.recv.linger_ms, None);
    assert_eq!(config.linger(), config.timeout() * 3 + config.backoff());
}
