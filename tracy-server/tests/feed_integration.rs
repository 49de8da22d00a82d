//! Subscriber feed over a real Unix socket.

use std::path::PathBuf;
use std::time::Duration;

use futures::StreamExt;
use tokio::net::UnixStream;
use tokio::sync::broadcast;
use tokio_util::codec::{FramedRead, LengthDelimitedCodec};
use tracy_core::ipc::FEED_PROTOCOL;
use tracy_core::{FeedFrame, SubscriberUpdate, TracerEvent};
use tracy_server::server::run_feed_server;
use tracy_server::{BroadcastNotifier, SubscriberNotifier};

fn socket_path() -> PathBuf {
    std::env::temp_dir().join(format!("tracy-feed-{}.sock", uuid::Uuid::new_v4()))
}

async fn connect(path: &PathBuf) -> UnixStream {
    for _ in 0..50 {
        if let Ok(stream) = UnixStream::connect(path).await {
            return stream;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("feed socket never came up at {}", path.display());
}

async fn next_frame(framed: &mut FramedRead<UnixStream, LengthDelimitedCodec>) -> FeedFrame {
    let bytes = tokio::time::timeout(Duration::from_secs(2), framed.next())
        .await
        .expect("timed out waiting for frame")
        .expect("stream ended")
        .expect("read error");
    FeedFrame::decode(&bytes).unwrap()
}

// ===========================================================================
// TEST 1: hello first, then every notified update, then clean shutdown
// ===========================================================================
#[tokio::test]
async fn test_subscriber_receives_hello_then_updates() {
    let path = socket_path();
    let notifier = BroadcastNotifier::new(16);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let server = {
        let path = path.to_string_lossy().to_string();
        let notifier = notifier.clone();
        tokio::spawn(async move { run_feed_server(&path, notifier, shutdown_rx).await })
    };

    let stream = connect(&path).await;
    let codec = LengthDelimitedCodec::builder().little_endian().new_codec();
    let mut framed = FramedRead::new(stream, codec);

    match next_frame(&mut framed).await {
        FeedFrame::Hello { protocol } => assert_eq!(protocol, FEED_PROTOCOL),
        other => panic!("expected hello, got {:?}", other),
    }

    let update = SubscriberUpdate::Event {
        tracer_id: 7,
        event: TracerEvent {
            tracer_id: 7,
            data: "<img>".to_string(),
            location: "/home".to_string(),
            event_type: "mutation".to_string(),
            ..TracerEvent::default()
        },
    };
    notifier.notify(&update);

    match next_frame(&mut framed).await {
        FeedFrame::Update { update: got } => assert_eq!(got, update),
        other => panic!("expected update, got {:?}", other),
    }

    shutdown_tx.send(()).unwrap();
    server.await.unwrap().unwrap();
    assert!(!path.exists(), "socket file should be removed on shutdown");
}

// ===========================================================================
// TEST 2: a stale socket file does not block startup
// ===========================================================================
#[tokio::test]
async fn test_stale_socket_is_replaced() {
    let path = socket_path();
    std::fs::write(&path, b"stale").unwrap();

    let notifier = BroadcastNotifier::new(4);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let server = {
        let path = path.to_string_lossy().to_string();
        tokio::spawn(async move { run_feed_server(&path, notifier, shutdown_rx).await })
    };

    let stream = connect(&path).await;
    let codec = LengthDelimitedCodec::builder().little_endian().new_codec();
    let mut framed = FramedRead::new(stream, codec);
    assert!(matches!(next_frame(&mut framed).await, FeedFrame::Hello { .. }));

    shutdown_tx.send(()).unwrap();
    server.await.unwrap().unwrap();
}
