use std::path::Path;

use bytes::Bytes;
use futures::SinkExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::codec::{FramedWrite, LengthDelimitedCodec};
use tracy_core::FeedFrame;

use crate::subsystems::notifier::BroadcastNotifier;

/// Serve the live subscriber feed on a Unix socket until `shutdown` fires.
///
/// Each connection gets a hello frame and then one frame per accepted mutation.
pub async fn run_feed_server(
    socket_path: &str,
    notifier: BroadcastNotifier,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    if Path::new(socket_path).exists() {
        std::fs::remove_file(socket_path)?;
    }

    let listener = UnixListener::bind(socket_path)?;
    tracing::info!("Subscriber feed listening on {}", socket_path);

    loop {
        tokio::select! {
            res = listener.accept() => {
                let (stream, _) = res?;
                // Subscribe before the hello frame so nothing accepted after it is missed
                let updates = notifier.subscribe();
                tokio::spawn(serve_subscriber(stream, updates));
            }
            _ = shutdown.recv() => {
                tracing::info!("Shutting down subscriber feed...");
                break;
            }
        }
    }

    if Path::new(socket_path).exists() {
        std::fs::remove_file(socket_path)?;
    }

    Ok(())
}

async fn serve_subscriber(
    stream: UnixStream,
    mut updates: broadcast::Receiver<tracy_core::SubscriberUpdate>,
) {
    // 4-byte Little Endian length prefix + MessagePack payload
    let codec = LengthDelimitedCodec::builder().little_endian().new_codec();
    let mut framed_write = FramedWrite::new(stream, codec);

    if send_frame(&mut framed_write, &FeedFrame::hello()).await.is_err() {
        return;
    }
    tracing::debug!("Subscriber connected");

    loop {
        let frame = match updates.recv().await {
            Ok(update) => FeedFrame::Update { update },
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Subscriber lagged behind");
                FeedFrame::Lagged { skipped }
            }
            Err(RecvError::Closed) => break,
        };

        if send_frame(&mut framed_write, &frame).await.is_err() {
            break;
        }
    }

    tracing::debug!("Subscriber disconnected");
}

async fn send_frame(
    framed_write: &mut FramedWrite<UnixStream, LengthDelimitedCodec>,
    frame: &FeedFrame,
) -> Result<(), ()> {
    let bytes = match frame.encode() {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!("Failed to serialize feed frame: {}", e);
            return Err(());
        }
    };

    if let Err(e) = framed_write.send(Bytes::from(bytes)).await {
        tracing::debug!("Failed to send feed frame: {}", e);
        return Err(());
    }
    Ok(())
}
