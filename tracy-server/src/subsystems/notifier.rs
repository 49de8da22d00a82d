//! Subscriber fan-out for accepted mutations.

use tokio::sync::broadcast;
use tracy_core::SubscriberUpdate;

/// Receives every accepted mutation exactly once, after it is durable.
///
/// Fire-and-forget: implementations must not block the caller.
pub trait SubscriberNotifier: Send + Sync {
    fn notify(&self, update: &SubscriberUpdate);
}

/// Broadcast fan-out feeding the Unix socket subscriber feed.
///
/// Slow subscribers lose the oldest updates once `capacity` is exceeded and
/// are told how many they missed.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<SubscriberUpdate>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SubscriberUpdate> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl SubscriberNotifier for BroadcastNotifier {
    fn notify(&self, update: &SubscriberUpdate) {
        match self.tx.send(update.clone()) {
            Ok(receivers) => tracing::trace!(receivers, "Notified subscribers"),
            Err(_) => tracing::trace!("No live subscribers"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracy_core::TracerEvent;

    fn event_update() -> SubscriberUpdate {
        SubscriberUpdate::Event {
            tracer_id: 1,
            event: TracerEvent::default(),
        }
    }

    #[tokio::test]
    async fn test_every_subscriber_receives_update() {
        let notifier = BroadcastNotifier::new(8);
        let mut a = notifier.subscribe();
        let mut b = notifier.subscribe();
        assert_eq!(notifier.subscriber_count(), 2);

        notifier.notify(&event_update());

        assert_eq!(a.recv().await.unwrap(), event_update());
        assert_eq!(b.recv().await.unwrap(), event_update());
    }

    #[test]
    fn test_notify_without_subscribers_is_harmless() {
        let notifier = BroadcastNotifier::new(8);
        notifier.notify(&event_update());
        assert_eq!(notifier.subscriber_count(), 0);
    }
}
