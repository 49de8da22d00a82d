pub mod http;
pub mod server;
pub mod subsystems;

pub use subsystems::cache::{CacheError, TracerCache};
pub use subsystems::correlator::{CorrelateError, EventCorrelator, EventStatus};
pub use subsystems::notifier::{BroadcastNotifier, SubscriberNotifier};
