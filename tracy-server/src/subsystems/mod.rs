pub mod cache;
pub mod correlator;
pub mod notifier;
