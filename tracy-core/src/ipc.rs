//! Frames pushed to live subscribers over the Unix socket feed.
//!
//! Wire format: 4-byte little-endian length prefix followed by a MessagePack
//! payload with named fields.

use serde::{Deserialize, Serialize};

use crate::models::{Request, TracerEvent};

pub const FEED_PROTOCOL: &str = "tracy-feed/1";

/// An accepted mutation, published after it has been written to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubscriberUpdate {
    /// A new request, or a tracer patch descriptor for an existing one.
    Request { uuid: String, request: Request },
    Event { tracer_id: i64, event: TracerEvent },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum FeedFrame {
    Hello { protocol: String },
    Update { update: SubscriberUpdate },
    /// The subscriber fell behind and `skipped` updates were dropped for it.
    Lagged { skipped: u64 },
}

impl FeedFrame {
    pub fn hello() -> Self {
        FeedFrame::Hello {
            protocol: FEED_PROTOCOL.to_string(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec_named(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}
