use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Tracer;

/// One captured browser session request and the tracers planted in it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Zero until the row has been persisted.
    #[serde(default)]
    pub id: i64,
    pub uuid: String,
    #[serde(default)]
    pub raw_request: String,
    #[serde(default)]
    pub request_method: String,
    #[serde(default)]
    pub tracers: Vec<Tracer>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Request {
    /// Build the descriptor used to patch one cached tracer in place.
    ///
    /// The single tracer has no parent request, which is what tells the cache
    /// this is not a freshly persisted row.
    pub fn tracer_patch(tracer_id: i64, uuid: &str, screenshot: Option<String>) -> Self {
        Self {
            uuid: uuid.to_string(),
            tracers: vec![Tracer {
                id: tracer_id,
                request_id: 0,
                uuid: uuid.to_string(),
                screenshot,
                ..Tracer::default()
            }],
            ..Self::default()
        }
    }

    /// The patched tracer when this request is a patch descriptor.
    pub fn as_tracer_patch(&self) -> Option<&Tracer> {
        match self.tracers.as_slice() {
            [only] if only.request_id == 0 => Some(only),
            _ => None,
        }
    }

    /// Cap `raw_request` at `max` bytes, cutting on a character boundary.
    ///
    /// Returns true when the payload was shortened.
    pub fn truncate_raw_request(&mut self, max: usize) -> bool {
        if self.raw_request.len() <= max {
            return false;
        }
        let mut end = max;
        while !self.raw_request.is_char_boundary(end) {
            end -= 1;
        }
        self.raw_request.truncate(end);
        true
    }
}
