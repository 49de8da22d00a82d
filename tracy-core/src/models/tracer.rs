use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TracerEvent;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tracer {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub request_id: i64,
    #[serde(default)]
    pub uuid: String,
    /// The planted marker. Unique across the store.
    pub tracer_string: String,
    #[serde(default)]
    pub tracer_payload: String,
    #[serde(default)]
    pub screenshot: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tracer_events: Vec<TracerEvent>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Fields a client may change on an existing tracer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TracerEdit {
    /// Session the tracer must belong to for the edit to apply.
    pub uuid: String,
    #[serde(default)]
    pub screenshot: Option<String>,
}
