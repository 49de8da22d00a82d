use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::DomContext;

/// One observation of a tracer string resurfacing in rendered output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TracerEvent {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub tracer_id: i64,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub dom_contexts: Vec<DomContext>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// One browser-side observation and every tracer string found alongside it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TracerEventBulk {
    pub tracer_event: TracerEvent,
    #[serde(default)]
    pub tracer_strings: Vec<String>,
}
