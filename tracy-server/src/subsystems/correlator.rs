//! Event correlator: validates observations and ties them back to tracers
//!
//! Every accepted mutation is written to the store first, then pushed into the
//! tracer cache, then handed to the subscriber notifier, all inside the
//! accepting call.

use std::sync::Arc;

use bytes::Bytes;
use serde_json::{json, Value};
use thiserror::Error;
use tracy_core::{
    Request, StoreError, SubscriberUpdate, TracerEdit, TracerEvent, TracerEventBulk, TracerStore,
};

use super::cache::{CacheError, TracerCache};
use super::notifier::SubscriberNotifier;

pub const EMPTY_DATA: &str = "The data field for the event was empty.";
pub const EMPTY_LOCATION: &str = "The location field for the event was empty.";
pub const EMPTY_EVENT_TYPE: &str = "The event type field for the event was empty.";

#[derive(Error, Debug)]
pub enum CorrelateError {
    #[error("{0}")]
    Validation(&'static str),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CorrelateError {
    pub fn event_status(&self) -> EventStatus {
        match self {
            CorrelateError::Store(e) if e.is_conflict() => EventStatus::Conflict,
            _ => EventStatus::Failure,
        }
    }
}

/// Outcome of event ingestion, ranked `Success < Conflict < Failure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventStatus {
    Success,
    Conflict,
    Failure,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Success => "success",
            EventStatus::Conflict => "conflict",
            EventStatus::Failure => "error",
        }
    }
}

/// Aggregate of one bulk ingestion call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkOutcome {
    Success { count: usize },
    Conflict { count: usize, message: String },
    Failure { count: usize, message: String },
}

impl BulkOutcome {
    /// Fold per-pair results. Any failure wins over any conflict, and the
    /// message kept is the last one of the winning kind.
    pub fn from_results<I>(results: I) -> Self
    where
        I: IntoIterator<Item = Result<(), CorrelateError>>,
    {
        let mut count = 0;
        let mut last_conflict = None;
        let mut last_failure = None;

        for result in results {
            match result {
                Ok(()) => count += 1,
                Err(e) => match e.event_status() {
                    EventStatus::Conflict => last_conflict = Some(e.to_string()),
                    _ => last_failure = Some(e.to_string()),
                },
            }
        }

        match (last_failure, last_conflict) {
            (Some(message), _) => BulkOutcome::Failure { count, message },
            (None, Some(message)) => BulkOutcome::Conflict { count, message },
            (None, None) => BulkOutcome::Success { count },
        }
    }

    pub fn status(&self) -> EventStatus {
        match self {
            BulkOutcome::Success { .. } => EventStatus::Success,
            BulkOutcome::Conflict { .. } => EventStatus::Conflict,
            BulkOutcome::Failure { .. } => EventStatus::Failure,
        }
    }

    pub fn into_response(self) -> (EventStatus, Value) {
        let status = self.status();
        let body = match self {
            BulkOutcome::Success { count } => json!({
                "status": status.as_str(),
                "count": count,
            }),
            BulkOutcome::Conflict { count, message } | BulkOutcome::Failure { count, message } => {
                json!({
                    "status": status.as_str(),
                    "error": message,
                    "count": count,
                })
            }
        };
        (status, body)
    }
}

/// Reject an event missing data, location or event type, checked in that order.
pub fn validate_event(event: &TracerEvent) -> Result<(), CorrelateError> {
    if event.data.is_empty() {
        return Err(CorrelateError::Validation(EMPTY_DATA));
    }
    if event.location.is_empty() {
        return Err(CorrelateError::Validation(EMPTY_LOCATION));
    }
    if event.event_type.is_empty() {
        return Err(CorrelateError::Validation(EMPTY_EVENT_TYPE));
    }
    Ok(())
}

#[derive(Clone)]
pub struct EventCorrelator {
    store: Arc<dyn TracerStore>,
    cache: TracerCache,
    notifier: Arc<dyn SubscriberNotifier>,
    max_request_size: usize,
}

impl EventCorrelator {
    pub fn new(
        store: Arc<dyn TracerStore>,
        cache: TracerCache,
        notifier: Arc<dyn SubscriberNotifier>,
        max_request_size: usize,
    ) -> Self {
        Self {
            store,
            cache,
            notifier,
            max_request_size,
        }
    }

    pub fn cache(&self) -> &TracerCache {
        &self.cache
    }

    // ------------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------------

    /// Record one observation against `tracer_id`.
    pub async fn add_event(&self, tracer_id: i64, event: TracerEvent) -> (EventStatus, Value) {
        match self.record_event(tracer_id, event).await {
            Ok(stored) => match serde_json::to_value(&stored) {
                Ok(body) => (EventStatus::Success, body),
                Err(e) => {
                    tracing::warn!(tracer_id, error = %e, "Failed to encode stored event");
                    (EventStatus::Success, json!({}))
                }
            },
            Err(e) => {
                let status = e.event_status();
                (
                    status,
                    json!({
                        "status": status.as_str(),
                        "error": e.to_string(),
                    }),
                )
            }
        }
    }

    /// Record each observation against every tracer string found with it.
    ///
    /// Strings that do not resolve to a tracer are skipped.
    pub async fn add_events(&self, batch: Vec<TracerEventBulk>) -> (EventStatus, Value) {
        let mut results = Vec::new();

        for item in batch {
            for tracer_string in &item.tracer_strings {
                let tracer_id = match self.store.get_tracer_id_by_string(tracer_string).await {
                    Ok(id) => id,
                    Err(e) => {
                        tracing::warn!(
                            tracer_string = %tracer_string,
                            error = %e,
                            "Skipping unresolved tracer string"
                        );
                        continue;
                    }
                };

                let result = self
                    .record_event(tracer_id, item.tracer_event.clone())
                    .await
                    .map(|_| ());
                results.push(result);
            }
        }

        let outcome = BulkOutcome::from_results(results);
        tracing::info!(status = outcome.status().as_str(), "Bulk event ingestion finished");
        outcome.into_response()
    }

    async fn record_event(
        &self,
        tracer_id: i64,
        event: TracerEvent,
    ) -> Result<TracerEvent, CorrelateError> {
        if let Err(e) = validate_event(&event) {
            tracing::warn!(tracer_id, reason = %e, "Rejected tracer event");
            return Err(e);
        }

        let stored = match self.store.create_event(tracer_id, event).await {
            Ok(stored) => stored,
            Err(e) if e.is_conflict() => {
                tracing::info!(tracer_id, "Duplicate tracer event");
                return Err(e.into());
            }
            Err(e) => {
                tracing::error!(tracer_id, error = %e, "Failed to store tracer event");
                return Err(e.into());
            }
        };

        tracing::debug!(tracer_id, event_id = stored.id, "Stored tracer event");

        // The cached listing carries requests and tracers only, so an event has
        // nothing to patch there; subscribers still hear about it.
        self.notifier.notify(&SubscriberUpdate::Event {
            tracer_id,
            event: stored.clone(),
        });
        Ok(stored)
    }

    pub async fn get_events(&self, tracer_id: i64) -> Result<Bytes, CorrelateError> {
        let events = self.store.get_events(tracer_id).await?;
        Ok(serde_json::to_vec(&events)?.into())
    }

    // ------------------------------------------------------------------------
    // Tracers
    // ------------------------------------------------------------------------

    /// Persist a captured request with its tracers.
    pub async fn add_tracer(&self, mut request: Request) -> Result<Bytes, CorrelateError> {
        if request.truncate_raw_request(self.max_request_size) {
            tracing::debug!(
                uuid = %request.uuid,
                max = self.max_request_size,
                "Truncated raw request"
            );
        }

        let stored = self.store.create_request(request).await.map_err(|e| {
            tracing::warn!(error = %e, "Failed to store request");
            e
        })?;

        let uuid = stored.uuid.clone();
        self.push_to_cache(&uuid, stored.clone()).await;
        self.notifier.notify(&SubscriberUpdate::Request {
            uuid,
            request: stored.clone(),
        });

        Ok(serde_json::to_vec(&stored)?.into())
    }

    pub async fn get_tracer(&self, id: i64) -> Result<Bytes, CorrelateError> {
        let tracer = self.store.get_tracer(id).await?;
        Ok(serde_json::to_vec(&tracer)?.into())
    }

    /// Every request of session `uuid`, served from the cache.
    pub async fn get_tracers(&self, uuid: &str) -> Result<Bytes, CorrelateError> {
        Ok(self.cache.read_json(uuid).await?)
    }

    pub async fn edit_tracer(&self, edit: TracerEdit, id: i64) -> Result<Bytes, CorrelateError> {
        let tracer = self
            .store
            .update_tracer(id, &edit.uuid, &edit)
            .await
            .map_err(|e| {
                tracing::warn!(tracer_id = id, error = %e, "Failed to update tracer");
                e
            })?;

        let patch = Request::tracer_patch(tracer.id, &tracer.uuid, tracer.screenshot.clone());
        self.push_to_cache(&tracer.uuid, patch.clone()).await;
        self.notifier.notify(&SubscriberUpdate::Request {
            uuid: tracer.uuid.clone(),
            request: patch,
        });

        Ok(serde_json::to_vec(&tracer)?.into())
    }

    pub async fn clear_cache(&self) -> Result<(), CorrelateError> {
        Ok(self.cache.clear().await?)
    }

    /// The write is already durable here, so a stopped cache is logged rather
    /// than reported as a failed write.
    async fn push_to_cache(&self, uuid: &str, request: Request) {
        if let Err(e) = self.cache.update(uuid, request).await {
            tracing::error!(uuid = %uuid, error = %e, "Failed to push mutation into tracer cache");
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn event(data: &str, location: &str, event_type: &str) -> TracerEvent {
        TracerEvent {
            data: data.to_string(),
            location: location.to_string(),
            event_type: event_type.to_string(),
            ..TracerEvent::default()
        }
    }

    fn conflict() -> Result<(), CorrelateError> {
        Err(StoreError::Conflict("duplicate".to_string()).into())
    }

    fn failure(msg: &str) -> Result<(), CorrelateError> {
        Err(StoreError::Unavailable(msg.to_string()).into())
    }

    // ========================================================================
    // TEST 1: missing data is reported first even when everything is missing
    // ========================================================================
    #[test]
    fn test_validation_reports_data_first() {
        let err = validate_event(&event("", "", "")).unwrap_err();
        assert_eq!(err.to_string(), EMPTY_DATA);
    }

    // ========================================================================
    // TEST 2: location checked before event type
    // ========================================================================
    #[test]
    fn test_validation_reports_location_before_event_type() {
        let err = validate_event(&event("<img>", "", "")).unwrap_err();
        assert_eq!(err.to_string(), EMPTY_LOCATION);

        let err = validate_event(&event("<img>", "/home", "")).unwrap_err();
        assert_eq!(err.to_string(), EMPTY_EVENT_TYPE);

        assert!(validate_event(&event("<img>", "/home", "mutation")).is_ok());
    }

    // ========================================================================
    // TEST 3: validation failure maps to Failure, conflict to Conflict
    // ========================================================================
    #[test]
    fn test_error_status_classification() {
        assert_eq!(
            CorrelateError::Validation(EMPTY_DATA).event_status(),
            EventStatus::Failure
        );
        assert_eq!(conflict().unwrap_err().event_status(), EventStatus::Conflict);
        assert_eq!(failure("x").unwrap_err().event_status(), EventStatus::Failure);
    }

    // ========================================================================
    // TEST 4: one conflict, no failure -> Conflict with success count
    // ========================================================================
    #[test]
    fn test_bulk_conflict_without_failure() {
        let outcome = BulkOutcome::from_results(vec![Ok(()), conflict(), Ok(())]);
        assert_eq!(
            outcome,
            BulkOutcome::Conflict {
                count: 2,
                message: "Conflict: duplicate".to_string()
            }
        );
    }

    // ========================================================================
    // TEST 5: failure outranks conflict regardless of order
    // ========================================================================
    #[test]
    fn test_bulk_failure_outranks_conflict() {
        let before = BulkOutcome::from_results(vec![failure("first"), conflict()]);
        let after = BulkOutcome::from_results(vec![conflict(), failure("first")]);
        assert_eq!(before.status(), EventStatus::Failure);
        assert_eq!(after.status(), EventStatus::Failure);
        assert_eq!(before, after);
    }

    // ========================================================================
    // TEST 6: the last failure message is the one reported
    // ========================================================================
    #[test]
    fn test_bulk_keeps_last_failure_message() {
        let outcome = BulkOutcome::from_results(vec![failure("first"), Ok(()), failure("second")]);
        match outcome {
            BulkOutcome::Failure { count, message } => {
                assert_eq!(count, 1);
                assert!(message.contains("second"), "got {}", message);
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    // ========================================================================
    // TEST 7: empty batch is a success with zero count
    // ========================================================================
    #[test]
    fn test_bulk_empty_is_success() {
        let (status, body) = BulkOutcome::from_results(Vec::new()).into_response();
        assert_eq!(status, EventStatus::Success);
        assert_eq!(body["status"], "success");
        assert_eq!(body["count"], 0);
    }

    // ========================================================================
    // TEST 8: ranking order
    // ========================================================================
    #[test]
    fn test_status_ranking() {
        assert!(EventStatus::Failure > EventStatus::Conflict);
        assert!(EventStatus::Conflict > EventStatus::Success);
    }
}
