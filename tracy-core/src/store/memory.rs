use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::TracerStore;
use crate::error::StoreError;
use crate::models::{Request, Tracer, TracerEdit, TracerEvent};

/// In-process [`TracerStore`] with the same uniqueness rules as the Postgres
/// schema. Used by the test suites and for running the server without a
/// database.
///
/// Counts session lookups so callers can assert how often the cache went to the
/// store, and can be switched into a failing mode.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    session_queries: AtomicUsize,
    unavailable: AtomicBool,
}

#[derive(Debug, Default)]
struct MemoryState {
    requests: Vec<Request>,
    events: Vec<TracerEvent>,
    next_request_id: i64,
    next_tracer_id: i64,
    next_event_id: i64,
    next_context_id: i64,
}

impl MemoryState {
    fn tracers(&self) -> impl Iterator<Item = &Tracer> {
        self.requests.iter().flat_map(|r| r.tracers.iter())
    }

    fn tracer_mut(&mut self, id: i64) -> Option<&mut Tracer> {
        self.requests
            .iter_mut()
            .flat_map(|r| r.tracers.iter_mut())
            .find(|t| t.id == id)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `get_requests_by_uuid` calls served so far.
    pub fn session_queries(&self) -> usize {
        self.session_queries.load(Ordering::SeqCst)
    }

    /// Make every subsequent call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store switched off".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TracerStore for MemoryStore {
    async fn create_request(&self, mut request: Request) -> Result<Request, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;

        for (i, tracer) in request.tracers.iter().enumerate() {
            let duplicate = state
                .tracers()
                .chain(request.tracers[..i].iter())
                .any(|t| t.tracer_string == tracer.tracer_string);
            if duplicate {
                return Err(StoreError::Conflict(format!(
                    "duplicate tracer string {}",
                    tracer.tracer_string
                )));
            }
        }

        state.next_request_id += 1;
        let now = Utc::now();
        request.id = state.next_request_id;
        request.created_at = Some(now);
        for tracer in request.tracers.iter_mut() {
            state.next_tracer_id += 1;
            tracer.id = state.next_tracer_id;
            tracer.request_id = request.id;
            tracer.uuid = request.uuid.clone();
            tracer.created_at = Some(now);
        }

        state.requests.push(request.clone());
        Ok(request)
    }

    async fn create_event(
        &self,
        tracer_id: i64,
        mut event: TracerEvent,
    ) -> Result<TracerEvent, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;

        if !state.tracers().any(|t| t.id == tracer_id) {
            return Err(StoreError::NotFound(format!("tracer {}", tracer_id)));
        }

        let duplicate = state.events.iter().any(|e| {
            e.tracer_id == tracer_id
                && e.data == event.data
                && e.location == event.location
                && e.event_type == event.event_type
        });
        if duplicate {
            return Err(StoreError::Conflict(format!(
                "duplicate event for tracer {}",
                tracer_id
            )));
        }

        state.next_event_id += 1;
        event.id = state.next_event_id;
        event.tracer_id = tracer_id;
        event.created_at = Some(Utc::now());
        for ctx in event.dom_contexts.iter_mut() {
            state.next_context_id += 1;
            ctx.id = state.next_context_id;
            ctx.tracer_event_id = event.id;
        }

        state.events.push(event.clone());
        Ok(event)
    }

    async fn get_requests_by_uuid(&self, uuid: &str) -> Result<Vec<Request>, StoreError> {
        self.session_queries.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state
            .requests
            .iter()
            .filter(|r| r.uuid == uuid)
            .cloned()
            .collect())
    }

    async fn get_tracer(&self, id: i64) -> Result<Tracer, StoreError> {
        self.check_available()?;
        let state = self.state.lock().await;
        let result = state
            .tracers()
            .find(|t| t.id == id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("tracer {}", id)));
        result
    }

    async fn get_tracer_id_by_string(&self, tracer_string: &str) -> Result<i64, StoreError> {
        self.check_available()?;
        let state = self.state.lock().await;
        let result = state
            .tracers()
            .find(|t| t.tracer_string == tracer_string)
            .map(|t| t.id)
            .ok_or_else(|| StoreError::NotFound(format!("tracer string {}", tracer_string)));
        result
    }

    async fn update_tracer(
        &self,
        id: i64,
        uuid: &str,
        edit: &TracerEdit,
    ) -> Result<Tracer, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let tracer = state
            .tracer_mut(id)
            .filter(|t| t.uuid == uuid)
            .ok_or_else(|| StoreError::NotFound(format!("tracer {} in session {}", id, uuid)))?;

        if let Some(screenshot) = &edit.screenshot {
            tracer.screenshot = Some(screenshot.clone());
        }
        Ok(tracer.clone())
    }

    async fn get_events(&self, tracer_id: i64) -> Result<Vec<TracerEvent>, StoreError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state
            .events
            .iter()
            .filter(|e| e.tracer_id == tracer_id)
            .cloned()
            .collect())
    }
}
