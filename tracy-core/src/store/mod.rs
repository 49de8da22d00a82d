//! Durable persistence for requests, tracers, events and DOM contexts.
//!
//! Every call is self-contained; the only cross-call consistency mechanism is
//! create-or-conflict on the unique keys (tracer string, event observation).

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{Request, Tracer, TracerEdit, TracerEvent};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait TracerStore: Send + Sync {
    /// Persist a request together with its tracers. Returns the stored copy
    /// with ids, parent references and timestamps filled in.
    async fn create_request(&self, request: Request) -> Result<Request, StoreError>;

    /// Persist an event (and its DOM contexts) against `tracer_id`.
    /// Fails with [`StoreError::Conflict`] on a duplicate observation.
    async fn create_event(
        &self,
        tracer_id: i64,
        event: TracerEvent,
    ) -> Result<TracerEvent, StoreError>;

    /// All requests of a session in insertion order, tracers included.
    async fn get_requests_by_uuid(&self, uuid: &str) -> Result<Vec<Request>, StoreError>;

    async fn get_tracer(&self, id: i64) -> Result<Tracer, StoreError>;

    async fn get_tracer_id_by_string(&self, tracer_string: &str) -> Result<i64, StoreError>;

    /// Apply `edit` to tracer `id` when it belongs to session `uuid`.
    async fn update_tracer(
        &self,
        id: i64,
        uuid: &str,
        edit: &TracerEdit,
    ) -> Result<Tracer, StoreError>;

    async fn get_events(&self, tracer_id: i64) -> Result<Vec<TracerEvent>, StoreError>;
}
