use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::TracerStore;
use crate::error::StoreError;
use crate::models::{DomContext, HtmlLocationType, Request, Tracer, TracerEdit, TracerEvent};

/// [`TracerStore`] backed by Postgres.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(sqlx::FromRow)]
struct RequestRow {
    id: i64,
    uuid: String,
    raw_request: String,
    request_method: String,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct TracerRow {
    id: i64,
    request_id: i64,
    uuid: String,
    tracer_string: String,
    tracer_payload: String,
    screenshot: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<TracerRow> for Tracer {
    fn from(row: TracerRow) -> Self {
        Tracer {
            id: row.id,
            request_id: row.request_id,
            uuid: row.uuid,
            tracer_string: row.tracer_string,
            tracer_payload: row.tracer_payload,
            screenshot: row.screenshot,
            tracer_events: Vec::new(),
            created_at: Some(row.created_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: i64,
    tracer_id: i64,
    data: String,
    location: String,
    event_type: String,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct DomContextRow {
    id: i64,
    tracer_event_id: i64,
    event_context: String,
    html_location_type: i16,
    html_node_type: String,
    severity: i32,
}

impl TryFrom<DomContextRow> for DomContext {
    type Error = StoreError;

    fn try_from(row: DomContextRow) -> Result<Self, Self::Error> {
        let location = u8::try_from(row.html_location_type)
            .map_err(|e| e.to_string())
            .and_then(HtmlLocationType::try_from)
            .map_err(|e| StoreError::Database(sqlx::Error::Decode(e.into())))?;
        Ok(DomContext {
            id: row.id,
            tracer_event_id: row.tracer_event_id,
            event_context: row.event_context,
            html_location_type: location,
            html_node_type: row.html_node_type,
            severity: row.severity.max(0) as u32,
        })
    }
}

const TRACER_COLUMNS: &str =
    "id, request_id, uuid, tracer_string, tracer_payload, screenshot, created_at";

#[async_trait]
impl TracerStore for PgStore {
    async fn create_request(&self, mut request: Request) -> Result<Request, StoreError> {
        let mut tx = self.pool.begin().await?;

        let (id, created_at): (i64, DateTime<Utc>) = sqlx::query_as(
            r#"
            INSERT INTO requests (uuid, raw_request, request_method)
            VALUES ($1, $2, $3)
            RETURNING id, created_at
            "#,
        )
        .bind(&request.uuid)
        .bind(&request.raw_request)
        .bind(&request.request_method)
        .fetch_one(&mut *tx)
        .await?;

        request.id = id;
        request.created_at = Some(created_at);

        for tracer in request.tracers.iter_mut() {
            let (tracer_id, tracer_created): (i64, DateTime<Utc>) = sqlx::query_as(
                r#"
                INSERT INTO tracers (request_id, uuid, tracer_string, tracer_payload, screenshot)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING id, created_at
                "#,
            )
            .bind(id)
            .bind(&request.uuid)
            .bind(&tracer.tracer_string)
            .bind(&tracer.tracer_payload)
            .bind(&tracer.screenshot)
            .fetch_one(&mut *tx)
            .await?;

            tracer.id = tracer_id;
            tracer.request_id = id;
            tracer.uuid = request.uuid.clone();
            tracer.created_at = Some(tracer_created);
        }

        tx.commit().await?;

        tracing::debug!(
            request_id = id,
            uuid = %request.uuid,
            tracers = request.tracers.len(),
            "Stored request"
        );
        Ok(request)
    }

    async fn create_event(
        &self,
        tracer_id: i64,
        mut event: TracerEvent,
    ) -> Result<TracerEvent, StoreError> {
        let mut tx = self.pool.begin().await?;

        let (id, created_at): (i64, DateTime<Utc>) = sqlx::query_as(
            r#"
            INSERT INTO tracer_events (tracer_id, data, location, event_type)
            VALUES ($1, $2, $3, $4)
            RETURNING id, created_at
            "#,
        )
        .bind(tracer_id)
        .bind(&event.data)
        .bind(&event.location)
        .bind(&event.event_type)
        .fetch_one(&mut *tx)
        .await?;

        event.id = id;
        event.tracer_id = tracer_id;
        event.created_at = Some(created_at);

        for ctx in event.dom_contexts.iter_mut() {
            let ctx_id: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO dom_contexts
                    (tracer_event_id, event_context, html_location_type, html_node_type, severity)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING id
                "#,
            )
            .bind(id)
            .bind(&ctx.event_context)
            .bind(u8::from(ctx.html_location_type) as i16)
            .bind(&ctx.html_node_type)
            .bind(ctx.severity.min(i32::MAX as u32) as i32)
            .fetch_one(&mut *tx)
            .await?;

            ctx.id = ctx_id;
            ctx.tracer_event_id = id;
        }

        tx.commit().await?;
        Ok(event)
    }

    async fn get_requests_by_uuid(&self, uuid: &str) -> Result<Vec<Request>, StoreError> {
        let rows: Vec<RequestRow> = sqlx::query_as(
            r#"
            SELECT id, uuid, raw_request, request_method, created_at
            FROM requests
            WHERE uuid = $1
            ORDER BY id ASC
            "#,
        )
        .bind(uuid)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let tracer_rows: Vec<TracerRow> = sqlx::query_as(&format!(
            "SELECT {} FROM tracers WHERE request_id = ANY($1) ORDER BY id ASC",
            TRACER_COLUMNS
        ))
        .bind(&ids[..])
        .fetch_all(&self.pool)
        .await?;

        let mut by_request: HashMap<i64, Vec<Tracer>> = HashMap::new();
        for row in tracer_rows {
            by_request.entry(row.request_id).or_default().push(row.into());
        }

        Ok(rows
            .into_iter()
            .map(|row| Request {
                tracers: by_request.remove(&row.id).unwrap_or_default(),
                id: row.id,
                uuid: row.uuid,
                raw_request: row.raw_request,
                request_method: row.request_method,
                created_at: Some(row.created_at),
            })
            .collect())
    }

    async fn get_tracer(&self, id: i64) -> Result<Tracer, StoreError> {
        let row: Option<TracerRow> = sqlx::query_as(&format!(
            "SELECT {} FROM tracers WHERE id = $1",
            TRACER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Tracer::from)
            .ok_or_else(|| StoreError::NotFound(format!("tracer {}", id)))
    }

    async fn get_tracer_id_by_string(&self, tracer_string: &str) -> Result<i64, StoreError> {
        let id: Option<i64> = sqlx::query_scalar("SELECT id FROM tracers WHERE tracer_string = $1")
            .bind(tracer_string)
            .fetch_optional(&self.pool)
            .await?;

        id.ok_or_else(|| StoreError::NotFound(format!("tracer string {}", tracer_string)))
    }

    async fn update_tracer(
        &self,
        id: i64,
        uuid: &str,
        edit: &TracerEdit,
    ) -> Result<Tracer, StoreError> {
        let row: Option<TracerRow> = sqlx::query_as(&format!(
            r#"
            UPDATE tracers
            SET screenshot = COALESCE($1, screenshot)
            WHERE id = $2 AND uuid = $3
            RETURNING {}
            "#,
            TRACER_COLUMNS
        ))
        .bind(&edit.screenshot)
        .bind(id)
        .bind(uuid)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Tracer::from)
            .ok_or_else(|| StoreError::NotFound(format!("tracer {} in session {}", id, uuid)))
    }

    async fn get_events(&self, tracer_id: i64) -> Result<Vec<TracerEvent>, StoreError> {
        let rows: Vec<EventRow> = sqlx::query_as(
            r#"
            SELECT id, tracer_id, data, location, event_type, created_at
            FROM tracer_events
            WHERE tracer_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(tracer_id)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let ctx_rows: Vec<DomContextRow> = sqlx::query_as(
            r#"
            SELECT id, tracer_event_id, event_context, html_location_type, html_node_type, severity
            FROM dom_contexts
            WHERE tracer_event_id = ANY($1)
            ORDER BY id ASC
            "#,
        )
        .bind(&ids[..])
        .fetch_all(&self.pool)
        .await?;

        let mut by_event: HashMap<i64, Vec<DomContext>> = HashMap::new();
        for row in ctx_rows {
            let event_id = row.tracer_event_id;
            by_event.entry(event_id).or_default().push(row.try_into()?);
        }

        Ok(rows
            .into_iter()
            .map(|row| TracerEvent {
                dom_contexts: by_event.remove(&row.id).unwrap_or_default(),
                id: row.id,
                tracer_id: row.tracer_id,
                data: row.data,
                location: row.location,
                event_type: row.event_type,
                created_at: Some(row.created_at),
            })
            .collect())
    }
}
