use crate::config::DatabaseConfig;
use sqlx::{postgres::PgPoolOptions, PgPool};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS requests (
        id BIGSERIAL PRIMARY KEY,
        uuid TEXT NOT NULL,
        raw_request TEXT NOT NULL DEFAULT '',
        request_method TEXT NOT NULL DEFAULT '',
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS requests_uuid_idx ON requests (uuid)",
    r#"
    CREATE TABLE IF NOT EXISTS tracers (
        id BIGSERIAL PRIMARY KEY,
        request_id BIGINT NOT NULL REFERENCES requests (id),
        uuid TEXT NOT NULL,
        tracer_string TEXT NOT NULL UNIQUE,
        tracer_payload TEXT NOT NULL DEFAULT '',
        screenshot TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS tracers_request_id_idx ON tracers (request_id)",
    r#"
    CREATE TABLE IF NOT EXISTS tracer_events (
        id BIGSERIAL PRIMARY KEY,
        tracer_id BIGINT NOT NULL REFERENCES tracers (id),
        data TEXT NOT NULL,
        location TEXT NOT NULL,
        event_type TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    // md5 keeps the key under the btree row limit for large DOM snippets
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS tracer_events_observation_key
        ON tracer_events (tracer_id, md5(data), md5(location), event_type)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS dom_contexts (
        id BIGSERIAL PRIMARY KEY,
        tracer_event_id BIGINT NOT NULL REFERENCES tracer_events (id),
        event_context TEXT NOT NULL,
        html_location_type SMALLINT NOT NULL CHECK (html_location_type BETWEEN 0 AND 4),
        html_node_type TEXT NOT NULL,
        severity INTEGER NOT NULL DEFAULT 0
    )
    "#,
    "CREATE INDEX IF NOT EXISTS dom_contexts_event_idx ON dom_contexts (tracer_event_id)",
];

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await
}

pub async fn health_check(pool: &PgPool) -> Result<String, sqlx::Error> {
    let row: (String,) = sqlx::query_as("SELECT version()").fetch_one(pool).await?;
    Ok(row.0)
}

/// Create the tables and unique keys if they do not exist yet.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    tracing::debug!(statements = SCHEMA.len(), "Schema ensured");
    Ok(())
}
