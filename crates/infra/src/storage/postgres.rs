//! Postgres-backed repositories.
//!
//! Schema lives in `crates/infra/migrations/`.
//!
//! ## Error mapping
//!
//! | SQLx error | StorageError |
//! |---|---|
//! | Database / PoolClosed / Io / other | `Database { operation, message }` |
//! | row decode (`ColumnDecode`, `ColumnNotFound`) | `InvalidRow` |
//!
//! Every variant classifies as [`courier_events::FailureKind::Storage`], so a
//! database outage is retried with backoff like any other transient failure.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::instrument;

use courier_core::{CloudEvent, Subscription, SubscriptionId, Timestamp};

use super::{EventRepository, StorageError, SubscriptionRepository};

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

/// Create the tables if they do not exist yet.
pub async fn apply_schema(pool: &PgPool) -> Result<(), StorageError> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .map_err(|e| map_sqlx_error("apply_schema", e))?;
    Ok(())
}

/// The stored form of an event: its structured-mode JSON text, so attribute
/// order and the original `time` rendering survive storage.
fn event_document(event: &CloudEvent) -> Result<String, StorageError> {
    event.to_json().map_err(|e| StorageError::InvalidRow(e.to_string()))
}

#[derive(Debug, Clone)]
pub struct PostgresEventRepository {
    pool: Arc<PgPool>,
}

impl PostgresEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl EventRepository for PostgresEventRepository {
    #[instrument(skip(self, event), fields(event_id = event.id()), err(Display))]
    async fn save(&self, event: &CloudEvent) -> Result<(), StorageError> {
        let document = event_document(event)?;

        sqlx::query(
            r#"
            INSERT INTO events (id, source, type, subject, resource, time, cloud_event)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(event.id())
        .bind(event.source())
        .bind(event.event_type())
        .bind(event.subject())
        .bind(event.resource())
        .bind(event.time().map(Timestamp::value))
        .bind(document)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("save_event", e))?;

        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PostgresSubscriptionRepository {
    pool: Arc<PgPool>,
}

impl PostgresSubscriptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl SubscriptionRepository for PostgresSubscriptionRepository {
    /// Validated subscriptions whose resource filter is empty or equal to the
    /// event's resource. Remaining filters are applied by the matcher.
    #[instrument(skip(self, event), fields(event_id = event.id()), err(Display))]
    async fn candidates(&self, event: &CloudEvent) -> Result<Vec<Subscription>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT
                id,
                end_point,
                consumer,
                created_by,
                resource_filter,
                source_filter,
                subject_filter,
                type_filter,
                validated,
                created
            FROM subscriptions
            WHERE validated
              AND (resource_filter IS NULL OR resource_filter = $1)
            ORDER BY id ASC
            "#,
        )
        .bind(event.resource())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("subscription_candidates", e))?;

        rows.iter().map(subscription_from_row).collect()
    }

    #[instrument(skip(self), fields(subscription_id = %id), err(Display))]
    async fn mark_validated(&self, id: SubscriptionId) -> Result<(), StorageError> {
        let result = sqlx::query("UPDATE subscriptions SET validated = TRUE WHERE id = $1")
            .bind(id.get())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("mark_validated", e))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::SubscriptionNotFound(id));
        }
        Ok(())
    }
}

fn subscription_from_row(row: &sqlx::postgres::PgRow) -> Result<Subscription, StorageError> {
    let decode = |e: sqlx::Error| StorageError::InvalidRow(e.to_string());

    Ok(Subscription {
        id: SubscriptionId::new(row.try_get::<i64, _>("id").map_err(decode)?),
        end_point: row.try_get("end_point").map_err(decode)?,
        consumer: row.try_get("consumer").map_err(decode)?,
        created_by: row.try_get("created_by").map_err(decode)?,
        resource_filter: row.try_get("resource_filter").map_err(decode)?,
        source_filter: row.try_get("source_filter").map_err(decode)?,
        subject_filter: row.try_get("subject_filter").map_err(decode)?,
        type_filter: row.try_get("type_filter").map_err(decode)?,
        validated: row.try_get("validated").map_err(decode)?,
        created: row.try_get::<DateTime<Utc>, _>("created").map_err(decode)?,
    })
}

fn map_sqlx_error(operation: &'static str, err: sqlx::Error) -> StorageError {
    match err {
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::ColumnNotFound(_) => {
            StorageError::InvalidRow(format!("{operation}: {err}"))
        }
        sqlx::Error::Database(db_err) => StorageError::Database {
            operation,
            message: db_err.message().to_string(),
        },
        sqlx::Error::PoolClosed => StorageError::Database {
            operation,
            message: "connection pool closed".to_string(),
        },
        other => StorageError::Database {
            operation,
            message: other.to_string(),
        },
    }
}
