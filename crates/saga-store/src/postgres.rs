use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    ConnectionStatus, Event, EventId, EventStatus, Result, Saga, SagaConnection, SagaId,
    SagaStatus, StoreError, store::SagaStore,
};

/// PostgreSQL-backed saga store implementation.
#[derive(Clone)]
pub struct PostgresSagaStore {
    pool: PgPool,
}

impl PostgresSagaStore {
    /// Creates a new PostgreSQL saga store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn status_code(code: i16, column: &'static str) -> Result<u8> {
        u8::try_from(code).map_err(|_| StoreError::InvalidStatus { column, code })
    }

    fn row_to_saga(row: PgRow, event_uuids: Vec<EventId>) -> Result<Saga> {
        let code: i16 = row.try_get("saga_status")?;
        let saga_status = SagaStatus::from_code(Self::status_code(code, "saga_status")?)
            .ok_or(StoreError::InvalidStatus {
                column: "saga_status",
                code,
            })?;

        Ok(Saga {
            saga_uuid: SagaId::from_uuid(row.try_get::<Uuid, _>("saga_uuid")?),
            root_saga_uuid: SagaId::from_uuid(row.try_get::<Uuid, _>("root_saga_uuid")?),
            operation: row.try_get("operation")?,
            saga_type: row.try_get("saga_type")?,
            saga_name: row.try_get("saga_name")?,
            saga_status,
            saga_data: row.try_get("saga_data")?,
            event_uuids,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_event(row: PgRow) -> Result<Event> {
        let code: i16 = row.try_get("event_status")?;
        let event_status = EventStatus::from_code(Self::status_code(code, "event_status")?)
            .ok_or(StoreError::InvalidStatus {
                column: "event_status",
                code,
            })?;

        Ok(Event {
            event_uuid: EventId::from_uuid(row.try_get::<Uuid, _>("event_uuid")?),
            saga_uuid: SagaId::from_uuid(row.try_get::<Uuid, _>("saga_uuid")?),
            event_name: row.try_get("event_name")?,
            event_status,
            event_is_roll_back: row.try_get("event_is_roll_back")?,
            event_result: row.try_get("event_result")?,
            event_rollback_uuid: row
                .try_get::<Option<Uuid>, _>("event_rollback_uuid")?
                .map(EventId::from_uuid),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_connection(row: PgRow) -> Result<SagaConnection> {
        let code: i16 = row.try_get("connection_status")?;
        let connection_status =
            ConnectionStatus::from_code(Self::status_code(code, "connection_status")?).ok_or(
                StoreError::InvalidStatus {
                    column: "connection_status",
                    code,
                },
            )?;

        Ok(SagaConnection {
            current_saga_uuid: SagaId::from_uuid(row.try_get::<Uuid, _>("current_saga_uuid")?),
            next_saga_uuid: SagaId::from_uuid(row.try_get::<Uuid, _>("next_saga_uuid")?),
            connection_status,
        })
    }

    fn map_insert_error(e: sqlx::Error, what: String, missing: StoreError) -> StoreError {
        if let sqlx::Error::Database(ref db_err) = e {
            if db_err.is_unique_violation() {
                return StoreError::Duplicate(what);
            }
            if db_err.is_foreign_key_violation() {
                return missing;
            }
        }
        StoreError::Database(e)
    }
}

#[async_trait]
impl SagaStore for PostgresSagaStore {
    async fn create_saga(&self, saga: &Saga) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sagas (saga_uuid, root_saga_uuid, operation, saga_type, saga_name, saga_status, saga_data, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(saga.saga_uuid.as_uuid())
        .bind(saga.root_saga_uuid.as_uuid())
        .bind(&saga.operation)
        .bind(&saga.saga_type)
        .bind(&saga.saga_name)
        .bind(i16::from(saga.saga_status.code()))
        .bind(&saga.saga_data)
        .bind(saga.created_at)
        .bind(saga.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Self::map_insert_error(
                e,
                format!("saga {}", saga.saga_uuid),
                StoreError::SagaNotFound(saga.root_saga_uuid),
            )
        })?;

        Ok(())
    }

    async fn get_saga(&self, saga_id: SagaId) -> Result<Option<Saga>> {
        let row = sqlx::query(
            r#"
            SELECT saga_uuid, root_saga_uuid, operation, saga_type, saga_name, saga_status, saga_data, created_at, updated_at
            FROM sagas
            WHERE saga_uuid = $1
            "#,
        )
        .bind(saga_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let event_uuids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT event_uuid FROM saga_events WHERE saga_uuid = $1 ORDER BY seq ASC",
        )
        .bind(saga_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        let event_uuids = event_uuids.into_iter().map(EventId::from_uuid).collect();
        Self::row_to_saga(row, event_uuids).map(Some)
    }

    async fn update_saga_status(&self, saga_id: SagaId, status: SagaStatus) -> Result<()> {
        let result = sqlx::query(
            "UPDATE sagas SET saga_status = $2, updated_at = $3 WHERE saga_uuid = $1",
        )
        .bind(saga_id.as_uuid())
        .bind(i16::from(status.code()))
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::SagaNotFound(saga_id));
        }
        Ok(())
    }

    async fn create_event(&self, event: &Event) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO saga_events (event_uuid, saga_uuid, event_name, event_status, event_is_roll_back, event_result, event_rollback_uuid, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(event.event_uuid.as_uuid())
        .bind(event.saga_uuid.as_uuid())
        .bind(&event.event_name)
        .bind(i16::from(event.event_status.code()))
        .bind(event.event_is_roll_back)
        .bind(&event.event_result)
        .bind(event.event_rollback_uuid.map(|id| id.as_uuid()))
        .bind(event.created_at)
        .bind(event.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Self::map_insert_error(
                e,
                format!("event {}", event.event_uuid),
                StoreError::SagaNotFound(event.saga_uuid),
            )
        })?;

        Ok(())
    }

    async fn get_event(&self, event_id: EventId) -> Result<Option<Event>> {
        let row = sqlx::query(
            r#"
            SELECT event_uuid, saga_uuid, event_name, event_status, event_is_roll_back, event_result, event_rollback_uuid, created_at, updated_at
            FROM saga_events
            WHERE event_uuid = $1
            "#,
        )
        .bind(event_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_event).transpose()
    }

    async fn update_event(&self, event: &Event, expected: EventStatus) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE saga_events
            SET event_status = $2, event_result = $3, event_rollback_uuid = $4, updated_at = $5
            WHERE event_uuid = $1 AND event_status = $6
            "#,
        )
        .bind(event.event_uuid.as_uuid())
        .bind(i16::from(event.event_status.code()))
        .bind(&event.event_result)
        .bind(event.event_rollback_uuid.map(|id| id.as_uuid()))
        .bind(Utc::now())
        .bind(i16::from(expected.code()))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(match self.get_event(event.event_uuid).await? {
                Some(stored) => StoreError::StaleEvent {
                    event_id: event.event_uuid,
                    expected,
                    found: stored.event_status,
                },
                None => StoreError::EventNotFound(event.event_uuid),
            });
        }
        Ok(())
    }

    async fn get_saga_events(&self, saga_id: SagaId) -> Result<Vec<Event>> {
        let rows = sqlx::query(
            r#"
            SELECT event_uuid, saga_uuid, event_name, event_status, event_is_roll_back, event_result, event_rollback_uuid, created_at, updated_at
            FROM saga_events
            WHERE saga_uuid = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(saga_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn create_saga_connection(
        &self,
        parent: SagaId,
        child: SagaId,
        status: ConnectionStatus,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO saga_connections (current_saga_uuid, next_saga_uuid, connection_status)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(parent.as_uuid())
        .bind(child.as_uuid())
        .bind(i16::from(status.code()))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Self::map_insert_error(
                e,
                format!("connection {parent} -> {child}"),
                StoreError::ConnectionNotFound { parent, child },
            )
        })?;

        Ok(())
    }

    async fn update_saga_connection(
        &self,
        parent: SagaId,
        child: SagaId,
        status: ConnectionStatus,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE saga_connections SET connection_status = $3
            WHERE current_saga_uuid = $1 AND next_saga_uuid = $2
            "#,
        )
        .bind(parent.as_uuid())
        .bind(child.as_uuid())
        .bind(i16::from(status.code()))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::ConnectionNotFound { parent, child });
        }
        Ok(())
    }

    async fn get_connections_by_parent(&self, parent: SagaId) -> Result<Vec<SagaConnection>> {
        let rows = sqlx::query(
            r#"
            SELECT current_saga_uuid, next_saga_uuid, connection_status
            FROM saga_connections
            WHERE current_saga_uuid = $1
            ORDER BY created_seq ASC
            "#,
        )
        .bind(parent.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_connection).collect()
    }

    async fn get_connections_by_child(&self, child: SagaId) -> Result<Vec<SagaConnection>> {
        let rows = sqlx::query(
            r#"
            SELECT current_saga_uuid, next_saga_uuid, connection_status
            FROM saga_connections
            WHERE next_saga_uuid = $1
            ORDER BY created_seq ASC
            "#,
        )
        .bind(child.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_connection).collect()
    }
}
