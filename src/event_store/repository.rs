//! Event Store Repository
//!
//! Core implementation of the Event Store pattern.
//! Provides atomic event persistence with optimistic concurrency control.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::aggregate::{Aggregate, DomainEvent};
use crate::db;
use crate::domain::OperationContext;

use super::EventStoreError;

type EventRow = (
    i64,
    Uuid,
    String,
    Uuid,
    i64,
    String,
    serde_json::Value,
    serde_json::Value,
    DateTime<Utc>,
);

/// Stored event from the database
#[derive(Debug, Clone)]
pub struct StoredEvent {
    /// Global, monotonically increasing position in the event table
    pub sequence: i64,
    pub id: Uuid,
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    pub version: i64,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub context: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl From<EventRow> for StoredEvent {
    fn from(row: EventRow) -> Self {
        let (sequence, id, aggregate_type, aggregate_id, version, event_type, event_data, context, created_at) =
            row;
        Self {
            sequence,
            id,
            aggregate_type,
            aggregate_id,
            version,
            event_type,
            event_data,
            context,
            created_at,
        }
    }
}

/// Operation to be performed on an aggregate
#[derive(Debug, Clone)]
pub struct AggregateOperation {
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    pub expected_version: i64,
    pub event_type: String,
    pub event_data: serde_json::Value,
}

impl AggregateOperation {
    /// Create a new aggregate operation
    pub fn new<E: Serialize>(
        aggregate_type: &str,
        aggregate_id: Uuid,
        expected_version: i64,
        event_type: &str,
        event: &E,
    ) -> Result<Self, EventStoreError> {
        let event_data = serde_json::to_value(event)?;
        Ok(Self {
            aggregate_type: aggregate_type.to_string(),
            aggregate_id,
            expected_version,
            event_type: event_type.to_string(),
            event_data,
        })
    }

    /// Operation for an event of aggregate `A`
    pub fn for_event<A: Aggregate>(
        aggregate_id: Uuid,
        expected_version: i64,
        event: &A::Event,
    ) -> Result<Self, EventStoreError> {
        Self::new(
            A::aggregate_type(),
            aggregate_id,
            expected_version,
            event.event_type(),
            event,
        )
    }
}

/// Event Store for persisting and retrieving events
#[derive(Debug, Clone)]
pub struct EventStore {
    pool: PgPool,
}

impl EventStore {
    /// Create a new EventStore with a database pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // =========================================================================
    // Append
    // =========================================================================

    /// Atomically append events across multiple aggregates in one transaction
    pub async fn append_atomic(
        &self,
        operations: &[AggregateOperation],
        context: &OperationContext,
    ) -> Result<Vec<Uuid>, EventStoreError> {
        let mut tx = self.pool.begin().await?;
        let ids = self.append_in_tx(&mut tx, operations, context).await?;
        tx.commit().await?;
        Ok(ids)
    }

    /// Append events inside a caller-owned transaction.
    ///
    /// Operations on the same aggregate must be ordered and carry
    /// consecutive expected versions. A stale expected version, or a
    /// concurrent writer taking the same version first, yields
    /// `ConcurrencyConflict`.
    pub async fn append_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        operations: &[AggregateOperation],
        context: &OperationContext,
    ) -> Result<Vec<Uuid>, EventStoreError> {
        let context_json = serde_json::to_value(context)?;
        let mut event_ids = Vec::with_capacity(operations.len());

        for op in operations {
            let current_version = self.current_version(tx, op.aggregate_id).await?;

            if current_version != op.expected_version {
                return Err(EventStoreError::ConcurrencyConflict {
                    aggregate_id: op.aggregate_id,
                    expected: op.expected_version,
                    actual: current_version,
                });
            }

            let new_version = op.expected_version + 1;

            let inserted: Result<Uuid, sqlx::Error> = sqlx::query_scalar(
                r#"
                INSERT INTO events (
                    aggregate_type, aggregate_id, version,
                    event_type, event_data, context
                )
                VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING id
                "#,
            )
            .bind(&op.aggregate_type)
            .bind(op.aggregate_id)
            .bind(new_version)
            .bind(&op.event_type)
            .bind(&op.event_data)
            .bind(&context_json)
            .fetch_one(&mut **tx)
            .await;

            let event_id = match inserted {
                Ok(id) => id,
                Err(e) if db::is_unique_violation(&e) => {
                    return Err(EventStoreError::ConcurrencyConflict {
                        aggregate_id: op.aggregate_id,
                        expected: op.expected_version,
                        actual: new_version,
                    });
                }
                Err(e) => return Err(e.into()),
            };

            event_ids.push(event_id);
        }

        Ok(event_ids)
    }

    /// Get current version of an aggregate
    async fn current_version(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        aggregate_id: Uuid,
    ) -> Result<i64, EventStoreError> {
        let result: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT MAX(version) FROM events WHERE aggregate_id = $1
            "#,
        )
        .bind(aggregate_id)
        .fetch_optional(&mut **tx)
        .await?
        .flatten();

        Ok(result.unwrap_or(0))
    }

    // =========================================================================
    // Load with snapshot support
    // =========================================================================

    /// Load an aggregate by replaying events (with snapshot optimization)
    pub async fn load_aggregate<A>(&self, aggregate_id: Uuid) -> Result<Option<A>, EventStoreError>
    where
        A: Aggregate + DeserializeOwned + Serialize,
        A::Event: DeserializeOwned,
    {
        // 1. Try to load from snapshot
        let (from_version, initial_state) = self.load_snapshot::<A>(aggregate_id).await?;

        // 2. Load events after snapshot version
        let events: Vec<StoredEvent> = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT sequence, id, aggregate_type, aggregate_id, version, event_type, event_data, context, created_at
            FROM events
            WHERE aggregate_type = $1 AND aggregate_id = $2 AND version > $3
            ORDER BY version ASC
            "#,
        )
        .bind(A::aggregate_type())
        .bind(aggregate_id)
        .bind(from_version)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(StoredEvent::from)
        .collect();

        // If no snapshot and no events, aggregate doesn't exist
        if initial_state.is_none() && events.is_empty() {
            return Ok(None);
        }

        // 3. Replay events on initial state
        let mut aggregate = initial_state.unwrap_or_default();
        for stored_event in events {
            let event: A::Event = serde_json::from_value(stored_event.event_data).map_err(|e| {
                EventStoreError::InvalidEventData(format!(
                    "{} v{} ({}): {}",
                    stored_event.aggregate_id, stored_event.version, stored_event.event_type, e
                ))
            })?;
            aggregate = aggregate.apply(event);
        }

        Ok(Some(aggregate))
    }

    /// Load snapshot for an aggregate
    async fn load_snapshot<A>(&self, aggregate_id: Uuid) -> Result<(i64, Option<A>), EventStoreError>
    where
        A: Aggregate + DeserializeOwned,
    {
        let result: Option<(i64, serde_json::Value)> = sqlx::query_as(
            r#"
            SELECT version, state
            FROM event_snapshots
            WHERE aggregate_type = $1 AND aggregate_id = $2
            "#,
        )
        .bind(A::aggregate_type())
        .bind(aggregate_id)
        .fetch_optional(&self.pool)
        .await?;

        match result {
            Some((version, state)) => {
                let aggregate: A = serde_json::from_value(state)?;
                Ok((version, Some(aggregate)))
            }
            None => Ok((0, None)),
        }
    }

    /// Save a snapshot if the aggregate version warrants it
    pub async fn save_snapshot_if_needed<A>(&self, aggregate: &A) -> Result<bool, EventStoreError>
    where
        A: Aggregate + Serialize,
    {
        if !aggregate.should_snapshot() {
            return Ok(false);
        }

        let state = serde_json::to_value(aggregate)?;

        sqlx::query(
            r#"
            INSERT INTO event_snapshots (aggregate_type, aggregate_id, version, state)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (aggregate_type, aggregate_id)
            DO UPDATE SET version = $3, state = $4, created_at = NOW()
            "#,
        )
        .bind(A::aggregate_type())
        .bind(aggregate.id())
        .bind(aggregate.version())
        .bind(state)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            aggregate_type = A::aggregate_type(),
            aggregate_id = %aggregate.id(),
            version = aggregate.version(),
            "Snapshot saved"
        );

        Ok(true)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Get all events for an aggregate
    pub async fn get_events(&self, aggregate_id: Uuid) -> Result<Vec<StoredEvent>, EventStoreError> {
        let events = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT sequence, id, aggregate_type, aggregate_id, version, event_type, event_data, context, created_at
            FROM events
            WHERE aggregate_id = $1
            ORDER BY version ASC
            "#,
        )
        .bind(aggregate_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(StoredEvent::from)
        .collect();

        Ok(events)
    }

    /// Committed events with a global sequence greater than `after`, oldest
    /// first.
    ///
    /// Sequence numbers are taken at insert time, so a slow transaction can
    /// still commit a lower sequence than the ones returned here. Readers
    /// that must not skip events have to treat holes in the result as
    /// possibly in flight.
    pub async fn events_after(
        &self,
        after: i64,
        limit: i64,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let events = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT sequence, id, aggregate_type, aggregate_id, version, event_type, event_data, context, created_at
            FROM events
            WHERE sequence > $1
            ORDER BY sequence ASC
            LIMIT $2
            "#,
        )
        .bind(after)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(StoredEvent::from)
        .collect();

        Ok(events)
    }
}
