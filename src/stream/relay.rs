use sqlx::PgPool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::event_store::{EventStore, EventStoreError, StoredEvent};

use super::{EventPublisher, PublishError, StreamMessage};

const DEFAULT_BATCH_SIZE: i64 = 500;
/// A hole in the sequence is not examined before it is this old
const MIN_GAP_AGE: Duration = Duration::from_millis(500);
/// Holes still unresolved after this long are skipped
const GAP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Publish failed at sequence {sequence}: {source}")]
    Publish {
        sequence: i64,
        #[source]
        source: PublishError,
    },
}

/// Transactional outbox relay.
///
/// Reads committed events in global sequence order and publishes them,
/// storing the last published sequence in `stream_offsets`. Delivery is
/// at-least-once: a crash between publish and cursor update repeats events.
///
/// The cursor never moves past a hole in the sequence while the hole could
/// still be filled by a transaction that has not committed yet. A hole is
/// resolved once every transaction that was running when it was examined
/// has finished, or after `GAP_TIMEOUT`. Rolled-back appends leave holes
/// that resolve this way.
#[derive(Clone)]
pub struct OutboxRelay {
    event_store: EventStore,
    publisher: Arc<dyn EventPublisher>,
    consumer: String,
    batch_size: i64,
    gaps: Arc<Mutex<GapState>>,
}

#[derive(Debug, Default)]
struct GapState {
    /// Missing sequences up to here will never appear
    resolved_through: i64,
    watch: Option<GapWatch>,
}

#[derive(Debug)]
struct GapWatch {
    first_missing: i64,
    last_missing: i64,
    seen_at: Instant,
    /// Snapshot xmax once the gap was old enough: every transaction that
    /// holds one of the missing sequences has a lower xid
    horizon: Option<i64>,
}

impl OutboxRelay {
    pub fn new(pool: PgPool, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            event_store: EventStore::new(pool),
            publisher,
            consumer: "event-stream".to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            gaps: Arc::new(Mutex::new(GapState::default())),
        }
    }

    pub fn with_consumer(mut self, consumer: impl Into<String>) -> Self {
        self.consumer = consumer.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size as usize
    }

    /// Publish one batch. Returns the number of events published.
    pub async fn run_once(&self) -> Result<usize, RelayError> {
        loop {
            let cursor = self.load_cursor().await?;
            let events = self
                .event_store
                .events_after(cursor, self.batch_size)
                .await?;

            if events.is_empty() {
                return Ok(0);
            }

            let sequences: Vec<i64> = events.iter().map(|e| e.sequence).collect();
            let resolved_through = self.gaps.lock().await.resolved_through;
            let ready = publishable_prefix(cursor, resolved_through, &sequences);

            if ready < sequences.len() {
                let first_missing = match ready {
                    0 => cursor.max(resolved_through) + 1,
                    n => sequences[n - 1].max(resolved_through) + 1,
                };
                let resolved = self
                    .check_gap(first_missing, sequences[ready] - 1)
                    .await?;

                // Re-read: whatever filled the gap has committed by now
                if resolved && ready == 0 {
                    continue;
                }
            }

            if ready == 0 {
                return Ok(0);
            }

            return self.publish(cursor, events.into_iter().take(ready)).await;
        }
    }

    async fn publish(
        &self,
        cursor: i64,
        events: impl Iterator<Item = StoredEvent>,
    ) -> Result<usize, RelayError> {
        let mut last_published = cursor;
        let mut published = 0;

        for event in events {
            let sequence = event.sequence;
            if let Err(source) = self.publisher.publish(StreamMessage::from(event)).await {
                // Keep what was delivered so far
                if last_published > cursor {
                    self.save_cursor(last_published).await?;
                }
                return Err(RelayError::Publish { sequence, source });
            }
            last_published = sequence;
            published += 1;
        }

        self.save_cursor(last_published).await?;

        tracing::debug!(
            consumer = %self.consumer,
            published,
            last_sequence = last_published,
            "Outbox relay published batch"
        );

        Ok(published)
    }

    /// Track the gap `first_missing..=last_missing`. Returns true once it
    /// is resolved and may be stepped over.
    async fn check_gap(&self, first_missing: i64, last_missing: i64) -> Result<bool, RelayError> {
        let mut gaps = self.gaps.lock().await;

        let tracked = matches!(&gaps.watch, Some(w) if w.first_missing == first_missing);
        if !tracked {
            tracing::debug!(
                consumer = %self.consumer,
                first_missing,
                last_missing,
                "Waiting on sequence gap"
            );
            gaps.watch = Some(GapWatch {
                first_missing,
                last_missing,
                seen_at: Instant::now(),
                horizon: None,
            });
            return Ok(false);
        }
        let Some(watch) = gaps.watch.as_mut() else {
            return Ok(false);
        };

        let age = watch.seen_at.elapsed();
        let resolved = if age >= GAP_TIMEOUT {
            tracing::warn!(
                consumer = %self.consumer,
                first_missing,
                last_missing = watch.last_missing,
                "Sequence gap still open after timeout, skipping it"
            );
            true
        } else if age < MIN_GAP_AGE {
            false
        } else {
            let (xmin, xmax) = self.snapshot_bounds().await?;
            let horizon = *watch.horizon.get_or_insert(xmax);
            xmin >= horizon
        };

        if resolved {
            let last_missing = watch.last_missing;
            gaps.resolved_through = gaps.resolved_through.max(last_missing);
            gaps.watch = None;
            tracing::debug!(
                consumer = %self.consumer,
                first_missing,
                last_missing,
                "Sequence gap resolved"
            );
        }

        Ok(resolved)
    }

    /// xmin and xmax of a fresh snapshot
    async fn snapshot_bounds(&self) -> Result<(i64, i64), RelayError> {
        let bounds = sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT pg_snapshot_xmin(s)::text::bigint, pg_snapshot_xmax(s)::text::bigint
            FROM pg_current_snapshot() AS s
            "#,
        )
        .fetch_one(self.event_store.pool())
        .await?;

        Ok(bounds)
    }

    async fn load_cursor(&self) -> Result<i64, RelayError> {
        let cursor: Option<i64> =
            sqlx::query_scalar("SELECT last_sequence FROM stream_offsets WHERE consumer = $1")
                .bind(&self.consumer)
                .fetch_optional(self.event_store.pool())
                .await?;

        Ok(cursor.unwrap_or(0))
    }

    async fn save_cursor(&self, sequence: i64) -> Result<(), RelayError> {
        sqlx::query(
            r#"
            INSERT INTO stream_offsets (consumer, last_sequence, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (consumer)
            DO UPDATE SET last_sequence = GREATEST(stream_offsets.last_sequence, $2), updated_at = NOW()
            "#,
        )
        .bind(&self.consumer)
        .bind(sequence)
        .execute(self.event_store.pool())
        .await?;

        Ok(())
    }
}

/// Number of leading `sequences` that follow `cursor` without an
/// unresolved hole. Holes at or below `resolved_through` are known empty.
fn publishable_prefix(cursor: i64, resolved_through: i64, sequences: &[i64]) -> usize {
    let mut reach = cursor.max(resolved_through);
    let mut ready = 0;

    for &sequence in sequences {
        if sequence > reach + 1 {
            break;
        }
        reach = reach.max(sequence);
        ready += 1;
    }

    ready
}
