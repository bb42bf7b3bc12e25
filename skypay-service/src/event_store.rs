use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, PgPool};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::events::WebhookEvent;

pub const DEFAULT_LEASE_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Pending,
    Processed,
    Ignored,
    Failed,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Processed => "processed",
            EventStatus::Ignored => "ignored",
            EventStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<EventStatus> {
        match s {
            "pending" => Some(EventStatus::Pending),
            "processed" => Some(EventStatus::Processed),
            "ignored" => Some(EventStatus::Ignored),
            "failed" => Some(EventStatus::Failed),
            _ => None,
        }
    }

    /// Terminal records short-circuit redelivery.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, EventStatus::Pending)
    }
}

/// Result of trying to take ownership of an event id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// This delivery owns the event and must dispatch it. `attempt` starts at 1.
    Acquired { attempt: i32 },
    /// Already finished on an earlier delivery.
    Completed(EventStatus),
    /// Another delivery holds a live claim.
    InFlight,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("unknown event status {0:?} in store")]
    CorruptStatus(String),
    #[error("event {0} has no pending claim for this attempt")]
    NotClaimed(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EventRecord {
    pub event_id: String,
    pub event_type: String,
    pub status: String,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub received_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl EventRecord {
    pub fn status(&self) -> Result<EventStatus, StoreError> {
        EventStatus::parse(&self.status).ok_or_else(|| StoreError::CorruptStatus(self.status.clone()))
    }
}

/// Durable record of webhook event ids and their processing outcome.
///
/// `claim` must be atomic per event id: of any number of concurrent claims
/// for an absent id exactly one returns `Acquired`.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn claim(&self, event: &WebhookEvent) -> Result<Claim, StoreError>;
    /// Move a claimed event to a terminal status. `attempt` is the value
    /// returned by `Claim::Acquired`; a claim taken over since then yields
    /// `NotClaimed`.
    async fn complete(&self, event_id: &str, attempt: i32, status: EventStatus, detail: Option<&str>) -> Result<(), StoreError>;
    /// Drop the claim but keep the record pending so the next delivery re-acquires it.
    /// Fenced on `attempt` like `complete`.
    async fn release(&self, event_id: &str, attempt: i32, error: &str) -> Result<(), StoreError>;
    async fn find(&self, event_id: &str) -> Result<Option<EventRecord>, StoreError>;
}

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS webhook_events (
    event_id     TEXT PRIMARY KEY,
    event_type   TEXT NOT NULL,
    status       TEXT NOT NULL,
    attempts     INTEGER NOT NULL DEFAULT 1,
    last_error   TEXT NULL,
    received_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
    claimed_at   TIMESTAMPTZ NULL DEFAULT now(),
    completed_at TIMESTAMPTZ NULL
);
"#;

#[derive(Clone)]
pub struct PgEventStore {
    db: PgPool,
    lease: Duration,
}

impl PgEventStore {
    pub fn new(db: PgPool, lease: Duration) -> Self {
        Self { db, lease }
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        self.db.execute(SCHEMA).await?;
        Ok(())
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn claim(&self, event: &WebhookEvent) -> Result<Claim, StoreError> {
        // Fresh ids insert; stale or released pending rows are taken over in
        // the same statement so two deliveries can never both win.
        let acquired = sqlx::query_scalar::<_, i32>(
            r#"INSERT INTO webhook_events (event_id, event_type, status, attempts, received_at, claimed_at)
               VALUES ($1, $2, 'pending', 1, $3, now())
               ON CONFLICT (event_id) DO UPDATE
                  SET attempts = webhook_events.attempts + 1,
                      claimed_at = now()
                WHERE webhook_events.status = 'pending'
                  AND (webhook_events.claimed_at IS NULL
                       OR webhook_events.claimed_at < now() - make_interval(secs => $4))
               RETURNING attempts"#,
        )
        .bind(&event.id)
        .bind(&event.event_type)
        .bind(event.received_at)
        .bind(self.lease.as_secs_f64())
        .fetch_optional(&self.db)
        .await?;

        if let Some(attempt) = acquired {
            return Ok(Claim::Acquired { attempt });
        }
        match self.find(&event.id).await? {
            Some(record) => match record.status()? {
                EventStatus::Pending => Ok(Claim::InFlight),
                status => Ok(Claim::Completed(status)),
            },
            // Row vanished between statements; nothing deletes rows, so treat as in flight.
            None => Ok(Claim::InFlight),
        }
    }

    async fn complete(&self, event_id: &str, attempt: i32, status: EventStatus, detail: Option<&str>) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"UPDATE webhook_events
               SET status = $3, last_error = COALESCE($4, last_error), completed_at = now()
               WHERE event_id = $1 AND status = 'pending' AND attempts = $2"#,
        )
        .bind(event_id)
        .bind(attempt)
        .bind(status.as_str())
        .bind(detail)
        .execute(&self.db)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotClaimed(event_id.to_string()));
        }
        Ok(())
    }

    async fn release(&self, event_id: &str, attempt: i32, error: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"UPDATE webhook_events SET claimed_at = NULL, last_error = $3
               WHERE event_id = $1 AND status = 'pending' AND attempts = $2"#,
        )
        .bind(event_id)
        .bind(attempt)
        .bind(error)
        .execute(&self.db)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotClaimed(event_id.to_string()));
        }
        Ok(())
    }

    async fn find(&self, event_id: &str) -> Result<Option<EventRecord>, StoreError> {
        let rec = sqlx::query_as::<_, EventRecord>(
            r#"SELECT event_id, event_type, status, attempts, last_error, received_at, claimed_at, completed_at
               FROM webhook_events WHERE event_id = $1"#,
        )
        .bind(event_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(rec)
    }
}

/// Process-local store for tests and database-less development runs.
/// Not durable across restarts.
pub struct MemoryEventStore {
    records: Mutex<HashMap<String, EventRecord>>,
    lease: chrono::Duration,
}

impl MemoryEventStore {
    pub fn new(lease: Duration) -> Self {
        let lease = chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::seconds(DEFAULT_LEASE_SECS as i64));
        Self { records: Mutex::new(HashMap::new()), lease }
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

impl Default for MemoryEventStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_LEASE_SECS))
    }
}

fn owned_claim<'a>(
    records: &'a mut HashMap<String, EventRecord>,
    event_id: &str,
    attempt: i32,
) -> Result<&'a mut EventRecord, StoreError> {
    records
        .get_mut(event_id)
        .filter(|r| r.status == EventStatus::Pending.as_str() && r.attempts == attempt)
        .ok_or_else(|| StoreError::NotClaimed(event_id.to_string()))
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn claim(&self, event: &WebhookEvent) -> Result<Claim, StoreError> {
        let mut records = self.records.lock().await;
        let now = Utc::now();
        match records.get_mut(&event.id) {
            None => {
                records.insert(
                    event.id.clone(),
                    EventRecord {
                        event_id: event.id.clone(),
                        event_type: event.event_type.clone(),
                        status: EventStatus::Pending.as_str().to_string(),
                        attempts: 1,
                        last_error: None,
                        received_at: event.received_at,
                        claimed_at: Some(now),
                        completed_at: None,
                    },
                );
                Ok(Claim::Acquired { attempt: 1 })
            }
            Some(record) => {
                let status = record.status()?;
                if status.is_terminal() {
                    return Ok(Claim::Completed(status));
                }
                let stale = match record.claimed_at {
                    None => true,
                    Some(at) => at < now - self.lease,
                };
                if !stale {
                    return Ok(Claim::InFlight);
                }
                record.attempts += 1;
                record.claimed_at = Some(now);
                Ok(Claim::Acquired { attempt: record.attempts })
            }
        }
    }

    async fn complete(&self, event_id: &str, attempt: i32, status: EventStatus, detail: Option<&str>) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let record = owned_claim(&mut records, event_id, attempt)?;
        record.status = status.as_str().to_string();
        if let Some(detail) = detail {
            record.last_error = Some(detail.to_string());
        }
        record.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn release(&self, event_id: &str, attempt: i32, error: &str) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let record = owned_claim(&mut records, event_id, attempt)?;
        record.claimed_at = None;
        record.last_error = Some(error.to_string());
        Ok(())
    }

    async fn find(&self, event_id: &str) -> Result<Option<EventRecord>, StoreError> {
        Ok(self.records.lock().await.get(event_id).cloned())
    }
}
