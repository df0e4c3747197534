//! Durable broker subscription
//!
//! Change events are queued in the shared SQLite database. Each message is
//! assigned to one of N partitions by hashing its partition key, so every
//! update for one entity lands on the same partition.
//!
//! # Delivery
//! - `receive` leases the oldest visible message of a partition, hiding it
//!   for the visibility timeout
//! - `ack` deletes it
//! - `nack` makes it visible again after the retry delay
//! - a lease that is neither acked nor nacked expires and the message is
//!   delivered again (at-least-once)

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use atlas_common::config::IngestConfig;
use atlas_common::time::{now, to_epoch_millis};
use atlas_common::{Error, Result};

/// One leased message
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub seq: i64,
    pub partition: u32,
    pub body: Vec<u8>,
    /// Deliveries so far, including this one
    pub attempts: u32,
    lease_id: Uuid,
}

/// Consumer side of a partitioned broker
#[async_trait]
pub trait Subscription: Send + Sync {
    /// Number of partitions
    fn partitions(&self) -> u32;

    /// Lease the next visible message of `partition`, if any
    async fn receive(&self, partition: u32) -> Result<Option<Delivery>>;

    /// Processing finished; remove the message
    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// Processing failed; redeliver later
    async fn nack(&self, delivery: &Delivery) -> Result<()>;
}

/// Lease timings
#[derive(Debug, Clone, Copy)]
pub struct BrokerSettings {
    pub partitions: u32,
    pub visibility_timeout: Duration,
    pub retry_delay: Duration,
}

impl From<&IngestConfig> for BrokerSettings {
    fn from(config: &IngestConfig) -> Self {
        Self {
            partitions: config.partitions,
            visibility_timeout: Duration::from_millis(config.visibility_timeout_ms),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }
}

/// FNV-1a; stable across processes and releases
fn hash_key(key: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    key.bytes()
        .fold(OFFSET, |hash, byte| (hash ^ u64::from(byte)).wrapping_mul(PRIME))
}

fn millis_from_now(offset: Duration) -> i64 {
    to_epoch_millis(&now()).saturating_add(offset.as_millis() as i64)
}

/// SQLite-backed broker
#[derive(Clone)]
pub struct SqliteBroker {
    db: SqlitePool,
    settings: BrokerSettings,
}

impl SqliteBroker {
    /// Open the broker, creating its table if needed
    pub async fn new(db: SqlitePool, settings: BrokerSettings) -> Result<Self> {
        if settings.partitions == 0 {
            return Err(Error::Config("broker needs at least one partition".to_string()));
        }

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS broker_messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                partition_no INTEGER NOT NULL,
                body BLOB NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                visible_at INTEGER NOT NULL,
                lease_id TEXT,
                published_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&db)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_broker_messages_visible ON broker_messages(partition_no, visible_at, seq)",
        )
        .execute(&db)
        .await?;

        info!(partitions = settings.partitions, "Broker subscription ready");
        Ok(Self { db, settings })
    }

    /// Partition a key maps to
    pub fn partition_for(&self, key: &str) -> u32 {
        (hash_key(key) % u64::from(self.settings.partitions)) as u32
    }

    /// Enqueue `body` on the partition of `partition_key`
    pub async fn publish(&self, partition_key: &str, body: &[u8]) -> Result<i64> {
        let partition = self.partition_for(partition_key);
        let published_at = to_epoch_millis(&now());

        let result = sqlx::query(
            r#"
            INSERT INTO broker_messages (partition_no, body, attempts, visible_at, published_at)
            VALUES (?, ?, 0, ?, ?)
            "#,
        )
        .bind(i64::from(partition))
        .bind(body)
        .bind(published_at)
        .bind(published_at)
        .execute(&self.db)
        .await?;

        let seq = result.last_insert_rowid();
        debug!(seq, partition, "Message published");
        Ok(seq)
    }

    /// Messages not yet acked, leased or not
    pub async fn pending(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM broker_messages")
            .fetch_one(&self.db)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl Subscription for SqliteBroker {
    fn partitions(&self) -> u32 {
        self.settings.partitions
    }

    async fn receive(&self, partition: u32) -> Result<Option<Delivery>> {
        let lease_id = Uuid::new_v4();
        let current = to_epoch_millis(&now());
        let lease_until = millis_from_now(self.settings.visibility_timeout);

        // Select and lease in one statement so two consumers never share a lease
        let row = sqlx::query(
            r#"
            UPDATE broker_messages
            SET visible_at = ?, lease_id = ?, attempts = attempts + 1
            WHERE seq = (
                SELECT seq FROM broker_messages
                WHERE partition_no = ? AND visible_at <= ?
                ORDER BY seq
                LIMIT 1
            )
            RETURNING seq, body, attempts
            "#,
        )
        .bind(lease_until)
        .bind(lease_id.to_string())
        .bind(i64::from(partition))
        .bind(current)
        .fetch_optional(&self.db)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let delivery = Delivery {
            seq: row.get("seq"),
            partition,
            body: row.get("body"),
            attempts: row.get::<i64, _>("attempts") as u32,
            lease_id,
        };
        debug!(seq = delivery.seq, partition, attempts = delivery.attempts, "Message leased");
        Ok(Some(delivery))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        let result = sqlx::query("DELETE FROM broker_messages WHERE seq = ? AND lease_id = ?")
            .bind(delivery.seq)
            .bind(delivery.lease_id.to_string())
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            debug!(seq = delivery.seq, "Ack after lease expired; message will be redelivered");
        }
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE broker_messages
            SET visible_at = ?, lease_id = NULL
            WHERE seq = ? AND lease_id = ?
            "#,
        )
        .bind(millis_from_now(self.settings.retry_delay))
        .bind(delivery.seq)
        .bind(delivery.lease_id.to_string())
        .execute(&self.db)
        .await?;

        debug!(seq = delivery.seq, attempts = delivery.attempts, "Message returned for redelivery");
        Ok(())
    }
}
