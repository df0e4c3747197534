//! Durable equivalence refresh requests
//!
//! Writers record the ids whose equivalence set may have changed in the same
//! transaction as the write itself, so a request exists exactly when the
//! write committed. Each re-request bumps the row's generation; completing a
//! request only removes it if no newer request arrived meanwhile.

use async_trait::async_trait;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::BTreeSet;

use crate::id::Id;
use crate::store::{PendingRefresh, RefreshQueue};
use crate::time::{now, to_epoch_nanos};
use crate::Result;

/// Record refresh requests for `ids` on `conn`
pub(crate) async fn enqueue_refresh(conn: &mut SqliteConnection, ids: &BTreeSet<Id>) -> Result<()> {
    let requested_at = to_epoch_nanos(&now())?;
    for id in ids {
        sqlx::query(
            r#"
            INSERT INTO pending_refresh (id, generation, requested_at)
            VALUES (?, 0, ?)
            ON CONFLICT(id) DO UPDATE SET generation = pending_refresh.generation + 1
            "#,
        )
        .bind(id.as_db())
        .bind(requested_at)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// SQLite-backed [`RefreshQueue`]
#[derive(Clone)]
pub struct SqliteRefreshQueue {
    db: SqlitePool,
}

impl SqliteRefreshQueue {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RefreshQueue for SqliteRefreshQueue {
    async fn pending(&self, limit: usize) -> Result<Vec<PendingRefresh>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            "SELECT id, generation FROM pending_refresh ORDER BY requested_at, id LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.db)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(PendingRefresh {
                    id: Id::from_db(row.get("id"))?,
                    generation: row.get("generation"),
                })
            })
            .collect()
    }

    async fn complete(&self, request: &PendingRefresh) -> Result<bool> {
        let result = sqlx::query("DELETE FROM pending_refresh WHERE id = ? AND generation = ?")
            .bind(request.id.as_db())
            .bind(request.generation)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_database;

    fn ids(values: &[u64]) -> BTreeSet<Id> {
        values.iter().map(|v| Id::new(*v).unwrap()).collect()
    }

    #[tokio::test]
    async fn test_requests_collapse_per_id() {
        let pool = init_memory_database().await.unwrap();
        let queue = SqliteRefreshQueue::new(pool.clone());

        let mut conn = pool.acquire().await.unwrap();
        enqueue_refresh(&mut *conn, &ids(&[3, 1])).await.unwrap();
        enqueue_refresh(&mut *conn, &ids(&[1])).await.unwrap();
        drop(conn);

        let pending = queue.pending(10).await.unwrap();
        let found: BTreeSet<Id> = pending.iter().map(|p| p.id).collect();
        assert_eq!(found, ids(&[1, 3]));
        assert_eq!(pending.len(), 2);
    }

    #[tokio::test]
    async fn test_complete_keeps_request_made_after_read() {
        let pool = init_memory_database().await.unwrap();
        let queue = SqliteRefreshQueue::new(pool.clone());

        let mut conn = pool.acquire().await.unwrap();
        enqueue_refresh(&mut *conn, &ids(&[5])).await.unwrap();
        drop(conn);
        let taken = queue.pending(10).await.unwrap();

        // Another write lands while the refresh is running
        let mut conn = pool.acquire().await.unwrap();
        enqueue_refresh(&mut *conn, &ids(&[5])).await.unwrap();
        drop(conn);

        assert!(!queue.complete(&taken[0]).await.unwrap());
        let again = queue.pending(10).await.unwrap();
        assert_eq!(again.len(), 1);

        assert!(queue.complete(&again[0]).await.unwrap());
        assert!(queue.pending(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pending_respects_limit() {
        let pool = init_memory_database().await.unwrap();
        let queue = SqliteRefreshQueue::new(pool.clone());

        let mut conn = pool.acquire().await.unwrap();
        enqueue_refresh(&mut *conn, &ids(&[1, 2, 3, 4])).await.unwrap();
        drop(conn);

        assert_eq!(queue.pending(3).await.unwrap().len(), 3);
    }
}
