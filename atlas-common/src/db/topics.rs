//! Topic persistence

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::content::Topic;
use crate::store::TopicStore;
use crate::time::to_epoch_nanos;
use crate::Result;

/// SQLite-backed [`TopicStore`]
#[derive(Clone)]
pub struct SqliteTopicStore {
    db: SqlitePool,
}

impl SqliteTopicStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TopicStore for SqliteTopicStore {
    async fn write_if_newer(&self, topic: &Topic) -> Result<bool> {
        let last_updated = to_epoch_nanos(&topic.last_updated)?;
        let result = sqlx::query(
            r#"
            INSERT INTO topics (id, publisher, namespace, value, title, last_updated)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                publisher = excluded.publisher,
                namespace = excluded.namespace,
                value = excluded.value,
                title = excluded.title,
                last_updated = excluded.last_updated
            WHERE excluded.last_updated > topics.last_updated
            "#,
        )
        .bind(topic.id.as_db())
        .bind(&topic.publisher.key)
        .bind(&topic.namespace)
        .bind(&topic.value)
        .bind(&topic.title)
        .bind(last_updated)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_database;
    use crate::id::Id;
    use crate::publisher::Publisher;
    use chrono::{TimeZone, Utc};

    fn topic(value: &str, second: u32) -> Topic {
        Topic {
            id: Id::new(77).unwrap(),
            publisher: Publisher::new("bbc", "GB", "BBC"),
            namespace: "genre".to_string(),
            value: value.to_string(),
            title: None,
            last_updated: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, second).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_topic_write_respects_freshness() {
        let pool = init_memory_database().await.unwrap();
        let store = SqliteTopicStore::new(pool.clone());

        assert!(store.write_if_newer(&topic("drama", 10)).await.unwrap());
        assert!(!store.write_if_newer(&topic("comedy", 5)).await.unwrap());
        assert!(store.write_if_newer(&topic("documentary", 20)).await.unwrap());

        let value: String = sqlx::query_scalar("SELECT value FROM topics WHERE id = 77")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(value, "documentary");
    }
}
