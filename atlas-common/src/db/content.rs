//! Content persistence

use async_trait::async_trait;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

use super::refresh_queue::enqueue_refresh;
use super::{push_id_list, MAX_BATCH};
use crate::content::{Content, Resolved};
use crate::id::Id;
use crate::publisher::SourceRegistry;
use crate::store::ContentStore;
use crate::time::{from_epoch_nanos, to_epoch_nanos};
use crate::Result;

/// SQLite-backed [`ContentStore`]
#[derive(Clone)]
pub struct SqliteContentStore {
    db: SqlitePool,
    registry: Arc<SourceRegistry>,
}

impl SqliteContentStore {
    pub fn new(db: SqlitePool, registry: Arc<SourceRegistry>) -> Self {
        Self { db, registry }
    }

    fn row_to_content(&self, row: &sqlx::sqlite::SqliteRow) -> Result<Option<Content>> {
        let id = Id::from_db(row.get("id"))?;
        let publisher_key: String = row.get("publisher");
        let Some(publisher) = self.registry.by_key(&publisher_key).cloned() else {
            warn!(content_id = %id, publisher = %publisher_key, "Stored content has unknown publisher, skipping");
            return Ok(None);
        };
        let kind: String = row.get("kind");
        let attributes: String = row.get("attributes");

        Ok(Some(Content {
            id,
            publisher,
            kind: kind.parse()?,
            title: row.get("title"),
            last_updated: from_epoch_nanos(row.get("last_updated")),
            attributes: serde_json::from_str(&attributes).unwrap_or_else(|e| {
                warn!(content_id = %id, error = %e, "Stored attributes are not valid JSON");
                serde_json::Value::Null
            }),
        }))
    }
}

#[async_trait]
impl ContentStore for SqliteContentStore {
    async fn resolve_ids(&self, ids: &BTreeSet<Id>) -> Result<Resolved<Content>> {
        if ids.is_empty() {
            return Ok(Resolved::empty(BTreeSet::new()));
        }

        let all: Vec<Id> = ids.iter().copied().collect();
        let mut resources = Vec::with_capacity(all.len());

        for chunk in all.chunks(MAX_BATCH) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "SELECT id, publisher, kind, title, attributes, last_updated FROM content WHERE id IN ",
            );
            push_id_list(&mut builder, chunk);

            let rows = builder.build().fetch_all(&self.db).await?;
            for row in &rows {
                if let Some(content) = self.row_to_content(row)? {
                    resources.push(content);
                }
            }
        }

        debug!(
            requested = ids.len(),
            resolved = resources.len(),
            "Resolved content ids"
        );

        Ok(Resolved::new(ids.clone(), resources))
    }

    async fn write_if_newer(&self, content: &Content) -> Result<bool> {
        let attributes = serde_json::to_string(&content.attributes)
            .map_err(|e| crate::Error::InvalidInput(e.to_string()))?;

        let last_updated = to_epoch_nanos(&content.last_updated)?;
        let mut tx = self.db.begin().await?;

        // Single statement: the freshness comparison and the write are atomic
        let applied = sqlx::query(
            r#"
            INSERT INTO content (id, publisher, kind, title, attributes, last_updated)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                publisher = excluded.publisher,
                kind = excluded.kind,
                title = excluded.title,
                attributes = excluded.attributes,
                last_updated = excluded.last_updated
            WHERE excluded.last_updated > content.last_updated
            "#,
        )
        .bind(content.id.as_db())
        .bind(&content.publisher.key)
        .bind(content.kind.as_str())
        .bind(&content.title)
        .bind(attributes)
        .bind(last_updated)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        if !applied {
            tx.rollback().await?;
            return Ok(false);
        }

        enqueue_refresh(&mut *tx, &BTreeSet::from([content.id])).await?;
        tx.commit().await?;

        Ok(true)
    }
}
