//! Equivalence index persistence
//!
//! Each subject's assertion ("these ids denote the same content as me") is
//! stored as undirected edges. Refreshing an id recomputes the connected
//! components around it and materializes them in `equivalence_sets`, labelled
//! by their lowest member id. Lookups read only the materialized sets, so
//! they reflect the last refresh rather than the latest assertion.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::debug;

use super::refresh_queue::enqueue_refresh;
use super::{push_id_list, push_str_list, MAX_BATCH};
use crate::id::Id;
use crate::publisher::Publisher;
use crate::store::{EquivalenceAssertions, EquivalenceIndex};
use crate::time::to_epoch_nanos;
use crate::Result;

/// SQLite-backed equivalence index (read and write side)
#[derive(Clone)]
pub struct SqliteEquivalenceIndex {
    db: SqlitePool,
}

impl SqliteEquivalenceIndex {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

/// Ids sharing an edge with `id`, in either direction
async fn neighbours(conn: &mut SqliteConnection, id: Id) -> Result<Vec<Id>> {
    let rows: Vec<i64> = sqlx::query_scalar(
        r#"
        SELECT target FROM equivalence_edges WHERE subject = ?
        UNION
        SELECT subject FROM equivalence_edges WHERE target = ?
        "#,
    )
    .bind(id.as_db())
    .bind(id.as_db())
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(Id::from_db).collect()
}

/// Breadth-first walk of the edge graph from `seed`
async fn component_of(conn: &mut SqliteConnection, seed: Id) -> Result<BTreeSet<Id>> {
    let mut component = BTreeSet::from([seed]);
    let mut queue = VecDeque::from([seed]);

    while let Some(current) = queue.pop_front() {
        for next in neighbours(conn, current).await? {
            if component.insert(next) {
                queue.push_back(next);
            }
        }
    }

    Ok(component)
}

async fn write_component(conn: &mut SqliteConnection, component: &BTreeSet<Id>) -> Result<()> {
    if component.len() == 1 {
        // Lone ids carry no row
        for id in component {
            sqlx::query("DELETE FROM equivalence_sets WHERE id = ?")
                .bind(id.as_db())
                .execute(&mut *conn)
                .await?;
        }
        return Ok(());
    }

    let Some(label) = component.first().copied() else {
        return Ok(());
    };
    for id in component {
        sqlx::query(
            r#"
            INSERT INTO equivalence_sets (id, set_id) VALUES (?, ?)
            ON CONFLICT(id) DO UPDATE SET set_id = excluded.set_id
            "#,
        )
        .bind(id.as_db())
        .bind(label.as_db())
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl EquivalenceIndex for SqliteEquivalenceIndex {
    async fn lookup(
        &self,
        ids: &BTreeSet<Id>,
        enabled: &BTreeSet<Publisher>,
    ) -> Result<BTreeMap<Id, BTreeSet<Id>>> {
        if ids.is_empty() || enabled.is_empty() {
            return Ok(BTreeMap::new());
        }
        let publishers: Vec<String> = enabled.iter().map(|p| p.key.clone()).collect();
        let requested: Vec<Id> = ids.iter().copied().collect();

        // Set label per requested id; ids without a row label themselves
        let mut labels: BTreeMap<Id, Id> = requested.iter().map(|id| (*id, *id)).collect();
        for chunk in requested.chunks(MAX_BATCH) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new("SELECT id, set_id FROM equivalence_sets WHERE id IN ");
            push_id_list(&mut builder, chunk);
            for row in builder.build().fetch_all(&self.db).await? {
                labels.insert(Id::from_db(row.get("id"))?, Id::from_db(row.get("set_id"))?);
            }
        }

        // Members of every label, restricted to enabled publishers
        let label_ids: Vec<Id> = labels.values().copied().collect::<BTreeSet<_>>().into_iter().collect();
        let mut members: BTreeMap<Id, BTreeSet<Id>> = BTreeMap::new();
        for chunk in label_ids.chunks(MAX_BATCH) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "SELECT s.set_id AS set_id, s.id AS id FROM equivalence_sets s \
                 JOIN content c ON c.id = s.id WHERE s.set_id IN ",
            );
            push_id_list(&mut builder, chunk);
            builder.push(" AND c.publisher IN ");
            push_str_list(&mut builder, &publishers);
            for row in builder.build().fetch_all(&self.db).await? {
                members
                    .entry(Id::from_db(row.get("set_id"))?)
                    .or_default()
                    .insert(Id::from_db(row.get("id"))?);
            }

            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new("SELECT id FROM content WHERE id IN ");
            push_id_list(&mut builder, chunk);
            builder.push(" AND publisher IN ");
            push_str_list(&mut builder, &publishers);
            builder.push(" AND id NOT IN (SELECT id FROM equivalence_sets)");
            for row in builder.build().fetch_all(&self.db).await? {
                let id = Id::from_db(row.get("id"))?;
                members.entry(id).or_default().insert(id);
            }
        }

        let result: BTreeMap<Id, BTreeSet<Id>> = labels
            .into_iter()
            .filter_map(|(id, label)| {
                members
                    .get(&label)
                    .filter(|set| !set.is_empty())
                    .map(|set| (id, set.clone()))
            })
            .collect();

        debug!(
            requested = ids.len(),
            found = result.len(),
            publishers = publishers.len(),
            "Equivalence lookup"
        );

        Ok(result)
    }

    async fn refresh(&self, id: Id) -> Result<()> {
        let mut tx = self.db.begin().await?;

        // Previous set members may now belong to a different component
        let mut seeds = BTreeSet::from([id]);
        let old_label: Option<i64> =
            sqlx::query_scalar("SELECT set_id FROM equivalence_sets WHERE id = ?")
                .bind(id.as_db())
                .fetch_optional(&mut *tx)
                .await?;
        if let Some(label) = old_label {
            let previous: Vec<i64> =
                sqlx::query_scalar("SELECT id FROM equivalence_sets WHERE set_id = ?")
                    .bind(label)
                    .fetch_all(&mut *tx)
                    .await?;
            for member in previous {
                seeds.insert(Id::from_db(member)?);
            }
        }

        let mut visited = BTreeSet::new();
        let mut components = 0usize;
        for seed in seeds {
            if visited.contains(&seed) {
                continue;
            }
            let component = component_of(&mut *tx, seed).await?;
            write_component(&mut *tx, &component).await?;
            visited.extend(component);
            components += 1;
        }

        tx.commit().await?;

        debug!(
            content_id = %id,
            components,
            touched = visited.len(),
            "Equivalence sets refreshed"
        );

        Ok(())
    }
}

#[async_trait]
impl EquivalenceAssertions for SqliteEquivalenceIndex {
    async fn assert_if_newer(
        &self,
        subject: Id,
        equivalents: &BTreeSet<Id>,
        source: &Publisher,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<BTreeSet<Id>>> {
        let last_updated = to_epoch_nanos(&timestamp)?;
        let mut tx = self.db.begin().await?;

        // Freshness check and claim in one statement; later statements in the
        // transaction only run when this one applied
        let applied = sqlx::query(
            r#"
            INSERT INTO equivalence_assertions (subject, publisher, last_updated)
            VALUES (?, ?, ?)
            ON CONFLICT(subject) DO UPDATE SET
                publisher = excluded.publisher,
                last_updated = excluded.last_updated
            WHERE excluded.last_updated > equivalence_assertions.last_updated
            "#,
        )
        .bind(subject.as_db())
        .bind(&source.key)
        .bind(last_updated)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        if !applied {
            tx.rollback().await?;
            return Ok(None);
        }

        let previous: Vec<i64> =
            sqlx::query_scalar("SELECT target FROM equivalence_edges WHERE subject = ?")
                .bind(subject.as_db())
                .fetch_all(&mut *tx)
                .await?;
        let previous = previous
            .into_iter()
            .map(Id::from_db)
            .collect::<Result<BTreeSet<_>>>()?;

        sqlx::query("DELETE FROM equivalence_edges WHERE subject = ?")
            .bind(subject.as_db())
            .execute(&mut *tx)
            .await?;

        for target in equivalents.iter().filter(|t| **t != subject) {
            sqlx::query("INSERT OR IGNORE INTO equivalence_edges (subject, target) VALUES (?, ?)")
                .bind(subject.as_db())
                .bind(target.as_db())
                .execute(&mut *tx)
                .await?;
        }

        let mut affected = previous.clone();
        affected.extend(equivalents.iter().copied());
        affected.insert(subject);
        enqueue_refresh(&mut *tx, &affected).await?;

        tx.commit().await?;

        Ok(Some(previous))
    }
}
