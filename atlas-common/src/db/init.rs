//! Database initialization
//!
//! Opens (creating if needed) the shared SQLite database and creates the
//! content, topic, equivalence and refresh queue tables. Table creation is idempotent and
//! safe to run on every start.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Current schema version recorded in `schema_version`
pub const SCHEMA_VERSION: i64 = 2;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Applied to every pooled connection: WAL lets the query path read while
    // ingest workers write, busy_timeout queues concurrent writers
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(16)
        .min_connections(2)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// In-memory database with the full schema
///
/// Limited to one connection: every SQLite `:memory:` connection is a
/// separate database.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    create_schema(&pool).await?;
    Ok(pool)
}

/// Create every table owned by this crate
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_content_table(pool).await?;
    create_topics_table(pool).await?;
    create_equivalence_tables(pool).await?;
    create_refresh_queue_table(pool).await?;

    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(SCHEMA_VERSION)
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the content table
///
/// `last_updated` is epoch nanoseconds of the event that wrote the row.
pub async fn create_content_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS content (
            id INTEGER PRIMARY KEY,
            publisher TEXT NOT NULL,
            kind TEXT NOT NULL,
            title TEXT,
            attributes TEXT NOT NULL DEFAULT 'null',
            last_updated INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_content_publisher ON content(publisher)")
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn create_topics_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS topics (
            id INTEGER PRIMARY KEY,
            publisher TEXT NOT NULL,
            namespace TEXT NOT NULL,
            value TEXT NOT NULL,
            title TEXT,
            last_updated INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the equivalence tables
///
/// - `equivalence_assertions`: one row per asserting subject (freshness)
/// - `equivalence_edges`: the subject's asserted equivalents
/// - `equivalence_sets`: materialized connected components, labelled by
///   their lowest id; ids without a row form a set of their own
pub async fn create_equivalence_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS equivalence_assertions (
            subject INTEGER PRIMARY KEY,
            publisher TEXT NOT NULL,
            last_updated INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS equivalence_edges (
            subject INTEGER NOT NULL,
            target INTEGER NOT NULL,
            PRIMARY KEY (subject, target)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_equivalence_edges_target ON equivalence_edges(target)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS equivalence_sets (
            id INTEGER PRIMARY KEY,
            set_id INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_equivalence_sets_set ON equivalence_sets(set_id)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Create the durable refresh request table
///
/// One row per id awaiting an equivalence refresh; `generation` counts
/// re-requests so a completed refresh never drops a newer request.
pub async fn create_refresh_queue_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pending_refresh (
            id INTEGER PRIMARY KEY,
            generation INTEGER NOT NULL DEFAULT 0,
            requested_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pending_refresh_requested ON pending_refresh(requested_at)")
        .execute(pool)
        .await?;

    Ok(())
}
