//! SQLite backends for the storage and equivalence index contracts

pub mod content;
pub mod equivalence;
pub mod init;
pub mod refresh_queue;
pub mod topics;

pub use content::SqliteContentStore;
pub use equivalence::SqliteEquivalenceIndex;
pub use init::*;
pub use refresh_queue::SqliteRefreshQueue;
pub use topics::SqliteTopicStore;

use sqlx::{QueryBuilder, Sqlite};

use crate::id::Id;

/// SQLite caps bound parameters per statement; batch lookups are chunked
pub(crate) const MAX_BATCH: usize = 500;

/// Append `(?, ?, ...)` binding every id
pub(crate) fn push_id_list(builder: &mut QueryBuilder<'_, Sqlite>, ids: &[Id]) {
    builder.push("(");
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(id.as_db());
    }
    separated.push_unseparated(")");
}

/// Append `(?, ?, ...)` binding every string
pub(crate) fn push_str_list(builder: &mut QueryBuilder<'_, Sqlite>, values: &[String]) {
    builder.push("(");
    let mut separated = builder.separated(", ");
    for value in values {
        separated.push_bind(value.clone());
    }
    separated.push_unseparated(")");
}
