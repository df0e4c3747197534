//! Contracts for the storage and equivalence index collaborators
//!
//! The resolution pipeline only reads through these traits; the ingestion
//! worker only writes through the conditional `*_if_newer` operations, which
//! implementations must perform atomically per entity id. A write that may
//! change an equivalence set records the affected ids in the [`RefreshQueue`]
//! atomically with the write itself.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

use crate::content::{Content, Resolved, Topic};
use crate::id::Id;
use crate::publisher::Publisher;
use crate::Result;

/// Content storage
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Hydrate every id that exists, in one batch
    async fn resolve_ids(&self, ids: &BTreeSet<Id>) -> Result<Resolved<Content>>;

    /// Store `content` unless the stored record is at least as new
    ///
    /// Returns whether the write was applied. An applied write also requests
    /// a refresh of `content.id`.
    async fn write_if_newer(&self, content: &Content) -> Result<bool>;
}

/// Topic storage
#[async_trait]
pub trait TopicStore: Send + Sync {
    /// Store `topic` unless the stored record is at least as new
    async fn write_if_newer(&self, topic: &Topic) -> Result<bool>;
}

/// Equivalence index, read side
#[async_trait]
pub trait EquivalenceIndex: Send + Sync {
    /// Closed equivalence sets restricted to `enabled` publishers
    ///
    /// Ids with no enabled-publisher representation are absent from the
    /// result; no entry is ever empty.
    async fn lookup(
        &self,
        ids: &BTreeSet<Id>,
        enabled: &BTreeSet<Publisher>,
    ) -> Result<BTreeMap<Id, BTreeSet<Id>>>;

    /// Recompute the equivalence set containing `id`
    async fn refresh(&self, id: Id) -> Result<()>;
}

/// Equivalence index, write side
#[async_trait]
pub trait EquivalenceAssertions: Send + Sync {
    /// Replace `subject`'s asserted equivalents unless the stored assertion is
    /// at least as new
    ///
    /// Returns the previously asserted ids when applied, `None` when stale.
    /// An applied assertion also requests a refresh of the subject and every
    /// previously or newly asserted id.
    async fn assert_if_newer(
        &self,
        subject: Id,
        equivalents: &BTreeSet<Id>,
        source: &Publisher,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<BTreeSet<Id>>>;
}

/// One outstanding refresh request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRefresh {
    pub id: Id,
    /// Bumped each time the id is requested again
    pub generation: i64,
}

/// Durable queue of ids awaiting [`EquivalenceIndex::refresh`]
#[async_trait]
pub trait RefreshQueue: Send + Sync {
    /// Oldest outstanding requests, at most `limit`
    async fn pending(&self, limit: usize) -> Result<Vec<PendingRefresh>>;

    /// Remove `request` unless the id was requested again since it was read
    ///
    /// Returns whether the request was removed.
    async fn complete(&self, request: &PendingRefresh) -> Result<bool>;
}
