//! Query executor
//!
//! Entry point of the read path. One call resolves one [`Query`]:
//!
//! - `Single`: merged result for one id, [`QueryError::NotFound`] if nothing
//!   the application may see exists
//! - `Multiple`: whichever ids resolve; an empty page is a valid answer
//! - `Search`: title search, merged across equivalents only when the
//!   `equivalents` / `all_equivalents` annotations ask for it
//!
//! The whole query runs under a single timeout owned by the executor. Internal
//! failures are logged with their detail and reported as one opaque failure.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use atlas_common::config::TomlConfig;
use atlas_common::store::{ContentStore, EquivalenceIndex};
use atlas_common::{Id, Resolved};

use crate::annotation::wants_equivalence;
use crate::error::{QueryError, QueryResult};
use crate::query::{select_ids, Query, QueryContext, Selection};
use crate::resolver::{MergedResult, MergingResolver};
use crate::search::{HttpTitleSearchClient, ResolvingSearcher, SearchQuery};

/// Message returned for every failure that is neither not-found nor timeout
const OPAQUE_FAILURE: &str = "unable to resolve query";

pub struct QueryExecutor {
    resolver: MergingResolver,
    searcher: Option<ResolvingSearcher>,
    timeout: Duration,
}

impl QueryExecutor {
    /// Create an executor
    ///
    /// Without a searcher, `Search` queries fail.
    pub fn new(resolver: MergingResolver, searcher: Option<ResolvingSearcher>, timeout: Duration) -> Self {
        Self {
            resolver,
            searcher,
            timeout,
        }
    }

    /// Assemble the read path from configuration
    ///
    /// `[query] timeout_ms` bounds every query. Title search goes to the HTTP
    /// index at `[search] base_url`; without one, `Search` queries fail.
    pub fn from_config(
        config: &TomlConfig,
        index: Arc<dyn EquivalenceIndex>,
        store: Arc<dyn ContentStore>,
    ) -> atlas_common::Result<Self> {
        let searcher = match config.search.base_url.as_deref() {
            Some(base_url) => {
                let client = HttpTitleSearchClient::new(base_url)?;
                Some(ResolvingSearcher::new(Arc::new(client), store.clone()))
            }
            None => None,
        };

        Ok(Self::new(
            MergingResolver::new(index, store),
            searcher,
            config.query.timeout(),
        ))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn search_enabled(&self) -> bool {
        self.searcher.is_some()
    }

    /// Resolve `query` for the application described by `ctx`
    pub async fn execute(&self, query: &Query, ctx: &QueryContext) -> QueryResult<Resolved<MergedResult>> {
        let started = Instant::now();

        let outcome = tokio::time::timeout(self.timeout, self.execute_unbounded(query, ctx)).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(resolved)) => {
                debug!(
                    kind = query.kind(),
                    resolved = resolved.len(),
                    missing = resolved.missing().len(),
                    elapsed_ms,
                    "Query executed"
                );
                Ok(resolved)
            }
            Ok(Err(QueryError::Failed(detail))) => {
                warn!(kind = query.kind(), error = %detail, elapsed_ms, "Query failed");
                Err(QueryError::Failed(OPAQUE_FAILURE.to_string()))
            }
            Ok(Err(err)) => Err(err),
            Err(_) => {
                warn!(
                    kind = query.kind(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Query timed out"
                );
                Err(QueryError::Timeout(self.timeout))
            }
        }
    }

    async fn execute_unbounded(&self, query: &Query, ctx: &QueryContext) -> QueryResult<Resolved<MergedResult>> {
        match query {
            Query::Single(id) => self.single(*id, ctx).await,
            Query::Multiple { ids, selection } => {
                let ids = select_ids(ids, selection);
                self.resolver
                    .resolve_ids(&ids, &ctx.sources, &ctx.annotations)
                    .await
            }
            Query::Search { text, selection } => self.search(text, selection, ctx).await,
        }
    }

    async fn single(&self, id: Id, ctx: &QueryContext) -> QueryResult<Resolved<MergedResult>> {
        let ids = BTreeSet::from([id]);
        let resolved = self
            .resolver
            .resolve_ids(&ids, &ctx.sources, &ctx.annotations)
            .await?;

        if resolved.is_empty() {
            debug!(content_id = %id, "Single query matched nothing");
            return Err(QueryError::NotFound(id));
        }
        Ok(resolved)
    }

    /// Search results in rank order
    ///
    /// When merging, hits that collapse onto an earlier hit's primary are
    /// dropped from the page and show up as missing.
    async fn search(
        &self,
        text: &str,
        selection: &Selection,
        ctx: &QueryContext,
    ) -> QueryResult<Resolved<MergedResult>> {
        let searcher = self
            .searcher
            .as_ref()
            .ok_or_else(|| QueryError::Failed("title search is not configured".to_string()))?;

        let query = SearchQuery::new(text, *selection).for_sources(&ctx.sources);
        let content = searcher.search_unbounded(&query, &ctx.sources).await?;
        let requested: BTreeSet<Id> = content.iter().map(|c| c.id).collect();

        if !wants_equivalence(&ctx.annotations) {
            return Ok(Resolved::new(
                requested,
                content.into_iter().map(MergedResult::unmerged),
            ));
        }

        let mut merged: HashMap<Id, MergedResult> = self
            .resolver
            .resolve_ids(&requested, &ctx.sources, &ctx.annotations)
            .await?
            .into_resources()
            .into_iter()
            .map(|m| (m.id, m))
            .collect();

        let mut primaries = HashSet::new();
        let ordered: Vec<MergedResult> = content
            .iter()
            .filter_map(|c| merged.remove(&c.id))
            .filter(|m| primaries.insert(m.primary.id))
            .collect();

        Ok(Resolved::new(requested, ordered))
    }
}
