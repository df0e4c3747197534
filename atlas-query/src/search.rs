//! Title search
//!
//! [`TitleSearcher`] asks an external full-text index for content ids matching
//! a title. [`ResolvingSearcher`] chains that lookup with one storage batch to
//! return hydrated entities in rank order. Neither applies its own timeout to
//! the remote calls: the bound is enforced once, around the whole chain.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use atlas_common::store::ContentStore;
use atlas_common::{ApplicationSources, Content, Error, Id};

use crate::error::{QueryError, QueryResult};
use crate::query::Selection;

const USER_AGENT: &str = concat!("atlas-query/", env!("CARGO_PKG_VERSION"));

/// Text query sent to the title index
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub text: String,
    pub selection: Selection,
    /// Publisher keys the caller may see; empty means no restriction
    pub publishers: Vec<String>,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>, selection: Selection) -> Self {
        Self {
            text: text.into(),
            selection,
            publishers: Vec::new(),
        }
    }

    /// Restrict to the application's enabled publishers
    pub fn for_sources(mut self, sources: &ApplicationSources) -> Self {
        self.publishers = sources.precedence().iter().map(|p| p.key.clone()).collect();
        self
    }
}

/// External title index
#[async_trait]
pub trait TitleSearcher: Send + Sync {
    /// Matching ids, best first, without repeats
    async fn search(&self, query: &SearchQuery) -> atlas_common::Result<Vec<Id>>;
}

/// Search index response body
#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    id: Id,
}

/// Keep the first occurrence of every id, preserving rank
fn dedup_ranked(ids: impl IntoIterator<Item = Id>) -> Vec<Id> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}

/// HTTP client for the title index
///
/// `GET {base_url}/titles?q=&limit=&offset=&publishers=a,b` answering
/// `{"results": [{"id": "<code>", "score": 1.0}, ...]}` in rank order.
pub struct HttpTitleSearchClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpTitleSearchClient {
    pub fn new(base_url: impl Into<String>) -> atlas_common::Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::Dependency(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl TitleSearcher for HttpTitleSearchClient {
    async fn search(&self, query: &SearchQuery) -> atlas_common::Result<Vec<Id>> {
        let url = format!("{}/titles", self.base_url);
        let mut params = vec![
            ("q", query.text.clone()),
            ("limit", query.selection.limit.to_string()),
            ("offset", query.selection.offset.to_string()),
        ];
        if !query.publishers.is_empty() {
            params.push(("publishers", query.publishers.join(",")));
        }

        debug!(url = %url, text = %query.text, "Querying title index");

        let response = self
            .http_client
            .get(&url)
            .query(&params)
            .send()
            .await
            .map_err(|e| Error::Dependency(format!("title index unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::Dependency(format!(
                "title index returned {}: {}",
                status.as_u16(),
                error_text
            )));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| Error::Dependency(format!("invalid title index response: {}", e)))?;

        Ok(dedup_ranked(body.results.into_iter().map(|hit| hit.id)))
    }
}

/// Title search followed by raw hydration (no equivalence merging)
#[derive(Clone)]
pub struct ResolvingSearcher {
    searcher: Arc<dyn TitleSearcher>,
    store: Arc<dyn ContentStore>,
}

impl ResolvingSearcher {
    pub fn new(searcher: Arc<dyn TitleSearcher>, store: Arc<dyn ContentStore>) -> Self {
        Self { searcher, store }
    }

    /// Search and hydrate within `timeout`
    ///
    /// Both remote calls share the one bound. On timeout the in-flight call is
    /// dropped and nothing partial is returned; any other failure is reported
    /// without naming the step that failed.
    pub async fn search(
        &self,
        query: &SearchQuery,
        sources: &ApplicationSources,
        timeout: Duration,
    ) -> QueryResult<Vec<Content>> {
        match tokio::time::timeout(timeout, self.search_unbounded(query, sources)).await {
            Ok(Ok(content)) => Ok(content),
            Ok(Err(QueryError::Failed(detail))) => {
                warn!(text = %query.text, error = %detail, "Title search failed");
                Err(QueryError::Failed("search failed".to_string()))
            }
            Ok(Err(other)) => Err(other),
            Err(_) => {
                warn!(text = %query.text, timeout_ms = timeout.as_millis() as u64, "Title search timed out");
                Err(QueryError::Timeout(timeout))
            }
        }
    }

    /// The chained lookup without a bound; callers own the timeout
    pub(crate) async fn search_unbounded(
        &self,
        query: &SearchQuery,
        sources: &ApplicationSources,
    ) -> QueryResult<Vec<Content>> {
        let ranked = self.searcher.search(query).await?;
        if ranked.is_empty() {
            debug!(text = %query.text, "Title search returned no ids");
            return Ok(Vec::new());
        }

        let ids: BTreeSet<Id> = ranked.iter().copied().collect();
        let mut by_id: HashMap<Id, Content> = self
            .store
            .resolve_ids(&ids)
            .await?
            .into_resources()
            .into_iter()
            .map(|c| (c.id, c))
            .collect();

        let content: Vec<Content> = ranked
            .iter()
            .filter_map(|id| by_id.remove(id))
            .filter(|c| sources.is_enabled(&c.publisher))
            .collect();

        debug!(
            text = %query.text,
            ranked = ranked.len(),
            resolved = content.len(),
            "Title search resolved"
        );

        Ok(content)
    }
}
