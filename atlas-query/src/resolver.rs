//! Equivalence merging resolver
//!
//! For every requested id the resolver asks the equivalence index for the
//! closed equivalence set restricted to the application's enabled publishers,
//! hydrates every candidate from storage, and picks one representative.
//!
//! # Merge Rule
//! 1. Candidates from disabled publishers are discarded
//! 2. Highest-precedence enabled publisher wins
//! 3. Within one publisher, the requested id itself wins, then the lowest id
//! 4. With `all_equivalents` the losing candidates are kept as secondaries,
//!    in the same order
//!
//! An id whose restricted set is empty is missing, never an error.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

use atlas_common::store::{ContentStore, EquivalenceIndex};
use atlas_common::{ApplicationSources, Content, Id, Identified, Resolved};

use crate::annotation::{retains_all_equivalents, Annotation};
use crate::error::QueryResult;

/// One requested id after merging its equivalence set
#[derive(Debug, Clone, PartialEq)]
pub struct MergedResult {
    /// The id that was asked for
    pub id: Id,
    /// Chosen representation
    pub primary: Content,
    /// Other representations, only when `all_equivalents` was requested
    pub equivalents: Vec<Content>,
    /// Restricted equivalence set the primary was chosen from
    pub equivalent_ids: BTreeSet<Id>,
}

impl MergedResult {
    /// Wrap a single entity without consulting the equivalence index
    pub fn unmerged(content: Content) -> Self {
        Self {
            id: content.id,
            equivalent_ids: BTreeSet::from([content.id]),
            primary: content,
            equivalents: Vec::new(),
        }
    }
}

impl Identified for MergedResult {
    fn id(&self) -> Id {
        self.id
    }
}

/// Resolves ids to merged results through the equivalence index
#[derive(Clone)]
pub struct MergingResolver {
    index: Arc<dyn EquivalenceIndex>,
    store: Arc<dyn ContentStore>,
}

impl MergingResolver {
    pub fn new(index: Arc<dyn EquivalenceIndex>, store: Arc<dyn ContentStore>) -> Self {
        Self { index, store }
    }

    /// Resolve and merge `ids` for an application
    ///
    /// One index lookup and one storage batch cover all requested ids. The
    /// result is keyed by requested id; resource order is unspecified.
    pub async fn resolve_ids(
        &self,
        ids: &BTreeSet<Id>,
        sources: &ApplicationSources,
        annotations: &BTreeSet<Annotation>,
    ) -> QueryResult<Resolved<MergedResult>> {
        if ids.is_empty() || sources.is_empty() {
            return Ok(Resolved::empty(ids.clone()));
        }

        let sets = self.index.lookup(ids, &sources.enabled()).await?;
        if sets.is_empty() {
            debug!(requested = ids.len(), "No equivalence sets for requested ids");
            return Ok(Resolved::empty(ids.clone()));
        }

        let candidates: BTreeSet<Id> = sets.values().flatten().copied().collect();
        let hydrated: HashMap<Id, Content> = self
            .store
            .resolve_ids(&candidates)
            .await?
            .into_resources()
            .into_iter()
            .map(|c| (c.id, c))
            .collect();

        let retain = retains_all_equivalents(annotations);
        let merged: Vec<MergedResult> = sets
            .into_iter()
            .filter_map(|(requested, set)| merge(requested, set, &hydrated, sources, retain))
            .collect();

        debug!(
            requested = ids.len(),
            candidates = candidates.len(),
            hydrated = hydrated.len(),
            merged = merged.len(),
            "Merged equivalence sets"
        );

        Ok(Resolved::new(ids.clone(), merged))
    }
}

/// Choose the representative of one equivalence set
fn merge(
    requested: Id,
    set: BTreeSet<Id>,
    hydrated: &HashMap<Id, Content>,
    sources: &ApplicationSources,
    retain: bool,
) -> Option<MergedResult> {
    let mut candidates: Vec<(usize, &Content)> = set
        .iter()
        .filter_map(|id| hydrated.get(id))
        .filter_map(|c| sources.rank(&c.publisher).map(|rank| (rank, c)))
        .collect();

    candidates.sort_by_key(|(rank, c)| (*rank, c.id != requested, c.id));

    let mut ordered = candidates.into_iter().map(|(_, c)| c);
    let primary = ordered.next()?.clone();
    let equivalents = if retain {
        ordered.cloned().collect()
    } else {
        Vec::new()
    };

    Some(MergedResult {
        id: requested,
        primary,
        equivalents,
        equivalent_ids: set,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlas_common::{ContentKind, Publisher};
    use chrono::Utc;

    fn publisher(key: &str) -> Publisher {
        Publisher::new(key, "GB", key.to_uppercase())
    }

    fn content(id: u64, key: &str) -> Content {
        Content {
            id: Id::new(id).unwrap(),
            publisher: publisher(key),
            kind: ContentKind::Item,
            title: None,
            last_updated: Utc::now(),
            attributes: serde_json::Value::Null,
        }
    }

    fn hydrated(items: &[Content]) -> HashMap<Id, Content> {
        items.iter().map(|c| (c.id, c.clone())).collect()
    }

    fn set(values: &[u64]) -> BTreeSet<Id> {
        values.iter().map(|v| Id::new(*v).unwrap()).collect()
    }

    #[test]
    fn test_requested_id_wins_within_publisher() {
        let items = [content(1, "x"), content(2, "x"), content(3, "y")];
        let sources = ApplicationSources::new(vec![publisher("x"), publisher("y")]);

        let merged = merge(Id::new(2).unwrap(), set(&[1, 2, 3]), &hydrated(&items), &sources, true).unwrap();
        assert_eq!(merged.primary.id, Id::new(2).unwrap());
        let secondaries: Vec<u64> = merged.equivalents.iter().map(|c| c.id.value()).collect();
        assert_eq!(secondaries, vec![1, 3]);
    }

    #[test]
    fn test_lowest_id_breaks_ties_for_other_publishers() {
        let items = [content(7, "x"), content(4, "x"), content(1, "y")];
        let sources = ApplicationSources::new(vec![publisher("x"), publisher("y")]);

        let merged = merge(Id::new(1).unwrap(), set(&[1, 4, 7]), &hydrated(&items), &sources, false).unwrap();
        assert_eq!(merged.primary.id, Id::new(4).unwrap());
        assert!(merged.equivalents.is_empty());
    }

    #[test]
    fn test_unhydrated_and_disabled_candidates_dropped() {
        let items = [content(1, "x"), content(2, "z")];
        let sources = ApplicationSources::new(vec![publisher("y")]);

        assert!(merge(Id::new(1).unwrap(), set(&[1, 2, 3]), &hydrated(&items), &sources, true).is_none());
    }
}
