//! Query and context types

use std::collections::{BTreeSet, HashSet};

use atlas_common::{ApplicationSources, Id};

use crate::annotation::Annotation;

/// Default page size when a selection gives no limit
pub const DEFAULT_LIMIT: usize = 50;

/// Hard ceiling on page size
pub const MAX_LIMIT: usize = 100;

/// Offset/limit page selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub offset: usize,
    pub limit: usize,
}

impl Default for Selection {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl Selection {
    /// Build a selection; `limit` is clamped to `1..=MAX_LIMIT`
    pub fn new(offset: usize, limit: Option<usize>) -> Self {
        Self {
            offset,
            limit: limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
        }
    }

    /// Apply to an already ordered list
    pub fn apply<T: Clone>(&self, items: &[T]) -> Vec<T> {
        items
            .iter()
            .skip(self.offset)
            .take(self.limit)
            .cloned()
            .collect()
    }
}

/// What to resolve
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// Exactly one item; absence is an error
    Single(Id),
    /// Whichever of these exist; absence is an empty page
    Multiple { ids: Vec<Id>, selection: Selection },
    /// Free-text title search
    Search { text: String, selection: Selection },
}

impl Query {
    pub fn multiple(ids: impl IntoIterator<Item = Id>) -> Self {
        Query::Multiple {
            ids: ids.into_iter().collect(),
            selection: Selection::default(),
        }
    }

    pub fn search(text: impl Into<String>) -> Self {
        Query::Search {
            text: text.into(),
            selection: Selection::default(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Query::Single(_) => "single",
            Query::Multiple { .. } => "multiple",
            Query::Search { .. } => "search",
        }
    }
}

/// Requested ids of a multi-id query: de-duplicated in first-seen order, then paged
pub(crate) fn select_ids(ids: &[Id], selection: &Selection) -> BTreeSet<Id> {
    let mut seen = HashSet::new();
    let unique: Vec<Id> = ids.iter().copied().filter(|id| seen.insert(*id)).collect();
    selection.apply(&unique).into_iter().collect()
}

/// Who is asking and what detail they want
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    pub sources: ApplicationSources,
    pub annotations: BTreeSet<Annotation>,
}

impl QueryContext {
    pub fn new(sources: ApplicationSources, annotations: impl IntoIterator<Item = Annotation>) -> Self {
        Self {
            sources,
            annotations: annotations.into_iter().collect(),
        }
    }
}
