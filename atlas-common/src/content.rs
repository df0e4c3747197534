//! Content and topic models, batch resolution results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

use crate::id::Id;
use crate::publisher::Publisher;
use crate::Error;

/// Anything addressed by a single [`Id`]
pub trait Identified {
    fn id(&self) -> Id;
}

/// Kind of content record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Item,
    Episode,
    Brand,
    Series,
    Film,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Item => "item",
            ContentKind::Episode => "episode",
            ContentKind::Brand => "brand",
            ContentKind::Series => "series",
            ContentKind::Film => "film",
        }
    }
}

impl FromStr for ContentKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "item" => Ok(ContentKind::Item),
            "episode" => Ok(ContentKind::Episode),
            "brand" => Ok(ContentKind::Brand),
            "series" => Ok(ContentKind::Series),
            "film" => Ok(ContentKind::Film),
            other => Err(Error::InvalidInput(format!("unknown content kind: {}", other))),
        }
    }
}

/// One publisher's record of one piece of content
///
/// Everything except identity, publisher and `last_updated` is opaque to the
/// resolution pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub id: Id,
    pub publisher: Publisher,
    pub kind: ContentKind,
    pub title: Option<String>,
    /// Timestamp of the change event that produced this state
    pub last_updated: DateTime<Utc>,
    /// Remaining attributes (images, descriptions, ...)
    #[serde(default)]
    pub attributes: serde_json::Value,
}

impl Identified for Content {
    fn id(&self) -> Id {
        self.id
    }
}

/// Publisher-scoped tag (genre, subject, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub id: Id,
    pub publisher: Publisher,
    pub namespace: String,
    pub value: String,
    pub title: Option<String>,
    pub last_updated: DateTime<Utc>,
}

impl Identified for Topic {
    fn id(&self) -> Id {
        self.id
    }
}

/// Outcome of fetching a set of ids
///
/// `resources` holds what could be hydrated; every requested id without a
/// resource is missing. Resource order is unspecified unless the producer
/// documents otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<T> {
    requested: BTreeSet<Id>,
    resources: Vec<T>,
}

impl<T: Identified> Resolved<T> {
    /// Pair requested ids with hydrated resources
    ///
    /// Resources whose id was not requested, and repeats of an id, are
    /// discarded so each resource maps to exactly one requested id.
    pub fn new(requested: BTreeSet<Id>, resources: impl IntoIterator<Item = T>) -> Self {
        let mut seen = BTreeSet::new();
        let resources = resources
            .into_iter()
            .filter(|r| requested.contains(&r.id()) && seen.insert(r.id()))
            .collect();
        Self {
            requested,
            resources,
        }
    }

    pub fn empty(requested: BTreeSet<Id>) -> Self {
        Self {
            requested,
            resources: Vec::new(),
        }
    }

    pub fn requested(&self) -> &BTreeSet<Id> {
        &self.requested
    }

    pub fn resources(&self) -> &[T] {
        &self.resources
    }

    pub fn into_resources(self) -> Vec<T> {
        self.resources
    }

    /// Requested ids with no resource
    pub fn missing(&self) -> BTreeSet<Id> {
        let found: BTreeSet<Id> = self.resources.iter().map(Identified::id).collect();
        self.requested.difference(&found).copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Apply a transformation, dropping resources it rejects
    pub fn filter_map<U: Identified>(self, f: impl FnMut(T) -> Option<U>) -> Resolved<U> {
        let resources: Vec<U> = self.resources.into_iter().filter_map(f).collect();
        Resolved::new(self.requested, resources)
    }
}
