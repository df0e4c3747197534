//! Publisher catalogue
//!
//! Publishers ("sources") are the organisations supplying content metadata.
//! The catalogue is closed: it is constructed once at process start and never
//! mutated afterwards. Components receive a handle to the [`SourceRegistry`]
//! rather than looking it up globally.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::{Error, Result};

/// A content publisher
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Publisher {
    /// Stable unique key (wire identity)
    pub key: String,
    /// ISO 3166 country code
    pub country: String,
    /// Display title
    pub title: String,
}

impl Publisher {
    pub fn new(key: impl Into<String>, country: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            country: country.into(),
            title: title.into(),
        }
    }
}

impl fmt::Display for Publisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// Built-in publisher catalogue: (key, country, title)
const BUILTIN_PUBLISHERS: &[(&str, &str, &str)] = &[
    ("bbc", "GB", "BBC"),
    ("c4", "GB", "Channel 4"),
    ("itv", "GB", "ITV"),
    ("five", "GB", "Channel 5"),
    ("pressassociation", "GB", "Press Association"),
    ("radiotimes", "GB", "Radio Times"),
    ("youview", "GB", "YouView"),
    ("bt", "GB", "BT TV"),
    ("netflix", "ALL", "Netflix"),
    ("amazon", "ALL", "Amazon Video"),
    ("itunes", "ALL", "iTunes"),
    ("youtube", "ALL", "YouTube"),
    ("rovi", "ALL", "Rovi"),
    ("musicbrainz", "ALL", "MusicBrainz"),
    ("wikipedia", "ALL", "Wikipedia"),
    ("equivalence", "ALL", "Equivalence Engine"),
];

static BUILTIN: Lazy<Arc<SourceRegistry>> = Lazy::new(|| {
    let publishers = BUILTIN_PUBLISHERS
        .iter()
        .map(|(key, country, title)| Publisher::new(*key, *country, *title));
    Arc::new(SourceRegistry::from_unique(publishers))
});

/// Immutable key → publisher mapping
#[derive(Debug, Clone)]
pub struct SourceRegistry {
    by_key: BTreeMap<String, Publisher>,
}

impl SourceRegistry {
    /// Build a registry from a publisher list
    ///
    /// # Errors
    /// Returns `Config` if two publishers share a key.
    pub fn new(publishers: impl IntoIterator<Item = Publisher>) -> Result<Self> {
        let mut by_key = BTreeMap::new();
        for publisher in publishers {
            if by_key.contains_key(&publisher.key) {
                return Err(Error::Config(format!(
                    "duplicate publisher key: {}",
                    publisher.key
                )));
            }
            by_key.insert(publisher.key.clone(), publisher);
        }
        Ok(Self { by_key })
    }

    fn from_unique(publishers: impl IntoIterator<Item = Publisher>) -> Self {
        Self {
            by_key: publishers
                .into_iter()
                .map(|p| (p.key.clone(), p))
                .collect(),
        }
    }

    /// The built-in catalogue, constructed on first use
    pub fn builtin() -> Arc<SourceRegistry> {
        Arc::clone(&BUILTIN)
    }

    /// Every known publisher, ordered by key
    pub fn all(&self) -> impl Iterator<Item = &Publisher> {
        self.by_key.values()
    }

    /// Look up a publisher by key; unknown keys yield `None`
    pub fn by_key(&self, key: &str) -> Option<&Publisher> {
        self.by_key.get(key)
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}
