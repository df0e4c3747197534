//! Application source configuration
//!
//! Each calling application sees content only from the publishers it has
//! enabled. When several equivalent records exist, the enabled publisher that
//! appears earliest in the configuration wins.

use serde::Deserialize;
use std::collections::BTreeSet;

use crate::publisher::{Publisher, SourceRegistry};
use crate::{Error, Result};

/// Enabled publishers in precedence order (first = highest)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplicationSources {
    precedence: Vec<Publisher>,
}

/// Serialized form: publisher keys in precedence order
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApplicationSourcesConfig {
    #[serde(default)]
    pub enabled: Vec<String>,
}

impl ApplicationSources {
    /// Build from publishers in precedence order
    ///
    /// Repeated publishers keep their first (highest) position.
    pub fn new(precedence: impl IntoIterator<Item = Publisher>) -> Self {
        let mut seen = BTreeSet::new();
        let precedence = precedence
            .into_iter()
            .filter(|p| seen.insert(p.key.clone()))
            .collect();
        Self { precedence }
    }

    /// Build from publisher keys, validating them against the catalogue
    ///
    /// # Errors
    /// Returns `Config` naming the first key the registry does not know.
    pub fn from_keys<S: AsRef<str>>(registry: &SourceRegistry, keys: &[S]) -> Result<Self> {
        let publishers = keys
            .iter()
            .map(|key| {
                registry
                    .by_key(key.as_ref())
                    .cloned()
                    .ok_or_else(|| Error::Config(format!("unknown publisher key: {}", key.as_ref())))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(publishers))
    }

    pub fn from_config(registry: &SourceRegistry, config: &ApplicationSourcesConfig) -> Result<Self> {
        Self::from_keys(registry, &config.enabled)
    }

    /// Enabled publishers, highest precedence first
    pub fn precedence(&self) -> &[Publisher] {
        &self.precedence
    }

    /// Enabled publishers as a set
    pub fn enabled(&self) -> BTreeSet<Publisher> {
        self.precedence.iter().cloned().collect()
    }

    pub fn is_enabled(&self, publisher: &Publisher) -> bool {
        self.rank(publisher).is_some()
    }

    /// Precedence rank (0 = highest); `None` for disabled publishers
    pub fn rank(&self, publisher: &Publisher) -> Option<usize> {
        self.precedence.iter().position(|p| p.key == publisher.key)
    }

    pub fn is_empty(&self) -> bool {
        self.precedence.is_empty()
    }
}
