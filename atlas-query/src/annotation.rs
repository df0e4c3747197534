//! Output annotations
//!
//! Annotations name the detail a caller wants back. Most of them only matter to
//! the output layer; the resolution pipeline looks at the equivalence ones.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use atlas_common::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Annotation {
    Id,
    Description,
    Extended,
    Images,
    Topics,
    /// Merge search results across equivalent records
    Equivalents,
    /// Keep every equivalent record as a secondary representation
    AllEquivalents,
}

impl Annotation {
    pub const ALL: [Annotation; 7] = [
        Annotation::Id,
        Annotation::Description,
        Annotation::Extended,
        Annotation::Images,
        Annotation::Topics,
        Annotation::Equivalents,
        Annotation::AllEquivalents,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Annotation::Id => "id",
            Annotation::Description => "description",
            Annotation::Extended => "extended",
            Annotation::Images => "images",
            Annotation::Topics => "topics",
            Annotation::Equivalents => "equivalents",
            Annotation::AllEquivalents => "all_equivalents",
        }
    }

    /// Parse a comma separated list such as `"description,images"`
    ///
    /// Blank entries are ignored; unknown keys are an error.
    pub fn parse_list(list: &str) -> Result<BTreeSet<Annotation>, Error> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .collect()
    }
}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Annotation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Annotation::ALL
            .iter()
            .find(|a| a.key() == s)
            .copied()
            .ok_or_else(|| Error::InvalidInput(format!("unknown annotation: {}", s)))
    }
}

/// Whether secondaries are kept when merging
pub fn retains_all_equivalents(annotations: &BTreeSet<Annotation>) -> bool {
    annotations.contains(&Annotation::AllEquivalents)
}

/// Whether search results go through the merging resolver
pub fn wants_equivalence(annotations: &BTreeSet<Annotation>) -> bool {
    annotations.contains(&Annotation::Equivalents) || retains_all_equivalents(annotations)
}
