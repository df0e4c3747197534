//! Update handlers
//!
//! A decoded [`ChangeEvent`] becomes one [`EntityUpdate`]; [`Handlers`] holds
//! one writer per entity type and applies the update through that writer's
//! conditional write. The outcome names the ids whose equivalence sets must
//! be recomputed; the stores record those requests together with the write.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

use atlas_common::events::{ContentPayload, EquivalencePayload, TopicPayload};
use atlas_common::store::{ContentStore, EquivalenceAssertions, TopicStore};
use atlas_common::{ChangeEvent, Content, EntityType, Id, Publisher, SourceRegistry, Topic};

use crate::error::{IngestError, IngestResult};

/// Replacement of a subject's asserted equivalents
#[derive(Debug, Clone, PartialEq)]
pub struct EquivalenceUpdate {
    pub subject: Id,
    pub equivalents: BTreeSet<Id>,
    pub source: Publisher,
    pub timestamp: DateTime<Utc>,
}

/// Typed update carried by a change event
#[derive(Debug, Clone, PartialEq)]
pub enum EntityUpdate {
    Content(Content),
    Topic(Topic),
    Equivalence(EquivalenceUpdate),
}

impl EntityUpdate {
    /// Interpret an event
    ///
    /// # Errors
    /// `Malformed` when the source is not a known publisher or the payload
    /// does not match the entity type.
    pub fn from_event(event: &ChangeEvent, registry: &SourceRegistry) -> IngestResult<Self> {
        let publisher = registry
            .by_key(&event.source)
            .cloned()
            .ok_or_else(|| IngestError::Malformed(format!("unknown source: {}", event.source)))?;

        let update = match event.entity_type {
            EntityType::Content => {
                let payload: ContentPayload = event.payload_as()?;
                EntityUpdate::Content(Content {
                    id: event.entity_id,
                    publisher,
                    kind: payload.kind,
                    title: payload.title,
                    last_updated: event.timestamp,
                    attributes: payload.attributes,
                })
            }
            EntityType::Topic => {
                let payload: TopicPayload = event.payload_as()?;
                EntityUpdate::Topic(Topic {
                    id: event.entity_id,
                    publisher,
                    namespace: payload.namespace,
                    value: payload.value,
                    title: payload.title,
                    last_updated: event.timestamp,
                })
            }
            EntityType::Equivalence => {
                let payload: EquivalencePayload = event.payload_as()?;
                EntityUpdate::Equivalence(EquivalenceUpdate {
                    subject: event.entity_id,
                    equivalents: payload
                        .equivalents
                        .into_iter()
                        .filter(|id| *id != event.entity_id)
                        .collect(),
                    source: publisher,
                    timestamp: event.timestamp,
                })
            }
        };

        Ok(update)
    }

    pub fn entity_id(&self) -> Id {
        match self {
            EntityUpdate::Content(content) => content.id,
            EntityUpdate::Topic(topic) => topic.id,
            EntityUpdate::Equivalence(update) => update.subject,
        }
    }

    pub fn entity_type(&self) -> EntityType {
        match self {
            EntityUpdate::Content(_) => EntityType::Content,
            EntityUpdate::Topic(_) => EntityType::Topic,
            EntityUpdate::Equivalence(_) => EntityType::Equivalence,
        }
    }
}

/// Result of applying one update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Stored state changed; refresh was requested for these ids
    Applied { refresh: BTreeSet<Id> },
    /// Stored state was at least as new; nothing changed
    Stale,
}

/// Writer per entity type
#[derive(Clone)]
pub struct Handlers {
    content: Arc<dyn ContentStore>,
    topics: Arc<dyn TopicStore>,
    equivalence: Arc<dyn EquivalenceAssertions>,
}

impl Handlers {
    pub fn new(
        content: Arc<dyn ContentStore>,
        topics: Arc<dyn TopicStore>,
        equivalence: Arc<dyn EquivalenceAssertions>,
    ) -> Self {
        Self {
            content,
            topics,
            equivalence,
        }
    }

    /// Apply `update` with its type's conditional write
    pub async fn apply(&self, update: &EntityUpdate) -> IngestResult<Outcome> {
        let outcome = match update {
            EntityUpdate::Content(content) => {
                if self.content.write_if_newer(content).await? {
                    Outcome::Applied {
                        refresh: BTreeSet::from([content.id]),
                    }
                } else {
                    Outcome::Stale
                }
            }
            EntityUpdate::Topic(topic) => {
                if self.topics.write_if_newer(topic).await? {
                    Outcome::Applied {
                        refresh: BTreeSet::new(),
                    }
                } else {
                    Outcome::Stale
                }
            }
            EntityUpdate::Equivalence(update) => {
                let previous = self
                    .equivalence
                    .assert_if_newer(update.subject, &update.equivalents, &update.source, update.timestamp)
                    .await?;

                match previous {
                    Some(previous) => {
                        let mut refresh = previous;
                        refresh.extend(update.equivalents.iter().copied());
                        refresh.insert(update.subject);
                        Outcome::Applied { refresh }
                    }
                    None => Outcome::Stale,
                }
            }
        };

        debug!(
            entity_id = %update.entity_id(),
            entity_type = update.entity_type().as_str(),
            applied = matches!(outcome, Outcome::Applied { .. }),
            "Update handled"
        );

        Ok(outcome)
    }
}
