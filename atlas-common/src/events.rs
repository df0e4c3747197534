//! Change events consumed by the ingestion worker
//!
//! Upstream producers publish one [`ChangeEvent`] per entity creation or
//! update. Delivery is at-least-once and unordered across partitions, so the
//! `timestamp` is what decides whether an event still has an effect.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::content::ContentKind;
use crate::id::Id;
use crate::{Error, Result};

/// Entity kind discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Content,
    Topic,
    Equivalence,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Content => "content",
            EntityType::Topic => "topic",
            EntityType::Equivalence => "equivalence",
        }
    }
}

/// Entity change notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Producer-assigned id, for log correlation only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<Uuid>,
    /// Subject entity
    pub entity_id: Id,
    /// When the change happened at the producer
    pub timestamp: DateTime<Utc>,
    pub entity_type: EntityType,
    /// Originating publisher key
    pub source: String,
    /// Entity-type specific body
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl ChangeEvent {
    /// Decode a raw broker message
    ///
    /// # Errors
    /// Returns `MalformedEvent` if the bytes are not a valid event.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::MalformedEvent(e.to_string()))
    }

    /// Encode for publication
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Internal(e.to_string()))
    }

    /// Interpret the payload as a typed body
    ///
    /// # Errors
    /// Returns `MalformedEvent` if the payload does not match `T`.
    pub fn payload_as<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            Error::MalformedEvent(format!(
                "{} payload for {}: {}",
                self.entity_type.as_str(),
                self.entity_id,
                e
            ))
        })
    }
}

/// Payload of a `content` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentPayload {
    pub kind: ContentKind,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub attributes: serde_json::Value,
}

/// Payload of a `topic` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicPayload {
    pub namespace: String,
    pub value: String,
    #[serde(default)]
    pub title: Option<String>,
}

/// Payload of an `equivalence` event: the subject's full current assertion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquivalencePayload {
    pub equivalents: Vec<Id>,
}
