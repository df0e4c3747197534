//! Ingestion worker
//!
//! Turns one raw broker message into an acknowledgement decision. The worker
//! keeps no state between messages: ordering and duplicate suppression come
//! entirely from the conditional writes behind [`Handlers`], which also record
//! the resulting index refresh requests.

use std::sync::Arc;
use tracing::{debug, warn};

use atlas_common::{ChangeEvent, SourceRegistry};

use crate::error::{IngestError, IngestResult};
use crate::handlers::{EntityUpdate, Handlers, Outcome};
use crate::refresh::RefreshHandle;

/// Broker acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// Done with the message, applied or permanently dropped
    Ack,
    /// Hand the message back for redelivery
    Nack,
}

pub struct IngestWorker {
    registry: Arc<SourceRegistry>,
    handlers: Handlers,
    refresher: RefreshHandle,
}

impl IngestWorker {
    pub fn new(registry: Arc<SourceRegistry>, handlers: Handlers, refresher: RefreshHandle) -> Self {
        Self {
            registry,
            handlers,
            refresher,
        }
    }

    /// Process one message
    ///
    /// Malformed messages and stale events are acked; transient failures are
    /// nacked.
    pub async fn on_message(&self, bytes: &[u8]) -> Ack {
        match self.process(bytes).await {
            Ok(_) => Ack::Ack,
            Err(IngestError::Malformed(reason)) => {
                warn!(bytes = bytes.len(), reason = %reason, "Dropping malformed message");
                Ack::Ack
            }
            Err(IngestError::Transient(reason)) => {
                warn!(reason = %reason, "Message processing failed, requesting redelivery");
                Ack::Nack
            }
        }
    }

    async fn process(&self, bytes: &[u8]) -> IngestResult<Outcome> {
        let event = ChangeEvent::decode(bytes)?;
        let update = EntityUpdate::from_event(&event, &self.registry)?;
        let outcome = self.handlers.apply(&update).await?;

        match &outcome {
            Outcome::Applied { refresh } => {
                if !refresh.is_empty() {
                    self.refresher.notify();
                }
                debug!(
                    event_id = ?event.event_id,
                    entity_id = %event.entity_id,
                    entity_type = event.entity_type.as_str(),
                    refresh = refresh.len(),
                    "Change event applied"
                );
            }
            Outcome::Stale => {
                debug!(
                    event_id = ?event.event_id,
                    entity_id = %event.entity_id,
                    entity_type = event.entity_type.as_str(),
                    timestamp = %event.timestamp,
                    "Stale change event discarded"
                );
            }
        }

        Ok(outcome)
    }
}
