//! # Atlas Ingest
//!
//! Write path of the Atlas pipeline: consumes change events from a durable,
//! partitioned broker, applies them idempotently to content, topic and
//! equivalence storage, and keeps the equivalence index eventually
//! consistent through a background refresh queue.

pub mod broker;
pub mod error;
pub mod handlers;
pub mod pool;
pub mod refresh;
pub mod worker;

pub use broker::{BrokerSettings, Delivery, SqliteBroker, Subscription};
pub use error::{IngestError, IngestResult};
pub use handlers::{EntityUpdate, EquivalenceUpdate, Handlers, Outcome};
pub use pool::IngestPool;
pub use refresh::{IndexRefresher, RefreshHandle, RefreshSettings};
pub use worker::{Ack, IngestWorker};
