//! # Atlas Common Library
//!
//! Shared code for the Atlas resolution and ingestion services including:
//! - Identifiers and the publisher catalogue
//! - Application source configuration (enabled publishers, precedence)
//! - Content and topic models, `Resolved<T>`
//! - Change event types consumed by the ingestion worker
//! - Storage / equivalence index contracts and their SQLite backends
//! - Configuration loading

pub mod application;
pub mod config;
pub mod content;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod events;
pub mod id;
pub mod publisher;
pub mod store;
pub mod time;

pub use application::ApplicationSources;
pub use content::{Content, ContentKind, Identified, Resolved, Topic};
pub use error::{Error, Result};
pub use events::{ChangeEvent, EntityType};
pub use id::Id;
pub use publisher::{Publisher, SourceRegistry};
