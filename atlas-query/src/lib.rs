//! atlas-query - equivalence-aware content resolution
//!
//! Read path of Atlas: turns a [`Query`] into merged content, honouring the
//! calling application's enabled publishers and their precedence.
//!
//! Components, leaves first:
//! - [`search::TitleSearcher`]: ranked id lookup against an external title index
//! - [`search::ResolvingSearcher`]: title search + storage hydration, no merging
//! - [`resolver::MergingResolver`]: equivalence lookup + precedence merge
//! - [`executor::QueryExecutor`]: entry point, not-found semantics, outer timeout

pub mod annotation;
pub mod error;
pub mod executor;
pub mod query;
pub mod resolver;
pub mod search;

pub use annotation::Annotation;
pub use error::{QueryError, QueryResult};
pub use executor::QueryExecutor;
pub use query::{Query, QueryContext, Selection};
pub use resolver::{MergedResult, MergingResolver};
pub use search::{HttpTitleSearchClient, ResolvingSearcher, SearchQuery, TitleSearcher};
