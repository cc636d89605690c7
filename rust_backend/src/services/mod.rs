//! Service layer: the production metrics aggregation engine.
//!
//! The engine sits between the source traits in [`crate::db`] and whatever
//! presentation layer renders its output. Components, leaf first:
//!
//! - [`schema`]: database discovery and table classification
//! - [`scanner`]: per-table raw event aggregation
//! - [`reconciler`]: break-log replay into active working time
//! - [`metrics`] and [`stats`]: cycle time, utilization and diagnostics
//! - [`orchestrator`]: batched concurrent execution of all table tasks
//! - [`grouping`]: per-operator grouping, summaries and rowspans

pub mod grouping;
pub mod metrics;
pub mod orchestrator;
pub mod reconciler;
pub mod scanner;
pub mod schema;
pub mod stats;

use crate::db::repository::RepositoryError;

pub use grouping::{group_and_summarize, sort_records, GroupedReport, OperatorSummary, SortOrder};
pub use orchestrator::{AggregationEngine, AggregationOutput, EngineConfig};
pub use reconciler::{FallbackReason, ReconciliationResult, Reconciler};
pub use schema::{SchemaConfig, TableCapability};

/// Errors the engine surfaces to its callers.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The requested database is not among the discovered ones.
    #[error("Database '{name}' not found (available: {})", .available.join(", "))]
    DatabaseNotFound { name: String, available: Vec<String> },

    #[error("Configuration error: {0}")]
    Configuration(#[from] RepositoryError),
}

pub type EngineResult<T> = Result<T, EngineError>;
