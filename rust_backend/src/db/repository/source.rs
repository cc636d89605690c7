//! Source traits consumed by the aggregation engine.
//!
//! A [`ConnectionFactory`] hands out exclusively owned [`SourceConnection`]s.
//! Each scan worker holds exactly one connection for the lifetime of its
//! batch, so connections are `Send` but never shared between threads.

use chrono::{DateTime, FixedOffset};

use super::error::RepositoryResult;
use crate::models::{BreakLogEvent, ColumnInfo, ProductionWindow, RawEvent, TableTask};

/// One live connection to the production database server.
///
/// All operations are read-only.
pub trait SourceConnection: Send {
    /// All database names visible to the connection, unfiltered.
    fn list_databases(&mut self) -> RepositoryResult<Vec<String>>;

    /// All table names of one database.
    fn list_tables(&mut self, database: &str) -> RepositoryResult<Vec<String>>;

    /// Declared columns of one table, in declaration order.
    fn describe_columns(&mut self, database: &str, table: &str)
        -> RepositoryResult<Vec<ColumnInfo>>;

    /// Raw `status = 1` events whose `date_column` lies inside
    /// `[window.prod_start, window.prod_end]`, ordered by timestamp.
    fn fetch_events(
        &mut self,
        task: &TableTask,
        date_column: &str,
        window: &ProductionWindow,
    ) -> RepositoryResult<Vec<RawEvent>>;

    /// Target process time for a `(model, station)` pair, if one is defined.
    fn fetch_target_time(&mut self, model: &str, station: &str) -> RepositoryResult<Option<f64>>;

    /// Break-log events of the given operators between the instants `from`
    /// and `to` (inclusive), ordered by timestamp. Sources convert the bounds
    /// into the break log's own clock. Sources without a break log return an
    /// empty list.
    fn fetch_break_log(
        &mut self,
        operator_ids: &[String],
        from: DateTime<FixedOffset>,
        to: DateTime<FixedOffset>,
    ) -> RepositoryResult<Vec<BreakLogEvent>>;

    /// The subset of `operator_ids` with at least one break-log event at any
    /// time.
    fn operators_in_break_log(&mut self, operator_ids: &[String]) -> RepositoryResult<Vec<String>>;
}

/// Creates source connections. Implementations must be thread-safe.
pub trait ConnectionFactory: Send + Sync {
    /// Open one connection. The caller owns it and drops it when done.
    fn get_connection(&self) -> RepositoryResult<Box<dyn SourceConnection>>;

    /// Check whether a connection can be established.
    fn health_check(&self) -> RepositoryResult<bool> {
        self.get_connection().map(|_| true)
    }
}
