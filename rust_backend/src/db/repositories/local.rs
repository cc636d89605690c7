//! In-memory local source implementation.
//!
//! This module provides a local implementation of the source traits suitable
//! for unit testing and local development. Databases, tables, target times
//! and break-log events live in memory; failures can be injected per table,
//! per lookup, or per connection to exercise the engine's fault isolation.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDateTime};
use parking_lot::RwLock;

use crate::db::repository::{
    ConnectionFactory, ErrorContext, RepositoryError, RepositoryResult, SourceConnection,
};
use crate::models::{BreakLogEvent, ColumnInfo, ProductionWindow, RawEvent, TableTask};

/// Column layout of a standard production table.
pub fn production_table_columns() -> Vec<ColumnInfo> {
    vec![
        ColumnInfo::new("id", "int"),
        ColumnInfo::new("operator_id", "varchar(64)"),
        ColumnInfo::new("serial_num", "varchar(64)"),
        ColumnInfo::new("status", "tinyint"),
        ColumnInfo::new("scan_time", "datetime"),
    ]
}

/// A row of an in-memory table.
#[derive(Debug, Clone)]
pub struct LocalRow {
    pub operator_id: String,
    pub serial_num: String,
    pub status: i32,
    pub timestamp: NaiveDateTime,
}

#[derive(Debug, Clone, Default)]
struct LocalTable {
    columns: Vec<ColumnInfo>,
    rows: Vec<LocalRow>,
}

struct LocalData {
    databases: BTreeMap<String, BTreeMap<String, LocalTable>>,
    target_times: HashMap<(String, String), f64>,
    break_log: Vec<BreakLogEvent>,

    // Fault injection
    failing_tables: HashSet<(String, String)>,
    failing_target_lookup: bool,
    failing_break_log: bool,
    connection_limit: Option<usize>,
    is_healthy: bool,
}

impl Default for LocalData {
    fn default() -> Self {
        Self {
            databases: BTreeMap::new(),
            target_times: HashMap::new(),
            break_log: Vec::new(),
            failing_tables: HashSet::new(),
            failing_target_lookup: false,
            failing_break_log: false,
            connection_limit: None,
            is_healthy: true,
        }
    }
}

/// In-memory local source.
///
/// # Example
/// ```
/// use prod_metrics::db::repositories::LocalRepository;
///
/// let repo = LocalRepository::new();
/// repo.add_production_table("acme", "acme_final");
/// assert!(repo.has_table("acme", "acme_final"));
/// ```
#[derive(Clone)]
pub struct LocalRepository {
    data: Arc<RwLock<LocalData>>,
    connections_opened: Arc<AtomicUsize>,
}

impl Default for LocalRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalRepository {
    /// Create a new empty local source.
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(LocalData::default())),
            connections_opened: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Register an empty database.
    pub fn add_database(&self, database: &str) {
        self.data
            .write()
            .databases
            .entry(database.to_string())
            .or_default();
    }

    /// Register a table with an arbitrary column layout.
    pub fn add_table(&self, database: &str, table: &str, columns: Vec<ColumnInfo>) {
        let mut data = self.data.write();
        let tables = data.databases.entry(database.to_string()).or_default();
        tables.insert(
            table.to_string(),
            LocalTable {
                columns,
                rows: Vec::new(),
            },
        );
    }

    /// Register a table with the standard production columns.
    pub fn add_production_table(&self, database: &str, table: &str) {
        self.add_table(database, table, production_table_columns());
    }

    /// Append a row to an existing table. Rows for unknown tables are dropped.
    pub fn insert_row(&self, database: &str, table: &str, row: LocalRow) {
        let mut data = self.data.write();
        if let Some(t) = data
            .databases
            .get_mut(database)
            .and_then(|tables| tables.get_mut(table))
        {
            t.rows.push(row);
        }
    }

    /// Append a `status = 1` event.
    pub fn insert_event(
        &self,
        database: &str,
        table: &str,
        operator_id: &str,
        serial_num: &str,
        timestamp: NaiveDateTime,
    ) {
        self.insert_row(
            database,
            table,
            LocalRow {
                operator_id: operator_id.to_string(),
                serial_num: serial_num.to_string(),
                status: 1,
                timestamp,
            },
        );
    }

    /// Define the target time of a `(model, station)` pair.
    pub fn set_target_time(&self, model: &str, station: &str, value: f64) {
        self.data
            .write()
            .target_times
            .insert((model.to_uppercase(), station.to_uppercase()), value);
    }

    /// Append a break-log event.
    pub fn add_break_log_event(&self, event: BreakLogEvent) {
        let mut data = self.data.write();
        data.break_log.push(event);
        data.break_log.sort_by_key(|e| e.timestamp);
    }

    /// Make every query against a table fail.
    pub fn fail_table(&self, database: &str, table: &str) {
        self.data
            .write()
            .failing_tables
            .insert((database.to_string(), table.to_string()));
    }

    /// Make target-time lookups fail.
    pub fn fail_target_lookup(&self, fail: bool) {
        self.data.write().failing_target_lookup = fail;
    }

    /// Make break-log fetches fail.
    pub fn fail_break_log(&self, fail: bool) {
        self.data.write().failing_break_log = fail;
    }

    /// Refuse connections once `limit` have been opened.
    pub fn set_connection_limit(&self, limit: Option<usize>) {
        self.data.write().connection_limit = limit;
    }

    /// Set the health status for testing connection failures.
    pub fn set_healthy(&self, healthy: bool) {
        self.data.write().is_healthy = healthy;
    }

    /// Number of connection attempts so far, refused ones included.
    pub fn connections_opened(&self) -> usize {
        self.connections_opened.load(Ordering::SeqCst)
    }

    pub fn has_table(&self, database: &str, table: &str) -> bool {
        self.data
            .read()
            .databases
            .get(database)
            .is_some_and(|tables| tables.contains_key(table))
    }
}

impl ConnectionFactory for LocalRepository {
    fn get_connection(&self) -> RepositoryResult<Box<dyn SourceConnection>> {
        let data = self.data.read();
        if !data.is_healthy {
            return Err(RepositoryError::connection("Local source marked unhealthy"));
        }

        let opened = self.connections_opened.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = data.connection_limit {
            if opened >= limit {
                return Err(RepositoryError::connection_with_context(
                    "Too many connections",
                    ErrorContext::new("get_connection").with_details(format!("limit={}", limit)),
                ));
            }
        }

        Ok(Box::new(LocalConnection {
            data: Arc::clone(&self.data),
        }))
    }
}

/// Connection handed out by [`LocalRepository`].
struct LocalConnection {
    data: Arc<RwLock<LocalData>>,
}

impl LocalConnection {
    fn check_table(data: &LocalData, database: &str, table: &str) -> RepositoryResult<()> {
        if data
            .failing_tables
            .contains(&(database.to_string(), table.to_string()))
        {
            return Err(RepositoryError::query_with_context(
                "SELECT command denied",
                ErrorContext::new("query_table")
                    .with_entity("table")
                    .with_entity_id(format!("{}.{}", database, table)),
            ));
        }
        Ok(())
    }

    fn table<'a>(
        data: &'a LocalData,
        database: &str,
        table: &str,
    ) -> RepositoryResult<&'a LocalTable> {
        data.databases
            .get(database)
            .and_then(|tables| tables.get(table))
            .ok_or_else(|| {
                RepositoryError::not_found_with_context(
                    format!("Table {}.{} doesn't exist", database, table),
                    ErrorContext::new("query_table").with_entity("table"),
                )
            })
    }
}

impl SourceConnection for LocalConnection {
    fn list_databases(&mut self) -> RepositoryResult<Vec<String>> {
        Ok(self.data.read().databases.keys().cloned().collect())
    }

    fn list_tables(&mut self, database: &str) -> RepositoryResult<Vec<String>> {
        let data = self.data.read();
        data.databases
            .get(database)
            .map(|tables| tables.keys().cloned().collect())
            .ok_or_else(|| {
                RepositoryError::not_found_with_context(
                    format!("Unknown database '{}'", database),
                    ErrorContext::new("list_tables").with_entity("database"),
                )
            })
    }

    fn describe_columns(
        &mut self,
        database: &str,
        table: &str,
    ) -> RepositoryResult<Vec<ColumnInfo>> {
        let data = self.data.read();
        Self::check_table(&data, database, table)?;
        Ok(Self::table(&data, database, table)?.columns.clone())
    }

    fn fetch_events(
        &mut self,
        task: &TableTask,
        _date_column: &str,
        window: &ProductionWindow,
    ) -> RepositoryResult<Vec<RawEvent>> {
        let data = self.data.read();
        Self::check_table(&data, &task.database_name, &task.table_name)?;
        let table = Self::table(&data, &task.database_name, &task.table_name)?;

        let mut events: Vec<RawEvent> = table
            .rows
            .iter()
            .filter(|row| row.status == 1 && window.contains(row.timestamp))
            .map(|row| RawEvent {
                operator_id: row.operator_id.clone(),
                serial_num: row.serial_num.clone(),
                timestamp: row.timestamp,
            })
            .collect();
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }

    fn fetch_target_time(&mut self, model: &str, station: &str) -> RepositoryResult<Option<f64>> {
        let data = self.data.read();
        if data.failing_target_lookup {
            return Err(RepositoryError::query("target_time table unavailable"));
        }
        Ok(data
            .target_times
            .get(&(model.to_uppercase(), station.to_uppercase()))
            .copied())
    }

    fn fetch_break_log(
        &mut self,
        operator_ids: &[String],
        from: DateTime<FixedOffset>,
        to: DateTime<FixedOffset>,
    ) -> RepositoryResult<Vec<BreakLogEvent>> {
        let data = self.data.read();
        if data.failing_break_log {
            return Err(RepositoryError::connection("break log source unreachable"));
        }

        Ok(data
            .break_log
            .iter()
            .filter(|e| operator_ids.contains(&e.operator_id))
            .filter(|e| e.timestamp >= from && e.timestamp <= to)
            .cloned()
            .collect())
    }

    fn operators_in_break_log(&mut self, operator_ids: &[String]) -> RepositoryResult<Vec<String>> {
        let data = self.data.read();
        if data.failing_break_log {
            return Err(RepositoryError::connection("break log source unreachable"));
        }

        let known: HashSet<&str> = data.break_log.iter().map(|e| e.operator_id.as_str()).collect();
        Ok(operator_ids
            .iter()
            .filter(|op| known.contains(op.as_str()))
            .cloned()
            .collect())
    }
}
