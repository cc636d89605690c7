//! Task orchestration.
//!
//! All `(database, table)` pairs are discovered up front, partitioned into
//! `min(max_workers, task_count)` batches and handed to blocking workers. A
//! worker holds exactly one source connection for its whole batch and
//! returns its own record list; lists are merged only after every worker has
//! finished.
//!
//! Failures are isolated per table: a table that errors is abandoned with its
//! partial output, and a worker that cannot connect abandons its batch. The
//! only error surfaced to callers is [`EngineError::DatabaseNotFound`].

use std::collections::HashSet;
use std::env;
use std::sync::Arc;
use std::time::Instant;

use chrono::{FixedOffset, Offset, Utc};
use futures::future::join_all;
use log::{debug, error, info, warn};

use super::metrics::{build_record, DEFAULT_SHIFT_HOURS};
use super::reconciler::{
    FallbackReason, ReconciliationResult, Reconciler, DEFAULT_BUFFER_MINUTES, MAX_BUFFER_MINUTES,
};
use super::scanner;
use super::schema::{self, SchemaConfig, SchemaIntrospector, TableCapability};
use super::{EngineError, EngineResult};
use crate::db::config::utc_offset_from_minutes;
use crate::db::factory::RepositoryFactory;
use crate::db::repo_config::AppConfig;
use crate::db::repository::{
    ConnectionFactory, RepositoryError, RepositoryResult, SourceConnection,
};
use crate::models::{
    BreakLogEvent, OperatorMetricRecord, ProductionWindow, RawOperatorAggregate, TableTask,
};

/// Engine settings, fixed at construction.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_workers: usize,
    pub break_log_buffer_minutes: i64,
    pub shift_hours: f64,
    /// Offset production timestamps are recorded in. Break-log query bounds
    /// and replay both use it; sources carry no plant offset of their own.
    pub plant_offset: FixedOffset,
    pub schema: SchemaConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_workers: 8,
            break_log_buffer_minutes: DEFAULT_BUFFER_MINUTES,
            shift_hours: DEFAULT_SHIFT_HOURS,
            plant_offset: Utc.fix(),
            schema: SchemaConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Create engine settings from environment variables.
    ///
    /// # Environment Variables
    /// - `MAX_WORKERS` (optional, default: 8)
    /// - `BREAK_LOG_BUFFER_MINUTES` (optional, default: 30, at most one day)
    /// - `PLANT_UTC_OFFSET_MINUTES` (optional, default: 0)
    /// - `HIDDEN_DATABASES` (see [`SchemaConfig::from_env`])
    pub fn from_env() -> RepositoryResult<Self> {
        let mut config = Self {
            schema: SchemaConfig::from_env(),
            ..Self::default()
        };

        if let Some(workers) = parse_env::<usize>("MAX_WORKERS")? {
            config.max_workers = workers;
        }
        if let Some(minutes) = parse_env::<i64>("BREAK_LOG_BUFFER_MINUTES")? {
            if !(0..=MAX_BUFFER_MINUTES).contains(&minutes) {
                return Err(RepositoryError::configuration(format!(
                    "BREAK_LOG_BUFFER_MINUTES must be within 0..={}",
                    MAX_BUFFER_MINUTES
                )));
            }
            config.break_log_buffer_minutes = minutes;
        }
        if let Some(minutes) = parse_env::<i32>("PLANT_UTC_OFFSET_MINUTES")? {
            config.plant_offset = utc_offset_from_minutes(minutes)?;
        }

        Ok(config)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> RepositoryResult<Option<T>> {
    match env::var(name) {
        Ok(value) => value.trim().parse().map(Some).map_err(|_| {
            RepositoryError::configuration(format!("Invalid {}: '{}'", name, value))
        }),
        Err(_) => Ok(None),
    }
}

/// Result of one aggregation request.
#[derive(Debug, Clone, Default)]
pub struct AggregationOutput {
    /// One record per operator per table, in no particular order.
    pub records: Vec<OperatorMetricRecord>,
    /// Visible databases, system schemas and hidden databases excluded.
    pub databases: Vec<String>,
}

struct Discovery {
    databases: Vec<String>,
    tasks: Vec<TableTask>,
}

/// Per-table settings shared by every worker of one request.
#[derive(Clone, Copy)]
struct WorkerContext {
    window: ProductionWindow,
    reconciler: Reconciler,
    shift_hours: f64,
}

/// Concurrent aggregation over a [`ConnectionFactory`].
///
/// # Example
/// ```
/// use prod_metrics::db::LocalRepository;
/// use prod_metrics::models::ProductionWindow;
/// use prod_metrics::services::{AggregationEngine, EngineConfig};
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() {
/// let engine = AggregationEngine::new(Arc::new(LocalRepository::new()), EngineConfig::default());
/// let window = ProductionWindow::for_day(chrono::NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
/// let output = engine.aggregate(&window, None, 4).await.unwrap();
/// assert!(output.records.is_empty());
/// # }
/// ```
#[derive(Clone)]
pub struct AggregationEngine {
    factory: Arc<dyn ConnectionFactory>,
    config: EngineConfig,
}

impl AggregationEngine {
    pub fn new(factory: Arc<dyn ConnectionFactory>, config: EngineConfig) -> Self {
        Self { factory, config }
    }

    /// Build the source and engine settings described by a configuration file.
    pub fn from_app_config(config: &AppConfig) -> EngineResult<Self> {
        let source_type = config.source_type()?;
        let mysql_config = config.to_mysql_config()?;
        let factory = RepositoryFactory::create(source_type, mysql_config.as_ref())?;
        Ok(Self::new(factory, config.engine_config()?))
    }

    /// Build the source and engine settings from environment variables.
    pub fn from_env() -> EngineResult<Self> {
        let factory = RepositoryFactory::from_env()?;
        Ok(Self::new(factory, EngineConfig::from_env()?))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Aggregate every eligible table, optionally restricted to `db_name`.
    ///
    /// `max_workers` bounds the number of concurrent workers (and therefore
    /// connections); `0` is treated as `1`.
    pub async fn aggregate(
        &self,
        window: &ProductionWindow,
        db_name: Option<&str>,
        max_workers: usize,
    ) -> EngineResult<AggregationOutput> {
        let started = Instant::now();

        let factory = Arc::clone(&self.factory);
        let schema_config = self.config.schema.clone();
        let requested = db_name.map(str::to_string);
        let discovery = match tokio::task::spawn_blocking(move || {
            discover(factory.as_ref(), &schema_config, requested.as_deref())
        })
        .await
        {
            Ok(result) => result?,
            Err(e) => {
                error!("Discovery worker failed: {}", e);
                Discovery {
                    databases: Vec::new(),
                    tasks: Vec::new(),
                }
            }
        };

        let Discovery { databases, tasks } = discovery;
        if tasks.is_empty() {
            info!("No tables to scan for {}", window.label());
            return Ok(AggregationOutput {
                records: Vec::new(),
                databases,
            });
        }

        let batches = partition_tasks(tasks, max_workers);
        info!(
            "Aggregating {} ({}) over {} table(s) with {} worker(s)",
            window.label(),
            window.filter_type,
            batches.iter().map(Vec::len).sum::<usize>(),
            batches.len()
        );

        let context = WorkerContext {
            window: *window,
            reconciler: Reconciler::new(
                self.config.break_log_buffer_minutes,
                self.config.plant_offset,
            ),
            shift_hours: self.config.shift_hours,
        };

        let handles = batches.into_iter().enumerate().map(|(worker, batch)| {
            let factory = Arc::clone(&self.factory);
            tokio::task::spawn_blocking(move || run_batch(worker, factory.as_ref(), batch, context))
        });

        let mut records = Vec::new();
        for result in join_all(handles).await {
            match result {
                Ok(batch_records) => records.extend(batch_records),
                Err(e) => error!("Worker panicked, its batch is lost: {}", e),
            }
        }

        info!(
            "Aggregation finished: {} record(s) in {:.2}s",
            records.len(),
            started.elapsed().as_secs_f64()
        );

        Ok(AggregationOutput { records, databases })
    }
}

/// Split tasks into `min(max_workers, tasks.len())` non-empty batches of
/// roughly equal size.
pub fn partition_tasks(tasks: Vec<TableTask>, max_workers: usize) -> Vec<Vec<TableTask>> {
    let workers = max_workers.max(1).min(tasks.len());
    let mut batches: Vec<Vec<TableTask>> = (0..workers).map(|_| Vec::new()).collect();
    for (i, task) in tasks.into_iter().enumerate() {
        batches[i % workers].push(task);
    }
    batches
}

fn discover(
    factory: &dyn ConnectionFactory,
    schema_config: &SchemaConfig,
    db_name: Option<&str>,
) -> EngineResult<Discovery> {
    let mut conn = match factory.get_connection() {
        Ok(conn) => Some(conn),
        Err(e) => {
            error!("Discovery connection failed: {}", e);
            None
        }
    };

    let databases = match conn.as_mut() {
        Some(conn) => schema::list_databases(conn.as_mut(), schema_config).unwrap_or_else(|e| {
            error!("Listing databases failed: {}", e);
            Vec::new()
        }),
        None => Vec::new(),
    };

    if let Some(name) = db_name {
        if !databases.iter().any(|db| db == name) {
            return Err(EngineError::DatabaseNotFound {
                name: name.to_string(),
                available: databases,
            });
        }
    }

    let mut tasks = Vec::new();
    if let Some(conn) = conn.as_mut() {
        let targets: Vec<&str> = match db_name {
            Some(name) => vec![name],
            None => databases.iter().map(String::as_str).collect(),
        };
        for db in targets {
            match conn.list_tables(db) {
                Ok(tables) => tasks.extend(tables.into_iter().map(|t| TableTask::new(db, t))),
                Err(e) => error!("Listing tables of {} failed, skipping it: {}", db, e),
            }
        }
    }

    Ok(Discovery { databases, tasks })
}

fn run_batch(
    worker: usize,
    factory: &dyn ConnectionFactory,
    batch: Vec<TableTask>,
    context: WorkerContext,
) -> Vec<OperatorMetricRecord> {
    let mut conn = match factory.get_connection() {
        Ok(conn) => conn,
        Err(e) => {
            error!(
                "Worker {} could not connect, abandoning {} table(s): {}",
                worker,
                batch.len(),
                e
            );
            return Vec::new();
        }
    };

    let mut introspector = SchemaIntrospector::new();
    let mut records = Vec::new();
    for task in &batch {
        match process_table(conn.as_mut(), &mut introspector, task, &context) {
            Ok(table_records) => records.extend(table_records),
            Err(e) => error!("Abandoning table {}: {}", task, e),
        }
    }

    debug!(
        "Worker {} finished {} table(s), {} record(s)",
        worker,
        batch.len(),
        records.len()
    );
    records
}

fn process_table(
    conn: &mut dyn SourceConnection,
    introspector: &mut SchemaIntrospector,
    task: &TableTask,
    context: &WorkerContext,
) -> RepositoryResult<Vec<OperatorMetricRecord>> {
    let date_column = match introspector.classify(conn, task)? {
        TableCapability::Scannable { date_column } => date_column,
        TableCapability::Ineligible(_) => return Ok(Vec::new()),
    };

    let aggregates = scanner::scan_table(conn, task, &date_column, &context.window)?;
    if aggregates.is_empty() {
        return Ok(Vec::new());
    }

    let (model, station) = task.model_and_station();
    let target_time = conn.fetch_target_time(model, station).unwrap_or_else(|e| {
        warn!("Target time lookup for {} failed: {}", task, e);
        None
    });

    let filter_type = context.window.filter_type;
    let break_log = if filter_type.uses_reconciled_time() {
        Some(fetch_break_log(conn, task, &aggregates, &context.reconciler))
    } else {
        None
    };

    let records = aggregates
        .iter()
        .map(|aggregate| {
            let reconciliation = match &break_log {
                Some(log) => {
                    let operator_events: Vec<BreakLogEvent> = log
                        .events
                        .iter()
                        .filter(|e| e.operator_id == aggregate.operator_id)
                        .cloned()
                        .collect();
                    if operator_events.is_empty()
                        && log.logged_elsewhere.contains(&aggregate.operator_id)
                    {
                        ReconciliationResult::raw_span(
                            aggregate.start_time(),
                            aggregate.end_time(),
                            FallbackReason::NoEventsInBuffer,
                        )
                    } else {
                        context.reconciler.reconcile(
                            &aggregate.operator_id,
                            aggregate.start_time(),
                            aggregate.end_time(),
                            &operator_events,
                        )
                    }
                }
                None => ReconciliationResult::raw_span(
                    aggregate.start_time(),
                    aggregate.end_time(),
                    FallbackReason::NotRequested,
                ),
            };

            build_record(
                task,
                aggregate,
                &reconciliation,
                target_time,
                filter_type,
                context.shift_hours,
            )
        })
        .collect();

    Ok(records)
}

/// Break-log events fetched for one table.
#[derive(Debug, Default)]
struct TableBreakLog {
    /// Events of the table's operators over the table's buffered span.
    events: Vec<BreakLogEvent>,
    /// Operators with no event in that span but with events at other times.
    logged_elsewhere: HashSet<String>,
}

/// Fetch the break log for all operators of one table. The fetch covers the
/// buffered span of the whole table; operators left without events are then
/// checked for events at any time, so their fallback can be told apart from
/// operators that never appear in the log. Failing fetches degrade to no
/// events.
fn fetch_break_log(
    conn: &mut dyn SourceConnection,
    task: &TableTask,
    aggregates: &[RawOperatorAggregate],
    reconciler: &Reconciler,
) -> TableBreakLog {
    let from = aggregates.iter().filter_map(|a| a.start_time()).min();
    let to = aggregates.iter().filter_map(|a| a.end_time()).max();
    let (Some(from), Some(to)) = (from, to) else {
        return TableBreakLog::default();
    };
    let (from, to) = reconciler.buffered_span(from, to);
    let (Some(from), Some(to)) = (reconciler.plant_instant(from), reconciler.plant_instant(to))
    else {
        return TableBreakLog::default();
    };

    let operator_ids: Vec<String> = aggregates.iter().map(|a| a.operator_id.clone()).collect();
    let events = match conn.fetch_break_log(&operator_ids, from, to) {
        Ok(events) => events,
        Err(e) => {
            warn!("Break log unavailable for {}, using raw spans: {}", task, e);
            return TableBreakLog::default();
        }
    };

    let fetched: HashSet<&str> = events.iter().map(|e| e.operator_id.as_str()).collect();
    let missing: Vec<String> = operator_ids
        .iter()
        .filter(|op| !fetched.contains(op.as_str()))
        .cloned()
        .collect();
    let logged_elsewhere = if missing.is_empty() {
        HashSet::new()
    } else {
        conn.operators_in_break_log(&missing)
            .unwrap_or_else(|e| {
                warn!("Break log presence check for {} failed: {}", task, e);
                Vec::new()
            })
            .into_iter()
            .collect()
    };

    TableBreakLog {
        events,
        logged_elsewhere,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::LocalRepository;
    use chrono::{NaiveDate, NaiveDateTime, TimeZone};

    fn tasks(n: usize) -> Vec<TableTask> {
        (0..n).map(|i| TableTask::new("acme", format!("m_s{}", i))).collect()
    }

    fn ts(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn test_from_app_config() {
        let config = AppConfig::from_str("[engine]\nmax_workers = 3\n").unwrap();
        let engine = AggregationEngine::from_app_config(&config).unwrap();
        assert_eq!(engine.config().max_workers, 3);

        let config = AppConfig::from_str("[source]\ntype = \"oracle\"\n").unwrap();
        assert!(matches!(
            AggregationEngine::from_app_config(&config),
            Err(EngineError::Configuration(_))
        ));
    }

    #[test]
    fn test_partition_tasks_sizes() {
        let batches = partition_tasks(tasks(10), 4);
        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 3, 2, 2]);

        assert_eq!(partition_tasks(tasks(2), 8).len(), 2);
        assert_eq!(partition_tasks(tasks(3), 0).len(), 1);
        assert!(partition_tasks(Vec::new(), 4).is_empty());
    }

    #[test]
    fn test_discover_unknown_database() {
        let repo = LocalRepository::new();
        repo.add_database("acme");
        let result = discover(&repo, &SchemaConfig::default(), Some("globex"));
        match result {
            Err(EngineError::DatabaseNotFound { name, available }) => {
                assert_eq!(name, "globex");
                assert_eq!(available, vec!["acme"]);
            }
            _ => panic!("expected DatabaseNotFound"),
        }
    }

    #[test]
    fn test_discover_restricts_to_requested_database() {
        let repo = LocalRepository::new();
        repo.add_production_table("acme", "acme_final");
        repo.add_production_table("globex", "gx_final");
        let discovery = discover(&repo, &SchemaConfig::default(), Some("globex")).unwrap();
        assert_eq!(discovery.databases, vec!["acme", "globex"]);
        assert_eq!(discovery.tasks, vec![TableTask::new("globex", "gx_final")]);
    }

    #[test]
    fn test_discover_connection_failure_yields_nothing() {
        let repo = LocalRepository::new();
        repo.add_production_table("acme", "acme_final");
        repo.set_healthy(false);
        let discovery = discover(&repo, &SchemaConfig::default(), None).unwrap();
        assert!(discovery.databases.is_empty());
        assert!(discovery.tasks.is_empty());
    }

    #[test]
    fn test_process_table_discards_partial_output_on_error() {
        let repo = LocalRepository::new();
        repo.add_production_table("acme", "acme_final");
        repo.insert_event("acme", "acme_final", "jdoe", "SN1", ts(8, 0));
        let mut conn = repo.get_connection().unwrap();
        let mut introspector = SchemaIntrospector::new();
        let task = TableTask::new("acme", "acme_final");
        let context = WorkerContext {
            window: ProductionWindow::for_day(NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()),
            reconciler: Reconciler::default(),
            shift_hours: 12.0,
        };

        // Classification succeeds, then the scan itself fails.
        introspector.classify(conn.as_mut(), &task).unwrap();
        repo.fail_table("acme", "acme_final");
        assert!(process_table(conn.as_mut(), &mut introspector, &task, &context).is_err());
    }

    #[test]
    fn test_ineligible_table_yields_no_records() {
        let repo = LocalRepository::new();
        repo.add_table(
            "acme",
            "acme_notes",
            vec![crate::models::ColumnInfo::new("operator_id", "varchar")],
        );
        let mut conn = repo.get_connection().unwrap();
        let context = WorkerContext {
            window: ProductionWindow::for_day(NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()),
            reconciler: Reconciler::default(),
            shift_hours: 12.0,
        };
        let records = process_table(
            conn.as_mut(),
            &mut SchemaIntrospector::new(),
            &TableTask::new("acme", "acme_notes"),
            &context,
        )
        .unwrap();
        assert!(records.is_empty());
    }

    fn aggregates_for(operators: &[&str]) -> Vec<RawOperatorAggregate> {
        let events: Vec<crate::models::RawEvent> = operators
            .iter()
            .flat_map(|op| {
                [ts(8, 0), ts(9, 0)].into_iter().enumerate().map(move |(i, t)| {
                    crate::models::RawEvent {
                        operator_id: op.to_string(),
                        serial_num: format!("{}-{}", op, i),
                        timestamp: t,
                    }
                })
            })
            .collect();
        let window = ProductionWindow::for_day(NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
        scanner::aggregate_events(&events, &window)
    }

    fn utc_event(op: &str, at: NaiveDateTime) -> BreakLogEvent {
        BreakLogEvent {
            operator_id: op.into(),
            timestamp: Utc.fix().from_utc_datetime(&at),
            action_type: crate::models::ActionType::Start,
        }
    }

    #[test]
    fn test_fetch_break_log_separates_unlogged_operators() {
        let repo = LocalRepository::new();
        repo.add_break_log_event(utc_event("jdoe", ts(8, 15)));
        let last_week = NaiveDate::from_ymd_opt(2024, 2, 27)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        repo.add_break_log_event(utc_event("asmith", last_week));

        let mut conn = repo.get_connection().unwrap();
        let log = fetch_break_log(
            conn.as_mut(),
            &TableTask::new("acme", "acme_final"),
            &aggregates_for(&["jdoe", "asmith", "bsmith"]),
            &Reconciler::default(),
        );

        assert_eq!(log.events.len(), 1);
        assert_eq!(log.events[0].operator_id, "jdoe");
        assert!(log.logged_elsewhere.contains("asmith"));
        assert!(!log.logged_elsewhere.contains("bsmith"));
        assert!(!log.logged_elsewhere.contains("jdoe"));
    }

    #[test]
    fn test_fetch_break_log_bounds_follow_plant_offset() {
        let repo = LocalRepository::new();
        // 06:30Z is 08:30 at UTC+2, inside the 08:00-09:00 plant-local run.
        repo.add_break_log_event(utc_event("jdoe", ts(6, 30)));
        // 10:00Z is 12:00 at UTC+2, beyond the buffered span.
        repo.add_break_log_event(utc_event("jdoe", ts(10, 0)));

        let mut conn = repo.get_connection().unwrap();
        let reconciler = Reconciler::new(30, FixedOffset::east_opt(2 * 3600).unwrap());
        let log = fetch_break_log(
            conn.as_mut(),
            &TableTask::new("acme", "acme_final"),
            &aggregates_for(&["jdoe"]),
            &reconciler,
        );
        assert_eq!(log.events.len(), 1);
        assert_eq!(log.events[0].timestamp, Utc.fix().from_utc_datetime(&ts(6, 30)));
    }

    #[test]
    fn test_oversized_buffer_is_clamped() {
        let config = EngineConfig {
            break_log_buffer_minutes: i64::MAX,
            ..EngineConfig::default()
        };
        let reconciler = Reconciler::new(config.break_log_buffer_minutes, config.plant_offset);
        assert_eq!(reconciler.buffer().num_minutes(), MAX_BUFFER_MINUTES);
    }
}
