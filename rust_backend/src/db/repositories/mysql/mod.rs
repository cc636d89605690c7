//! MySQL source implementation using Diesel.
//!
//! Discovery goes through `information_schema`; scans, target-time lookups
//! and break-log fetches are parameterised `sql_query` statements. Database,
//! table and column names come from discovery and are quoted as identifiers.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone};
use diesel::mysql::MysqlConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::sql_query;
use diesel::sql_types::{Text, Timestamp};

use crate::db::config::{utc_offset_from_minutes, BreakLogConfig, MySqlConfig};
use crate::db::repository::{
    ConnectionFactory, ErrorContext, RepositoryError, RepositoryResult, SourceConnection,
};
use crate::models::{
    ActionType, BreakLogEvent, ColumnInfo, ProductionWindow, RawEvent, TableTask,
};

mod models;

use models::*;

type MySqlPool = Pool<ConnectionManager<MysqlConnection>>;

/// Applies per-session settings whenever the pool hands out a connection.
#[derive(Debug)]
struct SessionSettings {
    query_timeout_ms: Option<u64>,
}

impl CustomizeConnection<MysqlConnection, diesel::r2d2::Error> for SessionSettings {
    fn on_acquire(&self, conn: &mut MysqlConnection) -> Result<(), diesel::r2d2::Error> {
        if let Some(ms) = self.query_timeout_ms {
            sql_query(format!("SET SESSION MAX_EXECUTION_TIME = {}", ms))
                .execute(conn)
                .map_err(diesel::r2d2::Error::QueryError)?;
        }
        Ok(())
    }
}

/// Query-shaping settings shared by every connection of one repository.
#[derive(Debug)]
struct QuerySettings {
    target_time_table: String,
    break_log: Option<BreakLogConfig>,
    break_log_offset: FixedOffset,
}

/// Diesel-backed source for the production MySQL server.
#[derive(Clone)]
pub struct MySqlRepository {
    pool: MySqlPool,
    settings: Arc<QuerySettings>,
}

impl MySqlRepository {
    /// Build the connection pool. No connection is opened until first use.
    pub fn new(config: MySqlConfig) -> RepositoryResult<Self> {
        let break_log_offset = utc_offset_from_minutes(
            config
                .break_log
                .as_ref()
                .map(|b| b.utc_offset_minutes)
                .unwrap_or(0),
        )?;

        let manager = ConnectionManager::<MysqlConnection>::new(config.database_url);
        let pool = Pool::builder()
            .max_size(config.max_pool_size.max(1))
            .connection_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connection_customizer(Box::new(SessionSettings {
                query_timeout_ms: config.query_timeout_secs.map(|s| s * 1000),
            }))
            .build_unchecked(manager);

        Ok(Self {
            pool,
            settings: Arc::new(QuerySettings {
                target_time_table: config.target_time_table,
                break_log: config.break_log,
                break_log_offset,
            }),
        })
    }
}

impl ConnectionFactory for MySqlRepository {
    fn get_connection(&self) -> RepositoryResult<Box<dyn SourceConnection>> {
        let conn = self.pool.get()?;
        Ok(Box::new(MySqlSourceConnection {
            conn,
            settings: Arc::clone(&self.settings),
        }))
    }
}

struct MySqlSourceConnection {
    conn: PooledConnection<ConnectionManager<MysqlConnection>>,
    settings: Arc<QuerySettings>,
}

/// Quote an identifier with backticks, doubling embedded backticks.
fn quote_ident(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

/// Quote `database.table` (or a bare table name).
fn quote_qualified(name: &str) -> String {
    match name.split_once('.') {
        Some((db, table)) => format!("{}.{}", quote_ident(db), quote_ident(table)),
        None => quote_ident(name),
    }
}

/// Wall-clock time of an instant as recorded by a source with offset `source`.
fn source_clock(ts: DateTime<FixedOffset>, source: FixedOffset) -> NaiveDateTime {
    ts.with_timezone(&source).naive_local()
}

impl SourceConnection for MySqlSourceConnection {
    fn list_databases(&mut self) -> RepositoryResult<Vec<String>> {
        let rows: Vec<NameRow> =
            sql_query("SELECT SCHEMA_NAME AS name FROM information_schema.SCHEMATA ORDER BY SCHEMA_NAME")
                .load(&mut *self.conn)
                .map_err(|e| RepositoryError::from(e).with_operation("list_databases"))?;
        Ok(rows.into_iter().map(|r| r.name).collect())
    }

    fn list_tables(&mut self, database: &str) -> RepositoryResult<Vec<String>> {
        let rows: Vec<NameRow> = sql_query(
            "SELECT TABLE_NAME AS name FROM information_schema.TABLES \
             WHERE TABLE_SCHEMA = ? AND TABLE_TYPE = 'BASE TABLE' ORDER BY TABLE_NAME",
        )
        .bind::<Text, _>(database)
        .load(&mut *self.conn)
        .map_err(|e| {
            RepositoryError::from(e)
                .with_operation("list_tables")
                .with_entity("database", database)
        })?;
        Ok(rows.into_iter().map(|r| r.name).collect())
    }

    fn describe_columns(
        &mut self,
        database: &str,
        table: &str,
    ) -> RepositoryResult<Vec<ColumnInfo>> {
        let rows: Vec<ColumnRow> = sql_query(
            "SELECT COLUMN_NAME AS column_name, COLUMN_TYPE AS column_type \
             FROM information_schema.COLUMNS \
             WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? ORDER BY ORDINAL_POSITION",
        )
        .bind::<Text, _>(database)
        .bind::<Text, _>(table)
        .load(&mut *self.conn)
        .map_err(|e| {
            RepositoryError::from(e)
                .with_operation("describe_columns")
                .with_entity("table", format!("{}.{}", database, table))
        })?;

        Ok(rows
            .into_iter()
            .map(|r| ColumnInfo::new(r.column_name, r.column_type))
            .collect())
    }

    fn fetch_events(
        &mut self,
        task: &TableTask,
        date_column: &str,
        window: &ProductionWindow,
    ) -> RepositoryResult<Vec<RawEvent>> {
        let date = quote_ident(date_column);
        let query = format!(
            "SELECT CAST(`operator_id` AS CHAR) AS operator_id, \
                    CAST(`serial_num` AS CHAR) AS serial_num, \
                    CAST({date} AS DATETIME) AS event_time \
             FROM {db}.{table} \
             WHERE {date} BETWEEN ? AND ? \
               AND `status` = 1 \
               AND `operator_id` IS NOT NULL \
               AND `serial_num` IS NOT NULL \
             ORDER BY {date}",
            date = date,
            db = quote_ident(&task.database_name),
            table = quote_ident(&task.table_name),
        );

        let rows: Vec<EventRow> = sql_query(query)
            .bind::<Timestamp, _>(window.prod_start)
            .bind::<Timestamp, _>(window.prod_end)
            .load(&mut *self.conn)
            .map_err(|e| {
                RepositoryError::from(e)
                    .with_operation("fetch_events")
                    .with_entity("table", task.qualified_name())
            })?;

        Ok(rows
            .into_iter()
            .map(|r| RawEvent {
                operator_id: r.operator_id,
                serial_num: r.serial_num,
                timestamp: r.event_time,
            })
            .collect())
    }

    fn fetch_target_time(&mut self, model: &str, station: &str) -> RepositoryResult<Option<f64>> {
        let query = format!(
            "SELECT CAST(process_time AS DOUBLE) AS process_time FROM {} \
             WHERE model = ? AND station = ? LIMIT 1",
            quote_qualified(&self.settings.target_time_table)
        );

        let rows: Vec<TargetTimeRow> = sql_query(query)
            .bind::<Text, _>(model.to_uppercase())
            .bind::<Text, _>(station.to_uppercase())
            .load(&mut *self.conn)
            .map_err(|e| {
                RepositoryError::from(e)
                    .with_operation("fetch_target_time")
                    .with_entity("target_time", format!("{}/{}", model, station))
            })?;

        Ok(rows.into_iter().next().and_then(|r| r.process_time))
    }

    fn fetch_break_log(
        &mut self,
        operator_ids: &[String],
        from: DateTime<FixedOffset>,
        to: DateTime<FixedOffset>,
    ) -> RepositoryResult<Vec<BreakLogEvent>> {
        let Some(break_log) = self.settings.break_log.as_ref() else {
            return Ok(Vec::new());
        };
        if operator_ids.is_empty() {
            return Ok(Vec::new());
        }

        let source = self.settings.break_log_offset;
        let placeholders = vec!["?"; operator_ids.len()].join(", ");
        let query = format!(
            "SELECT CAST(operator_id AS CHAR) AS operator_id, \
                    CAST(event_time AS DATETIME) AS event_time, \
                    CAST(action AS CHAR) AS action \
             FROM {} \
             WHERE event_time BETWEEN ? AND ? AND operator_id IN ({}) \
             ORDER BY event_time",
            quote_qualified(&break_log.table),
            placeholders
        );

        let mut boxed = sql_query(query)
            .into_boxed::<diesel::mysql::Mysql>()
            .bind::<Timestamp, _>(source_clock(from, source))
            .bind::<Timestamp, _>(source_clock(to, source));
        for operator in operator_ids {
            boxed = boxed.bind::<Text, _>(operator.clone());
        }

        let rows: Vec<BreakLogRow> = boxed.load(&mut *self.conn).map_err(|e| {
            RepositoryError::from(e)
                .with_operation("fetch_break_log")
                .with_entity("break_log", &break_log.table)
        })?;

        rows.into_iter()
            .map(|r| {
                let timestamp: DateTime<FixedOffset> = source
                    .from_local_datetime(&r.event_time)
                    .single()
                    .ok_or_else(|| {
                        RepositoryError::query_with_context(
                            "Ambiguous break-log timestamp",
                            ErrorContext::new("fetch_break_log")
                                .with_details(r.event_time.to_string()),
                        )
                    })?;
                Ok(BreakLogEvent {
                    operator_id: r.operator_id,
                    timestamp,
                    action_type: ActionType::parse(&r.action),
                })
            })
            .collect()
    }

    fn operators_in_break_log(&mut self, operator_ids: &[String]) -> RepositoryResult<Vec<String>> {
        let Some(break_log) = self.settings.break_log.as_ref() else {
            return Ok(Vec::new());
        };
        if operator_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; operator_ids.len()].join(", ");
        let query = format!(
            "SELECT DISTINCT CAST(operator_id AS CHAR) AS name FROM {} WHERE operator_id IN ({})",
            quote_qualified(&break_log.table),
            placeholders
        );

        let mut boxed = sql_query(query).into_boxed::<diesel::mysql::Mysql>();
        for operator in operator_ids {
            boxed = boxed.bind::<Text, _>(operator.clone());
        }

        let rows: Vec<NameRow> = boxed.load(&mut *self.conn).map_err(|e| {
            RepositoryError::from(e)
                .with_operation("operators_in_break_log")
                .with_entity("break_log", &break_log.table)
        })?;
        Ok(rows.into_iter().map(|r| r.name).collect())
    }
}
