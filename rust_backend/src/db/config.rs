//! MySQL source configuration and environment variable handling.

use std::env;

use chrono::FixedOffset;

use crate::db::repository::{RepositoryError, RepositoryResult};

/// Default location of the `(model, station) → process_time` table.
pub const DEFAULT_TARGET_TIME_TABLE: &str = "production_plan.target_time";

/// Where the auxiliary break log lives and how its clock relates to UTC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakLogConfig {
    /// `database.table` holding `operator_id`, `event_time`, `action` columns.
    pub table: String,
    /// Offset of the break-log `event_time` values, in minutes east of UTC.
    pub utc_offset_minutes: i32,
}

/// Convert an offset in minutes east of UTC into a [`FixedOffset`].
///
/// Offsets must lie strictly within one day of UTC.
pub fn utc_offset_from_minutes(minutes: i32) -> RepositoryResult<FixedOffset> {
    minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .ok_or_else(|| {
            RepositoryError::configuration(format!("Invalid UTC offset: {} minutes", minutes))
        })
}

/// Configuration for connecting to the production MySQL server.
#[derive(Debug, Clone)]
pub struct MySqlConfig {
    pub database_url: String,
    pub max_pool_size: u32,
    pub connect_timeout_secs: u64,
    /// Per-statement limit applied as the session `MAX_EXECUTION_TIME`.
    pub query_timeout_secs: Option<u64>,
    pub target_time_table: String,
    pub break_log: Option<BreakLogConfig>,
}

impl MySqlConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_pool_size: 10,
            connect_timeout_secs: 30,
            query_timeout_secs: None,
            target_time_table: DEFAULT_TARGET_TIME_TABLE.to_string(),
            break_log: None,
        }
    }

    /// Create a configuration from environment variables.
    ///
    /// # Environment Variables
    /// - `DATABASE_URL` or `MYSQL_DATABASE_URL` (required)
    /// - `MYSQL_POOL_MAX` (optional, default: 10)
    /// - `MYSQL_QUERY_TIMEOUT_SECS` (optional)
    /// - `TARGET_TIME_TABLE` (optional, default: `production_plan.target_time`)
    /// - `BREAK_LOG_TABLE` (optional) and `BREAK_LOG_UTC_OFFSET_MINUTES` (default: 0)
    pub fn from_env() -> Result<Self, String> {
        let database_url = env::var("DATABASE_URL")
            .or_else(|_| env::var("MYSQL_DATABASE_URL"))
            .map_err(|_| "DATABASE_URL or MYSQL_DATABASE_URL must be set".to_string())?;

        let mut config = Self::new(database_url);

        if let Some(max) = env::var("MYSQL_POOL_MAX")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
        {
            config.max_pool_size = max;
        }

        config.query_timeout_secs = env::var("MYSQL_QUERY_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok());

        if let Ok(table) = env::var("TARGET_TIME_TABLE") {
            config.target_time_table = table;
        }

        config.break_log = env::var("BREAK_LOG_TABLE").ok().map(|table| BreakLogConfig {
            table,
            utc_offset_minutes: env::var("BREAK_LOG_UTC_OFFSET_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
        });

        Ok(config)
    }
}
