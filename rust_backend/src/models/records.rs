//! Request-scoped entities flowing through the aggregation engine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Display and export column order of [`OperatorMetricRecord`].
pub const DISPLAY_COLUMNS: [&str; 11] = [
    "operator_id",
    "Customer",
    "Model",
    "Station",
    "Output",
    "Target_Time",
    "Cycle_Time",
    "Start_Time",
    "End_Time",
    "%UTIL",
    "Total_Util",
];

/// Columns written by CSV style exports.
pub const EXPORT_COLUMNS: [&str; 10] = [
    "operator_id",
    "Customer",
    "Model",
    "Station",
    "Output",
    "Target_Time",
    "Cycle_Time",
    "Start_Time",
    "End_Time",
    "%UTIL",
];

/// One (database, table) pair to scan.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableTask {
    pub database_name: String,
    pub table_name: String,
}

impl TableTask {
    pub fn new(database_name: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            database_name: database_name.into(),
            table_name: table_name.into(),
        }
    }

    /// Split `model_station` on the first `_`. A table without `_` has an
    /// empty station.
    pub fn model_and_station(&self) -> (&str, &str) {
        self.table_name
            .split_once('_')
            .unwrap_or((self.table_name.as_str(), ""))
    }

    /// `database.table`, used in logs and error contexts.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.database_name, self.table_name)
    }
}

impl fmt::Display for TableTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database_name, self.table_name)
    }
}

/// Declared column of a source table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

/// One `status = 1` production event as read from a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub operator_id: String,
    pub serial_num: String,
    pub timestamp: NaiveDateTime,
}

/// Per-operator raw aggregate of one table inside the window.
#[derive(Debug, Clone, PartialEq)]
pub struct RawOperatorAggregate {
    pub operator_id: String,
    /// Number of distinct serial numbers.
    pub output_count: usize,
    /// Distinct event times, ascending.
    pub sorted_timestamps: Vec<NaiveDateTime>,
}

impl RawOperatorAggregate {
    pub fn start_time(&self) -> Option<NaiveDateTime> {
        self.sorted_timestamps.first().copied()
    }

    pub fn end_time(&self) -> Option<NaiveDateTime> {
        self.sorted_timestamps.last().copied()
    }
}

/// Break-log action, normalised from the free-form source value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    /// `start`, `play` or `resume`.
    Start,
    /// `stop`, `pause` or `break_start`.
    Stop,
    Other,
}

impl FromStr for ActionType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "start" | "play" | "resume" => Self::Start,
            "stop" | "pause" | "break_start" => Self::Stop,
            _ => Self::Other,
        })
    }
}

impl ActionType {
    /// Infallible parse for source values.
    pub fn parse(s: &str) -> Self {
        s.parse().unwrap_or(Self::Other)
    }
}

/// Externally sourced activity transition of one operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakLogEvent {
    pub operator_id: String,
    /// Timestamp in the break-log source's own offset.
    pub timestamp: DateTime<FixedOffset>,
    pub action_type: ActionType,
}

/// Reconstructed active session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkSession {
    pub start: NaiveDateTime,
    pub stop: NaiveDateTime,
    pub duration: qtty::Seconds,
}

/// Where the active working time of a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivitySource {
    BreakLog,
    RawSpan,
}

/// Timing diagnostics computed next to the headline metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleDiagnostics {
    /// Mean of the three shortest inter-event gaps, `0` with fewer than three.
    pub avg_shortest_cycle: f64,
    /// Most common inter-event gap (rounded to 2 decimals).
    pub mode_cycle: f64,
    /// Reconciled active seconds that fed the cycle time.
    pub active_seconds: f64,
}

/// Engine output: one record per operator per table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorMetricRecord {
    #[serde(rename = "Customer")]
    pub customer: String,
    #[serde(rename = "Model")]
    pub model: String,
    #[serde(rename = "Station")]
    pub station: String,
    pub operator_id: String,
    #[serde(rename = "Output")]
    pub output: usize,
    #[serde(rename = "Target_Time")]
    pub target_time: Option<f64>,
    #[serde(rename = "Cycle_Time")]
    pub cycle_time: f64,
    #[serde(rename = "Start_Time")]
    pub start_time: Option<NaiveDateTime>,
    #[serde(rename = "End_Time")]
    pub end_time: Option<NaiveDateTime>,
    #[serde(rename = "%UTIL")]
    pub util_percent: f64,
    #[serde(rename = "Total_Util")]
    pub total_util: bool,
    #[serde(skip, default = "default_activity_source")]
    pub activity_source: ActivitySource,
    #[serde(skip)]
    pub diagnostics: CycleDiagnostics,
}

fn default_activity_source() -> ActivitySource {
    ActivitySource::RawSpan
}

impl OperatorMetricRecord {
    /// Display value of a column named as in [`DISPLAY_COLUMNS`]. Unknown
    /// columns and absent values render as an empty string.
    pub fn column_value(&self, column: &str) -> String {
        match column {
            "operator_id" => self.operator_id.clone(),
            "Customer" => self.customer.clone(),
            "Model" => self.model.clone(),
            "Station" => self.station.clone(),
            "Output" => self.output.to_string(),
            "Target_Time" => self.target_time.map(|t| t.to_string()).unwrap_or_default(),
            "Cycle_Time" => self.cycle_time.to_string(),
            "Start_Time" => format_time(self.start_time),
            "End_Time" => format_time(self.end_time),
            "%UTIL" => self.util_percent.to_string(),
            "Total_Util" => self.total_util.to_string(),
            _ => String::new(),
        }
    }
}

fn format_time(ts: Option<NaiveDateTime>) -> String {
    ts.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}
