//! Schema introspection.
//!
//! Databases and tables are discovered at query time. A table is scanned only
//! when it carries the required production columns and a detectable date
//! column; everything else is classified [`TableCapability::Ineligible`] and
//! skipped without error.

use std::collections::HashMap;
use std::env;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::db::repository::{RepositoryResult, SourceConnection};
use crate::models::{ColumnInfo, TableTask};

/// Columns every scannable table must declare.
pub const REQUIRED_COLUMNS: [&str; 3] = ["operator_id", "serial_num", "status"];

/// Server schemas that never hold production data.
pub const DEFAULT_SYSTEM_SCHEMAS: [&str; 4] =
    ["sys", "information_schema", "performance_schema", "mysql"];

/// Which databases are excluded from discovery. Both lists compare
/// case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaConfig {
    #[serde(default = "default_system_schemas")]
    pub system_schemas: Vec<String>,
    #[serde(default)]
    pub hidden_databases: Vec<String>,
}

fn default_system_schemas() -> Vec<String> {
    DEFAULT_SYSTEM_SCHEMAS.iter().map(|s| s.to_string()).collect()
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            system_schemas: default_system_schemas(),
            hidden_databases: Vec::new(),
        }
    }
}

impl SchemaConfig {
    pub fn with_hidden_databases<I, S>(mut self, hidden: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hidden_databases = hidden.into_iter().map(Into::into).collect();
        self
    }

    /// Default system schemas plus a comma-separated `HIDDEN_DATABASES`.
    pub fn from_env() -> Self {
        let hidden = env::var("HIDDEN_DATABASES")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        Self::default().with_hidden_databases(hidden)
    }

    pub fn is_system_schema(&self, database: &str) -> bool {
        self.system_schemas
            .iter()
            .any(|s| s.eq_ignore_ascii_case(database))
    }

    pub fn is_hidden(&self, database: &str) -> bool {
        self.hidden_databases
            .iter()
            .any(|s| s.eq_ignore_ascii_case(database))
    }

    pub fn is_excluded(&self, database: &str) -> bool {
        self.is_system_schema(database) || self.is_hidden(database)
    }
}

/// Why a table is not scanned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IneligibleReason {
    MissingColumns(Vec<String>),
    NoDateColumn,
}

/// Result of checking one table against the production column layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableCapability {
    Scannable { date_column: String },
    Ineligible(IneligibleReason),
}

impl TableCapability {
    pub fn date_column(&self) -> Option<&str> {
        match self {
            Self::Scannable { date_column } => Some(date_column),
            Self::Ineligible(_) => None,
        }
    }
}

/// First column whose name contains `date` or `time` and whose declared type
/// contains `date` or `timestamp`.
pub fn find_date_column(columns: &[ColumnInfo]) -> Option<&ColumnInfo> {
    columns.iter().find(|c| {
        let name = c.name.to_lowercase();
        let data_type = c.data_type.to_lowercase();
        (name.contains("date") || name.contains("time"))
            && (data_type.contains("date") || data_type.contains("timestamp"))
    })
}

/// Classify a column set.
pub fn classify_columns(columns: &[ColumnInfo]) -> TableCapability {
    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|required| !columns.iter().any(|c| c.name == **required))
        .map(|s| s.to_string())
        .collect();
    if !missing.is_empty() {
        return TableCapability::Ineligible(IneligibleReason::MissingColumns(missing));
    }

    match find_date_column(columns) {
        Some(column) => TableCapability::Scannable {
            date_column: column.name.clone(),
        },
        None => TableCapability::Ineligible(IneligibleReason::NoDateColumn),
    }
}

/// Visible databases: everything the server lists minus system schemas and
/// hidden databases.
pub fn list_databases(
    conn: &mut dyn SourceConnection,
    config: &SchemaConfig,
) -> RepositoryResult<Vec<String>> {
    Ok(conn
        .list_databases()?
        .into_iter()
        .filter(|db| !config.is_excluded(db))
        .collect())
}

/// Per-worker introspector that classifies each table at most once.
#[derive(Debug, Default)]
pub struct SchemaIntrospector {
    capabilities: HashMap<TableTask, TableCapability>,
}

impl SchemaIntrospector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify a table, describing its columns on first use only.
    pub fn classify(
        &mut self,
        conn: &mut dyn SourceConnection,
        task: &TableTask,
    ) -> RepositoryResult<TableCapability> {
        if let Some(capability) = self.capabilities.get(task) {
            return Ok(capability.clone());
        }

        let columns = conn.describe_columns(&task.database_name, &task.table_name)?;
        let capability = classify_columns(&columns);
        if let TableCapability::Ineligible(reason) = &capability {
            debug!("Skipping {}: {:?}", task, reason);
        }

        self.capabilities.insert(task.clone(), capability.clone());
        Ok(capability)
    }

    pub fn classified_count(&self) -> usize {
        self.capabilities.len()
    }
}
