//! Application configuration file support.
//!
//! This module reads source, schema and engine settings from a TOML file.
//! Parse errors carry the path of the offending key.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::config::{utc_offset_from_minutes, BreakLogConfig, MySqlConfig, DEFAULT_TARGET_TIME_TABLE};
use super::factory::SourceType;
use super::repository::{RepositoryError, RepositoryResult};
use crate::services::orchestrator::EngineConfig;
use crate::services::reconciler::MAX_BUFFER_MINUTES;
use crate::services::schema::SchemaConfig;

/// Application configuration from file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub source: SourceSettings,
    #[serde(default)]
    pub mysql: MySqlSettings,
    #[serde(default)]
    pub schema: SchemaConfig,
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub break_log: Option<BreakLogSettings>,
    #[serde(default)]
    pub target_time: TargetTimeSettings,
}

/// Source type settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSettings {
    #[serde(rename = "type", default = "default_source_type")]
    pub source_type: String,
}

/// MySQL connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MySqlSettings {
    #[serde(default)]
    pub database_url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default)]
    pub query_timeout_secs: Option<u64>,
}

/// Aggregation engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_break_log_buffer")]
    pub break_log_buffer_minutes: i64,
    #[serde(default = "default_shift_hours")]
    pub shift_hours: f64,
    #[serde(default)]
    pub plant_utc_offset_minutes: i32,
}

/// Break-log location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakLogSettings {
    pub table: String,
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

/// Target-time lookup table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetTimeSettings {
    #[serde(default = "default_target_time_table")]
    pub table: String,
}

fn default_source_type() -> String {
    "local".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_max_workers() -> usize {
    8
}

fn default_break_log_buffer() -> i64 {
    30
}

fn default_shift_hours() -> f64 {
    12.0
}

fn default_target_time_table() -> String {
    DEFAULT_TARGET_TIME_TABLE.to_string()
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            source_type: default_source_type(),
        }
    }
}

impl Default for MySqlSettings {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout(),
            query_timeout_secs: None,
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            break_log_buffer_minutes: default_break_log_buffer(),
            shift_hours: default_shift_hours(),
            plant_utc_offset_minutes: 0,
        }
    }
}

impl Default for TargetTimeSettings {
    fn default() -> Self {
        Self {
            table: default_target_time_table(),
        }
    }
}

impl AppConfig {
    /// Parse configuration from a TOML string.
    pub fn from_str(content: &str) -> RepositoryResult<Self> {
        let deserializer = toml::Deserializer::new(content);
        serde_path_to_error::deserialize(deserializer).map_err(|e| {
            RepositoryError::configuration(format!(
                "Failed to parse config at '{}': {}",
                e.path(),
                e.inner()
            ))
        })
    }

    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> RepositoryResult<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            RepositoryError::configuration(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_str(&content)
    }

    /// Load configuration from the default location.
    ///
    /// Searches for `metrics.toml` in:
    /// 1. Current directory
    /// 2. `rust_backend/` directory
    /// 3. Parent directory
    pub fn from_default_location() -> RepositoryResult<Self> {
        let search_paths = [
            PathBuf::from("metrics.toml"),
            PathBuf::from("rust_backend/metrics.toml"),
            PathBuf::from("../metrics.toml"),
        ];

        for path in search_paths {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        Err(RepositoryError::configuration(
            "No metrics.toml found in standard locations",
        ))
    }

    /// Get the source type from configuration.
    pub fn source_type(&self) -> RepositoryResult<SourceType> {
        self.source
            .source_type
            .parse()
            .map_err(|e: String| RepositoryError::configuration(format!("Invalid source type: {}", e)))
    }

    /// Convert to `MySqlConfig` if this is a MySQL configuration.
    ///
    /// # Returns
    /// * `Ok(Some(MySqlConfig))` if MySQL source with valid settings
    /// * `Ok(None)` if not a MySQL source
    /// * `Err(RepositoryError)` if MySQL but `database_url` is missing
    pub fn to_mysql_config(&self) -> RepositoryResult<Option<MySqlConfig>> {
        if self.source_type()? != SourceType::MySql {
            return Ok(None);
        }

        if self.mysql.database_url.is_empty() {
            return Err(RepositoryError::configuration(
                "MySQL source requires 'mysql.database_url' setting",
            ));
        }

        let mut config = MySqlConfig::new(self.mysql.database_url.clone());
        config.max_pool_size = self.mysql.max_connections;
        config.connect_timeout_secs = self.mysql.connect_timeout_secs;
        config.query_timeout_secs = self.mysql.query_timeout_secs;
        config.target_time_table = self.target_time.table.clone();
        config.break_log = self.break_log.as_ref().map(|b| BreakLogConfig {
            table: b.table.clone(),
            utc_offset_minutes: b.utc_offset_minutes,
        });
        Ok(Some(config))
    }

    pub fn schema_config(&self) -> SchemaConfig {
        self.schema.clone()
    }

    /// Engine settings, validated.
    pub fn engine_config(&self) -> RepositoryResult<EngineConfig> {
        let plant_offset = utc_offset_from_minutes(self.engine.plant_utc_offset_minutes)?;

        if !(0..=MAX_BUFFER_MINUTES).contains(&self.engine.break_log_buffer_minutes) {
            return Err(RepositoryError::configuration(format!(
                "engine.break_log_buffer_minutes must be within 0..={}",
                MAX_BUFFER_MINUTES
            )));
        }
        if !(self.engine.shift_hours > 0.0 && self.engine.shift_hours.is_finite()) {
            return Err(RepositoryError::configuration(
                "engine.shift_hours must be positive",
            ));
        }

        Ok(EngineConfig {
            max_workers: self.engine.max_workers,
            break_log_buffer_minutes: self.engine.break_log_buffer_minutes,
            shift_hours: self.engine.shift_hours,
            plant_offset,
            schema: self.schema_config(),
        })
    }
}
