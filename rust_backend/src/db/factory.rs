//! Source factory for dependency injection.
//!
//! This module provides utilities for creating and configuring source
//! connection factories based on runtime configuration.

use std::str::FromStr;
use std::sync::Arc;

use super::config::MySqlConfig;
use super::repositories::LocalRepository;
use super::repository::{ConnectionFactory, RepositoryError, RepositoryResult};

/// Source type configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceType {
    /// Production MySQL server
    MySql,
    /// In-memory local source
    Local,
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mysql" => Ok(Self::MySql),
            "local" | "test" => Ok(Self::Local),
            _ => Err(format!("Unknown source type: {}", s)),
        }
    }
}

impl SourceType {
    /// Get source type from environment variable.
    ///
    /// Reads `SOURCE_TYPE`. Defaults to MySQL when the `mysql-repo` feature is
    /// compiled in, otherwise to the local source.
    pub fn from_env() -> Self {
        std::env::var("SOURCE_TYPE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(Self::default_for_build)
    }

    fn default_for_build() -> Self {
        if cfg!(feature = "mysql-repo") {
            Self::MySql
        } else {
            Self::Local
        }
    }
}

/// Factory for creating source connection factories.
///
/// # Example
/// ```
/// use prod_metrics::db::{RepositoryFactory, SourceType};
///
/// let source = RepositoryFactory::create(SourceType::Local, None).unwrap();
/// assert!(source.health_check().unwrap());
/// ```
pub struct RepositoryFactory;

impl RepositoryFactory {
    /// Create a source based on type.
    ///
    /// # Arguments
    /// * `source_type` - Type of source to create
    /// * `config` - Optional MySQL configuration (required for MySQL)
    pub fn create(
        source_type: SourceType,
        config: Option<&MySqlConfig>,
    ) -> RepositoryResult<Arc<dyn ConnectionFactory>> {
        match source_type {
            SourceType::MySql => {
                let config = config.ok_or_else(|| {
                    RepositoryError::configuration("MySQL source requires MySqlConfig")
                })?;
                Self::create_mysql(config)
            }
            SourceType::Local => Ok(Self::create_local()),
        }
    }

    /// Create a MySQL source backed by an r2d2 pool.
    #[cfg(feature = "mysql-repo")]
    pub fn create_mysql(config: &MySqlConfig) -> RepositoryResult<Arc<dyn ConnectionFactory>> {
        let repo = super::repositories::MySqlRepository::new(config.clone())?;
        Ok(Arc::new(repo))
    }

    #[cfg(not(feature = "mysql-repo"))]
    pub fn create_mysql(_config: &MySqlConfig) -> RepositoryResult<Arc<dyn ConnectionFactory>> {
        Err(RepositoryError::configuration(
            "MySQL source not compiled in; rebuild with the `mysql-repo` feature",
        ))
    }

    /// Create an empty in-memory source.
    pub fn create_local() -> Arc<dyn ConnectionFactory> {
        Arc::new(LocalRepository::new())
    }

    /// Create a source from environment configuration.
    pub fn from_env() -> RepositoryResult<Arc<dyn ConnectionFactory>> {
        RepositoryBuilder::new().from_env()?.build()
    }
}

/// Builder for configuring source creation.
///
/// # Example
/// ```no_run
/// use prod_metrics::db::{MySqlConfig, RepositoryBuilder, SourceType};
///
/// let source = RepositoryBuilder::new()
///     .source_type(SourceType::MySql)
///     .config(MySqlConfig::new("mysql://report:secret@db:3306"))
///     .build()
///     .unwrap();
/// ```
pub struct RepositoryBuilder {
    source_type: SourceType,
    config: Option<MySqlConfig>,
}

impl RepositoryBuilder {
    /// Create a new builder. Defaults to the local source.
    pub fn new() -> Self {
        Self {
            source_type: SourceType::Local,
            config: None,
        }
    }

    /// Set the source type.
    pub fn source_type(mut self, source_type: SourceType) -> Self {
        self.source_type = source_type;
        self
    }

    /// Set the MySQL configuration.
    pub fn config(mut self, config: MySqlConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Load configuration from environment variables.
    pub fn from_env(mut self) -> RepositoryResult<Self> {
        self.source_type = SourceType::from_env();

        if self.source_type == SourceType::MySql {
            let config = MySqlConfig::from_env().map_err(RepositoryError::configuration)?;
            self.config = Some(config);
        }

        Ok(self)
    }

    /// Build the source.
    pub fn build(self) -> RepositoryResult<Arc<dyn ConnectionFactory>> {
        RepositoryFactory::create(self.source_type, self.config.as_ref())
    }
}

impl Default for RepositoryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_type_from_str() {
        assert_eq!("mysql".parse::<SourceType>().unwrap(), SourceType::MySql);
        assert_eq!("MySQL".parse::<SourceType>().unwrap(), SourceType::MySql);
        assert_eq!("local".parse::<SourceType>().unwrap(), SourceType::Local);
        assert!("postgres".parse::<SourceType>().is_err());
    }

    #[test]
    fn test_create_local_source() {
        let source = RepositoryFactory::create_local();
        assert!(source.health_check().unwrap());
    }

    #[test]
    fn test_builder_local_source() {
        let source = RepositoryBuilder::new()
            .source_type(SourceType::Local)
            .build()
            .unwrap();
        assert!(source.get_connection().is_ok());
    }

    #[test]
    fn test_mysql_requires_config() {
        let result = RepositoryFactory::create(SourceType::MySql, None);
        assert!(matches!(
            result,
            Err(RepositoryError::ConfigurationError { .. })
        ));
    }
}
