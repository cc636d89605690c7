//! Environment and file configuration tests.

mod support;

use std::io::Write;

use prod_metrics::db::{AppConfig, MySqlConfig, RepositoryBuilder, SourceType};
use prod_metrics::services::{AggregationEngine, EngineConfig, SchemaConfig};
use support::with_scoped_env;

#[test]
fn test_source_type_from_env() {
    with_scoped_env(&[("SOURCE_TYPE", Some("local"))], || {
        assert_eq!(SourceType::from_env(), SourceType::Local);
    });
    with_scoped_env(&[("SOURCE_TYPE", Some("MYSQL"))], || {
        assert_eq!(SourceType::from_env(), SourceType::MySql);
    });
}

#[test]
fn test_mysql_config_from_env() {
    with_scoped_env(
        &[
            ("DATABASE_URL", None),
            ("MYSQL_DATABASE_URL", Some("mysql://report@db:3306")),
            ("MYSQL_POOL_MAX", Some("4")),
            ("BREAK_LOG_TABLE", Some("production_plan.operator_activity")),
            ("BREAK_LOG_UTC_OFFSET_MINUTES", Some("-300")),
        ],
        || {
            let config = MySqlConfig::from_env().unwrap();
            assert_eq!(config.database_url, "mysql://report@db:3306");
            assert_eq!(config.max_pool_size, 4);
            let break_log = config.break_log.unwrap();
            assert_eq!(break_log.utc_offset_minutes, -300);
        },
    );

    with_scoped_env(&[("DATABASE_URL", None), ("MYSQL_DATABASE_URL", None)], || {
        assert!(MySqlConfig::from_env().is_err());
    });
}

#[test]
fn test_hidden_databases_from_env() {
    with_scoped_env(&[("HIDDEN_DATABASES", Some(" archive, Staging ,,"))], || {
        let config = SchemaConfig::from_env();
        assert_eq!(config.hidden_databases, vec!["archive", "Staging"]);
        assert!(config.is_excluded("STAGING"));
        assert!(config.is_excluded("performance_schema"));
    });
}

#[test]
fn test_builder_from_env_local() {
    with_scoped_env(&[("SOURCE_TYPE", Some("local"))], || {
        let source = RepositoryBuilder::new().from_env().unwrap().build().unwrap();
        assert!(source.health_check().unwrap());
    });
}

#[test]
fn test_app_config_file_round_trip_into_engine() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("metrics.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(
        file,
        r#"
[source]
type = "local"

[schema]
hidden_databases = ["archive"]

[engine]
max_workers = 3
break_log_buffer_minutes = 15
plant_utc_offset_minutes = 60
"#
    )
    .unwrap();

    let config = AppConfig::from_file(&path).unwrap();
    let engine = config.engine_config().unwrap();
    assert_eq!(engine.max_workers, 3);
    assert_eq!(engine.break_log_buffer_minutes, 15);
    assert_eq!(engine.plant_offset.local_minus_utc(), 3600);
    assert!(engine.schema.is_hidden("ARCHIVE"));
}

#[test]
fn test_engine_config_from_env_owns_plant_offset() {
    with_scoped_env(
        &[
            ("SOURCE_TYPE", Some("local")),
            ("MAX_WORKERS", Some("2")),
            ("BREAK_LOG_BUFFER_MINUTES", Some("45")),
            ("PLANT_UTC_OFFSET_MINUTES", Some("120")),
            ("HIDDEN_DATABASES", None),
        ],
        || {
            let config = EngineConfig::from_env().unwrap();
            assert_eq!(config.max_workers, 2);
            assert_eq!(config.break_log_buffer_minutes, 45);
            assert_eq!(config.plant_offset.local_minus_utc(), 7200);

            let engine = AggregationEngine::from_env().unwrap();
            assert_eq!(engine.config().plant_offset.local_minus_utc(), 7200);
        },
    );
}

#[test]
fn test_engine_config_from_env_rejects_out_of_range_values() {
    for (key, value) in [
        ("PLANT_UTC_OFFSET_MINUTES", "40000000"),
        ("PLANT_UTC_OFFSET_MINUTES", "east"),
        ("BREAK_LOG_BUFFER_MINUTES", "9223372036854775"),
        ("BREAK_LOG_BUFFER_MINUTES", "-1"),
    ] {
        with_scoped_env(&[(key, Some(value))], || {
            assert!(EngineConfig::from_env().is_err(), "{}={}", key, value);
        });
    }
}
