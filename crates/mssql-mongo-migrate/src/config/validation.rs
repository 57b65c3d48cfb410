//! Configuration validation.

use super::Config;
use crate::error::{MigrateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Source validation
    if config.source.host.is_empty() {
        return Err(MigrateError::Config("source.host is required".into()));
    }
    if config.source.database.is_empty() {
        return Err(MigrateError::Config("source.database is required".into()));
    }
    if config.source.user.is_empty() {
        return Err(MigrateError::Config("source.user is required".into()));
    }
    if config.source.r#type != "mssql" {
        return Err(MigrateError::Config(format!(
            "source.type must be 'mssql', got '{}'",
            config.source.r#type
        )));
    }

    // Target validation
    if config.target.uri.is_empty() {
        return Err(MigrateError::Config("target.uri is required".into()));
    }
    if !config.target.uri.starts_with("mongodb://") && !config.target.uri.starts_with("mongodb+srv://") {
        return Err(MigrateError::Config(format!(
            "target.uri must be a mongodb:// or mongodb+srv:// connection string, got '{}'",
            config.target.uri
        )));
    }
    if config.target.database.is_empty() {
        return Err(MigrateError::Config("target.database is required".into()));
    }
    if config.target.r#type != "mongodb" {
        return Err(MigrateError::Config(format!(
            "target.type must be 'mongodb', got '{}'",
            config.target.r#type
        )));
    }

    // Migration config validation
    if config.migration.insert_batch_size == 0 {
        return Err(MigrateError::Config(
            "migration.insert_batch_size must be at least 1".into(),
        ));
    }
    if config.migration.max_source_connections == 0 {
        return Err(MigrateError::Config(
            "migration.max_source_connections must be at least 1".into(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MigrationConfig, SourceConfig, TargetConfig};

    fn valid_config() -> Config {
        Config {
            source: SourceConfig {
                r#type: "mssql".to_string(),
                host: "localhost".to_string(),
                port: 1433,
                database: "source_db".to_string(),
                user: "sa".to_string(),
                password: "password".to_string(),
                schema: "dbo".to_string(),
                encrypt: "false".to_string(),
                trust_server_cert: true,
            },
            target: TargetConfig {
                r#type: "mongodb".to_string(),
                uri: "mongodb://localhost:27017".to_string(),
                database: "target_db".to_string(),
            },
            migration: MigrationConfig::default(),
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_empty_source_host_fails() {
        let mut config = valid_config();
        config.source.host = String::new();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_non_mongodb_uri_fails() {
        let mut config = valid_config();
        config.target.uri = "postgres://localhost".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_batch_size_fails() {
        let mut config = valid_config();
        config.migration.insert_batch_size = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_defaults_from_minimal_yaml() {
        let yaml = r#"
source:
  host: localhost
  database: northwind
  user: sa
  password: secret
target:
  uri: mongodb://localhost:27017
  database: northwind
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.source.port, 1433);
        assert_eq!(config.source.schema, "dbo");
        assert!(config.migration.remap_keys);
        assert!(config.migration.skip_tables.is_empty());
        assert_eq!(config.migration.insert_batch_size, 1000);
    }

    #[test]
    fn test_skip_tables_and_identity_mode_from_yaml() {
        let yaml = r#"
source:
  host: localhost
  database: northwind
  user: sa
  password: secret
target:
  uri: mongodb://localhost:27017
  database: northwind
migration:
  remap_keys: false
  skip_tables:
    - AuditLog
    - __EFMigrationsHistory
  on_dangling_reference: collect
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert!(!config.migration.remap_keys);
        assert!(config.migration.is_skipped("AuditLog"));
        assert!(!config.migration.is_skipped("Users"));
        assert_eq!(
            config.migration.on_dangling_reference,
            crate::config::DanglingPolicy::Collect
        );
    }
}
