//! Error types for the replication library.

use thiserror::Error;

/// Main error type for replication operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source database connection or query error
    #[error("Source database error: {0}")]
    Source(#[from] tiberius::error::Error),

    /// Target database connection or operation error
    #[error("Target database error: {0}")]
    Target(#[from] mongodb::error::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Schema catalog extraction failed
    #[error("Schema extraction failed: {0}")]
    SchemaExtraction(String),

    /// Table has a composite primary key, which is unsupported
    #[error("Table {table} has a composite primary key ({columns}) - only single-column primary keys are supported")]
    CompositeKey { table: String, columns: String },

    /// Table has no primary key (required in identity-copy mode)
    #[error("Table {0} has no primary key - identity copy requires one")]
    NoPrimaryKey(String),

    /// Replication failed for a specific table
    #[error("Replication failed for table {table}: {message}")]
    Transfer { table: String, message: String },

    /// A foreign key value has no entry in the referenced table's remap table
    #[error("Dangling reference in {table}.{column}: key {value} not found in remap table for {referenced_table}")]
    DanglingReference {
        table: String,
        column: String,
        value: String,
        referenced_table: String,
    },

    /// End-of-run summary when dangling references were collected rather than aborted on
    #[error("Foreign key rewrite found {count} dangling reference(s) - see log for details")]
    DanglingReport { count: usize },

    /// A foreign key references a table that was excluded from the run
    #[error("Unresolved dependency: {table}.{column} references {referenced_table}, which has no remap table (skipped by configuration or never migrated)")]
    UnresolvedDependency {
        table: String,
        column: String,
        referenced_table: String,
    },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MigrateError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl Into<String>, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.into(),
            context: context.into(),
        }
    }

    /// Create a Transfer error
    pub fn transfer(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Transfer {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        // Add error chain for wrapped errors
        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }

    /// Map the error taxonomy onto distinct process exit codes.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) | MigrateError::Json(_) => 1,
            MigrateError::Source(_) | MigrateError::Pool { .. } => 2,
            MigrateError::Target(_) => 3,
            MigrateError::SchemaExtraction(_)
            | MigrateError::CompositeKey { .. }
            | MigrateError::NoPrimaryKey(_) => 4,
            MigrateError::Transfer { .. } => 5,
            MigrateError::DanglingReference { .. } | MigrateError::DanglingReport { .. } => 6,
            MigrateError::Io(_) => 7,
            MigrateError::UnresolvedDependency { .. } => 8,
        }
    }
}

/// Result type alias for replication operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dangling_reference_message_names_the_offender() {
        let err = MigrateError::DanglingReference {
            table: "Orders".into(),
            column: "UserId".into(),
            value: "999".into(),
            referenced_table: "Users".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Orders.UserId"));
        assert!(msg.contains("999"));
        assert!(msg.contains("Users"));
    }

    #[test]
    fn test_unresolved_dependency_is_distinct_from_dangling() {
        let unresolved = MigrateError::UnresolvedDependency {
            table: "Orders".into(),
            column: "UserId".into(),
            referenced_table: "Users".into(),
        };
        let dangling = MigrateError::DanglingReference {
            table: "Orders".into(),
            column: "UserId".into(),
            value: "1".into(),
            referenced_table: "Users".into(),
        };
        assert_ne!(unresolved.exit_code(), dangling.exit_code());
    }

    #[test]
    fn test_exit_codes_by_category() {
        assert_eq!(MigrateError::Config("bad".into()).exit_code(), 1);
        assert_eq!(MigrateError::NoPrimaryKey("Logs".into()).exit_code(), 4);
        assert_eq!(MigrateError::DanglingReport { count: 3 }.exit_code(), 6);
    }
}
