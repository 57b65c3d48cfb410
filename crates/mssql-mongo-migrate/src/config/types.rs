//! Configuration type definitions.

use serde::{Deserialize, Serialize};

/// Root configuration structure.
///
/// Passed explicitly into the orchestrator and down into every component
/// that needs it - there is no ambient configuration singleton.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source database configuration (MSSQL).
    pub source: SourceConfig,

    /// Target database configuration (MongoDB).
    pub target: TargetConfig,

    /// Replication behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,
}

/// Source database (MSSQL) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Database type (always "mssql" for now).
    #[serde(default = "default_mssql")]
    pub r#type: String,

    /// Database host.
    pub host: String,

    /// Database port (default: 1433).
    #[serde(default = "default_mssql_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    pub password: String,

    /// Source schema (default: "dbo").
    #[serde(default = "default_dbo_schema")]
    pub schema: String,

    /// Encrypt connection (default: "true").
    #[serde(default = "default_true_string")]
    pub encrypt: String,

    /// Trust server certificate (default: false).
    #[serde(default)]
    pub trust_server_cert: bool,
}

/// Target database (MongoDB) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Database type (always "mongodb" for now).
    #[serde(default = "default_mongodb")]
    pub r#type: String,

    /// Connection string, e.g. "mongodb://localhost:27017".
    pub uri: String,

    /// Database where the replicated collections end up.
    pub database: String,
}

/// Replication behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Tables excluded entirely from replication. A skipped table is also
    /// not a valid foreign-key dependency target; references to it fail
    /// the rewrite pass with an unresolved-dependency error.
    #[serde(default)]
    pub skip_tables: Vec<String>,

    /// Remap primary keys to fresh surrogate identifiers and rewrite
    /// foreign keys (default: true). When false the run degrades to an
    /// identity copy: key values are reused verbatim, no remap tables are
    /// written, and the rewrite pass is skipped.
    #[serde(default = "default_true")]
    pub remap_keys: bool,

    /// What to do with a table that has no primary key when one is
    /// required (default: abort).
    #[serde(default)]
    pub on_missing_primary_key: MissingKeyPolicy,

    /// What to do when a foreign key value has no remap entry
    /// (default: abort).
    #[serde(default)]
    pub on_dangling_reference: DanglingPolicy,

    /// Documents per bulk insert call (default: 1000).
    #[serde(default = "default_insert_batch_size")]
    pub insert_batch_size: usize,

    /// Maximum MSSQL connections (default: 4).
    #[serde(default = "default_max_source_connections")]
    pub max_source_connections: usize,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            skip_tables: Vec::new(),
            remap_keys: true,
            on_missing_primary_key: MissingKeyPolicy::default(),
            on_dangling_reference: DanglingPolicy::default(),
            insert_batch_size: default_insert_batch_size(),
            max_source_connections: default_max_source_connections(),
        }
    }
}

impl MigrationConfig {
    /// Check whether a table is excluded from the run.
    pub fn is_skipped(&self, table: &str) -> bool {
        self.skip_tables.iter().any(|t| t == table)
    }
}

/// Policy for tables lacking a usable single-column primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingKeyPolicy {
    /// Abort the whole run.
    #[default]
    Abort,

    /// Skip the table and continue.
    Skip,
}

/// Policy for foreign key values with no matching remap entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DanglingPolicy {
    /// Abort the run on the first dangling reference.
    #[default]
    Abort,

    /// Record every dangling reference, leave the stale value in place,
    /// and fail the run at the end with the full report.
    Collect,
}

// Default value functions for serde
fn default_mssql() -> String {
    "mssql".to_string()
}

fn default_mongodb() -> String {
    "mongodb".to_string()
}

fn default_mssql_port() -> u16 {
    1433
}

fn default_dbo_schema() -> String {
    "dbo".to_string()
}

fn default_true_string() -> String {
    "true".to_string()
}

fn default_true() -> bool {
    true
}

fn default_insert_batch_size() -> usize {
    1000
}

fn default_max_source_connections() -> usize {
    4
}
