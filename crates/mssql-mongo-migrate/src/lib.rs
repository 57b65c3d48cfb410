//! # mssql-mongo-migrate
//!
//! Bulk MSSQL to MongoDB replication library.
//!
//! Copies every base table of a SQL Server database into a MongoDB
//! database, one collection per table, with support for:
//!
//! - **Primary key remapping** to freshly generated ObjectIds, with a
//!   persisted `<table>-pkremap` collection per table recording the
//!   old-key to new-id mapping
//! - **Foreign key rewriting** in a second pass, so referential structure
//!   survives the representation change (cycles and self-references
//!   included)
//! - **Identity copy mode** that reuses key values verbatim and skips the
//!   rewrite pass entirely
//! - **Skip lists** for tables that should not be replicated, with
//!   explicit errors when a replicated table still references one
//!
//! ## Example
//!
//! ```rust,no_run
//! use mssql_mongo_migrate::{Config, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("config.yaml")?;
//!     let result = Orchestrator::new(config).await?.run().await?;
//!     println!("Copied {} rows", result.rows_copied);
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod core;
pub mod error;
pub mod orchestrator;
pub mod remap;
pub mod rewrite;
pub mod source;
pub mod target;

// Re-exports for convenient access
pub use catalog::{Catalog, ForeignKeyRef, TableDescriptor};
pub use config::{Config, DanglingPolicy, MigrationConfig, MissingKeyPolicy, SourceConfig, TargetConfig};
pub use crate::core::{SourceRow, SqlValue};
pub use error::{MigrateError, Result};
pub use orchestrator::{HealthCheckResult, MigrationResult, Orchestrator};
pub use remap::{remap_rows, RemapKey, RemapTable};
pub use rewrite::ForeignKeyRewriter;
pub use source::MssqlPool;
pub use target::{DocumentStore, MongoTarget};
