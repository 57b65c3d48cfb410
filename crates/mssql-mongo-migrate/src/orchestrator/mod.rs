//! Replication orchestrator - main workflow coordinator.
//!
//! Drives the run strictly sequentially: catalog, then pass 1
//! (materialize, remap, insert) for every table, then pass 2 (foreign-key
//! rewrite) for every dependent table. All of pass 1 completes before any
//! of pass 2 starts; that temporal ordering is what makes cyclic and
//! self-referential foreign keys safe without a dependency graph.
//!
//! There is no resume state: pass 1 uses plain inserts, so a failed run is
//! restarted from scratch against a cleared destination.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{Config, MissingKeyPolicy};
use crate::error::{MigrateError, Result};
use crate::remap::remap_rows;
use crate::rewrite::ForeignKeyRewriter;
use crate::source::MssqlPool;
use crate::target::{
    remap_collection, DocumentStore, MongoTarget, FOREIGN_KEYS_COLLECTION, PRIMARY_KEYS_COLLECTION,
};

/// Replication orchestrator.
///
/// Holds both store connections for the run's lifetime; they are released
/// on drop, success or failure.
pub struct Orchestrator {
    config: Config,
    source: MssqlPool,
    target: MongoTarget,
}

/// Result of a replication run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationResult {
    /// Unique run identifier.
    pub run_id: String,

    /// Final status.
    pub status: String,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run completed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Tables in the catalog after skip-list filtering.
    pub tables_total: usize,

    /// Tables replicated (including empty tables, which issue no writes).
    pub tables_migrated: usize,

    /// Tables skipped by the missing-primary-key policy.
    pub tables_skipped: usize,

    /// Rows copied across all tables.
    pub rows_copied: u64,

    /// Documents that received a foreign-key rewrite in pass 2.
    pub documents_rewritten: u64,
}

impl MigrationResult {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Result of a connectivity probe against both stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub source_connected: bool,
    pub source_latency_ms: u64,
    pub source_error: Option<String>,
    pub target_connected: bool,
    pub target_latency_ms: u64,
    pub target_error: Option<String>,
    pub healthy: bool,
}

impl Orchestrator {
    /// Create a new orchestrator, acquiring both store connections.
    ///
    /// An unreachable store fails here, before any table is processed.
    pub async fn new(config: Config) -> Result<Self> {
        let source = MssqlPool::new(
            config.source.clone(),
            config.migration.max_source_connections as u32,
        )
        .await?;
        let target = MongoTarget::connect(&config.target).await?;

        Ok(Self {
            config,
            source,
            target,
        })
    }

    /// Run the replication.
    pub async fn run(self) -> Result<MigrationResult> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let migration = &self.config.migration;

        info!("Starting replication run: {}", run_id);
        if !migration.remap_keys {
            info!("Key remapping disabled: identity copy, foreign keys left untouched");
        }

        // Phase 1: read the schema catalog and persist the raw constraint
        // records for traceability.
        info!("Phase 1: Reading schema catalog");
        let catalog = self.source.read_catalog(migration).await?;
        self.target
            .insert_records(
                PRIMARY_KEYS_COLLECTION,
                &catalog.primary_keys,
                migration.insert_batch_size,
            )
            .await?;
        self.target
            .insert_records(
                FOREIGN_KEYS_COLLECTION,
                &catalog.foreign_keys,
                migration.insert_batch_size,
            )
            .await?;

        info!("Replicating {} tables", catalog.tables.len());

        // Phase 2 (pass 1): materialize, remap, insert - table by table.
        let mut remaps = Vec::new();
        let mut tables_migrated = 0usize;
        let mut tables_skipped = 0usize;
        let mut rows_copied = 0u64;

        for descriptor in &catalog.tables {
            if !migration.remap_keys && descriptor.primary_key.is_none() {
                match migration.on_missing_primary_key {
                    MissingKeyPolicy::Abort => {
                        return Err(MigrateError::NoPrimaryKey(descriptor.name.clone()));
                    }
                    MissingKeyPolicy::Skip => {
                        warn!(
                            "Skipping table {}: no primary key (on_missing_primary_key=skip)",
                            descriptor.name
                        );
                        tables_skipped += 1;
                        continue;
                    }
                }
            }

            info!(
                "Replicating {} (primary key: {})",
                descriptor.name,
                descriptor.primary_key.as_deref().unwrap_or("<none>")
            );

            let rows = self.source.fetch_all(&descriptor.name).await?;
            if rows.is_empty() {
                info!("{}: no records to transfer", descriptor.name);
            }
            let row_count = rows.len() as u64;

            let output = remap_rows(descriptor, rows, migration.remap_keys)?;
            self.target
                .insert_documents(&descriptor.name, &output.documents, migration.insert_batch_size)
                .await
                .map_err(|e| MigrateError::transfer(descriptor.name.clone(), e.to_string()))?;

            if let Some(remap) = output.remap {
                self.target
                    .insert_documents(
                        &remap_collection(&descriptor.name),
                        &remap.to_documents(),
                        migration.insert_batch_size,
                    )
                    .await
                    .map_err(|e| MigrateError::transfer(descriptor.name.clone(), e.to_string()))?;
                remaps.push(remap);
            }

            rows_copied += row_count;
            tables_migrated += 1;
            info!("{}: copied {} rows", descriptor.name, row_count);
        }

        // Phase 3 (pass 2): rewrite foreign keys. Requires pass 1 complete
        // for every table, which the sequential loop above guarantees.
        let mut documents_rewritten = 0u64;
        let mut dangling_count = 0usize;

        if migration.remap_keys {
            info!("Phase 2: Rewriting foreign keys");
            let mut rewriter = ForeignKeyRewriter::new(&self.target, migration);
            for remap in remaps {
                rewriter.preload(remap);
            }

            for descriptor in &catalog.tables {
                if !descriptor.has_foreign_keys() {
                    continue;
                }
                let stats = rewriter.rewrite_table(descriptor).await?;
                documents_rewritten += stats.documents_updated;
                dangling_count += stats.dangling.len();
            }
        }

        let completed_at = Utc::now();
        let duration = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;

        let result = MigrationResult {
            run_id,
            status: if dangling_count > 0 { "failed" } else { "completed" }.to_string(),
            started_at,
            completed_at,
            duration_seconds: duration,
            tables_total: catalog.tables.len(),
            tables_migrated,
            tables_skipped,
            rows_copied,
            documents_rewritten,
        };

        info!(
            "Replication {}: {} tables, {} rows, {} foreign keys rewritten in {:.1}s",
            result.status,
            result.tables_migrated,
            result.rows_copied,
            result.documents_rewritten,
            result.duration_seconds
        );

        // Collect-mode dangling references were logged per document; the
        // run still fails so nothing downstream trusts a half-rewritten
        // destination.
        if dangling_count > 0 {
            return Err(MigrateError::DanglingReport {
                count: dangling_count,
            });
        }

        Ok(result)
    }

    /// Probe connectivity to both stores.
    pub async fn health_check(&self) -> Result<HealthCheckResult> {
        let start = std::time::Instant::now();
        let source_result = self.source.ping().await;
        let source_latency_ms = start.elapsed().as_millis() as u64;

        let start = std::time::Instant::now();
        let target_result = self.target.ping().await;
        let target_latency_ms = start.elapsed().as_millis() as u64;

        let result = HealthCheckResult {
            source_connected: source_result.is_ok(),
            source_latency_ms,
            source_error: source_result.err().map(|e| e.to_string()),
            target_connected: target_result.is_ok(),
            target_latency_ms,
            target_error: target_result.err().map(|e| e.to_string()),
            healthy: false,
        };

        Ok(HealthCheckResult {
            healthy: result.source_connected && result.target_connected,
            ..result
        })
    }
}
