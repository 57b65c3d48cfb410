//! Foreign key rewriting: pass 2 of the replication.
//!
//! Runs only when key remapping is enabled and only after pass 1 has
//! completed for every table in the run - serializing the passes handles
//! cyclic and self-referential foreign keys without any dependency ordering.
//!
//! For each dependent table the rewriter loads the referenced tables' remap
//! tables back from the destination store, reads every written document,
//! and rewrites each non-null foreign-key column in place to the surrogate
//! identifier the referenced row was assigned. Lookup misses are explicit:
//! a missing remap table is an unresolved dependency (configuration), a
//! missing entry is a dangling reference (source data).

use std::collections::HashMap;

use mongodb::bson::Document;
use tracing::{debug, error, info};

use crate::catalog::TableDescriptor;
use crate::config::{DanglingPolicy, MigrationConfig};
use crate::error::{MigrateError, Result};
use crate::remap::{RemapKey, RemapTable};
use crate::target::{remap_collection, DocumentStore};

/// One foreign-key value that resolved to nothing.
#[derive(Debug, Clone)]
pub struct DanglingRecord {
    /// Dependent table.
    pub table: String,

    /// Foreign-key column.
    pub column: String,

    /// The unresolvable key value, rendered for diagnostics.
    pub value: String,

    /// Table the column references.
    pub referenced_table: String,
}

impl DanglingRecord {
    fn into_error(self) -> MigrateError {
        MigrateError::DanglingReference {
            table: self.table,
            column: self.column,
            value: self.value,
            referenced_table: self.referenced_table,
        }
    }
}

/// The staged partial update for one document.
#[derive(Debug, Default)]
pub struct StagedUpdate {
    /// Foreign-key columns to rewrite, with their new identifiers.
    pub set: Document,

    /// Lookup misses for this document.
    pub dangling: Vec<DanglingRecord>,
}

/// Compute the partial update for one written document.
///
/// Null or absent foreign-key values are legal and skipped. Every referenced
/// table must have an entry in `remaps`; a missing one is an unresolved
/// dependency (the referenced table was skipped by configuration or never
/// produced a remap table).
pub fn stage_update(
    descriptor: &TableDescriptor,
    doc: &Document,
    remaps: &HashMap<String, RemapTable>,
) -> Result<StagedUpdate> {
    let mut staged = StagedUpdate::default();

    for (column, fk) in &descriptor.foreign_keys {
        let value = match doc.get(column) {
            None | Some(mongodb::bson::Bson::Null) => continue,
            Some(value) => value,
        };

        let remap = remaps.get(&fk.referenced_table).ok_or_else(|| {
            MigrateError::UnresolvedDependency {
                table: descriptor.name.clone(),
                column: column.clone(),
                referenced_table: fk.referenced_table.clone(),
            }
        })?;

        match RemapKey::from_bson(value).and_then(|key| remap.get(&key)) {
            Some(new_id) => {
                staged.set.insert(column.clone(), new_id);
            }
            None => staged.dangling.push(DanglingRecord {
                table: descriptor.name.clone(),
                column: column.clone(),
                value: value.to_string(),
                referenced_table: fk.referenced_table.clone(),
            }),
        }
    }

    Ok(staged)
}

/// Per-table result of the rewrite pass.
#[derive(Debug, Default)]
pub struct RewriteStats {
    /// Documents read from the destination collection.
    pub documents_scanned: u64,

    /// Documents that received a partial update.
    pub documents_updated: u64,

    /// Dangling references found (only populated under the collect policy).
    pub dangling: Vec<DanglingRecord>,
}

/// Drives pass 2 against the destination store, caching loaded remap
/// tables across dependent tables.
pub struct ForeignKeyRewriter<'a, S: DocumentStore> {
    store: &'a S,
    migration: &'a MigrationConfig,
    remaps: HashMap<String, RemapTable>,
}

impl<'a, S: DocumentStore> ForeignKeyRewriter<'a, S> {
    /// Create a rewriter over the destination store.
    pub fn new(store: &'a S, migration: &'a MigrationConfig) -> Self {
        Self {
            store,
            migration,
            remaps: HashMap::new(),
        }
    }

    /// Seed the cache with a remap table produced earlier in the run.
    ///
    /// Avoids a read-back, and keeps tables that produced zero entries
    /// resolvable: an empty remap table is a valid lookup target (every
    /// miss is a dangling reference), an absent one is not.
    pub fn preload(&mut self, remap: RemapTable) {
        self.remaps.insert(remap.table.clone(), remap);
    }

    /// Make sure every table this descriptor references has its remap
    /// table loaded, reading persisted `<table>-pkremap` collections on
    /// first use.
    async fn resolve_remaps(&mut self, descriptor: &TableDescriptor) -> Result<()> {
        for (column, fk) in &descriptor.foreign_keys {
            let ref_table = &fk.referenced_table;
            if self.remaps.contains_key(ref_table) {
                continue;
            }

            let unresolved = || MigrateError::UnresolvedDependency {
                table: descriptor.name.clone(),
                column: column.clone(),
                referenced_table: ref_table.clone(),
            };

            // A skipped referenced table never wrote a remap table; detect
            // the absent collection and report it as configuration-caused,
            // distinct from a genuinely orphaned reference.
            if self.migration.is_skipped(ref_table) {
                return Err(unresolved());
            }
            let collection = remap_collection(ref_table);
            if !self.store.collection_exists(&collection).await? {
                return Err(unresolved());
            }

            let documents = self.store.read_all(&collection).await?;
            let remap = RemapTable::from_documents(ref_table.clone(), documents)?;
            debug!("Loaded remap table for {} ({} entries)", ref_table, remap.len());
            self.remaps.insert(ref_table.clone(), remap);
        }
        Ok(())
    }

    /// Rewrite every foreign-key column of one table's destination
    /// collection.
    ///
    /// Under [`DanglingPolicy::Abort`] the first lookup miss fails the
    /// table; under [`DanglingPolicy::Collect`] misses are recorded, the
    /// stale value is left in place, and the caller fails the run at the
    /// end. Columns that did resolve are still rewritten either way.
    pub async fn rewrite_table(&mut self, descriptor: &TableDescriptor) -> Result<RewriteStats> {
        self.resolve_remaps(descriptor).await?;

        let documents = self.store.read_all(&descriptor.name).await?;
        let mut stats = RewriteStats {
            documents_scanned: documents.len() as u64,
            ..RewriteStats::default()
        };

        for doc in &documents {
            let staged = stage_update(descriptor, doc, &self.remaps)?;

            if !staged.dangling.is_empty() {
                match self.migration.on_dangling_reference {
                    DanglingPolicy::Abort => {
                        return Err(staged.dangling.into_iter().next().unwrap().into_error());
                    }
                    DanglingPolicy::Collect => {
                        for record in &staged.dangling {
                            error!(
                                "Dangling reference in {}.{}: key {} not found in remap table for {}",
                                record.table, record.column, record.value, record.referenced_table
                            );
                        }
                        stats.dangling.extend(staged.dangling);
                    }
                }
            }

            if !staged.set.is_empty() {
                let id = doc.get("_id").cloned().ok_or_else(|| {
                    MigrateError::transfer(
                        descriptor.name.clone(),
                        "destination document has no _id".to_string(),
                    )
                })?;
                self.store.update_fields(&descriptor.name, &id, staged.set).await?;
                stats.documents_updated += 1;
            }
        }

        info!(
            "Rewrote foreign keys in {}: {} of {} documents updated",
            descriptor.name, stats.documents_updated, stats.documents_scanned
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ForeignKeyRef;
    use crate::config::MigrationConfig;
    use mongodb::bson::{doc, oid::ObjectId, Bson};
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// In-memory document store for exercising the rewrite driver.
    #[derive(Default)]
    struct MemoryStore {
        collections: Mutex<HashMap<String, Vec<Document>>>,
    }

    impl MemoryStore {
        fn with_collection(self, name: &str, documents: Vec<Document>) -> Self {
            self.collections.lock().unwrap().insert(name.to_string(), documents);
            self
        }

        fn documents(&self, name: &str) -> Vec<Document> {
            self.collections.lock().unwrap().get(name).cloned().unwrap_or_default()
        }
    }

    #[async_trait::async_trait]
    impl DocumentStore for MemoryStore {
        async fn collection_exists(&self, name: &str) -> Result<bool> {
            Ok(self.collections.lock().unwrap().contains_key(name))
        }

        async fn insert_documents(
            &self,
            collection: &str,
            documents: &[Document],
            _batch_size: usize,
        ) -> Result<u64> {
            assert!(!documents.is_empty(), "zero-operation bulk write");
            let mut collections = self.collections.lock().unwrap();
            collections
                .entry(collection.to_string())
                .or_default()
                .extend(documents.iter().cloned());
            Ok(documents.len() as u64)
        }

        async fn read_all(&self, collection: &str) -> Result<Vec<Document>> {
            Ok(self.documents(collection))
        }

        async fn update_fields(&self, collection: &str, id: &Bson, set: Document) -> Result<()> {
            let mut collections = self.collections.lock().unwrap();
            let docs = collections.get_mut(collection).expect("unknown collection");
            let doc = docs
                .iter_mut()
                .find(|d| d.get("_id") == Some(id))
                .expect("unknown document id");
            for (key, value) in set {
                doc.insert(key, value);
            }
            Ok(())
        }
    }

    fn orders_descriptor() -> TableDescriptor {
        let mut foreign_keys = BTreeMap::new();
        foreign_keys.insert(
            "UserId".to_string(),
            ForeignKeyRef {
                referenced_table: "Users".into(),
                referenced_column: "Id".into(),
            },
        );
        TableDescriptor {
            name: "Orders".into(),
            primary_key: Some("Id".into()),
            foreign_keys,
        }
    }

    fn users_remap(old_key: i32) -> (RemapTable, ObjectId) {
        let mut remap = RemapTable::new("Users");
        let id = ObjectId::new();
        remap.insert(Bson::Int32(old_key), id).unwrap();
        (remap, id)
    }

    #[test]
    fn test_stage_update_rewrites_foreign_key() {
        let (remap, user_id) = users_remap(1);
        let mut remaps = HashMap::new();
        remaps.insert("Users".to_string(), remap);

        let doc = doc! { "_id": ObjectId::new(), "UserId": 1, "Total": 99 };
        let staged = stage_update(&orders_descriptor(), &doc, &remaps).unwrap();

        assert!(staged.dangling.is_empty());
        assert_eq!(staged.set.len(), 1);
        assert_eq!(staged.set.get_object_id("UserId").unwrap(), user_id);
    }

    #[test]
    fn test_stage_update_skips_null_foreign_key() {
        let (remap, _) = users_remap(1);
        let mut remaps = HashMap::new();
        remaps.insert("Users".to_string(), remap);

        let doc = doc! { "_id": ObjectId::new(), "UserId": Bson::Null };
        let staged = stage_update(&orders_descriptor(), &doc, &remaps).unwrap();

        assert!(staged.set.is_empty());
        assert!(staged.dangling.is_empty());
    }

    #[test]
    fn test_stage_update_reports_dangling_reference() {
        let (remap, _) = users_remap(1);
        let mut remaps = HashMap::new();
        remaps.insert("Users".to_string(), remap);

        let doc = doc! { "_id": ObjectId::new(), "UserId": 999 };
        let staged = stage_update(&orders_descriptor(), &doc, &remaps).unwrap();

        assert!(staged.set.is_empty());
        assert_eq!(staged.dangling.len(), 1);
        let record = &staged.dangling[0];
        assert_eq!(record.table, "Orders");
        assert_eq!(record.column, "UserId");
        assert_eq!(record.value, "999");
        assert_eq!(record.referenced_table, "Users");
    }

    #[test]
    fn test_stage_update_missing_remap_table_is_unresolved() {
        let doc = doc! { "_id": ObjectId::new(), "UserId": 1 };
        match stage_update(&orders_descriptor(), &doc, &HashMap::new()) {
            Err(MigrateError::UnresolvedDependency { referenced_table, .. }) => {
                assert_eq!(referenced_table, "Users");
            }
            other => panic!("expected UnresolvedDependency, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rewrite_table_round_trip() {
        // Users row 1 was remapped; Orders row references it by old key.
        let (remap, user_id) = users_remap(1);
        let order_id = ObjectId::new();
        let store = MemoryStore::default()
            .with_collection("Users-pkremap", remap.to_documents())
            .with_collection(
                "Orders",
                vec![doc! { "_id": order_id, "UserId": 1, "Total": 12 }],
            );

        let migration = MigrationConfig::default();
        let mut rewriter = ForeignKeyRewriter::new(&store, &migration);
        let stats = rewriter.rewrite_table(&orders_descriptor()).await.unwrap();

        assert_eq!(stats.documents_scanned, 1);
        assert_eq!(stats.documents_updated, 1);

        let orders = store.documents("Orders");
        assert_eq!(orders[0].get_object_id("UserId").unwrap(), user_id);
        // Untouched columns survive the partial update.
        assert_eq!(orders[0].get_i32("Total").unwrap(), 12);
    }

    #[tokio::test]
    async fn test_rewrite_self_referential_table() {
        let mut foreign_keys = BTreeMap::new();
        foreign_keys.insert(
            "ManagerId".to_string(),
            ForeignKeyRef {
                referenced_table: "Employees".into(),
                referenced_column: "Id".into(),
            },
        );
        let descriptor = TableDescriptor {
            name: "Employees".into(),
            primary_key: Some("Id".into()),
            foreign_keys,
        };

        let mut remap = RemapTable::new("Employees");
        let boss_id = ObjectId::new();
        let worker_id = ObjectId::new();
        remap.insert(Bson::Int32(1), boss_id).unwrap();
        remap.insert(Bson::Int32(2), worker_id).unwrap();

        let store = MemoryStore::default()
            .with_collection("Employees-pkremap", remap.to_documents())
            .with_collection(
                "Employees",
                vec![
                    doc! { "_id": boss_id, "ManagerId": Bson::Null },
                    doc! { "_id": worker_id, "ManagerId": 1 },
                ],
            );

        let migration = MigrationConfig::default();
        let mut rewriter = ForeignKeyRewriter::new(&store, &migration);
        let stats = rewriter.rewrite_table(&descriptor).await.unwrap();

        assert_eq!(stats.documents_updated, 1);
        let employees = store.documents("Employees");
        assert_eq!(employees[1].get_object_id("ManagerId").unwrap(), boss_id);
        // Null manager stays null.
        assert_eq!(employees[0].get("ManagerId"), Some(&Bson::Null));
    }

    #[tokio::test]
    async fn test_rewrite_aborts_on_first_dangling_by_default() {
        let (remap, _) = users_remap(1);
        let store = MemoryStore::default()
            .with_collection("Users-pkremap", remap.to_documents())
            .with_collection(
                "Orders",
                vec![doc! { "_id": ObjectId::new(), "UserId": 999 }],
            );

        let migration = MigrationConfig::default();
        let mut rewriter = ForeignKeyRewriter::new(&store, &migration);
        match rewriter.rewrite_table(&orders_descriptor()).await {
            Err(MigrateError::DanglingReference { value, .. }) => assert_eq!(value, "999"),
            other => panic!("expected DanglingReference, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rewrite_collect_policy_keeps_going() {
        let (remap, user_id) = users_remap(1);
        let good_id = ObjectId::new();
        let bad_id = ObjectId::new();
        let store = MemoryStore::default()
            .with_collection("Users-pkremap", remap.to_documents())
            .with_collection(
                "Orders",
                vec![
                    doc! { "_id": bad_id, "UserId": 999 },
                    doc! { "_id": good_id, "UserId": 1 },
                ],
            );

        let migration = MigrationConfig {
            on_dangling_reference: DanglingPolicy::Collect,
            ..MigrationConfig::default()
        };
        let mut rewriter = ForeignKeyRewriter::new(&store, &migration);
        let stats = rewriter.rewrite_table(&orders_descriptor()).await.unwrap();

        assert_eq!(stats.dangling.len(), 1);
        assert_eq!(stats.documents_updated, 1);

        let orders = store.documents("Orders");
        // The stale value is left in place, never silently half-rewritten.
        assert_eq!(orders[0].get_i32("UserId").unwrap(), 999);
        assert_eq!(orders[1].get_object_id("UserId").unwrap(), user_id);
    }

    #[tokio::test]
    async fn test_reference_to_skipped_table_is_unresolved() {
        let store = MemoryStore::default().with_collection(
            "Orders",
            vec![doc! { "_id": ObjectId::new(), "UserId": 1 }],
        );

        let migration = MigrationConfig {
            skip_tables: vec!["Users".into()],
            ..MigrationConfig::default()
        };
        let mut rewriter = ForeignKeyRewriter::new(&store, &migration);
        match rewriter.rewrite_table(&orders_descriptor()).await {
            Err(MigrateError::UnresolvedDependency { table, column, referenced_table }) => {
                assert_eq!(table, "Orders");
                assert_eq!(column, "UserId");
                assert_eq!(referenced_table, "Users");
            }
            other => panic!("expected UnresolvedDependency, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_preloaded_empty_remap_yields_dangling_not_unresolved() {
        // Users migrated with zero rows: its remap table exists but is
        // empty, so a reference into it is an orphan, not a config error.
        let store = MemoryStore::default().with_collection(
            "Orders",
            vec![doc! { "_id": ObjectId::new(), "UserId": 5 }],
        );

        let migration = MigrationConfig::default();
        let mut rewriter = ForeignKeyRewriter::new(&store, &migration);
        rewriter.preload(RemapTable::new("Users"));

        assert!(matches!(
            rewriter.rewrite_table(&orders_descriptor()).await,
            Err(MigrateError::DanglingReference { .. })
        ));
    }

    #[tokio::test]
    async fn test_absent_remap_collection_is_unresolved() {
        // Users was never migrated: no Users-pkremap collection exists.
        let store = MemoryStore::default().with_collection(
            "Orders",
            vec![doc! { "_id": ObjectId::new(), "UserId": 1 }],
        );

        let migration = MigrationConfig::default();
        let mut rewriter = ForeignKeyRewriter::new(&store, &migration);
        assert!(matches!(
            rewriter.rewrite_table(&orders_descriptor()).await,
            Err(MigrateError::UnresolvedDependency { .. })
        ));
    }
}
