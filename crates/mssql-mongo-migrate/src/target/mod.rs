//! MongoDB target database operations.

use mongodb::bson::{doc, Bson, Document};
use mongodb::{Client, Collection, Database};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::TargetConfig;
use crate::error::{MigrateError, Result};

/// Collection holding the old-key to new-id mapping for a table.
pub fn remap_collection(table: &str) -> String {
    format!("{}-pkremap", table)
}

/// Audit collection for raw primary-key catalog records.
pub const PRIMARY_KEYS_COLLECTION: &str = "primaryKeys";

/// Audit collection for raw foreign-key catalog records.
pub const FOREIGN_KEYS_COLLECTION: &str = "foreignKeys";

/// Destination document store operations the replication passes depend on.
///
/// The rewrite pass is written against this seam so its driver logic can be
/// exercised without a running MongoDB.
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    /// Check whether a collection exists in the target database.
    async fn collection_exists(&self, name: &str) -> Result<bool>;

    /// Bulk-insert documents. Never issued with zero documents.
    async fn insert_documents(
        &self,
        collection: &str,
        documents: &[Document],
        batch_size: usize,
    ) -> Result<u64>;

    /// Read every document of a collection.
    async fn read_all(&self, collection: &str) -> Result<Vec<Document>>;

    /// Partially update one document matched by its surrogate identifier.
    async fn update_fields(&self, collection: &str, id: &Bson, set: Document) -> Result<()>;
}

/// MongoDB target database handle.
///
/// The client is acquired once for the run's lifetime and released on drop.
pub struct MongoTarget {
    client: Client,
    db: Database,
}

impl MongoTarget {
    /// Connect to the target database and verify it is reachable.
    pub async fn connect(config: &TargetConfig) -> Result<Self> {
        let client = Client::with_uri_str(&config.uri)
            .await
            .map_err(MigrateError::Target)?;
        let db = client.database(&config.database);

        // Fail at startup rather than mid-run if the store is unreachable.
        db.run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(MigrateError::Target)?;

        info!("Connected to MongoDB: {}/{}", config.uri, config.database);

        Ok(Self { client, db })
    }

    /// Round-trip probe for health checks.
    pub async fn ping(&self) -> Result<()> {
        self.db
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(MigrateError::Target)?;
        Ok(())
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.db.collection::<Document>(name)
    }

    /// Serialize and bulk-insert typed records (used for the audit
    /// collections). Empty input issues no write call.
    pub async fn insert_records<T: Serialize>(
        &self,
        collection: &str,
        records: &[T],
        batch_size: usize,
    ) -> Result<u64> {
        let documents = records
            .iter()
            .map(|r| {
                mongodb::bson::to_document(r)
                    .map_err(|e| MigrateError::transfer(collection, e.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;
        self.insert_documents(collection, &documents, batch_size).await
    }

    /// The underlying client, for lifecycle management.
    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait::async_trait]
impl DocumentStore for MongoTarget {
    async fn collection_exists(&self, name: &str) -> Result<bool> {
        let names = self
            .db
            .list_collection_names(doc! { "name": name })
            .await
            .map_err(MigrateError::Target)?;
        Ok(!names.is_empty())
    }

    /// A bulk write with zero operations is invalid; callers skip empty
    /// tables, and this guards against empty slices as well.
    async fn insert_documents(
        &self,
        collection: &str,
        documents: &[Document],
        batch_size: usize,
    ) -> Result<u64> {
        if documents.is_empty() {
            return Ok(0);
        }

        let coll = self.collection(collection);
        let mut inserted: u64 = 0;
        for chunk in documents.chunks(batch_size.max(1)) {
            let result = coll.insert_many(chunk, None).await.map_err(MigrateError::Target)?;
            inserted += result.inserted_ids.len() as u64;
        }

        debug!("Inserted {} documents into {}", inserted, collection);
        Ok(inserted)
    }

    async fn read_all(&self, collection: &str) -> Result<Vec<Document>> {
        let mut cursor = self
            .collection(collection)
            .find(None, None)
            .await
            .map_err(MigrateError::Target)?;

        let mut documents = Vec::new();
        while cursor.advance().await.map_err(MigrateError::Target)? {
            documents.push(cursor.deserialize_current().map_err(MigrateError::Target)?);
        }
        Ok(documents)
    }

    async fn update_fields(&self, collection: &str, id: &Bson, set: Document) -> Result<()> {
        self.collection(collection)
            .update_one(doc! { "_id": id.clone() }, doc! { "$set": set }, None)
            .await
            .map_err(MigrateError::Target)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remap_collection_naming() {
        assert_eq!(remap_collection("Users"), "Users-pkremap");
        assert_eq!(remap_collection("Order Details"), "Order Details-pkremap");
    }
}
