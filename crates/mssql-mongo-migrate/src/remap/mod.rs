//! Key remapping: pass 1 of the replication.
//!
//! For each materialized table this module assigns fresh surrogate
//! identifiers, substitutes them for the relational primary key, and records
//! the reversible old-key to new-id mapping that pass 2 uses to rewrite
//! foreign keys. Pure logic - persistence is the orchestrator's job.

use std::collections::HashMap;

use mongodb::bson::{oid::ObjectId, Bson, Document};
use tracing::warn;

use crate::catalog::TableDescriptor;
use crate::core::{SourceRow, SqlValue};
use crate::error::{MigrateError, Result};

/// Canonical hashable form of a key scalar.
///
/// Old keys enter the remap table from source rows ([`SqlValue`]) in pass 1
/// and are looked up from written documents ([`Bson`]) in pass 2; both sides
/// normalize here so a 32-bit source key matches its 64-bit read-back and a
/// GUID matches its stored string form. NULL is never a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RemapKey {
    Bool(bool),
    Int(i64),
    /// Float keys compared by bit pattern.
    Float(u64),
    Text(String),
    Bytes(Vec<u8>),
    /// Timestamp keys as epoch milliseconds.
    DateTime(i64),
}

impl RemapKey {
    /// Normalize a source scalar into key form. Returns `None` for NULL.
    pub fn from_value(value: &SqlValue) -> Option<Self> {
        match value {
            SqlValue::Null => None,
            SqlValue::Bool(v) => Some(RemapKey::Bool(*v)),
            SqlValue::I16(v) => Some(RemapKey::Int(*v as i64)),
            SqlValue::I32(v) => Some(RemapKey::Int(*v as i64)),
            SqlValue::I64(v) => Some(RemapKey::Int(*v)),
            SqlValue::F32(v) => Some(RemapKey::Float((*v as f64).to_bits())),
            SqlValue::F64(v) => Some(RemapKey::Float(v.to_bits())),
            SqlValue::Text(v) => Some(RemapKey::Text(v.clone())),
            SqlValue::Bytes(v) => Some(RemapKey::Bytes(v.clone())),
            // These keep the same textual form into_bson() writes, so the
            // pass-2 read-back normalizes to an identical key.
            SqlValue::Uuid(v) => Some(RemapKey::Text(v.to_string())),
            SqlValue::Decimal(v) => Some(RemapKey::Text(v.to_string())),
            SqlValue::DateTime(v) => Some(RemapKey::DateTime(v.and_utc().timestamp_millis())),
            SqlValue::Date(v) => Some(RemapKey::Text(v.format("%Y-%m-%d").to_string())),
            SqlValue::Time(v) => Some(RemapKey::Text(v.format("%H:%M:%S%.f").to_string())),
        }
    }

    /// Normalize a stored BSON value into key form. Returns `None` for
    /// NULL/absent and for BSON shapes that cannot be key scalars.
    pub fn from_bson(value: &Bson) -> Option<Self> {
        match value {
            Bson::Null | Bson::Undefined => None,
            Bson::Boolean(v) => Some(RemapKey::Bool(*v)),
            Bson::Int32(v) => Some(RemapKey::Int(*v as i64)),
            Bson::Int64(v) => Some(RemapKey::Int(*v)),
            Bson::Double(v) => Some(RemapKey::Float(v.to_bits())),
            Bson::String(v) => Some(RemapKey::Text(v.clone())),
            Bson::Binary(v) => Some(RemapKey::Bytes(v.bytes.clone())),
            Bson::DateTime(v) => Some(RemapKey::DateTime(v.timestamp_millis())),
            _ => None,
        }
    }
}

/// One old-key to new-id mapping.
#[derive(Debug, Clone)]
pub struct RemapEntry {
    /// Original primary-key value, in its stored BSON form.
    pub old_key: Bson,

    /// Freshly generated surrogate identifier.
    pub new_id: ObjectId,
}

/// The remap table for one source table: ordered entries plus a hash index
/// over the canonical key form.
///
/// Created and fully populated during pass 1; read-only during pass 2.
#[derive(Debug, Clone)]
pub struct RemapTable {
    /// Source table this mapping belongs to.
    pub table: String,

    entries: Vec<RemapEntry>,
    index: HashMap<RemapKey, ObjectId>,
}

impl RemapTable {
    /// Create an empty remap table for a source table.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Record a mapping. Duplicate old keys violate source primary-key
    /// uniqueness and are rejected.
    pub fn insert(&mut self, old_key: Bson, new_id: ObjectId) -> Result<()> {
        let key = RemapKey::from_bson(&old_key).ok_or_else(|| {
            MigrateError::transfer(
                self.table.clone(),
                format!("primary key value {} cannot be used as a remap key", old_key),
            )
        })?;

        if self.index.insert(key, new_id).is_some() {
            return Err(MigrateError::transfer(
                self.table.clone(),
                format!("duplicate primary key value {} in remap table", old_key),
            ));
        }

        self.entries.push(RemapEntry { old_key, new_id });
        Ok(())
    }

    /// Look up the surrogate identifier for an old key.
    pub fn get(&self, key: &RemapKey) -> Option<ObjectId> {
        self.index.get(key).copied()
    }

    /// Number of mappings.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the table holds no mappings.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order.
    pub fn entries(&self) -> &[RemapEntry] {
        &self.entries
    }

    /// Serialize entries for persistence, keyed by the new identifier.
    pub fn to_documents(&self) -> Vec<Document> {
        self.entries
            .iter()
            .map(|entry| {
                let mut doc = Document::new();
                doc.insert("_id", entry.new_id);
                doc.insert("oldKey", entry.old_key.clone());
                doc
            })
            .collect()
    }

    /// Rebuild a remap table from its persisted documents.
    pub fn from_documents(table: impl Into<String>, documents: Vec<Document>) -> Result<Self> {
        let table = table.into();
        let mut remap = RemapTable::new(table.clone());
        for doc in documents {
            let new_id = doc.get_object_id("_id").map_err(|e| {
                MigrateError::transfer(table.clone(), format!("malformed remap entry: {}", e))
            })?;
            let old_key = doc.get("oldKey").cloned().ok_or_else(|| {
                MigrateError::transfer(table.clone(), "remap entry missing oldKey".to_string())
            })?;
            remap.insert(old_key, new_id)?;
        }
        Ok(remap)
    }
}

/// Result of remapping one table's rows.
#[derive(Debug)]
pub struct RemapOutput {
    /// Output documents, in source row order, ready for bulk insert.
    pub documents: Vec<Document>,

    /// The old-key to new-id mapping, present only when surrogate
    /// remapping applied and the table declares a primary key.
    pub remap: Option<RemapTable>,
}

/// Remap one table's materialized rows into output documents.
///
/// With `remap_keys` enabled each row gets a fresh ObjectId as its `_id`,
/// the primary-key column is removed, and an old-key entry is recorded.
/// A table without a primary key still gets fresh identifiers, but with no
/// old-key correlation - such rows can never be the target of a foreign-key
/// rewrite.
///
/// With `remap_keys` disabled the primary-key value is reused verbatim as
/// `_id` (identity copy); a missing primary key is an error the caller
/// resolves by policy.
///
/// Foreign-key columns keep their old values either way; pass 2 rewrites
/// them in place.
pub fn remap_rows(
    descriptor: &TableDescriptor,
    rows: Vec<SourceRow>,
    remap_keys: bool,
) -> Result<RemapOutput> {
    if remap_keys {
        remap_with_surrogates(descriptor, rows)
    } else {
        identity_copy(descriptor, rows)
    }
}

fn remap_with_surrogates(descriptor: &TableDescriptor, rows: Vec<SourceRow>) -> Result<RemapOutput> {
    let pk_column = descriptor.primary_key.as_deref();
    if pk_column.is_none() && !rows.is_empty() {
        warn!(
            "Table {} has no primary key: rows receive fresh identifiers with no old-key \
             correlation and cannot be the target of a foreign-key rewrite",
            descriptor.name
        );
    }

    let mut remap = pk_column.map(|_| RemapTable::new(descriptor.name.clone()));
    let mut documents = Vec::with_capacity(rows.len());

    for row in rows {
        let new_id = ObjectId::new();
        let mut doc = Document::new();
        doc.insert("_id", new_id);

        let mut saw_pk = false;
        for (column, value) in row {
            if Some(column.as_str()) == pk_column {
                saw_pk = true;
                let old_key = value.into_bson();
                if old_key == Bson::Null {
                    return Err(MigrateError::transfer(
                        descriptor.name.clone(),
                        format!("NULL value in primary key column {}", column),
                    ));
                }
                if let Some(remap) = remap.as_mut() {
                    remap.insert(old_key, new_id)?;
                }
            } else {
                doc.insert(column, value.into_bson());
            }
        }

        if let Some(pk) = pk_column {
            if !saw_pk {
                return Err(MigrateError::transfer(
                    descriptor.name.clone(),
                    format!("row is missing primary key column {}", pk),
                ));
            }
        }

        documents.push(doc);
    }

    Ok(RemapOutput {
        documents,
        remap,
    })
}

fn identity_copy(descriptor: &TableDescriptor, rows: Vec<SourceRow>) -> Result<RemapOutput> {
    let pk_column = descriptor
        .primary_key
        .as_deref()
        .ok_or_else(|| MigrateError::NoPrimaryKey(descriptor.name.clone()))?;

    let mut documents = Vec::with_capacity(rows.len());

    for row in rows {
        let old_key = row
            .get(pk_column)
            .cloned()
            .ok_or_else(|| {
                MigrateError::transfer(
                    descriptor.name.clone(),
                    format!("row is missing primary key column {}", pk_column),
                )
            })?
            .into_bson();
        if old_key == Bson::Null {
            return Err(MigrateError::transfer(
                descriptor.name.clone(),
                format!("NULL value in primary key column {}", pk_column),
            ));
        }

        let mut doc = Document::new();
        doc.insert("_id", old_key);
        for (column, value) in row {
            if column == pk_column {
                continue;
            }
            doc.insert(column, value.into_bson());
        }
        documents.push(doc);
    }

    Ok(RemapOutput {
        documents,
        remap: None,
    })
}
