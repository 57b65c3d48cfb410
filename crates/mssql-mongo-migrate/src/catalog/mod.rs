//! Schema catalog types and descriptor assembly.
//!
//! The raw introspection queries live on the source pool; this module turns
//! their flat results into one immutable [`TableDescriptor`] per table and
//! keeps the raw records around for the audit collections.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::MigrationConfig;
use crate::error::{MigrateError, Result};

/// One row of the primary-key catalog query, kept verbatim for auditing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrimaryKeyRecord {
    /// Table the constraint belongs to.
    pub table: String,

    /// Constraint name.
    pub constraint: String,

    /// Key column name.
    pub column: String,
}

/// One row of the foreign-key catalog query, kept verbatim for auditing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKeyRecord {
    /// Table the constraint belongs to.
    pub table: String,

    /// Constraint name.
    pub constraint: String,

    /// Foreign-key column name.
    pub column: String,

    /// Referenced table name.
    pub referenced_table: String,

    /// Referenced column name.
    pub referenced_column: String,
}

/// Where a foreign-key column points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyRef {
    /// Referenced table name.
    pub referenced_table: String,

    /// Referenced column name.
    pub referenced_column: String,
}

/// Immutable per-table schema metadata for the run.
#[derive(Debug, Clone)]
pub struct TableDescriptor {
    /// Table name.
    pub name: String,

    /// Single primary-key column, if the table declares one.
    pub primary_key: Option<String>,

    /// Foreign-key columns and their targets. Empty for tables without
    /// foreign keys - that is not an error.
    pub foreign_keys: BTreeMap<String, ForeignKeyRef>,
}

impl TableDescriptor {
    /// Check whether the table has any foreign-key columns.
    pub fn has_foreign_keys(&self) -> bool {
        !self.foreign_keys.is_empty()
    }
}

/// The full catalog for a run: descriptors for the tables to replicate plus
/// the raw constraint records for the audit collections.
#[derive(Debug, Clone)]
pub struct Catalog {
    /// Descriptors for the tables in the run, in catalog order.
    /// Tables excluded via `skip_tables` are not present.
    pub tables: Vec<TableDescriptor>,

    /// Raw primary-key records for all base tables, pre-skip.
    pub primary_keys: Vec<PrimaryKeyRecord>,

    /// Raw foreign-key records for all base tables, pre-skip.
    pub foreign_keys: Vec<ForeignKeyRecord>,
}

impl Catalog {
    /// Assemble descriptors from the flat catalog query results.
    ///
    /// Rejects composite primary keys outright: a table with more than one
    /// key column fails the whole catalog rather than being silently
    /// mishandled downstream.
    pub fn assemble(
        table_names: Vec<String>,
        primary_keys: Vec<PrimaryKeyRecord>,
        foreign_keys: Vec<ForeignKeyRecord>,
        migration: &MigrationConfig,
    ) -> Result<Self> {
        let mut pk_by_table: BTreeMap<&str, Vec<&PrimaryKeyRecord>> = BTreeMap::new();
        for record in &primary_keys {
            pk_by_table.entry(record.table.as_str()).or_default().push(record);
        }

        let mut tables = Vec::with_capacity(table_names.len());
        for name in table_names {
            if migration.is_skipped(&name) {
                debug!("Skipping table {} (excluded by configuration)", name);
                continue;
            }

            let primary_key = match pk_by_table.get(name.as_str()) {
                None => None,
                Some(records) if records.len() == 1 => Some(records[0].column.clone()),
                Some(records) => {
                    let columns = records
                        .iter()
                        .map(|r| r.column.as_str())
                        .collect::<Vec<_>>()
                        .join(", ");
                    return Err(MigrateError::CompositeKey { table: name, columns });
                }
            };

            let table_fks: BTreeMap<String, ForeignKeyRef> = foreign_keys
                .iter()
                .filter(|fk| fk.table == name)
                .map(|fk| {
                    (
                        fk.column.clone(),
                        ForeignKeyRef {
                            referenced_table: fk.referenced_table.clone(),
                            referenced_column: fk.referenced_column.clone(),
                        },
                    )
                })
                .collect();

            tables.push(TableDescriptor {
                name,
                primary_key,
                foreign_keys: table_fks,
            });
        }

        Ok(Self {
            tables,
            primary_keys,
            foreign_keys,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pk(table: &str, column: &str) -> PrimaryKeyRecord {
        PrimaryKeyRecord {
            table: table.into(),
            constraint: format!("PK_{}", table),
            column: column.into(),
        }
    }

    fn fk(table: &str, column: &str, ref_table: &str, ref_column: &str) -> ForeignKeyRecord {
        ForeignKeyRecord {
            table: table.into(),
            constraint: format!("FK_{}_{}", table, column),
            column: column.into(),
            referenced_table: ref_table.into(),
            referenced_column: ref_column.into(),
        }
    }

    #[test]
    fn test_assembles_descriptors_with_keys() {
        let catalog = Catalog::assemble(
            vec!["Users".into(), "Orders".into()],
            vec![pk("Users", "Id"), pk("Orders", "Id")],
            vec![fk("Orders", "UserId", "Users", "Id")],
            &MigrationConfig::default(),
        )
        .unwrap();

        assert_eq!(catalog.tables.len(), 2);
        let orders = &catalog.tables[1];
        assert_eq!(orders.name, "Orders");
        assert_eq!(orders.primary_key.as_deref(), Some("Id"));
        assert_eq!(
            orders.foreign_keys.get("UserId"),
            Some(&ForeignKeyRef {
                referenced_table: "Users".into(),
                referenced_column: "Id".into(),
            })
        );
        assert!(!catalog.tables[0].has_foreign_keys());
    }

    #[test]
    fn test_composite_primary_key_is_rejected() {
        let result = Catalog::assemble(
            vec!["OrderLines".into()],
            vec![pk("OrderLines", "OrderId"), pk("OrderLines", "LineNo")],
            vec![],
            &MigrationConfig::default(),
        );

        match result {
            Err(MigrateError::CompositeKey { table, columns }) => {
                assert_eq!(table, "OrderLines");
                assert!(columns.contains("OrderId"));
                assert!(columns.contains("LineNo"));
            }
            other => panic!("expected CompositeKey error, got {:?}", other),
        }
    }

    #[test]
    fn test_skip_tables_are_excluded_but_audited() {
        let migration = MigrationConfig {
            skip_tables: vec!["AuditLog".into()],
            ..MigrationConfig::default()
        };
        let catalog = Catalog::assemble(
            vec!["Users".into(), "AuditLog".into()],
            vec![pk("Users", "Id"), pk("AuditLog", "Id")],
            vec![],
            &migration,
        )
        .unwrap();

        assert_eq!(catalog.tables.len(), 1);
        assert_eq!(catalog.tables[0].name, "Users");
        // Raw records keep the skipped table for the audit collections.
        assert_eq!(catalog.primary_keys.len(), 2);
    }

    #[test]
    fn test_table_without_primary_key() {
        let catalog = Catalog::assemble(
            vec!["Logs".into()],
            vec![],
            vec![],
            &MigrationConfig::default(),
        )
        .unwrap();

        assert_eq!(catalog.tables[0].primary_key, None);
    }
}
