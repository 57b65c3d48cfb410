//! MSSQL source database operations: catalog introspection and table
//! materialization.

use bb8::{Pool, PooledConnection};
use tiberius::{AuthMethod, Client, Config, EncryptionLevel, Query, Row};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};
use uuid::Uuid;

use crate::catalog::{Catalog, ForeignKeyRecord, PrimaryKeyRecord};
use crate::config::{MigrationConfig, SourceConfig};
use crate::core::{SourceRow, SqlValue};
use crate::error::{MigrateError, Result};

/// Connection manager for bb8 pool with tiberius.
#[derive(Clone)]
struct TiberiusConnectionManager {
    config: SourceConfig,
}

impl TiberiusConnectionManager {
    fn new(config: SourceConfig) -> Self {
        Self { config }
    }

    fn build_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.config.host);
        config.port(self.config.port);
        config.database(&self.config.database);
        config.authentication(AuthMethod::sql_server(&self.config.user, &self.config.password));

        // Encryption settings
        match self.config.encrypt.to_lowercase().as_str() {
            "false" | "no" | "0" | "disable" => {
                config.encryption(EncryptionLevel::NotSupported);
            }
            _ => {
                if self.config.trust_server_cert {
                    config.trust_cert();
                }
                config.encryption(EncryptionLevel::Required);
            }
        }

        config
    }
}

#[async_trait::async_trait]
impl bb8::ManageConnection for TiberiusConnectionManager {
    type Connection = Client<Compat<TcpStream>>;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let config = self.build_config();
        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| tiberius::error::Error::Io {
                kind: e.kind(),
                message: e.to_string(),
            })?;

        tcp.set_nodelay(true).ok();

        Client::connect(config, tcp.compat_write()).await
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// Column name and declared type, used to drive value conversion.
#[derive(Debug, Clone)]
struct ColumnMeta {
    name: String,
    data_type: String,
}

/// MSSQL source pool with connection pooling.
///
/// Acquired once for the run's lifetime; connections are returned to the
/// pool on drop.
pub struct MssqlPool {
    pool: Pool<TiberiusConnectionManager>,
    config: SourceConfig,
}

impl MssqlPool {
    /// Create a new MSSQL source pool.
    pub async fn new(config: SourceConfig, max_size: u32) -> Result<Self> {
        let manager = TiberiusConnectionManager::new(config.clone());
        let pool = Pool::builder()
            .max_size(max_size)
            .min_idle(Some(1))
            .build(manager)
            .await
            .map_err(|e| {
                MigrateError::pool(
                    format!("Failed to create MSSQL pool: {}", e),
                    config.display_string(),
                )
            })?;

        // Test connection
        {
            let mut conn = pool.get().await.map_err(|e| {
                MigrateError::pool(
                    format!("Failed to get connection: {}", e),
                    config.display_string(),
                )
            })?;

            conn.simple_query("SELECT 1")
                .await
                .map_err(MigrateError::Source)?
                .into_row()
                .await
                .map_err(MigrateError::Source)?;
        }

        info!(
            "Connected to MSSQL: {}:{}/{} (pool_size={})",
            config.host, config.port, config.database, max_size
        );

        Ok(Self { pool, config })
    }

    /// Get a pooled connection.
    async fn get_client(&self) -> Result<PooledConnection<'_, TiberiusConnectionManager>> {
        self.pool.get().await.map_err(|e| {
            MigrateError::pool(
                format!("Failed to get connection: {}", e),
                self.config.display_string(),
            )
        })
    }

    /// Round-trip probe for health checks.
    pub async fn ping(&self) -> Result<()> {
        let mut client = self.get_client().await?;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(MigrateError::Source)?
            .into_row()
            .await
            .map_err(MigrateError::Source)?;
        Ok(())
    }

    /// Read the full schema catalog: base table names, primary-key
    /// constraints, and foreign-key constraints for the configured schema.
    pub async fn read_catalog(&self, migration: &MigrationConfig) -> Result<Catalog> {
        let table_names = self.list_base_tables().await?;
        let primary_keys = self.primary_key_records().await?;
        let foreign_keys = self.foreign_key_records().await?;

        info!(
            "Catalog: {} base tables, {} primary keys, {} foreign keys in schema {}",
            table_names.len(),
            primary_keys.len(),
            foreign_keys.len(),
            self.config.schema
        );

        Catalog::assemble(table_names, primary_keys, foreign_keys, migration)
    }

    /// List base table names in the configured schema.
    async fn list_base_tables(&self) -> Result<Vec<String>> {
        let mut client = self.get_client().await?;

        let query = r#"
            SELECT t.TABLE_NAME
            FROM INFORMATION_SCHEMA.TABLES t
            WHERE t.TABLE_TYPE = 'BASE TABLE'
              AND t.TABLE_SCHEMA = @P1
            ORDER BY t.TABLE_NAME
        "#;

        let mut q = Query::new(query);
        q.bind(&self.config.schema);

        let stream = q.query(&mut client).await.map_err(MigrateError::Source)?;
        let rows = stream.into_first_result().await.map_err(MigrateError::Source)?;

        Ok(rows
            .iter()
            .map(|row| row.get::<&str, _>(0).unwrap_or_default().to_string())
            .collect())
    }

    /// Load primary-key constraint rows for all tables in the schema.
    async fn primary_key_records(&self) -> Result<Vec<PrimaryKeyRecord>> {
        let mut client = self.get_client().await?;

        let query = r#"
            SELECT tc.TABLE_NAME, tc.CONSTRAINT_NAME, c.COLUMN_NAME
            FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
            JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE c
                ON c.CONSTRAINT_NAME = tc.CONSTRAINT_NAME
                AND c.TABLE_SCHEMA = tc.TABLE_SCHEMA
                AND c.TABLE_NAME = tc.TABLE_NAME
            WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY'
              AND tc.TABLE_SCHEMA = @P1
            ORDER BY tc.TABLE_NAME, c.ORDINAL_POSITION
        "#;

        let mut q = Query::new(query);
        q.bind(&self.config.schema);

        let stream = q.query(&mut client).await.map_err(MigrateError::Source)?;
        let rows = stream.into_first_result().await.map_err(MigrateError::Source)?;

        let records = rows
            .iter()
            .map(|row| PrimaryKeyRecord {
                table: row.get::<&str, _>(0).unwrap_or_default().to_string(),
                constraint: row.get::<&str, _>(1).unwrap_or_default().to_string(),
                column: row.get::<&str, _>(2).unwrap_or_default().to_string(),
            })
            .collect();

        Ok(records)
    }

    /// Load foreign-key constraint rows for all tables in the schema,
    /// one row per constrained column.
    async fn foreign_key_records(&self) -> Result<Vec<ForeignKeyRecord>> {
        let mut client = self.get_client().await?;

        let query = r#"
            SELECT
                pt.name AS table_name,
                fk.name AS constraint_name,
                pc.name AS column_name,
                rt.name AS referenced_table,
                rc.name AS referenced_column
            FROM sys.foreign_keys fk
            JOIN sys.foreign_key_columns fkc ON fkc.constraint_object_id = fk.object_id
            JOIN sys.tables pt ON fk.parent_object_id = pt.object_id
            JOIN sys.schemas ps ON pt.schema_id = ps.schema_id
            JOIN sys.columns pc
                ON fkc.parent_object_id = pc.object_id
                AND fkc.parent_column_id = pc.column_id
            JOIN sys.tables rt ON fk.referenced_object_id = rt.object_id
            JOIN sys.columns rc
                ON fkc.referenced_object_id = rc.object_id
                AND fkc.referenced_column_id = rc.column_id
            WHERE ps.name = @P1
            ORDER BY pt.name, fk.name, fkc.constraint_column_id
        "#;

        let mut q = Query::new(query);
        q.bind(&self.config.schema);

        let stream = q.query(&mut client).await.map_err(MigrateError::Source)?;
        let rows = stream.into_first_result().await.map_err(MigrateError::Source)?;

        let records = rows
            .iter()
            .map(|row| ForeignKeyRecord {
                table: row.get::<&str, _>(0).unwrap_or_default().to_string(),
                constraint: row.get::<&str, _>(1).unwrap_or_default().to_string(),
                column: row.get::<&str, _>(2).unwrap_or_default().to_string(),
                referenced_table: row.get::<&str, _>(3).unwrap_or_default().to_string(),
                referenced_column: row.get::<&str, _>(4).unwrap_or_default().to_string(),
            })
            .collect();

        Ok(records)
    }

    /// Load column names and declared types for a table, in ordinal order.
    async fn load_columns(&self, table: &str) -> Result<Vec<ColumnMeta>> {
        let mut client = self.get_client().await?;

        let query = r#"
            SELECT COLUMN_NAME, DATA_TYPE
            FROM INFORMATION_SCHEMA.COLUMNS
            WHERE TABLE_SCHEMA = @P1 AND TABLE_NAME = @P2
            ORDER BY ORDINAL_POSITION
        "#;

        let mut q = Query::new(query);
        q.bind(&self.config.schema);
        q.bind(table);

        let stream = q.query(&mut client).await.map_err(MigrateError::Source)?;
        let rows = stream.into_first_result().await.map_err(MigrateError::Source)?;

        if rows.is_empty() {
            return Err(MigrateError::SchemaExtraction(format!(
                "No columns found for table {}.{}",
                self.config.schema, table
            )));
        }

        Ok(rows
            .iter()
            .map(|row| ColumnMeta {
                name: row.get::<&str, _>(0).unwrap_or_default().to_string(),
                data_type: row.get::<&str, _>(1).unwrap_or_default().to_string(),
            })
            .collect())
    }

    /// Materialize all rows of a table in one logical pass.
    ///
    /// Empty table yields an empty vec, not an error; the caller is
    /// responsible for skipping write operations in that case.
    pub async fn fetch_all(&self, table: &str) -> Result<Vec<SourceRow>> {
        let columns = self.load_columns(table).await?;

        let query = format!(
            "SELECT * FROM [{}].[{}]",
            self.config.schema, table
        );
        debug!("Executing query: {}", query);

        let mut client = self.get_client().await?;
        let stream = client.simple_query(&query).await.map_err(MigrateError::Source)?;
        let rows = stream.into_first_result().await.map_err(MigrateError::Source)?;

        let mut result = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut source_row = SourceRow::with_capacity(columns.len());
            for (idx, col) in columns.iter().enumerate() {
                source_row.push(col.name.clone(), convert_row_value(row, idx, &col.data_type));
            }
            result.push(source_row);
        }

        debug!("Fetched {} rows from {}", result.len(), table);
        Ok(result)
    }
}

/// Convert a row value to SqlValue based on the declared column type.
fn convert_row_value(row: &Row, idx: usize, data_type: &str) -> SqlValue {
    let dt = data_type.to_lowercase();

    match dt.as_str() {
        "bit" => row
            .get::<bool, _>(idx)
            .map(SqlValue::Bool)
            .unwrap_or(SqlValue::Null),
        "tinyint" => row
            .get::<u8, _>(idx)
            .map(|v| SqlValue::I16(v as i16))
            .unwrap_or(SqlValue::Null),
        "smallint" => row
            .get::<i16, _>(idx)
            .map(SqlValue::I16)
            .unwrap_or(SqlValue::Null),
        "int" => row
            .get::<i32, _>(idx)
            .map(SqlValue::I32)
            .unwrap_or(SqlValue::Null),
        "bigint" => row
            .get::<i64, _>(idx)
            .map(SqlValue::I64)
            .unwrap_or(SqlValue::Null),
        "real" => row
            .get::<f32, _>(idx)
            .map(SqlValue::F32)
            .unwrap_or(SqlValue::Null),
        "float" => row
            .get::<f64, _>(idx)
            .map(SqlValue::F64)
            .unwrap_or(SqlValue::Null),
        "uniqueidentifier" => row
            .get::<Uuid, _>(idx)
            .map(SqlValue::Uuid)
            .unwrap_or(SqlValue::Null),
        "datetime" | "datetime2" | "smalldatetime" => row
            .get::<chrono::NaiveDateTime, _>(idx)
            .map(SqlValue::DateTime)
            .unwrap_or(SqlValue::Null),
        "date" => {
            // Tiberius returns date as NaiveDateTime, extract just the date part
            row.get::<chrono::NaiveDateTime, _>(idx)
                .map(|dt| SqlValue::Date(dt.date()))
                .unwrap_or(SqlValue::Null)
        }
        "time" => {
            // Tiberius returns time as NaiveDateTime, extract just the time part
            row.get::<chrono::NaiveDateTime, _>(idx)
                .map(|dt| SqlValue::Time(dt.time()))
                .unwrap_or(SqlValue::Null)
        }
        "binary" | "varbinary" | "image" => row
            .get::<&[u8], _>(idx)
            .map(|v| SqlValue::Bytes(v.to_vec()))
            .unwrap_or(SqlValue::Null),
        "decimal" | "numeric" | "money" | "smallmoney" => {
            // For decimal/numeric, try to get as string and parse.
            // This is more reliable than converting tiberius Numeric directly.
            row.get::<&str, _>(idx)
                .and_then(|s| s.parse::<rust_decimal::Decimal>().ok())
                .map(SqlValue::Decimal)
                .or_else(|| {
                    row.get::<f64, _>(idx).map(|f| {
                        rust_decimal::Decimal::try_from(f)
                            .map(SqlValue::Decimal)
                            .unwrap_or(SqlValue::F64(f))
                    })
                })
                .unwrap_or(SqlValue::Null)
        }
        _ => {
            // Default: treat as string (covers varchar, nvarchar, char, nchar, text, ntext, xml, etc.)
            row.get::<&str, _>(idx)
                .map(|s| SqlValue::Text(s.to_string()))
                .unwrap_or(SqlValue::Null)
        }
    }
}
