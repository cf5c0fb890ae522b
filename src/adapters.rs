// src/adapters.rs

//! Engine adapters for the supported database families.
//!
//! Each adapter formats engine-native SQL and parses the positional rows an
//! [`EngineSession`] hands back; connectivity itself lives behind the session
//! seam, so adapters stay driver-free and testable against fixtures.
//!
//! All four adapters emit the same record shapes with sizes normalized to
//! whole MB (integer floor division on the engine's raw totals).

use async_trait::async_trait;
use chrono::Utc;

use crate::callbacks::EngineSession;
use crate::error::{CapmonError, CapmonResult};
use crate::types::{CapacityRecord, EngineKind, InventoryRecord, SqlRow};

const BYTES_PER_MB: i64 = 1_048_576;
/// sys.master_files reports sizes in 8 KB pages
const SQLSERVER_PAGES_PER_MB: i64 = 128;

/// Extraction contract every engine family implements.
///
/// Inventory flags engine-reserved entries but never excludes them; whether
/// system databases are persisted is the caller's policy.
#[async_trait]
pub trait EngineAdapter: Send + Sync {
    /// Which engine family this adapter speaks to
    fn engine(&self) -> EngineKind;

    /// Enumerate every database/tablespace visible to the session's
    /// credential, active or reserved
    async fn fetch_inventory(
        &self,
        session: &dyn EngineSession,
    ) -> CapmonResult<Vec<InventoryRecord>>;

    /// Measure current allocated sizes.
    ///
    /// `None` returns every database; `Some(&[])` is a fast no-op that
    /// returns an empty vec without touching the session. Target names are
    /// matched adapter-side after the query, never interpolated into SQL.
    async fn fetch_capacity(
        &self,
        session: &dyn EngineSession,
        targets: Option<&[String]>,
    ) -> CapmonResult<Vec<CapacityRecord>>;
}

/// Select the adapter for an engine family.
///
/// The set is closed; there is no runtime discovery.
pub fn adapter_for(engine: EngineKind) -> Box<dyn EngineAdapter> {
    match engine {
        EngineKind::MySql => Box::new(MySqlAdapter),
        EngineKind::Postgres => Box::new(PostgresAdapter),
        EngineKind::SqlServer => Box::new(SqlServerAdapter),
        EngineKind::Oracle => Box::new(OracleAdapter),
    }
}

fn keep_target(targets: Option<&[String]>, name: &str) -> bool {
    match targets {
        Some(list) => list.iter().any(|t| t == name),
        None => true,
    }
}

fn text_col(row: &SqlRow, idx: usize, query: &str) -> CapmonResult<String> {
    row.get(idx)
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .ok_or_else(|| {
            CapmonError::unexpected(format!("{query}: row has no text value in column {idx}"))
        })
}

/// Numeric column read; NULL collapses to 0 since every numeric column the
/// adapters select is a size that may legitimately be absent
fn int_col(row: &SqlRow, idx: usize, query: &str) -> CapmonResult<i64> {
    let value = row.get(idx).ok_or_else(|| {
        CapmonError::unexpected(format!("{query}: row has no column {idx}"))
    })?;
    if value.is_null() {
        return Ok(0);
    }
    value.as_i64().ok_or_else(|| {
        CapmonError::unexpected(format!("{query}: non-numeric value in column {idx}"))
    })
}

/// MySQL: information_schema-based sizing.
///
/// Total size is data_length + index_length; the data portion is reported
/// separately, log size is not available per schema.
pub struct MySqlAdapter;

const MYSQL_INVENTORY_SQL: &str = "\
SELECT schema_name \
FROM information_schema.schemata \
ORDER BY schema_name";

const MYSQL_CAPACITY_SQL: &str = "\
SELECT s.schema_name, \
       COALESCE(SUM(t.data_length + t.index_length), 0) AS total_bytes, \
       COALESCE(SUM(t.data_length), 0) AS data_bytes \
FROM information_schema.schemata s \
LEFT JOIN information_schema.tables t ON t.table_schema = s.schema_name \
GROUP BY s.schema_name \
ORDER BY s.schema_name";

fn mysql_system_schema(name: &str) -> bool {
    matches!(name, "mysql" | "information_schema" | "performance_schema" | "sys")
}

#[async_trait]
impl EngineAdapter for MySqlAdapter {
    fn engine(&self) -> EngineKind {
        EngineKind::MySql
    }

    async fn fetch_inventory(
        &self,
        session: &dyn EngineSession,
    ) -> CapmonResult<Vec<InventoryRecord>> {
        let rows = session.query_rows(MYSQL_INVENTORY_SQL).await?;
        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let name = text_col(row, 0, "mysql inventory")?;
            let is_system = mysql_system_schema(&name);
            records.push(InventoryRecord { name, is_system });
        }
        Ok(records)
    }

    async fn fetch_capacity(
        &self,
        session: &dyn EngineSession,
        targets: Option<&[String]>,
    ) -> CapmonResult<Vec<CapacityRecord>> {
        if matches!(targets, Some([])) {
            return Ok(Vec::new());
        }
        let collected_at = Utc::now();
        let collected_date = collected_at.date_naive();

        let rows = session.query_rows(MYSQL_CAPACITY_SQL).await?;
        let mut records = Vec::new();
        for row in &rows {
            let name = text_col(row, 0, "mysql capacity")?;
            if !keep_target(targets, &name) {
                continue;
            }
            let total_bytes = int_col(row, 1, "mysql capacity")?;
            let data_bytes = int_col(row, 2, "mysql capacity")?;
            records.push(CapacityRecord {
                is_system: mysql_system_schema(&name),
                name,
                size_mb: total_bytes / BYTES_PER_MB,
                data_size_mb: Some(data_bytes / BYTES_PER_MB),
                log_size_mb: None,
                collected_date,
                collected_at,
            });
        }
        Ok(records)
    }
}

/// PostgreSQL: pg_database + pg_database_size.
///
/// Template databases cannot always accept connections, so capacity only
/// measures connectable databases; inventory still lists everything.
pub struct PostgresAdapter;

const POSTGRES_INVENTORY_SQL: &str = "\
SELECT datname, datistemplate \
FROM pg_database \
ORDER BY datname";

const POSTGRES_CAPACITY_SQL: &str = "\
SELECT datname, pg_database_size(datname) AS total_bytes, datistemplate \
FROM pg_database \
WHERE datallowconn \
ORDER BY datname";

#[async_trait]
impl EngineAdapter for PostgresAdapter {
    fn engine(&self) -> EngineKind {
        EngineKind::Postgres
    }

    async fn fetch_inventory(
        &self,
        session: &dyn EngineSession,
    ) -> CapmonResult<Vec<InventoryRecord>> {
        let rows = session.query_rows(POSTGRES_INVENTORY_SQL).await?;
        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let name = text_col(row, 0, "postgres inventory")?;
            let is_template = int_col(row, 1, "postgres inventory")? != 0;
            let is_system = is_template || name == "postgres";
            records.push(InventoryRecord { name, is_system });
        }
        Ok(records)
    }

    async fn fetch_capacity(
        &self,
        session: &dyn EngineSession,
        targets: Option<&[String]>,
    ) -> CapmonResult<Vec<CapacityRecord>> {
        if matches!(targets, Some([])) {
            return Ok(Vec::new());
        }
        let collected_at = Utc::now();
        let collected_date = collected_at.date_naive();

        let rows = session.query_rows(POSTGRES_CAPACITY_SQL).await?;
        let mut records = Vec::new();
        for row in &rows {
            let name = text_col(row, 0, "postgres capacity")?;
            if !keep_target(targets, &name) {
                continue;
            }
            let total_bytes = int_col(row, 1, "postgres capacity")?;
            let is_template = int_col(row, 2, "postgres capacity")? != 0;
            records.push(CapacityRecord {
                is_system: is_template || name == "postgres",
                name,
                size_mb: total_bytes / BYTES_PER_MB,
                data_size_mb: None,
                log_size_mb: None,
                collected_date,
                collected_at,
            });
        }
        Ok(records)
    }
}

/// SQL Server: sys.master_files grouped per database.
///
/// The only engine here that reports data and log files separately; sizes
/// arrive as 8 KB page counts.
pub struct SqlServerAdapter;

const SQLSERVER_INVENTORY_SQL: &str = "\
SELECT name \
FROM sys.databases \
ORDER BY name";

const SQLSERVER_CAPACITY_SQL: &str = "\
SELECT DB_NAME(database_id) AS database_name, \
       SUM(CAST(size AS BIGINT)) AS total_pages, \
       SUM(CASE WHEN type = 0 THEN CAST(size AS BIGINT) ELSE 0 END) AS data_pages, \
       SUM(CASE WHEN type = 1 THEN CAST(size AS BIGINT) ELSE 0 END) AS log_pages \
FROM sys.master_files \
GROUP BY database_id \
ORDER BY DB_NAME(database_id)";

fn sqlserver_system_database(name: &str) -> bool {
    matches!(name, "master" | "model" | "msdb" | "tempdb")
}

#[async_trait]
impl EngineAdapter for SqlServerAdapter {
    fn engine(&self) -> EngineKind {
        EngineKind::SqlServer
    }

    async fn fetch_inventory(
        &self,
        session: &dyn EngineSession,
    ) -> CapmonResult<Vec<InventoryRecord>> {
        let rows = session.query_rows(SQLSERVER_INVENTORY_SQL).await?;
        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let name = text_col(row, 0, "sqlserver inventory")?;
            let is_system = sqlserver_system_database(&name);
            records.push(InventoryRecord { name, is_system });
        }
        Ok(records)
    }

    async fn fetch_capacity(
        &self,
        session: &dyn EngineSession,
        targets: Option<&[String]>,
    ) -> CapmonResult<Vec<CapacityRecord>> {
        if matches!(targets, Some([])) {
            return Ok(Vec::new());
        }
        let collected_at = Utc::now();
        let collected_date = collected_at.date_naive();

        let rows = session.query_rows(SQLSERVER_CAPACITY_SQL).await?;
        let mut records = Vec::new();
        for row in &rows {
            let name = text_col(row, 0, "sqlserver capacity")?;
            if !keep_target(targets, &name) {
                continue;
            }
            let total_pages = int_col(row, 1, "sqlserver capacity")?;
            let data_pages = int_col(row, 2, "sqlserver capacity")?;
            let log_pages = int_col(row, 3, "sqlserver capacity")?;
            records.push(CapacityRecord {
                is_system: sqlserver_system_database(&name),
                name,
                size_mb: total_pages / SQLSERVER_PAGES_PER_MB,
                data_size_mb: Some(data_pages / SQLSERVER_PAGES_PER_MB),
                log_size_mb: Some(log_pages / SQLSERVER_PAGES_PER_MB),
                collected_date,
                collected_at,
            });
        }
        Ok(records)
    }
}

/// Oracle: tablespace sizing from the DBA views.
///
/// The unit of accounting is the tablespace; allocated bytes come from
/// dba_data_files, so TEMP and undo space show up in the inventory but carry
/// no data-file size.
pub struct OracleAdapter;

const ORACLE_INVENTORY_SQL: &str = "\
SELECT tablespace_name, contents \
FROM dba_tablespaces \
ORDER BY tablespace_name";

const ORACLE_CAPACITY_SQL: &str = "\
SELECT tablespace_name, SUM(bytes) AS total_bytes \
FROM dba_data_files \
GROUP BY tablespace_name \
ORDER BY tablespace_name";

fn oracle_system_tablespace(name: &str) -> bool {
    matches!(name, "SYSTEM" | "SYSAUX" | "TEMP") || name.starts_with("UNDO")
}

#[async_trait]
impl EngineAdapter for OracleAdapter {
    fn engine(&self) -> EngineKind {
        EngineKind::Oracle
    }

    async fn fetch_inventory(
        &self,
        session: &dyn EngineSession,
    ) -> CapmonResult<Vec<InventoryRecord>> {
        let rows = session.query_rows(ORACLE_INVENTORY_SQL).await?;
        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let name = text_col(row, 0, "oracle inventory")?;
            let contents = text_col(row, 1, "oracle inventory")?;
            let is_system = oracle_system_tablespace(&name)
                || matches!(contents.as_str(), "UNDO" | "TEMPORARY");
            records.push(InventoryRecord { name, is_system });
        }
        Ok(records)
    }

    async fn fetch_capacity(
        &self,
        session: &dyn EngineSession,
        targets: Option<&[String]>,
    ) -> CapmonResult<Vec<CapacityRecord>> {
        if matches!(targets, Some([])) {
            return Ok(Vec::new());
        }
        let collected_at = Utc::now();
        let collected_date = collected_at.date_naive();

        let rows = session.query_rows(ORACLE_CAPACITY_SQL).await?;
        let mut records = Vec::new();
        for row in &rows {
            let name = text_col(row, 0, "oracle capacity")?;
            if !keep_target(targets, &name) {
                continue;
            }
            let total_bytes = int_col(row, 1, "oracle capacity")?;
            records.push(CapacityRecord {
                is_system: oracle_system_tablespace(&name),
                name,
                size_mb: total_bytes / BYTES_PER_MB,
                data_size_mb: None,
                log_size_mb: None,
                collected_date,
                collected_at,
            });
        }
        Ok(records)
    }
}
