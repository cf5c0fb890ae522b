// src/partitions.rs

//! Monthly partition lifecycle for the two partitioned tables.
//!
//! A partition is a physical monthly table named `{base}_p{yyyy}{mm}`,
//! holding the rows whose routing date falls in [first-of-month,
//! first-of-next-month). Deterministic names make the existence check an
//! idempotent `sqlite_master` lookup, and creation carries the
//! partition-local unique indexes in the same statement.
//!
//! The two managed tables step independently: a failed operation on one is
//! reported for that table only and never blocks the sibling.

use chrono::{Datelike, NaiveDate};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use crate::calendar::month_start_plus;
use crate::error::{CapmonError, CapmonResult};
use crate::types::{EnsureOutcome, PartitionEnsure, PartitionInfo, PartitionStatus};

/// Raw per-database daily samples, partitioned by collected_date month
pub const DATABASE_SAMPLES_TABLE: &str = "database_size_samples";
/// Database-level period aggregates, partitioned by period_start month
pub const DATABASE_AGGREGATES_TABLE: &str = "database_size_aggregates";

/// The tables under partition management, in processing order
pub const MANAGED_TABLES: [&str; 2] = [DATABASE_SAMPLES_TABLE, DATABASE_AGGREGATES_TABLE];

/// Deterministic partition name for a base table and month
pub fn partition_name(base: &str, year: i32, month: u32) -> String {
    format!("{base}_p{year:04}{month:02}")
}

/// Partition name for the month containing `date`
pub fn partition_for_date(base: &str, date: NaiveDate) -> String {
    partition_name(base, date.year(), date.month())
}

fn parse_partition_suffix(base: &str, name: &str) -> Option<(i32, u32)> {
    let suffix = name.strip_prefix(base)?.strip_prefix("_p")?;
    if suffix.len() != 6 || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year: i32 = suffix[..4].parse().ok()?;
    let month: u32 = suffix[4..].parse().ok()?;
    (1..=12).contains(&month).then_some((year, month))
}

/// sqlite_master lookup shared by the manager and the store's month routing
pub(crate) async fn table_exists(pool: &SqlitePool, name: &str) -> CapmonResult<bool> {
    let row = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

/// Every existing partition of `base`, as (table name, year, month)
pub(crate) async fn list_partitions(
    pool: &SqlitePool,
    base: &str,
) -> CapmonResult<Vec<(String, i32, u32)>> {
    let pattern = format!("{base}_p%");
    let rows = sqlx::query(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE ? ORDER BY name",
    )
    .bind(&pattern)
    .fetch_all(pool)
    .await?;

    let mut partitions = Vec::new();
    for row in rows {
        let name: String = row.get("name");
        if let Some((year, month)) = parse_partition_suffix(base, &name) {
            partitions.push((name, year, month));
        }
    }
    Ok(partitions)
}

/// Full DDL for one monthly partition, unique index included, so creation
/// is a single atomic statement
fn partition_ddl(base: &str, partition: &str) -> Option<String> {
    match base {
        DATABASE_SAMPLES_TABLE => Some(format!(
            r#"
            CREATE TABLE IF NOT EXISTS {partition} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                instance_id TEXT NOT NULL,
                database_name TEXT NOT NULL,
                size_mb INTEGER NOT NULL,
                data_size_mb INTEGER,
                log_size_mb INTEGER,
                collected_date TEXT NOT NULL,
                collected_at TEXT NOT NULL,
                is_deleted INTEGER NOT NULL DEFAULT 0,
                deleted_at TEXT,
                UNIQUE (instance_id, database_name, collected_date)
            )
            "#
        )),
        DATABASE_AGGREGATES_TABLE => Some(format!(
            r#"
            CREATE TABLE IF NOT EXISTS {partition} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                instance_id TEXT NOT NULL,
                database_name TEXT NOT NULL,
                period_type TEXT NOT NULL,
                period_start TEXT NOT NULL,
                period_end TEXT NOT NULL,
                avg_size_mb INTEGER NOT NULL,
                max_size_mb INTEGER NOT NULL,
                min_size_mb INTEGER NOT NULL,
                data_count INTEGER NOT NULL,
                avg_data_size_mb INTEGER,
                max_data_size_mb INTEGER,
                min_data_size_mb INTEGER,
                size_change_mb INTEGER NOT NULL,
                size_change_percent REAL NOT NULL,
                growth_rate REAL NOT NULL,
                UNIQUE (instance_id, database_name, period_type, period_start)
            )
            "#
        )),
        _ => None,
    }
}

/// Creates, inspects, and retires monthly partitions over a shared pool
#[derive(Clone)]
pub struct PartitionManager {
    pool: SqlitePool,
}

impl PartitionManager {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Whether a partition table already exists
    pub async fn partition_exists(&self, name: &str) -> CapmonResult<bool> {
        table_exists(&self.pool, name).await
    }

    /// Ensure one managed table's partition for the month containing `date`.
    ///
    /// "Already exists" is a success outcome, not an error.
    pub async fn ensure_table_partition(
        &self,
        base: &str,
        date: NaiveDate,
    ) -> CapmonResult<PartitionEnsure> {
        let partition = partition_for_date(base, date);
        let ddl = partition_ddl(base, &partition)
            .ok_or_else(|| CapmonError::partition_operation(base, "not a managed table"))?;

        if self
            .partition_exists(&partition)
            .await
            .map_err(|e| CapmonError::partition_operation(base.to_string(), e.to_string()))?
        {
            debug!(table = base, partition = %partition, "partition already exists");
            return Ok(PartitionEnsure {
                table: base.to_string(),
                partition,
                outcome: EnsureOutcome::Exists,
            });
        }

        sqlx::query(&ddl)
            .execute(&self.pool)
            .await
            .map_err(|e| CapmonError::partition_operation(base.to_string(), e.to_string()))?;

        info!(table = base, partition = %partition, "created partition");
        Ok(PartitionEnsure {
            table: base.to_string(),
            partition,
            outcome: EnsureOutcome::Created,
        })
    }

    /// Ensure the month containing `date` for every managed table.
    ///
    /// One result per table; a failed table never blocks the sibling.
    pub async fn ensure_partition(&self, date: NaiveDate) -> Vec<CapmonResult<PartitionEnsure>> {
        let mut results = Vec::with_capacity(MANAGED_TABLES.len());
        for base in MANAGED_TABLES {
            results.push(self.ensure_table_partition(base, date).await);
        }
        results
    }

    /// Ensure partitions from the month containing `date` through
    /// `months_ahead` months out, for every managed table
    pub async fn ensure_future_partitions(
        &self,
        date: NaiveDate,
        months_ahead: u32,
    ) -> Vec<CapmonResult<PartitionEnsure>> {
        let mut results = Vec::new();
        for delta in 0..=months_ahead as i32 {
            let month = month_start_plus(date, delta);
            results.extend(self.ensure_partition(month).await);
        }
        results
    }

    async fn list_table_partitions(&self, base: &str) -> CapmonResult<Vec<(String, i32, u32)>> {
        list_partitions(&self.pool, base).await
    }

    /// Drop one managed table's partitions strictly older than the cutoff
    /// month, returning the names dropped.
    ///
    /// Cutoff is the month start of `today` minus `retention_months`, so the
    /// partition containing `today` can never be in range.
    pub async fn drop_table_partitions_older_than(
        &self,
        base: &str,
        today: NaiveDate,
        retention_months: u32,
    ) -> CapmonResult<Vec<String>> {
        let cutoff = month_start_plus(today, -(retention_months as i32));
        let partitions = self
            .list_table_partitions(base)
            .await
            .map_err(|e| CapmonError::partition_operation(base.to_string(), e.to_string()))?;

        let mut dropped = Vec::new();
        for (name, year, month) in partitions {
            // Month was validated during suffix parsing
            let Some(starts) = NaiveDate::from_ymd_opt(year, month, 1) else {
                continue;
            };
            if starts < cutoff {
                sqlx::query(&format!("DROP TABLE {name}"))
                    .execute(&self.pool)
                    .await
                    .map_err(|e| CapmonError::partition_operation(base.to_string(), e.to_string()))?;
                info!(table = base, partition = %name, "dropped expired partition");
                dropped.push(name);
            }
        }
        Ok(dropped)
    }

    /// Retention sweep over every managed table, one result per table
    pub async fn drop_partitions_older_than(
        &self,
        today: NaiveDate,
        retention_months: u32,
    ) -> Vec<CapmonResult<Vec<String>>> {
        let mut results = Vec::with_capacity(MANAGED_TABLES.len());
        for base in MANAGED_TABLES {
            results.push(
                self.drop_table_partitions_older_than(base, today, retention_months)
                    .await,
            );
        }
        results
    }

    /// On-disk bytes for one partition via the dbstat virtual table.
    ///
    /// Builds without SQLITE_ENABLE_DBSTAT_VTAB reject the query; size is
    /// reported as 0 in that case rather than failing the statistics pass.
    async fn partition_size_bytes(&self, name: &str) -> i64 {
        let result = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT SUM(pgsize) FROM dbstat WHERE name = ?",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await;
        match result {
            Ok(Some(bytes)) => bytes,
            _ => 0,
        }
    }

    /// Derived view of every existing partition, classified against `today`
    pub async fn partition_statistics(&self, today: NaiveDate) -> CapmonResult<Vec<PartitionInfo>> {
        let current = (today.year(), today.month());
        let mut stats = Vec::new();

        for base in MANAGED_TABLES {
            for (name, year, month) in self.list_table_partitions(base).await? {
                let row_count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {name}"))
                    .fetch_one(&self.pool)
                    .await?;
                let size_bytes = self.partition_size_bytes(&name).await;
                let status = match (year, month).cmp(&current) {
                    std::cmp::Ordering::Less => PartitionStatus::Past,
                    std::cmp::Ordering::Equal => PartitionStatus::Current,
                    std::cmp::Ordering::Greater => PartitionStatus::Future,
                };
                stats.push(PartitionInfo {
                    table: base.to_string(),
                    name,
                    year,
                    month,
                    row_count,
                    size_bytes,
                    status,
                });
            }
        }
        Ok(stats)
    }
}
