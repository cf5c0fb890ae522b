// src/store.rs

//! Sample and aggregate persistence over sqlx/SQLite.
//!
//! Writes are upserts at natural keys, so re-running a day's collection or
//! recomputing a period is always safe. Database-level rows live in monthly
//! partition tables (see [`crate::partitions`]); instance-level rows live in
//! two unpartitioned tables created here at startup.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::{debug, info};

use crate::calendar::month_start;
use crate::error::{CapmonError, CapmonResult};
use crate::partitions::{
    list_partitions, partition_for_date, table_exists, DATABASE_AGGREGATES_TABLE,
    DATABASE_SAMPLES_TABLE,
};
use crate::types::{
    AggregateQuery, CapacityRecord, CapmonConfig, DatabaseSizeAggregate, DatabaseSizeSample,
    InstanceSizeAggregate, InstanceSizeSample, PeriodType, TrendDirection,
};

const INSTANCE_SAMPLES_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS instance_size_samples (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    instance_id TEXT NOT NULL,
    total_size_mb INTEGER NOT NULL,
    database_count INTEGER NOT NULL,
    collected_date TEXT NOT NULL,
    collected_at TEXT NOT NULL,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    deleted_at TEXT
)
"#;

/// Partial index: the natural key only constrains live rows, so a
/// soft-deleted row never blocks a fresh sample for the same day
const INSTANCE_SAMPLES_INDEX_DDL: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS idx_instance_size_samples_active
    ON instance_size_samples (instance_id, collected_date)
    WHERE is_deleted = 0
"#;

const INSTANCE_AGGREGATES_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS instance_size_aggregates (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    instance_id TEXT NOT NULL,
    period_type TEXT NOT NULL,
    period_start TEXT NOT NULL,
    period_end TEXT NOT NULL,
    avg_size_mb INTEGER NOT NULL,
    max_size_mb INTEGER NOT NULL,
    min_size_mb INTEGER NOT NULL,
    data_count INTEGER NOT NULL,
    database_count INTEGER NOT NULL,
    database_count_change INTEGER NOT NULL,
    size_change_mb INTEGER NOT NULL,
    size_change_percent REAL NOT NULL,
    growth_rate REAL NOT NULL,
    trend TEXT NOT NULL,
    UNIQUE (instance_id, period_type, period_start)
)
"#;

/// Row counts and on-disk footprint of the store
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct StoreStatistics {
    pub database_sample_rows: i64,
    pub instance_sample_rows: i64,
    pub database_aggregate_rows: i64,
    pub instance_aggregate_rows: i64,
    /// Existing monthly partitions across both partitioned tables
    pub partition_count: usize,
    pub file_size_bytes: i64,
}

/// Persistence facade shared by collection, aggregation, and queries
#[derive(Clone)]
pub struct SampleStore {
    pool: SqlitePool,
}

impl SampleStore {
    /// Open (or create) the store at the configured path and bootstrap the
    /// unpartitioned schema
    pub async fn new(config: &CapmonConfig) -> CapmonResult<Self> {
        // Every pooled connection to sqlite::memory: would open its own
        // blank database, so in-memory stores are pinned to one connection
        let (url, max_connections) = if config.database_path == ":memory:" {
            ("sqlite::memory:".to_string(), 1)
        } else {
            (
                format!("sqlite://{}?mode=rwc", config.database_path),
                config.max_connections,
            )
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(&url)
            .await?;
        Self::with_pool(pool).await
    }

    /// Wrap an existing pool; used when the caller manages the pool itself
    pub async fn with_pool(pool: SqlitePool) -> CapmonResult<Self> {
        let store = Self { pool };
        store.initialize_schema().await?;
        Ok(store)
    }

    async fn initialize_schema(&self) -> CapmonResult<()> {
        sqlx::query(INSTANCE_SAMPLES_DDL).execute(&self.pool).await?;
        sqlx::query(INSTANCE_SAMPLES_INDEX_DDL)
            .execute(&self.pool)
            .await?;
        sqlx::query(INSTANCE_AGGREGATES_DDL)
            .execute(&self.pool)
            .await?;
        debug!("store schema initialized");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Upsert one instance's capacity records into their collected-month
    /// partitions, all in one transaction.
    ///
    /// Conflicting keys are overwritten in place and forced live again
    /// (`is_deleted = 0`), so a re-run or a reappearing database self-heals.
    pub async fn upsert_database_samples(
        &self,
        instance_id: &str,
        records: &[CapacityRecord],
    ) -> CapmonResult<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut written = 0u64;
        for record in records {
            let partition = partition_for_date(DATABASE_SAMPLES_TABLE, record.collected_date);
            written += upsert_sample_row(&mut tx, &partition, instance_id, record).await?;
        }
        tx.commit().await?;

        debug!(instance_id, rows = written, "database samples upserted");
        Ok(written)
    }

    /// Soft-delete samples for `instance_id` on `collected_date` whose
    /// database is absent from `active`.
    ///
    /// A single atomic UPDATE; rows flip to `is_deleted = 1` with a
    /// tombstone timestamp and come back through the next upsert.
    pub async fn mark_missing_databases(
        &self,
        instance_id: &str,
        collected_date: NaiveDate,
        active: &[String],
    ) -> CapmonResult<u64> {
        let partition = partition_for_date(DATABASE_SAMPLES_TABLE, collected_date);
        if !table_exists(&self.pool, &partition).await? {
            return Ok(0);
        }

        let mut sql = format!(
            "UPDATE {partition} SET is_deleted = 1, deleted_at = ? \
             WHERE instance_id = ? AND collected_date = ? AND is_deleted = 0"
        );
        if !active.is_empty() {
            let placeholders = vec!["?"; active.len()].join(", ");
            sql.push_str(&format!(" AND database_name NOT IN ({placeholders})"));
        }

        let mut query = sqlx::query(&sql)
            .bind(Utc::now())
            .bind(instance_id)
            .bind(collected_date);
        for name in active {
            query = query.bind(name);
        }
        let swept = query.execute(&self.pool).await?.rows_affected();

        if swept > 0 {
            info!(instance_id, %collected_date, swept, "soft-deleted missing databases");
        }
        Ok(swept)
    }

    /// Derive and upsert the instance-level rollup for one day.
    ///
    /// Totals always come from summing the currently-active database rows;
    /// adapter-reported totals are never trusted. Returns false when there
    /// is nothing active to roll up (the existing rollup, if any, is
    /// tombstoned to match).
    pub async fn upsert_instance_sample(
        &self,
        instance_id: &str,
        collected_date: NaiveDate,
    ) -> CapmonResult<bool> {
        let partition = partition_for_date(DATABASE_SAMPLES_TABLE, collected_date);
        if !table_exists(&self.pool, &partition).await? {
            return Ok(false);
        }

        let row = sqlx::query(&format!(
            "SELECT COALESCE(SUM(size_mb), 0) AS total, COUNT(*) AS n \
             FROM {partition} \
             WHERE instance_id = ? AND collected_date = ? AND is_deleted = 0"
        ))
        .bind(instance_id)
        .bind(collected_date)
        .fetch_one(&self.pool)
        .await?;
        let total_size_mb: i64 = row.get("total");
        let database_count: i64 = row.get("n");

        if database_count == 0 {
            sqlx::query(
                "UPDATE instance_size_samples SET is_deleted = 1, deleted_at = ? \
                 WHERE instance_id = ? AND collected_date = ? AND is_deleted = 0",
            )
            .bind(Utc::now())
            .bind(instance_id)
            .bind(collected_date)
            .execute(&self.pool)
            .await?;
            return Ok(false);
        }

        let mut result = self
            .execute_instance_upsert(instance_id, total_size_mb, database_count, collected_date)
            .await;
        if let Err(error) = &result {
            if error.is_busy_conflict() {
                result = self
                    .execute_instance_upsert(
                        instance_id,
                        total_size_mb,
                        database_count,
                        collected_date,
                    )
                    .await;
            }
        }
        match result {
            Ok(()) => Ok(true),
            Err(error) if error.is_busy_conflict() => Err(CapmonError::persistence_conflict(
                format!("{instance_id}@{collected_date}"),
                error.to_string(),
            )),
            Err(error) => Err(error),
        }
    }

    async fn execute_instance_upsert(
        &self,
        instance_id: &str,
        total_size_mb: i64,
        database_count: i64,
        collected_date: NaiveDate,
    ) -> CapmonResult<()> {
        sqlx::query(
            "INSERT INTO instance_size_samples \
             (instance_id, total_size_mb, database_count, collected_date, collected_at, is_deleted, deleted_at) \
             VALUES (?, ?, ?, ?, ?, 0, NULL) \
             ON CONFLICT (instance_id, collected_date) WHERE is_deleted = 0 DO UPDATE SET \
                 total_size_mb = excluded.total_size_mb, \
                 database_count = excluded.database_count, \
                 collected_at = excluded.collected_at",
        )
        .bind(instance_id)
        .bind(total_size_mb)
        .bind(database_count)
        .bind(collected_date)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Active database samples for one instance in [from, to], across every
    /// month the range touches, ordered by (database_name, collected_date)
    pub async fn active_database_samples(
        &self,
        instance_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> CapmonResult<Vec<DatabaseSizeSample>> {
        let mut samples = Vec::new();
        for partition in self
            .partitions_in_range(DATABASE_SAMPLES_TABLE, Some(from), Some(to))
            .await?
        {
            let rows = sqlx::query(&format!(
                "SELECT * FROM {partition} \
                 WHERE instance_id = ? AND collected_date >= ? AND collected_date <= ? \
                   AND is_deleted = 0"
            ))
            .bind(instance_id)
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await?;
            for row in &rows {
                samples.push(database_sample_from_row(row)?);
            }
        }
        samples.sort_by(|a, b| {
            (a.database_name.as_str(), a.collected_date)
                .cmp(&(b.database_name.as_str(), b.collected_date))
        });
        Ok(samples)
    }

    /// Active instance samples for one instance in [from, to], ordered by
    /// collected_date
    pub async fn active_instance_samples(
        &self,
        instance_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> CapmonResult<Vec<InstanceSizeSample>> {
        let rows = sqlx::query(
            "SELECT * FROM instance_size_samples \
             WHERE instance_id = ? AND collected_date >= ? AND collected_date <= ? \
               AND is_deleted = 0 \
             ORDER BY collected_date",
        )
        .bind(instance_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(instance_sample_from_row).collect()
    }

    /// Full-overwrite upsert of one database-level aggregate into the
    /// partition for its period_start month
    pub async fn upsert_database_aggregate(
        &self,
        aggregate: &DatabaseSizeAggregate,
    ) -> CapmonResult<()> {
        let partition = partition_for_date(DATABASE_AGGREGATES_TABLE, aggregate.period_start);
        sqlx::query(&format!(
            "INSERT INTO {partition} \
             (instance_id, database_name, period_type, period_start, period_end, \
              avg_size_mb, max_size_mb, min_size_mb, data_count, \
              avg_data_size_mb, max_data_size_mb, min_data_size_mb, \
              size_change_mb, size_change_percent, growth_rate) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (instance_id, database_name, period_type, period_start) DO UPDATE SET \
                 period_end = excluded.period_end, \
                 avg_size_mb = excluded.avg_size_mb, \
                 max_size_mb = excluded.max_size_mb, \
                 min_size_mb = excluded.min_size_mb, \
                 data_count = excluded.data_count, \
                 avg_data_size_mb = excluded.avg_data_size_mb, \
                 max_data_size_mb = excluded.max_data_size_mb, \
                 min_data_size_mb = excluded.min_data_size_mb, \
                 size_change_mb = excluded.size_change_mb, \
                 size_change_percent = excluded.size_change_percent, \
                 growth_rate = excluded.growth_rate"
        ))
        .bind(&aggregate.instance_id)
        .bind(&aggregate.database_name)
        .bind(aggregate.period_type.as_str())
        .bind(aggregate.period_start)
        .bind(aggregate.period_end)
        .bind(aggregate.avg_size_mb)
        .bind(aggregate.max_size_mb)
        .bind(aggregate.min_size_mb)
        .bind(aggregate.data_count)
        .bind(aggregate.avg_data_size_mb)
        .bind(aggregate.max_data_size_mb)
        .bind(aggregate.min_data_size_mb)
        .bind(aggregate.size_change_mb)
        .bind(aggregate.size_change_percent)
        .bind(aggregate.growth_rate)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Full-overwrite upsert of one instance-level aggregate
    pub async fn upsert_instance_aggregate(
        &self,
        aggregate: &InstanceSizeAggregate,
    ) -> CapmonResult<()> {
        sqlx::query(
            "INSERT INTO instance_size_aggregates \
             (instance_id, period_type, period_start, period_end, \
              avg_size_mb, max_size_mb, min_size_mb, data_count, \
              database_count, database_count_change, \
              size_change_mb, size_change_percent, growth_rate, trend) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (instance_id, period_type, period_start) DO UPDATE SET \
                 period_end = excluded.period_end, \
                 avg_size_mb = excluded.avg_size_mb, \
                 max_size_mb = excluded.max_size_mb, \
                 min_size_mb = excluded.min_size_mb, \
                 data_count = excluded.data_count, \
                 database_count = excluded.database_count, \
                 database_count_change = excluded.database_count_change, \
                 size_change_mb = excluded.size_change_mb, \
                 size_change_percent = excluded.size_change_percent, \
                 growth_rate = excluded.growth_rate, \
                 trend = excluded.trend",
        )
        .bind(&aggregate.instance_id)
        .bind(aggregate.period_type.as_str())
        .bind(aggregate.period_start)
        .bind(aggregate.period_end)
        .bind(aggregate.avg_size_mb)
        .bind(aggregate.max_size_mb)
        .bind(aggregate.min_size_mb)
        .bind(aggregate.data_count)
        .bind(aggregate.database_count)
        .bind(aggregate.database_count_change)
        .bind(aggregate.size_change_mb)
        .bind(aggregate.size_change_percent)
        .bind(aggregate.growth_rate)
        .bind(aggregate.trend.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Stored database-level aggregates matching `query`, newest period
    /// first
    pub async fn database_aggregates(
        &self,
        query: &AggregateQuery,
    ) -> CapmonResult<Vec<DatabaseSizeAggregate>> {
        let mut aggregates = Vec::new();
        for partition in self
            .partitions_in_range(DATABASE_AGGREGATES_TABLE, query.from, query.to)
            .await?
        {
            let mut sql = format!(
                "SELECT * FROM {partition} WHERE instance_id = ? AND period_type = ?"
            );
            if query.database_name.is_some() {
                sql.push_str(" AND database_name = ?");
            }
            if query.from.is_some() {
                sql.push_str(" AND period_start >= ?");
            }
            if query.to.is_some() {
                sql.push_str(" AND period_start <= ?");
            }

            let mut q = sqlx::query(&sql)
                .bind(&query.instance_id)
                .bind(query.period_type.as_str());
            if let Some(name) = &query.database_name {
                q = q.bind(name);
            }
            if let Some(from) = query.from {
                q = q.bind(from);
            }
            if let Some(to) = query.to {
                q = q.bind(to);
            }

            for row in &q.fetch_all(&self.pool).await? {
                aggregates.push(database_aggregate_from_row(row)?);
            }
        }

        aggregates.sort_by(|a, b| {
            (b.period_start, a.database_name.as_str())
                .cmp(&(a.period_start, b.database_name.as_str()))
        });
        if let Some(limit) = query.limit {
            aggregates.truncate(limit as usize);
        }
        Ok(aggregates)
    }

    /// Stored instance-level aggregates matching `query`, newest period
    /// first
    pub async fn instance_aggregates(
        &self,
        query: &AggregateQuery,
    ) -> CapmonResult<Vec<InstanceSizeAggregate>> {
        let mut sql = String::from(
            "SELECT * FROM instance_size_aggregates WHERE instance_id = ? AND period_type = ?",
        );
        if query.from.is_some() {
            sql.push_str(" AND period_start >= ?");
        }
        if query.to.is_some() {
            sql.push_str(" AND period_start <= ?");
        }
        sql.push_str(" ORDER BY period_start DESC");
        if query.limit.is_some() {
            sql.push_str(" LIMIT ?");
        }

        let mut q = sqlx::query(&sql)
            .bind(&query.instance_id)
            .bind(query.period_type.as_str());
        if let Some(from) = query.from {
            q = q.bind(from);
        }
        if let Some(to) = query.to {
            q = q.bind(to);
        }
        if let Some(limit) = query.limit {
            q = q.bind(limit as i64);
        }

        let rows = q.fetch_all(&self.pool).await?;
        rows.iter().map(instance_aggregate_from_row).collect()
    }

    /// Row counts per managed table plus the database's on-disk footprint
    pub async fn store_statistics(&self) -> CapmonResult<StoreStatistics> {
        let mut stats = StoreStatistics::default();

        for (name, _, _) in list_partitions(&self.pool, DATABASE_SAMPLES_TABLE).await? {
            stats.database_sample_rows += self.count_rows(&name).await?;
            stats.partition_count += 1;
        }
        for (name, _, _) in list_partitions(&self.pool, DATABASE_AGGREGATES_TABLE).await? {
            stats.database_aggregate_rows += self.count_rows(&name).await?;
            stats.partition_count += 1;
        }
        stats.instance_sample_rows = self.count_rows("instance_size_samples").await?;
        stats.instance_aggregate_rows = self.count_rows("instance_size_aggregates").await?;

        stats.file_size_bytes = sqlx::query_scalar(
            "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(stats)
    }

    async fn count_rows(&self, table: &str) -> CapmonResult<i64> {
        Ok(sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&self.pool)
            .await?)
    }

    /// Existing partitions of `base` whose month intersects [from, to];
    /// unbounded sides include everything
    async fn partitions_in_range(
        &self,
        base: &str,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> CapmonResult<Vec<String>> {
        let lower = from.map(month_start);
        let upper = to.map(month_start);
        let mut names = Vec::new();
        for (name, year, month) in list_partitions(&self.pool, base).await? {
            let Some(starts) = NaiveDate::from_ymd_opt(year, month, 1) else {
                continue;
            };
            if lower.is_some_and(|l| starts < l) || upper.is_some_and(|u| starts > u) {
                continue;
            }
            names.push(name);
        }
        Ok(names)
    }
}

/// One row's upsert with a single retry when SQLite reports the database
/// busy/locked; a second failure surfaces as a persistence conflict
async fn upsert_sample_row(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    partition: &str,
    instance_id: &str,
    record: &CapacityRecord,
) -> CapmonResult<u64> {
    let mut result = execute_sample_upsert(&mut *tx, partition, instance_id, record).await;
    if let Err(error) = &result {
        if error.is_busy_conflict() {
            result = execute_sample_upsert(&mut *tx, partition, instance_id, record).await;
        }
    }
    match result {
        Ok(affected) => Ok(affected),
        Err(error) if error.is_busy_conflict() => Err(CapmonError::persistence_conflict(
            format!(
                "{instance_id}/{}@{}",
                record.name, record.collected_date
            ),
            error.to_string(),
        )),
        Err(error) => Err(error),
    }
}

async fn execute_sample_upsert(
    conn: &mut SqliteConnection,
    partition: &str,
    instance_id: &str,
    record: &CapacityRecord,
) -> CapmonResult<u64> {
    let affected = sqlx::query(&format!(
        "INSERT INTO {partition} \
         (instance_id, database_name, size_mb, data_size_mb, log_size_mb, \
          collected_date, collected_at, is_deleted, deleted_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, 0, NULL) \
         ON CONFLICT (instance_id, database_name, collected_date) DO UPDATE SET \
             size_mb = excluded.size_mb, \
             data_size_mb = excluded.data_size_mb, \
             log_size_mb = excluded.log_size_mb, \
             collected_at = excluded.collected_at, \
             is_deleted = 0, \
             deleted_at = NULL"
    ))
    .bind(instance_id)
    .bind(&record.name)
    .bind(record.size_mb)
    .bind(record.data_size_mb)
    .bind(record.log_size_mb)
    .bind(record.collected_date)
    .bind(record.collected_at)
    .execute(conn)
    .await?
    .rows_affected();
    Ok(affected)
}

fn database_sample_from_row(row: &SqliteRow) -> CapmonResult<DatabaseSizeSample> {
    Ok(DatabaseSizeSample {
        instance_id: row.try_get("instance_id")?,
        database_name: row.try_get("database_name")?,
        size_mb: row.try_get("size_mb")?,
        data_size_mb: row.try_get("data_size_mb")?,
        log_size_mb: row.try_get("log_size_mb")?,
        collected_date: row.try_get("collected_date")?,
        collected_at: row.try_get("collected_at")?,
        is_deleted: row.try_get::<i64, _>("is_deleted")? != 0,
        deleted_at: row.try_get("deleted_at")?,
    })
}

fn instance_sample_from_row(row: &SqliteRow) -> CapmonResult<InstanceSizeSample> {
    Ok(InstanceSizeSample {
        instance_id: row.try_get("instance_id")?,
        total_size_mb: row.try_get("total_size_mb")?,
        database_count: row.try_get("database_count")?,
        collected_date: row.try_get("collected_date")?,
        collected_at: row.try_get("collected_at")?,
        is_deleted: row.try_get::<i64, _>("is_deleted")? != 0,
        deleted_at: row.try_get("deleted_at")?,
    })
}

fn decode_period_type(row: &SqliteRow) -> CapmonResult<PeriodType> {
    let raw: String = row.try_get("period_type")?;
    PeriodType::parse(&raw)
        .ok_or_else(|| CapmonError::unexpected(format!("unknown period type '{raw}' in store")))
}

fn database_aggregate_from_row(row: &SqliteRow) -> CapmonResult<DatabaseSizeAggregate> {
    Ok(DatabaseSizeAggregate {
        instance_id: row.try_get("instance_id")?,
        database_name: row.try_get("database_name")?,
        period_type: decode_period_type(row)?,
        period_start: row.try_get("period_start")?,
        period_end: row.try_get("period_end")?,
        avg_size_mb: row.try_get("avg_size_mb")?,
        max_size_mb: row.try_get("max_size_mb")?,
        min_size_mb: row.try_get("min_size_mb")?,
        data_count: row.try_get("data_count")?,
        avg_data_size_mb: row.try_get("avg_data_size_mb")?,
        max_data_size_mb: row.try_get("max_data_size_mb")?,
        min_data_size_mb: row.try_get("min_data_size_mb")?,
        size_change_mb: row.try_get("size_change_mb")?,
        size_change_percent: row.try_get("size_change_percent")?,
        growth_rate: row.try_get("growth_rate")?,
    })
}

fn instance_aggregate_from_row(row: &SqliteRow) -> CapmonResult<InstanceSizeAggregate> {
    let raw_trend: String = row.try_get("trend")?;
    let trend = TrendDirection::parse(&raw_trend)
        .ok_or_else(|| CapmonError::unexpected(format!("unknown trend '{raw_trend}' in store")))?;
    Ok(InstanceSizeAggregate {
        instance_id: row.try_get("instance_id")?,
        period_type: decode_period_type(row)?,
        period_start: row.try_get("period_start")?,
        period_end: row.try_get("period_end")?,
        avg_size_mb: row.try_get("avg_size_mb")?,
        max_size_mb: row.try_get("max_size_mb")?,
        min_size_mb: row.try_get("min_size_mb")?,
        data_count: row.try_get("data_count")?,
        database_count: row.try_get("database_count")?,
        database_count_change: row.try_get("database_count_change")?,
        size_change_mb: row.try_get("size_change_mb")?,
        size_change_percent: row.try_get("size_change_percent")?,
        growth_rate: row.try_get("growth_rate")?,
        trend,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partitions::PartitionManager;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_store() -> SampleStore {
        // A single connection keeps every statement on the same in-memory
        // database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        SampleStore::with_pool(pool).await.unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn capacity(name: &str, size_mb: i64, day: NaiveDate) -> CapacityRecord {
        CapacityRecord {
            name: name.to_string(),
            size_mb,
            data_size_mb: Some(size_mb),
            log_size_mb: None,
            collected_date: day,
            collected_at: Utc::now(),
            is_system: false,
        }
    }

    async fn ensure_month(store: &SampleStore, day: NaiveDate) {
        let manager = PartitionManager::new(store.pool().clone());
        for result in manager.ensure_partition(day).await {
            result.unwrap();
        }
    }

    #[tokio::test]
    async fn repeated_upserts_keep_one_row_per_key() {
        let store = test_store().await;
        let day = date(2025, 6, 15);
        ensure_month(&store, day).await;

        store
            .upsert_database_samples("inst-1", &[capacity("app", 100, day)])
            .await
            .unwrap();
        store
            .upsert_database_samples("inst-1", &[capacity("app", 140, day)])
            .await
            .unwrap();

        let samples = store
            .active_database_samples("inst-1", day, day)
            .await
            .unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].size_mb, 140);
        assert!(!samples[0].is_deleted);
    }

    #[tokio::test]
    async fn soft_delete_then_reappearance_self_heals() {
        let store = test_store().await;
        let day = date(2025, 6, 15);
        ensure_month(&store, day).await;

        store
            .upsert_database_samples(
                "inst-1",
                &[capacity("app", 100, day), capacity("legacy", 50, day)],
            )
            .await
            .unwrap();

        // legacy disappears from the inventory
        let swept = store
            .mark_missing_databases("inst-1", day, &["app".to_string()])
            .await
            .unwrap();
        assert_eq!(swept, 1);
        let samples = store
            .active_database_samples("inst-1", day, day)
            .await
            .unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].database_name, "app");

        // and comes back
        store
            .upsert_database_samples("inst-1", &[capacity("legacy", 55, day)])
            .await
            .unwrap();
        let samples = store
            .active_database_samples("inst-1", day, day)
            .await
            .unwrap();
        assert_eq!(samples.len(), 2);
        let legacy = samples.iter().find(|s| s.database_name == "legacy").unwrap();
        assert_eq!(legacy.size_mb, 55);
        assert!(!legacy.is_deleted);
        assert!(legacy.deleted_at.is_none());
    }

    #[tokio::test]
    async fn instance_rollup_sums_only_active_rows() {
        let store = test_store().await;
        let day = date(2025, 6, 15);
        ensure_month(&store, day).await;

        store
            .upsert_database_samples(
                "inst-1",
                &[
                    capacity("a", 100, day),
                    capacity("b", 200, day),
                    capacity("c", 300, day),
                ],
            )
            .await
            .unwrap();
        store
            .mark_missing_databases("inst-1", day, &["a".to_string(), "b".to_string()])
            .await
            .unwrap();

        assert!(store.upsert_instance_sample("inst-1", day).await.unwrap());
        let rollups = store
            .active_instance_samples("inst-1", day, day)
            .await
            .unwrap();
        assert_eq!(rollups.len(), 1);
        assert_eq!(rollups[0].total_size_mb, 300);
        assert_eq!(rollups[0].database_count, 2);
    }

    #[tokio::test]
    async fn rollup_with_nothing_active_reports_false_and_tombstones() {
        let store = test_store().await;
        let day = date(2025, 6, 15);
        ensure_month(&store, day).await;

        store
            .upsert_database_samples("inst-1", &[capacity("app", 100, day)])
            .await
            .unwrap();
        assert!(store.upsert_instance_sample("inst-1", day).await.unwrap());

        store
            .mark_missing_databases("inst-1", day, &[])
            .await
            .unwrap();
        assert!(!store.upsert_instance_sample("inst-1", day).await.unwrap());
        let rollups = store
            .active_instance_samples("inst-1", day, day)
            .await
            .unwrap();
        assert!(rollups.is_empty());
    }

    #[tokio::test]
    async fn samples_split_across_months_are_read_back_together() {
        let store = test_store().await;
        let june = date(2025, 6, 30);
        let july = date(2025, 7, 1);
        ensure_month(&store, june).await;
        ensure_month(&store, july).await;

        store
            .upsert_database_samples("inst-1", &[capacity("app", 100, june)])
            .await
            .unwrap();
        store
            .upsert_database_samples("inst-1", &[capacity("app", 110, july)])
            .await
            .unwrap();

        let samples = store
            .active_database_samples("inst-1", june, july)
            .await
            .unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].collected_date, june);
        assert_eq!(samples[1].collected_date, july);
    }

    #[tokio::test]
    async fn aggregate_upserts_overwrite_in_place() {
        let store = test_store().await;
        let start = date(2025, 6, 1);
        ensure_month(&store, start).await;

        let mut aggregate = DatabaseSizeAggregate {
            instance_id: "inst-1".to_string(),
            database_name: "app".to_string(),
            period_type: PeriodType::Monthly,
            period_start: start,
            period_end: date(2025, 6, 30),
            avg_size_mb: 100,
            max_size_mb: 120,
            min_size_mb: 90,
            data_count: 30,
            avg_data_size_mb: None,
            max_data_size_mb: None,
            min_data_size_mb: None,
            size_change_mb: 0,
            size_change_percent: 0.0,
            growth_rate: 0.0,
        };
        store.upsert_database_aggregate(&aggregate).await.unwrap();
        aggregate.avg_size_mb = 105;
        store.upsert_database_aggregate(&aggregate).await.unwrap();

        let stored = store
            .database_aggregates(&AggregateQuery::new("inst-1", PeriodType::Monthly))
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].avg_size_mb, 105);
    }

    #[tokio::test]
    async fn aggregate_queries_order_and_limit() {
        let store = test_store().await;
        ensure_month(&store, date(2025, 5, 1)).await;
        ensure_month(&store, date(2025, 6, 1)).await;

        for (start, end) in [
            (date(2025, 5, 1), date(2025, 5, 31)),
            (date(2025, 6, 1), date(2025, 6, 30)),
        ] {
            store
                .upsert_database_aggregate(&DatabaseSizeAggregate {
                    instance_id: "inst-1".to_string(),
                    database_name: "app".to_string(),
                    period_type: PeriodType::Monthly,
                    period_start: start,
                    period_end: end,
                    avg_size_mb: 100,
                    max_size_mb: 100,
                    min_size_mb: 100,
                    data_count: 1,
                    avg_data_size_mb: None,
                    max_data_size_mb: None,
                    min_data_size_mb: None,
                    size_change_mb: 0,
                    size_change_percent: 0.0,
                    growth_rate: 0.0,
                })
                .await
                .unwrap();
        }

        let newest_first = store
            .database_aggregates(&AggregateQuery::new("inst-1", PeriodType::Monthly))
            .await
            .unwrap();
        assert_eq!(newest_first[0].period_start, date(2025, 6, 1));

        let limited = store
            .database_aggregates(
                &AggregateQuery::new("inst-1", PeriodType::Monthly).limit(1),
            )
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].period_start, date(2025, 6, 1));
    }

    #[tokio::test]
    async fn file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capmon.db");
        let config = CapmonConfig::builder()
            .database_path(path.display().to_string())
            .max_connections(1)
            .build();
        let day = date(2025, 6, 15);

        {
            let store = SampleStore::new(&config).await.unwrap();
            ensure_month(&store, day).await;
            store
                .upsert_database_samples("inst-1", &[capacity("app", 100, day)])
                .await
                .unwrap();
            store.pool().close().await;
        }

        let store = SampleStore::new(&config).await.unwrap();
        let samples = store
            .active_database_samples("inst-1", day, day)
            .await
            .unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].size_mb, 100);
    }

    #[tokio::test]
    async fn store_statistics_count_rows_and_partitions() {
        let store = test_store().await;
        let day = date(2025, 6, 15);
        ensure_month(&store, day).await;

        store
            .upsert_database_samples("inst-1", &[capacity("app", 100, day)])
            .await
            .unwrap();
        store.upsert_instance_sample("inst-1", day).await.unwrap();

        let stats = store.store_statistics().await.unwrap();
        assert_eq!(stats.database_sample_rows, 1);
        assert_eq!(stats.instance_sample_rows, 1);
        assert_eq!(stats.partition_count, 2);
        assert!(stats.file_size_bytes > 0);
    }
}
