// src/aggregation.rs

//! Period aggregation over raw samples.
//!
//! Aggregates are a pure function of the raw samples in a period: pull,
//! summarize, compare against the previous granule, upsert. Recomputing at
//! any time yields bit-identical rows because the previous-period reference
//! is itself recomputed from raw samples, never read back from stored
//! aggregate rows.
//!
//! Instance-level statistics summarize the period's database samples
//! ungrouped, so `avg_size_mb` reads as "average database size across the
//! period"; the head count comes from the daily instance rollups.

use chrono::NaiveDate;
use tracing::debug;

use crate::calendar::{period_end, period_start_containing, previous_period_start};
use crate::error::{CapmonError, CapmonResult};
use crate::store::SampleStore;
use crate::types::{
    DatabaseSizeAggregate, DatabaseSizeSample, InstanceSizeAggregate, InstanceSizeSample,
    PeriodType, TrendDirection,
};

struct SizeStats {
    avg: i64,
    max: i64,
    min: i64,
    count: i64,
}

fn size_stats(values: &[i64]) -> Option<SizeStats> {
    if values.is_empty() {
        return None;
    }
    let sum: i64 = values.iter().sum();
    let avg = (sum as f64 / values.len() as f64).round() as i64;
    // Non-empty slice, so the folds always produce a value
    let max = values.iter().copied().max()?;
    let min = values.iter().copied().min()?;
    Some(SizeStats {
        avg,
        max,
        min,
        count: values.len() as i64,
    })
}

/// Change fields against the previous period's average. No prior data means
/// exact zeros, never null or NaN; a prior average of zero pins the percent
/// to zero as well.
fn change_fields(current_avg: i64, previous_avg: Option<i64>) -> (i64, f64) {
    match previous_avg {
        None => (0, 0.0),
        Some(prev) => {
            let change = current_avg - prev;
            let percent = if prev == 0 {
                0.0
            } else {
                change as f64 / prev as f64 * 100.0
            };
            (change, percent)
        }
    }
}

fn trend_for(previous_avg: Option<i64>, size_change_percent: f64) -> TrendDirection {
    match previous_avg {
        None => TrendDirection::Unknown,
        Some(_) => {
            if size_change_percent > 0.0 {
                TrendDirection::Increasing
            } else if size_change_percent < 0.0 {
                TrendDirection::Decreasing
            } else {
                TrendDirection::Stable
            }
        }
    }
}

/// Head count for a period: the latest daily rollup wins; absent rollups,
/// fall back to counting distinct databases on the latest sample day
fn latest_database_count(
    rollups: &[InstanceSizeSample],
    samples: &[DatabaseSizeSample],
) -> i64 {
    if let Some(rollup) = rollups.last() {
        return rollup.database_count;
    }
    let Some(latest) = samples.iter().map(|s| s.collected_date).max() else {
        return 0;
    };
    let mut names: Vec<&str> = samples
        .iter()
        .filter(|s| s.collected_date == latest)
        .map(|s| s.database_name.as_str())
        .collect();
    names.sort_unstable();
    names.dedup();
    names.len() as i64
}

/// Computes and persists period aggregates for one store
#[derive(Clone)]
pub struct Aggregator {
    store: SampleStore,
}

impl Aggregator {
    pub fn new(store: SampleStore) -> Self {
        Self { store }
    }

    /// Distinct databases with active samples for the instance in the
    /// period containing `reference`
    pub async fn databases_in_period(
        &self,
        instance_id: &str,
        period_type: PeriodType,
        reference: NaiveDate,
    ) -> CapmonResult<Vec<String>> {
        let start = period_start_containing(period_type, reference);
        let end = period_end(period_type, start);
        let samples = self
            .store
            .active_database_samples(instance_id, start, end)
            .await?;
        let mut names: Vec<String> = samples.into_iter().map(|s| s.database_name).collect();
        names.sort_unstable();
        names.dedup();
        Ok(names)
    }

    /// Compute and upsert one database's aggregate for the period
    /// containing `reference`
    pub async fn aggregate_database(
        &self,
        instance_id: &str,
        database_name: &str,
        period_type: PeriodType,
        reference: NaiveDate,
    ) -> CapmonResult<DatabaseSizeAggregate> {
        let start = period_start_containing(period_type, reference);
        let end = period_end(period_type, start);

        let samples = self
            .store
            .active_database_samples(instance_id, start, end)
            .await?;
        let sizes: Vec<i64> = samples
            .iter()
            .filter(|s| s.database_name == database_name)
            .map(|s| s.size_mb)
            .collect();
        let stats = size_stats(&sizes).ok_or_else(|| {
            CapmonError::aggregation_input(
                format!("{instance_id}/{database_name}"),
                format!("no active samples in {period_type} period starting {start}"),
            )
        })?;
        let data_sizes: Vec<i64> = samples
            .iter()
            .filter(|s| s.database_name == database_name)
            .filter_map(|s| s.data_size_mb)
            .collect();
        let data_stats = size_stats(&data_sizes);

        let previous_avg = self
            .previous_database_avg(instance_id, database_name, period_type, start)
            .await?;
        let (size_change_mb, size_change_percent) = change_fields(stats.avg, previous_avg);

        let aggregate = DatabaseSizeAggregate {
            instance_id: instance_id.to_string(),
            database_name: database_name.to_string(),
            period_type,
            period_start: start,
            period_end: end,
            avg_size_mb: stats.avg,
            max_size_mb: stats.max,
            min_size_mb: stats.min,
            data_count: stats.count,
            avg_data_size_mb: data_stats.as_ref().map(|s| s.avg),
            max_data_size_mb: data_stats.as_ref().map(|s| s.max),
            min_data_size_mb: data_stats.as_ref().map(|s| s.min),
            size_change_mb,
            size_change_percent,
            // growth_rate aliases the percent; it is never derived separately
            growth_rate: size_change_percent,
        };
        self.store.upsert_database_aggregate(&aggregate).await?;

        debug!(
            instance_id,
            database_name,
            period = %period_type,
            %start,
            avg = aggregate.avg_size_mb,
            "database aggregate stored"
        );
        Ok(aggregate)
    }

    /// Compute and upsert every database aggregate for the period
    /// containing `reference`, one result per database.
    ///
    /// A failing database never aborts its siblings.
    pub async fn aggregate_databases(
        &self,
        instance_id: &str,
        period_type: PeriodType,
        reference: NaiveDate,
    ) -> CapmonResult<Vec<CapmonResult<DatabaseSizeAggregate>>> {
        let names = self
            .databases_in_period(instance_id, period_type, reference)
            .await?;
        let mut results = Vec::with_capacity(names.len());
        for name in &names {
            results.push(
                self.aggregate_database(instance_id, name, period_type, reference)
                    .await,
            );
        }
        Ok(results)
    }

    /// Compute and upsert the instance-level aggregate for the period
    /// containing `reference`
    pub async fn aggregate_instance(
        &self,
        instance_id: &str,
        period_type: PeriodType,
        reference: NaiveDate,
    ) -> CapmonResult<InstanceSizeAggregate> {
        let start = period_start_containing(period_type, reference);
        let end = period_end(period_type, start);

        let samples = self
            .store
            .active_database_samples(instance_id, start, end)
            .await?;
        let sizes: Vec<i64> = samples.iter().map(|s| s.size_mb).collect();
        let stats = size_stats(&sizes).ok_or_else(|| {
            CapmonError::aggregation_input(
                instance_id.to_string(),
                format!("no active samples in {period_type} period starting {start}"),
            )
        })?;
        let rollups = self
            .store
            .active_instance_samples(instance_id, start, end)
            .await?;
        let database_count = latest_database_count(&rollups, &samples);

        let previous = self
            .previous_instance_reference(instance_id, period_type, start)
            .await?;
        let previous_avg = previous.as_ref().map(|p| p.avg);
        let (size_change_mb, size_change_percent) = change_fields(stats.avg, previous_avg);
        let database_count_change = previous
            .as_ref()
            .map(|p| database_count - p.database_count)
            .unwrap_or(0);

        let aggregate = InstanceSizeAggregate {
            instance_id: instance_id.to_string(),
            period_type,
            period_start: start,
            period_end: end,
            avg_size_mb: stats.avg,
            max_size_mb: stats.max,
            min_size_mb: stats.min,
            data_count: stats.count,
            database_count,
            database_count_change,
            size_change_mb,
            size_change_percent,
            growth_rate: size_change_percent,
            trend: trend_for(previous_avg, size_change_percent),
        };
        self.store.upsert_instance_aggregate(&aggregate).await?;

        debug!(
            instance_id,
            period = %period_type,
            %start,
            avg = aggregate.avg_size_mb,
            trend = aggregate.trend.as_str(),
            "instance aggregate stored"
        );
        Ok(aggregate)
    }

    /// Previous-period average for one database, recomputed from raw
    /// samples; None when the previous granule holds no samples
    async fn previous_database_avg(
        &self,
        instance_id: &str,
        database_name: &str,
        period_type: PeriodType,
        period_start: NaiveDate,
    ) -> CapmonResult<Option<i64>> {
        let prev_start = previous_period_start(period_type, period_start);
        let prev_end = period_end(period_type, prev_start);
        let samples = self
            .store
            .active_database_samples(instance_id, prev_start, prev_end)
            .await?;
        let sizes: Vec<i64> = samples
            .iter()
            .filter(|s| s.database_name == database_name)
            .map(|s| s.size_mb)
            .collect();
        Ok(size_stats(&sizes).map(|s| s.avg))
    }

    async fn previous_instance_reference(
        &self,
        instance_id: &str,
        period_type: PeriodType,
        period_start: NaiveDate,
    ) -> CapmonResult<Option<PreviousInstancePeriod>> {
        let prev_start = previous_period_start(period_type, period_start);
        let prev_end = period_end(period_type, prev_start);
        let samples = self
            .store
            .active_database_samples(instance_id, prev_start, prev_end)
            .await?;
        let sizes: Vec<i64> = samples.iter().map(|s| s.size_mb).collect();
        let Some(stats) = size_stats(&sizes) else {
            return Ok(None);
        };
        let rollups = self
            .store
            .active_instance_samples(instance_id, prev_start, prev_end)
            .await?;
        Ok(Some(PreviousInstancePeriod {
            avg: stats.avg,
            database_count: latest_database_count(&rollups, &samples),
        }))
    }
}

struct PreviousInstancePeriod {
    avg: i64,
    database_count: i64,
}
