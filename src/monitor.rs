// src/monitor.rs

//! The externally-triggered entry points.
//!
//! There is no scheduler in here: an outside cadence (cron, a job runner, a
//! handler) calls one of [`CapacityMonitor::run_collection`],
//! [`CapacityMonitor::run_aggregation`], or
//! [`CapacityMonitor::run_partition_maintenance`], and each invocation runs
//! to completion and returns a [`RunReport`].
//!
//! Failure boundaries are deliberate and narrow: per instance during
//! collection, per entity during aggregation, per table during maintenance.
//! Only an unobtainable work list aborts an invocation outright.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::adapters::adapter_for;
use crate::aggregation::Aggregator;
use crate::callbacks::{CapmonCallbacks, CollectionContext};
use crate::error::{CapmonError, CapmonResult};
use crate::partitions::PartitionManager;
use crate::store::{SampleStore, StoreStatistics};
use crate::types::{
    AggregateQuery, CapmonConfig, DatabaseSizeAggregate, InstanceRef, InstanceSizeAggregate,
    PartitionInfo, PeriodType, RunReport,
};

/// Invocation counters and last-run timestamps
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorStatus {
    pub collection_runs: u64,
    pub aggregation_runs: u64,
    pub maintenance_runs: u64,
    pub last_collection_at: Option<DateTime<Utc>>,
    pub last_aggregation_at: Option<DateTime<Utc>>,
    pub last_maintenance_at: Option<DateTime<Utc>>,
}

/// Fleet-wide capacity monitoring over one sample store
pub struct CapacityMonitor {
    config: CapmonConfig,
    store: SampleStore,
    partitions: PartitionManager,
    aggregator: Aggregator,
    callbacks: CapmonCallbacks,
    status: Arc<RwLock<MonitorStatus>>,
}

impl CapacityMonitor {
    /// Open the configured store and assemble the monitor
    pub async fn new(config: CapmonConfig, callbacks: CapmonCallbacks) -> CapmonResult<Self> {
        let store = SampleStore::new(&config).await?;
        Ok(Self::with_store(config, store, callbacks))
    }

    /// Assemble the monitor over an existing store
    pub fn with_store(
        config: CapmonConfig,
        store: SampleStore,
        callbacks: CapmonCallbacks,
    ) -> Self {
        let partitions = PartitionManager::new(store.pool().clone());
        let aggregator = Aggregator::new(store.clone());
        Self {
            config,
            store,
            partitions,
            aggregator,
            callbacks,
            status: Arc::new(RwLock::new(MonitorStatus::default())),
        }
    }

    pub async fn status(&self) -> MonitorStatus {
        self.status.read().await.clone()
    }

    /// Collect today's samples for every active instance.
    ///
    /// Instances run sequentially, each inside its own failure boundary;
    /// one instance's error is logged, reported, and never rolls back a
    /// sibling's committed step. Errs only when the registry cannot supply
    /// the work list at all.
    pub async fn run_collection(&self) -> CapmonResult<RunReport> {
        let started_at = Utc::now();
        let context = CollectionContext {
            collected_date: started_at.date_naive(),
            started_at,
        };
        info!(collected_date = %context.collected_date, "collection run starting");

        let instances = self.callbacks.registry.list_instances().await?;
        let active: Vec<InstanceRef> = instances.into_iter().filter(|i| i.is_active).collect();
        let mut report = RunReport::new(active.len());

        for result in self.partitions.ensure_partition(context.collected_date).await {
            if let Err(e) = result {
                error!(%e, "partition ensure failed ahead of collection");
                report.push_error(&e);
            }
        }

        for instance in &active {
            match self.collect_instance(instance, &context).await {
                Ok(written) => {
                    report.processed_count += 1;
                    report.record_count += written;
                    info!(instance_id = %instance.id, rows = written, "instance collected");
                    self.notify_collected(instance, written, &context).await;
                }
                Err(e) => {
                    error!(instance_id = %instance.id, %e, "instance collection failed");
                    report.push_error(format!("{}: {e}", instance.id));
                    self.notify_failed(instance, &e, &context).await;
                }
            }
        }

        let report = report.finish();
        info!(
            processed = report.processed_count,
            total = report.total_count,
            rows = report.record_count,
            success = report.success,
            "collection run finished"
        );
        let mut status = self.status.write().await;
        status.collection_runs += 1;
        status.last_collection_at = Some(Utc::now());
        Ok(report)
    }

    /// One instance's collection step: resolve credentials, open a
    /// short-lived session, extract, persist, derive the rollup. The
    /// session drops (and disconnects) when the step ends.
    async fn collect_instance(
        &self,
        instance: &InstanceRef,
        context: &CollectionContext,
    ) -> CapmonResult<u64> {
        let params = self
            .callbacks
            .credentials
            .resolve(instance)
            .await
            .map_err(|e| credential_context(&instance.id, e))?;
        let session = self
            .callbacks
            .connector
            .connect(instance, &params)
            .await
            .map_err(|e| adapter_context(&instance.id, e))?;

        let adapter = adapter_for(instance.engine);
        let inventory = adapter
            .fetch_inventory(session.as_ref())
            .await
            .map_err(|e| adapter_context(&instance.id, e))?;
        let mut records = adapter
            .fetch_capacity(session.as_ref(), None)
            .await
            .map_err(|e| adapter_context(&instance.id, e))?;

        // One invocation accounts for one calendar day, even across
        // midnight
        for record in &mut records {
            record.collected_date = context.collected_date;
        }
        if !self.config.include_system {
            records.retain(|r| !r.is_system);
        }

        let written = self
            .store
            .upsert_database_samples(&instance.id, &records)
            .await?;
        let active_names: Vec<String> = inventory
            .iter()
            .filter(|r| self.config.include_system || !r.is_system)
            .map(|r| r.name.clone())
            .collect();
        self.store
            .mark_missing_databases(&instance.id, context.collected_date, &active_names)
            .await?;
        self.store
            .upsert_instance_sample(&instance.id, context.collected_date)
            .await?;
        Ok(written)
    }

    /// Aggregate the period containing today for every active instance
    pub async fn run_aggregation(&self, period_type: PeriodType) -> CapmonResult<RunReport> {
        self.run_aggregation_for(period_type, Utc::now().date_naive())
            .await
    }

    /// Aggregate the period containing `reference` for every active
    /// instance: every database seen in the period, then the instance
    /// rollup. Entities fail independently.
    pub async fn run_aggregation_for(
        &self,
        period_type: PeriodType,
        reference: NaiveDate,
    ) -> CapmonResult<RunReport> {
        info!(period = %period_type, %reference, "aggregation run starting");

        let instances = self.callbacks.registry.list_instances().await?;
        let active: Vec<InstanceRef> = instances.into_iter().filter(|i| i.is_active).collect();
        let mut report = RunReport::new(0);

        for instance in &active {
            let names = match self
                .aggregator
                .databases_in_period(&instance.id, period_type, reference)
                .await
            {
                Ok(names) => names,
                Err(e) => {
                    error!(instance_id = %instance.id, %e, "could not enumerate period databases");
                    report.total_count += 1;
                    report.push_error(format!("{}: {e}", instance.id));
                    continue;
                }
            };
            if names.is_empty() {
                continue;
            }

            // One unit per database plus one for the instance rollup
            report.total_count += names.len() + 1;
            for name in &names {
                match self
                    .aggregator
                    .aggregate_database(&instance.id, name, period_type, reference)
                    .await
                {
                    Ok(_) => {
                        report.processed_count += 1;
                        report.record_count += 1;
                    }
                    Err(e) => {
                        error!(instance_id = %instance.id, database = %name, %e, "database aggregation failed");
                        report.push_error(format!("{}/{name}: {e}", instance.id));
                    }
                }
            }
            match self
                .aggregator
                .aggregate_instance(&instance.id, period_type, reference)
                .await
            {
                Ok(_) => {
                    report.processed_count += 1;
                    report.record_count += 1;
                }
                Err(e) => {
                    error!(instance_id = %instance.id, %e, "instance aggregation failed");
                    report.push_error(format!("{}: {e}", instance.id));
                }
            }
        }

        let report = report.finish();
        info!(
            processed = report.processed_count,
            total = report.total_count,
            success = report.success,
            "aggregation run finished"
        );
        let mut status = self.status.write().await;
        status.aggregation_runs += 1;
        status.last_aggregation_at = Some(Utc::now());
        Ok(report)
    }

    /// Ensure current and configured future partitions, then drop those
    /// beyond retention. Each managed table steps independently and is
    /// reported independently.
    pub async fn run_partition_maintenance(&self) -> CapmonResult<RunReport> {
        let today = Utc::now().date_naive();
        info!(%today, "partition maintenance starting");

        let ensured = self
            .partitions
            .ensure_future_partitions(today, self.config.future_months)
            .await;
        let dropped = self
            .partitions
            .drop_partitions_older_than(today, self.config.retention_months)
            .await;

        let mut report = RunReport::new(ensured.len() + dropped.len());
        for result in ensured {
            match result {
                Ok(ensure) => {
                    report.processed_count += 1;
                    if ensure.outcome == crate::types::EnsureOutcome::Created {
                        report.record_count += 1;
                    }
                }
                Err(e) => {
                    error!(%e, "partition ensure failed");
                    report.push_error(&e);
                }
            }
        }
        for result in dropped {
            match result {
                Ok(names) => {
                    report.processed_count += 1;
                    report.record_count += names.len() as u64;
                }
                Err(e) => {
                    error!(%e, "partition retention sweep failed");
                    report.push_error(&e);
                }
            }
        }

        let report = report.finish();
        info!(
            processed = report.processed_count,
            total = report.total_count,
            changed = report.record_count,
            success = report.success,
            "partition maintenance finished"
        );
        let mut status = self.status.write().await;
        status.maintenance_runs += 1;
        status.last_maintenance_at = Some(Utc::now());
        Ok(report)
    }

    /// Stored database-level aggregates, newest period first
    pub async fn database_aggregates(
        &self,
        query: &AggregateQuery,
    ) -> CapmonResult<Vec<DatabaseSizeAggregate>> {
        self.store.database_aggregates(query).await
    }

    /// Stored instance-level aggregates, newest period first
    pub async fn instance_aggregates(
        &self,
        query: &AggregateQuery,
    ) -> CapmonResult<Vec<InstanceSizeAggregate>> {
        self.store.instance_aggregates(query).await
    }

    /// Per-partition name, month, row count, size, and lifecycle status
    pub async fn partition_statistics(&self) -> CapmonResult<Vec<PartitionInfo>> {
        self.partitions
            .partition_statistics(Utc::now().date_naive())
            .await
    }

    /// Row counts and on-disk footprint of the store
    pub async fn store_statistics(&self) -> CapmonResult<StoreStatistics> {
        self.store.store_statistics().await
    }

    async fn notify_collected(&self, instance: &InstanceRef, written: u64, ctx: &CollectionContext) {
        for observer in &self.callbacks.observers {
            if let Err(e) = observer.on_instance_collected(instance, written, ctx).await {
                warn!(instance_id = %instance.id, %e, "collection observer failed");
            }
        }
    }

    async fn notify_failed(&self, instance: &InstanceRef, error: &CapmonError, ctx: &CollectionContext) {
        for observer in &self.callbacks.observers {
            if let Err(e) = observer.on_instance_failed(instance, error, ctx).await {
                warn!(instance_id = %instance.id, %e, "failure observer failed");
            }
        }
    }
}

/// Connectivity and extraction failures carry the instance they belong to
fn adapter_context(instance_id: &str, error: CapmonError) -> CapmonError {
    match error {
        e @ CapmonError::Adapter { .. } => e,
        e => CapmonError::adapter(instance_id, e.to_string()),
    }
}

fn credential_context(instance_id: &str, error: CapmonError) -> CapmonError {
    match error {
        e @ CapmonError::Credential { .. } => e,
        e => CapmonError::credential(instance_id, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::{EngineSession, InstanceConnector};
    use crate::types::{ConnectParams, EngineKind, SqlRow, SqlValue};
    use crate::utils::{StaticCredentials, StaticRegistry};
    use async_trait::async_trait;
    use sqlx::sqlite::SqlitePoolOptions;

    fn text(s: &str) -> SqlValue {
        SqlValue::Text(s.to_string())
    }

    /// MySQL-shaped session over fixed schema sizes (name, MB)
    struct CannedMySqlSession {
        schemas: Vec<(String, i64)>,
    }

    #[async_trait]
    impl EngineSession for CannedMySqlSession {
        async fn query_rows(&self, sql: &str) -> CapmonResult<Vec<SqlRow>> {
            if sql.contains("information_schema.tables") {
                Ok(self
                    .schemas
                    .iter()
                    .map(|(name, mb)| {
                        vec![
                            text(name),
                            SqlValue::Int(mb * 1_048_576),
                            SqlValue::Int(mb * 1_048_576),
                        ]
                    })
                    .collect())
            } else {
                Ok(self.schemas.iter().map(|(name, _)| vec![text(name)]).collect())
            }
        }
    }

    /// Connector that serves canned sessions per instance id and refuses
    /// the rest
    struct CannedConnector {
        fleets: std::collections::HashMap<String, Vec<(String, i64)>>,
    }

    #[async_trait]
    impl InstanceConnector for CannedConnector {
        async fn connect(
            &self,
            instance: &InstanceRef,
            _params: &ConnectParams,
        ) -> CapmonResult<Box<dyn EngineSession>> {
            match self.fleets.get(&instance.id) {
                Some(schemas) => Ok(Box::new(CannedMySqlSession {
                    schemas: schemas.clone(),
                })),
                None => Err(CapmonError::adapter(
                    instance.id.clone(),
                    "connection refused",
                )),
            }
        }
    }

    fn instance(id: &str) -> InstanceRef {
        InstanceRef {
            id: id.to_string(),
            engine: EngineKind::MySql,
            host: "db.example.internal".to_string(),
            port: 3306,
            credential_ref: "cred".to_string(),
            is_active: true,
        }
    }

    fn params() -> ConnectParams {
        ConnectParams {
            host: "db.example.internal".to_string(),
            port: 3306,
            username: "capmon".to_string(),
            password: "secret".to_string(),
            database: None,
        }
    }

    async fn monitor_with(
        instances: Vec<InstanceRef>,
        fleets: Vec<(&str, Vec<(&str, i64)>)>,
    ) -> CapacityMonitor {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SampleStore::with_pool(pool).await.unwrap();
        let callbacks = CapmonCallbacks::new(
            Arc::new(StaticRegistry::new(instances)),
            Arc::new(StaticCredentials::new().with("cred", params())),
            Arc::new(CannedConnector {
                fleets: fleets
                    .into_iter()
                    .map(|(id, schemas)| {
                        (
                            id.to_string(),
                            schemas
                                .into_iter()
                                .map(|(n, mb)| (n.to_string(), mb))
                                .collect(),
                        )
                    })
                    .collect(),
            }),
        );
        CapacityMonitor::with_store(CapmonConfig::default(), store, callbacks)
    }

    #[tokio::test]
    async fn collection_persists_samples_and_rollups() {
        let monitor = monitor_with(
            vec![instance("inst-1")],
            vec![("inst-1", vec![("app", 100), ("web", 200)])],
        )
        .await;

        let report = monitor.run_collection().await.unwrap();
        assert!(report.success);
        assert_eq!(report.processed_count, 1);
        assert_eq!(report.total_count, 1);
        assert_eq!(report.record_count, 2);

        let today = Utc::now().date_naive();
        let samples = monitor
            .store
            .active_database_samples("inst-1", today, today)
            .await
            .unwrap();
        assert_eq!(samples.len(), 2);
        let rollups = monitor
            .store
            .active_instance_samples("inst-1", today, today)
            .await
            .unwrap();
        assert_eq!(rollups[0].total_size_mb, 300);
        assert_eq!(rollups[0].database_count, 2);
    }

    #[tokio::test]
    async fn collecting_twice_yields_an_unchanged_row_set() {
        let monitor = monitor_with(
            vec![instance("inst-1")],
            vec![("inst-1", vec![("app", 100)])],
        )
        .await;

        monitor.run_collection().await.unwrap();
        let today = Utc::now().date_naive();
        let first = monitor
            .store
            .active_database_samples("inst-1", today, today)
            .await
            .unwrap();

        monitor.run_collection().await.unwrap();
        let second = monitor
            .store
            .active_database_samples("inst-1", today, today)
            .await
            .unwrap();

        assert_eq!(first.len(), second.len());
        assert_eq!(first[0].database_name, second[0].database_name);
        assert_eq!(first[0].size_mb, second[0].size_mb);
        assert_eq!(first[0].collected_date, second[0].collected_date);
    }

    #[tokio::test]
    async fn a_failing_instance_never_blocks_its_siblings() {
        let monitor = monitor_with(
            vec![instance("inst-good"), instance("inst-bad")],
            vec![("inst-good", vec![("app", 100)])],
        )
        .await;

        let report = monitor.run_collection().await.unwrap();
        assert!(!report.success);
        assert_eq!(report.processed_count, 1);
        assert_eq!(report.total_count, 2);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("inst-bad"));

        let today = Utc::now().date_naive();
        let samples = monitor
            .store
            .active_database_samples("inst-good", today, today)
            .await
            .unwrap();
        assert_eq!(samples.len(), 1);
    }

    #[tokio::test]
    async fn inactive_instances_are_not_in_the_work_list() {
        let mut dormant = instance("inst-off");
        dormant.is_active = false;
        let monitor = monitor_with(vec![dormant], vec![]).await;

        let report = monitor.run_collection().await.unwrap();
        assert!(report.success);
        assert_eq!(report.total_count, 0);
    }

    #[tokio::test]
    async fn aggregation_covers_every_database_plus_the_rollup() {
        let monitor = monitor_with(
            vec![instance("inst-1")],
            vec![("inst-1", vec![("app", 100), ("web", 200)])],
        )
        .await;
        monitor.run_collection().await.unwrap();

        let today = Utc::now().date_naive();
        let report = monitor
            .run_aggregation_for(PeriodType::Daily, today)
            .await
            .unwrap();
        assert!(report.success);
        // two databases plus the instance rollup
        assert_eq!(report.total_count, 3);
        assert_eq!(report.record_count, 3);

        let stored = monitor
            .database_aggregates(&AggregateQuery::new("inst-1", PeriodType::Daily))
            .await
            .unwrap();
        assert_eq!(stored.len(), 2);
        let instance_level = monitor
            .instance_aggregates(&AggregateQuery::new("inst-1", PeriodType::Daily))
            .await
            .unwrap();
        assert_eq!(instance_level.len(), 1);
        assert_eq!(instance_level[0].avg_size_mb, 150);
    }

    #[tokio::test]
    async fn maintenance_reports_per_table_outcomes() {
        let monitor = monitor_with(vec![], vec![]).await;

        let report = monitor.run_partition_maintenance().await.unwrap();
        assert!(report.success);
        // (current + 1 future month) x 2 tables ensured, plus 2 retention
        // sweeps
        assert_eq!(report.total_count, 6);
        assert_eq!(report.record_count, 4);

        let stats = monitor.partition_statistics().await.unwrap();
        assert_eq!(stats.len(), 4);
    }

    #[tokio::test]
    async fn status_counts_invocations() {
        let monitor = monitor_with(vec![], vec![]).await;
        assert_eq!(monitor.status().await.collection_runs, 0);

        monitor.run_collection().await.unwrap();
        monitor.run_partition_maintenance().await.unwrap();

        let status = monitor.status().await;
        assert_eq!(status.collection_runs, 1);
        assert_eq!(status.maintenance_runs, 1);
        assert_eq!(status.aggregation_runs, 0);
        assert!(status.last_collection_at.is_some());
        assert!(status.last_aggregation_at.is_none());
    }
}
