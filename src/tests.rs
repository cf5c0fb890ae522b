// src/tests.rs

//! Cross-module flows: collection through adapters into the store, the
//! store into aggregation, and back out through the query surface. Module
//! internals are covered next to their modules; these tests only drive the
//! public seams.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sqlx::sqlite::SqlitePoolOptions;

use crate::callbacks::{CapmonCallbacks, EngineSession, InstanceConnector};
use crate::error::{CapmonError, CapmonResult};
use crate::monitor::CapacityMonitor;
use crate::partitions::PartitionManager;
use crate::store::SampleStore;
use crate::types::{
    AggregateQuery, CapacityRecord, CapmonConfig, ConnectParams, EngineKind, InstanceRef,
    PeriodType, SqlRow, SqlValue, TrendDirection,
};
use crate::utils::{StaticCredentials, StaticRegistry};

const MB: i64 = 1_048_576;

fn text(s: &str) -> SqlValue {
    SqlValue::Text(s.to_string())
}

fn int(v: i64) -> SqlValue {
    SqlValue::Int(v)
}

/// Only the capacity statements touch the engines' size catalogs
fn is_capacity_sql(sql: &str) -> bool {
    sql.contains("information_schema.tables")
        || sql.contains("pg_database_size")
        || sql.contains("master_files")
        || sql.contains("dba_data_files")
}

/// Session with one canned row set per statement kind
struct ScriptedSession {
    inventory: Vec<SqlRow>,
    capacity: Vec<SqlRow>,
}

#[async_trait]
impl EngineSession for ScriptedSession {
    async fn query_rows(&self, sql: &str) -> CapmonResult<Vec<SqlRow>> {
        if is_capacity_sql(sql) {
            Ok(self.capacity.clone())
        } else {
            Ok(self.inventory.clone())
        }
    }
}

/// Connector serving scripted row sets per instance id; the sets can be
/// swapped between runs to model a changing fleet
struct ScriptedConnector {
    sessions: Mutex<HashMap<String, (Vec<SqlRow>, Vec<SqlRow>)>>,
}

impl ScriptedConnector {
    fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn script(&self, instance_id: &str, inventory: Vec<SqlRow>, capacity: Vec<SqlRow>) {
        self.sessions
            .lock()
            .unwrap()
            .insert(instance_id.to_string(), (inventory, capacity));
    }
}

#[async_trait]
impl InstanceConnector for ScriptedConnector {
    async fn connect(
        &self,
        instance: &InstanceRef,
        _params: &ConnectParams,
    ) -> CapmonResult<Box<dyn EngineSession>> {
        let sessions = self.sessions.lock().unwrap();
        match sessions.get(&instance.id) {
            Some((inventory, capacity)) => Ok(Box::new(ScriptedSession {
                inventory: inventory.clone(),
                capacity: capacity.clone(),
            })),
            None => Err(CapmonError::adapter(instance.id.clone(), "connection refused")),
        }
    }
}

fn instance(id: &str, engine: EngineKind) -> InstanceRef {
    InstanceRef {
        id: id.to_string(),
        engine,
        host: "db.example.internal".to_string(),
        port: 0,
        credential_ref: "fleet".to_string(),
        is_active: true,
    }
}

fn params() -> ConnectParams {
    ConnectParams {
        host: "db.example.internal".to_string(),
        port: 0,
        username: "capmon".to_string(),
        password: "secret".to_string(),
        database: None,
    }
}

async fn memory_store() -> SampleStore {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    SampleStore::with_pool(pool).await.unwrap()
}

fn monitor_over(
    store: SampleStore,
    instances: Vec<InstanceRef>,
    connector: Arc<ScriptedConnector>,
) -> CapacityMonitor {
    let callbacks = CapmonCallbacks::new(
        Arc::new(StaticRegistry::new(instances)),
        Arc::new(StaticCredentials::new().with("fleet", params())),
        connector,
    );
    CapacityMonitor::with_store(CapmonConfig::default(), store, callbacks)
}

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn record(name: &str, size_mb: i64, date: NaiveDate) -> CapacityRecord {
    CapacityRecord {
        name: name.to_string(),
        size_mb,
        data_size_mb: None,
        log_size_mb: None,
        collected_date: date,
        collected_at: Utc::now(),
        is_system: false,
    }
}

async fn ensure_month(store: &SampleStore, date: NaiveDate) {
    let manager = PartitionManager::new(store.pool().clone());
    for result in manager.ensure_partition(date).await {
        result.unwrap();
    }
}

/// Seed one collected day the way a collection run would have written it
async fn seed_day(store: &SampleStore, instance_id: &str, date: NaiveDate, sizes: &[(&str, i64)]) {
    ensure_month(store, date).await;
    let records: Vec<CapacityRecord> = sizes
        .iter()
        .map(|(name, mb)| record(name, *mb, date))
        .collect();
    store
        .upsert_database_samples(instance_id, &records)
        .await
        .unwrap();
    store
        .upsert_instance_sample(instance_id, date)
        .await
        .unwrap();
}

#[tokio::test]
async fn four_engines_land_in_one_uniform_store() {
    let connector = Arc::new(ScriptedConnector::new());
    connector.script(
        "mysql-01",
        vec![vec![text("app")], vec![text("mysql")]],
        vec![
            vec![text("app"), int(100 * MB), int(80 * MB)],
            vec![text("mysql"), int(5 * MB), int(5 * MB)],
        ],
    );
    connector.script(
        "pg-01",
        vec![
            vec![text("pgapp"), int(0)],
            vec![text("template1"), int(1)],
            vec![text("postgres"), int(0)],
        ],
        vec![
            vec![text("pgapp"), int(200 * MB), int(0)],
            vec![text("postgres"), int(8 * MB), int(0)],
        ],
    );
    connector.script(
        "mssql-01",
        vec![vec![text("sales")], vec![text("master")]],
        vec![
            // 38400 pages = 300 MB, split 200 data / 100 log
            vec![text("sales"), int(38_400), int(25_600), int(12_800)],
            vec![text("master"), int(512), int(512), int(0)],
        ],
    );
    connector.script(
        "ora-01",
        vec![
            vec![text("USERS"), text("PERMANENT")],
            vec![text("SYSTEM"), text("PERMANENT")],
        ],
        vec![
            vec![text("USERS"), int(400 * MB)],
            vec![text("SYSTEM"), int(700 * MB)],
        ],
    );

    let store = memory_store().await;
    let monitor = monitor_over(
        store.clone(),
        vec![
            instance("mysql-01", EngineKind::MySql),
            instance("pg-01", EngineKind::Postgres),
            instance("mssql-01", EngineKind::SqlServer),
            instance("ora-01", EngineKind::Oracle),
        ],
        connector,
    );

    let report = monitor.run_collection().await.unwrap();
    assert!(report.success);
    assert_eq!(report.processed_count, 4);
    // one user database per engine survives the system filter
    assert_eq!(report.record_count, 4);

    let today = Utc::now().date_naive();
    let expected = [
        ("mysql-01", "app", 100, Some(80), None),
        ("pg-01", "pgapp", 200, None, None),
        ("mssql-01", "sales", 300, Some(200), Some(100)),
        ("ora-01", "USERS", 400, None, None),
    ];
    for (id, name, size_mb, data_mb, log_mb) in expected {
        let samples = store
            .active_database_samples(id, today, today)
            .await
            .unwrap();
        assert_eq!(samples.len(), 1, "{id}");
        assert_eq!(samples[0].database_name, name);
        assert_eq!(samples[0].size_mb, size_mb);
        assert_eq!(samples[0].data_size_mb, data_mb);
        assert_eq!(samples[0].log_size_mb, log_mb);

        let rollups = store.active_instance_samples(id, today, today).await.unwrap();
        assert_eq!(rollups.len(), 1);
        assert_eq!(rollups[0].total_size_mb, size_mb);
        assert_eq!(rollups[0].database_count, 1);
    }
}

#[tokio::test]
async fn growth_between_days_flows_into_instance_aggregates() {
    let store = memory_store().await;
    let monday = day(2025, 6, 2);
    let tuesday = day(2025, 6, 3);
    seed_day(&store, "inst-1", monday, &[("a", 100), ("b", 200), ("c", 300)]).await;
    seed_day(&store, "inst-1", tuesday, &[("a", 110), ("b", 200), ("c", 300)]).await;

    let monitor = monitor_over(
        store,
        vec![instance("inst-1", EngineKind::MySql)],
        Arc::new(ScriptedConnector::new()),
    );
    for reference in [monday, tuesday] {
        let report = monitor
            .run_aggregation_for(PeriodType::Daily, reference)
            .await
            .unwrap();
        assert!(report.success);
        // three databases plus the instance rollup
        assert_eq!(report.total_count, 4);
    }

    let aggregates = monitor
        .instance_aggregates(&AggregateQuery::new("inst-1", PeriodType::Daily))
        .await
        .unwrap();
    assert_eq!(aggregates.len(), 2);

    // newest period first
    let latest = &aggregates[0];
    assert_eq!(latest.period_start, tuesday);
    assert_eq!(latest.avg_size_mb, 203);
    assert_eq!(latest.database_count, 3);
    assert_eq!(latest.size_change_mb, 3);
    assert!((latest.size_change_percent - 1.5).abs() < 1e-9);
    assert_eq!(latest.trend, TrendDirection::Increasing);

    let first = &aggregates[1];
    assert_eq!(first.period_start, monday);
    assert_eq!(first.avg_size_mb, 200);
    assert_eq!(first.size_change_mb, 0);
    assert_eq!(first.size_change_percent, 0.0);
    assert_eq!(first.trend, TrendDirection::Unknown);
}

#[tokio::test]
async fn weekly_aggregate_spans_both_collected_days() {
    let store = memory_store().await;
    let monday = day(2025, 6, 2);
    let tuesday = day(2025, 6, 3);
    seed_day(&store, "inst-1", monday, &[("a", 100), ("b", 200), ("c", 300)]).await;
    seed_day(&store, "inst-1", tuesday, &[("a", 110), ("b", 200), ("c", 300)]).await;

    let monitor = monitor_over(
        store,
        vec![instance("inst-1", EngineKind::MySql)],
        Arc::new(ScriptedConnector::new()),
    );
    monitor
        .run_aggregation_for(PeriodType::Weekly, tuesday)
        .await
        .unwrap();

    let aggregates = monitor
        .instance_aggregates(&AggregateQuery::new("inst-1", PeriodType::Weekly))
        .await
        .unwrap();
    assert_eq!(aggregates.len(), 1);
    assert_eq!(aggregates[0].period_start, monday);
    assert_eq!(aggregates[0].period_end, day(2025, 6, 8));
    // (100+200+300+110+200+300) / 6 rounds to 202
    assert_eq!(aggregates[0].avg_size_mb, 202);
    assert_eq!(aggregates[0].max_size_mb, 300);
    assert_eq!(aggregates[0].min_size_mb, 100);
    assert_eq!(aggregates[0].data_count, 6);
    assert_eq!(aggregates[0].database_count, 3);

    let per_database = monitor
        .database_aggregates(&AggregateQuery::new("inst-1", PeriodType::Weekly).database("a"))
        .await
        .unwrap();
    assert_eq!(per_database.len(), 1);
    assert_eq!(per_database[0].avg_size_mb, 105);
    assert_eq!(per_database[0].data_count, 2);
}

#[tokio::test]
async fn shrinking_fleet_is_swept_on_recollection() {
    let connector = Arc::new(ScriptedConnector::new());
    connector.script(
        "inst-1",
        vec![vec![text("a")], vec![text("b")]],
        vec![
            vec![text("a"), int(100 * MB), int(0)],
            vec![text("b"), int(200 * MB), int(0)],
        ],
    );

    let store = memory_store().await;
    let monitor = monitor_over(
        store.clone(),
        vec![instance("inst-1", EngineKind::MySql)],
        connector.clone(),
    );

    monitor.run_collection().await.unwrap();
    let today = Utc::now().date_naive();
    let rollups = store
        .active_instance_samples("inst-1", today, today)
        .await
        .unwrap();
    assert_eq!(rollups[0].total_size_mb, 300);
    assert_eq!(rollups[0].database_count, 2);

    // database b disappears from the instance before the re-run
    connector.script(
        "inst-1",
        vec![vec![text("a")]],
        vec![vec![text("a"), int(100 * MB), int(0)]],
    );
    monitor.run_collection().await.unwrap();

    let samples = store
        .active_database_samples("inst-1", today, today)
        .await
        .unwrap();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].database_name, "a");
    let rollups = store
        .active_instance_samples("inst-1", today, today)
        .await
        .unwrap();
    assert_eq!(rollups[0].total_size_mb, 100);
    assert_eq!(rollups[0].database_count, 1);
}
