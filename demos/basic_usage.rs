// demos/basic_usage.rs
//! Basic usage example showing core capmon functionality
//!
//! This example demonstrates:
//! - Describing a small fleet with the static registry and credentials
//! - Implementing an instance connector over simulated sessions
//! - Running the three entry points: collection, aggregation, maintenance
//! - Querying stored aggregates and partition statistics
//!
//! Run with: cargo run --example basic_usage

use capmon::{
    AggregateQuery, CapacityMonitor, CapmonCallbacks, CapmonConfig, CapmonError, CapmonResult,
    CollectionContext, CollectionObserver, ConnectParams, EngineKind, EngineSession,
    InstanceConnector, InstanceRef, PeriodType, SqlRow, SqlValue, StaticCredentials,
    StaticRegistry,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

const MB: i64 = 1_048_576;

/// Simulated engine session that answers the adapters' catalog queries
/// from fixed rows. In a real application this would wrap a driver
/// connection (mysql_async, tokio-postgres, tiberius, ...).
struct SimulatedSession {
    inventory: Vec<SqlRow>,
    capacity: Vec<SqlRow>,
}

#[async_trait]
impl EngineSession for SimulatedSession {
    async fn query_rows(&self, sql: &str) -> CapmonResult<Vec<SqlRow>> {
        let is_capacity = sql.contains("information_schema.tables")
            || sql.contains("pg_database_size")
            || sql.contains("master_files")
            || sql.contains("dba_data_files");
        if is_capacity {
            Ok(self.capacity.clone())
        } else {
            Ok(self.inventory.clone())
        }
    }
}

/// Connector that serves simulated sessions per instance id
struct SimulatedConnector {
    fleets: HashMap<String, (Vec<SqlRow>, Vec<SqlRow>)>,
}

#[async_trait]
impl InstanceConnector for SimulatedConnector {
    async fn connect(
        &self,
        instance: &InstanceRef,
        _params: &ConnectParams,
    ) -> CapmonResult<Box<dyn EngineSession>> {
        match self.fleets.get(&instance.id) {
            Some((inventory, capacity)) => Ok(Box::new(SimulatedSession {
                inventory: inventory.clone(),
                capacity: capacity.clone(),
            })),
            None => Err(CapmonError::adapter(
                instance.id.clone(),
                "simulated connection refused",
            )),
        }
    }
}

/// Simple observer that logs per-instance collection events
struct ConsoleObserver;

#[async_trait]
impl CollectionObserver for ConsoleObserver {
    async fn on_instance_collected(
        &self,
        instance: &InstanceRef,
        rows_written: u64,
        _context: &CollectionContext,
    ) -> CapmonResult<()> {
        println!("✅ COLLECTED: {} ({} rows)", instance.id, rows_written);
        Ok(())
    }

    async fn on_instance_failed(
        &self,
        instance: &InstanceRef,
        error: &CapmonError,
        _context: &CollectionContext,
    ) -> CapmonResult<()> {
        println!("❌ FAILED: {} - {}", instance.id, error);
        Ok(())
    }
}

fn text(s: &str) -> SqlValue {
    SqlValue::Text(s.to_string())
}

fn int(v: i64) -> SqlValue {
    SqlValue::Int(v)
}

fn instance(id: &str, engine: EngineKind, host: &str, port: u16) -> InstanceRef {
    InstanceRef {
        id: id.to_string(),
        engine,
        host: host.to_string(),
        port,
        credential_ref: "demo-fleet".to_string(),
        is_active: true,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // RUST_LOG=capmon=debug shows the library's own tracing output
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("🚨 Capmon Basic Usage Example");
    println!("==============================\n");

    // 1. Describe the fleet: two healthy instances and one that will fail
    let registry = Arc::new(StaticRegistry::new(vec![
        instance("prod-mysql-01", EngineKind::MySql, "db01.example.internal", 3306),
        instance("prod-pg-01", EngineKind::Postgres, "db02.example.internal", 5432),
        instance("prod-ora-01", EngineKind::Oracle, "db03.example.internal", 1521),
    ]));
    let credentials = Arc::new(StaticCredentials::new().with(
        "demo-fleet",
        ConnectParams {
            host: "unused-in-demo".to_string(),
            port: 0,
            username: "capmon".to_string(),
            password: "secret".to_string(),
            database: None,
        },
    ));

    // 2. Script what each instance reports (no Oracle entry, so it fails)
    let mut fleets = HashMap::new();
    fleets.insert(
        "prod-mysql-01".to_string(),
        (
            vec![vec![text("orders")], vec![text("billing")], vec![text("mysql")]],
            vec![
                vec![text("orders"), int(420 * MB), int(360 * MB)],
                vec![text("billing"), int(150 * MB), int(120 * MB)],
                vec![text("mysql"), int(6 * MB), int(6 * MB)],
            ],
        ),
    );
    fleets.insert(
        "prod-pg-01".to_string(),
        (
            vec![
                vec![text("analytics"), int(0)],
                vec![text("template1"), int(1)],
                vec![text("postgres"), int(0)],
            ],
            vec![
                vec![text("analytics"), int(910 * MB), int(0)],
                vec![text("postgres"), int(9 * MB), int(0)],
            ],
        ),
    );
    let connector = Arc::new(SimulatedConnector { fleets });

    let callbacks = CapmonCallbacks::new(registry, credentials, connector)
        .add_observer(Arc::new(ConsoleObserver));

    // 3. Open the monitor over an in-memory store (use a file path in
    //    production)
    let config = CapmonConfig::builder()
        .database_path(":memory:")
        .retention_months(24)
        .future_months(1)
        .build();
    let monitor = CapacityMonitor::new(config, callbacks).await?;

    // 4. Collection: one sample per database per instance per day
    println!("📊 Running collection...");
    let report = monitor.run_collection().await?;
    println!(
        "   processed {}/{} instances, {} sample rows, errors: {:?}\n",
        report.processed_count, report.total_count, report.record_count, report.errors
    );

    // 5. Aggregation: daily and weekly rollups for the current period
    println!("📈 Running aggregation...");
    for period in [PeriodType::Daily, PeriodType::Weekly] {
        let report = monitor.run_aggregation(period).await?;
        println!(
            "   {period}: {}/{} entities aggregated",
            report.processed_count, report.total_count
        );
    }
    println!();

    // 6. Maintenance: pre-create future partitions, sweep past retention
    println!("🔧 Running partition maintenance...");
    let report = monitor.run_partition_maintenance().await?;
    println!(
        "   {} steps, {} partitions changed\n",
        report.total_count, report.record_count
    );

    // 7. Query what was stored
    println!("🔍 Stored aggregates:");
    for aggregate in monitor
        .database_aggregates(&AggregateQuery::new("prod-mysql-01", PeriodType::Daily))
        .await?
    {
        println!(
            "   {} / {}: avg {} MB over {} samples ({:+} MB, {:+.1}%)",
            aggregate.instance_id,
            aggregate.database_name,
            aggregate.avg_size_mb,
            aggregate.data_count,
            aggregate.size_change_mb,
            aggregate.size_change_percent
        );
    }
    for aggregate in monitor
        .instance_aggregates(&AggregateQuery::new("prod-pg-01", PeriodType::Daily))
        .await?
    {
        println!(
            "   {} (instance): avg {} MB across {} databases, trend {}",
            aggregate.instance_id, aggregate.avg_size_mb, aggregate.database_count, aggregate.trend
        );
    }

    println!("\n🗂️  Partitions:");
    for partition in monitor.partition_statistics().await? {
        println!(
            "   {} [{:?}] {} rows, {} bytes",
            partition.name, partition.status, partition.row_count, partition.size_bytes
        );
    }

    let stats = monitor.store_statistics().await?;
    println!("\n📦 Store: {} database sample rows, {} instance sample rows, {} partitions",
        stats.database_sample_rows, stats.instance_sample_rows, stats.partition_count
    );

    let status = monitor.status().await;
    println!(
        "🧭 Monitor status: {} collection, {} aggregation, {} maintenance runs",
        status.collection_runs, status.aggregation_runs, status.maintenance_runs
    );

    println!("\n✨ Example completed!");
    println!("\nKey takeaways:");
    println!("• Entry points are externally triggered; there is no internal scheduler");
    println!("• Re-running collection the same day upserts in place");
    println!("• A failing instance is reported but never blocks the rest of the fleet");
    println!("• Aggregates carry period-over-period change fields and a trend label");

    Ok(())
}
