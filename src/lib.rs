//! # Capmon - Database Fleet Capacity Monitoring
//!
//! Capmon is a storage-capacity monitoring library for heterogeneous database
//! fleets. It collects per-database size samples from MySQL, PostgreSQL,
//! SQL Server, and Oracle instances, persists them idempotently into
//! month-partitioned SQLite storage, and rolls them up into calendar-period
//! aggregates with period-over-period change tracking.
//!
//! ## Core Philosophy
//!
//! Capmon is designed to be **externally driven** and **fleet-agnostic**:
//! - **Generic by Design**: Any inventory source and secret store through trait implementations
//! - **Idempotent First**: Re-running any entry point converges to the same state
//! - **Failure Isolated**: One bad instance never blocks the rest of the fleet
//! - **No Scheduler**: Collection, aggregation, and maintenance run when *you* invoke them
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                            Capacity Monitor                                 │
//! ├─────────────────┬─────────────────┬─────────────────┬───────────────────────┤
//! │ Engine Adapters │  Sample Store   │   Aggregation   │  Partition Manager    │
//! │                 │                 │                 │                       │
//! │ • MySQL         │ • SQLite Backend│ • Daily/Weekly  │ • Monthly Partitions  │
//! │ • PostgreSQL    │ • Upsert Writes │ • Monthly/Qtrly │ • Future Pre-creation │
//! │ • SQL Server    │ • Soft Delete   │ • Change Deltas │ • Retention Drops     │
//! │ • Oracle        │ • Daily Rollups │ • Trend Labels  │ • Size Statistics     │
//! └─────────────────┴─────────────────┴─────────────────┴───────────────────────┘
//!                                        │
//!                              ┌─────────▼─────────┐
//!                              │   Your Callbacks  │
//!                              │                   │
//!                              │ • InstanceRegistry│
//!                              │ • CredentialResolver
//!                              │ • InstanceConnector
//!                              │ • CollectionObserver
//!                              └─────────┬─────────┘
//!                                        │
//!                     ┌──────────────────▼──────────────────┐
//!                     │           Your Fleet                │
//!                     │                                     │
//!                     │ MySQL • PostgreSQL • SQL Server     │
//!                     │ Oracle • CMDB • Secret Stores       │
//!                     └─────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use capmon::{
//!     CapacityMonitor, CapmonCallbacks, CapmonConfig, ConnectParams, EngineKind,
//!     EngineSession, InstanceConnector, InstanceRef, CapmonResult, PeriodType,
//!     SqlRow, StaticCredentials, StaticRegistry,
//! };
//! use std::sync::Arc;
//!
//! // Placeholder connector for the example
//! struct MyConnector;
//! #[async_trait::async_trait]
//! impl InstanceConnector for MyConnector {
//!     async fn connect(
//!         &self,
//!         _instance: &InstanceRef,
//!         _params: &ConnectParams,
//!     ) -> CapmonResult<Box<dyn EngineSession>> {
//!         unimplemented!("open a driver session for the instance's engine")
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> CapmonResult<()> {
//!     // 1. Describe the fleet and how to reach it
//!     let registry = Arc::new(StaticRegistry::new(vec![InstanceRef {
//!         id: "prod-mysql-01".to_string(),
//!         engine: EngineKind::MySql,
//!         host: "db01.example.internal".to_string(),
//!         port: 3306,
//!         credential_ref: "prod-mysql".to_string(),
//!         is_active: true,
//!     }]));
//!     let credentials = Arc::new(StaticCredentials::new().with(
//!         "prod-mysql",
//!         ConnectParams {
//!             host: "db01.example.internal".to_string(),
//!             port: 3306,
//!             username: "capmon".to_string(),
//!             password: "secret".to_string(),
//!             database: None,
//!         },
//!     ));
//!     let callbacks = CapmonCallbacks::new(registry, credentials, Arc::new(MyConnector));
//!
//!     // 2. Open the monitor over a local sample store
//!     let config = CapmonConfig::builder()
//!         .database_path("capmon.db")
//!         .retention_months(24)
//!         .build();
//!     let monitor = CapacityMonitor::new(config, callbacks).await?;
//!
//!     // 3. Drive the three entry points from your own scheduler
//!     let collection = monitor.run_collection().await?;
//!     println!("collected {}/{}", collection.processed_count, collection.total_count);
//!
//!     monitor.run_aggregation(PeriodType::Daily).await?;
//!     monitor.run_partition_maintenance().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Four engines, one shape**: adapters normalize every engine to whole-MB capacity records
//! - **Idempotent writes**: re-collection upserts in place, never duplicates
//! - **Soft-delete self-healing**: dropped databases are tombstoned and revive on reappearance
//! - **Calendar aggregation**: daily, ISO-week, monthly, and quarterly rollups with deltas
//! - **Partition lifecycle**: monthly partitions created ahead and dropped past retention
//! - **Observability**: structured tracing plus pluggable per-instance observers

pub mod adapters;
pub mod aggregation;
pub mod calendar;
pub mod callbacks;
pub mod error;
pub mod monitor;
pub mod partitions;
pub mod store;
pub mod types;
pub mod utils;

#[cfg(test)]
mod tests;

// Re-export common types for convenience
pub use types::{
    AggregateQuery, CapacityRecord, CapmonConfig, CapmonConfigBuilder, ConnectParams,
    DatabaseSizeAggregate, DatabaseSizeSample, EngineKind, EnsureOutcome, InstanceRef,
    InstanceSizeAggregate, InstanceSizeSample, InventoryRecord, PartitionEnsure, PartitionInfo,
    PartitionStatus, PeriodType, RunReport, SqlRow, SqlValue, TrendDirection,
};

pub use error::{CapmonError, CapmonResult};

pub use callbacks::{
    CapmonCallbacks, CollectionContext, CollectionObserver, CredentialResolver, EngineSession,
    InstanceConnector, InstanceRegistry,
};

pub use adapters::{adapter_for, EngineAdapter};

pub use aggregation::Aggregator;

pub use monitor::{CapacityMonitor, MonitorStatus};

pub use partitions::{partition_for_date, partition_name, PartitionManager};

pub use store::{SampleStore, StoreStatistics};

pub use utils::{StaticCredentials, StaticRegistry};
