// src/types.rs

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a monitored instance (e.g., "prod-mysql-03")
pub type InstanceId = String;

/// The supported database engine families.
///
/// This is a closed set: adapters are selected by `match` at construction
/// time, not discovered at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EngineKind {
    MySql,
    Postgres,
    SqlServer,
    Oracle,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::MySql => "mysql",
            EngineKind::Postgres => "postgres",
            EngineKind::SqlServer => "sqlserver",
            EngineKind::Oracle => "oracle",
        }
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeriodType {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
}

impl PeriodType {
    /// Stable lowercase encoding used in storage and reports
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodType::Daily => "daily",
            PeriodType::Weekly => "weekly",
            PeriodType::Monthly => "monthly",
            PeriodType::Quarterly => "quarterly",
        }
    }

    /// Inverse of [`as_str`](Self::as_str), for decoding stored rows
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "daily" => Some(PeriodType::Daily),
            "weekly" => Some(PeriodType::Weekly),
            "monthly" => Some(PeriodType::Monthly),
            "quarterly" => Some(PeriodType::Quarterly),
            _ => None,
        }
    }
}

impl std::fmt::Display for PeriodType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Qualitative growth indicator on instance-level aggregates
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum TrendDirection {
    /// Size is increasing versus the previous period
    Increasing,
    /// Size is decreasing versus the previous period
    Decreasing,
    /// No change versus the previous period
    Stable,
    /// No previous period to compare against
    Unknown,
}

impl TrendDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendDirection::Increasing => "increasing",
            TrendDirection::Decreasing => "decreasing",
            TrendDirection::Stable => "stable",
            TrendDirection::Unknown => "unknown",
        }
    }

    /// Inverse of [`as_str`](Self::as_str), for decoding stored rows
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "increasing" => Some(TrendDirection::Increasing),
            "decreasing" => Some(TrendDirection::Decreasing),
            "stable" => Some(TrendDirection::Stable),
            "unknown" => Some(TrendDirection::Unknown),
            _ => None,
        }
    }
}

impl std::fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single column value returned by an engine session.
///
/// Booleans surface as `Int` 0/1; numeric aggregates may arrive as either
/// `Int` or `Float` depending on the engine's driver.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    Int(i64),
    Float(f64),
    Null,
}

impl SqlValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view of the value; floats are truncated toward zero and
    /// numeric text is parsed
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Int(i) => Some(*i),
            SqlValue::Float(f) => Some(*f as i64),
            SqlValue::Text(s) => s
                .parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64)),
            SqlValue::Null => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

/// One row returned by an engine session, columns in query order
pub type SqlRow = Vec<SqlValue>;

/// One database/schema/tablespace visible to the configured credential
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryRecord {
    /// Engine-native name of the database
    pub name: String,
    /// Whether the engine reserves this database for itself. Flagged here,
    /// never excluded; exclusion is caller policy.
    pub is_system: bool,
}

/// One normalized size measurement for one database on one calendar day.
///
/// All four adapters emit exactly this shape with sizes already in whole MB.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityRecord {
    /// Engine-native name of the database
    pub name: String,
    /// Total allocated size in whole MB
    pub size_mb: i64,
    /// Data-file portion in whole MB, when the engine reports it separately
    pub data_size_mb: Option<i64>,
    /// Log-file portion in whole MB, when the engine reports it separately
    pub log_size_mb: Option<i64>,
    /// Calendar day this measurement accounts for
    pub collected_date: NaiveDate,
    /// Exact moment the measurement was taken
    pub collected_at: DateTime<Utc>,
    /// Engine-reserved database flag, mirrored from the inventory
    pub is_system: bool,
}

/// Read-only registry record for an instance to process (consumed contract)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceRef {
    pub id: InstanceId,
    pub engine: EngineKind,
    pub host: String,
    pub port: u16,
    /// Opaque reference handed to the credential resolver
    pub credential_ref: String,
    pub is_active: bool,
}

/// Connect parameters resolved for one instance (consumed contract)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Initial database/service to connect to, when the engine needs one
    pub database: Option<String>,
}

/// Raw per-database daily size sample as stored.
///
/// Natural key: (instance_id, database_name, collected_date). At most one
/// non-deleted row per key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSizeSample {
    pub instance_id: InstanceId,
    pub database_name: String,
    pub size_mb: i64,
    pub data_size_mb: Option<i64>,
    pub log_size_mb: Option<i64>,
    pub collected_date: NaiveDate,
    pub collected_at: DateTime<Utc>,
    /// Set when a later inventory scan stops reporting this database
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Per-instance daily rollup, derived by summing currently-active database
/// samples for that instance and date.
///
/// Natural key: (instance_id, collected_date), scoped to `is_deleted = 0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSizeSample {
    pub instance_id: InstanceId,
    pub total_size_mb: i64,
    pub database_count: i64,
    pub collected_date: NaiveDate,
    pub collected_at: DateTime<Utc>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Statistical rollup of one database's samples over one calendar period.
///
/// Natural key: (instance_id, database_name, period_type, period_start).
/// Recomputed idempotently; never finalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSizeAggregate {
    pub instance_id: InstanceId,
    pub database_name: String,
    pub period_type: PeriodType,
    pub period_start: NaiveDate,
    /// Calendar-correct last day of the granule
    pub period_end: NaiveDate,
    /// Mean size over the period, rounded to whole MB
    pub avg_size_mb: i64,
    pub max_size_mb: i64,
    pub min_size_mb: i64,
    /// Number of samples that fed this aggregate
    pub data_count: i64,
    pub avg_data_size_mb: Option<i64>,
    pub max_data_size_mb: Option<i64>,
    pub min_data_size_mb: Option<i64>,
    /// Delta of avg_size_mb versus the immediately preceding period; exactly
    /// 0 when no prior period exists
    pub size_change_mb: i64,
    pub size_change_percent: f64,
    /// Alias of size_change_percent; single source of truth
    pub growth_rate: f64,
}

/// Instance-level aggregate analogue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSizeAggregate {
    pub instance_id: InstanceId,
    pub period_type: PeriodType,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub avg_size_mb: i64,
    pub max_size_mb: i64,
    pub min_size_mb: i64,
    pub data_count: i64,
    /// Database head count from the latest sample in the period
    pub database_count: i64,
    /// Delta versus the previous period's head count
    pub database_count_change: i64,
    pub size_change_mb: i64,
    pub size_change_percent: f64,
    pub growth_rate: f64,
    pub trend: TrendDirection,
}

/// Lifecycle state of a monthly partition relative to today
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionStatus {
    Past,
    Current,
    Future,
}

/// Derived view of one monthly partition of a managed table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionInfo {
    /// Base table this partition belongs to
    pub table: String,
    /// Deterministic partition name, e.g. "database_size_samples_p202506"
    pub name: String,
    pub year: i32,
    pub month: u32,
    pub row_count: i64,
    /// On-disk bytes when the SQLite build exposes dbstat, otherwise 0
    pub size_bytes: i64,
    pub status: PartitionStatus,
}

/// Outcome of ensuring one managed table's partition for one month
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnsureOutcome {
    /// The partition was created by this call
    Created,
    /// The partition already existed; success, not an error
    Exists,
}

/// Per-table result of a partition ensure step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionEnsure {
    pub table: String,
    pub partition: String,
    pub outcome: EnsureOutcome,
}

/// Result object returned by every entry point invocation.
///
/// Callers always see processed-vs-total counts plus the explicit error
/// list; a partial result is never disguised as full success.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    pub success: bool,
    /// Units (instances, entities, or partition steps) that completed
    pub processed_count: usize,
    /// Units the invocation attempted
    pub total_count: usize,
    /// Rows written across all units
    pub record_count: u64,
    pub errors: Vec<String>,
}

impl RunReport {
    pub fn new(total_count: usize) -> Self {
        Self {
            total_count,
            ..Default::default()
        }
    }

    /// Record a per-unit failure without aborting the invocation
    pub fn push_error(&mut self, error: impl std::fmt::Display) {
        self.errors.push(error.to_string());
    }

    /// Settle the success flag once every unit has been attempted
    pub fn finish(mut self) -> Self {
        self.success = self.errors.is_empty() && self.processed_count == self.total_count;
        self
    }
}

/// Query parameters for reading stored aggregates
#[derive(Debug, Clone)]
pub struct AggregateQuery {
    pub instance_id: InstanceId,
    pub period_type: PeriodType,
    /// Restrict to one database (database-level reads only)
    pub database_name: Option<String>,
    /// Earliest period_start to include
    pub from: Option<NaiveDate>,
    /// Latest period_start to include
    pub to: Option<NaiveDate>,
    /// Maximum number of rows to return
    pub limit: Option<u64>,
}

impl AggregateQuery {
    pub fn new<I: Into<InstanceId>>(instance_id: I, period_type: PeriodType) -> Self {
        Self {
            instance_id: instance_id.into(),
            period_type,
            database_name: None,
            from: None,
            to: None,
            limit: None,
        }
    }

    pub fn database<S: Into<String>>(mut self, name: S) -> Self {
        self.database_name = Some(name.into());
        self
    }

    pub fn between(mut self, from: NaiveDate, to: NaiveDate) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Main configuration for the capmon library
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapmonConfig {
    /// Path to the SQLite database file holding samples and aggregates
    pub database_path: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Months a partition is kept before retention drops it
    pub retention_months: u32,
    /// Months ahead of the current month to pre-create partitions for
    pub future_months: u32,
    /// Whether engine-reserved databases are persisted during collection.
    /// Adapters always report them; this is the caller-side policy.
    pub include_system: bool,
}

impl Default for CapmonConfig {
    fn default() -> Self {
        Self {
            database_path: "./capmon.db".to_string(),
            max_connections: 10,
            retention_months: 24,
            future_months: 1,
            include_system: false,
        }
    }
}

impl CapmonConfig {
    pub fn builder() -> CapmonConfigBuilder {
        CapmonConfigBuilder::default()
    }
}

/// Builder for CapmonConfig
#[derive(Default)]
pub struct CapmonConfigBuilder {
    database_path: Option<String>,
    max_connections: Option<u32>,
    retention_months: Option<u32>,
    future_months: Option<u32>,
    include_system: Option<bool>,
}

impl CapmonConfigBuilder {
    /// Set the database path
    pub fn database_path<S: Into<String>>(mut self, path: S) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Set maximum database connections
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = Some(max);
        self
    }

    /// Set partition retention in months
    pub fn retention_months(mut self, months: u32) -> Self {
        self.retention_months = Some(months);
        self
    }

    /// Set how many months ahead to pre-create partitions
    pub fn future_months(mut self, months: u32) -> Self {
        self.future_months = Some(months);
        self
    }

    /// Persist engine-reserved databases during collection
    pub fn include_system(mut self, include: bool) -> Self {
        self.include_system = Some(include);
        self
    }

    /// Build the configuration
    pub fn build(self) -> CapmonConfig {
        let default = CapmonConfig::default();
        CapmonConfig {
            database_path: self.database_path.unwrap_or(default.database_path),
            max_connections: self.max_connections.unwrap_or(default.max_connections),
            retention_months: self.retention_months.unwrap_or(default.retention_months),
            future_months: self.future_months.unwrap_or(default.future_months),
            include_system: self.include_system.unwrap_or(default.include_system),
        }
    }
}
