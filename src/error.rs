// src/error.rs

use crate::types::InstanceId;

/// Result type used throughout the capmon library
pub type CapmonResult<T> = Result<T, CapmonError>;

/// All possible errors that can occur in the capmon library
#[derive(thiserror::Error, Debug)]
pub enum CapmonError {
    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Engine unreachable, credential rejected, or a required system view
    /// was unavailable. Fatal to that instance's collection step; never
    /// downgraded to "zero databases".
    #[error("Adapter error for instance {instance_id}: {message}")]
    Adapter {
        instance_id: InstanceId,
        message: String,
    },

    /// A concurrent upsert raced on the same natural key and the row-level
    /// retry did not resolve it
    #[error("Persistence conflict on {key}: {message}")]
    PersistenceConflict { key: String, message: String },

    /// Malformed or partial sample data for one entity; isolated per-entity
    #[error("Aggregation input error for '{entity}': {message}")]
    AggregationInput { entity: String, message: String },

    /// Failure creating or dropping a partition; fatal to that table's step
    /// but not to the sibling table's step
    #[error("Partition operation failed on table '{table}': {message}")]
    PartitionOperation { table: String, message: String },

    /// The instance work list could not be obtained at all
    #[error("Instance registry error: {message}")]
    Registry { message: String },

    /// Credential resolution failed for an instance
    #[error("Credential resolution failed for instance {instance_id}: {message}")]
    Credential {
        instance_id: InstanceId,
        message: String,
    },

    /// Storage-layer errors
    #[error("Database error: {source}")]
    Database {
        #[from]
        source: sqlx::Error,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    /// IO-related errors
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Generic error for unexpected situations
    #[error("Unexpected error: {message}")]
    Unexpected { message: String },
}

/// Helper methods for creating common errors
impl CapmonError {
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn adapter<I: Into<InstanceId>, S: Into<String>>(instance_id: I, message: S) -> Self {
        Self::Adapter {
            instance_id: instance_id.into(),
            message: message.into(),
        }
    }

    pub fn persistence_conflict<S: Into<String>>(key: S, message: S) -> Self {
        Self::PersistenceConflict {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn aggregation_input<S: Into<String>>(entity: S, message: S) -> Self {
        Self::AggregationInput {
            entity: entity.into(),
            message: message.into(),
        }
    }

    pub fn partition_operation<S: Into<String>>(table: S, message: S) -> Self {
        Self::PartitionOperation {
            table: table.into(),
            message: message.into(),
        }
    }

    pub fn registry<S: Into<String>>(message: S) -> Self {
        Self::Registry {
            message: message.into(),
        }
    }

    pub fn credential<I: Into<InstanceId>, S: Into<String>>(instance_id: I, message: S) -> Self {
        Self::Credential {
            instance_id: instance_id.into(),
            message: message.into(),
        }
    }

    pub fn unexpected<S: Into<String>>(message: S) -> Self {
        Self::Unexpected {
            message: message.into(),
        }
    }

    /// Whether this error came from a storage-level lock/busy conflict that
    /// is worth one row-level retry
    pub fn is_busy_conflict(&self) -> bool {
        match self {
            Self::Database { source } => source
                .as_database_error()
                .map(|e| {
                    let msg = e.message();
                    msg.contains("locked") || msg.contains("busy")
                })
                .unwrap_or(false),
            _ => false,
        }
    }
}
