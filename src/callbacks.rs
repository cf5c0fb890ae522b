// src/callbacks.rs

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::error::{CapmonError, CapmonResult};
use crate::types::{ConnectParams, InstanceRef, SqlRow};

/// Context provided to observer callbacks
#[derive(Debug, Clone)]
pub struct CollectionContext {
    /// Calendar day the invocation is accounting for
    pub collected_date: NaiveDate,
    /// When the invocation started
    pub started_at: DateTime<Utc>,
}

/// Trait for supplying the instance work list
///
/// Implement this against your fleet inventory (CMDB, config service,
/// static file). The registry is read-only from capmon's point of view.
#[async_trait]
pub trait InstanceRegistry: Send + Sync {
    /// Return every registered instance, active or not.
    ///
    /// # Returns
    /// * `Ok(instances)` - The full registry view
    /// * `Err(error)` - The work list could not be obtained; this aborts the
    ///   whole invocation
    async fn list_instances(&self) -> CapmonResult<Vec<InstanceRef>>;
}

/// Trait for resolving connect parameters for an instance
///
/// Implement this against your secret store. capmon never persists the
/// resolved parameters.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    /// Resolve connect parameters for the given instance's credential_ref
    async fn resolve(&self, instance: &InstanceRef) -> CapmonResult<ConnectParams>;
}

/// A short-lived exclusive session against one engine.
///
/// Sessions follow connect → query → disconnect within a single instance's
/// collection step; they are never held across instances. Dropping the
/// session disconnects.
#[async_trait]
pub trait EngineSession: Send + Sync {
    /// Execute one engine-native query and return all rows, columns in
    /// query order.
    ///
    /// # Returns
    /// * `Ok(rows)` - The query ran; zero rows is a valid answer
    /// * `Err(error)` - Connectivity/permission failure; never mapped to an
    ///   empty success
    async fn query_rows(&self, sql: &str) -> CapmonResult<Vec<SqlRow>>;
}

/// Trait for opening engine sessions
///
/// This is where driver-level connectivity lives; capmon itself stays
/// engine-agnostic above this seam.
#[async_trait]
pub trait InstanceConnector: Send + Sync {
    /// Open a session for the given instance with resolved parameters
    async fn connect(
        &self,
        instance: &InstanceRef,
        params: &ConnectParams,
    ) -> CapmonResult<Box<dyn EngineSession>>;
}

/// Trait for receiving collection events
///
/// Implement this to get notified about per-instance outcomes. Useful for
/// logging, dashboards, or custom bookkeeping.
#[async_trait]
pub trait CollectionObserver: Send + Sync {
    /// Called after an instance's samples were persisted
    async fn on_instance_collected(
        &self,
        _instance: &InstanceRef,
        _record_count: u64,
        _context: &CollectionContext,
    ) -> CapmonResult<()> {
        // Default implementation: do nothing
        Ok(())
    }

    /// Called when an instance's collection step failed
    async fn on_instance_failed(
        &self,
        _instance: &InstanceRef,
        _error: &CapmonError,
        _context: &CollectionContext,
    ) -> CapmonResult<()> {
        // Default implementation: do nothing
        Ok(())
    }
}

/// Combine all callbacks into a single struct for easier management
#[derive(Clone)]
pub struct CapmonCallbacks {
    pub registry: std::sync::Arc<dyn InstanceRegistry>,
    pub credentials: std::sync::Arc<dyn CredentialResolver>,
    pub connector: std::sync::Arc<dyn InstanceConnector>,
    pub observers: Vec<std::sync::Arc<dyn CollectionObserver>>,
}

impl CapmonCallbacks {
    /// Create a new callback configuration
    pub fn new(
        registry: std::sync::Arc<dyn InstanceRegistry>,
        credentials: std::sync::Arc<dyn CredentialResolver>,
        connector: std::sync::Arc<dyn InstanceConnector>,
    ) -> Self {
        Self {
            registry,
            credentials,
            connector,
            observers: Vec::new(),
        }
    }

    /// Add an observer to receive collection events
    pub fn add_observer(mut self, observer: std::sync::Arc<dyn CollectionObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Add multiple observers at once
    pub fn add_observers(mut self, observers: Vec<std::sync::Arc<dyn CollectionObserver>>) -> Self {
        self.observers.extend(observers);
        self
    }
}
