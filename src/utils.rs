// src/utils.rs

//! Ready-made callback implementations for fleets defined in code or
//! loaded from a static file. Production deployments usually implement
//! [`InstanceRegistry`]/[`CredentialResolver`] against a CMDB and a secret
//! store instead; these cover small fleets, demos, and tests.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::callbacks::{CredentialResolver, InstanceRegistry};
use crate::error::{CapmonError, CapmonResult};
use crate::types::{ConnectParams, InstanceRef};

/// In-memory instance registry backed by a fixed list
pub struct StaticRegistry {
    instances: Vec<InstanceRef>,
}

impl StaticRegistry {
    pub fn new(instances: Vec<InstanceRef>) -> Self {
        Self { instances }
    }
}

#[async_trait]
impl InstanceRegistry for StaticRegistry {
    async fn list_instances(&self) -> CapmonResult<Vec<InstanceRef>> {
        Ok(self.instances.clone())
    }
}

/// Credential resolver backed by a credential_ref -> parameters map
#[derive(Default)]
pub struct StaticCredentials {
    params: HashMap<String, ConnectParams>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register connect parameters under a credential reference
    pub fn with<S: Into<String>>(mut self, credential_ref: S, params: ConnectParams) -> Self {
        self.params.insert(credential_ref.into(), params);
        self
    }
}

#[async_trait]
impl CredentialResolver for StaticCredentials {
    async fn resolve(&self, instance: &InstanceRef) -> CapmonResult<ConnectParams> {
        self.params
            .get(&instance.credential_ref)
            .cloned()
            .ok_or_else(|| {
                CapmonError::credential(
                    instance.id.clone(),
                    format!("no parameters registered for '{}'", instance.credential_ref),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EngineKind;

    fn instance(id: &str, credential_ref: &str) -> InstanceRef {
        InstanceRef {
            id: id.to_string(),
            engine: EngineKind::MySql,
            host: "db.example.internal".to_string(),
            port: 3306,
            credential_ref: credential_ref.to_string(),
            is_active: true,
        }
    }

    #[tokio::test]
    async fn static_registry_returns_the_configured_fleet() {
        let registry = StaticRegistry::new(vec![instance("a", "cred-a"), instance("b", "cred-b")]);
        let instances = registry.list_instances().await.unwrap();
        assert_eq!(instances.len(), 2);
        assert_eq!(instances[0].id, "a");
    }

    #[tokio::test]
    async fn unknown_credential_ref_is_a_credential_error() {
        let resolver = StaticCredentials::new().with(
            "cred-a",
            ConnectParams {
                host: "db.example.internal".to_string(),
                port: 3306,
                username: "capmon".to_string(),
                password: "secret".to_string(),
                database: None,
            },
        );

        assert!(resolver.resolve(&instance("a", "cred-a")).await.is_ok());
        let missing = resolver.resolve(&instance("b", "cred-b")).await;
        assert!(matches!(missing, Err(CapmonError::Credential { .. })));
    }
}
