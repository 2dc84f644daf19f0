//! Backend registry: named storage backends and their per-node availability.
//!
//! Backend definitions arrive from the cluster configuration as JSON; the
//! registry holds the constructed instances and answers the resolution
//! queries the hard-drive factory needs (filter by node set and variant,
//! look up by name, enumerate the variants a node can use).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::backend::StorageBackend;
use crate::drbd::DrbdBackend;
use crate::error::{Result, StorageError};
use crate::lvm::LvmBackend;
use crate::system::CommandRunner;
use crate::types::StorageType;

/// Declarative backend definition, as persisted in cluster configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendDefinition {
    /// Unique backend name.
    pub name: String,
    /// Variant tag.
    pub storage_type: StorageType,
    /// Pool/group identifier (volume-group name).
    pub location: String,
    /// Whether the pool is usable for migratable disks.
    #[serde(default)]
    pub shared: bool,
    /// Nodes on which the backend is defined.
    #[serde(default)]
    pub nodes: Vec<String>,
    /// Per-node overrides for the pool identifier.
    #[serde(default)]
    pub node_locations: HashMap<String, String>,
}

/// Parse a JSON array of backend definitions.
pub fn load_definitions(json: &str) -> Result<Vec<BackendDefinition>> {
    serde_json::from_str(json).map_err(|e| {
        StorageError::InvalidStorageConfiguration(format!("Invalid backend definitions: {}", e))
    })
}

/// Registry of storage backends known to this node.
#[derive(Default)]
pub struct BackendRegistry {
    backends: RwLock<HashMap<String, Arc<dyn StorageBackend>>>,
}

impl BackendRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from declarative definitions.
    pub fn from_definitions(
        definitions: Vec<BackendDefinition>,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self> {
        let registry = Self::new();
        for def in definitions {
            let backend: Arc<dyn StorageBackend> = match def.storage_type {
                StorageType::Local => {
                    let mut backend =
                        LvmBackend::new(def.name.clone(), def.location, Arc::clone(&runner))
                            .with_shared(def.shared)
                            .with_nodes(def.nodes);
                    for (node, location) in def.node_locations {
                        backend = backend.with_node_location(node, location);
                    }
                    Arc::new(backend)
                }
                StorageType::Replicated => {
                    let mut backend = DrbdBackend::new(
                        def.name.clone(),
                        def.location,
                        def.nodes,
                        Arc::clone(&runner),
                    )?
                    .with_shared(def.shared);
                    for (node, location) in def.node_locations {
                        backend = backend.with_node_location(node, location);
                    }
                    Arc::new(backend)
                }
            };
            registry.register(backend)?;
        }
        Ok(registry)
    }

    /// Register a backend. Names must be unique.
    pub fn register(&self, backend: Arc<dyn StorageBackend>) -> Result<()> {
        let mut backends = self.backends.write().unwrap_or_else(|e| e.into_inner());
        let name = backend.name().to_string();
        if backends.contains_key(&name) {
            return Err(StorageError::InvalidStorageConfiguration(format!(
                "Storage backend {} is already registered",
                name
            )));
        }
        info!(backend = %name, storage_type = %backend.storage_type(), "Storage backend registered");
        backends.insert(name, backend);
        Ok(())
    }

    /// Register a backend after verifying its pool exists on this node.
    pub async fn register_validated(&self, backend: Arc<dyn StorageBackend>) -> Result<()> {
        backend.ensure_exists().await?;
        self.register(backend)
    }

    /// Look up a backend by name.
    pub fn get_by_name(&self, name: &str) -> Result<Arc<dyn StorageBackend>> {
        let backends = self.backends.read().unwrap_or_else(|e| e.into_inner());
        backends.get(name).cloned().ok_or_else(|| {
            StorageError::UnknownStorageBackend(format!("No storage backend named {}", name))
        })
    }

    /// Backends of the given variant available on every listed node.
    pub fn get_all(
        &self,
        nodes: &[String],
        storage_type: Option<StorageType>,
    ) -> Vec<Arc<dyn StorageBackend>> {
        let backends = self.backends.read().unwrap_or_else(|e| e.into_inner());
        let mut matches: Vec<Arc<dyn StorageBackend>> = backends
            .values()
            .filter(|b| storage_type.map_or(true, |ty| b.storage_type() == ty))
            .filter(|b| nodes.iter().all(|n| b.available_on_node(n)))
            .cloned()
            .collect();
        // Deterministic resolution order.
        matches.sort_by(|a, b| a.name().cmp(b.name()));
        matches
    }

    /// Storage-type variants usable on the given node, in variant order.
    pub fn available_types(&self, node: &str) -> Vec<StorageType> {
        let node = node.to_string();
        StorageType::ALL
            .into_iter()
            .filter(|ty| !self.get_all(std::slice::from_ref(&node), Some(*ty)).is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRunner;

    fn runner() -> Arc<MockRunner> {
        Arc::new(MockRunner::new())
    }

    fn local(name: &str, nodes: &[&str], runner: Arc<MockRunner>) -> Arc<dyn StorageBackend> {
        Arc::new(
            LvmBackend::new(name, format!("vg-{}", name), runner)
                .with_nodes(nodes.iter().map(|n| n.to_string()).collect()),
        )
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let registry = BackendRegistry::new();
        registry.register(local("pool", &["node1"], runner())).unwrap();
        let err = registry
            .register(local("pool", &["node1"], runner()))
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidStorageConfiguration(_)));
    }

    #[test]
    fn test_get_all_requires_every_node() {
        let registry = BackendRegistry::new();
        registry
            .register(local("both", &["node1", "node2"], runner()))
            .unwrap();
        registry.register(local("solo", &["node1"], runner())).unwrap();

        let both_nodes = vec!["node1".to_string(), "node2".to_string()];
        let found = registry.get_all(&both_nodes, Some(StorageType::Local));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name(), "both");

        let one_node = vec!["node1".to_string()];
        assert_eq!(registry.get_all(&one_node, Some(StorageType::Local)).len(), 2);
    }

    #[test]
    fn test_available_types_per_node() {
        let r = runner();
        let registry = BackendRegistry::new();
        registry.register(local("pool", &["node1"], Arc::clone(&r))).unwrap();
        registry
            .register(Arc::new(
                DrbdBackend::new(
                    "mirror",
                    "vg-mirror",
                    vec!["node1".to_string(), "node2".to_string()],
                    r,
                )
                .unwrap(),
            ))
            .unwrap();

        assert_eq!(
            registry.available_types("node1"),
            vec![StorageType::Local, StorageType::Replicated]
        );
        assert_eq!(registry.available_types("node2"), vec![StorageType::Replicated]);
        assert!(registry.available_types("node3").is_empty());
    }

    #[tokio::test]
    async fn test_register_validated_probes_the_pool() {
        let r = runner();
        r.push_success("  vg-pool\n");
        let registry = BackendRegistry::new();
        registry
            .register_validated(local("pool", &["node1"], Arc::clone(&r)))
            .await
            .unwrap();
        assert_eq!(r.calls()[0][0], "vgs");
        assert!(registry.get_by_name("pool").is_ok());
    }

    #[tokio::test]
    async fn test_register_validated_rejects_missing_pool() {
        let r = runner();
        r.push_failure("Volume group \"vg-ghost\" not found");
        let registry = BackendRegistry::new();

        let err = registry
            .register_validated(local("ghost", &["node1"], Arc::clone(&r)))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidStorageConfiguration(_)));
        assert!(registry.get_by_name("ghost").is_err());
    }

    #[test]
    fn test_definitions_round_trip_from_json() {
        let json = r#"[
            {
                "name": "ssd-pool",
                "storage_type": "local",
                "location": "vg-ssd",
                "shared": true,
                "nodes": ["node1", "node2"]
            },
            {
                "name": "mirror",
                "storage_type": "replicated",
                "location": "vg-mirror",
                "nodes": ["node1", "node2"]
            }
        ]"#;

        let defs = load_definitions(json).unwrap();
        assert_eq!(defs.len(), 2);

        let registry = BackendRegistry::from_definitions(defs, runner()).unwrap();
        let backend = registry.get_by_name("ssd-pool").unwrap();
        assert!(backend.shared());
        assert_eq!(backend.storage_type(), StorageType::Local);
        assert_eq!(
            registry.get_by_name("mirror").unwrap().storage_type(),
            StorageType::Replicated
        );
    }

    #[test]
    fn test_unknown_backend_lookup() {
        let registry = BackendRegistry::new();
        let err = registry.get_by_name("missing").err().unwrap();
        assert!(matches!(err, StorageError::UnknownStorageBackend(_)));
    }
}
