//! Cluster collaborator interfaces: remote validation fan-out and the
//! object-identity table.
//!
//! The RPC transport itself is an external collaborator. This crate hands it
//! a data-carrying [`ValidationTask`] per broadcast instead of a captured
//! closure, and resolves possibly-remote references through an explicit
//! identity table.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{Result, StorageError};
use crate::harddrive::HardDrive;
use crate::types::StorageType;
use crate::vm::VirtualMachine;

/// Parameters of one cross-node validation broadcast.
///
/// Each addressed node resolves `backend_name` against its own registry and
/// re-runs the full validation locally; no backend state is copied from the
/// coordinator.
#[derive(Debug, Clone)]
pub struct ValidationTask {
    /// Requested disk size in megabytes.
    pub size_mb: u64,
    /// Resolved storage type.
    pub storage_type: StorageType,
    /// Full target node set of the operation.
    pub nodes: Vec<String>,
    /// Name of the backend chosen on the coordinator.
    pub backend_name: String,
}

/// Cluster membership and remote-command fan-out.
#[async_trait]
pub trait Cluster: Send + Sync {
    /// Name of the node handling the current request.
    fn local_hostname(&self) -> String;

    /// Whether this node orchestrates multi-node operations.
    fn is_coordinator(&self) -> bool;

    /// Run the validation task against each listed remote node.
    ///
    /// Barrier-like: returns only once every node has answered, and the
    /// first remote failure surfaces as this call's error.
    async fn validate_on_nodes(&self, nodes: &[String], task: ValidationTask) -> Result<()>;
}

/// Single-node cluster: no peers, always the coordinator.
#[derive(Debug, Clone)]
pub struct LocalCluster {
    hostname: String,
}

impl LocalCluster {
    /// Create a single-node cluster with an explicit hostname.
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
        }
    }

    /// Create a single-node cluster named after the local host.
    pub fn for_local_host() -> Result<Self> {
        let hostname = hostname::get().map_err(|e| {
            StorageError::InvalidStorageConfiguration(format!("Cannot resolve hostname: {}", e))
        })?;
        Ok(Self::new(hostname.to_string_lossy().to_string()))
    }
}

#[async_trait]
impl Cluster for LocalCluster {
    fn local_hostname(&self) -> String {
        self.hostname.clone()
    }

    fn is_coordinator(&self) -> bool {
        true
    }

    async fn validate_on_nodes(&self, nodes: &[String], _task: ValidationTask) -> Result<()> {
        if nodes.is_empty() {
            return Ok(());
        }
        Err(StorageError::InvalidStorageConfiguration(format!(
            "Single-node cluster cannot reach remote nodes: {}",
            nodes.join(", ")
        )))
    }
}

/// Identity table making constructed domain objects remotely addressable and
/// unifying possibly-remote references with local instances.
pub trait ObjectRegistry: Send + Sync {
    /// Register a newly constructed hard-drive object under its stable id.
    fn register_hard_drive(&self, id: Uuid, drive: Arc<dyn HardDrive>);

    /// Register a VM instance under its name.
    fn register_vm(&self, vm: Arc<dyn VirtualMachine>);

    /// Resolve a possibly-remote VM reference: the registered local instance
    /// when one exists, the reference unchanged otherwise.
    fn resolve_vm(&self, vm: Arc<dyn VirtualMachine>) -> Arc<dyn VirtualMachine>;
}

/// In-process object registry backed by hash maps.
#[derive(Default)]
pub struct InMemoryObjectRegistry {
    drives: RwLock<HashMap<Uuid, Arc<dyn HardDrive>>>,
    vms: RwLock<HashMap<String, Arc<dyn VirtualMachine>>>,
}

impl InMemoryObjectRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a registered hard-drive object by id.
    pub fn hard_drive(&self, id: Uuid) -> Option<Arc<dyn HardDrive>> {
        self.drives
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }

    /// Number of registered hard-drive objects.
    pub fn hard_drive_count(&self) -> usize {
        self.drives.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl ObjectRegistry for InMemoryObjectRegistry {
    fn register_hard_drive(&self, id: Uuid, drive: Arc<dyn HardDrive>) {
        self.drives
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, drive);
    }

    fn register_vm(&self, vm: Arc<dyn VirtualMachine>) {
        self.vms
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(vm.name(), vm);
    }

    fn resolve_vm(&self, vm: Arc<dyn VirtualMachine>) -> Arc<dyn VirtualMachine> {
        let vms = self.vms.read().unwrap_or_else(|e| e.into_inner());
        vms.get(&vm.name()).cloned().unwrap_or(vm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockVm;

    #[tokio::test]
    async fn test_local_cluster_has_no_peers() {
        let cluster = LocalCluster::new("node1");
        assert!(cluster.is_coordinator());

        let task = ValidationTask {
            size_mb: 100,
            storage_type: StorageType::Local,
            nodes: vec!["node1".to_string()],
            backend_name: "pool".to_string(),
        };
        cluster.validate_on_nodes(&[], task.clone()).await.unwrap();

        let err = cluster
            .validate_on_nodes(&["node2".to_string()], task)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidStorageConfiguration(_)));
    }

    #[test]
    fn test_resolve_vm_prefers_registered_instance() {
        let registry = InMemoryObjectRegistry::new();
        let registered: Arc<dyn VirtualMachine> = Arc::new(MockVm::new("web"));
        registry.register_vm(Arc::clone(&registered));

        let remote: Arc<dyn VirtualMachine> = Arc::new(MockVm::new("web"));
        let resolved = registry.resolve_vm(remote);
        assert!(Arc::ptr_eq(&resolved, &registered));

        let unknown: Arc<dyn VirtualMachine> = Arc::new(MockVm::new("db"));
        let resolved = registry.resolve_vm(Arc::clone(&unknown));
        assert!(Arc::ptr_eq(&resolved, &unknown));
    }
}
