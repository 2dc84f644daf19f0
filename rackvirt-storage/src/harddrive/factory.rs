//! Hard-drive factory: storage-type and backend resolution, cross-node
//! validation, and the object-identity cache.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, instrument};

use crate::auth::{Authorizer, Permission};
use crate::backend::StorageBackend;
use crate::cluster::{Cluster, ObjectRegistry, ValidationTask};
use crate::error::{Result, StorageError};
use crate::registry::BackendRegistry;
use crate::types::{DiskDriver, StorageType};
use crate::vm::VirtualMachine;

use super::{HardDrive, LocalHardDrive, ReplicatedHardDrive, MAXIMUM_DEVICES};

/// Optional per-lookup configuration for [`HardDriveFactory::get_object`].
///
/// Any override besides `storage_type` disables caching for that lookup: the
/// object is still constructed and registered, but not memoized, and a stale
/// cached entry under the same key is evicted first.
#[derive(Default, Clone)]
pub struct ObjectOverrides {
    /// Explicit storage type, taking precedence over the VM configuration.
    pub storage_type: Option<StorageType>,
    /// Explicit guest disk driver.
    pub driver: Option<DiskDriver>,
    /// Explicit backend instance.
    pub backend: Option<Arc<dyn StorageBackend>>,
}

impl ObjectOverrides {
    /// No overrides; cache-enabled lookup.
    pub fn none() -> Self {
        Self::default()
    }

    fn disables_cache(&self) -> bool {
        self.driver.is_some() || self.backend.is_some()
    }
}

/// The triple uniquely identifying a cached hard-drive object.
type CacheKey = (String, u8, String);

/// Factory for hard-drive objects.
///
/// Owns the identity cache guaranteeing at-most-one in-process representative
/// per (VM, disk, storage type), and drives the validate-then-provision
/// protocol across the cluster.
pub struct HardDriveFactory {
    registry: Arc<BackendRegistry>,
    cluster: Arc<dyn Cluster>,
    objects: Arc<dyn ObjectRegistry>,
    auth: Arc<dyn Authorizer>,
    cache: RwLock<HashMap<CacheKey, Arc<dyn HardDrive>>>,
}

impl HardDriveFactory {
    /// Create a factory over the given collaborators.
    pub fn new(
        registry: Arc<BackendRegistry>,
        cluster: Arc<dyn Cluster>,
        objects: Arc<dyn ObjectRegistry>,
        auth: Arc<dyn Authorizer>,
    ) -> Self {
        Self {
            registry,
            cluster,
            objects,
            auth,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Storage-type variants usable on this node.
    pub fn available_storage_types(&self) -> Vec<StorageType> {
        self.registry
            .available_types(&self.cluster.local_hostname())
    }

    /// Resolve the storage type for a request.
    ///
    /// The explicit argument wins, then the VM's persisted value; with
    /// neither, the sole available variant is chosen automatically. Zero or
    /// multiple available variants without an explicit choice is an
    /// ambiguity error, and a resolved type must be available on this node.
    pub fn resolve_storage_type(
        &self,
        explicit: Option<StorageType>,
        vm_config: Option<StorageType>,
    ) -> Result<StorageType> {
        let available = self.available_storage_types();

        if let Some(ty) = explicit.or(vm_config) {
            if !available.contains(&ty) {
                return Err(StorageError::UnknownStorageType(format!(
                    "{} is not supported by node {}",
                    ty,
                    self.cluster.local_hostname()
                )));
            }
            return Ok(ty);
        }

        match available.as_slice() {
            [sole] => Ok(*sole),
            [] => Err(StorageError::UnknownStorageType(
                "There are no storage types available".to_string(),
            )),
            _ => Err(StorageError::UnknownStorageType(
                "Storage type must be specified".to_string(),
            )),
        }
    }

    /// Resolve the backend for a request.
    ///
    /// A supplied backend must be available on this node; otherwise exactly
    /// one registered backend must match the storage type and node set.
    fn resolve_backend(
        &self,
        storage_type: StorageType,
        nodes: &[String],
        explicit: Option<Arc<dyn StorageBackend>>,
    ) -> Result<Arc<dyn StorageBackend>> {
        if let Some(backend) = explicit {
            let local = self.cluster.local_hostname();
            if !backend.available_on_node(&local) {
                return Err(StorageError::StorageBackendNotAvailableOnNode {
                    backend: backend.name().to_string(),
                    node: local,
                });
            }
            return Ok(backend);
        }

        let mut candidates = self.registry.get_all(nodes, Some(storage_type));
        match candidates.len() {
            1 => Ok(candidates.remove(0)),
            0 => Err(StorageError::UnknownStorageBackend(
                "There are no available storage backends".to_string(),
            )),
            _ => Err(StorageError::UnknownStorageBackend(
                "Storage backend must be specified".to_string(),
            )),
        }
    }

    /// Validate that a disk of `size_mb` can be created on every target node.
    ///
    /// Runs the full resolution and capacity checks locally. When this node
    /// is the cluster coordinator, the identical validation then fans out to
    /// every other target node, each resolving its own backend by name.
    /// All-or-nothing: the first failure anywhere aborts the validation
    /// phase and nothing is provisioned.
    #[instrument(skip(self, backend), fields(size_mb, storage_type = ?storage_type))]
    pub async fn ensure_hdd_valid(
        &self,
        size_mb: u64,
        storage_type: Option<StorageType>,
        nodes: &[String],
        backend: Option<Arc<dyn StorageBackend>>,
    ) -> Result<(StorageType, Arc<dyn StorageBackend>)> {
        let resolved_type = self.resolve_storage_type(storage_type, None)?;
        let backend = self.resolve_backend(resolved_type, nodes, backend)?;

        let free = backend.free_space().await?;
        if free < size_mb {
            return Err(StorageError::InsufficientSpace {
                requested_mb: size_mb,
                available_mb: free,
                node: self.cluster.local_hostname(),
            });
        }

        if self.cluster.is_coordinator() {
            let local = self.cluster.local_hostname();
            let remote: Vec<String> = nodes.iter().filter(|n| **n != local).cloned().collect();
            if !remote.is_empty() {
                let task = ValidationTask {
                    size_mb,
                    storage_type: resolved_type,
                    nodes: nodes.to_vec(),
                    backend_name: backend.name().to_string(),
                };
                self.cluster.validate_on_nodes(&remote, task).await?;
            }
        }

        Ok((resolved_type, backend))
    }

    /// Return the hard-drive object for a VM disk, constructing and caching
    /// it on first lookup.
    ///
    /// Cache key is (VM name, disk id, storage type). Cache hits return the
    /// identical instance. Every newly constructed object is registered with
    /// the object registry, cached or not.
    pub async fn get_object(
        &self,
        vm: Arc<dyn VirtualMachine>,
        disk_id: u8,
        overrides: ObjectOverrides,
    ) -> Result<Arc<dyn HardDrive>> {
        let vm = self.objects.resolve_vm(vm);
        let storage_type = self.resolve_storage_type(overrides.storage_type, vm.storage_type())?;

        let key: CacheKey = (vm.name(), disk_id, storage_type.to_string());
        let disable_cache = overrides.disables_cache();

        let mut cache = self.cache.write().await;
        if disable_cache {
            // Force the next cache-enabled lookup to reconstruct.
            cache.remove(&key);
        } else if let Some(hit) = cache.get(&key) {
            return Ok(Arc::clone(hit));
        }

        let backend =
            self.resolve_backend(storage_type, &vm.available_nodes(), overrides.backend)?;
        let driver = overrides.driver.unwrap_or_default();
        let drive = self.construct(storage_type, vm, disk_id, driver, backend);

        if !disable_cache {
            cache.insert(key, Arc::clone(&drive));
        }
        Ok(drive)
    }

    /// Create a new hard drive for a VM.
    ///
    /// Validates across all target nodes first; provisioning itself is then
    /// performed locally against the validated choice. A matching creation
    /// on sibling nodes is not fanned out here, so a later remote failure
    /// can leave cross-node state needing out-of-band reconciliation.
    #[instrument(skip(self, vm, backend), fields(size_mb, driver = ?driver))]
    pub async fn create(
        &self,
        vm: Arc<dyn VirtualMachine>,
        size_mb: u64,
        storage_type: Option<StorageType>,
        driver: DiskDriver,
        backend: Option<Arc<dyn StorageBackend>>,
    ) -> Result<Arc<dyn HardDrive>> {
        let vm = self.objects.resolve_vm(vm);
        self.auth
            .assert_permission(Permission::ModifyVm, vm.as_ref())?;

        let nodes = vm.available_nodes();
        let requested = storage_type.or(vm.storage_type());
        let (resolved_type, backend) = self
            .ensure_hdd_valid(size_mb, requested, &nodes, backend)
            .await?;

        // A VM's disks must all share one storage type.
        if let Some(existing) = vm.storage_type() {
            if existing != resolved_type {
                return Err(StorageError::UnknownStorageType(
                    "Storage type does not match the VM's current storage type".to_string(),
                ));
            }
        }

        let used = vm.attached_disk_ids();
        let disk_id = (1..=MAXIMUM_DEVICES)
            .find(|id| !used.contains(id))
            .ok_or_else(|| {
                StorageError::InvalidStorageConfiguration(format!(
                    "VM {} already has the maximum of {} disks",
                    vm.name(),
                    MAXIMUM_DEVICES
                ))
            })?;

        let drive = self.construct(resolved_type, vm, disk_id, driver, backend);
        drive.create(size_mb).await?;

        info!(disk_id, storage_type = %resolved_type, "Hard drive created");
        Ok(drive)
    }

    fn construct(
        &self,
        storage_type: StorageType,
        vm: Arc<dyn VirtualMachine>,
        disk_id: u8,
        driver: DiskDriver,
        backend: Arc<dyn StorageBackend>,
    ) -> Arc<dyn HardDrive> {
        let drive: Arc<dyn HardDrive> = match storage_type {
            StorageType::Local => Arc::new(LocalHardDrive::new(
                vm,
                disk_id,
                driver,
                backend,
                Arc::clone(&self.auth),
                Arc::clone(&self.objects),
            )),
            StorageType::Replicated => Arc::new(ReplicatedHardDrive::new(
                vm,
                disk_id,
                driver,
                backend,
                Arc::clone(&self.auth),
                Arc::clone(&self.objects),
            )),
        };
        self.objects.register_hard_drive(drive.id(), Arc::clone(&drive));
        drive
    }
}
