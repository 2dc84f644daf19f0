//! Hard drives on replicated storage.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::auth::{Authorizer, Permission};
use crate::backend::{StorageBackend, Volume};
use crate::cluster::ObjectRegistry;
use crate::error::{Result, StorageError};
use crate::types::{DiskDriver, StorageType};
use crate::vm::VirtualMachine;

use super::{HardDrive, SNAPSHOT_SUFFIX};

/// A VM disk backed by a mirrored resource on a replicated backend.
///
/// Structurally parallel to [`super::LocalHardDrive`]; the differences are
/// the resource naming, a working deactivate, and migration being allowed
/// since both nodes hold the data.
pub struct ReplicatedHardDrive {
    id: Uuid,
    vm: Arc<dyn VirtualMachine>,
    disk_id: u8,
    driver: DiskDriver,
    backend: Arc<dyn StorageBackend>,
    auth: Arc<dyn Authorizer>,
    objects: Arc<dyn ObjectRegistry>,
}

impl ReplicatedHardDrive {
    const CACHE_MODE: &'static str = "none";

    /// Construct a hard-drive object. No I/O happens until `create`.
    pub fn new(
        vm: Arc<dyn VirtualMachine>,
        disk_id: u8,
        driver: DiskDriver,
        backend: Arc<dyn StorageBackend>,
        auth: Arc<dyn Authorizer>,
        objects: Arc<dyn ObjectRegistry>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            vm,
            disk_id,
            driver,
            backend,
            auth,
            objects,
        }
    }

    /// Replication resource name for a VM disk.
    pub fn resource_name(vm_name: &str, disk_id: u8) -> String {
        format!("rackvirt-res-{}-disk-{}", vm_name, disk_id)
    }

    fn data_volume(&self) -> Box<dyn Volume> {
        self.backend.volume(&self.disk_name())
    }

    fn ensure_exists(&self) -> Result<()> {
        if !self.check_exists() {
            return Err(StorageError::DiskDoesNotExist(self.disk_name()));
        }
        Ok(())
    }
}

#[async_trait]
impl HardDrive for ReplicatedHardDrive {
    fn id(&self) -> Uuid {
        self.id
    }

    fn vm_name(&self) -> String {
        self.vm.name()
    }

    fn disk_id(&self) -> u8 {
        self.disk_id
    }

    fn storage_type(&self) -> StorageType {
        StorageType::Replicated
    }

    fn driver(&self) -> DiskDriver {
        self.driver
    }

    fn backend(&self) -> Arc<dyn StorageBackend> {
        Arc::clone(&self.backend)
    }

    fn disk_name(&self) -> String {
        Self::resource_name(&self.vm.name(), self.disk_id)
    }

    fn disk_path(&self) -> PathBuf {
        self.data_volume().path()
    }

    fn cache_mode(&self) -> &'static str {
        Self::CACHE_MODE
    }

    fn check_exists(&self) -> bool {
        self.data_volume().check_exists()
    }

    #[instrument(skip(self), fields(vm = %self.vm.name(), disk_id = self.disk_id, size_mb))]
    async fn create(&self, size_mb: u64) -> Result<()> {
        self.data_volume().create(size_mb).await?;
        info!("Replicated disk created");
        Ok(())
    }

    async fn remove_storage(&self) -> Result<()> {
        self.data_volume().delete(false).await
    }

    #[instrument(skip(self), fields(vm = %self.vm.name(), disk_id = self.disk_id, size_mb))]
    async fn increase_size(&self, size_mb: u64) -> Result<()> {
        self.auth
            .assert_permission(Permission::ModifyVm, self.vm.as_ref())?;
        self.ensure_exists()?;

        if !self.vm.is_stopped() {
            return Err(StorageError::VmAlreadyStarted(
                "VM must be stopped before increasing disk size".to_string(),
            ));
        }

        self.data_volume().resize(size_mb, true).await
    }

    async fn size(&self) -> Result<u64> {
        self.data_volume().size().await
    }

    async fn activate_disk(&self) -> Result<()> {
        self.ensure_exists()?;
        self.data_volume().activate().await
    }

    async fn deactivate_disk(&self) -> Result<()> {
        self.data_volume().deactivate().await
    }

    fn pre_migration_checks(&self) -> Result<()> {
        // Both replicas hold the data; migration between them is safe.
        Ok(())
    }

    fn backup_source_volume(&self) -> Box<dyn Volume> {
        self.data_volume()
    }

    fn backup_snapshot_volume(&self) -> Box<dyn Volume> {
        self.backend
            .volume(&format!("{}{}", self.disk_name(), SNAPSHOT_SUFFIX))
    }

    #[instrument(skip(self, destination_vm), fields(vm = %self.vm.name(), disk_id = self.disk_id, destination = %destination_vm.name()))]
    async fn clone_to(
        &self,
        destination_vm: Arc<dyn VirtualMachine>,
    ) -> Result<Arc<dyn HardDrive>> {
        self.ensure_exists()?;

        let new_disk = Arc::new(ReplicatedHardDrive::new(
            destination_vm,
            self.disk_id,
            self.driver,
            Arc::clone(&self.backend),
            Arc::clone(&self.auth),
            Arc::clone(&self.objects),
        ));
        self.objects
            .register_hard_drive(new_disk.id(), Arc::clone(&new_disk) as Arc<dyn HardDrive>);

        let destination = new_disk.data_volume();
        self.data_volume().clone_to(destination.as_ref()).await?;

        Ok(new_disk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AllowAllAuthorizer;
    use crate::cluster::InMemoryObjectRegistry;
    use crate::drbd::DrbdBackend;
    use crate::mock::{MockRunner, MockVm};

    fn drive(runner: Arc<MockRunner>) -> ReplicatedHardDrive {
        let backend = Arc::new(
            DrbdBackend::new(
                "mirror",
                "vg-mirror",
                vec!["node1".to_string(), "node2".to_string()],
                runner,
            )
            .unwrap(),
        );
        ReplicatedHardDrive::new(
            Arc::new(MockVm::new("web")),
            1,
            DiskDriver::Virtio,
            backend,
            Arc::new(AllowAllAuthorizer),
            Arc::new(InMemoryObjectRegistry::new()),
        )
    }

    #[test]
    fn test_resource_naming() {
        let runner = Arc::new(MockRunner::new());
        let drive = drive(runner);
        assert_eq!(drive.disk_name(), "rackvirt-res-web-disk-1");
        assert_eq!(
            drive.disk_path(),
            PathBuf::from("/dev/drbd/by-res/rackvirt-res-web-disk-1/0")
        );
    }

    #[test]
    fn test_replicated_disks_are_migratable() {
        let runner = Arc::new(MockRunner::new());
        drive(runner).pre_migration_checks().unwrap();
    }
}
