//! Hard drives on local volume-group storage.

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

use super::{data_volume_name, HardDrive, SNAPSHOT_SUFFIX};

/// A VM disk backed by a logical volume on a local volume-group backend.
pub struct LocalHardDrive {
    id: Uuid,
    vm: Arc<dyn VirtualMachine>,
    disk_id: u8,
    driver: DiskDriver,
    backend: Arc<dyn StorageBackend>,
    auth: Arc<dyn Authorizer>,
    objects: Arc<dyn ObjectRegistry>,
}

impl LocalHardDrive {
    const CACHE_MODE: &'static str = "directsync";

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
impl HardDrive for LocalHardDrive {
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
        StorageType::Local
    }

    fn driver(&self) -> DiskDriver {
        self.driver
    }

    fn backend(&self) -> Arc<dyn StorageBackend> {
        Arc::clone(&self.backend)
    }

    fn disk_name(&self) -> String {
        data_volume_name(&self.vm.name(), self.disk_id)
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
        info!("Disk created");
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

        // Cloned disks share allocation history that size changes would
        // invalidate.
        if self.vm.clone_parent().is_some() || !self.vm.clone_children().is_empty() {
            return Err(StorageError::VmIsClone(
                "Cannot increase the disk of a cloned VM or a clone".to_string(),
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
        if !self.backend.shared() {
            return Err(StorageError::CannotMigrateLocalDisk);
        }
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

        let new_disk = Arc::new(LocalHardDrive::new(
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

        info!("Disk cloned");
        Ok(new_disk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AllowAllAuthorizer;
    use crate::cluster::InMemoryObjectRegistry;
    use crate::lvm::LvmBackend;
    use crate::mock::{MockRunner, MockVm};

    fn drive(vm: MockVm, shared: bool, runner: Arc<MockRunner>) -> LocalHardDrive {
        let backend = Arc::new(
            LvmBackend::new("pool", "vg-data", runner)
                .with_shared(shared)
                .with_nodes(vec!["node1".to_string()]),
        );
        LocalHardDrive::new(
            Arc::new(vm),
            1,
            DiskDriver::Virtio,
            backend,
            Arc::new(AllowAllAuthorizer),
            Arc::new(InMemoryObjectRegistry::new()),
        )
    }

    #[test]
    fn test_disk_naming_and_path() {
        let runner = Arc::new(MockRunner::new());
        let drive = drive(MockVm::new("web"), false, runner);
        assert_eq!(drive.disk_name(), "rackvirt_vm-web-disk-1");
        assert_eq!(
            drive.disk_path(),
            PathBuf::from("/dev/vg-data/rackvirt_vm-web-disk-1")
        );
        assert_eq!(
            drive.backup_snapshot_volume().name(),
            "rackvirt_vm-web-disk-1.snapshot"
        );
    }

    #[test]
    fn test_migration_requires_shared_backend() {
        let runner = Arc::new(MockRunner::new());
        let local_only = drive(MockVm::new("web"), false, Arc::clone(&runner));
        assert!(matches!(
            local_only.pre_migration_checks().unwrap_err(),
            StorageError::CannotMigrateLocalDisk
        ));

        let shared = drive(MockVm::new("web"), true, runner);
        shared.pre_migration_checks().unwrap();
    }

    #[tokio::test]
    async fn test_increase_size_requires_stopped_vm() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("vg-data")).unwrap();
        std::fs::write(dir.path().join("vg-data/rackvirt_vm-web-disk-1"), b"").unwrap();

        let runner = Arc::new(MockRunner::new());
        let backend = Arc::new(
            LvmBackend::new("pool", "vg-data", Arc::clone(&runner) as _).with_dev_root(dir.path()),
        );
        let drive = LocalHardDrive::new(
            Arc::new(MockVm::new("web").with_stopped(false)),
            1,
            DiskDriver::Virtio,
            backend,
            Arc::new(AllowAllAuthorizer),
            Arc::new(InMemoryObjectRegistry::new()),
        );

        let err = drive.increase_size(100).await.unwrap_err();
        assert!(matches!(err, StorageError::VmAlreadyStarted(_)));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_increase_size_requires_existing_disk() {
        let runner = Arc::new(MockRunner::new());
        let drive = drive(MockVm::new("web"), false, Arc::clone(&runner));

        let err = drive.increase_size(100).await.unwrap_err();
        assert!(matches!(err, StorageError::DiskDoesNotExist(_)));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_increase_size_refuses_clones() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("vg-data")).unwrap();
        std::fs::write(dir.path().join("vg-data/rackvirt_vm-web-disk-1"), b"").unwrap();

        let runner = Arc::new(MockRunner::new());
        let backend = Arc::new(
            LvmBackend::new("pool", "vg-data", Arc::clone(&runner) as _).with_dev_root(dir.path()),
        );
        let vm = MockVm::new("web").with_clone_parent("template");
        let drive = LocalHardDrive::new(
            Arc::new(vm),
            1,
            DiskDriver::Virtio,
            backend,
            Arc::new(AllowAllAuthorizer),
            Arc::new(InMemoryObjectRegistry::new()),
        );

        let err = drive.increase_size(100).await.unwrap_err();
        assert!(matches!(err, StorageError::VmIsClone(_)));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_increase_size_is_additive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("vg-data")).unwrap();
        std::fs::write(dir.path().join("vg-data/rackvirt_vm-web-disk-1"), b"").unwrap();

        let runner = Arc::new(MockRunner::new());
        let backend = Arc::new(
            LvmBackend::new("pool", "vg-data", Arc::clone(&runner) as _).with_dev_root(dir.path()),
        );
        let drive = LocalHardDrive::new(
            Arc::new(MockVm::new("web")),
            1,
            DiskDriver::Virtio,
            backend,
            Arc::new(AllowAllAuthorizer),
            Arc::new(InMemoryObjectRegistry::new()),
        );

        drive.increase_size(100).await.unwrap();
        let calls = runner.calls();
        assert_eq!(calls[0][0], "lvresize");
        assert_eq!(calls[0][2], "+100M");
    }

    #[tokio::test]
    async fn test_clone_registers_the_new_disk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("vg-data")).unwrap();
        std::fs::write(dir.path().join("vg-data/rackvirt_vm-web-disk-1"), b"").unwrap();

        let runner = Arc::new(MockRunner::new());
        runner.push_success("  2048.00\n"); // source size for the copy
        let backend = Arc::new(
            LvmBackend::new("pool", "vg-data", Arc::clone(&runner) as _).with_dev_root(dir.path()),
        );
        let objects = Arc::new(InMemoryObjectRegistry::new());
        let drive = LocalHardDrive::new(
            Arc::new(MockVm::new("web")),
            1,
            DiskDriver::Virtio,
            backend,
            Arc::new(AllowAllAuthorizer),
            Arc::clone(&objects) as Arc<dyn ObjectRegistry>,
        );

        let clone = drive
            .clone_to(Arc::new(MockVm::new("web-copy")))
            .await
            .unwrap();
        assert_eq!(clone.disk_name(), "rackvirt_vm-web-copy-disk-1");
        assert_eq!(objects.hard_drive_count(), 1);
        assert!(objects.hard_drive(clone.id()).is_some());
    }
}
