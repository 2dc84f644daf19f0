//! Hard-drive domain objects: a VM disk bound to a volume via a resolved
//! storage type and backend.

mod factory;
mod local;
mod replicated;

pub use factory::{HardDriveFactory, ObjectOverrides};
pub use local::LocalHardDrive;
pub use replicated::ReplicatedHardDrive;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::backend::{StorageBackend, Volume};
use crate::error::Result;
use crate::types::{DiskDriver, StorageType};
use crate::vm::VirtualMachine;

/// Maximum disks attachable to one VM.
pub const MAXIMUM_DEVICES: u8 = 4;

/// Suffix appended to a disk's volume name for its backup snapshot sibling.
pub const SNAPSHOT_SUFFIX: &str = ".snapshot";

/// Derive the data-volume name for a VM disk.
pub fn data_volume_name(vm_name: &str, disk_id: u8) -> String {
    format!("rackvirt_vm-{}-disk-{}", vm_name, disk_id)
}

/// One virtual disk of a VM, backed by a volume in a storage backend.
///
/// Mutating methods are expected to be externally serialized by the caller's
/// locking layer; this object performs no per-entry locking of its own.
#[async_trait]
pub trait HardDrive: Send + Sync {
    /// Stable object id used for remote addressing.
    fn id(&self) -> Uuid;

    /// Owning VM name.
    fn vm_name(&self) -> String;

    /// Disk index within the VM.
    fn disk_id(&self) -> u8;

    /// Variant tag of the underlying storage.
    fn storage_type(&self) -> StorageType;

    /// Guest disk bus driver.
    fn driver(&self) -> DiskDriver;

    /// The backend holding this disk's volume.
    fn backend(&self) -> Arc<dyn StorageBackend>;

    /// Name of the disk's data volume.
    fn disk_name(&self) -> String;

    /// Path of the raw disk device.
    fn disk_path(&self) -> PathBuf;

    /// Hypervisor cache mode for this disk.
    fn cache_mode(&self) -> &'static str;

    /// Whether the backing volume currently exists.
    fn check_exists(&self) -> bool;

    /// Allocate the disk's data volume.
    async fn create(&self, size_mb: u64) -> Result<()>;

    /// Remove the backing volume.
    async fn remove_storage(&self) -> Result<()>;

    /// Grow the disk by `size_mb` megabytes.
    async fn increase_size(&self, size_mb: u64) -> Result<()>;

    /// Current disk size in megabytes.
    async fn size(&self) -> Result<u64>;

    /// Make the disk device visible.
    async fn activate_disk(&self) -> Result<()>;

    /// Make the disk device invisible. Variant-dependent.
    async fn deactivate_disk(&self) -> Result<()>;

    /// Refuse migration when the storage cannot follow the VM.
    fn pre_migration_checks(&self) -> Result<()>;

    /// Source volume for backup snapshotting.
    fn backup_source_volume(&self) -> Box<dyn Volume>;

    /// Snapshot sibling volume (base name plus [`SNAPSHOT_SUFFIX`]).
    fn backup_snapshot_volume(&self) -> Box<dyn Volume>;

    /// Point-in-time copy of this disk attached to another VM.
    async fn clone_to(
        &self,
        destination_vm: Arc<dyn VirtualMachine>,
    ) -> Result<Arc<dyn HardDrive>>;
}
