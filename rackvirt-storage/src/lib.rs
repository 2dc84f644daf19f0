//! # rackvirt Storage
//!
//! Storage provisioning layer for the rackvirt cluster VM manager.
//!
//! This crate owns everything between "the VM needs a disk" and the block
//! device existing on the right nodes: backend registration, storage-type
//! and backend resolution, cluster-wide capacity validation, and the
//! per-variant hard-drive objects that drive the underlying volumes.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │             HardDriveFactory                │
//! │  (resolve type/backend, validate, create)   │
//! └──────────┬───────────────────┬──────────────┘
//!            │                   │
//!            ▼                   ▼
//! ┌───────────────────┐ ┌───────────────────┐
//! │  LocalHardDrive   │ │ ReplicatedHardDrive│
//! └─────────┬─────────┘ └─────────┬─────────┘
//!           │                     │
//!           ▼                     ▼
//! ┌───────────────────┐ ┌───────────────────┐
//! │    LvmBackend     │ │    DrbdBackend    │
//! │  (volume group)   │ │  (mirrored pair)  │
//! └───────────────────┘ └───────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use rackvirt_storage::{
//!     AllowAllAuthorizer, BackendRegistry, DiskDriver, HardDriveFactory,
//!     InMemoryObjectRegistry, LocalCluster, LvmBackend, SystemRunner,
//! };
//!
//! #[tokio::main]
//! async fn main() -> rackvirt_storage::Result<()> {
//!     let registry = Arc::new(BackendRegistry::new());
//!     registry.register(Arc::new(LvmBackend::new(
//!         "pool",
//!         "rackvirt-vg",
//!         Arc::new(SystemRunner),
//!     )))?;
//!
//!     let factory = HardDriveFactory::new(
//!         registry,
//!         Arc::new(LocalCluster::for_local_host()?),
//!         Arc::new(InMemoryObjectRegistry::new()),
//!         Arc::new(AllowAllAuthorizer),
//!     );
//!
//!     let drive = factory
//!         .create(my_vm, 10 * 1024, None, DiskDriver::Virtio, None)
//!         .await?;
//!     println!("created {}", drive.disk_path().display());
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod backend;
pub mod cluster;
pub mod drbd;
pub mod error;
pub mod harddrive;
pub mod lvm;
pub mod mock;
pub mod registry;
pub mod system;
pub mod types;
pub mod vm;

pub use auth::{AllowAllAuthorizer, Authorizer, DenyAllAuthorizer, Permission};
pub use backend::{StorageBackend, Volume};
pub use cluster::{
    Cluster, InMemoryObjectRegistry, LocalCluster, ObjectRegistry, ValidationTask,
};
pub use drbd::DrbdBackend;
pub use error::{Result, StorageError};
pub use harddrive::{
    HardDrive, HardDriveFactory, LocalHardDrive, ObjectOverrides, ReplicatedHardDrive,
    MAXIMUM_DEVICES,
};
pub use lvm::LvmBackend;
pub use registry::{load_definitions, BackendDefinition, BackendRegistry};
pub use system::{CommandOutput, CommandRunner, SystemRunner};
pub use types::{parse_size_mb, DiskDriver, StorageType};
pub use vm::VirtualMachine;
