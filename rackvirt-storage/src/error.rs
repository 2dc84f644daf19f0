//! Error types for the storage provisioning layer.

use thiserror::Error;

/// Errors that can occur during storage provisioning operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Named storage infrastructure (e.g. a volume group) is missing or misconfigured.
    #[error("Invalid storage configuration: {0}")]
    InvalidStorageConfiguration(String),

    /// Storage type could not be resolved, is unsupported, or is ambiguous.
    #[error("Unknown storage type: {0}")]
    UnknownStorageType(String),

    /// Storage backend could not be resolved or is ambiguous.
    #[error("Unknown storage backend: {0}")]
    UnknownStorageBackend(String),

    /// A supplied backend is not usable on the node handling the request.
    #[error("Storage backend {backend} is not available on node {node}")]
    StorageBackendNotAvailableOnNode {
        /// Backend name.
        backend: String,
        /// Node that cannot use it.
        node: String,
    },

    /// The backend does not have enough free space for the request.
    #[error(
        "Attempted to create a disk with {requested_mb} MiB, but there is only \
         {available_mb} MiB of free space available on node {node}"
    )]
    InsufficientSpace {
        /// Requested size in megabytes.
        requested_mb: u64,
        /// Free space reported by the backend in megabytes.
        available_mb: u64,
        /// Node reporting the shortage.
        node: String,
    },

    /// Operation requires the VM to be stopped.
    #[error("VM must be stopped: {0}")]
    VmAlreadyStarted(String),

    /// Operation is refused for VMs in a clone relationship.
    #[error("VM is part of a clone relationship: {0}")]
    VmIsClone(String),

    /// Disks on a non-shared local backend cannot be migrated.
    #[error("VMs using local disks on a non-shared backend cannot be migrated")]
    CannotMigrateLocalDisk,

    /// Destination volume already exists.
    #[error("Disk already exists: {0}")]
    DiskAlreadyExists(String),

    /// Operation requires an existing disk.
    #[error("Disk does not exist: {0}")]
    DiskDoesNotExist(String),

    /// An external storage tool exited non-zero; carries the captured output.
    #[error("{context}:\n{output}")]
    ExternalCommand {
        /// What the command was doing.
        context: String,
        /// Captured diagnostic output (stderr, falling back to stdout).
        output: String,
    },

    /// The operation is not supported by this backend variant.
    #[error("Operation not implemented by this storage variant: {0}")]
    NotImplemented(String),

    /// Caller lacks the rights for a mutating operation.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
}

/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
