//! Storage backend and volume trait definitions.
//!
//! A [`StorageBackend`] is a named pool of capacity (e.g. a volume group)
//! available on one or more nodes. It is the factory for [`Volume`] handles,
//! each of which addresses one logical storage unit inside the pool.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::StorageType;

/// Storage backend trait - implemented by each storage variant.
///
/// A backend instance is immutable once registered: it is looked up by name,
/// queried for capacity and availability, and asked to construct volume
/// handles, but never mutated by this layer.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Backend name, unique within the cluster.
    fn name(&self) -> &str;

    /// Variant tag used for dispatch and type validation.
    fn storage_type(&self) -> StorageType;

    /// Pool/group identifier backing this pool on the given node.
    ///
    /// `None` means the node handling the current request.
    fn location(&self, node: Option<&str>) -> String;

    /// Whether the pool is usable for migratable disks.
    fn shared(&self) -> bool;

    /// Nodes on which this backend is defined.
    fn nodes(&self) -> Vec<String>;

    /// Whether this backend is defined on the given node.
    fn available_on_node(&self, node: &str) -> bool {
        self.nodes().iter().any(|n| n == node)
    }

    /// Whether this backend mirrors volumes across nodes.
    fn is_replicated(&self) -> bool {
        self.storage_type().requires_replication()
    }

    /// Free space in whole megabytes.
    ///
    /// This is a hard precondition for volume creation, never advisory.
    async fn free_space(&self) -> Result<u64>;

    /// Fail fast when the backing pool is absent on this node.
    async fn ensure_exists(&self) -> Result<()>;

    /// Construct a volume handle. Pure construction, no I/O.
    fn volume(&self, name: &str) -> Box<dyn Volume>;
}

/// A handle to one logical storage unit inside a backend.
///
/// Existence is always derived from the backing object on disk, never cached
/// across calls, since external state can change out-of-band. Mutating
/// operations assume the caller has verified `check_exists` and free-space
/// preconditions; this layer does not retry or roll back partial
/// external-command effects.
#[async_trait]
pub trait Volume: Send + Sync {
    /// Volume name within its backend.
    fn name(&self) -> &str;

    /// Full path of the volume, scoped to the given node.
    ///
    /// Deterministic derivation from backend location plus volume name; no
    /// side effects.
    fn path_on(&self, node: Option<&str>) -> PathBuf;

    /// Full path on the node handling the current request.
    fn path(&self) -> PathBuf {
        self.path_on(None)
    }

    /// Allocate the unit at the given size in megabytes.
    async fn create(&self, size_mb: u64) -> Result<()>;

    /// Remove the unit.
    ///
    /// With `ignore_non_existent`, a missing volume is a silent no-op and no
    /// external command runs. Otherwise missing-target failures propagate
    /// from the underlying tool.
    async fn delete(&self, ignore_non_existent: bool) -> Result<()>;

    /// Make the unit visible at its path.
    async fn activate(&self) -> Result<()>;

    /// Make the unit invisible at its path.
    ///
    /// Variants that cannot deactivate fail with an explicit
    /// [`StorageError::NotImplemented`](crate::StorageError::NotImplemented)
    /// rather than silently succeeding.
    async fn deactivate(&self) -> Result<()>;

    /// Whether the unit is currently visible at its path.
    fn is_active(&self) -> bool;

    /// Resize the unit. Additive to the current size when `increase`,
    /// absolute otherwise.
    async fn resize(&self, size_mb: u64, increase: bool) -> Result<()>;

    /// Point-in-time copy into an already-constructed destination handle.
    ///
    /// The destination must not already exist.
    async fn clone_to(&self, destination: &dyn Volume) -> Result<()>;

    /// Copy-on-write derivative, sized independently from the source.
    async fn snapshot(&self, destination: &dyn Volume, size_mb: u64) -> Result<()>;

    /// Existence probe: a path-existence check, fast and side-effect-free so
    /// it can guard every mutating operation.
    fn check_exists(&self) -> bool;

    /// Authoritative current size in whole megabytes.
    async fn size(&self) -> Result<u64>;
}
