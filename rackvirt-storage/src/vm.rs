//! Virtual-machine collaborator interface.
//!
//! The VM lifecycle object lives outside this crate; provisioning only needs
//! the narrow read surface below (persisted storage type, node placement,
//! run state and clone relationships).

use crate::types::StorageType;

/// Read-only view of a virtual machine, as consumed by provisioning.
pub trait VirtualMachine: Send + Sync {
    /// VM name, unique within the cluster.
    fn name(&self) -> String;

    /// Storage type persisted in the VM configuration, if any disk has
    /// established one.
    fn storage_type(&self) -> Option<StorageType>;

    /// Nodes this VM may run on; the target node set for validation.
    fn available_nodes(&self) -> Vec<String>;

    /// Disk ids already attached to this VM.
    fn attached_disk_ids(&self) -> Vec<u8>;

    /// Whether the VM is currently stopped.
    fn is_stopped(&self) -> bool;

    /// The VM this one was cloned from, if any.
    fn clone_parent(&self) -> Option<String>;

    /// VMs cloned from this one.
    fn clone_children(&self) -> Vec<String>;
}
