//! Authorization collaborator interface.
//!
//! The real permission checker is part of the cluster daemon; this crate
//! only asserts rights through the trait before mutating operations.

use crate::error::{Result, StorageError};
use crate::vm::VirtualMachine;

/// Actions gated by the permission layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    /// Modify a VM's configuration, including attaching or resizing disks.
    ModifyVm,
}

/// Permission checker consumed before any mutating factory operation.
pub trait Authorizer: Send + Sync {
    /// Fail with [`StorageError::PermissionDenied`] when the current caller
    /// lacks `permission` for `vm`.
    fn assert_permission(&self, permission: Permission, vm: &dyn VirtualMachine) -> Result<()>;
}

/// Authorizer that grants everything. For single-user deployments and tests.
#[derive(Debug, Default, Clone)]
pub struct AllowAllAuthorizer;

impl Authorizer for AllowAllAuthorizer {
    fn assert_permission(&self, _permission: Permission, _vm: &dyn VirtualMachine) -> Result<()> {
        Ok(())
    }
}

/// Authorizer that denies everything.
#[derive(Debug, Default, Clone)]
pub struct DenyAllAuthorizer;

impl Authorizer for DenyAllAuthorizer {
    fn assert_permission(&self, permission: Permission, vm: &dyn VirtualMachine) -> Result<()> {
        Err(StorageError::PermissionDenied(format!(
            "{:?} denied for VM {}",
            permission,
            vm.name()
        )))
    }
}
