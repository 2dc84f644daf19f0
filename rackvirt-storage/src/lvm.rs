//! Local volume-group storage backend.
//!
//! Volumes are LVM logical volumes inside a named volume group. Every
//! operation is derived from `(volume group, volume name, size)` and executed
//! through the [`CommandRunner`], with non-zero exits mapped to
//! [`StorageError::ExternalCommand`] carrying the tool's diagnostic output.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument};

use crate::backend::{StorageBackend, Volume};
use crate::error::{Result, StorageError};
use crate::system::{parse_megabytes, with_context, CommandRunner};
use crate::types::StorageType;

/// Shared state between a backend and the volumes it constructs.
struct LvmState {
    name: String,
    volume_group: String,
    /// Per-node overrides for the volume-group name.
    node_locations: HashMap<String, String>,
    shared: bool,
    nodes: Vec<String>,
    /// Device tree root, overridable for tests.
    dev_root: PathBuf,
    runner: Arc<dyn CommandRunner>,
}

impl LvmState {
    fn location(&self, node: Option<&str>) -> String {
        node.and_then(|n| self.node_locations.get(n))
            .unwrap_or(&self.volume_group)
            .clone()
    }
}

/// Storage backend for local volume-group based storage.
#[derive(Clone)]
pub struct LvmBackend {
    state: Arc<LvmState>,
}

impl LvmBackend {
    /// Create a backend for the named volume group.
    pub fn new(
        name: impl Into<String>,
        volume_group: impl Into<String>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            state: Arc::new(LvmState {
                name: name.into(),
                volume_group: volume_group.into(),
                node_locations: HashMap::new(),
                shared: false,
                nodes: Vec::new(),
                dev_root: PathBuf::from("/dev"),
                runner,
            }),
        }
    }

    fn state_mut(&mut self) -> &mut LvmState {
        // Builders run before the backend is shared.
        Arc::get_mut(&mut self.state).unwrap_or_else(|| unreachable!("backend already shared"))
    }

    /// Mark the pool as usable for migratable disks.
    pub fn with_shared(mut self, shared: bool) -> Self {
        self.state_mut().shared = shared;
        self
    }

    /// Set the nodes on which this backend is defined.
    pub fn with_nodes(mut self, nodes: Vec<String>) -> Self {
        self.state_mut().nodes = nodes;
        self
    }

    /// Override the volume-group name on one node.
    pub fn with_node_location(mut self, node: impl Into<String>, location: impl Into<String>) -> Self {
        let location = location.into();
        self.state_mut().node_locations.insert(node.into(), location);
        self
    }

    /// Override the device tree root (tests point this at a temp dir).
    pub fn with_dev_root(mut self, dev_root: impl Into<PathBuf>) -> Self {
        self.state_mut().dev_root = dev_root.into();
        self
    }

    /// Determine whether the volume group actually exists on this node.
    pub fn check_exists_local(runner: &dyn CommandRunner, volume_group: &str) -> Result<bool> {
        match runner.run(&["vgs", "--noheadings", "-o", "vg_name", volume_group]) {
            Ok(out) => Ok(!out.stdout.trim().is_empty()),
            Err(StorageError::ExternalCommand { .. }) => Ok(false),
            Err(other) => Err(other),
        }
    }
}

#[async_trait]
impl StorageBackend for LvmBackend {
    fn name(&self) -> &str {
        &self.state.name
    }

    fn storage_type(&self) -> StorageType {
        StorageType::Local
    }

    fn location(&self, node: Option<&str>) -> String {
        self.state.location(node)
    }

    fn shared(&self) -> bool {
        self.state.shared
    }

    fn nodes(&self) -> Vec<String> {
        self.state.nodes.clone()
    }

    async fn free_space(&self) -> Result<u64> {
        let location = self.state.location(None);
        let out = self
            .state
            .runner
            .run(&[
                "vgs",
                &location,
                "-o",
                "free",
                "--noheadings",
                "--nosuffix",
                "--units",
                "m",
            ])
            .map_err(|e| with_context("Error whilst querying volume group free space", e))?;

        parse_megabytes(&out.stdout).ok_or_else(|| StorageError::ExternalCommand {
            context: "Error whilst querying volume group free space".to_string(),
            output: out.stdout,
        })
    }

    async fn ensure_exists(&self) -> Result<()> {
        let location = self.state.location(None);
        if !Self::check_exists_local(self.state.runner.as_ref(), &location)? {
            return Err(StorageError::InvalidStorageConfiguration(format!(
                "Volume group {} does not exist",
                location
            )));
        }
        Ok(())
    }

    fn volume(&self, name: &str) -> Box<dyn Volume> {
        Box::new(LvmVolume {
            name: name.to_string(),
            state: Arc::clone(&self.state),
        })
    }
}

/// A logical volume inside an [`LvmBackend`].
pub struct LvmVolume {
    name: String,
    state: Arc<LvmState>,
}

impl LvmVolume {
    fn path_str(&self) -> String {
        self.path().to_string_lossy().to_string()
    }
}

#[async_trait]
impl Volume for LvmVolume {
    fn name(&self) -> &str {
        &self.name
    }

    fn path_on(&self, node: Option<&str>) -> PathBuf {
        self.state
            .dev_root
            .join(self.state.location(node))
            .join(&self.name)
    }

    #[instrument(skip(self), fields(volume = %self.name, size_mb))]
    async fn create(&self, size_mb: u64) -> Result<()> {
        let location = self.state.location(None);
        let size = format!("{}M", size_mb);
        self.state
            .runner
            .run(&["lvcreate", &location, "--name", &self.name, "--size", &size])
            .map_err(|e| with_context("Error whilst creating disk logical volume", e))?;
        info!("Logical volume created");
        Ok(())
    }

    #[instrument(skip(self), fields(volume = %self.name, ignore_non_existent))]
    async fn delete(&self, ignore_non_existent: bool) -> Result<()> {
        if ignore_non_existent && !self.check_exists() {
            return Ok(());
        }
        let path = self.path_str();
        self.state
            .runner
            .run(&["lvremove", "-f", &path])
            .map_err(|e| with_context("Error whilst removing logical volume", e))?;
        info!("Logical volume removed");
        Ok(())
    }

    #[instrument(skip(self), fields(volume = %self.name))]
    async fn activate(&self) -> Result<()> {
        let path = self.path_str();
        self.state
            .runner
            .run(&["lvchange", "-a", "y", "--yes", &path])
            .map_err(|e| with_context("Error whilst activating logical volume", e))?;
        Ok(())
    }

    async fn deactivate(&self) -> Result<()> {
        Err(StorageError::NotImplemented(
            "deactivate is not supported for local volume-group storage".to_string(),
        ))
    }

    fn is_active(&self) -> bool {
        // Follows the symlink: a dangling /dev entry exists but is not
        // active.
        std::fs::metadata(self.path()).is_ok()
    }

    #[instrument(skip(self), fields(volume = %self.name, size_mb, increase))]
    async fn resize(&self, size_mb: u64, increase: bool) -> Result<()> {
        let path = self.path_str();
        let size = if increase {
            format!("+{}M", size_mb)
        } else {
            format!("{}M", size_mb)
        };
        self.state
            .runner
            .run(&["lvresize", "--size", &size, &path])
            .map_err(|e| with_context("Error whilst resizing disk logical volume", e))?;
        Ok(())
    }

    #[instrument(skip(self, destination), fields(volume = %self.name, destination = %destination.name()))]
    async fn clone_to(&self, destination: &dyn Volume) -> Result<()> {
        if destination.check_exists() {
            return Err(StorageError::DiskAlreadyExists(
                destination.name().to_string(),
            ));
        }

        let size = self.size().await?;
        destination.create(size).await?;

        let source = self.path_str();
        let dest = destination.path().to_string_lossy().to_string();
        self.state
            .runner
            .run(&[
                "dd",
                &format!("if={}", source),
                &format!("of={}", dest),
                "bs=1M",
                "conv=fsync",
            ])
            .map_err(|e| with_context("Error whilst copying logical volume data", e))?;
        info!("Logical volume cloned");
        Ok(())
    }

    #[instrument(skip(self, destination), fields(volume = %self.name, destination = %destination.name(), size_mb))]
    async fn snapshot(&self, destination: &dyn Volume, size_mb: u64) -> Result<()> {
        let path = self.path_str();
        let size = format!("{}M", size_mb);
        self.state
            .runner
            .run(&[
                "lvcreate",
                "--snapshot",
                &path,
                "--name",
                destination.name(),
                "--size",
                &size,
            ])
            .map_err(|e| with_context("Error whilst snapshotting logical volume", e))?;
        Ok(())
    }

    fn check_exists(&self) -> bool {
        // lexists semantics: a dangling /dev symlink still counts.
        std::fs::symlink_metadata(self.path()).is_ok()
    }

    async fn size(&self) -> Result<u64> {
        let path = self.path_str();
        let out = self
            .state
            .runner
            .run(&[
                "lvs",
                "--nosuffix",
                "--noheadings",
                "--units",
                "m",
                "--options",
                "lv_size",
                &path,
            ])
            .map_err(|e| {
                with_context("Error whilst obtaining the size of the logical volume", e)
            })?;

        parse_megabytes(&out.stdout).ok_or_else(|| StorageError::ExternalCommand {
            context: "Error whilst obtaining the size of the logical volume".to_string(),
            output: out.stdout,
        })
    }
}

impl std::fmt::Debug for LvmBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LvmBackend")
            .field("name", &self.state.name)
            .field("volume_group", &self.state.volume_group)
            .field("shared", &self.state.shared)
            .field("nodes", &self.state.nodes)
            .finish()
    }
}
