//! Replicated storage backend.
//!
//! Volumes are DRBD resources mirrored across exactly two nodes, each backed
//! by a logical volume in a local volume group. Structurally parallel to the
//! local variant in `lvm.rs`; the command set adds the replication control
//! steps around the backing-volume operations.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument};

use crate::backend::{StorageBackend, Volume};
use crate::error::{Result, StorageError};
use crate::lvm::LvmBackend;
use crate::system::{parse_megabytes, with_context, CommandRunner};
use crate::types::StorageType;

/// Replicated backends mirror across exactly this many nodes.
pub const REPLICA_COUNT: usize = 2;

/// Megabytes of replication metadata needed alongside `data_mb` of data:
/// internal metadata grows at roughly 32 KiB per GiB, plus one fixed
/// megabyte per resource.
fn metadata_overhead_mb(data_mb: u64) -> u64 {
    data_mb / 32_768 + 1
}

struct DrbdState {
    name: String,
    volume_group: String,
    node_locations: HashMap<String, String>,
    shared: bool,
    nodes: Vec<String>,
    dev_root: PathBuf,
    runner: Arc<dyn CommandRunner>,
}

impl DrbdState {
    fn location(&self, node: Option<&str>) -> String {
        node.and_then(|n| self.node_locations.get(n))
            .unwrap_or(&self.volume_group)
            .clone()
    }

    fn backing_path(&self, name: &str) -> PathBuf {
        self.dev_root.join(self.location(None)).join(name)
    }
}

/// Storage backend for replicated (mirrored) storage.
#[derive(Clone)]
pub struct DrbdBackend {
    state: Arc<DrbdState>,
}

impl DrbdBackend {
    /// Create a backend mirroring the named volume group across `nodes`.
    ///
    /// Fails with `InvalidStorageConfiguration` unless exactly two nodes are
    /// given.
    pub fn new(
        name: impl Into<String>,
        volume_group: impl Into<String>,
        nodes: Vec<String>,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self> {
        if nodes.len() != REPLICA_COUNT {
            return Err(StorageError::InvalidStorageConfiguration(format!(
                "Replicated backends require exactly {} nodes, got {}",
                REPLICA_COUNT,
                nodes.len()
            )));
        }
        Ok(Self {
            state: Arc::new(DrbdState {
                name: name.into(),
                volume_group: volume_group.into(),
                node_locations: HashMap::new(),
                shared: true,
                nodes,
                dev_root: PathBuf::from("/dev"),
                runner,
            }),
        })
    }

    fn state_mut(&mut self) -> &mut DrbdState {
        Arc::get_mut(&mut self.state).unwrap_or_else(|| unreachable!("backend already shared"))
    }

    /// Override the shared flag.
    pub fn with_shared(mut self, shared: bool) -> Self {
        self.state_mut().shared = shared;
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
}

#[async_trait]
impl StorageBackend for DrbdBackend {
    fn name(&self) -> &str {
        &self.state.name
    }

    fn storage_type(&self) -> StorageType {
        StorageType::Replicated
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

        let raw = parse_megabytes(&out.stdout).ok_or_else(|| StorageError::ExternalCommand {
            context: "Error whilst querying volume group free space".to_string(),
            output: out.stdout,
        })?;

        // Creation needs room for the backing volume plus its replication
        // metadata, so the capacity gate sees only the usable remainder.
        Ok(raw.saturating_sub(metadata_overhead_mb(raw)))
    }

    async fn ensure_exists(&self) -> Result<()> {
        let location = self.state.location(None);
        if !LvmBackend::check_exists_local(self.state.runner.as_ref(), &location)? {
            return Err(StorageError::InvalidStorageConfiguration(format!(
                "Volume group {} does not exist",
                location
            )));
        }
        Ok(())
    }

    fn volume(&self, name: &str) -> Box<dyn Volume> {
        Box::new(DrbdVolume {
            name: name.to_string(),
            state: Arc::clone(&self.state),
        })
    }
}

/// A replicated resource inside a [`DrbdBackend`].
///
/// The volume name doubles as the replication resource name.
pub struct DrbdVolume {
    name: String,
    state: Arc<DrbdState>,
}

impl DrbdVolume {
    fn backing_path_str(&self) -> String {
        self.state.backing_path(&self.name).to_string_lossy().to_string()
    }
}

#[async_trait]
impl Volume for DrbdVolume {
    fn name(&self) -> &str {
        &self.name
    }

    fn path_on(&self, _node: Option<&str>) -> PathBuf {
        // Resource device path is identical on both replicas.
        self.state
            .dev_root
            .join("drbd/by-res")
            .join(&self.name)
            .join("0")
    }

    #[instrument(skip(self), fields(resource = %self.name, size_mb))]
    async fn create(&self, size_mb: u64) -> Result<()> {
        let location = self.state.location(None);
        let size = format!("{}M", size_mb);
        let run = |argv: &[&str]| {
            self.state
                .runner
                .run(argv)
                .map_err(|e| with_context("Error whilst creating replicated volume", e))
        };

        run(&["lvcreate", &location, "--name", &self.name, "--size", &size])?;
        run(&["drbdadm", "create-md", &self.name])?;
        run(&["drbdadm", "up", &self.name])?;
        run(&["drbdadm", "primary", "--force", &self.name])?;
        info!("Replicated volume created");
        Ok(())
    }

    #[instrument(skip(self), fields(resource = %self.name, ignore_non_existent))]
    async fn delete(&self, ignore_non_existent: bool) -> Result<()> {
        if ignore_non_existent && !self.check_exists() {
            return Ok(());
        }
        let backing = self.backing_path_str();
        let run = |argv: &[&str]| {
            self.state
                .runner
                .run(argv)
                .map_err(|e| with_context("Error whilst removing replicated volume", e))
        };

        run(&["drbdadm", "down", &self.name])?;
        run(&["lvremove", "-f", &backing])?;
        info!("Replicated volume removed");
        Ok(())
    }

    #[instrument(skip(self), fields(resource = %self.name))]
    async fn activate(&self) -> Result<()> {
        let run = |argv: &[&str]| {
            self.state
                .runner
                .run(argv)
                .map_err(|e| with_context("Error whilst activating replicated volume", e))
        };
        run(&["drbdadm", "up", &self.name])?;
        run(&["drbdadm", "primary", &self.name])?;
        Ok(())
    }

    #[instrument(skip(self), fields(resource = %self.name))]
    async fn deactivate(&self) -> Result<()> {
        let run = |argv: &[&str]| {
            self.state
                .runner
                .run(argv)
                .map_err(|e| with_context("Error whilst deactivating replicated volume", e))
        };
        run(&["drbdadm", "secondary", &self.name])?;
        run(&["drbdadm", "down", &self.name])?;
        Ok(())
    }

    fn is_active(&self) -> bool {
        // Follows the symlink: a dangling device entry is not active.
        std::fs::metadata(self.path()).is_ok()
    }

    #[instrument(skip(self), fields(resource = %self.name, size_mb, increase))]
    async fn resize(&self, size_mb: u64, increase: bool) -> Result<()> {
        let backing = self.backing_path_str();
        let size = if increase {
            format!("+{}M", size_mb)
        } else {
            format!("{}M", size_mb)
        };
        let run = |argv: &[&str]| {
            self.state
                .runner
                .run(argv)
                .map_err(|e| with_context("Error whilst resizing replicated volume", e))
        };

        run(&["lvresize", "--size", &size, &backing])?;
        run(&["drbdadm", "resize", &self.name])?;
        Ok(())
    }

    #[instrument(skip(self, destination), fields(resource = %self.name, destination = %destination.name()))]
    async fn clone_to(&self, destination: &dyn Volume) -> Result<()> {
        if destination.check_exists() {
            return Err(StorageError::DiskAlreadyExists(
                destination.name().to_string(),
            ));
        }

        let size = self.size().await?;
        destination.create(size).await?;

        let source = self.path().to_string_lossy().to_string();
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
            .map_err(|e| with_context("Error whilst copying replicated volume data", e))?;
        Ok(())
    }

    #[instrument(skip(self, destination), fields(resource = %self.name, destination = %destination.name(), size_mb))]
    async fn snapshot(&self, destination: &dyn Volume, size_mb: u64) -> Result<()> {
        let backing = self.backing_path_str();
        let size = format!("{}M", size_mb);
        self.state
            .runner
            .run(&[
                "lvcreate",
                "--snapshot",
                &backing,
                "--name",
                destination.name(),
                "--size",
                &size,
            ])
            .map_err(|e| with_context("Error whilst snapshotting replicated volume", e))?;
        Ok(())
    }

    fn check_exists(&self) -> bool {
        std::fs::symlink_metadata(self.state.backing_path(&self.name)).is_ok()
            || std::fs::symlink_metadata(self.path()).is_ok()
    }

    async fn size(&self) -> Result<u64> {
        let backing = self.backing_path_str();
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
                &backing,
            ])
            .map_err(|e| {
                with_context("Error whilst obtaining the size of the replicated volume", e)
            })?;

        parse_megabytes(&out.stdout).ok_or_else(|| StorageError::ExternalCommand {
            context: "Error whilst obtaining the size of the replicated volume".to_string(),
            output: out.stdout,
        })
    }
}

impl std::fmt::Debug for DrbdBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrbdBackend")
            .field("name", &self.state.name)
            .field("volume_group", &self.state.volume_group)
            .field("shared", &self.state.shared)
            .field("nodes", &self.state.nodes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRunner;

    fn two_nodes() -> Vec<String> {
        vec!["node1".to_string(), "node2".to_string()]
    }

    #[test]
    fn test_requires_exactly_two_nodes() {
        let runner = Arc::new(MockRunner::new());
        let err = DrbdBackend::new("mirror", "vg-mirror", vec!["node1".to_string()], runner)
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidStorageConfiguration(_)));
    }

    #[tokio::test]
    async fn test_create_brings_resource_up_primary() {
        let runner = Arc::new(MockRunner::new());
        let backend =
            DrbdBackend::new("mirror", "vg-mirror", two_nodes(), Arc::clone(&runner) as _).unwrap();
        let volume = backend.volume("res-1");

        volume.create(1024).await.unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[0][0], "lvcreate");
        assert_eq!(calls[1], vec!["drbdadm", "create-md", "res-1"]);
        assert_eq!(calls[2], vec!["drbdadm", "up", "res-1"]);
        assert_eq!(calls[3], vec!["drbdadm", "primary", "--force", "res-1"]);
    }

    #[tokio::test]
    async fn test_free_space_reserves_metadata_overhead() {
        let runner = Arc::new(MockRunner::new());
        runner.push_success("  65536.00\n");
        let backend =
            DrbdBackend::new("mirror", "vg-mirror", two_nodes(), Arc::clone(&runner) as _).unwrap();

        // 65536 MiB raw, minus 2 MiB grown metadata and 1 MiB fixed.
        assert_eq!(backend.free_space().await.unwrap(), 65533);
    }

    #[tokio::test]
    async fn test_deactivate_is_supported() {
        let runner = Arc::new(MockRunner::new());
        let backend =
            DrbdBackend::new("mirror", "vg-mirror", two_nodes(), Arc::clone(&runner) as _).unwrap();
        let volume = backend.volume("res-1");

        volume.deactivate().await.unwrap();

        let calls = runner.calls();
        assert_eq!(calls[0], vec!["drbdadm", "secondary", "res-1"]);
        assert_eq!(calls[1], vec!["drbdadm", "down", "res-1"]);
    }

    #[tokio::test]
    async fn test_resource_device_path() {
        let runner = Arc::new(MockRunner::new());
        let backend = DrbdBackend::new("mirror", "vg-mirror", two_nodes(), runner).unwrap();
        let volume = backend.volume("res-1");
        assert_eq!(volume.path(), PathBuf::from("/dev/drbd/by-res/res-1/0"));
        // Identical on both replicas.
        assert_eq!(volume.path_on(Some("node2")), volume.path());
    }
}
