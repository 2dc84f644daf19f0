//! Mock collaborators for testing and development.
//!
//! These simulate the external command runner, the cluster transport and the
//! VM lifecycle object in memory, so provisioning logic can be exercised
//! without storage tooling or a real cluster.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::cluster::{Cluster, ValidationTask};
use crate::error::{Result, StorageError};
use crate::system::{CommandOutput, CommandRunner};
use crate::types::StorageType;
use crate::vm::VirtualMachine;

enum MockResponse {
    Success(CommandOutput),
    Failure { code: i32, stderr: String },
}

/// Command runner with scripted responses and recorded invocations.
///
/// Responses are consumed in push order; when the script is empty every
/// command succeeds with empty output.
#[derive(Default)]
pub struct MockRunner {
    script: Mutex<VecDeque<MockResponse>>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl MockRunner {
    /// Create a runner where every command succeeds with empty output.
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next command to succeed with the given stdout.
    pub fn push_success(&self, stdout: &str) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(MockResponse::Success(CommandOutput {
                code: 0,
                stdout: stdout.to_string(),
                stderr: String::new(),
            }));
    }

    /// Script the next command to fail with exit code 5 and the given stderr.
    pub fn push_failure(&self, stderr: &str) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(MockResponse::Failure {
                code: 5,
                stderr: stderr.to_string(),
            });
    }

    /// All recorded invocations, in order.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl CommandRunner for MockRunner {
    fn run(&self, argv: &[&str]) -> Result<CommandOutput> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(argv.iter().map(|s| s.to_string()).collect());

        let scripted = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();

        match scripted {
            Some(MockResponse::Success(out)) => Ok(out),
            Some(MockResponse::Failure { code, stderr }) => Err(StorageError::ExternalCommand {
                context: format!(
                    "{} exited with code {}",
                    argv.first().copied().unwrap_or(""),
                    code
                ),
                output: stderr,
            }),
            None => Ok(CommandOutput {
                code: 0,
                stdout: String::new(),
                stderr: String::new(),
            }),
        }
    }
}

/// Cluster transport double: scripted per-node validation failures and
/// recorded broadcasts.
pub struct MockCluster {
    hostname: String,
    coordinator: bool,
    failing_nodes: Mutex<Vec<String>>,
    broadcasts: Mutex<Vec<(Vec<String>, ValidationTask)>>,
}

impl MockCluster {
    /// Create a coordinator cluster handle with the given local hostname.
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            coordinator: true,
            failing_nodes: Mutex::new(Vec::new()),
            broadcasts: Mutex::new(Vec::new()),
        }
    }

    /// Mark this node as a non-coordinator.
    pub fn non_coordinator(mut self) -> Self {
        self.coordinator = false;
        self
    }

    /// Script remote validation to fail on the given node.
    pub fn fail_on_node(&self, node: impl Into<String>) {
        self.failing_nodes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(node.into());
    }

    /// All recorded broadcasts: addressed nodes plus the task sent.
    pub fn broadcasts(&self) -> Vec<(Vec<String>, ValidationTask)> {
        self.broadcasts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl Cluster for MockCluster {
    fn local_hostname(&self) -> String {
        self.hostname.clone()
    }

    fn is_coordinator(&self) -> bool {
        self.coordinator
    }

    async fn validate_on_nodes(&self, nodes: &[String], task: ValidationTask) -> Result<()> {
        self.broadcasts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((nodes.to_vec(), task.clone()));

        let failing = self
            .failing_nodes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for node in nodes {
            if failing.contains(node) {
                // Remote validation errors surface as the coordinator's own.
                return Err(StorageError::InsufficientSpace {
                    requested_mb: task.size_mb,
                    available_mb: 0,
                    node: node.clone(),
                });
            }
        }
        Ok(())
    }
}

/// In-memory VM lifecycle double.
#[derive(Debug, Clone)]
pub struct MockVm {
    name: String,
    storage_type: Option<StorageType>,
    nodes: Vec<String>,
    attached_disks: Vec<u8>,
    stopped: bool,
    clone_parent: Option<String>,
    clone_children: Vec<String>,
}

impl MockVm {
    /// Create a stopped VM placed on `node1` with no disks.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            storage_type: None,
            nodes: vec!["node1".to_string()],
            attached_disks: Vec::new(),
            stopped: true,
            clone_parent: None,
            clone_children: Vec::new(),
        }
    }

    /// Set the persisted storage type.
    pub fn with_storage_type(mut self, storage_type: StorageType) -> Self {
        self.storage_type = Some(storage_type);
        self
    }

    /// Set the VM's node placement.
    pub fn with_nodes(mut self, nodes: Vec<String>) -> Self {
        self.nodes = nodes;
        self
    }

    /// Set the already-attached disk ids.
    pub fn with_attached_disks(mut self, disks: Vec<u8>) -> Self {
        self.attached_disks = disks;
        self
    }

    /// Set the run state.
    pub fn with_stopped(mut self, stopped: bool) -> Self {
        self.stopped = stopped;
        self
    }

    /// Mark this VM as a clone of `parent`.
    pub fn with_clone_parent(mut self, parent: impl Into<String>) -> Self {
        self.clone_parent = Some(parent.into());
        self
    }

    /// Record VMs cloned from this one.
    pub fn with_clone_children(mut self, children: Vec<String>) -> Self {
        self.clone_children = children;
        self
    }
}

impl VirtualMachine for MockVm {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn storage_type(&self) -> Option<StorageType> {
        self.storage_type
    }

    fn available_nodes(&self) -> Vec<String> {
        self.nodes.clone()
    }

    fn attached_disk_ids(&self) -> Vec<u8> {
        self.attached_disks.clone()
    }

    fn is_stopped(&self) -> bool {
        self.stopped
    }

    fn clone_parent(&self) -> Option<String> {
        self.clone_parent.clone()
    }

    fn clone_children(&self) -> Vec<String> {
        self.clone_children.clone()
    }
}
