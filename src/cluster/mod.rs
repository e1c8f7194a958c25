//! Cluster membership and typed fan-out to remote nodes.

pub mod transport;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::errors::{VmError, VmResult};

pub use transport::{HttpTransport, NodeTransport};

/// Operations a node can ask a peer to perform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RemoteOperation {
    /// Materialise an already-validated VM configuration on the peer. Carries
    /// no disk or network payload; those are only provisioned by the master.
    CreateVm {
        name: String,
        cpu_cores: u32,
        memory_allocation: u64,
        node: String,
        available_nodes: Vec<String>,
    },
    /// Live hypervisor domain list of `node`.
    ListVmNames { node: String },
}

impl RemoteOperation {
    pub fn name(&self) -> &'static str {
        match self {
            RemoteOperation::CreateVm { .. } => "create_vm",
            RemoteOperation::ListVmNames { .. } => "list_vm_names",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RemoteOutcome {
    Created { name: String },
    VmNames { names: Vec<String> },
}

/// Why a single node failed to execute a remote operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteFailure {
    /// `VmError::kind` of the remote error, when the peer answered at all.
    pub kind: Option<String>,
    pub message: String,
}

impl RemoteFailure {
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self {
            kind: None,
            message: message.into(),
        }
    }
}

impl From<&VmError> for RemoteFailure {
    fn from(err: &VmError) -> Self {
        Self {
            kind: Some(err.kind().to_string()),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for RemoteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            Some(kind) => write!(f, "{}: {}", kind, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Per-node outcome of a fan-out, keyed by hostname.
#[derive(Debug, Default)]
pub struct FanOutReport {
    operation: String,
    results: BTreeMap<String, Result<RemoteOutcome, RemoteFailure>>,
}

impl FanOutReport {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            results: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, node: impl Into<String>, result: Result<RemoteOutcome, RemoteFailure>) {
        self.results.insert(node.into(), result);
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn succeeded(&self) -> Vec<String> {
        self.results
            .iter()
            .filter(|(_, r)| r.is_ok())
            .map(|(node, _)| node.clone())
            .collect()
    }

    pub fn failed(&self) -> BTreeMap<String, String> {
        self.results
            .iter()
            .filter_map(|(node, r)| r.as_ref().err().map(|f| (node.clone(), f.to_string())))
            .collect()
    }

    /// Removes and returns the result for a single node.
    pub fn take(&mut self, node: &str) -> Option<Result<RemoteOutcome, RemoteFailure>> {
        self.results.remove(node)
    }

    /// All outcomes, or `RemoteOperationFailed` naming which nodes
    /// succeeded and which failed.
    pub fn into_result(self) -> VmResult<BTreeMap<String, RemoteOutcome>> {
        let failed = self.failed();
        if !failed.is_empty() {
            return Err(VmError::RemoteOperationFailed {
                succeeded: self.succeeded(),
                operation: self.operation,
                failed,
            });
        }

        Ok(self
            .results
            .into_iter()
            .filter_map(|(node, r)| r.ok().map(|outcome| (node, outcome)))
            .collect())
    }
}

/// This node's view of the cluster.
#[async_trait]
pub trait Cluster: Send + Sync {
    fn local_node(&self) -> &str;

    /// Known members, sorted. The local node is only included on request.
    fn members(&self, include_self: bool) -> Vec<String>;

    fn is_master(&self) -> bool;

    /// False while the node runs with clustering disabled/ignored.
    fn is_initialised(&self) -> bool;

    /// Runs `operation` on `nodes` (every remote member when `None`)
    /// concurrently and collects one result per node.
    async fn fan_out(&self, operation: &RemoteOperation, nodes: Option<&[String]>) -> FanOutReport;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerNode {
    pub name: String,
    pub address: String,
}

/// Membership fixed from settings; calls go through a `NodeTransport`.
pub struct StaticCluster {
    local_node: String,
    master: bool,
    initialised: bool,
    peers: BTreeMap<String, PeerNode>,
    transport: Arc<dyn NodeTransport>,
}

impl StaticCluster {
    pub fn new(
        local_node: impl Into<String>,
        master: bool,
        initialised: bool,
        peers: Vec<PeerNode>,
        transport: Arc<dyn NodeTransport>,
    ) -> Self {
        let local_node = local_node.into();
        let peers = peers
            .into_iter()
            .filter(|peer| peer.name != local_node)
            .map(|peer| (peer.name.clone(), peer))
            .collect();

        Self {
            local_node,
            master,
            initialised,
            peers,
            transport,
        }
    }
}

#[async_trait]
impl Cluster for StaticCluster {
    fn local_node(&self) -> &str {
        &self.local_node
    }

    fn members(&self, include_self: bool) -> Vec<String> {
        let mut members: Vec<String> = self.peers.keys().cloned().collect();
        if include_self {
            members.push(self.local_node.clone());
            members.sort();
        }
        members
    }

    fn is_master(&self) -> bool {
        self.master
    }

    fn is_initialised(&self) -> bool {
        self.initialised
    }

    async fn fan_out(&self, operation: &RemoteOperation, nodes: Option<&[String]>) -> FanOutReport {
        let targets: Vec<String> = match nodes {
            Some(nodes) => nodes.to_vec(),
            None => self.peers.keys().cloned().collect(),
        };

        debug!(op = operation.name(), nodes = ?targets, "Fanning out remote operation");

        let calls = targets.into_iter().map(|node| async move {
            let result = match self.peers.get(&node) {
                Some(peer) => self.transport.call(peer, operation).await,
                None => Err(RemoteFailure::unreachable(format!(
                    "node '{}' is not a member of this cluster",
                    node
                ))),
            };
            (node, result)
        });

        let mut report = FanOutReport::new(operation.name());
        for (node, result) in join_all(calls).await {
            if let Err(failure) = &result {
                warn!(op = operation.name(), node = %node, error = %failure, "Remote operation failed");
            }
            report.insert(node, result);
        }
        report
    }
}
