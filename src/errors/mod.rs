use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

use crate::auth::Permission;

/// Everything that can go wrong while provisioning or inventorying VMs.
///
/// Validation variants are raised before any state is touched and are safe
/// to retry once the input is fixed. Anything raised after the mutation
/// sequence has started is not rolled back.
#[derive(Error, Debug)]
pub enum VmError {
    #[error("Invalid VM name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("VM '{name}' already exists")]
    AlreadyExists { name: String },

    #[error("VM '{name}' does not exist")]
    NotFound { name: String },

    #[error("Invalid resource allocation for VM '{name}': {reason}")]
    InvalidAllocation { name: String, reason: String },

    #[error("VMs cannot be created whilst the cluster is not initialised on node '{node}'")]
    ClusterNotReady { node: String },

    #[error("Replicated storage is not enabled on node '{node}'")]
    StorageUnavailable { node: String },

    #[error("VM directory already exists: {}", .path.display())]
    DirectoryConflict { name: String, path: PathBuf },

    #[error("Exactly {expected} nodes must be specified for replicated storage (got {actual})")]
    InvalidNodeCount { expected: usize, actual: usize },

    #[error("Node '{node}' does not exist")]
    UnknownNode { node: String },

    #[error("Invalid nodes: {reason}")]
    InvalidNodes { reason: String },

    #[error("Permission denied: user '{user}' does not have the {permission} permission")]
    PermissionDenied { user: String, permission: Permission },

    #[error(
        "Remote operation '{operation}' failed on {}: {}",
        join_nodes(.failed),
        join_failures(.failed)
    )]
    RemoteOperationFailed {
        operation: String,
        succeeded: Vec<String>,
        failed: BTreeMap<String, String>,
    },

    #[error("Network '{name}' does not exist")]
    NetworkNotFound { name: String },

    #[error("Hypervisor error: {0}")]
    Hypervisor(String),

    #[error("Configuration store error: {0}")]
    Store(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type VmResult<T> = Result<T, VmError>;

impl VmError {
    /// Stable identifier used on the wire (HTTP bodies and cluster RPC).
    pub fn kind(&self) -> &'static str {
        match self {
            VmError::InvalidName { .. } => "invalid_name",
            VmError::AlreadyExists { .. } => "already_exists",
            VmError::NotFound { .. } => "not_found",
            VmError::InvalidAllocation { .. } => "invalid_allocation",
            VmError::ClusterNotReady { .. } => "cluster_not_ready",
            VmError::StorageUnavailable { .. } => "storage_unavailable",
            VmError::DirectoryConflict { .. } => "directory_conflict",
            VmError::InvalidNodeCount { .. } => "invalid_node_count",
            VmError::UnknownNode { .. } => "unknown_node",
            VmError::InvalidNodes { .. } => "invalid_nodes",
            VmError::PermissionDenied { .. } => "permission_denied",
            VmError::RemoteOperationFailed { .. } => "remote_operation_failed",
            VmError::NetworkNotFound { .. } => "network_not_found",
            VmError::Hypervisor(_) => "hypervisor",
            VmError::Store(_) => "store",
            VmError::Io(_) => "io",
            VmError::Serialization(_) => "serialization",
        }
    }

    /// True for failures detected before any mutation happened.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            VmError::InvalidName { .. }
                | VmError::AlreadyExists { .. }
                | VmError::InvalidAllocation { .. }
                | VmError::ClusterNotReady { .. }
                | VmError::StorageUnavailable { .. }
                | VmError::DirectoryConflict { .. }
                | VmError::InvalidNodeCount { .. }
                | VmError::UnknownNode { .. }
                | VmError::InvalidNodes { .. }
                | VmError::PermissionDenied { .. }
        )
    }

    pub(crate) fn invalid_name(name: &str, reason: impl Into<String>) -> Self {
        VmError::InvalidName {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

fn join_nodes(failed: &BTreeMap<String, String>) -> String {
    failed.keys().map(String::as_str).collect::<Vec<_>>().join(", ")
}

fn join_failures(failed: &BTreeMap<String, String>) -> String {
    failed
        .iter()
        .map(|(node, reason)| format!("[{}] {}", node, reason))
        .collect::<Vec<_>>()
        .join("; ")
}
