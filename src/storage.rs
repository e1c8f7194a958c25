use serde::{Deserialize, Serialize};
use std::fmt;

/// Mirrored storage always pairs exactly two nodes.
pub const REPLICATION_FACTOR: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Local,
    Replicated,
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageType::Local => write!(f, "local"),
            StorageType::Replicated => write!(f, "replicated"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskDriver {
    #[default]
    Virtio,
    Ide,
    Scsi,
}

/// The replicated block-storage subsystem as seen from this node.
pub trait ReplicatedStorage: Send + Sync {
    fn is_enabled_locally(&self) -> bool;
}

/// Replication availability fixed at startup from settings.
#[derive(Debug, Clone, Copy)]
pub struct StaticReplicatedStorage {
    enabled: bool,
}

impl StaticReplicatedStorage {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

impl ReplicatedStorage for StaticReplicatedStorage {
    fn is_enabled_locally(&self) -> bool {
        self.enabled
    }
}
