//! Durable cluster and per-VM configuration.
//!
//! Components never touch the files directly: everything goes through the
//! narrow `ConfigStore` interface so a read-modify-write is always atomic
//! with respect to other readers and writers in this process.

pub mod file;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::errors::{VmError, VmResult};
use crate::storage::{DiskDriver, StorageType};

pub use file::{FileChangeLog, FileConfigStore};

/// Cluster-wide configuration shared by every node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub virtual_machines: Vec<String>,
    #[serde(default)]
    pub version: u64,
}

/// Per-VM durable record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmRecord {
    /// Nodes eligible to hold this VM's storage.
    pub nodes: Vec<String>,
    pub cpu_cores: u32,
    /// Memory in bytes.
    pub memory_allocation: u64,
    /// Node the VM is registered on, if any.
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub hard_drives: Vec<HardDriveRecord>,
    #[serde(default)]
    pub network_interfaces: Vec<NetworkInterfaceRecord>,
}

impl VmRecord {
    pub fn new(nodes: Vec<String>, cpu_cores: u32, memory_allocation: u64) -> Self {
        Self {
            nodes,
            cpu_cores,
            memory_allocation,
            node: None,
            hard_drives: Vec::new(),
            network_interfaces: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardDriveRecord {
    pub id: u32,
    pub size: u64,
    pub storage_type: StorageType,
    pub driver: DiskDriver,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkInterfaceRecord {
    pub network: String,
    pub mac_address: String,
}

/// One entry in the configuration change history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// `"cluster"` for global changes, otherwise the VM name.
    pub subject: String,
    pub message: String,
}

impl ChangeRecord {
    pub fn new(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            subject: subject.into(),
            message: message.into(),
        }
    }
}

pub const CLUSTER_SUBJECT: &str = "cluster";

/// Version-history hook invoked on every configuration change.
pub trait ChangeLog: Send + Sync {
    fn record(&self, entry: ChangeRecord) -> VmResult<()>;
    fn entries(&self, subject: Option<&str>) -> VmResult<Vec<ChangeRecord>>;
}

pub trait ConfigStore: Send + Sync {
    fn global_config(&self) -> VmResult<GlobalConfig>;

    /// Atomic read-modify-write of the cluster-wide configuration. Nothing is
    /// written if `update` fails.
    fn update_global(
        &self,
        message: &str,
        update: &mut dyn FnMut(&mut GlobalConfig) -> VmResult<()>,
    ) -> VmResult<()>;

    fn create_vm_record(&self, name: &str, record: &VmRecord) -> VmResult<()>;

    fn vm_record(&self, name: &str) -> VmResult<VmRecord>;

    fn update_vm_record(
        &self,
        name: &str,
        message: &str,
        update: &mut dyn FnMut(&mut VmRecord) -> VmResult<()>,
    ) -> VmResult<()>;

    /// Private directory reserved for the VM's files.
    fn vm_dir(&self, name: &str) -> PathBuf;

    fn record_change(&self, subject: &str, message: &str) -> VmResult<()>;

    fn change_history(&self, subject: Option<&str>) -> VmResult<Vec<ChangeRecord>>;

    fn vm_names(&self) -> VmResult<Vec<String>> {
        Ok(self.global_config()?.virtual_machines)
    }

    /// Appends `name` to the cluster VM list, refusing duplicates inside the
    /// same atomic update.
    fn append_vm(&self, name: &str, message: &str) -> VmResult<()> {
        self.update_global(message, &mut |config: &mut GlobalConfig| {
            if config.virtual_machines.iter().any(|existing| existing == name) {
                return Err(VmError::AlreadyExists {
                    name: name.to_string(),
                });
            }
            config.virtual_machines.push(name.to_string());
            Ok(())
        })
    }
}
