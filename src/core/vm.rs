use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::info;

use crate::core::hypervisor::{DomainDefinition, Hypervisor};
use crate::errors::VmResult;
use crate::store::{ConfigStore, VmRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    Running,
    Stopped,
    Paused,
    Unknown,
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PowerState::Running => "RUNNING",
            PowerState::Stopped => "STOPPED",
            PowerState::Paused => "PAUSED",
            PowerState::Unknown => "UNKNOWN",
        };
        f.write_str(label)
    }
}

/// Lightweight handle to a VM. Holds no state of its own: every accessor
/// goes back to the configuration store or the local hypervisor.
#[derive(Clone)]
pub struct VirtualMachine {
    name: String,
    local_node: String,
    store: Arc<dyn ConfigStore>,
    hypervisor: Arc<dyn Hypervisor>,
}

impl fmt::Debug for VirtualMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualMachine")
            .field("name", &self.name)
            .field("local_node", &self.local_node)
            .finish()
    }
}

impl VirtualMachine {
    pub(crate) fn new(
        name: impl Into<String>,
        local_node: impl Into<String>,
        store: Arc<dyn ConfigStore>,
        hypervisor: Arc<dyn Hypervisor>,
    ) -> Self {
        Self {
            name: name.into(),
            local_node: local_node.into(),
            store,
            hypervisor,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> VmResult<VmRecord> {
        self.store.vm_record(&self.name)
    }

    /// Hosting node, `None` while unregistered.
    pub fn node(&self) -> VmResult<Option<String>> {
        Ok(self.config()?.node)
    }

    /// Only VMs hosted here can be inspected; anything else is `Unknown`.
    pub fn power_state(&self) -> PowerState {
        match self.node() {
            Ok(Some(node)) if node == self.local_node => self.hypervisor.power_state(&self.name),
            _ => PowerState::Unknown,
        }
    }

    pub fn set_node(&self, node: &str) -> VmResult<()> {
        let message = format!("Set node for VM '{}' to '{}'", self.name, node);
        self.store.update_vm_record(&self.name, &message, &mut |record: &mut VmRecord| {
            record.node = Some(node.to_string());
            Ok(())
        })
    }

    /// Defines the domain on the local hypervisor. `set_node` records this
    /// node as the host; only a master can do that safely since the field
    /// change is not propagated from members.
    pub fn register(&self, set_node: bool) -> VmResult<()> {
        let record = self.config()?;
        self.hypervisor.define_domain(&DomainDefinition {
            name: self.name.clone(),
            cpu_cores: record.cpu_cores,
            memory_allocation: record.memory_allocation,
            directory: self.store.vm_dir(&self.name),
        })?;

        info!(vm = %self.name, node = %self.local_node, set_node, "Registered VM with hypervisor");

        if set_node {
            self.set_node(&self.local_node)?;
        }
        Ok(())
    }

    pub fn summary(&self) -> VmResult<VmSummary> {
        Ok(VmSummary {
            name: self.name.clone(),
            state: self.power_state(),
            node: self.node()?,
        })
    }
}

/// What the API and CLI show for a VM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmSummary {
    pub name: String,
    pub state: PowerState,
    pub node: Option<String>,
}
