use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::RwLock;

use crate::core::vm::PowerState;
use crate::errors::{VmError, VmResult};

/// What the hypervisor needs to define a domain.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainDefinition {
    pub name: String,
    pub cpu_cores: u32,
    /// Bytes.
    pub memory_allocation: u64,
    /// The VM's private directory; file-based hypervisors keep their domain
    /// description here.
    pub directory: PathBuf,
}

pub trait Hypervisor: Send + Sync {
    fn list_domain_names(&self) -> VmResult<Vec<String>>;
    fn define_domain(&self, definition: &DomainDefinition) -> VmResult<()>;
    fn power_state(&self, name: &str) -> PowerState;
}

/// Runs hypervisor calls on tokio's blocking pool; libvirt calls block on
/// the daemon and must stay off the async workers.
pub(crate) async fn blocking<T, F>(call: F) -> VmResult<T>
where
    F: FnOnce() -> VmResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(call)
        .await
        .map_err(|e| VmError::Hypervisor(format!("hypervisor task failed: {}", e)))?
}

/// Keeps domains in memory. Used for dry runs and tests.
#[derive(Debug, Default)]
pub struct InMemoryHypervisor {
    domains: RwLock<BTreeMap<String, (DomainDefinition, PowerState)>>,
}

impl InMemoryHypervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_power_state(&self, name: &str, state: PowerState) -> VmResult<()> {
        let mut domains = self
            .domains
            .write()
            .map_err(|_| VmError::Hypervisor("domain table poisoned".into()))?;
        match domains.get_mut(name) {
            Some((_, current)) => {
                *current = state;
                Ok(())
            }
            None => Err(VmError::Hypervisor(format!("no such domain: {}", name))),
        }
    }

    pub fn definition(&self, name: &str) -> Option<DomainDefinition> {
        self.domains
            .read()
            .ok()
            .and_then(|domains| domains.get(name).map(|(d, _)| d.clone()))
    }
}

impl Hypervisor for InMemoryHypervisor {
    fn list_domain_names(&self) -> VmResult<Vec<String>> {
        let domains = self
            .domains
            .read()
            .map_err(|_| VmError::Hypervisor("domain table poisoned".into()))?;
        Ok(domains.keys().cloned().collect())
    }

    fn define_domain(&self, definition: &DomainDefinition) -> VmResult<()> {
        let mut domains = self
            .domains
            .write()
            .map_err(|_| VmError::Hypervisor("domain table poisoned".into()))?;
        if domains.contains_key(&definition.name) {
            return Err(VmError::Hypervisor(format!(
                "domain '{}' already defined",
                definition.name
            )));
        }
        domains.insert(definition.name.clone(), (definition.clone(), PowerState::Stopped));
        Ok(())
    }

    fn power_state(&self, name: &str) -> PowerState {
        self.domains
            .read()
            .ok()
            .and_then(|domains| domains.get(name).map(|(_, state)| *state))
            .unwrap_or(PowerState::Unknown)
    }
}
