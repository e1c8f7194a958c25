use std::fs;
use tracing::{debug, error, info};
use virt::connect::Connect;
use virt::domain::Domain;
use virt::sys;

use crate::core::hypervisor::{DomainDefinition, Hypervisor};
use crate::core::vm::PowerState;
use crate::errors::{VmError, VmResult};

const DOMAIN_XML_FILE: &str = "domain.xml";

/// libvirt through its C bindings. A connection is opened per call, so the
/// hypervisor can be shared across threads without pinning one handle.
pub struct LibvirtHypervisor {
    connection_uri: String,
}

impl LibvirtHypervisor {
    pub fn new(connection_uri: impl Into<String>) -> Self {
        Self {
            connection_uri: connection_uri.into(),
        }
    }

    fn connect(&self) -> VmResult<Connect> {
        Connect::open(Some(self.connection_uri.as_str())).map_err(|e| {
            error!(uri = %self.connection_uri, "Failed to connect to libvirt: {}", e);
            VmError::Hypervisor(format!("cannot connect to {}: {}", self.connection_uri, e))
        })
    }
}

pub(crate) fn domain_xml(definition: &DomainDefinition) -> String {
    format!(
        r#"<domain type='kvm'>
  <name>{}</name>
  <memory unit='b'>{}</memory>
  <vcpu placement='static'>{}</vcpu>
  <os>
    <type arch='x86_64' machine='pc-q35-7.0'>hvm</type>
    <boot dev='hd'/>
  </os>
</domain>
"#,
        definition.name, definition.memory_allocation, definition.cpu_cores
    )
}

fn power_state_of(state: sys::virDomainState) -> PowerState {
    match state {
        sys::VIR_DOMAIN_RUNNING | sys::VIR_DOMAIN_BLOCKED | sys::VIR_DOMAIN_SHUTDOWN => PowerState::Running,
        sys::VIR_DOMAIN_SHUTOFF | sys::VIR_DOMAIN_CRASHED => PowerState::Stopped,
        sys::VIR_DOMAIN_PAUSED | sys::VIR_DOMAIN_PMSUSPENDED => PowerState::Paused,
        _ => PowerState::Unknown,
    }
}

impl Hypervisor for LibvirtHypervisor {
    fn list_domain_names(&self) -> VmResult<Vec<String>> {
        let conn = self.connect()?;
        let domains = conn
            .list_all_domains(0)
            .map_err(|e| VmError::Hypervisor(format!("cannot list domains: {}", e)))?;

        domains
            .iter()
            .map(|domain| {
                domain
                    .get_name()
                    .map_err(|e| VmError::Hypervisor(format!("cannot read domain name: {}", e)))
            })
            .collect()
    }

    fn define_domain(&self, definition: &DomainDefinition) -> VmResult<()> {
        let xml = domain_xml(definition);
        fs::create_dir_all(&definition.directory)?;
        fs::write(definition.directory.join(DOMAIN_XML_FILE), &xml)?;

        let conn = self.connect()?;
        Domain::define_xml(&conn, &xml).map_err(|e| {
            error!(vm = %definition.name, "Failed to define domain: {}", e);
            VmError::Hypervisor(format!("cannot define domain '{}': {}", definition.name, e))
        })?;

        info!(vm = %definition.name, "Domain defined in libvirt");
        Ok(())
    }

    fn power_state(&self, name: &str) -> PowerState {
        let state = self.connect().ok().and_then(|conn| {
            Domain::lookup_by_name(&conn, name)
                .and_then(|domain| domain.get_state())
                .map_err(|e| debug!(vm = %name, "Domain state unavailable: {}", e))
                .ok()
        });

        match state {
            Some((state, _reason)) => power_state_of(state),
            None => PowerState::Unknown,
        }
    }
}
