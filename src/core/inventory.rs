use std::sync::Arc;
use tracing::debug;

use crate::cluster::{Cluster, RemoteOperation, RemoteOutcome};
use crate::core::hypervisor::{self, Hypervisor};
use crate::core::vm::{VirtualMachine, VmSummary};
use crate::errors::{VmError, VmResult};
use crate::store::ConfigStore;

const UNREGISTERED: &str = "Unregistered";

/// Read side: VM names and summaries, local or from a specific node.
#[derive(Clone)]
pub struct Inventory {
    store: Arc<dyn ConfigStore>,
    hypervisor: Arc<dyn Hypervisor>,
    cluster: Arc<dyn Cluster>,
}

impl Inventory {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        hypervisor: Arc<dyn Hypervisor>,
        cluster: Arc<dyn Cluster>,
    ) -> Self {
        Self {
            store,
            hypervisor,
            cluster,
        }
    }

    /// Builds a handle without checking that the VM exists.
    pub fn handle(&self, name: &str) -> VirtualMachine {
        VirtualMachine::new(
            name,
            self.cluster.local_node(),
            self.store.clone(),
            self.hypervisor.clone(),
        )
    }

    /// - `None`: the cluster-wide VM list from local configuration (no RPC)
    /// - the local hostname: the local hypervisor's domains
    /// - any other node: that node's domains, over the cluster transport
    pub async fn list_names(&self, node: Option<&str>) -> VmResult<Vec<String>> {
        match node {
            None => self.store.vm_names(),
            Some(node) if node == self.cluster.local_node() => {
                let local = self.hypervisor.clone();
                hypervisor::blocking(move || local.list_domain_names()).await
            }
            Some(node) => {
                debug!(node = %node, "Listing VMs on remote node");
                let operation = RemoteOperation::ListVmNames {
                    node: node.to_string(),
                };
                let mut outcomes = self
                    .cluster
                    .fan_out(&operation, Some(&[node.to_string()]))
                    .await
                    .into_result()?;

                match outcomes.remove(node) {
                    Some(RemoteOutcome::VmNames { names }) => Ok(names),
                    other => Err(VmError::Store(format!(
                        "unexpected reply from {} to list_vm_names: {:?}",
                        node, other
                    ))),
                }
            }
        }
    }

    pub fn list_all(&self) -> VmResult<Vec<VirtualMachine>> {
        Ok(self
            .store
            .vm_names()?
            .iter()
            .map(|name| self.handle(name))
            .collect())
    }

    pub fn summaries(&self) -> VmResult<Vec<VmSummary>> {
        self.list_all()?.iter().map(VirtualMachine::summary).collect()
    }

    pub fn render_table(&self) -> VmResult<String> {
        Ok(render_table(&self.summaries()?))
    }
}

/// Name / State / Node table with a header rule and vertical separators.
pub fn render_table(rows: &[VmSummary]) -> String {
    let header = ["Name", "State", "Node"];
    let cells: Vec<[String; 3]> = rows
        .iter()
        .map(|row| {
            [
                row.name.clone(),
                row.state.to_string(),
                row.node.clone().unwrap_or_else(|| UNREGISTERED.to_string()),
            ]
        })
        .collect();

    let mut widths = header.map(str::len);
    for row in &cells {
        for (width, cell) in widths.iter_mut().zip(row.iter()) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let line = |cols: [&str; 3]| -> String {
        cols.iter()
            .zip(widths.iter())
            .map(|(col, width)| format!("{:<width$}", col, width = *width))
            .collect::<Vec<_>>()
            .join(" | ")
            .trim_end()
            .to_string()
    };

    let mut out = vec![line(header)];
    out.push(
        widths
            .iter()
            .map(|w| "=".repeat(*w))
            .collect::<Vec<_>>()
            .join("=+="),
    );
    for row in &cells {
        out.push(line([row[0].as_str(), row[1].as_str(), row[2].as_str()]));
    }
    out.join("\n")
}
