/*
* VM Provisioning Orchestrator
* ----------------------------
* @project: cluster-vm-manager
*
* The single entry point for creating VMs. A creation is checked in full
* before anything is written, then committed step by step:
*
*   1. private directory
*   2. VM name appended to the cluster-wide VM list
*   3. per-VM configuration record
*   4. (master) mirror the VM to every other member
*   5. change history entry
*   6. hypervisor registration / hosting node
*   7. (master) hard drives and network adapters
*
* There is no two-phase commit: if step 4 fails on some member, the local
* commit stays in place and the error names the nodes that did and did not
* get the VM so an operator can repair the cluster by hand.
*
* Creations are serialised by the "vm-creation" lock so two callers cannot
* both pass the existence check for the same name.
*/

use std::fs;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::auth::{Permission, PermissionEngine, Principal};
use crate::cluster::{Cluster, RemoteOperation, RemoteOutcome};
use crate::core::hypervisor::{self, Hypervisor};
use crate::core::inventory::Inventory;
use crate::core::lock::NamedLocks;
use crate::core::registry::{validate_name, NameRegistry};
use crate::core::resources::{HardDriveFactory, NetworkAdapterFactory};
use crate::core::topology::{select_nodes, PlacementRequest};
use crate::core::vm::VirtualMachine;
use crate::errors::{VmError, VmResult};
use crate::storage::{DiskDriver, ReplicatedStorage, StorageType};
use crate::store::{ChangeRecord, ConfigStore, VmRecord};

pub const CREATION_LOCK: &str = "vm-creation";

/// Arguments of a VM creation.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateVmRequest {
    pub name: String,
    pub cpu_cores: u32,
    /// Bytes.
    pub memory_allocation: u64,
    /// One hard drive per size.
    pub hard_drives: Vec<u64>,
    /// One adapter per network name.
    pub network_interfaces: Vec<String>,
    /// Node to register the VM on; the local node when unset.
    pub node: Option<String>,
    /// Explicit storage nodes; defaults depend on the storage type.
    pub available_nodes: Vec<String>,
    pub storage_type: Option<StorageType>,
    pub hard_drive_driver: Option<DiskDriver>,
    pub require_auth: bool,
}

impl CreateVmRequest {
    pub fn new(name: impl Into<String>, cpu_cores: u32, memory_allocation: u64) -> Self {
        Self {
            name: name.into(),
            cpu_cores,
            memory_allocation,
            hard_drives: Vec::new(),
            network_interfaces: Vec::new(),
            node: None,
            available_nodes: Vec::new(),
            storage_type: None,
            hard_drive_driver: None,
            require_auth: true,
        }
    }

    pub fn with_hard_drives(mut self, sizes: Vec<u64>) -> Self {
        self.hard_drives = sizes;
        self
    }

    pub fn with_network_interfaces(mut self, networks: Vec<String>) -> Self {
        self.network_interfaces = networks;
        self
    }

    pub fn on_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    pub fn with_available_nodes(mut self, nodes: Vec<String>) -> Self {
        self.available_nodes = nodes;
        self
    }

    pub fn with_storage_type(mut self, storage_type: StorageType) -> Self {
        self.storage_type = Some(storage_type);
        self
    }

    pub fn with_hard_drive_driver(mut self, driver: DiskDriver) -> Self {
        self.hard_drive_driver = Some(driver);
        self
    }

    pub fn without_auth(mut self) -> Self {
        self.require_auth = false;
        self
    }
}

/// Role-specific parts of a creation, picked once per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CreationFlow {
    Master,
    Member,
}

impl CreationFlow {
    fn for_cluster(cluster: &dyn Cluster) -> Self {
        if cluster.is_master() {
            CreationFlow::Master
        } else {
            CreationFlow::Member
        }
    }

    /// The master mirrors new VMs to every member.
    fn replicates_to_members(self) -> bool {
        self == CreationFlow::Master
    }

    /// Only the master may write the hosting node; members cannot propagate
    /// that change.
    fn records_hosting_node(self) -> bool {
        self == CreationFlow::Master
    }

    /// Disks and adapters are created once, by the master, so the fan-out
    /// does not provision them twice.
    fn provisions_resources(self) -> bool {
        self == CreationFlow::Master
    }

    fn requires_local_storage_node(self) -> bool {
        self == CreationFlow::Master
    }
}

/// Every collaborator the orchestrator needs.
pub struct Collaborators {
    pub store: Arc<dyn ConfigStore>,
    pub hypervisor: Arc<dyn Hypervisor>,
    pub cluster: Arc<dyn Cluster>,
    pub permissions: Arc<dyn PermissionEngine>,
    pub replicated_storage: Arc<dyn ReplicatedStorage>,
    pub hard_drives: Arc<dyn HardDriveFactory>,
    pub network_adapters: Arc<dyn NetworkAdapterFactory>,
}

pub struct VmFactory {
    store: Arc<dyn ConfigStore>,
    cluster: Arc<dyn Cluster>,
    permissions: Arc<dyn PermissionEngine>,
    replicated_storage: Arc<dyn ReplicatedStorage>,
    hard_drives: Arc<dyn HardDriveFactory>,
    network_adapters: Arc<dyn NetworkAdapterFactory>,
    inventory: Inventory,
    registry: NameRegistry,
    locks: NamedLocks,
}

impl VmFactory {
    pub fn new(collaborators: Collaborators) -> Self {
        let inventory = Inventory::new(
            collaborators.store.clone(),
            collaborators.hypervisor.clone(),
            collaborators.cluster.clone(),
        );

        Self {
            store: collaborators.store,
            cluster: collaborators.cluster,
            permissions: collaborators.permissions,
            replicated_storage: collaborators.replicated_storage,
            hard_drives: collaborators.hard_drives,
            network_adapters: collaborators.network_adapters,
            registry: NameRegistry::new(inventory.clone()),
            inventory,
            locks: NamedLocks::new(),
        }
    }

    pub fn local_node(&self) -> &str {
        self.cluster.local_node()
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    pub fn registry(&self) -> &NameRegistry {
        &self.registry
    }

    pub fn get_by_name(&self, name: &str) -> VmResult<VirtualMachine> {
        if !self.store.vm_names()?.iter().any(|existing| existing == name) {
            return Err(VmError::NotFound {
                name: name.to_string(),
            });
        }
        Ok(self.inventory.handle(name))
    }

    pub fn change_history(&self, name: &str) -> VmResult<Vec<ChangeRecord>> {
        self.get_by_name(name)?;
        self.store.change_history(Some(name))
    }

    /// Creates a VM and returns its handle. See the module header for the
    /// commit sequence; validation failures leave no trace.
    pub async fn create(&self, caller: &Principal, request: CreateVmRequest) -> VmResult<VirtualMachine> {
        let _guard = self.locks.acquire(CREATION_LOCK).await;
        let flow = CreationFlow::for_cluster(self.cluster.as_ref());
        let local_node = self.cluster.local_node().to_string();
        let name = request.name.as_str();

        if request.require_auth {
            self.permissions.assert_permission(caller, Permission::CreateVm)?;
        }

        validate_name(name)?;
        validate_allocation(&request)?;

        if !self.cluster.is_initialised() {
            return Err(VmError::ClusterNotReady { node: local_node });
        }

        if self.registry.exists(name, None).await? {
            return Err(VmError::AlreadyExists {
                name: name.to_string(),
            });
        }

        let target_node = request.node.clone().unwrap_or_else(|| local_node.clone());

        if request.storage_type == Some(StorageType::Replicated) && !self.replicated_storage.is_enabled_locally() {
            return Err(VmError::StorageUnavailable { node: local_node });
        }

        let vm_dir = self.store.vm_dir(name);
        if vm_dir.exists() {
            return Err(VmError::DirectoryConflict {
                name: name.to_string(),
                path: vm_dir,
            });
        }

        let cluster_nodes = self.cluster.members(false);
        let nodes = select_nodes(&PlacementRequest {
            storage_type: request.storage_type,
            explicit_nodes: &request.available_nodes,
            local_node: &local_node,
            cluster_nodes: &cluster_nodes,
            require_local_node: flow.requires_local_storage_node(),
        })?;

        info!(vm = %name, nodes = ?nodes, target = %target_node, ?flow, "🖥️  Creating VM");

        // Nothing below is rolled back.
        fs::create_dir_all(&vm_dir)?;

        self.store.append_vm(
            name,
            &format!("Adding new VM '{}' to global cluster configuration", name),
        )?;

        self.store.create_vm_record(
            name,
            &VmRecord::new(nodes.clone(), request.cpu_cores, request.memory_allocation),
        )?;

        if flow.replicates_to_members() {
            self.replicate(&request, &target_node, &nodes).await?;
        }

        let vm = self.inventory.handle(name);
        self.store.record_change(name, &format!("Created VM '{}'", name))?;

        if target_node == local_node {
            let handle = vm.clone();
            let set_node = flow.records_hosting_node();
            hypervisor::blocking(move || handle.register(set_node)).await?;
        } else if flow.records_hosting_node() {
            vm.set_node(&target_node)?;
        }

        if flow.provisions_resources() {
            for size in &request.hard_drives {
                self.hard_drives
                    .create(&vm, *size, request.storage_type, request.hard_drive_driver)?;
            }
            for network in &request.network_interfaces {
                self.network_adapters.create(&vm, network)?;
            }
        }

        info!(vm = %name, "VM created");
        Ok(vm)
    }

    async fn replicate(&self, request: &CreateVmRequest, target_node: &str, nodes: &[String]) -> VmResult<()> {
        let members = self.cluster.members(false);
        if members.is_empty() {
            return Ok(());
        }

        let operation = RemoteOperation::CreateVm {
            name: request.name.clone(),
            cpu_cores: request.cpu_cores,
            memory_allocation: request.memory_allocation,
            node: target_node.to_string(),
            available_nodes: nodes.to_vec(),
        };

        let report = self.cluster.fan_out(&operation, None).await;
        let failed = report.failed();
        if !failed.is_empty() {
            error!(
                vm = %request.name,
                succeeded = ?report.succeeded(),
                failed = ?failed,
                "VM committed locally but not on every member; manual repair required"
            );
        }
        report.into_result().map(|_| ())
    }

    /// Executes an operation received from another node.
    pub async fn handle_remote(&self, caller: &Principal, operation: RemoteOperation) -> VmResult<RemoteOutcome> {
        self.permissions.assert_permission(caller, Permission::ClusterRpc)?;

        match operation {
            RemoteOperation::CreateVm {
                name,
                cpu_cores,
                memory_allocation,
                node,
                available_nodes,
            } => {
                let request = CreateVmRequest::new(name, cpu_cores, memory_allocation)
                    .on_node(node)
                    .with_available_nodes(available_nodes);
                let vm = self.create(caller, request).await?;
                Ok(RemoteOutcome::Created {
                    name: vm.name().to_string(),
                })
            }
            RemoteOperation::ListVmNames { node } => {
                if node != self.local_node() {
                    warn!(requested = %node, local = %self.local_node(), "Relaying VM listing for another node");
                }
                let names = self.inventory.list_names(Some(&node)).await?;
                Ok(RemoteOutcome::VmNames { names })
            }
        }
    }
}

fn validate_allocation(request: &CreateVmRequest) -> VmResult<()> {
    if request.cpu_cores == 0 {
        return Err(VmError::InvalidAllocation {
            name: request.name.clone(),
            reason: "at least one CPU core is required".into(),
        });
    }
    if request.memory_allocation == 0 {
        return Err(VmError::InvalidAllocation {
            name: request.name.clone(),
            reason: "memory allocation must be positive".into(),
        });
    }
    Ok(())
}
