pub mod factory;
pub mod hypervisor;
pub mod inventory;
#[cfg(feature = "libvirt")]
pub mod libvirt;
pub mod lock;
pub mod registry;
pub mod resources;
pub mod topology;
pub mod vm;

pub use factory::{Collaborators, CreateVmRequest, VmFactory, CREATION_LOCK};
pub use hypervisor::{DomainDefinition, Hypervisor, InMemoryHypervisor};
pub use inventory::{render_table, Inventory};
#[cfg(feature = "libvirt")]
pub use libvirt::LibvirtHypervisor;
pub use registry::{validate_name, NameRegistry};
pub use resources::{HardDriveFactory, NetworkAdapterFactory, RecordedHardDrives, RecordedNetworkAdapters};
pub use vm::{PowerState, VirtualMachine, VmSummary};
