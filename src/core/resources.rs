use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::core::vm::VirtualMachine;
use crate::errors::{VmError, VmResult};
use crate::storage::{DiskDriver, StorageType};
use crate::store::{ConfigStore, HardDriveRecord, NetworkInterfaceRecord, VmRecord};

pub trait HardDriveFactory: Send + Sync {
    fn create(
        &self,
        vm: &VirtualMachine,
        size: u64,
        storage_type: Option<StorageType>,
        driver: Option<DiskDriver>,
    ) -> VmResult<()>;
}

pub trait NetworkAdapterFactory: Send + Sync {
    fn create(&self, vm: &VirtualMachine, network: &str) -> VmResult<()>;
}

/// Attaches hard drives by recording them in the VM configuration; the
/// block devices themselves are provisioned by the storage backend.
pub struct RecordedHardDrives {
    store: Arc<dyn ConfigStore>,
}

impl RecordedHardDrives {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self { store }
    }
}

impl HardDriveFactory for RecordedHardDrives {
    fn create(
        &self,
        vm: &VirtualMachine,
        size: u64,
        storage_type: Option<StorageType>,
        driver: Option<DiskDriver>,
    ) -> VmResult<()> {
        let storage_type = storage_type.unwrap_or(StorageType::Local);
        let driver = driver.unwrap_or_default();
        let message = format!("Added {} hard drive of size {} to VM '{}'", storage_type, size, vm.name());

        self.store.update_vm_record(vm.name(), &message, &mut |record: &mut VmRecord| {
            let id = record.hard_drives.iter().map(|d| d.id).max().unwrap_or(0) + 1;
            record.hard_drives.push(HardDriveRecord {
                id,
                size,
                storage_type,
                driver,
            });
            Ok(())
        })?;

        info!(vm = %vm.name(), size, %storage_type, "Hard drive attached");
        Ok(())
    }
}

/// Adds interfaces on known networks with a generated MAC address.
pub struct RecordedNetworkAdapters {
    store: Arc<dyn ConfigStore>,
    networks: BTreeSet<String>,
}

impl RecordedNetworkAdapters {
    pub fn new(store: Arc<dyn ConfigStore>, networks: impl IntoIterator<Item = String>) -> Self {
        Self {
            store,
            networks: networks.into_iter().collect(),
        }
    }
}

impl NetworkAdapterFactory for RecordedNetworkAdapters {
    fn create(&self, vm: &VirtualMachine, network: &str) -> VmResult<()> {
        if !self.networks.contains(network) {
            return Err(VmError::NetworkNotFound {
                name: network.to_string(),
            });
        }

        let mac_address = generate_mac();
        let message = format!("Added network interface on '{}' to VM '{}'", network, vm.name());
        self.store.update_vm_record(vm.name(), &message, &mut |record: &mut VmRecord| {
            record.network_interfaces.push(NetworkInterfaceRecord {
                network: network.to_string(),
                mac_address: mac_address.clone(),
            });
            Ok(())
        })?;

        info!(vm = %vm.name(), network, mac = %mac_address, "Network adapter attached");
        Ok(())
    }
}

// QEMU's locally administered prefix.
fn generate_mac() -> String {
    let random = Uuid::new_v4();
    let bytes = random.as_bytes();
    format!("52:54:00:{:02x}:{:02x}:{:02x}", bytes[0], bytes[1], bytes[2])
}
