#![allow(dead_code)]

use async_trait::async_trait;
use rand::Rng;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, RwLock, Weak};
use tempfile::TempDir;

use cluster_vm_manager::auth::{Principal, Role, RolePermissions};
use cluster_vm_manager::cluster::{NodeTransport, PeerNode, RemoteFailure, RemoteOperation, RemoteOutcome, StaticCluster};
use cluster_vm_manager::core::hypervisor::InMemoryHypervisor;
use cluster_vm_manager::core::resources::{RecordedHardDrives, RecordedNetworkAdapters};
use cluster_vm_manager::core::{Collaborators, VmFactory};
use cluster_vm_manager::storage::StaticReplicatedStorage;
use cluster_vm_manager::store::{ConfigStore, FileConfigStore};

pub const MASTER: &str = "node-a";

/// Delivers cluster RPCs straight to another in-process `VmFactory`.
#[derive(Default)]
pub struct LoopbackTransport {
    nodes: RwLock<BTreeMap<String, Weak<VmFactory>>>,
    offline: RwLock<HashSet<String>>,
}

impl LoopbackTransport {
    pub fn attach(&self, name: &str, factory: &Arc<VmFactory>) {
        self.nodes
            .write()
            .unwrap()
            .insert(name.to_string(), Arc::downgrade(factory));
    }

    pub fn set_offline(&self, name: &str) {
        self.offline.write().unwrap().insert(name.to_string());
    }

    fn target(&self, name: &str) -> Option<Arc<VmFactory>> {
        if self.offline.read().unwrap().contains(name) {
            return None;
        }
        self.nodes.read().unwrap().get(name).and_then(Weak::upgrade)
    }
}

#[async_trait]
impl NodeTransport for LoopbackTransport {
    async fn call(&self, peer: &PeerNode, operation: &RemoteOperation) -> Result<RemoteOutcome, RemoteFailure> {
        let factory = self
            .target(&peer.name)
            .ok_or_else(|| RemoteFailure::unreachable(format!("{} unreachable: connection refused", peer.name)))?;

        factory
            .handle_remote(&Principal::cluster(), operation.clone())
            .await
            .map_err(|e| RemoteFailure::from(&e))
    }
}

pub struct TestNode {
    pub name: String,
    pub factory: Arc<VmFactory>,
    pub store: Arc<FileConfigStore>,
    pub hypervisor: Arc<InMemoryHypervisor>,
    pub dir: TempDir,
}

impl TestNode {
    pub fn vm_names(&self) -> Vec<String> {
        self.store.vm_names().unwrap()
    }
}

#[derive(Debug, Clone)]
pub struct ClusterOptions {
    pub initialised: bool,
    pub replicated_enabled: bool,
    pub networks: Vec<String>,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            initialised: true,
            replicated_enabled: true,
            networks: vec!["default".to_string()],
        }
    }
}

/// Several nodes in one process. The first node is the master.
pub struct TestCluster {
    pub nodes: BTreeMap<String, TestNode>,
    pub transport: Arc<LoopbackTransport>,
}

impl TestCluster {
    pub fn new(names: &[&str]) -> Self {
        Self::with_options(names, ClusterOptions::default())
    }

    pub fn single() -> Self {
        Self::new(&[MASTER])
    }

    pub fn with_options(names: &[&str], options: ClusterOptions) -> Self {
        let transport = Arc::new(LoopbackTransport::default());
        let peers: Vec<PeerNode> = names
            .iter()
            .map(|name| PeerNode {
                name: name.to_string(),
                address: format!("loopback://{}", name),
            })
            .collect();

        let mut nodes = BTreeMap::new();
        for (index, name) in names.iter().enumerate() {
            let dir = tempfile::tempdir().unwrap();
            let store = Arc::new(FileConfigStore::open(dir.path()).unwrap());
            let hypervisor = Arc::new(InMemoryHypervisor::new());
            let shared_store: Arc<dyn ConfigStore> = store.clone();

            let cluster = StaticCluster::new(
                *name,
                index == 0,
                options.initialised,
                peers.clone(),
                transport.clone(),
            );

            let factory = Arc::new(VmFactory::new(Collaborators {
                store: shared_store.clone(),
                hypervisor: hypervisor.clone(),
                cluster: Arc::new(cluster),
                permissions: Arc::new(RolePermissions::new()),
                replicated_storage: Arc::new(StaticReplicatedStorage::new(options.replicated_enabled)),
                hard_drives: Arc::new(RecordedHardDrives::new(shared_store.clone())),
                network_adapters: Arc::new(RecordedNetworkAdapters::new(
                    shared_store,
                    options.networks.iter().cloned(),
                )),
            }));

            transport.attach(name, &factory);
            nodes.insert(
                name.to_string(),
                TestNode {
                    name: name.to_string(),
                    factory,
                    store,
                    hypervisor,
                    dir,
                },
            );
        }

        Self { nodes, transport }
    }

    pub fn node(&self, name: &str) -> &TestNode {
        &self.nodes[name]
    }

    pub fn master(&self) -> &TestNode {
        self.node(MASTER)
    }
}

pub fn admin() -> Principal {
    Principal::new("admin", Role::Admin)
}

pub fn viewer() -> Principal {
    Principal::new("auditor", Role::Viewer)
}

pub fn unique_name(prefix: &str) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(1000..9999);
    format!("{}-{}", prefix, suffix)
}
