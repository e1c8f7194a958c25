//! Wires a node together from settings and serves its API.

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use crate::api::{create_router, AppState};
use crate::auth::RolePermissions;
use crate::cluster::{HttpTransport, PeerNode, StaticCluster};
use crate::config::{PeerSettings, Settings};
use crate::core::factory::{Collaborators, VmFactory};
use crate::core::hypervisor::{Hypervisor, InMemoryHypervisor};
#[cfg(feature = "libvirt")]
use crate::core::libvirt::LibvirtHypervisor;
use crate::core::resources::{RecordedHardDrives, RecordedNetworkAdapters};
use crate::storage::StaticReplicatedStorage;
use crate::store::{ConfigStore, FileConfigStore};

impl From<&PeerSettings> for PeerNode {
    fn from(peer: &PeerSettings) -> Self {
        PeerNode {
            name: peer.name.clone(),
            address: peer.address.clone(),
        }
    }
}

pub fn build_node(settings: &Settings) -> anyhow::Result<Arc<VmFactory>> {
    let store: Arc<dyn ConfigStore> = Arc::new(
        FileConfigStore::open(&settings.node.data_dir)
            .with_context(|| format!("cannot open data dir {}", settings.node.data_dir.display()))?,
    );

    let hypervisor = build_hypervisor(settings)?;

    let transport = HttpTransport::new(
        settings.auth.jwt_secret.clone(),
        settings.cluster.rpc_timeout(),
        settings.auth.token_ttl(),
    )
    .context("cannot build cluster transport")?;

    let cluster = StaticCluster::new(
        settings.node.hostname.clone(),
        settings.cluster.master,
        settings.cluster.initialised,
        settings.cluster.peers.iter().map(PeerNode::from).collect(),
        Arc::new(transport),
    );

    let factory = VmFactory::new(Collaborators {
        hard_drives: Arc::new(RecordedHardDrives::new(store.clone())),
        network_adapters: Arc::new(RecordedNetworkAdapters::new(
            store.clone(),
            settings.storage.networks.iter().cloned(),
        )),
        store,
        hypervisor,
        cluster: Arc::new(cluster),
        permissions: Arc::new(RolePermissions::new()),
        replicated_storage: Arc::new(StaticReplicatedStorage::new(settings.storage.replicated_enabled)),
    });

    Ok(Arc::new(factory))
}

#[cfg(feature = "libvirt")]
fn build_hypervisor(settings: &Settings) -> anyhow::Result<Arc<dyn Hypervisor>> {
    if settings.libvirt.dry_run {
        info!("Hypervisor running in dry-run mode");
        return Ok(Arc::new(InMemoryHypervisor::new()));
    }
    info!(uri = %settings.libvirt.connection_uri, "Using libvirt hypervisor");
    Ok(Arc::new(LibvirtHypervisor::new(settings.libvirt.connection_uri.clone())))
}

#[cfg(not(feature = "libvirt"))]
fn build_hypervisor(settings: &Settings) -> anyhow::Result<Arc<dyn Hypervisor>> {
    if !settings.libvirt.dry_run {
        anyhow::bail!("libvirt.dry_run is false but this binary was built without the `libvirt` feature");
    }
    info!("Hypervisor running in dry-run mode");
    Ok(Arc::new(InMemoryHypervisor::new()))
}

pub async fn run_server(settings: Settings, port: u16) -> anyhow::Result<()> {
    let factory = build_node(&settings)?;
    let state = Arc::new(AppState::new(factory, settings.auth.jwt_secret.clone()));
    let app = create_router(state, &settings.rate_limits);

    let addr: SocketAddr = format!("{}:{}", settings.server.host, port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", settings.server.host, port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot bind {}", addr))?;

    info!(
        node = %settings.node.hostname,
        master = settings.cluster.master,
        peers = settings.cluster.peers.len(),
        "🚀 Server listening on {}",
        addr
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::generate_default_config;

    #[test]
    fn dry_run_builds_an_in_memory_hypervisor() {
        let settings = generate_default_config();
        let hypervisor = build_hypervisor(&settings).unwrap();
        assert!(hypervisor.list_domain_names().unwrap().is_empty());
    }

    #[cfg(not(feature = "libvirt"))]
    #[test]
    fn real_hypervisor_requires_the_libvirt_feature() {
        let mut settings = generate_default_config();
        settings.libvirt.dry_run = false;
        let err = build_hypervisor(&settings).err().unwrap();
        assert!(err.to_string().contains("libvirt"));
    }
}
