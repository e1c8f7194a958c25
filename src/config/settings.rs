/*
* Configuration Management
* ------------------------
* @project: cluster-vm-manager
*
* Layered configuration, lowest to highest priority:
*
*   1. built-in defaults (`generate_default_config`)
*   2. config/default.toml
*   3. config/local.toml
*   4. environment variables, e.g. CVM__SERVER__PORT=8080
*
* The config directory can be moved with CONFIG_PATH. Both files are
* optional; a node with no files at all runs as a single-node master with a
* dry-run hypervisor.
*/

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

const ENV_PREFIX: &str = "CVM";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub node: NodeSettings,
    pub cluster: ClusterSettings,
    pub libvirt: LibvirtSettings,
    pub storage: StorageSettings,
    pub auth: AuthSettings,
    pub rate_limits: RateLimitSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSettings {
    /// Name of this node inside the cluster.
    pub hostname: String,
    /// Cluster configuration, VM records and history live here.
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSettings {
    pub master: bool,
    pub initialised: bool,
    #[serde(default)]
    pub peers: Vec<PeerSettings>,
    pub rpc_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerSettings {
    pub name: String,
    /// Base URL of the peer's API, e.g. http://node-b:3000
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibvirtSettings {
    pub connection_uri: String,
    /// Keep domains in memory instead of connecting to libvirt.
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    pub replicated_enabled: bool,
    #[serde(default)]
    pub networks: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    pub jwt_secret: String,
    pub token_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    pub api_requests_per_minute: u32,
    pub rpc_requests_per_minute: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            api_requests_per_minute: 100,
            rpc_requests_per_minute: 600,
        }
    }
}

impl ClusterSettings {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }
}

impl AuthSettings {
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config".to_string());

        info!("Loading configuration from path: {}", config_path);

        Config::builder()
            .add_source(Config::try_from(&generate_default_config())?)
            .add_source(File::with_name(&format!("{}/default", config_path)).required(false))
            .add_source(File::with_name(&format!("{}/local", config_path)).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator(ENV_SEPARATOR))
            .build()?
            .try_deserialize()
    }

    /// Defaults overlaid with a single, mandatory file.
    pub fn new_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!("Loading configuration from file: {}", path.display());

        Config::builder()
            .add_source(Config::try_from(&generate_default_config())?)
            .add_source(File::from(path))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator(ENV_SEPARATOR))
            .build()?
            .try_deserialize()
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

pub fn generate_default_config() -> Settings {
    Settings {
        server: ServerSettings {
            host: "127.0.0.1".to_string(),
            port: 3000,
        },
        node: NodeSettings {
            hostname: local_hostname(),
            data_dir: PathBuf::from("/var/lib/cluster-vm-manager"),
        },
        cluster: ClusterSettings {
            master: true,
            initialised: true,
            peers: Vec::new(),
            rpc_timeout_secs: 30,
        },
        libvirt: LibvirtSettings {
            connection_uri: "qemu:///system".to_string(),
            dry_run: true,
        },
        storage: StorageSettings {
            replicated_enabled: false,
            networks: vec!["default".to_string()],
        },
        auth: AuthSettings {
            jwt_secret: "change-me".to_string(),
            token_ttl_secs: 3600,
        },
        rate_limits: RateLimitSettings::default(),
    }
}

fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}
