/*
* Command Line Interface
* ----------------------
* @project: cluster-vm-manager
*
* Command Structure:
* ---------------
* cluster-vm-manager
* ├── serve [--port]          // run the node daemon (API + cluster RPC)
* ├── init [--force]          // write config/default.toml
* └── vm                      // talk to the local daemon over HTTP
*     ├── create
*     ├── list
*     ├── names [--node]
*     ├── table
*     ├── info <name>
*     ├── exists <name> [--node]
*     ├── check-name <name>
*     └── history <name>
*
* `vm` commands authenticate with a token signed from the configured secret
* for --user / --role, so they only work where that secret is readable.
*/

pub mod client;

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing::{error, info};

use crate::api::routes::CreateVmBody;
use crate::auth::{Principal, Role};
use crate::config::Settings;
use crate::core::vm::PowerState;
use crate::storage::{DiskDriver, StorageType};
use client::ApiClient;

const BYTES_PER_MB: u64 = 1024 * 1024;
const BYTES_PER_GB: u64 = 1024 * BYTES_PER_MB;

#[derive(Parser)]
#[command(name = "cluster-vm-manager")]
#[command(about = "Cluster VM provisioning manager", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Daemon URL, defaults to the configured server address
    #[arg(long, global = true)]
    url: Option<String>,

    #[arg(long, global = true, default_value = "admin")]
    user: String,

    #[arg(long, global = true, default_value = "admin", value_parser = parse_role)]
    role: Role,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server
    Serve {
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Manage virtual machines
    Vm {
        #[command(subcommand)]
        command: VmCommands,
    },
    /// Generate default configuration
    Init {
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum VmCommands {
    /// Create a new virtual machine
    Create {
        #[arg(short, long)]
        name: String,
        #[arg(long, default_value_t = 1)]
        cpu: u32,
        #[arg(short, long, default_value_t = 1024)]
        memory_mb: u64,
        /// Hard drive size in GB, repeatable
        #[arg(long = "disk-gb")]
        disks: Vec<u64>,
        /// Network to attach, repeatable
        #[arg(long = "network")]
        networks: Vec<String>,
        /// Node to register the VM on
        #[arg(long)]
        node: Option<String>,
        /// Storage node, repeatable
        #[arg(long = "storage-node")]
        storage_nodes: Vec<String>,
        #[arg(long, value_parser = parse_storage_type)]
        storage: Option<StorageType>,
        #[arg(long, value_parser = parse_driver)]
        driver: Option<DiskDriver>,
    },
    /// List all virtual machines
    List,
    /// List VM names, cluster-wide or on one node
    Names {
        #[arg(long)]
        node: Option<String>,
    },
    /// Print the inventory table
    Table,
    /// Show a VM's configuration
    Info { name: String },
    /// Check whether a VM exists
    Exists {
        name: String,
        #[arg(long)]
        node: Option<String>,
    },
    /// Check that a name is valid and not taken
    CheckName { name: String },
    /// Show a VM's configuration history
    History { name: String },
}

fn parse_role(value: &str) -> Result<Role, String> {
    match value {
        "admin" => Ok(Role::Admin),
        "operator" => Ok(Role::Operator),
        "viewer" => Ok(Role::Viewer),
        "cluster" => Ok(Role::Cluster),
        other => Err(format!("unknown role '{}'", other)),
    }
}

fn parse_storage_type(value: &str) -> Result<StorageType, String> {
    match value {
        "local" => Ok(StorageType::Local),
        "replicated" => Ok(StorageType::Replicated),
        other => Err(format!("unknown storage type '{}'", other)),
    }
}

fn parse_driver(value: &str) -> Result<DiskDriver, String> {
    match value {
        "virtio" => Ok(DiskDriver::Virtio),
        "ide" => Ok(DiskDriver::Ide),
        "scsi" => Ok(DiskDriver::Scsi),
        other => Err(format!("unknown disk driver '{}'", other)),
    }
}

fn to_bytes(amount: u64, unit_bytes: u64, unit: &str) -> anyhow::Result<u64> {
    amount
        .checked_mul(unit_bytes)
        .ok_or_else(|| anyhow::anyhow!("{} {} does not fit in a 64-bit byte count", amount, unit))
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::new_from_file(path)?,
        None => Settings::new()?,
    };

    match cli.command {
        Commands::Serve { port } => {
            let server_port = port.unwrap_or(settings.server.port);
            info!("Starting server on port {}", server_port);
            crate::node::run_server(settings, server_port).await?;
        }
        Commands::Vm { command } => {
            let url = cli
                .url
                .unwrap_or_else(|| format!("http://{}:{}", settings.server.host, settings.server.port));
            let client = ApiClient::new(
                url,
                &settings.auth.jwt_secret,
                &Principal::new(cli.user, cli.role),
                settings.auth.token_ttl(),
            )?;
            handle_vm_command(command, &client).await?;
        }
        Commands::Init { force } => handle_init_command(force)?,
    }

    Ok(())
}

async fn handle_vm_command(command: VmCommands, client: &ApiClient) -> anyhow::Result<()> {
    match command {
        VmCommands::Create {
            name,
            cpu,
            memory_mb,
            disks,
            networks,
            node,
            storage_nodes,
            storage,
            driver,
        } => {
            let body = CreateVmBody {
                name,
                cpu_cores: cpu,
                memory_allocation: to_bytes(memory_mb, BYTES_PER_MB, "MB")?,
                hard_drives: disks
                    .into_iter()
                    .map(|gb| to_bytes(gb, BYTES_PER_GB, "GB"))
                    .collect::<anyhow::Result<_>>()?,
                network_interfaces: networks,
                node,
                available_nodes: storage_nodes,
                storage_type: storage,
                hard_drive_driver: driver,
            };
            let vm = client.create_vm(&body).await?;
            println!(
                "{} VM '{}' created on {}",
                "✓".green(),
                vm.name,
                vm.node.as_deref().unwrap_or("no node")
            );
        }
        VmCommands::List => {
            println!("{}", "Virtual Machines:".bold());
            for vm in client.list_vms().await? {
                let status = match vm.state {
                    PowerState::Running => "Running".green(),
                    PowerState::Stopped => "Stopped".red(),
                    PowerState::Paused => "Paused".yellow(),
                    PowerState::Unknown => "Unknown".dimmed(),
                };
                println!("- {} ({}) [{}]", vm.name, status, vm.node.as_deref().unwrap_or("Unregistered"));
            }
        }
        VmCommands::Names { node } => {
            for name in client.list_names(node.as_deref()).await? {
                println!("{}", name);
            }
        }
        VmCommands::Table => println!("{}", client.table().await?),
        VmCommands::Info { name } => {
            let details = client.info(&name).await?;
            println!("{}", details.summary.name.bold());
            println!("  state:    {}", details.summary.state);
            println!("  node:     {}", details.summary.node.as_deref().unwrap_or("Unregistered"));
            println!("  cpus:     {}", details.config.cpu_cores);
            println!("  memory:   {} MB", details.config.memory_allocation / BYTES_PER_MB);
            println!("  storage:  {}", details.config.nodes.join(", "));
            for disk in &details.config.hard_drives {
                println!(
                    "  disk {}:   {} GB {} ({:?})",
                    disk.id,
                    disk.size / BYTES_PER_GB,
                    disk.storage_type,
                    disk.driver
                );
            }
            for nic in &details.config.network_interfaces {
                println!("  nic:      {} {}", nic.network, nic.mac_address);
            }
        }
        VmCommands::Exists { name, node } => {
            let answer = client.exists(&name, node.as_deref()).await?;
            if answer.exists {
                println!("{} VM '{}' exists", "✓".green(), answer.name);
            } else {
                println!("{} VM '{}' does not exist", "✗".red(), answer.name);
            }
        }
        VmCommands::CheckName { name } => {
            client.check_name(&name).await?;
            println!("{} '{}' is available", "✓".green(), name);
        }
        VmCommands::History { name } => {
            for change in client.history(&name).await? {
                println!("{}  {}", change.timestamp.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(), change.message);
            }
        }
    }

    Ok(())
}

fn handle_init_command(force: bool) -> anyhow::Result<()> {
    let config_dir = PathBuf::from("config");
    let target = config_dir.join("default.toml");
    if target.exists() && !force {
        error!("Configuration already exists. Use --force to overwrite.");
        return Ok(());
    }

    std::fs::create_dir_all(&config_dir)?;
    let config_str = crate::config::generate_default_config()
        .to_toml()
        .context("cannot render default configuration")?;
    std::fs::write(&target, config_str)?;

    println!("{} Default configuration generated", "✓".green());
    Ok(())
}
