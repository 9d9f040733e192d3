//! Neuromesh Node -- peer network core for the compute-sharing mesh.
//!
//! Usage:
//!   neuromesh-node                      # Run with default config
//!   neuromesh-node --config path.toml   # Run with custom config
//!   neuromesh-node identity             # Show node identity

use clap::{Parser, Subcommand};
use std::sync::Arc;

use neuromesh_crypto::NodeIdentity;
use neuromesh_discovery::{DiscoveryEngine, RetryPolicy};
use neuromesh_node::channel::ChannelSettings;
use neuromesh_node::config::NodeConfig;
use neuromesh_node::connection_manager::ConnectionManager;
use neuromesh_node::discovery_task::DiscoveryTask;
use neuromesh_node::dispatcher::Dispatcher;
use neuromesh_node::expand_tilde;

#[derive(Parser)]
#[command(name = "neuromesh-node", about = "Neuromesh peer network node")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "~/.neuromesh/config.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show or generate node identity
    Identity {
        #[command(subcommand)]
        action: Option<IdentityAction>,
    },
    /// Run the node (default)
    Run,
}

#[derive(Subcommand)]
enum IdentityAction {
    /// Generate a new identity keypair
    Generate,
    /// Show current node identity
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "neuromesh_node=info,neuromesh_discovery=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let cfg = NodeConfig::load_or_default(&config_path)?;

    match cli.command {
        Some(Commands::Identity { action }) => {
            let key_path = expand_tilde(&cfg.node.identity_key);
            match action {
                Some(IdentityAction::Generate) | None => {
                    let identity = NodeIdentity::load_or_create(&key_path)?;
                    println!("Node ID: {}", identity.node_id());
                    println!("Key file: {}", key_path.display());
                }
                Some(IdentityAction::Show) => {
                    if key_path.exists() {
                        let identity = NodeIdentity::from_file(&key_path)?;
                        println!("Node ID: {}", identity.node_id());
                    } else {
                        eprintln!("No identity found at {}", key_path.display());
                        std::process::exit(1);
                    }
                }
            }
        }
        Some(Commands::Run) | None => {
            run_node(cfg).await?;
        }
    }

    Ok(())
}

async fn run_node(cfg: NodeConfig) -> anyhow::Result<()> {
    let key_path = expand_tilde(&cfg.node.identity_key);
    let identity = Arc::new(NodeIdentity::load_or_create(&key_path)?);

    tracing::info!(
        node_id = %identity.node_id(),
        version = env!("CARGO_PKG_VERSION"),
        magic = cfg.node.magic,
        "starting neuromesh-node"
    );
    tracing::info!(
        listen = cfg.network.listen_addr.as_deref().unwrap_or("(outbound only)"),
        static_seeds = cfg.network.static_seeds.len(),
        dns_seeds = cfg.network.dns_seeds.len(),
        max_active = cfg.discovery.max_active_peers,
        "network config"
    );

    let bus = Dispatcher::new();
    let manager = ConnectionManager::new(ChannelSettings::from_config(&cfg), bus.clone());
    let engine = Arc::new(tokio::sync::Mutex::new(DiscoveryEngine::new(
        cfg.discovery.max_active_peers,
        RetryPolicy {
            failure_threshold: cfg.discovery.failure_threshold,
            failure_cooldown: cfg.failure_cooldown(),
        },
    )));

    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    // Inbound acceptor (optional)
    let acceptor_handle = if let Some(listen_addr) = &cfg.network.listen_addr {
        let listener = tokio::net::TcpListener::bind(listen_addr).await?;
        tracing::info!(listen = %listen_addr, "accepting inbound peers");
        Some(tokio::spawn(
            manager.clone().run_acceptor(listener, shutdown_tx.subscribe()),
        ))
    } else {
        None
    };

    // Transport loops
    let io_handle = tokio::spawn(manager.clone().run_io_loop(shutdown_tx.subscribe()));
    let drain_handle = tokio::spawn(manager.clone().run_drain_loop(shutdown_tx.subscribe()));

    // Discovery
    let discovery = DiscoveryTask::new(
        engine.clone(),
        manager.clone(),
        bus.clone(),
        identity.clone(),
        &cfg,
    );
    let discovery_handle = tokio::spawn(discovery.run(shutdown_tx.subscribe()));

    tracing::info!("all tasks spawned, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down...");
    let _ = shutdown_tx.send(());

    let _ = tokio::join!(io_handle, drain_handle, discovery_handle);
    if let Some(handle) = acceptor_handle {
        let _ = handle.await;
    }

    tracing::info!("shutdown complete");
    Ok(())
}
