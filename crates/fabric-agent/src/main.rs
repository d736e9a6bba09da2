//! Fabric Agent
//!
//! Tracks cluster nodes reported by discovery sources and keeps the datapath
//! in sync with them.

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use fabric_agent::{
    api,
    config::AgentConfig,
    ipcache::MemoryIpCache,
    nodes::{LoggingNodeHandler, NodeManager},
    observability::{init_metrics, init_tracing, MetricsRegistry, TracingConfig},
    sources::{self, KvStoreConfig},
    version,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "fabric-agent")]
#[command(about = "Cluster node manager for the fabric networking agent")]
#[command(version = version::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent
    Run {
        /// etcd endpoints (comma-separated)
        #[arg(long, env = "ETCD_ENDPOINTS")]
        etcd_endpoints: Option<String>,

        /// HTTP listen address
        #[arg(long, env = "BIND_ADDR")]
        bind_addr: Option<std::net::SocketAddr>,
    },
    /// Print build information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            println!("{}", version::build_info());
            Ok(())
        }
        Commands::Run {
            etcd_endpoints,
            bind_addr,
        } => {
            let mut config = AgentConfig::from_env();
            if let Some(endpoints) = etcd_endpoints {
                config.etcd_endpoints = endpoints
                    .split(',')
                    .map(str::trim)
                    .filter(|e| !e.is_empty())
                    .map(String::from)
                    .collect();
            }
            if let Some(addr) = bind_addr {
                config.bind_addr = addr;
            }
            run_agent(config).await
        }
    }
}

async fn run_agent(config: AgentConfig) -> anyhow::Result<()> {
    init_tracing(TracingConfig::from_env()).map_err(|e| anyhow!("Failed to initialize tracing: {e}"))?;

    info!(version = %version::full_version(), "Starting fabric-agent");
    info!(
        cluster = %config.cluster_name,
        node = %config.node_name,
        bind_addr = %config.bind_addr,
        kvstore = config.kvstore_enabled(),
        "Configuration loaded"
    );

    let metrics_state = match init_metrics() {
        Ok(state) => Some(state),
        Err(e) => {
            warn!(error = %e, "Failed to initialize metrics, continuing without");
            None
        }
    };

    let registry = MetricsRegistry::new();
    let manager = NodeManager::new(
        config.manager_name.clone(),
        Arc::new(LoggingNodeHandler),
        Arc::new(MemoryIpCache::new()),
        &registry,
        config.manager_config(),
    )
    .await?;

    manager.node_updated(sources::local_node(&config)).await;

    if let Some(path) = &config.local_nodes_file {
        let nodes = sources::load_local_nodes(path).await?;
        sources::apply_local_nodes(&manager, nodes).await;
    }

    let readiness = Arc::new(AtomicBool::new(false));
    let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();

    let kvstore = if config.kvstore_enabled() {
        let kvstore_config = KvStoreConfig::from(&config);
        let manager = manager.clone();
        let readiness = readiness.clone();
        Some(tokio::spawn(async move {
            if let Err(e) =
                sources::run_kvstore_source(kvstore_config, manager, readiness, shutdown_rx).await
            {
                error!(error = %e, "KV-store source failed");
            }
        }))
    } else {
        readiness.store(true, Ordering::Release);
        None
    };

    let state = api::AppState {
        manager: manager.clone(),
        metrics_state,
        node_name: config.node_name.clone(),
        readiness,
    };
    let app = api::create_router(state);

    info!(bind_addr = %config.bind_addr, "Starting API server");
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received");
        })
        .await?;

    let _ = shutdown_tx.send(());
    if let Some(handle) = kvstore {
        if let Err(e) = handle.await {
            warn!(error = %e, "KV-store source task failed");
        }
    }

    manager.close().await;
    info!("fabric-agent stopped");
    Ok(())
}
