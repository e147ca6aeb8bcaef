#![forbid(unsafe_code)]
//! Tallychain node: ledger + HTTP API in one process.

use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tallychain::api::{run_api_server, ApiNode};
use tallychain::config::{load_config_from, DEFAULT_CONFIG_PATH};
use tallychain::node::Node;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tally-node", about = "Run a Tallychain ledger node")]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Port for the HTTP API (overrides network.api_port)
    #[arg(short, long)]
    port: Option<u16>,

    /// Peer address to register at startup; repeatable
    #[arg(long = "peer")]
    peers: Vec<String>,

    /// Reward recipient id (overrides node.identifier)
    #[arg(long)]
    node_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = load_config_from(&args.config)?;
    if let Some(port) = args.port {
        config.network.api_port = port;
    }
    if let Some(node_id) = args.node_id {
        config.node.identifier = node_id;
    }
    config.network.bootstrap_peers.extend(args.peers);

    let bind: IpAddr = config
        .network
        .bind
        .parse()
        .map_err(|e| format!("invalid network.bind '{}': {}", config.network.bind, e))?;
    let addr = SocketAddr::new(bind, config.network.api_port);

    let node = Arc::new(Node::from_config(config)?);
    info!(node_id = %node.node_id().await, "starting tally node");

    let api = Arc::new(ApiNode::new(Arc::clone(&node)));
    let shutdown_node = Arc::clone(&node);
    let shutdown = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        shutdown_node.shutdown();
    };

    run_api_server(api, addr, shutdown).await?;
    info!("node stopped");
    Ok(())
}
