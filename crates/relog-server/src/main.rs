//! Main entry point for the Relog server.

use relog_server::{Configuration, Node, init_logging, wait_for_shutdown_signal};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let configuration = Configuration::new()?;
    let _logging_guard =
        init_logging(&configuration.logging_config()).map_err(|e| anyhow::anyhow!(e))?;

    let node_config = configuration.node_config()?;
    info!(
        node = %node_config.node_name,
        data_dir = %node_config.data_dir.display(),
        bind_addr = %node_config.bind_addr,
        rpc_port = node_config.rpc_port,
        seeds = ?node_config.start_join_addrs,
        "Starting relog node"
    );

    let node = Node::new(node_config).await?;

    let os_signal = wait_for_shutdown_signal().await;
    let node_signal = node.shutdown_signal();
    tokio::select! {
        _ = os_signal.wait() => {}
        // The node shuts itself down if its RPC server fails
        _ = node_signal.wait() => {}
    }

    node.shutdown().await?;
    info!("Relog server stopped");
    Ok(())
}
