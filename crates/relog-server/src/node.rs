//! Node lifecycle
//!
//! Construction opens the commit log, starts the log service, builds the
//! replicator on a local client and joins membership, in that order.
//! Shutdown reverses it: leave membership, close the replicator, stop the
//! RPC server, close the commit log.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex as SyncMutex;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::{error, info, warn};

use relog_api::Member;
use relog_common::{RelogError, split_host_port};
use relog_core::{
    CommitLog, FileCommitLog, LogError, LogService, LogServiceConfig, Membership,
    MembershipConfig, MembershipError, ReplicationError, Replicator,
};

use crate::config::NodeConfig;
use crate::startup::ShutdownSignal;

#[derive(thiserror::Error, Debug)]
pub enum NodeError {
    #[error(transparent)]
    Config(#[from] RelogError),

    #[error("commit log error: {0}")]
    Log(#[from] LogError),

    #[error("failed to bind RPC listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("replication error: {0}")]
    Replication(#[from] ReplicationError),

    #[error("membership error: {0}")]
    Membership(#[from] MembershipError),

    #[error("RPC server task failed: {0}")]
    ServerTask(#[from] tokio::task::JoinError),
}

/// The log service's gRPC server running in the background
struct RpcServer {
    shutdown: CancellationToken,
    handle: SyncMutex<Option<JoinHandle<()>>>,
}

impl RpcServer {
    fn spawn(
        service: LogService,
        listener: TcpListener,
        failed: oneshot::Sender<String>,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let handle = tokio::spawn(async move {
            let result = Server::builder()
                .add_service(service.into_server())
                .serve_with_incoming_shutdown(
                    TcpListenerStream::new(listener),
                    token.cancelled_owned(),
                )
                .await;
            if let Err(e) = result {
                error!("Log RPC server error: {}", e);
                let _ = failed.send(e.to_string());
            }
        });

        Self {
            shutdown,
            handle: SyncMutex::new(Some(handle)),
        }
    }

    /// Stop accepting calls and wait for in-flight calls to finish.
    async fn stop(&self) -> Result<(), NodeError> {
        self.shutdown.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            handle.await?;
        }
        Ok(())
    }
}

pub struct Node {
    config: NodeConfig,
    rpc_addr: String,
    commit_log: Arc<FileCommitLog>,
    server: RpcServer,
    replicator: Replicator,
    membership: Arc<Membership>,
    shut_down: Mutex<bool>,
    /// Times the shutdown sequence actually ran
    shutdown_runs: AtomicUsize,
    signal: ShutdownSignal,
}

impl Node {
    /// Build and start a node.
    ///
    /// Any failure tears down the steps that already completed and is
    /// returned; no node is handed out in that case.
    pub async fn new(config: NodeConfig) -> Result<Arc<Self>, NodeError> {
        config.validate()?;

        let commit_log = Arc::new(FileCommitLog::open(&config.data_dir)?);

        let started = Self::start_server(&config, &commit_log).await;
        let (server, rpc_addr, servers, failed_rx) = match started {
            Ok(started) => started,
            Err(e) => {
                abort_setup(&commit_log, None, None).await;
                return Err(e);
            }
        };

        let replicator = match Replicator::connect_local(&config.node_name, &rpc_addr) {
            Ok(replicator) => replicator,
            Err(e) => {
                abort_setup(&commit_log, Some(&server), None).await;
                return Err(e.into());
            }
        };

        let membership_config = MembershipConfig {
            node_name: config.node_name.clone(),
            bind_addr: config.bind_addr.clone(),
            rpc_addr: rpc_addr.clone(),
            is_leader: config.bootstrap,
            start_join_addrs: config.start_join_addrs.clone(),
            gossip_interval: config.gossip_interval,
            suspect_timeout: config.suspect_timeout,
            dead_timeout: config.dead_timeout,
            tombstone_timeout: config.dead_timeout * 5,
            ..Default::default()
        };
        let membership =
            match Membership::start(membership_config, Arc::new(replicator.clone())).await {
                Ok(membership) => Arc::new(membership),
                Err(e) => {
                    abort_setup(&commit_log, Some(&server), Some(&replicator)).await;
                    return Err(e.into());
                }
            };
        *servers.write() = Some(membership.clone());

        info!(
            node = %config.node_name,
            rpc_addr = %rpc_addr,
            bind_addr = %membership.bind_addr(),
            leader = config.bootstrap,
            "Node started"
        );

        let node = Arc::new(Self {
            config,
            rpc_addr,
            commit_log,
            server,
            replicator,
            membership,
            shut_down: Mutex::new(false),
            shutdown_runs: AtomicUsize::new(0),
            signal: ShutdownSignal::new(),
        });
        watch_server(Arc::downgrade(&node), failed_rx);

        Ok(node)
    }

    async fn start_server(
        config: &NodeConfig,
        commit_log: &Arc<FileCommitLog>,
    ) -> Result<
        (
            RpcServer,
            String,
            relog_core::ServerProviderHolder,
            oneshot::Receiver<String>,
        ),
        NodeError,
    > {
        let addr = config.rpc_addr()?;
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| NodeError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let port = listener
            .local_addr()
            .map_err(|source| NodeError::Bind {
                addr: addr.clone(),
                source,
            })?
            .port();
        let (host, _) = split_host_port(&addr)?;
        let rpc_addr = format!("{}:{}", host, port);

        let service = LogService::new(commit_log.clone()).with_config(LogServiceConfig {
            poll_interval: config.poll_interval,
            ..Default::default()
        });
        let servers = service.server_holder();

        let (failed_tx, failed_rx) = oneshot::channel();
        let server = RpcServer::spawn(service, listener, failed_tx);
        info!(rpc_addr = %rpc_addr, "Log RPC server listening");

        Ok((server, rpc_addr, servers, failed_rx))
    }

    /// Shut the node down.
    ///
    /// Only the first call does any work; later and concurrent calls return
    /// once it is done. Steps run in order and the first failing step ends
    /// the sequence with its error.
    pub async fn shutdown(&self) -> Result<(), NodeError> {
        let mut shut_down = self.shut_down.lock().await;
        if *shut_down {
            return Ok(());
        }
        *shut_down = true;
        self.shutdown_runs.fetch_add(1, Ordering::SeqCst);
        self.signal.shutdown();
        info!(node = %self.config.node_name, "Shutting down node");

        self.membership.leave().await?;
        self.replicator.close().await?;
        self.server.stop().await?;
        self.commit_log.close()?;

        info!(node = %self.config.node_name, "Node shut down");
        Ok(())
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn node_name(&self) -> &str {
        &self.config.node_name
    }

    /// Address the log service is reachable at.
    pub fn rpc_addr(&self) -> &str {
        &self.rpc_addr
    }

    /// Gossip address, to be used as a seed by other nodes.
    pub fn bind_addr(&self) -> &str {
        self.membership.bind_addr()
    }

    pub fn members(&self) -> Vec<Member> {
        self.membership.members()
    }

    pub fn replicator(&self) -> &Replicator {
        &self.replicator
    }

    pub fn commit_log(&self) -> Arc<dyn CommitLog> {
        self.commit_log.clone()
    }

    /// Fires when shutdown starts.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.signal.clone()
    }
}

/// Best-effort teardown of the steps completed before a setup failure.
async fn abort_setup(
    commit_log: &FileCommitLog,
    server: Option<&RpcServer>,
    replicator: Option<&Replicator>,
) {
    if let Some(replicator) = replicator
        && let Err(e) = replicator.close().await
    {
        warn!("Failed to close replicator after setup failure: {}", e);
    }
    if let Some(server) = server
        && let Err(e) = server.stop().await
    {
        warn!("Failed to stop RPC server after setup failure: {}", e);
    }
    if let Err(e) = commit_log.close() {
        warn!("Failed to close commit log after setup failure: {}", e);
    }
}

/// Shut the node down if its RPC server stops with an error.
fn watch_server(node: Weak<Node>, failed: oneshot::Receiver<String>) {
    tokio::spawn(async move {
        let Ok(e) = failed.await else {
            return;
        };
        let Some(node) = node.upgrade() else {
            return;
        };
        warn!(node = %node.node_name(), "RPC server failed, shutting down node: {}", e);
        if let Err(e) = node.shutdown().await {
            error!(node = %node.node_name(), "Shutdown after server failure failed: {}", e);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn solo_config(dir: &TempDir) -> NodeConfig {
        NodeConfig {
            data_dir: dir.path().to_path_buf(),
            bind_addr: "127.0.0.1:0".to_string(),
            rpc_port: 0,
            node_name: "solo".to_string(),
            start_join_addrs: Vec::new(),
            bootstrap: true,
            poll_interval: Duration::from_millis(5),
            gossip_interval: Duration::from_millis(50),
            suspect_timeout: Duration::from_secs(1),
            dead_timeout: Duration::from_secs(2),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_shutdown_runs_sequence_once() {
        let dir = TempDir::new().unwrap();
        let node = Node::new(solo_config(&dir)).await.unwrap();

        let (first, second, third) =
            tokio::join!(node.shutdown(), node.shutdown(), node.shutdown());
        first.unwrap();
        second.unwrap();
        third.unwrap();
        node.shutdown().await.unwrap();

        assert_eq!(node.shutdown_runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_server_failure_shuts_node_down() {
        let dir = TempDir::new().unwrap();
        let node = Node::new(solo_config(&dir)).await.unwrap();
        let signal = node.shutdown_signal();

        let (failed_tx, failed_rx) = oneshot::channel();
        watch_server(Arc::downgrade(&node), failed_rx);
        failed_tx.send("listener closed".to_string()).unwrap();

        tokio::time::timeout(Duration::from_secs(5), signal.wait())
            .await
            .unwrap();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !node.replicator().is_closed() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(signal.is_shutdown());
        assert!(node.replicator().is_closed());

        // The sequence already ran; an explicit call is a no-op
        node.shutdown().await.unwrap();
        assert_eq!(node.shutdown_runs.load(Ordering::SeqCst), 1);
    }
}
