// Gossip membership service
// Runs the push-pull gRPC server, the periodic gossip round and the member
// event dispatcher for one cluster member.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, Endpoint, Server};
use tonic::{Request, Response, Status};
use tracing::{debug, error, info, warn};

use relog_api::Member;
use relog_api::membership::v1::membership_client::MembershipClient;
use relog_api::membership::v1::membership_server::{
    Membership as MembershipRpc, MembershipServer,
};
use relog_api::membership::v1::{MemberState, MemberStatus, PushPullRequest, PushPullResponse};
use relog_common::{grpc_endpoint, split_host_port};

use super::MembershipConfig;
use super::event::{MemberEventHandler, spawn_dispatcher};
use super::table::MemberTable;
use crate::error::MembershipError;
use crate::service::log_service::ServerProvider;

struct GossipState {
    config: MembershipConfig,
    bind_addr: String,
    table: MemberTable,
    clients: DashMap<String, MembershipClient<Channel>>,
}

impl GossipState {
    fn client(&self, addr: &str) -> Result<MembershipClient<Channel>, MembershipError> {
        if let Some(client) = self.clients.get(addr) {
            return Ok(client.clone());
        }
        let channel = Endpoint::from_shared(grpc_endpoint(addr))?
            .connect_timeout(self.config.request_timeout)
            .timeout(self.config.request_timeout)
            .connect_lazy();
        let client = MembershipClient::new(channel);
        self.clients.insert(addr.to_string(), client.clone());
        Ok(client)
    }

    /// Exchange full views with the member gossiping at `addr`.
    async fn push_pull(&self, addr: &str) -> Result<(), MembershipError> {
        let mut client = self.client(addr)?;
        let request = PushPullRequest {
            from: self.config.node_name.clone(),
            members: self.table.snapshot(),
        };

        match client.push_pull(request).await {
            Ok(response) => {
                self.table.merge(response.into_inner().members);
                Ok(())
            }
            Err(status) => {
                self.clients.remove(addr);
                Err(status.into())
            }
        }
    }

    async fn gossip_round(&self) {
        self.table.heartbeat();
        self.table
            .detect_failures(self.config.suspect_timeout, self.config.dead_timeout);
        self.table.expire_tombstones(self.config.tombstone_timeout);

        let mut targets = self.table.gossip_targets(self.config.gossip_fanout);
        if targets.is_empty() {
            // Alone: keep knocking on the seeds so a restarted seed is found again
            targets = self
                .config
                .start_join_addrs
                .iter()
                .filter(|addr| **addr != self.bind_addr)
                .cloned()
                .collect();
        }

        let results = join_all(targets.iter().map(|addr| self.push_pull(addr))).await;
        for (addr, result) in targets.iter().zip(results) {
            if let Err(e) = result {
                debug!(peer = %addr, "Gossip round failed: {}", e);
            }
        }
    }
}

#[derive(Clone)]
struct GossipService {
    state: Arc<GossipState>,
}

#[tonic::async_trait]
impl MembershipRpc for GossipService {
    async fn push_pull(
        &self,
        request: Request<PushPullRequest>,
    ) -> Result<Response<PushPullResponse>, Status> {
        let request = request.into_inner();
        debug!(from = %request.from, members = request.members.len(), "Received push-pull");
        self.state.table.merge(request.members);
        Ok(Response::new(PushPullResponse {
            members: self.state.table.snapshot(),
        }))
    }
}

/// A running membership participant.
///
/// Created with [`Membership::start`], which binds the gossip listener and
/// contacts the seeds. [`Membership::leave`] announces the departure and
/// stops every background task.
pub struct Membership {
    state: Arc<GossipState>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    left: AtomicBool,
}

impl Membership {
    pub async fn start(
        config: MembershipConfig,
        handler: Arc<dyn MemberEventHandler>,
    ) -> Result<Self, MembershipError> {
        let listener =
            TcpListener::bind(&config.bind_addr)
                .await
                .map_err(|source| MembershipError::Bind {
                    addr: config.bind_addr.clone(),
                    source,
                })?;
        let local_port = listener
            .local_addr()
            .map_err(|source| MembershipError::Bind {
                addr: config.bind_addr.clone(),
                source,
            })?
            .port();
        let (host, _) = split_host_port(&config.bind_addr)?;
        let bind_addr = format!("{}:{}", host, local_port);

        let local = MemberState {
            id: config.node_name.clone(),
            bind_addr: bind_addr.clone(),
            rpc_addr: config.rpc_addr.clone(),
            is_leader: config.is_leader,
            incarnation: chrono::Utc::now().timestamp_millis().max(0) as u64,
            status: MemberStatus::Alive as i32,
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let state = Arc::new(GossipState {
            config,
            bind_addr,
            table: MemberTable::new(local, events_tx),
            clients: DashMap::new(),
        });
        let shutdown = CancellationToken::new();

        let mut tasks = Vec::with_capacity(3);
        tasks.push(spawn_dispatcher(events_rx, handler, shutdown.clone()));
        tasks.push(spawn_server(state.clone(), listener, shutdown.clone()));
        tasks.push(spawn_gossip_loop(state.clone(), shutdown.clone()));

        info!(
            node = %state.config.node_name,
            addr = %state.bind_addr,
            "Membership started"
        );

        let membership = Self {
            state,
            shutdown,
            tasks: Mutex::new(tasks),
            left: AtomicBool::new(false),
        };

        let seeds = membership.state.config.start_join_addrs.clone();
        if let Err(e) = membership.join(&seeds).await {
            membership.stop().await;
            return Err(e);
        }

        Ok(membership)
    }

    /// Contact every seed; succeeds when at least one answers.
    async fn join(&self, seeds: &[String]) -> Result<(), MembershipError> {
        let seeds: Vec<&String> = seeds
            .iter()
            .filter(|seed| **seed != self.state.bind_addr)
            .collect();
        if seeds.is_empty() {
            return Ok(());
        }

        let mut contacted = 0;
        for seed in &seeds {
            match self.state.push_pull(seed).await {
                Ok(()) => {
                    info!(seed = %seed, "Joined cluster through seed");
                    contacted += 1;
                }
                Err(e) => warn!(seed = %seed, "Failed to contact seed: {}", e),
            }
        }

        if contacted == 0 {
            return Err(MembershipError::JoinFailed(
                seeds.into_iter().cloned().collect(),
            ));
        }
        Ok(())
    }

    /// Announce departure to every live peer and stop gossiping.
    ///
    /// Later calls return immediately.
    pub async fn leave(&self) -> Result<(), MembershipError> {
        if self.left.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.state.table.mark_left();
        let peers = self.state.table.live_peer_addrs();
        let results = join_all(peers.iter().map(|addr| self.state.push_pull(addr))).await;
        for (addr, result) in peers.iter().zip(results) {
            if let Err(e) = result {
                warn!(peer = %addr, "Failed to announce departure: {}", e);
            }
        }

        self.stop().await;
        info!(node = %self.state.config.node_name, "Left cluster");
        Ok(())
    }

    async fn stop(&self) {
        self.shutdown.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                error!("Membership task ended abnormally: {}", e);
            }
        }
    }

    /// Live members, including this one, sorted by id.
    pub fn members(&self) -> Vec<Member> {
        self.state.table.live_members()
    }

    pub fn node_name(&self) -> &str {
        &self.state.config.node_name
    }

    /// Gossip address actually bound, with the port resolved.
    pub fn bind_addr(&self) -> &str {
        &self.state.bind_addr
    }

    pub fn has_left(&self) -> bool {
        self.left.load(Ordering::SeqCst)
    }
}

impl Drop for Membership {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl ServerProvider for Membership {
    fn servers(&self) -> Result<Vec<Member>, MembershipError> {
        Ok(self.members())
    }
}

fn spawn_server(
    state: Arc<GossipState>,
    listener: TcpListener,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let service = MembershipServer::new(GossipService { state });
    tokio::spawn(async move {
        let result = Server::builder()
            .add_service(service)
            .serve_with_incoming_shutdown(
                TcpListenerStream::new(listener),
                shutdown.cancelled_owned(),
            )
            .await;
        if let Err(e) = result {
            error!("Gossip server error: {}", e);
        }
    })
}

fn spawn_gossip_loop(state: Arc<GossipState>, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(state.config.gossip_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = state.gossip_round() => {}
            }
        }
        debug!("Gossip loop stopped");
    })
}
