// Pull-based replication
// For every known peer a background link tails the peer's log from offset 0
// and appends each record to the local server through its own RPC endpoint.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, error, info, warn};

use relog_api::log::v1::log_client::LogClient;
use relog_api::{ConsumeRequest, ProduceRequest};
use relog_common::grpc_endpoint;

use crate::error::{HandlerError, ReplicationError};
use crate::membership::MemberEventHandler;

/// A running replication link to one peer
struct ReplicationLink {
    generation: u64,
    token: CancellationToken,
    cursor: Arc<AtomicU64>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct ReplicatorState {
    links: HashMap<String, ReplicationLink>,
    closed: bool,
}

struct ReplicatorInner {
    local_id: String,
    local: LogClient<Channel>,
    state: Mutex<ReplicatorState>,
    next_generation: AtomicU64,
}

/// Replication manager keyed by peer id.
///
/// At most one link exists per peer. Links are started by [`Replicator::join`],
/// stopped by [`Replicator::leave`], and all of them are torn down by
/// [`Replicator::close`], after which joins are ignored.
#[derive(Clone)]
pub struct Replicator {
    inner: Arc<ReplicatorInner>,
}

impl Replicator {
    /// Create a replicator that appends into `local`.
    pub fn new(local_id: impl Into<String>, local: LogClient<Channel>) -> Self {
        Self {
            inner: Arc::new(ReplicatorInner {
                local_id: local_id.into(),
                local,
                state: Mutex::new(ReplicatorState::default()),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    /// Create a replicator whose local client connects lazily to `rpc_addr`.
    pub fn connect_local(
        local_id: impl Into<String>,
        rpc_addr: &str,
    ) -> Result<Self, ReplicationError> {
        let channel = Endpoint::from_shared(grpc_endpoint(rpc_addr))
            .map_err(|_| ReplicationError::InvalidAddress(rpc_addr.to_string()))?
            .connect_lazy();
        Ok(Self::new(local_id, LogClient::new(channel)))
    }

    /// Start replicating from `peer_id` at `rpc_addr`.
    ///
    /// Ignored for the local node, for peers that already have a link, and
    /// after [`Replicator::close`].
    pub fn join(&self, peer_id: &str, rpc_addr: &str) {
        if peer_id == self.inner.local_id {
            return;
        }

        let mut state = self.inner.state.lock();
        if state.closed || state.links.contains_key(peer_id) {
            return;
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let cursor = Arc::new(AtomicU64::new(0));

        let handle = tokio::spawn(run_link(
            self.inner.clone(),
            peer_id.to_string(),
            rpc_addr.to_string(),
            generation,
            token.clone(),
            cursor.clone(),
        ));

        state.links.insert(
            peer_id.to_string(),
            ReplicationLink {
                generation,
                token,
                cursor,
                handle,
            },
        );
        info!(peer = %peer_id, addr = %rpc_addr, "Started replication link");
    }

    /// Stop replicating from `peer_id`. Unknown peers are ignored.
    pub fn leave(&self, peer_id: &str) {
        let link = self.inner.state.lock().links.remove(peer_id);
        if let Some(link) = link {
            link.token.cancel();
            info!(peer = %peer_id, "Stopped replication link");
        }
    }

    /// Stop every link and refuse future joins.
    ///
    /// Waits for each link to observe its cancellation. Later calls return
    /// immediately.
    pub async fn close(&self) -> Result<(), ReplicationError> {
        let links: Vec<ReplicationLink> = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            state.links.drain().map(|(_, link)| link).collect()
        };

        for link in &links {
            link.token.cancel();
        }
        for link in links {
            if let Err(e) = link.handle.await {
                warn!("Replication link task ended abnormally: {}", e);
            }
        }

        info!("Replicator closed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Number of active links.
    pub fn link_count(&self) -> usize {
        self.inner.state.lock().links.len()
    }

    /// Ids of peers with an active link, sorted.
    pub fn peers(&self) -> Vec<String> {
        let mut peers: Vec<String> = self.inner.state.lock().links.keys().cloned().collect();
        peers.sort();
        peers
    }

    /// Next offset the link to `peer_id` will copy, if one exists.
    pub fn cursor(&self, peer_id: &str) -> Option<u64> {
        self.inner
            .state
            .lock()
            .links
            .get(peer_id)
            .map(|link| link.cursor.load(Ordering::Relaxed))
    }
}

async fn run_link(
    inner: Arc<ReplicatorInner>,
    peer_id: String,
    rpc_addr: String,
    generation: u64,
    token: CancellationToken,
    cursor: Arc<AtomicU64>,
) {
    let result = tokio::select! {
        _ = token.cancelled() => Ok(()),
        result = replicate(inner.local.clone(), &peer_id, &rpc_addr, &cursor) => result,
    };

    match result {
        Ok(()) => debug!(peer = %peer_id, "Replication link cancelled"),
        Err(e) => {
            error!(peer = %peer_id, addr = %rpc_addr, "Replication link failed: {}", e);
            let mut state = inner.state.lock();
            if state
                .links
                .get(&peer_id)
                .is_some_and(|link| link.generation == generation)
            {
                state.links.remove(&peer_id);
            }
        }
    }
}

async fn replicate(
    mut local: LogClient<Channel>,
    peer_id: &str,
    rpc_addr: &str,
    cursor: &AtomicU64,
) -> Result<(), ReplicationError> {
    let mut client = LogClient::connect(grpc_endpoint(rpc_addr)).await?;
    let mut stream = client
        .consume_stream(ConsumeRequest { offset: 0 })
        .await?
        .into_inner();

    while let Some(response) = stream.message().await? {
        let Some(record) = response.record else {
            continue;
        };
        let next = record.offset + 1;
        local
            .produce(ProduceRequest {
                record: Some(record),
            })
            .await?;
        cursor.store(next, Ordering::Relaxed);
    }

    Err(ReplicationError::StreamEnded(peer_id.to_string()))
}

#[async_trait::async_trait]
impl MemberEventHandler for Replicator {
    async fn join(&self, id: &str, rpc_addr: &str) -> Result<(), HandlerError> {
        Replicator::join(self, id, rpc_addr);
        Ok(())
    }

    async fn leave(&self, id: &str) -> Result<(), HandlerError> {
        Replicator::leave(self, id);
        Ok(())
    }
}
