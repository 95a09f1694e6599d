// gRPC log service
// Serves produce/consume requests against a commit log, including the
// tailing consume stream used by replication and the bidirectional
// produce stream.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, error, warn};

use relog_api::log::v1::log_server::{Log, LogServer};
use relog_api::{
    ConsumeRequest, ConsumeResponse, GetServersRequest, GetServersResponse, Member,
    ProduceRequest, ProduceResponse, Server,
};

use crate::commit_log::CommitLog;
use crate::error::{LogError, MembershipError};

/// Source of the cluster server list returned by `GetServers`
pub trait ServerProvider: Send + Sync {
    fn servers(&self) -> Result<Vec<Member>, MembershipError>;
}

/// Late-bound server provider.
///
/// The log service starts serving before membership exists, so the
/// provider is installed into this slot once it is created.
pub type ServerProviderHolder = Arc<RwLock<Option<Arc<dyn ServerProvider>>>>;

/// Tunables for the log service
#[derive(Clone, Debug)]
pub struct LogServiceConfig {
    /// How long a tailing consume stream waits before re-reading an offset
    /// that is not written yet
    pub poll_interval: Duration,
    /// Capacity of the per-stream response channel
    pub stream_buffer: usize,
}

impl Default for LogServiceConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            stream_buffer: 128,
        }
    }
}

#[derive(Clone)]
pub struct LogService {
    commit_log: Arc<dyn CommitLog>,
    servers: ServerProviderHolder,
    config: LogServiceConfig,
}

impl LogService {
    pub fn new(commit_log: Arc<dyn CommitLog>) -> Self {
        Self {
            commit_log,
            servers: Arc::new(RwLock::new(None)),
            config: LogServiceConfig::default(),
        }
    }

    pub fn with_config(mut self, config: LogServiceConfig) -> Self {
        self.config = config;
        self
    }

    /// Share an existing provider slot with this service.
    pub fn with_server_holder(mut self, holder: ServerProviderHolder) -> Self {
        self.servers = holder;
        self
    }

    pub fn with_server_provider(self, provider: Arc<dyn ServerProvider>) -> Self {
        *self.servers.write() = Some(provider);
        self
    }

    pub fn server_holder(&self) -> ServerProviderHolder {
        self.servers.clone()
    }

    pub fn into_server(self) -> LogServer<Self> {
        LogServer::new(self)
    }
}

fn produce_record(
    commit_log: &dyn CommitLog,
    request: ProduceRequest,
) -> Result<ProduceResponse, Status> {
    let record = request
        .record
        .ok_or_else(|| Status::invalid_argument("produce request carries no record"))?;
    let offset = commit_log.append(record)?;
    Ok(ProduceResponse { offset })
}

#[tonic::async_trait]
impl Log for LogService {
    async fn produce(
        &self,
        request: Request<ProduceRequest>,
    ) -> Result<Response<ProduceResponse>, Status> {
        let response = produce_record(self.commit_log.as_ref(), request.into_inner())?;
        Ok(Response::new(response))
    }

    async fn consume(
        &self,
        request: Request<ConsumeRequest>,
    ) -> Result<Response<ConsumeResponse>, Status> {
        let record = self.commit_log.read(request.into_inner().offset)?;
        Ok(Response::new(ConsumeResponse {
            record: Some(record),
        }))
    }

    type ConsumeStreamStream =
        Pin<Box<dyn Stream<Item = Result<ConsumeResponse, Status>> + Send + 'static>>;

    async fn consume_stream(
        &self,
        request: Request<ConsumeRequest>,
    ) -> Result<Response<Self::ConsumeStreamStream>, Status> {
        let mut offset = request.into_inner().offset;
        let commit_log = self.commit_log.clone();
        let poll_interval = self.config.poll_interval;

        let (tx, rx) = mpsc::channel(self.config.stream_buffer);

        tokio::spawn(async move {
            loop {
                if tx.is_closed() {
                    break;
                }

                match commit_log.read(offset) {
                    Ok(record) => {
                        let response = ConsumeResponse {
                            record: Some(record),
                        };
                        if tx.send(Ok(response)).await.is_err() {
                            break;
                        }
                        offset += 1;
                    }
                    Err(LogError::OffsetOutOfRange(_)) => {
                        tokio::select! {
                            _ = tx.closed() => break,
                            _ = tokio::time::sleep(poll_interval) => {}
                        }
                    }
                    Err(e) => {
                        warn!(offset, "Consume stream stopped: {}", e);
                        let _ = tx.send(Err(e.into())).await;
                        break;
                    }
                }
            }
            debug!(offset, "Consume stream finished");
        });

        let output_stream = ReceiverStream::new(rx);
        Ok(Response::new(
            Box::pin(output_stream) as Self::ConsumeStreamStream
        ))
    }

    type ProduceStreamStream =
        Pin<Box<dyn Stream<Item = Result<ProduceResponse, Status>> + Send + 'static>>;

    async fn produce_stream(
        &self,
        request: Request<Streaming<ProduceRequest>>,
    ) -> Result<Response<Self::ProduceStreamStream>, Status> {
        let mut inbound_stream = request.into_inner();
        let commit_log = self.commit_log.clone();

        let (tx, rx) = mpsc::channel(self.config.stream_buffer);

        tokio::spawn(async move {
            loop {
                let request = match inbound_stream.message().await {
                    Ok(Some(request)) => request,
                    Ok(None) => break,
                    Err(e) => {
                        debug!("Produce stream receive error: {}", e);
                        break;
                    }
                };

                match produce_record(commit_log.as_ref(), request) {
                    Ok(response) => {
                        if tx.send(Ok(response)).await.is_err() {
                            break;
                        }
                    }
                    Err(status) => {
                        error!("Produce stream append failed: {}", status.message());
                        let _ = tx.send(Err(status)).await;
                        break;
                    }
                }
            }
        });

        let output_stream = ReceiverStream::new(rx);
        Ok(Response::new(
            Box::pin(output_stream) as Self::ProduceStreamStream
        ))
    }

    async fn get_servers(
        &self,
        _request: Request<GetServersRequest>,
    ) -> Result<Response<GetServersResponse>, Status> {
        let provider = self
            .servers
            .read()
            .clone()
            .ok_or_else(|| Status::unavailable("membership is not available"))?;

        let servers = provider
            .servers()
            .map_err(|e| Status::internal(e.to_string()))?
            .into_iter()
            .map(Server::from)
            .collect();

        Ok(Response::new(GetServersResponse { servers }))
    }
}
