// Resolver for `relog://` targets
// Asks one bootstrap member for the cluster's servers and republishes them
// as addresses tagged with the leader flag.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info, warn};

use relog_api::GetServersRequest;
use relog_api::log::v1::log_client::LogClient;
use relog_common::{RESOLVER_SCHEME, grpc_endpoint};

use super::{
    Address, BuildOptions, ClientConn, Resolver, ResolverBuilder, ServiceConfig, State, Target,
};
use crate::error::{ClientError, Result};

/// Builder registered under the `relog` scheme
#[derive(Clone, Copy, Debug, Default)]
pub struct LogResolverBuilder;

#[async_trait::async_trait]
impl ResolverBuilder for LogResolverBuilder {
    fn scheme(&self) -> &str {
        RESOLVER_SCHEME
    }

    async fn build(
        &self,
        target: Target,
        cc: Arc<dyn ClientConn>,
        options: BuildOptions,
    ) -> Result<Arc<dyn Resolver>> {
        let refresh_interval = options.refresh_interval;
        let resolver = LogResolver::build(target, cc, options).await?;
        if let Some(interval) = refresh_interval {
            resolver.spawn_refresh(interval);
        }
        let resolver: Arc<dyn Resolver> = resolver;
        Ok(resolver)
    }
}

pub struct LogResolver {
    target: Target,
    cc: Arc<dyn ClientConn>,
    /// Bootstrap connection; `None` once closed. Held for the whole
    /// resolution so concurrent calls are serialized.
    client: Mutex<Option<LogClient<Channel>>>,
    service_config: ServiceConfig,
    refresh: CancellationToken,
}

impl LogResolver {
    /// Open the bootstrap connection and resolve once.
    ///
    /// The connection is established lazily, so an unreachable bootstrap
    /// member only shows up as a failed resolution.
    pub async fn build(
        target: Target,
        cc: Arc<dyn ClientConn>,
        options: BuildOptions,
    ) -> Result<Arc<Self>> {
        if target.endpoint.is_empty() {
            return Err(ClientError::InvalidTarget(target.to_string()));
        }
        let channel = Endpoint::from_shared(grpc_endpoint(&target.endpoint))?
            .connect_timeout(options.connect_timeout)
            .timeout(options.request_timeout)
            .connect_lazy();

        let resolver = Arc::new(Self {
            target,
            cc,
            client: Mutex::new(Some(LogClient::new(channel))),
            service_config: ServiceConfig::default(),
            refresh: CancellationToken::new(),
        });
        resolver.resolve_now().await;
        Ok(resolver)
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Resolve every `interval` until the resolver is closed or dropped.
    pub fn spawn_refresh(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let resolver = Arc::downgrade(self);
        let refresh = self.refresh.clone();
        let endpoint = self.target.endpoint.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; build already resolved
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = refresh.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(resolver) = resolver.upgrade() else {
                    break;
                };
                resolver.resolve_now().await;
            }
            debug!(endpoint = %endpoint, "Resolver refresh stopped");
        })
    }

    pub async fn is_closed(&self) -> bool {
        self.client.lock().await.is_none()
    }
}

impl Drop for LogResolver {
    fn drop(&mut self) {
        self.refresh.cancel();
    }
}

#[async_trait::async_trait]
impl Resolver for LogResolver {
    async fn resolve_now(&self) {
        let mut guard = self.client.lock().await;
        let Some(client) = guard.as_mut() else {
            debug!(endpoint = %self.target.endpoint, "Skipping resolution on closed resolver");
            return;
        };

        let servers = match client.get_servers(GetServersRequest {}).await {
            Ok(response) => response.into_inner().servers,
            Err(status) => {
                warn!(
                    endpoint = %self.target.endpoint,
                    code = ?status.code(),
                    "Failed to resolve servers: {}",
                    status.message()
                );
                return;
            }
        };

        let state = State {
            addresses: servers.into_iter().map(Address::from).collect(),
            service_config: Some(self.service_config.clone()),
        };
        debug!(
            endpoint = %self.target.endpoint,
            addresses = state.addresses.len(),
            "Resolved servers"
        );
        if let Err(e) = self.cc.update_state(state) {
            warn!(
                endpoint = %self.target.endpoint,
                "Client connection rejected resolved state: {}",
                e
            );
        }
    }

    async fn close(&self) {
        self.refresh.cancel();
        if self.client.lock().await.take().is_some() {
            info!(endpoint = %self.target.endpoint, "Resolver closed");
        }
    }
}
