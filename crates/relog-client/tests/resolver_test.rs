//! Resolver tests against a log service with a scripted server list

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;

use relog_api::Member;
use relog_client::{
    Address, BuildOptions, LogResolver, LogResolverBuilder, Resolver, ResolverRegistry,
    RoutingTable, ServiceConfig, Target,
};
use relog_core::{LogService, MembershipError, MemoryCommitLog, ServerProvider};

#[derive(Default)]
struct ScriptedServers {
    members: Mutex<Vec<Member>>,
    failing: AtomicBool,
}

impl ServerProvider for ScriptedServers {
    fn servers(&self) -> Result<Vec<Member>, MembershipError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(MembershipError::AlreadyLeft);
        }
        Ok(self.members.lock().clone())
    }
}

async fn start_server(servers: Arc<ScriptedServers>) -> (String, CancellationToken) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let service =
        LogService::new(Arc::new(MemoryCommitLog::new())).with_server_provider(servers);

    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    tokio::spawn(async move {
        let _ = Server::builder()
            .add_service(service.into_server())
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), token.cancelled_owned())
            .await;
    });
    (addr, shutdown)
}

fn leader_and_follower() -> Arc<ScriptedServers> {
    let servers = ScriptedServers::default();
    *servers.members.lock() = vec![
        Member::new("leader", "localhost:9001", true),
        Member::new("follower", "localhost:9002", false),
    ];
    Arc::new(servers)
}

fn address(addr: &str, is_leader: bool) -> Address {
    Address {
        addr: addr.to_string(),
        is_leader,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_build_resolves_leader_and_follower() {
    let (addr, shutdown) = start_server(leader_and_follower()).await;
    let table = Arc::new(RoutingTable::new());

    let resolver = LogResolver::build(
        Target::new("relog", addr),
        table.clone(),
        BuildOptions::default(),
    )
    .await
    .unwrap();

    let state = table.state();
    assert_eq!(
        state.addresses,
        vec![
            address("localhost:9001", true),
            address("localhost:9002", false)
        ]
    );
    assert_eq!(state.service_config, Some(ServiceConfig::default()));
    assert_eq!(
        state.service_config.unwrap().load_balancing_policy,
        "relog"
    );

    resolver.close().await;
    shutdown.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_resolution_keeps_previous_state() {
    let servers = leader_and_follower();
    let (addr, shutdown) = start_server(servers.clone()).await;
    let table = Arc::new(RoutingTable::new());

    let resolver = LogResolver::build(
        Target::new("relog", addr),
        table.clone(),
        BuildOptions::default(),
    )
    .await
    .unwrap();
    let before = table.state();

    servers.failing.store(true, Ordering::SeqCst);
    *servers.members.lock() = vec![Member::new("other", "localhost:9003", true)];
    resolver.resolve_now().await;
    assert_eq!(table.state(), before);

    servers.failing.store(false, Ordering::SeqCst);
    resolver.resolve_now().await;
    assert_eq!(
        table.state().addresses,
        vec![address("localhost:9003", true)]
    );

    resolver.close().await;
    shutdown.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unreachable_bootstrap_leaves_state_empty() {
    let table = Arc::new(RoutingTable::new());
    let options = BuildOptions {
        connect_timeout: Duration::from_millis(200),
        request_timeout: Duration::from_millis(200),
        ..Default::default()
    };

    let resolver = LogResolver::build(Target::new("relog", "127.0.0.1:1"), table.clone(), options)
        .await
        .unwrap();
    assert!(table.state().addresses.is_empty());

    resolver.close().await;
    assert!(resolver.is_closed().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_refresh_follows_membership_until_closed() {
    let servers = leader_and_follower();
    let (addr, shutdown) = start_server(servers.clone()).await;
    let table = Arc::new(RoutingTable::new());

    let resolver = LogResolver::build(
        Target::new("relog", addr),
        table.clone(),
        BuildOptions::default(),
    )
    .await
    .unwrap();
    let refresh = resolver.spawn_refresh(Duration::from_millis(20));

    let mut updates = table.subscribe();
    servers
        .members
        .lock()
        .push(Member::new("late", "localhost:9004", false));
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            updates.changed().await.unwrap();
            if updates.borrow().addresses.len() == 3 {
                break;
            }
        }
    })
    .await
    .unwrap();

    resolver.close().await;
    tokio::time::timeout(Duration::from_secs(1), refresh)
        .await
        .unwrap()
        .unwrap();

    // Closed resolvers no longer touch the table
    servers.members.lock().clear();
    resolver.resolve_now().await;
    assert_eq!(table.state().addresses.len(), 3);

    shutdown.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_registry_builds_by_scheme() {
    let (addr, shutdown) = start_server(leader_and_follower()).await;
    let mut registry = ResolverRegistry::new();
    registry.register(Arc::new(LogResolverBuilder));

    let table = Arc::new(RoutingTable::new());
    let resolver = registry
        .build(&format!("relog://{}", addr), table.clone(), BuildOptions::default())
        .await
        .unwrap();

    assert_eq!(table.leader(), Some(address("localhost:9001", true)));
    assert_eq!(table.followers(), vec![address("localhost:9002", false)]);

    resolver.close().await;
    shutdown.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dropped_resolver_stops_refresh() {
    let (addr, shutdown) = start_server(leader_and_follower()).await;
    let table = Arc::new(RoutingTable::new());

    let resolver = LogResolver::build(
        Target::new("relog", addr),
        table.clone(),
        BuildOptions::default(),
    )
    .await
    .unwrap();
    let refresh = resolver.spawn_refresh(Duration::from_millis(20));
    tokio::time::sleep(Duration::from_millis(60)).await;

    // Dropped without close: the refresh task must not keep it alive
    drop(resolver);
    tokio::time::timeout(Duration::from_secs(5), refresh)
        .await
        .unwrap()
        .unwrap();

    shutdown.cancel();
}
