//! Gossip membership
//!
//! Members exchange their full view of the cluster with a few random peers
//! every gossip round (push-pull anti-entropy). Each member owns an
//! incarnation number that it bumps on every round; a member whose
//! incarnation stops advancing is first suspected and then declared dead.
//!
//! Transitions into the live set are reported as joins and transitions out
//! of it as leaves, in order, to a single [`MemberEventHandler`].

mod event;
mod gossip;
mod table;

use std::time::Duration;

pub use event::{MemberChangeEvent, MemberChangeType, MemberEventHandler};
pub use gossip::Membership;

/// Membership settings
#[derive(Clone, Debug)]
pub struct MembershipConfig {
    /// Unique id of this member
    pub node_name: String,
    /// `host:port` the gossip server listens on; port 0 picks a free port
    pub bind_addr: String,
    /// RPC address advertised to other members
    pub rpc_addr: String,
    /// Whether this member advertises itself as the leader
    pub is_leader: bool,
    /// Seed gossip addresses contacted on start
    pub start_join_addrs: Vec<String>,
    pub gossip_interval: Duration,
    /// Number of random peers contacted per gossip round
    pub gossip_fanout: usize,
    pub suspect_timeout: Duration,
    pub dead_timeout: Duration,
    /// How long dead and departed members are remembered before being dropped
    pub tombstone_timeout: Duration,
    /// Connect and request timeout for push-pull calls
    pub request_timeout: Duration,
}

impl MembershipConfig {
    pub fn new(
        node_name: impl Into<String>,
        bind_addr: impl Into<String>,
        rpc_addr: impl Into<String>,
    ) -> Self {
        Self {
            node_name: node_name.into(),
            bind_addr: bind_addr.into(),
            rpc_addr: rpc_addr.into(),
            ..Default::default()
        }
    }
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            node_name: String::new(),
            bind_addr: "127.0.0.1:8401".to_string(),
            rpc_addr: "127.0.0.1:8400".to_string(),
            is_leader: false,
            start_join_addrs: Vec::new(),
            gossip_interval: Duration::from_millis(200),
            gossip_fanout: 3,
            suspect_timeout: Duration::from_secs(2),
            dead_timeout: Duration::from_secs(4),
            tombstone_timeout: Duration::from_secs(20),
            request_timeout: Duration::from_secs(1),
        }
    }
}
