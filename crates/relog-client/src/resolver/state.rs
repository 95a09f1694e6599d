// Resolved state handed to the client connection

use relog_api::Server;
use relog_common::RESOLVER_SCHEME;

/// A routable server address
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Address {
    /// `host:port` of the server's log service
    pub addr: String,
    /// Whether the server is the cluster leader
    pub is_leader: bool,
}

impl From<Server> for Address {
    fn from(server: Server) -> Self {
        Address {
            addr: server.rpc_addr,
            is_leader: server.is_leader,
        }
    }
}

/// Service configuration published with every resolution
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Name of the load-balancing policy the client should use
    pub load_balancing_policy: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            load_balancing_policy: RESOLVER_SCHEME.to_string(),
        }
    }
}

/// A complete resolution result
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct State {
    pub addresses: Vec<Address>,
    pub service_config: Option<ServiceConfig>,
}

impl State {
    pub fn leader(&self) -> Option<&Address> {
        self.addresses.iter().find(|address| address.is_leader)
    }

    pub fn followers(&self) -> impl Iterator<Item = &Address> {
        self.addresses.iter().filter(|address| !address.is_leader)
    }
}
