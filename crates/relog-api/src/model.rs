// Core data models shared by Relog servers and clients

use crate::log::v1::{Record, Server};

/// A cluster participant as seen by a point-in-time membership snapshot
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Member {
    pub id: String,
    pub rpc_addr: String,
    pub is_leader: bool,
}

impl Member {
    pub fn new(id: impl Into<String>, rpc_addr: impl Into<String>, is_leader: bool) -> Self {
        Self {
            id: id.into(),
            rpc_addr: rpc_addr.into(),
            is_leader,
        }
    }
}

impl From<Member> for Server {
    fn from(member: Member) -> Self {
        Server {
            id: member.id,
            rpc_addr: member.rpc_addr,
            is_leader: member.is_leader,
        }
    }
}

impl From<Server> for Member {
    fn from(server: Server) -> Self {
        Member {
            id: server.id,
            rpc_addr: server.rpc_addr,
            is_leader: server.is_leader,
        }
    }
}

impl Record {
    /// Create a record carrying `value`; the offset is assigned on append.
    pub fn with_value(value: impl Into<Vec<u8>>) -> Self {
        Record {
            value: value.into(),
            offset: 0,
        }
    }
}
