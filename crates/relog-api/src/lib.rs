//! Relog API - gRPC service definitions and models
//!
//! This crate provides:
//! - The `log.v1` service (produce, consume, tailing streams, membership query)
//! - The `membership.v1` gossip service used between cluster members
//! - Model types shared by servers and clients

pub mod model;

pub mod log {
    pub mod v1 {
        tonic::include_proto!("log.v1");
    }
}

pub mod membership {
    pub mod v1 {
        tonic::include_proto!("membership.v1");
    }
}

// Re-export commonly used types
pub use log::v1::{
    ConsumeRequest, ConsumeResponse, GetServersRequest, GetServersResponse, ProduceRequest,
    ProduceResponse, Record, Server,
};
pub use model::Member;
